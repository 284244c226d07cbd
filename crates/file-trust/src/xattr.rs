//! Thin wrappers around the extended attribute syscalls
//!
//! "Attribute absent" comes back as `Ok(None)` / `Ok(false)` so callers can
//! tell it apart from an attribute store that cannot be reached at all.

use std::ffi::CString;
use std::io;
use std::path::Path;

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn c_path(path: &Path) -> io::Result<CString> {
    use std::os::unix::ffi::OsStrExt;
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn c_name(name: &str) -> io::Result<CString> {
    CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "attribute name contains a NUL byte"))
}

#[cfg(target_os = "linux")]
fn is_missing(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENODATA)
}

/// Names of every extended attribute on `path`
#[cfg(target_os = "linux")]
pub fn list(path: &Path) -> io::Result<Vec<String>> {
    let path = c_path(path)?;

    loop {
        let size = unsafe { libc::listxattr(path.as_ptr(), std::ptr::null_mut(), 0) };
        if size < 0 {
            return Err(io::Error::last_os_error());
        }
        if size == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; size as usize];
        let read = unsafe {
            libc::listxattr(path.as_ptr(), buf.as_mut_ptr() as *mut libc::c_char, buf.len())
        };
        if read < 0 {
            let err = io::Error::last_os_error();
            // Attributes were added between the two calls
            if err.raw_os_error() == Some(libc::ERANGE) {
                continue;
            }
            return Err(err);
        }
        buf.truncate(read as usize);

        return Ok(buf
            .split(|b| *b == 0)
            .filter(|name| !name.is_empty())
            .map(|name| String::from_utf8_lossy(name).into_owned())
            .collect());
    }
}

/// Value of attribute `name`, or `None` if the attribute is not set
#[cfg(target_os = "linux")]
pub fn get(path: &Path, name: &str) -> io::Result<Option<Vec<u8>>> {
    let path = c_path(path)?;
    let name = c_name(name)?;

    loop {
        let size =
            unsafe { libc::getxattr(path.as_ptr(), name.as_ptr(), std::ptr::null_mut(), 0) };
        if size < 0 {
            let err = io::Error::last_os_error();
            return if is_missing(&err) { Ok(None) } else { Err(err) };
        }

        let mut buf = vec![0u8; size as usize];
        let read = unsafe {
            libc::getxattr(
                path.as_ptr(),
                name.as_ptr(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        if read < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ERANGE) {
                continue;
            }
            return if is_missing(&err) { Ok(None) } else { Err(err) };
        }
        buf.truncate(read as usize);
        return Ok(Some(buf));
    }
}

/// Create or replace attribute `name`
#[cfg(target_os = "linux")]
pub fn set(path: &Path, name: &str, value: &[u8]) -> io::Result<()> {
    let path = c_path(path)?;
    let name = c_name(name)?;

    let rc = unsafe {
        libc::setxattr(
            path.as_ptr(),
            name.as_ptr(),
            value.as_ptr() as *const libc::c_void,
            value.len(),
            0,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Remove attribute `name`. Returns false if it was not set.
#[cfg(target_os = "linux")]
pub fn remove(path: &Path, name: &str) -> io::Result<bool> {
    let path = c_path(path)?;
    let name = c_name(name)?;

    let rc = unsafe { libc::removexattr(path.as_ptr(), name.as_ptr()) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        return if is_missing(&err) { Ok(false) } else { Err(err) };
    }
    Ok(true)
}

#[cfg(not(target_os = "linux"))]
fn unsupported() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "extended attributes are only supported on Linux",
    )
}

#[cfg(not(target_os = "linux"))]
pub fn list(_path: &Path) -> io::Result<Vec<String>> {
    Err(unsupported())
}

#[cfg(not(target_os = "linux"))]
pub fn get(_path: &Path, _name: &str) -> io::Result<Option<Vec<u8>>> {
    Err(unsupported())
}

#[cfg(not(target_os = "linux"))]
pub fn set(_path: &Path, _name: &str, _value: &[u8]) -> io::Result<()> {
    Err(unsupported())
}

#[cfg(not(target_os = "linux"))]
pub fn remove(_path: &Path, _name: &str) -> io::Result<bool> {
    Err(unsupported())
}

/// Whether the filesystem holding `dir` accepts `user.*` attributes
pub fn supported(dir: &Path) -> bool {
    let scratch = dir.join(".xattr-check");
    if std::fs::write(&scratch, b"").is_err() {
        return false;
    }
    let ok = set(&scratch, "user.check", b"1").is_ok();
    let _ = std::fs::remove_file(&scratch);
    ok
}

/// Render an attribute value for log lines
pub fn display_value(value: &[u8]) -> &str {
    std::str::from_utf8(value).unwrap_or("<binary>")
}
