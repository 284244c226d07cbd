use trust_core::{process, Paths};

fn main() {
    let paths = Paths::new();

    println!("=== Locations ===");
    for (label, path) in [
        ("global list", paths.global_list()),
        ("local list", paths.local_list()),
        ("phrase file", paths.phrase_file()),
        ("settings", paths.settings()),
    ] {
        let state = if path.exists() { "present" } else { "missing" };
        println!("{}: {} ({})", label, path.display(), state);
    }

    println!("\n=== Helpers ===");
    for name in &["qvm-file-trust", "qvm-trust-daemon", "qvm-open-in-dvm"] {
        println!("{}: {}", name, process::command_exists(name));
    }
}
