use std::path::Path;
use std::process::Command;

/// The version of the crate, followed by the git revision if the sources are in a repository.
fn long_version() -> String {
    let version = env!("CARGO_PKG_VERSION").to_string();
    let output = Command::new("git")
        .args(["describe", "--always", "--dirty=+dirty", "--long"])
        .output();
    match output {
        Ok(output) if output.status.success() => {
            let revision = String::from_utf8_lossy(&output.stdout);
            let revision = revision.trim();
            if revision.is_empty() {
                version
            } else {
                format!("{version}\n\nRevision: {revision}")
            }
        }
        _ => version,
    }
}

fn main() {
    let out_dir = std::env::var("OUT_DIR").expect("missing OUT_DIR");
    let version_file_path = Path::new(&out_dir).join("version.txt");
    if let Err(e) = std::fs::write(&version_file_path, long_version()) {
        panic!(
            "Failed to write version file at {}: {}",
            version_file_path.display(),
            e
        );
    }
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
}
