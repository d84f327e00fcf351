use std::process::Command;

/// Commit shown by `bgtcheck --version`. Release tarballs carry no `.git`,
/// so packagers set `BGTCHECK_COMMIT` instead.
fn commit() -> String {
    if let Ok(pinned) = std::env::var("BGTCHECK_COMMIT") {
        if !pinned.trim().is_empty() {
            return pinned.trim().to_string();
        }
    }
    Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=7"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn main() {
    println!("cargo:rerun-if-env-changed=BGTCHECK_COMMIT");
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-changed=../../.git/index");

    println!("cargo:rustc-env=GIT_COMMIT_HASH={}", commit());
    println!(
        "cargo:rustc-env=TARGET={}",
        std::env::var("TARGET").unwrap_or_else(|_| "unknown".to_string())
    );
}
