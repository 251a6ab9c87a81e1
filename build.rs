//! Embeds a short commit id for `voxbridge::version_string()`.
//!
//! `VOXBRIDGE_BUILD_HASH` wins over git, for builds from source tarballs.

use std::process::Command;

fn commit_hash() -> Option<String> {
    if let Ok(hash) = std::env::var("VOXBRIDGE_BUILD_HASH") {
        return Some(hash);
    }
    let output = Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_owned())
}

fn main() {
    if let Some(hash) = commit_hash().filter(|h| !h.is_empty()) {
        println!("cargo:rustc-env=GIT_HASH={hash}");
    }
    println!("cargo:rerun-if-env-changed=VOXBRIDGE_BUILD_HASH");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
