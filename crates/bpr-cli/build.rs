use std::process::Command;

/// Short commit hash for `bpr --version`: git first, then a `GIT_HASH`
/// provided by the build environment, then "unknown".
fn git_hash() -> String {
    let from_git = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|hash| hash.trim().to_owned());

    from_git
        .or_else(|| std::env::var("GIT_HASH").ok())
        .filter(|hash| !hash.is_empty() && hash != "unknown")
        .unwrap_or_else(|| "unknown".to_owned())
}

fn main() {
    println!("cargo:rustc-env=GIT_HASH={}", git_hash());
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-env-changed=GIT_HASH");
}
