use std::process::Command;

/// Trimmed stdout of a git invocation, or None when git is unavailable,
/// the call fails, or prints nothing (tarball builds).
fn git_stdout(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=.git/refs/heads");

    // `--version` shows <crate version>+<commit count>, with the short hash
    // stamped separately for diagnostics.
    let version = std::env::var("CARGO_PKG_VERSION").unwrap();
    let commits = git_stdout(&["rev-list", "--count", "HEAD"]).unwrap_or_else(|| "0".to_string());
    let hash = git_stdout(&["rev-parse", "--short", "HEAD"])
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=MGIT_COMMIT_HASH={}", hash);
    println!("cargo:rustc-env=CARGO_PKG_VERSION_FULL={}+{}", version, commits);
}
