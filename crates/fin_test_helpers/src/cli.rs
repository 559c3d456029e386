//! CLI command builders for tests

use assert_cmd::Command;

/// Get a Command for the `finsync` binary with clean environment
///
/// `RUST_LOG=error` keeps logs out of captured output, and the user's API
/// key is removed so tests never reach a real backend.
#[allow(deprecated)]
pub fn finsync_command() -> Command {
    let mut cmd = Command::cargo_bin("finsync").expect("Failed to find finsync binary");
    cmd.env("RUST_LOG", "error");
    cmd.env_remove("FINSYNC_API_KEY");
    cmd
}

/// Same as [`finsync_command`] with `--offline` already set
pub fn offline_command() -> Command {
    let mut cmd = finsync_command();
    cmd.arg("--offline");
    cmd
}
