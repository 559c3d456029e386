//! Workspace initialization utilities for tests

use assert_fs::TempDir;
use std::fs;
use std::path::PathBuf;

/// Create a temporary directory, removed on drop
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

/// Initialize a FinSync workspace in a temp directory
///
/// # Example
///
/// ```rust
/// use fin_test_helpers::workspace::init_workspace;
///
/// let workspace = init_workspace();
/// assert!(workspace.path().join(".finsync").exists());
/// ```
pub fn init_workspace() -> TempDir {
    let temp = temp_dir();
    fs::create_dir_all(temp.path().join(".finsync")).expect("Failed to create .finsync directory");
    temp
}

/// Workspace whose `.finsync/config.toml` holds `config`
pub fn workspace_with_config(config: &str) -> TempDir {
    let workspace = init_workspace();
    fs::write(workspace.path().join(".finsync").join("config.toml"), config)
        .expect("Failed to write config.toml");
    workspace
}

/// Write a spreadsheet into the workspace and return its path
pub fn write_sheet(workspace: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = workspace.path().join(name);
    fs::write(&path, content).expect("Failed to write sheet");
    path
}
