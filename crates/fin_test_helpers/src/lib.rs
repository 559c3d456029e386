//! Shared test utilities for FinSync test suites
//!
//! # Modules
//!
//! - [`workspace`]: Temporary workspaces with a `.finsync` directory
//! - [`cli`]: Command builders with pre-configured environments
//! - [`logging`]: Test logging configuration
//! - [`assertions`]: Domain-specific predicates
//! - [`fake_remote`]: In-memory backend implementing `RemoteApi`
//!
//! # Example
//!
//! ```rust,no_run
//! use fin_test_helpers::prelude::*;
//!
//! let workspace = init_workspace();
//! finsync_command()
//!     .current_dir(workspace.path())
//!     .arg("status")
//!     .assert()
//!     .success();
//! ```

pub mod assertions;
pub mod cli;
pub mod fake_remote;
pub mod logging;
pub mod workspace;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::assertions::*;
    pub use crate::cli::{finsync_command, offline_command};
    pub use crate::fake_remote::{FakeRemote, RecordedCall};
    pub use crate::logging::{init_test_logging, suppress_logs};
    pub use crate::workspace::{init_workspace, temp_dir, workspace_with_config, write_sheet};
}
