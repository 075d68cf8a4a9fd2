//! Convoy SSH Executor
//!
//! Runs shell commands on remote machines over SSH and classifies the outcome.
//!
//! This crate is the only place that knows about the transport. The orchestrator
//! drives machines through the [`RemoteExecutor`] trait, which makes it easy to
//! substitute a scripted executor in tests.
//!
//! # Example
//!
//! ```no_run
//! use convoy_ssh::{MachineTarget, RemoteExecutor, SshExecutor};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> convoy_ssh::Result<()> {
//!     let executor = SshExecutor::default();
//!     let target = MachineTarget::with_password(1, "10.0.0.5", "ops", "secret").resolve()?;
//!
//!     let output = executor
//!         .execute(&target, "uname -a", Duration::from_secs(30))
//!         .await?;
//!
//!     println!("{}", output.stdout);
//!     Ok(())
//! }
//! ```

pub mod error;
mod executor;
mod ssh;
mod target;

pub use error::{RemoteError, Result};
pub use executor::{CommandOutput, PROBE_TIMEOUT, RemoteExecutor};
pub use ssh::{SshConfig, SshExecutor};
pub use target::{AuthMethod, MachineTarget, PrivateKey, ResolvedTarget};
