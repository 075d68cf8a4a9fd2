//! Remote executor abstraction
//!
//! The orchestrator talks to machines only through [`RemoteExecutor`], so tests
//! and alternative transports can stand in for SSH.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::target::ResolvedTarget;

/// Timeout used for connection probes
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Captured result of a command that exited with status 0
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Trimmed stdout, the form most probes compare against
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Runs one command on one machine and returns its captured output
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Executes a command to completion
    ///
    /// A non-zero exit status is returned as `RemoteError::NonZeroExit`.
    async fn execute(
        &self,
        target: &ResolvedTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput>;

    /// Executes a command, streaming `input` to its stdin followed by EOF
    async fn execute_with_input(
        &self,
        target: &ResolvedTarget,
        command: &str,
        input: &[u8],
        timeout: Duration,
    ) -> Result<CommandOutput>;

    /// Checks that the machine accepts a session and runs a trivial command
    async fn test_connection(&self, target: &ResolvedTarget) -> Result<()> {
        self.execute(target, "echo ok", PROBE_TIMEOUT).await.map(|_| ())
    }
}
