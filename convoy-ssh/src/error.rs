//! Error types for remote execution

use std::time::Duration;
use thiserror::Error;

/// Result type alias for remote operations
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Classified failure of a remote command
///
/// Connection-level failures (`Connect`, `Channel`, `Timeout`) are retryable by re-running
/// the same intent; `NonZeroExit` means the command itself ran and failed.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Credentials missing, malformed, or rejected by the server
    #[error("Authentication failed for {user}@{host}: {reason}")]
    Auth {
        host: String,
        user: String,
        reason: String,
    },

    /// TCP connect, handshake, or session-level protocol failure
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    /// Session-level protocol failure after the connection was established
    #[error("SSH channel error on {host}: {reason}")]
    Channel { host: String, reason: String },

    /// The call did not finish within its bound
    #[error("Command timed out after {}s on {host}", .timeout.as_secs())]
    Timeout { host: String, timeout: Duration },

    /// The command ran and exited with a non-zero status
    #[error("Command exited with status {exit_code} on {host}: {}", .stderr.trim())]
    NonZeroExit {
        host: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
}

impl RemoteError {
    pub fn auth(host: impl Into<String>, user: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Auth {
            host: host.into(),
            user: user.into(),
            reason: reason.into(),
        }
    }

    pub fn connect(host: impl Into<String>, port: u16, reason: impl Into<String>) -> Self {
        Self::Connect {
            host: host.into(),
            port,
            reason: reason.into(),
        }
    }

    /// Whether re-invoking the same command may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Channel { .. } | Self::Timeout { .. }
        )
    }

    /// Short machine-readable kind, stored alongside step errors
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth_failure",
            Self::Connect { .. } | Self::Channel { .. } => "connect_failure",
            Self::Timeout { .. } => "timeout",
            Self::NonZeroExit { .. } => "command_failure",
        }
    }

    /// Operator-facing hint for connection checks
    pub fn hint(&self) -> String {
        match self {
            Self::Auth { .. } => {
                "Authentication failed, check the username, password or SSH key".to_string()
            }
            Self::Timeout { .. } => {
                "Connection timed out, check the host address, port and network reachability"
                    .to_string()
            }
            Self::Connect { reason, .. } => {
                let reason_lower = reason.to_lowercase();
                if reason_lower.contains("refused") {
                    "Connection refused, check that the SSH service is running on that port"
                        .to_string()
                } else if reason_lower.contains("no route")
                    || reason_lower.contains("unreachable")
                    || reason_lower.contains("lookup")
                    || reason_lower.contains("resolve")
                {
                    "Host unreachable, check the address and network path".to_string()
                } else if reason_lower.contains("timed out") {
                    "Connection timed out, check the host address, port and network reachability"
                        .to_string()
                } else {
                    format!("SSH connection failed: {}", first_line(reason, 200))
                }
            }
            Self::Channel { reason, .. } => {
                format!("SSH session failed: {}", first_line(reason, 200))
            }
            Self::NonZeroExit { exit_code, .. } => {
                format!("Connected, but the probe command exited with status {}", exit_code)
            }
        }
    }
}

/// First line of a message, capped at `max` characters
fn first_line(message: &str, max: usize) -> String {
    let line = message.lines().next().unwrap_or_default();
    if line.chars().count() > max {
        let truncated: String = line.chars().take(max).collect();
        format!("{}...", truncated)
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(RemoteError::connect("10.0.0.1", 22, "refused").is_retryable());
        assert!(
            RemoteError::Timeout {
                host: "10.0.0.1".to_string(),
                timeout: Duration::from_secs(5)
            }
            .is_retryable()
        );
        assert!(!RemoteError::auth("10.0.0.1", "ops", "denied").is_retryable());
        assert!(
            !RemoteError::NonZeroExit {
                host: "10.0.0.1".to_string(),
                exit_code: 2,
                stdout: String::new(),
                stderr: "boom".to_string(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_hint_for_refused_connection() {
        let err = RemoteError::connect("10.0.0.1", 22, "Connection refused (os error 111)");
        assert!(err.hint().contains("refused"));
    }

    #[test]
    fn test_hint_truncates_long_reason() {
        let reason = "x".repeat(300);
        let err = RemoteError::connect("10.0.0.1", 22, reason);
        assert!(err.hint().ends_with("..."));
        assert!(err.hint().len() < 260);
    }

    #[test]
    fn test_non_zero_exit_message_includes_stderr() {
        let err = RemoteError::NonZeroExit {
            host: "web-1".to_string(),
            exit_code: 127,
            stdout: String::new(),
            stderr: "sh: logstash: not found\n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Command exited with status 127 on web-1: sh: logstash: not found"
        );
        assert_eq!(err.kind(), "command_failure");
    }
}
