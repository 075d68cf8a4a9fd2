//! SSH implementation of the remote executor
//!
//! Each call opens its own session, authenticates, runs exactly one command on
//! an exec channel and disconnects. Nothing is pooled between calls.

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{RemoteError, Result};
use crate::executor::{CommandOutput, RemoteExecutor};
use crate::target::{AuthMethod, ResolvedTarget};

/// SSH client settings
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Bound on TCP connect plus key exchange
    pub connect_timeout: Duration,
    /// Session is dropped after this long without traffic
    pub inactivity_timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            inactivity_timeout: Duration::from_secs(600),
        }
    }
}

/// Remote executor over SSH
#[derive(Debug, Clone, Default)]
pub struct SshExecutor {
    config: SshConfig,
}

impl SshExecutor {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    async fn run(
        &self,
        target: &ResolvedTarget,
        command: &str,
        input: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        debug!(host = %target.host, "Executing SSH command: {}", command);

        let output = match tokio::time::timeout(timeout, self.run_session(target, command, input))
            .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(host = %target.host, "SSH command timed out after {:?}", timeout);
                return Err(RemoteError::Timeout {
                    host: target.host.clone(),
                    timeout,
                });
            }
        };

        if output.exit_code != 0 {
            debug!(
                host = %target.host,
                "Command failed: exit_code={} stderr='{}'",
                output.exit_code,
                output.stderr.trim()
            );
            return Err(RemoteError::NonZeroExit {
                host: target.host.clone(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        Ok(output)
    }

    async fn run_session(
        &self,
        target: &ResolvedTarget,
        command: &str,
        input: Option<&[u8]>,
    ) -> Result<CommandOutput> {
        let mut session = self.connect(target).await?;
        authenticate(&mut session, target).await?;

        let result = exec(&session, target, command, input).await;

        if let Err(e) = session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!(host = %target.host, "Error while disconnecting: {}", e);
        }

        result
    }

    async fn connect(&self, target: &ResolvedTarget) -> Result<Handle<AcceptHostKey>> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(self.config.inactivity_timeout),
            ..Default::default()
        });

        let connect = client::connect(config, (target.host.as_str(), target.port), AcceptHostKey);

        match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(session)) => Ok(session),
            Ok(Err(e)) => Err(RemoteError::connect(&target.host, target.port, e.to_string())),
            Err(_) => Err(RemoteError::connect(
                &target.host,
                target.port,
                format!(
                    "connection timed out after {}s",
                    self.config.connect_timeout.as_secs()
                ),
            )),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(
        &self,
        target: &ResolvedTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        self.run(target, command, None, timeout).await
    }

    async fn execute_with_input(
        &self,
        target: &ResolvedTarget,
        command: &str,
        input: &[u8],
        timeout: Duration,
    ) -> Result<CommandOutput> {
        self.run(target, command, Some(input), timeout).await
    }
}

async fn authenticate(session: &mut Handle<AcceptHostKey>, target: &ResolvedTarget) -> Result<()> {
    let accepted = match &target.auth {
        AuthMethod::Key(pair) => {
            session
                .authenticate_publickey(&target.username, Arc::clone(pair))
                .await
        }
        AuthMethod::Password(password) => {
            session
                .authenticate_password(&target.username, password)
                .await
        }
    }
    .map_err(|e| RemoteError::auth(&target.host, &target.username, e.to_string()))?;

    if !accepted {
        let method = if target.uses_key() { "public key" } else { "password" };
        return Err(RemoteError::auth(
            &target.host,
            &target.username,
            format!("{} authentication rejected by server", method),
        ));
    }

    Ok(())
}

async fn exec(
    session: &Handle<AcceptHostKey>,
    target: &ResolvedTarget,
    command: &str,
    input: Option<&[u8]>,
) -> Result<CommandOutput> {
    let protocol_error = |e: russh::Error| RemoteError::Channel {
        host: target.host.clone(),
        reason: e.to_string(),
    };

    let mut channel = session
        .channel_open_session()
        .await
        .map_err(protocol_error)?;

    channel.exec(true, command).await.map_err(protocol_error)?;

    if let Some(input) = input {
        channel.data(input).await.map_err(protocol_error)?;
        channel.eof().await.map_err(protocol_error)?;
    }

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_code = None;

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
            // Extended data type 1 is stderr
            ChannelMsg::ExtendedData { data, ext } if ext == 1 => {
                stderr.extend_from_slice(&data)
            }
            ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status as i32),
            ChannelMsg::ExitSignal { .. } => exit_code = Some(-1),
            _ => {}
        }
    }

    let exit_code = exit_code.ok_or_else(|| RemoteError::Channel {
        host: target.host.clone(),
        reason: "channel closed without an exit status".to_string(),
    })?;

    Ok(CommandOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

/// Client handler accepting any host key
///
/// Fleet hosts are registered by operators out of band.
struct AcceptHostKey;

#[async_trait]
impl client::Handler for AcceptHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::MachineTarget;

    #[test]
    fn test_default_config() {
        let config = SshConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.inactivity_timeout, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_connect_failure() {
        let executor = SshExecutor::new(SshConfig {
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        });
        // Port 1 on loopback is closed on any sane test host
        let mut target = MachineTarget::with_password(1, "127.0.0.1", "ops", "secret");
        target.port = 1;
        let resolved = target.resolve().unwrap();

        let err = executor
            .execute(&resolved, "echo ok", Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, RemoteError::Connect { .. }));
        assert!(err.is_retryable());
    }
}
