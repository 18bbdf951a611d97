//! Remote command execution on the monitored instance

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{instrument, trace};

use crate::config::SshConfig;
use crate::error::RemoteExecError;
use crate::util::expand_home;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub key: PathBuf,
    pub port: u16,
}

impl From<&SshConfig> for Credentials {
    fn from(config: &SshConfig) -> Self {
        Self {
            user: config.user.clone(),
            key: expand_home(&config.key),
            port: config.port,
        }
    }
}

#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Run `command` on `address` and return its stdout.
    async fn exec(
        &self,
        address: IpAddr,
        command: &str,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<String, RemoteExecError>;
}

/// Executes commands through the system `ssh` client.
#[derive(Debug, Clone)]
pub struct SshExec {
    program: String,
}

impl Default for SshExec {
    fn default() -> Self {
        Self {
            program: String::from("ssh"),
        }
    }
}

impl SshExec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different client binary, e.g. a wrapper script.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(
        &self,
        address: IpAddr,
        command: &str,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-i")
            .arg(&credentials.key)
            .arg("-p")
            .arg(credentials.port.to_string())
            .args(["-o", "BatchMode=yes", "-o", "StrictHostKeyChecking=no"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", timeout.as_secs().max(1)))
            .arg(format!("{}@{address}", credentials.user))
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RemoteExec for SshExec {
    #[instrument(skip(self, command, credentials))]
    async fn exec(
        &self,
        address: IpAddr,
        command: &str,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<String, RemoteExecError> {
        trace!("{address}: running `{command}`");

        let output = tokio::time::timeout(
            timeout,
            self.command(address, command, credentials, timeout).output(),
        )
        .await
        .map_err(|_| RemoteExecError::Timeout { address, timeout })?
        .map_err(RemoteExecError::Spawn)?;

        if !output.status.success() {
            return Err(RemoteExecError::ExitStatus {
                address,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
