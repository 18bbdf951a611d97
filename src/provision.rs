//! Provisioning gateway
//!
//! Creating a clone and retiring an instance are delegated to an external
//! deployment tool. Both calls block until the tool exits; a non-zero exit is
//! reported as [`ProvisionError::Failed`].

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::config::ProvisionConfig;
use crate::error::ProvisionError;

/// Identity new clones are created with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionIdentity {
    pub keypair: String,
    pub pubkey_file: Option<PathBuf>,
}

impl From<&ProvisionConfig> for ProvisionIdentity {
    fn from(config: &ProvisionConfig) -> Self {
        Self {
            keypair: config.keypair.clone(),
            pubkey_file: config.pubkey_file.clone(),
        }
    }
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn create_clone(
        &self,
        clone_name: &str,
        identity: &ProvisionIdentity,
    ) -> Result<(), ProvisionError>;

    /// Delete `instance_name` and, if requested, its snapshots.
    async fn teardown(&self, instance_name: &str, wipe_snapshots: bool)
    -> Result<(), ProvisionError>;
}

/// Runs the deployment script, e.g. `python3 deploy_secure_vm.py`.
#[derive(Debug, Clone)]
pub struct ScriptProvisioner {
    command: Vec<String>,
}

impl ScriptProvisioner {
    pub fn new(config: &ProvisionConfig) -> Self {
        Self {
            command: config.command.clone(),
        }
    }

    fn create_args(clone_name: &str, identity: &ProvisionIdentity) -> Vec<String> {
        let mut args = vec![
            "--name".to_string(),
            clone_name.to_string(),
            "--keypair".to_string(),
            identity.keypair.clone(),
        ];
        if let Some(pubkey) = &identity.pubkey_file {
            args.push("--pubkey-file".to_string());
            args.push(pubkey.to_string_lossy().into_owned());
        }
        args
    }

    fn teardown_args(instance_name: &str, wipe_snapshots: bool) -> Vec<String> {
        let mut args = vec![
            "--cleanup".to_string(),
            instance_name.to_string(),
            "--yes".to_string(),
        ];
        if wipe_snapshots {
            args.push("--wipe-snaps".to_string());
        }
        args
    }

    async fn run(
        &self,
        action: &'static str,
        instance: &str,
        args: Vec<String>,
    ) -> Result<(), ProvisionError> {
        let (program, prefix) = self
            .command
            .split_first()
            .ok_or(ProvisionError::EmptyCommand)?;

        debug!("{action} {instance}: {program} {prefix:?} {args:?}");

        let output = Command::new(program)
            .args(prefix)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(ProvisionError::Launch)?;

        if !output.status.success() {
            return Err(ProvisionError::Failed {
                action,
                instance: instance.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Provisioner for ScriptProvisioner {
    #[instrument(skip(self, identity))]
    async fn create_clone(
        &self,
        clone_name: &str,
        identity: &ProvisionIdentity,
    ) -> Result<(), ProvisionError> {
        self.run("create", clone_name, Self::create_args(clone_name, identity))
            .await?;
        info!("clone {clone_name} provisioned");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn teardown(
        &self,
        instance_name: &str,
        wipe_snapshots: bool,
    ) -> Result<(), ProvisionError> {
        self.run(
            "teardown",
            instance_name,
            Self::teardown_args(instance_name, wipe_snapshots),
        )
        .await?;
        info!("instance {instance_name} torn down");
        Ok(())
    }
}
