use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::trace;

use crate::error::ConfigError;
use crate::monitors::{hysteresis::Thresholds, sampler::MetricSelector};

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Instance to watch. Picked interactively when absent.
    pub target: Option<String>,

    /// Address of the initial target, skipping inference from the control plane
    pub address: Option<IpAddr>,

    #[serde(default)]
    pub thresholds: Thresholds,

    /// Seconds between two samples
    #[serde(default = "default_interval")]
    pub interval: u64,

    #[serde(default)]
    pub metric: MetricSelector,

    #[serde(default)]
    pub ssh: SshConfig,

    #[serde(default)]
    pub provision: ProvisionConfig,

    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: None,
            address: None,
            thresholds: Thresholds::default(),
            interval: default_interval(),
            metric: MetricSelector::default(),
            ssh: SshConfig::default(),
            provision: ProvisionConfig::default(),
            control_plane: ControlPlaneConfig::default(),
        }
    }
}

impl Config {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let Thresholds {
            high,
            low,
            min_up,
            min_down,
        } = self.thresholds;

        for (name, value) in [("high", high), ("low", low)] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::ThresholdRange { name, value });
            }
        }

        if high <= low {
            return Err(ConfigError::ThresholdOrder { high, low });
        }

        if min_up == 0 {
            return Err(ConfigError::ZeroRunLength("min_up"));
        }

        if min_down == 0 {
            return Err(ConfigError::ZeroRunLength("min_down"));
        }

        if self.interval == 0 {
            return Err(ConfigError::ZeroInterval);
        }

        // the two cpu snapshots must be apart for the busy share to mean anything
        if self.ssh.cpu_window_ms == 0 {
            return Err(ConfigError::ZeroSshSetting("cpu_window_ms"));
        }

        if self.ssh.timeout == 0 {
            return Err(ConfigError::ZeroSshSetting("timeout"));
        }

        if self.provision.command.is_empty() {
            return Err(ConfigError::EmptyCommand("provision"));
        }

        if self.control_plane.command.is_empty() {
            return Err(ConfigError::EmptyCommand("control plane"));
        }

        Ok(())
    }
}

/// Remote execution settings used to probe the monitored instance
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_ssh_user")]
    pub user: String,

    #[serde(default = "crate::util::get_default_ssh_key")]
    pub key: PathBuf,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Seconds before a single remote command is abandoned
    #[serde(default = "default_ssh_timeout")]
    pub timeout: u64,

    /// Milliseconds between the two CPU counter snapshots
    #[serde(default = "default_cpu_window")]
    pub cpu_window_ms: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            key: crate::util::get_default_ssh_key(),
            port: default_ssh_port(),
            timeout: default_ssh_timeout(),
            cpu_window_ms: default_cpu_window(),
        }
    }
}

/// External provisioning tool and the identity clones are created with
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProvisionConfig {
    /// Program and leading arguments, e.g. `["python3", "deploy_secure_vm.py"]`
    #[serde(default = "default_provision_command")]
    pub command: Vec<String>,

    #[serde(default = "crate::util::get_keypair")]
    pub keypair: String,

    #[serde(default = "crate::util::get_pubkey_file")]
    pub pubkey_file: Option<PathBuf>,

    /// Remove the retired instance's snapshots on handover
    #[serde(default = "default_wipe_snapshots")]
    pub wipe_snapshots: bool,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            command: default_provision_command(),
            keypair: crate::util::get_keypair(),
            pubkey_file: crate::util::get_pubkey_file(),
            wipe_snapshots: default_wipe_snapshots(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ControlPlaneConfig {
    /// CLI prefix, e.g. `["microstack.openstack"]`
    #[serde(default = "default_control_plane_command")]
    pub command: Vec<String>,

    /// Network whose address is considered publicly reachable
    #[serde(default = "default_public_network")]
    pub public_network: Option<String>,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            command: default_control_plane_command(),
            public_network: default_public_network(),
        }
    }
}

fn default_interval() -> u64 {
    15
}

fn default_ssh_user() -> String {
    String::from("ubuntu")
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_timeout() -> u64 {
    10
}

fn default_cpu_window() -> u64 {
    1000
}

fn default_provision_command() -> Vec<String> {
    vec![String::from("deploy_secure_vm")]
}

fn default_wipe_snapshots() -> bool {
    true
}

fn default_control_plane_command() -> Vec<String> {
    vec![String::from("openstack")]
}

fn default_public_network() -> Option<String> {
    Some(String::from("external"))
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
