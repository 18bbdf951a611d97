//! [`ControlPlane`] backed by the `openstack` command line client
//!
//! Instances are listed with `server list -f json`. Depending on the client
//! version the `Networks` column is either a string
//! (`lab-net=192.168.100.5, 10.20.20.7; external=10.20.20.9`) or an object
//! mapping network names to address lists; both are understood.

use std::net::IpAddr;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, instrument, trace};

use crate::config::ControlPlaneConfig;
use crate::error::ControlPlaneError;
use crate::{Instance, InstanceStatus};

use super::ControlPlane;

/// Addresses attached to one network, in the order the control plane lists them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAddresses {
    pub network: String,
    pub addresses: Vec<IpAddr>,
}

#[derive(Debug, Deserialize)]
struct ServerRow {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "Networks", default)]
    networks: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct OpenStackCli {
    command: Vec<String>,
    public_network: Option<String>,
}

impl OpenStackCli {
    pub fn new(config: &ControlPlaneConfig) -> Self {
        Self {
            command: config.command.clone(),
            public_network: config.public_network.clone(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>, ControlPlaneError> {
        let (program, prefix) = self
            .command
            .split_first()
            .ok_or(ControlPlaneError::EmptyCommand)?;

        trace!("running {program} {prefix:?} {args:?}");

        let output = Command::new(program)
            .args(prefix)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(ControlPlaneError::Launch)?;

        if !output.status.success() {
            return Err(ControlPlaneError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }

    /// Turn the JSON emitted by `server list -f json` into instances.
    pub fn parse_server_list(&self, raw: &[u8]) -> Result<Vec<Instance>, ControlPlaneError> {
        let rows: Vec<ServerRow> =
            serde_json::from_slice(raw).map_err(|e| ControlPlaneError::Decode(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let networks = parse_networks(&row.networks);
                Instance {
                    public_address: select_public_address(
                        &networks,
                        self.public_network.as_deref(),
                    ),
                    id: row.id,
                    name: row.name,
                    status: InstanceStatus::parse(&row.status),
                }
            })
            .collect())
    }
}

#[async_trait]
impl ControlPlane for OpenStackCli {
    #[instrument(skip_all)]
    async fn list_instances(&self) -> Result<Vec<Instance>, ControlPlaneError> {
        let raw = self.run(&["server", "list", "-f", "json"]).await?;
        let instances = self.parse_server_list(&raw)?;
        debug!("control plane reports {} instances", instances.len());
        Ok(instances)
    }
}

pub fn parse_networks(value: &serde_json::Value) -> Vec<NetworkAddresses> {
    match value {
        serde_json::Value::String(raw) => raw
            .split(';')
            .filter_map(|entry| {
                let (network, addresses) = entry.split_once('=')?;
                Some(NetworkAddresses {
                    network: network.trim().to_string(),
                    addresses: addresses
                        .split(',')
                        .filter_map(|addr| addr.trim().parse().ok())
                        .collect(),
                })
            })
            .collect(),
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(network, addresses)| NetworkAddresses {
                network: network.clone(),
                addresses: match addresses {
                    serde_json::Value::Array(list) => list
                        .iter()
                        .filter_map(|addr| addr.as_str()?.trim().parse().ok())
                        .collect(),
                    serde_json::Value::String(addr) => {
                        addr.trim().parse().into_iter().collect()
                    }
                    _ => vec![],
                },
            })
            .collect(),
        _ => vec![],
    }
}

/// Prefer an address on the public network; otherwise a floating IP, which
/// the control plane lists after the fixed address of the same port.
pub fn select_public_address(
    networks: &[NetworkAddresses],
    public_network: Option<&str>,
) -> Option<IpAddr> {
    if let Some(public) = public_network
        && let Some(addr) = networks
            .iter()
            .find(|n| n.network == public)
            .and_then(|n| n.addresses.first())
    {
        return Some(*addr);
    }

    networks
        .iter()
        .find(|n| n.addresses.len() > 1)
        .and_then(|n| n.addresses.last())
        .copied()
}
