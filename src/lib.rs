pub mod cloud;
pub mod config;
pub mod controller;
pub mod error;
pub mod monitors;
pub mod provision;
pub mod remote;
pub mod util;

use std::{fmt, net::IpAddr};

use serde::{Deserialize, Serialize};

/// Snapshot of a virtual machine as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub status: InstanceStatus,
    pub public_address: Option<IpAddr>,
}

impl Instance {
    /// Whether the instance still counts as existing (not failed, not gone).
    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Active,
    Error,
    Deleted,
    /// Any transitional or stopped state (`BUILD`, `SHUTOFF`, ...).
    Other(String),
}

impl InstanceStatus {
    pub fn parse(raw: &str) -> InstanceStatus {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => InstanceStatus::Active,
            "ERROR" => InstanceStatus::Error,
            "DELETED" | "SOFT_DELETED" => InstanceStatus::Deleted,
            other => InstanceStatus::Other(other.to_string()),
        }
    }

    pub fn is_live(&self) -> bool {
        !matches!(self, InstanceStatus::Error | InstanceStatus::Deleted)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Active => write!(f, "ACTIVE"),
            InstanceStatus::Error => write!(f, "ERROR"),
            InstanceStatus::Deleted => write!(f, "DELETED"),
            InstanceStatus::Other(raw) => write!(f, "{raw}"),
        }
    }
}
