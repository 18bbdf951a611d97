//! Error types for the autoscaling control loop
//!
//! The variants are grouped by how the control loop reacts to them:
//!
//! - [`SampleError`]: transient, the current cycle is skipped
//! - [`ProvisionError`] / [`ControlPlaneError`]: the action failed, monitoring continues
//! - [`FatalError`]: the loop cannot continue and the process exits non-zero

use std::{net::IpAddr, time::Duration};

use thiserror::Error;

/// Failure of the remote command channel
#[derive(Debug, Error)]
pub enum RemoteExecError {
    #[error("failed to spawn remote command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("remote command on {address} timed out after {timeout:?}")]
    Timeout { address: IpAddr, timeout: Duration },

    #[error("remote command on {address} exited with {status}: {stderr}")]
    ExitStatus {
        address: IpAddr,
        status: String,
        stderr: String,
    },
}

/// A metric sample could not be taken. Never treated as a 0% reading.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("sample failed: {0}")]
    Remote(#[from] RemoteExecError),

    #[error("sample failed: unparsable probe output ({0})")]
    Parse(String),
}

/// The external provisioning tool reported a failure
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to launch provisioning tool: {0}")]
    Launch(#[source] std::io::Error),

    #[error("provisioning command `{action}` for {instance} exited with {status}: {stderr}")]
    Failed {
        action: &'static str,
        instance: String,
        status: String,
        stderr: String,
    },

    #[error("provisioning command line is empty")]
    EmptyCommand,
}

/// The virtualization control plane could not be queried
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("failed to launch control plane CLI: {0}")]
    Launch(#[source] std::io::Error),

    #[error("control plane CLI exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("unexpected control plane output: {0}")]
    Decode(String),

    #[error("control plane command line is empty")]
    EmptyCommand,
}

/// Conditions the control loop cannot recover from
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("instance `{0}` not found")]
    TargetNotFound(String),

    #[error("instance `{name}` is not usable (status {status})")]
    TargetNotLive { name: String, status: String },

    #[error("instance `{0}` has no reachable public address")]
    NoPublicAddress(String),

    #[error("handover to `{to}` failed: {reason}")]
    HandoverUnresolved { to: String, reason: String },

    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),
}

/// Invalid configuration, detected before the loop starts
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("high threshold ({high}) must be greater than low threshold ({low})")]
    ThresholdOrder { high: f64, low: f64 },

    #[error("threshold {name} ({value}) must be within 0..=100")]
    ThresholdRange { name: &'static str, value: f64 },

    #[error("{0} must be a positive integer")]
    ZeroRunLength(&'static str),

    #[error("sampling interval must be at least one second")]
    ZeroInterval,

    #[error("ssh {0} must be greater than zero")]
    ZeroSshSetting(&'static str),

    #[error("{0} command line must not be empty")]
    EmptyCommand(&'static str),
}
