//! Virtualization control plane access
//!
//! The control loop only ever reads instance snapshots through [`ControlPlane`];
//! lifecycle changes go through [`crate::provision::Provisioner`].
//!
//! - **openstack**: [`ControlPlane`] backed by the `openstack` CLI
//! - **registry**: clone discovery by naming convention

use std::net::IpAddr;

use async_trait::async_trait;

use crate::Instance;
use crate::error::ControlPlaneError;

pub mod openstack;
pub mod registry;

#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn list_instances(&self) -> Result<Vec<Instance>, ControlPlaneError>;

    async fn find_instance(&self, name: &str) -> Result<Option<Instance>, ControlPlaneError> {
        let mut matching: Vec<_> = self
            .list_instances()
            .await?
            .into_iter()
            .filter(|instance| instance.name == name)
            .collect();

        // names are not unique; a live instance wins over a failed leftover
        let index = matching.iter().position(Instance::is_live).unwrap_or(0);
        Ok((!matching.is_empty()).then(|| matching.swap_remove(index)))
    }

    fn public_address_of(&self, instance: &Instance) -> Option<IpAddr> {
        instance.public_address
    }
}
