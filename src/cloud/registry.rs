//! Clone discovery
//!
//! Clones of a base instance `B` are named `B_clone` or `B_clone_<n>`. The
//! numeric suffix is whatever the provisioning tool chose to avoid a name
//! collision; it is parsed here, never generated.

use regex::Regex;
use tracing::{error, instrument, trace};

use crate::error::ControlPlaneError;
use crate::{Instance, InstanceStatus};

use super::ControlPlane;

const CLONE_MARKER: &str = "_clone";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneDescriptor {
    pub name: String,
    /// `None` for the unsuffixed primary clone
    pub suffix: Option<u32>,
    pub status: InstanceStatus,
}

/// Name requested when a new clone of `base` is provisioned.
pub fn primary_clone_name(base: &str) -> String {
    format!("{base}{CLONE_MARKER}")
}

/// `Some(None)` for the primary clone, `Some(Some(n))` for a numbered one and
/// `None` if `name` is not a clone of `base` at all.
pub fn parse_clone_suffix(base: &str, name: &str) -> Option<Option<u32>> {
    let pattern = format!(
        r"^{}{CLONE_MARKER}(?:_([1-9][0-9]*))?$",
        regex::escape(base)
    );

    let regex = match Regex::new(&pattern) {
        Ok(regex) => regex,
        Err(e) => {
            error!("invalid clone name pattern for '{base}': {e}");
            return None;
        }
    };

    let captures = regex.captures(name)?;
    match captures.get(1) {
        None => Some(None),
        // suffixes beyond u32 are not something the tooling produces
        Some(suffix) => suffix.as_str().parse().ok().map(Some),
    }
}

/// Live clones of `base` among `instances`, primary first, then by suffix.
pub fn clones_of(base: &str, instances: &[Instance]) -> Vec<CloneDescriptor> {
    let mut clones: Vec<_> = instances
        .iter()
        .filter(|instance| instance.is_live())
        .filter_map(|instance| {
            let suffix = parse_clone_suffix(base, &instance.name)?;
            Some(CloneDescriptor {
                name: instance.name.clone(),
                suffix,
                status: instance.status.clone(),
            })
        })
        .collect();

    clones.sort_by_key(|clone| clone.suffix);
    clones
}

#[instrument(skip(plane))]
pub async fn list_clones(
    plane: &dyn ControlPlane,
    base: &str,
) -> Result<Vec<CloneDescriptor>, ControlPlaneError> {
    let instances = plane.list_instances().await?;
    let clones = clones_of(base, &instances);
    trace!(
        "clones of {base}: {:?}",
        clones.iter().map(|c| c.name.as_str()).collect::<Vec<_>>()
    );
    Ok(clones)
}

/// The highest-ordered live clone takes over monitoring.
pub fn pick_handover_target(clones: &[CloneDescriptor]) -> Option<&CloneDescriptor> {
    clones.iter().rev().find(|clone| clone.status.is_live())
}
