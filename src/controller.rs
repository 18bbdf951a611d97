//! Autoscaling control loop
//!
//! ```text
//!            ┌──────────── sleep(interval) ◄───────────┐
//!            ▼                                          │
//!   sample target ──► evaluate ──► Hold ────────────────┤
//!                         │                             │
//!                         ├─► ScaleUp ──► no clone? create `<target>_clone`
//!                         │                             │
//!                         └─► ScaleDown ─► clone? teardown target,
//!                                          re-target onto last clone
//! ```
//!
//! The loop owns the only mutable state, the current [`MonitoringTarget`].
//! A handover replaces it as a whole, counters included.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::cloud::{
    ControlPlane,
    registry::{list_clones, pick_handover_target, primary_clone_name},
};
use crate::config::Config;
use crate::error::FatalError;
use crate::monitors::{
    hysteresis::{Decision, ThresholdCounters, Thresholds},
    sampler::{MetricSampler, MetricSelector},
};
use crate::provision::{ProvisionIdentity, Provisioner};
use crate::remote::RemoteExec;

#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringTarget {
    pub name: String,
    pub address: IpAddr,
    pub counters: ThresholdCounters,
    /// When monitoring of this instance started
    pub since: DateTime<Utc>,
}

impl MonitoringTarget {
    pub fn new(name: impl Into<String>, address: IpAddr) -> Self {
        Self {
            name: name.into(),
            address,
            counters: ThresholdCounters::default(),
            since: Utc::now(),
        }
    }
}

/// What a single iteration of the loop did
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The sample failed; counters were left untouched
    SampleSkipped,
    Held { value: f64 },
    CloneRequested { clone: String },
    /// Scale-up fired but a live clone already exists
    CloneAlreadyPresent { clone: String },
    HandedOver { from: String, to: String },
    /// Scale-down fired without a clone to hand over to
    LastInstanceKept,
    /// A provisioning or control plane call failed; the target is unchanged
    ActionFailed,
}

/// External systems the loop talks to
#[derive(Clone)]
pub struct Collaborators {
    pub plane: Arc<dyn ControlPlane>,
    pub provisioner: Arc<dyn Provisioner>,
    pub exec: Arc<dyn RemoteExec>,
}

/// Look up `name` and the address it is sampled through.
///
/// `address` overrides whatever the control plane reports, but the instance
/// itself must still exist.
#[instrument(skip(plane))]
pub async fn resolve_target(
    plane: &dyn ControlPlane,
    name: &str,
    address: Option<IpAddr>,
) -> Result<MonitoringTarget, FatalError> {
    let instance = plane
        .find_instance(name)
        .await?
        .ok_or_else(|| FatalError::TargetNotFound(name.to_string()))?;

    if !instance.is_live() {
        return Err(FatalError::TargetNotLive {
            name: instance.name,
            status: instance.status.to_string(),
        });
    }

    let address = address
        .or_else(|| plane.public_address_of(&instance))
        .ok_or_else(|| FatalError::NoPublicAddress(instance.name.clone()))?;

    debug!("resolved {name} to {address}");
    Ok(MonitoringTarget::new(instance.name, address))
}

pub struct Autoscaler {
    plane: Arc<dyn ControlPlane>,
    provisioner: Arc<dyn Provisioner>,
    sampler: MetricSampler,
    thresholds: Thresholds,
    metric: MetricSelector,
    identity: ProvisionIdentity,
    wipe_snapshots: bool,
    interval: Duration,
    target: MonitoringTarget,
}

impl std::fmt::Debug for Autoscaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Autoscaler")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl Autoscaler {
    /// Resolve the initial target. Failing here is fatal, nothing is retried.
    pub async fn start(
        config: &Config,
        target: &str,
        collaborators: Collaborators,
    ) -> Result<Autoscaler, FatalError> {
        let Collaborators {
            plane,
            provisioner,
            exec,
        } = collaborators;

        let target = resolve_target(plane.as_ref(), target, config.address).await?;

        Ok(Self {
            sampler: MetricSampler::new(exec, &config.ssh),
            thresholds: config.thresholds,
            metric: config.metric,
            identity: ProvisionIdentity::from(&config.provision),
            wipe_snapshots: config.provision.wipe_snapshots,
            interval: config.interval(),
            plane,
            provisioner,
            target,
        })
    }

    pub fn target(&self) -> &MonitoringTarget {
        &self.target
    }

    /// Sample, decide and act once.
    #[instrument(skip(self), fields(target = %self.target.name))]
    pub async fn step(&mut self) -> Result<StepOutcome, FatalError> {
        let sample = match self.sampler.sample(self.target.address).await {
            Ok(sample) => sample,
            Err(e) => {
                warn!("{}: {e}, skipping cycle", self.target.name);
                return Ok(StepOutcome::SampleSkipped);
            }
        };

        let value = sample.select(self.metric);
        let decision = self.thresholds.evaluate(&mut self.target.counters, value);

        let ThresholdCounters {
            consecutive_high,
            consecutive_low,
        } = self.target.counters;
        info!(
            "[metric] {} cpu={:.1}% mem={:.1}% {:?}={value:.1}% (up={consecutive_high}/{}, down={consecutive_low}/{})",
            self.target.name,
            sample.cpu,
            sample.mem,
            self.metric,
            self.thresholds.min_up,
            self.thresholds.min_down
        );

        match decision {
            Decision::Hold => Ok(StepOutcome::Held { value }),
            Decision::ScaleUp => Ok(self.scale_up().await),
            Decision::ScaleDown => self.scale_down().await,
        }
    }

    async fn scale_up(&mut self) -> StepOutcome {
        let base = self.target.name.clone();

        let clones = match list_clones(self.plane.as_ref(), &base).await {
            Ok(clones) => clones,
            Err(e) => {
                error!("[action] cannot list clones of {base}: {e}");
                return StepOutcome::ActionFailed;
            }
        };

        if let Some(existing) = clones.first() {
            info!("[action] HIGH sustained, clone {} already exists", existing.name);
            return StepOutcome::CloneAlreadyPresent {
                clone: existing.name.clone(),
            };
        }

        let clone = primary_clone_name(&base);
        info!("[action] HIGH sustained, creating clone {clone}");

        match self.provisioner.create_clone(&clone, &self.identity).await {
            Ok(()) => StepOutcome::CloneRequested { clone },
            Err(e) => {
                error!("[action] clone creation failed: {e}");
                StepOutcome::ActionFailed
            }
        }
    }

    async fn scale_down(&mut self) -> Result<StepOutcome, FatalError> {
        let base = self.target.name.clone();

        let clones = match list_clones(self.plane.as_ref(), &base).await {
            Ok(clones) => clones,
            Err(e) => {
                error!("[action] cannot list clones of {base}: {e}");
                return Ok(StepOutcome::ActionFailed);
            }
        };

        let Some(successor) = pick_handover_target(&clones).map(|c| c.name.clone()) else {
            info!("[action] LOW sustained, but {base} is the last live instance");
            return Ok(StepOutcome::LastInstanceKept);
        };

        info!("[action] LOW sustained, deleting {base} (handover to {successor})");

        if let Err(e) = self
            .provisioner
            .teardown(&base, self.wipe_snapshots)
            .await
        {
            error!("[action] teardown of {base} failed: {e}");
            return Ok(StepOutcome::ActionFailed);
        }

        let next = resolve_target(self.plane.as_ref(), &successor, None)
            .await
            .map_err(|e| FatalError::HandoverUnresolved {
                to: successor.clone(),
                reason: e.to_string(),
            })?;

        let previous = std::mem::replace(&mut self.target, next);
        info!(
            "[handover] now monitoring {}@{} (after {} since {})",
            self.target.name,
            self.target.address,
            previous.name,
            previous.since.to_rfc3339()
        );

        Ok(StepOutcome::HandedOver {
            from: previous.name,
            to: successor,
        })
    }

    /// Run until `shutdown` flips or a fatal condition occurs.
    ///
    /// Shutdown is only observed between iterations, never mid-sample.
    #[instrument(skip_all)]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), FatalError> {
        info!(
            "[watch] target={}@{}, high={}%, low={}%, metric={:?}, interval={}s",
            self.target.name,
            self.target.address,
            self.thresholds.high,
            self.thresholds.low,
            self.metric,
            self.interval.as_secs()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.step().await?;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    break;
                }
            }
        }

        info!("[exit] stopped by user");
        Ok(())
    }
}
