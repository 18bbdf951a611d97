use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dialoguer::Select;
use server_autoscaler::{
    Instance,
    cloud::{ControlPlane, openstack::OpenStackCli},
    config::{Config, read_config_file},
    controller::{Autoscaler, Collaborators},
    monitors::sampler::MetricSelector,
    provision::ScriptProvisioner,
    remote::SshExec,
};
use tokio::{signal, sync::watch};
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Watch a VM's load, provision a clone under sustained pressure and hand
/// monitoring over to it once the load drops again.
#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (JSON)
    #[arg(short)]
    file: Option<String>,

    /// Instance to watch; picked interactively when omitted
    #[arg(long)]
    target: Option<String>,

    /// Address of the target, instead of asking the control plane
    #[arg(long)]
    address: Option<IpAddr>,

    #[arg(long)]
    high: Option<f64>,

    #[arg(long)]
    low: Option<f64>,

    #[arg(long)]
    min_up: Option<u32>,

    #[arg(long)]
    min_down: Option<u32>,

    /// Seconds between samples
    #[arg(long)]
    interval: Option<u64>,

    #[arg(long, value_enum)]
    metric: Option<MetricSelector>,

    /// SSH user on the watched instance
    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    ssh_key: Option<PathBuf>,

    /// Keypair new clones are created with
    #[arg(long)]
    keypair: Option<String>,

    #[arg(long)]
    pubkey_file: Option<PathBuf>,

    /// Provisioning tool, e.g. "python3 deploy_secure_vm.py"
    #[arg(long)]
    provision_cmd: Option<String>,

    /// Control plane CLI, e.g. "microstack.openstack"
    #[arg(long)]
    openstack_cmd: Option<String>,

    /// Keep the retired instance's snapshots
    #[arg(long)]
    keep_snapshots: bool,

    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(self, config: &mut Config) {
        let split = |cmd: String| -> Vec<String> {
            cmd.split_whitespace().map(String::from).collect()
        };

        config.target = self.target.or(config.target.take());
        config.address = self.address.or(config.address);

        let thresholds = &mut config.thresholds;
        thresholds.high = self.high.unwrap_or(thresholds.high);
        thresholds.low = self.low.unwrap_or(thresholds.low);
        thresholds.min_up = self.min_up.unwrap_or(thresholds.min_up);
        thresholds.min_down = self.min_down.unwrap_or(thresholds.min_down);

        config.interval = self.interval.unwrap_or(config.interval);
        config.metric = self.metric.unwrap_or(config.metric);

        if let Some(user) = self.user {
            config.ssh.user = user;
        }
        if let Some(key) = self.ssh_key {
            config.ssh.key = key;
        }

        if let Some(keypair) = self.keypair {
            config.provision.keypair = keypair;
        }
        if let Some(pubkey_file) = self.pubkey_file {
            config.provision.pubkey_file = Some(pubkey_file);
        }
        if let Some(cmd) = self.provision_cmd {
            config.provision.command = split(cmd);
        }
        if self.keep_snapshots {
            config.provision.wipe_snapshots = false;
        }

        if let Some(cmd) = self.openstack_cmd {
            config.control_plane.command = split(cmd);
        }
    }
}

fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };
    let filter = filter::Targets::new().with_targets(vec![
        ("server_autoscaler", level),
        ("autoscale_watch", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let mut config = match &args.file {
        Some(file) => read_config_file(file)?,
        None => Config::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("cannot listen for interrupts: {e}");
            std::future::pending::<()>().await;
        }
        info!("interrupt received, stopping after the current cycle");
        let _ = shutdown_tx.send(true);
    });

    let plane = Arc::new(OpenStackCli::new(&config.control_plane));

    let target = match config.target.clone() {
        Some(target) => target,
        None => match pick_target(plane.as_ref()).await? {
            Some(target) => target,
            None => {
                info!("[exit] stopped by user");
                return Ok(());
            }
        },
    };

    let collaborators = Collaborators {
        plane,
        provisioner: Arc::new(ScriptProvisioner::new(&config.provision)),
        exec: Arc::new(SshExec::new()),
    };

    let autoscaler = Autoscaler::start(&config, &target, collaborators)
        .await
        .with_context(|| format!("cannot start monitoring {target}"))?;

    autoscaler.run(shutdown_rx).await?;

    Ok(())
}

/// Let the user choose among the live instances. `None` if the prompt was
/// interrupted.
async fn pick_target(plane: &dyn ControlPlane) -> anyhow::Result<Option<String>> {
    let instances: Vec<Instance> = plane
        .list_instances()
        .await
        .context("cannot list instances")?
        .into_iter()
        .filter(Instance::is_live)
        .collect();

    if instances.is_empty() {
        anyhow::bail!("no live instances to watch");
    }

    let labels: Vec<String> = instances
        .iter()
        .map(|instance| match instance.public_address {
            Some(address) => format!("{} ({}, {address})", instance.name, instance.status),
            None => format!("{} ({}, no public address)", instance.name, instance.status),
        })
        .collect();

    let selection = tokio::task::spawn_blocking(move || {
        Select::new()
            .with_prompt("Instance to watch")
            .items(&labels)
            .default(0)
            .interact()
    })
    .await?;

    Ok(chosen_index(selection)?.map(|index| instances[index].name.clone()))
}

/// Ctrl-C at the prompt is a regular way out, not a failure.
fn chosen_index(selection: dialoguer::Result<usize>) -> anyhow::Result<Option<usize>> {
    match selection {
        Ok(index) => Ok(Some(index)),
        Err(dialoguer::Error::IO(e)) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
        Err(e) => Err(e.into()),
    }
}
