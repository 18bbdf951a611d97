//! Metric sampling over the remote execution channel
//!
//! CPU load needs two snapshots of the cumulative `/proc/stat` counters, so a
//! sample costs two round-trips separated by `cpu_window`. Memory is read from
//! the second snapshot.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{instrument, trace};

use crate::config::SshConfig;
use crate::error::SampleError;
use crate::remote::{Credentials, RemoteExec};

/// Prints the aggregate cpu line followed by the memory counters.
pub const PROBE_COMMAND: &str =
    "LANG=C head -n1 /proc/stat && grep -E '^(MemTotal|MemAvailable|MemFree|Buffers|Cached):' /proc/meminfo";

/// Which value the decision engine is fed with
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum MetricSelector {
    Cpu,
    Mem,
    #[default]
    Max,
    Avg,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// CPU busy percentage over the sampling window
    pub cpu: f64,
    /// Memory in use, percent of total
    pub mem: f64,
}

impl Sample {
    pub fn select(&self, selector: MetricSelector) -> f64 {
        match selector {
            MetricSelector::Cpu => self.cpu,
            MetricSelector::Mem => self.mem,
            MetricSelector::Max => self.cpu.max(self.mem),
            MetricSelector::Avg => (self.cpu + self.mem) / 2.0,
        }
    }
}

/// Cumulative jiffies from the aggregate `cpu` line of `/proc/stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub total: u64,
    pub idle: u64,
}

impl CpuTimes {
    pub fn parse(line: &str) -> Result<CpuTimes, SampleError> {
        let mut fields = line.split_whitespace();
        if fields.next() != Some("cpu") {
            return Err(SampleError::Parse(format!("not a cpu line: {line:?}")));
        }

        // user nice system idle iowait irq softirq steal; guest time is already part of user
        let values = fields
            .take(8)
            .map(|f| f.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SampleError::Parse(format!("cpu counter: {e}")))?;

        if values.len() < 4 {
            return Err(SampleError::Parse(format!(
                "expected at least 4 cpu counters, got {}",
                values.len()
            )));
        }

        let idle = values[3] + values.get(4).copied().unwrap_or_default();
        Ok(CpuTimes {
            total: values.iter().sum(),
            idle,
        })
    }
}

/// Memory counters in kB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemInfo {
    pub total: u64,
    pub available: u64,
}

impl MemInfo {
    /// Kernels without `MemAvailable` fall back to free + buffers + cached.
    pub fn parse<'a>(lines: impl IntoIterator<Item = &'a str>) -> Result<MemInfo, SampleError> {
        let mut total = None;
        let mut available = None;
        let mut fallback = 0;

        for line in lines {
            let Some((key, rest)) = line.split_once(':') else {
                continue;
            };
            let Some(value) = rest.split_whitespace().next() else {
                continue;
            };
            let value = value
                .parse::<u64>()
                .map_err(|e| SampleError::Parse(format!("{key}: {e}")))?;

            match key.trim() {
                "MemTotal" => total = Some(value),
                "MemAvailable" => available = Some(value),
                "MemFree" | "Buffers" | "Cached" => fallback += value,
                _ => {}
            }
        }

        let total = total.ok_or_else(|| SampleError::Parse("missing MemTotal".to_string()))?;
        if total == 0 {
            return Err(SampleError::Parse("MemTotal is zero".to_string()));
        }

        Ok(MemInfo {
            total,
            available: available.unwrap_or(fallback),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutput {
    pub cpu: CpuTimes,
    pub mem: MemInfo,
}

impl ProbeOutput {
    pub fn parse(output: &str) -> Result<ProbeOutput, SampleError> {
        let mut lines = output.lines().filter(|l| !l.trim().is_empty());
        let cpu_line = lines
            .next()
            .ok_or_else(|| SampleError::Parse("empty probe output".to_string()))?;

        Ok(ProbeOutput {
            cpu: CpuTimes::parse(cpu_line)?,
            mem: MemInfo::parse(lines)?,
        })
    }
}

/// Busy share between two snapshots; 0 when the counters did not advance.
pub fn cpu_busy_percent(before: CpuTimes, after: CpuTimes) -> f64 {
    let total = after.total as f64 - before.total as f64;
    if total <= 0.0 {
        return 0.0;
    }

    let idle = after.idle as f64 - before.idle as f64;
    ((1.0 - idle / total) * 100.0).clamp(0.0, 100.0)
}

pub fn mem_used_percent(mem: MemInfo) -> f64 {
    ((1.0 - mem.available as f64 / mem.total as f64) * 100.0).clamp(0.0, 100.0)
}

#[derive(Clone)]
pub struct MetricSampler {
    exec: Arc<dyn RemoteExec>,
    credentials: Credentials,
    timeout: Duration,
    cpu_window: Duration,
}

impl MetricSampler {
    pub fn new(exec: Arc<dyn RemoteExec>, config: &SshConfig) -> Self {
        Self {
            exec,
            credentials: Credentials::from(config),
            timeout: Duration::from_secs(config.timeout),
            cpu_window: Duration::from_millis(config.cpu_window_ms),
        }
    }

    async fn probe(&self, address: IpAddr) -> Result<ProbeOutput, SampleError> {
        let output = self
            .exec
            .exec(address, PROBE_COMMAND, &self.credentials, self.timeout)
            .await?;
        ProbeOutput::parse(&output)
    }

    #[instrument(skip(self))]
    pub async fn sample(&self, address: IpAddr) -> Result<Sample, SampleError> {
        let first = self.probe(address).await?;
        tokio::time::sleep(self.cpu_window).await;
        let second = self.probe(address).await?;

        let sample = Sample {
            cpu: cpu_busy_percent(first.cpu, second.cpu),
            mem: mem_used_percent(second.mem),
        };
        trace!("{address}: cpu {:.1}% mem {:.1}%", sample.cpu, sample.mem);

        Ok(sample)
    }
}
