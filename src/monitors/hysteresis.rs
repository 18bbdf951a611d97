//! Debounced threshold evaluation
//!
//! ```text
//! value >= high        → high += 1, low = 0        (ScaleUp once high >= min_up)
//! value <= low         → low += 1, high = 0        (ScaleDown once low >= min_down)
//! low < value < high   → high -= 1, low -= 1       (floored at 0)
//! ```
//!
//! A dead-band sample only decays the counters, so a single borderline reading
//! never wipes out a run that is otherwise sustained.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Thresholds {
    /// Percent at or above which a sample counts as high
    #[serde(default = "default_high")]
    pub high: f64,

    /// Percent at or below which a sample counts as low
    #[serde(default = "default_low")]
    pub low: f64,

    /// Consecutive high samples required to scale up
    #[serde(default = "default_min_up")]
    pub min_up: u32,

    /// Consecutive low samples required to scale down
    #[serde(default = "default_min_down")]
    pub min_down: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high: default_high(),
            low: default_low(),
            min_up: default_min_up(),
            min_down: default_min_down(),
        }
    }
}

fn default_high() -> f64 {
    60.0
}

fn default_low() -> f64 {
    20.0
}

fn default_min_up() -> u32 {
    4
}

fn default_min_down() -> u32 {
    4
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ThresholdCounters {
    pub consecutive_high: u32,
    pub consecutive_low: u32,
}

impl ThresholdCounters {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_idle(&self) -> bool {
        self.consecutive_high == 0 && self.consecutive_low == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleZone {
    High,
    Low,
    DeadBand,
}

impl SampleZone {
    pub fn classify(value: f64, high: f64, low: f64) -> SampleZone {
        if value >= high {
            SampleZone::High
        } else if value <= low {
            SampleZone::Low
        } else {
            SampleZone::DeadBand
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    ScaleUp,
    ScaleDown,
    Hold,
}

impl Thresholds {
    /// Feed one sample into `counters` and report whether a trigger fired.
    ///
    /// A fired trigger resets its counter before returning, whatever the
    /// caller later does with the decision.
    pub fn evaluate(&self, counters: &mut ThresholdCounters, value: f64) -> Decision {
        match SampleZone::classify(value, self.high, self.low) {
            SampleZone::High => {
                counters.consecutive_high += 1;
                counters.consecutive_low = 0;
            }
            SampleZone::Low => {
                counters.consecutive_low += 1;
                counters.consecutive_high = 0;
            }
            SampleZone::DeadBand => {
                counters.consecutive_high = counters.consecutive_high.saturating_sub(1);
                counters.consecutive_low = counters.consecutive_low.saturating_sub(1);
            }
        }

        if counters.consecutive_high >= self.min_up {
            counters.consecutive_high = 0;
            return Decision::ScaleUp;
        }

        if counters.consecutive_low >= self.min_down {
            counters.consecutive_low = 0;
            return Decision::ScaleDown;
        }

        Decision::Hold
    }
}
