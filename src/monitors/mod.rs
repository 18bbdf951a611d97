//! Load monitoring for the watched instance
//!
//! ```text
//! RemoteExec ──► MetricSampler ──► Sample ──► MetricSelector ──► Thresholds::evaluate ──► Decision
//!                (cpu%, mem%)                 (cpu|mem|max|avg)   (debounce counters)
//! ```
//!
//! - **sampler**: derives CPU-busy and memory-used percentages from `/proc` counters
//! - **hysteresis**: turns a stream of metric values into scale decisions

pub mod hysteresis;
pub mod sampler;
