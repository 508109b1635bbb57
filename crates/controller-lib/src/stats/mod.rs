//! Flow statistics tracking
//!
//! This module turns the cumulative counters reported by the switches into
//! per-flow rates and keeps a bounded load window per gateway uplink.

mod history;
mod processor;

pub use history::PathHistory;
pub use processor::{compute_rates, FlowStatsProcessor, ProcessedBatch, StatsProcessorConfig};
