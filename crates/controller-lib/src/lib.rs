//! Controller library for SDN traffic steering
//!
//! This crate provides the decision core of a traffic-engineering controller:
//! - Switch registry and periodic flow statistics polling
//! - Per-flow rate and per-uplink load tracking
//! - Flow classification and uplink load forecasting
//! - Q-learning path selection and flow rerouting
//! - Packet-in handling, health checks and observability

pub mod config;
pub mod controller;
pub mod error;
pub mod forecast;
pub mod health;
pub mod inference;
pub mod l2;
pub mod models;
pub mod observability;
pub mod packet_in;
pub mod poller;
pub mod recorder;
pub mod registry;
pub mod reroute;
pub mod selector;
pub mod southbound;
pub mod stats;

pub use config::ControllerConfig;
pub use controller::{
    CycleReport, NotificationOutcome, PathLoad, SkipReason, StatsOutcome, TrafficController,
    TrafficControllerBuilder,
};
pub use error::ControllerError;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ControllerMetrics, StructuredLogger};
pub use poller::{StatsPoller, StatsPollerBuilder};
pub use southbound::{ChannelSouthbound, Notification, Southbound, SouthboundCommand};
