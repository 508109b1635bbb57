//! Observability infrastructure for the controller
//!
//! Provides:
//! - Prometheus metrics (poll traffic, classifications, reroutes, forecasts, Q-values)
//! - Structured JSON logging of control-loop events with tracing

use crate::models::{DatapathId, FlowKey, PortNo, RerouteDecision, TrafficClass};
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, GaugeVec, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for batch processing latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

struct ControllerMetricsInner {
    stats_requests: IntCounter,
    stats_replies: IntCounterVec,
    batch_latency_seconds: Histogram,
    flows_tracked: IntGauge,
    switches_connected: IntGauge,
    classifications: IntCounterVec,
    reroutes: IntCounterVec,
    path_forecast: GaugeVec,
    path_load: GaugeVec,
    q_value: GaugeVec,
    packet_ins: IntCounterVec,
    southbound_errors: IntCounterVec,
    model_errors: IntCounterVec,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            stats_requests: register_int_counter!(
                "te_controller_stats_requests_total",
                "Flow statistics requests sent to switches"
            )
            .expect("Failed to register stats_requests"),

            stats_replies: register_int_counter_vec!(
                "te_controller_stats_replies_total",
                "Flow statistics replies received, by outcome",
                &["outcome"]
            )
            .expect("Failed to register stats_replies"),

            batch_latency_seconds: register_histogram!(
                "te_controller_batch_latency_seconds",
                "Time spent processing one flow statistics reply",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register batch_latency_seconds"),

            flows_tracked: register_int_gauge!(
                "te_controller_flows_tracked",
                "Flows with a stored counter sample"
            )
            .expect("Failed to register flows_tracked"),

            switches_connected: register_int_gauge!(
                "te_controller_switches_connected",
                "Datapaths currently registered"
            )
            .expect("Failed to register switches_connected"),

            classifications: register_int_counter_vec!(
                "te_controller_classifications_total",
                "Flows classified, by traffic class",
                &["class"]
            )
            .expect("Failed to register classifications"),

            reroutes: register_int_counter_vec!(
                "te_controller_reroutes_total",
                "Flow output rewrites issued, by traffic class",
                &["class"]
            )
            .expect("Failed to register reroutes"),

            path_forecast: register_gauge_vec!(
                "te_controller_path_forecast_bytes_per_second",
                "Latest forecast load per uplink",
                &["port"]
            )
            .expect("Failed to register path_forecast"),

            path_load: register_gauge_vec!(
                "te_controller_path_load_bytes_per_second",
                "Latest observed load per uplink",
                &["port"]
            )
            .expect("Failed to register path_load"),

            q_value: register_gauge_vec!(
                "te_controller_q_value",
                "Current Q-table estimate per traffic class and path index",
                &["class", "path"]
            )
            .expect("Failed to register q_value"),

            packet_ins: register_int_counter_vec!(
                "te_controller_packet_in_total",
                "Packet-in events handled, by outcome",
                &["outcome"]
            )
            .expect("Failed to register packet_ins"),

            southbound_errors: register_int_counter_vec!(
                "te_controller_southbound_errors_total",
                "Southbound commands that could not be queued",
                &["command"]
            )
            .expect("Failed to register southbound_errors"),

            model_errors: register_int_counter_vec!(
                "te_controller_model_errors_total",
                "Classifier and forecaster call failures",
                &["model"]
            )
            .expect("Failed to register model_errors"),
        }
    }
}

/// Handle to the global controller metrics. Clones share the same metrics.
#[derive(Clone)]
pub struct ControllerMetrics {
    _private: (),
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new)
    }

    pub fn inc_stats_requests(&self) {
        self.inner().stats_requests.inc();
    }

    pub fn inc_stats_replies(&self, outcome: &str) {
        self.inner().stats_replies.with_label_values(&[outcome]).inc();
    }

    pub fn observe_batch_latency(&self, duration_secs: f64) {
        self.inner().batch_latency_seconds.observe(duration_secs);
    }

    pub fn set_flows_tracked(&self, count: usize) {
        self.inner().flows_tracked.set(count as i64);
    }

    pub fn set_switches_connected(&self, count: usize) {
        self.inner().switches_connected.set(count as i64);
    }

    pub fn inc_classification(&self, class: TrafficClass) {
        self.inner().classifications.with_label_values(&[class.as_str()]).inc();
    }

    pub fn inc_reroute(&self, class: TrafficClass) {
        self.inner().reroutes.with_label_values(&[class.as_str()]).inc();
    }

    pub fn set_path_forecast(&self, port: PortNo, bytes_per_sec: f64) {
        self.inner()
            .path_forecast
            .with_label_values(&[&port.to_string()])
            .set(bytes_per_sec);
    }

    pub fn set_path_load(&self, port: PortNo, bytes_per_sec: f64) {
        self.inner()
            .path_load
            .with_label_values(&[&port.to_string()])
            .set(bytes_per_sec);
    }

    pub fn set_q_value(&self, class: TrafficClass, path: usize, value: f64) {
        self.inner()
            .q_value
            .with_label_values(&[class.as_str(), &path.to_string()])
            .set(value);
    }

    pub fn inc_packet_in(&self, outcome: &str) {
        self.inner().packet_ins.with_label_values(&[outcome]).inc();
    }

    pub fn inc_southbound_errors(&self, command: &str) {
        self.inner().southbound_errors.with_label_values(&[command]).inc();
    }

    pub fn inc_model_errors(&self, model: &str) {
        self.inner().model_errors.with_label_values(&[model]).inc();
    }
}

/// Structured logger for control-loop events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(
        &self,
        version: &str,
        classifier: bool,
        forecaster: bool,
        uplinks: &[PortNo],
    ) {
        info!(
            event = "controller_started",
            instance = %self.instance,
            version = %version,
            classifier_loaded = classifier,
            forecaster_loaded = forecaster,
            uplinks = ?uplinks,
            "Traffic steering controller started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Traffic steering controller shutting down"
        );
    }

    pub fn log_switch_connected(&self, datapath_id: DatapathId, active: usize) {
        info!(
            event = "switch_connected",
            instance = %self.instance,
            datapath_id = datapath_id,
            active_switches = active,
            "Switch connected"
        );
    }

    pub fn log_switch_disconnected(&self, datapath_id: DatapathId, active: usize) {
        info!(
            event = "switch_disconnected",
            instance = %self.instance,
            datapath_id = datapath_id,
            active_switches = active,
            "Switch disconnected"
        );
    }

    pub fn log_new_flow(&self, key: &FlowKey, port: PortNo) {
        info!(
            event = "new_flow",
            instance = %self.instance,
            flow = %key,
            uplink = port,
            "New flow pinned to provisional uplink"
        );
    }

    pub fn log_flow_classified(&self, key: &FlowKey, class: TrafficClass, byte_rate: f64) {
        info!(
            event = "flow_classified",
            instance = %self.instance,
            flow = %key,
            class = %class,
            byte_rate = byte_rate,
            "Flow classified"
        );
    }

    pub fn log_flow_rerouted(&self, decision: &RerouteDecision, q_value: f64) {
        info!(
            event = "flow_rerouted",
            instance = %self.instance,
            flow = %decision.flow_key,
            class = %decision.class,
            old_port = decision.old_port,
            new_port = decision.new_port,
            path_index = decision.path_index,
            reward = decision.reward,
            q_value = q_value,
            "Flow rerouted"
        );
    }

    /// One line per cycle with every uplink forecast
    pub fn log_load_forecast(&self, forecasts: &[(PortNo, f64)]) {
        let mbps: Vec<String> = forecasts
            .iter()
            .map(|(port, bytes)| format!("{}:{:.2}", port, bytes * 8.0 / 1_000_000.0))
            .collect();
        info!(
            event = "load_forecast",
            instance = %self.instance,
            forecast_mbps = %mbps.join(" "),
            "Uplink load forecast"
        );
    }

    pub fn log_model_unavailable(&self, model: &str, consequence: &str) {
        warn!(
            event = "model_unavailable",
            instance = %self.instance,
            model = %model,
            consequence = %consequence,
            "Model unavailable"
        );
    }
}
