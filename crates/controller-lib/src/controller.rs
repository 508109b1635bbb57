//! Traffic steering controller
//!
//! Owns every piece of mutable control state behind one lock and dispatches
//! southbound notifications to it. The stats poller and the notification
//! loop are the only two activity sources; both go through this type.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::forecast::{ForecastPass, LoadForecast};
use crate::health::{components, HealthRegistry};
use crate::inference::{FlowClassifier, LoadForecaster, LoadedModels};
use crate::l2::{L2Forwarder, MacLearningSwitch};
use crate::models::{
    Action, DatapathId, FlowKey, FlowMatch, FlowRate, FlowStatsReply, PortNo, RerouteDecision,
    TrafficClass,
};
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::packet_in::{PacketInConfig, PacketInHandler, PacketInOutcome};
use crate::recorder::FlowRecorder;
use crate::registry::SwitchRegistry;
use crate::reroute::RerouteController;
use crate::selector::{PathSelector, QTable, SelectorConfig};
use crate::southbound::{FlowMod, Notification, PacketIn, Southbound};
use crate::stats::{FlowStatsProcessor, StatsProcessorConfig};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

/// Priority of the match-all rule that punts unknown traffic to the controller
pub const TABLE_MISS_PRIORITY: u16 = 0;

/// Forecasts above this many bytes per second (1 Mbit/s) are logged
const FORECAST_LOG_THRESHOLD: f64 = 125_000.0;

/// All mutable control state, guarded by a single lock
struct ControllerState {
    registry: SwitchRegistry,
    stats: FlowStatsProcessor,
    forecast: LoadForecast,
    selector: PathSelector,
    reroute: RerouteController,
    packet_in: PacketInHandler,
    recorder: Option<FlowRecorder>,
}

/// Why a stats reply was not processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The adapter could not assemble the full multipart reply
    Partial,
    /// The datapath is not registered
    Unregistered,
}

/// Everything one stats cycle did
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub datapath_id: DatapathId,
    /// Rate records that carried traffic
    pub flows: Vec<FlowRate>,
    pub classified: Vec<(FlowKey, TrafficClass)>,
    pub decisions: Vec<RerouteDecision>,
    pub forecast: ForecastPass,
}

#[derive(Debug, Clone)]
pub enum StatsOutcome {
    Skipped(SkipReason),
    Processed(CycleReport),
}

/// Result of dispatching one notification
#[derive(Debug, Clone)]
pub enum NotificationOutcome {
    SwitchConnected { newly_registered: bool },
    SwitchDisconnected { was_registered: bool },
    Stats(StatsOutcome),
    PacketIn(PacketInOutcome),
}

/// Load view of one uplink
#[derive(Debug, Clone, Serialize)]
pub struct PathLoad {
    pub path_index: usize,
    pub port: PortNo,
    /// Observed byte rates, oldest first
    pub history: Vec<f64>,
    pub predicted_load: Option<f64>,
}

pub struct TrafficController {
    config: ControllerConfig,
    state: Mutex<ControllerState>,
    classifier: Option<Arc<dyn FlowClassifier>>,
    southbound: Arc<dyn Southbound>,
    /// Set while the last southbound send failed
    southbound_failing: AtomicBool,
    health: Option<HealthRegistry>,
    metrics: ControllerMetrics,
    logger: StructuredLogger,
}

impl TrafficController {
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Dispatch one southbound notification
    pub async fn handle(
        &self,
        notification: Notification,
    ) -> Result<NotificationOutcome, ControllerError> {
        match notification {
            Notification::SwitchConnected { datapath_id } => {
                self.on_switch_connected(datapath_id).await
            }
            Notification::SwitchDisconnected { datapath_id } => {
                Ok(self.on_switch_disconnected(datapath_id).await)
            }
            Notification::FlowStatsReply(reply) => {
                Ok(NotificationOutcome::Stats(self.on_flow_stats(&reply).await))
            }
            Notification::PacketIn(packet) => self.on_packet_in(&packet).await,
        }
    }

    async fn on_switch_connected(
        &self,
        datapath_id: DatapathId,
    ) -> Result<NotificationOutcome, ControllerError> {
        let (newly_registered, active) = {
            let mut state = self.state.lock().await;
            let added = state.registry.register(datapath_id);
            (added, state.registry.len())
        };
        self.metrics.set_switches_connected(active);

        if newly_registered {
            self.logger.log_switch_connected(datapath_id, active);
        }

        let table_miss = FlowMod::add(
            datapath_id,
            TABLE_MISS_PRIORITY,
            FlowMatch::default(),
            vec![Action::ToController],
        );
        self.track_southbound(self.southbound.flow_mod(table_miss))
            .await?;

        Ok(NotificationOutcome::SwitchConnected { newly_registered })
    }

    async fn on_switch_disconnected(&self, datapath_id: DatapathId) -> NotificationOutcome {
        let mut state = self.state.lock().await;
        let was_registered = state.registry.unregister(datapath_id);
        state.stats.forget_datapath(datapath_id);
        state.packet_in.forget(datapath_id);

        let active = state.registry.len();
        self.metrics.set_switches_connected(active);
        self.metrics.set_flows_tracked(state.stats.tracked_flows());
        if was_registered {
            self.logger.log_switch_disconnected(datapath_id, active);
        }

        NotificationOutcome::SwitchDisconnected { was_registered }
    }

    /// Process one stats reply: rates, uplink loads, forecasts and, at the
    /// gateway, classification and rerouting of every active flow.
    ///
    /// Flows of one batch are decided in reply order, each observing the
    /// Q-table as left by the previous one.
    pub async fn on_flow_stats(&self, reply: &FlowStatsReply) -> StatsOutcome {
        let start = Instant::now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if reply.partial {
            self.metrics.inc_stats_replies("partial");
            debug!(datapath_id = reply.datapath_id, "Skipping partial stats reply");
            return StatsOutcome::Skipped(SkipReason::Partial);
        }
        if !state.registry.contains(reply.datapath_id) {
            self.metrics.inc_stats_replies("unregistered");
            debug!(datapath_id = reply.datapath_id, "Ignoring stats from unregistered datapath");
            return StatsOutcome::Skipped(SkipReason::Unregistered);
        }

        let batch = state.stats.process(reply);
        self.metrics.inc_stats_replies("processed");
        self.metrics.set_flows_tracked(state.stats.tracked_flows());

        let mut report = CycleReport {
            datapath_id: batch.datapath_id,
            ..Default::default()
        };

        if batch.datapath_id == self.config.gateway_datapath_id {
            for (port, rate) in &batch.port_rates {
                self.metrics.set_path_load(*port, *rate);
            }
            report.forecast = self.update_forecasts(state);

            if let Some(classifier) = &self.classifier {
                for flow in &batch.flows {
                    let sent = self.steer_flow(state, classifier.as_ref(), flow, &mut report);
                    if let Some(sent) = sent {
                        if let Err(e) = self.track_southbound(sent).await {
                            warn!(flow = %flow.key, error = %e, "Failed to send reroute");
                        }
                    }
                }
                if let Some(recorder) = state.recorder.as_mut() {
                    if let Err(e) = recorder.flush() {
                        warn!(error = %format!("{:#}", e), "Failed to flush flow dataset");
                    }
                }
            }
        }

        report.flows = batch.flows;
        self.metrics.observe_batch_latency(start.elapsed().as_secs_f64());
        StatsOutcome::Processed(report)
    }

    fn update_forecasts(&self, state: &mut ControllerState) -> ForecastPass {
        let pass = state.forecast.update(state.stats.histories());

        for _ in 0..pass.errors {
            self.metrics.inc_model_errors("forecaster");
        }
        for (port, load) in &pass.updated {
            self.metrics.set_path_forecast(*port, *load);
        }

        let predicted: Vec<(PortNo, f64)> = state
            .forecast
            .predicted_loads()
            .iter()
            .map(|(port, load)| (*port, *load))
            .collect();
        if predicted.iter().any(|(_, load)| *load > FORECAST_LOG_THRESHOLD) {
            self.logger.log_load_forecast(&predicted);
        }

        pass
    }

    /// Classify one flow, record it and reroute it if the selector prefers
    /// another uplink. Returns the send result when a modify was issued.
    fn steer_flow(
        &self,
        state: &mut ControllerState,
        classifier: &dyn FlowClassifier,
        flow: &FlowRate,
        report: &mut CycleReport,
    ) -> Option<Result<(), ControllerError>> {
        let class = match classifier.classify(&flow.features()) {
            Ok(class) => class,
            Err(e) => {
                self.metrics.inc_model_errors("classifier");
                debug!(flow = %flow.key, error = %format!("{:#}", e), "Classification failed");
                return None;
            }
        };

        self.metrics.inc_classification(class);
        self.logger.log_flow_classified(&flow.key, class, flow.byte_rate);
        report.classified.push((flow.key, class));

        if let Some(recorder) = state.recorder.as_mut() {
            if let Err(e) = recorder.record(flow, class) {
                warn!(
                    path = %recorder.path().display(),
                    error = %format!("{:#}", e),
                    "Failed to record flow"
                );
            }
        }

        let Some(decision) = state
            .reroute
            .evaluate(flow, class, &mut state.selector, &state.forecast)
        else {
            return None;
        };

        let result = state
            .reroute
            .apply(&decision, flow, &mut state.selector, self.southbound.as_ref());
        let q_value = state.selector.table().get(class, decision.path_index);
        self.metrics.set_q_value(class, decision.path_index, q_value);

        if result.is_ok() {
            self.metrics.inc_reroute(class);
            self.logger.log_flow_rerouted(&decision, q_value);
        }
        report.decisions.push(decision);
        Some(result)
    }

    async fn on_packet_in(
        &self,
        packet: &PacketIn,
    ) -> Result<NotificationOutcome, ControllerError> {
        let handled = {
            let mut state = self.state.lock().await;
            state.packet_in.handle(packet, self.southbound.as_ref())
        };
        let outcome = match handled {
            Ok(PacketInOutcome::Ignored) => PacketInOutcome::Ignored,
            other => self.track_southbound(other).await?,
        };

        let label = match &outcome {
            PacketInOutcome::Ignored => "ignored",
            PacketInOutcome::ArpFlooded { .. } => "arp",
            PacketInOutcome::FlowInstalled { key, port } => {
                self.logger.log_new_flow(key, *port);
                "flow_installed"
            }
            PacketInOutcome::Forwarded => "l2",
        };
        self.metrics.inc_packet_in(label);

        Ok(NotificationOutcome::PacketIn(outcome))
    }

    /// Datapaths to poll, in ascending id order
    pub async fn active_datapaths(&self) -> Vec<DatapathId> {
        self.state.lock().await.registry.active()
    }

    pub async fn q_table(&self) -> QTable {
        self.state.lock().await.selector.table().clone()
    }

    /// Observed and forecast load of every uplink, in path index order
    pub async fn path_loads(&self) -> Vec<PathLoad> {
        let state = self.state.lock().await;
        self.config
            .uplink_port_list
            .iter()
            .enumerate()
            .map(|(path_index, port)| PathLoad {
                path_index,
                port: *port,
                history: state
                    .stats
                    .history(*port)
                    .map(|history| history.to_vec())
                    .unwrap_or_default(),
                predicted_load: state.forecast.predicted_load(*port),
            })
            .collect()
    }

    /// Issue one stats request. Failures are counted and reported.
    pub async fn request_flow_stats(&self, datapath_id: DatapathId) -> Result<(), ControllerError> {
        self.track_southbound(self.southbound.request_flow_stats(datapath_id))
            .await?;
        self.metrics.inc_stats_requests();
        Ok(())
    }

    /// Report a failed send, or clear southbound health on the first success
    /// after a failure
    async fn track_southbound<T>(
        &self,
        result: Result<T, ControllerError>,
    ) -> Result<T, ControllerError> {
        match &result {
            Ok(_) => {
                if self.southbound_failing.swap(false, Ordering::Relaxed) {
                    info!("Southbound adapter accepting commands again");
                    if let Some(health) = &self.health {
                        health.set_healthy(components::SOUTHBOUND).await;
                    }
                }
            }
            Err(e) => {
                self.southbound_failing.store(true, Ordering::Relaxed);
                self.report_error(e).await;
            }
        }
        result
    }

    async fn report_error(&self, error: &ControllerError) {
        match error {
            ControllerError::SouthboundFull(kind) => {
                self.metrics.inc_southbound_errors(kind);
                warn!(command = kind, "Southbound queue full, command dropped");
                if let Some(health) = &self.health {
                    health
                        .set_degraded(components::SOUTHBOUND, "Command queue full")
                        .await;
                }
            }
            ControllerError::SouthboundClosed => {
                self.metrics.inc_southbound_errors("closed");
                warn!("Southbound adapter channel closed");
                if let Some(health) = &self.health {
                    health
                        .set_unhealthy(components::SOUTHBOUND, "Adapter channel closed")
                        .await;
                }
            }
            other => warn!(error = %other, "Notification handling failed"),
        }
    }

    /// Consume notifications until the stream ends or shutdown is signalled
    pub async fn run(
        self: Arc<Self>,
        mut notifications: mpsc::Receiver<Notification>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Starting notification loop");

        loop {
            tokio::select! {
                notification = notifications.recv() => {
                    let Some(notification) = notification else {
                        info!("Notification stream closed");
                        break;
                    };
                    // Send failures are already reported
                    if let Err(e) = self.handle(notification).await {
                        debug!(error = %e, "Notification handling failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down notification loop");
                    break;
                }
            }
        }
    }
}

/// Builder wiring the controller state from configuration and models
pub struct TrafficControllerBuilder {
    config: ControllerConfig,
    classifier: Option<Arc<dyn FlowClassifier>>,
    forecaster: Option<Arc<dyn LoadForecaster>>,
    sequence_length: Option<usize>,
    southbound: Option<Arc<dyn Southbound>>,
    l2: Option<Box<dyn L2Forwarder>>,
    health: Option<HealthRegistry>,
    seed: Option<u64>,
    instance: String,
}

impl TrafficControllerBuilder {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            classifier: None,
            forecaster: None,
            sequence_length: None,
            southbound: None,
            l2: None,
            health: None,
            seed: None,
            instance: "te-controller".to_string(),
        }
    }

    pub fn classifier(mut self, classifier: Arc<dyn FlowClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn forecaster(mut self, forecaster: Arc<dyn LoadForecaster>) -> Self {
        self.forecaster = Some(forecaster);
        self
    }

    /// Take both models and the effective window length from startup loading
    pub fn models(mut self, models: LoadedModels) -> Self {
        self.classifier = models.classifier;
        self.forecaster = models.forecaster;
        self.sequence_length = Some(models.sequence_length);
        self
    }

    pub fn southbound(mut self, southbound: Arc<dyn Southbound>) -> Self {
        self.southbound = Some(southbound);
        self
    }

    /// Replace the default MAC-learning fallback
    pub fn l2(mut self, l2: Box<dyn L2Forwarder>) -> Self {
        self.l2 = Some(l2);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Seed exploration and provisional path choice
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    pub fn build(self) -> Result<TrafficController, ControllerError> {
        let southbound = self
            .southbound
            .ok_or_else(|| ControllerError::InvalidConfig("southbound is required".into()))?;

        let mut config = self.config;
        if let Some(length) = self.sequence_length {
            config.sequence_length = length;
        }
        config.validate()?;

        let selector_config = SelectorConfig::from(&config);
        let packet_in_config = PacketInConfig::from(&config);
        let l2 = self
            .l2
            .unwrap_or_else(|| Box::new(MacLearningSwitch::new()) as Box<dyn L2Forwarder>);

        let (selector, packet_in) = match self.seed {
            Some(seed) => (
                PathSelector::with_seed(selector_config, seed),
                PacketInHandler::with_seed(packet_in_config, l2, seed.wrapping_add(1)),
            ),
            None => (
                PathSelector::new(selector_config),
                PacketInHandler::new(packet_in_config, l2),
            ),
        };

        let recorder = config
            .dataset_path
            .as_deref()
            .and_then(|path| match FlowRecorder::open(path) {
                Ok(recorder) => {
                    info!(path = %path.display(), "Recording classified flows");
                    Some(recorder)
                }
                Err(e) => {
                    warn!(error = %format!("{:#}", e), "Flow dataset disabled");
                    None
                }
            });

        let state = ControllerState {
            registry: SwitchRegistry::new(),
            stats: FlowStatsProcessor::new(StatsProcessorConfig::from(&config)),
            forecast: LoadForecast::new(self.forecaster, config.sequence_length),
            selector,
            reroute: RerouteController::from_config(&config),
            packet_in,
            recorder,
        };

        Ok(TrafficController {
            config,
            state: Mutex::new(state),
            classifier: self.classifier,
            southbound,
            southbound_failing: AtomicBool::new(false),
            health: self.health,
            metrics: ControllerMetrics::new(),
            logger: StructuredLogger::new(self.instance),
        })
    }
}
