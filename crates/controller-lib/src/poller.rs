//! Periodic flow statistics polling
//!
//! Every tick sends one stats request to each registered datapath. Requests
//! are fire-and-forget: replies come back later as notifications, and a
//! missing reply just leaves that datapath's state stale until the next tick.

use crate::controller::TrafficController;
use crate::health::{components, HealthRegistry};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Issues stats requests on a fixed interval
pub struct StatsPoller {
    controller: Arc<TrafficController>,
    interval: Duration,
    health: Option<HealthRegistry>,
    degraded: bool,
}

/// Results of one polling cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollResults {
    pub requested: usize,
    pub errors: usize,
}

impl StatsPoller {
    pub fn new(controller: Arc<TrafficController>, interval: Duration) -> Self {
        Self {
            controller,
            interval,
            health: None,
            degraded: false,
        }
    }

    /// Run until shutdown is signalled
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_ms = self.interval.as_millis() as u64, "Starting stats poller");

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let results = self.poll_once().await;
                    cycles += 1;
                    debug!(
                        cycle = cycles,
                        requested = results.requested,
                        errors = results.errors,
                        "Poll cycle complete"
                    );
                    self.track_health(&results).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down stats poller");
                    break;
                }
            }
        }
    }

    /// Request stats from every active datapath once
    pub async fn poll_once(&self) -> PollResults {
        let mut results = PollResults::default();

        for datapath_id in self.controller.active_datapaths().await {
            match self.controller.request_flow_stats(datapath_id).await {
                Ok(()) => results.requested += 1,
                Err(e) => {
                    results.errors += 1;
                    debug!(datapath_id, error = %e, "Stats request not sent");
                }
            }
        }

        results
    }

    async fn track_health(&mut self, results: &PollResults) {
        let failing = results.errors > 0 && results.requested == 0;

        if failing && !self.degraded {
            warn!(errors = results.errors, "No stats requests could be sent this cycle");
            self.degraded = true;
            if let Some(health) = &self.health {
                health.set_degraded(components::POLLER, "Stats requests failing").await;
            }
        } else if !failing && self.degraded {
            info!("Stats requests flowing again");
            self.degraded = false;
            if let Some(health) = &self.health {
                health.set_healthy(components::POLLER).await;
            }
        }
    }
}

/// Builder for the stats poller
pub struct StatsPollerBuilder {
    controller: Option<Arc<TrafficController>>,
    interval: Option<Duration>,
    health: Option<HealthRegistry>,
}

impl StatsPollerBuilder {
    pub fn new() -> Self {
        Self {
            controller: None,
            interval: None,
            health: None,
        }
    }

    pub fn controller(mut self, controller: Arc<TrafficController>) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Override the interval taken from the controller config
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<StatsPoller> {
        let controller = self
            .controller
            .ok_or_else(|| anyhow::anyhow!("Controller is required"))?;
        let interval = self
            .interval
            .unwrap_or_else(|| controller.config().polling_interval());
        if interval.is_zero() {
            anyhow::bail!("Polling interval must be positive");
        }

        let mut poller = StatsPoller::new(controller, interval);
        poller.health = self.health;
        Ok(poller)
    }
}

impl Default for StatsPollerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::controller::TrafficControllerBuilder;
    use crate::health::ComponentStatus;
    use crate::southbound::testing::RecordingSouthbound;
    use crate::southbound::{ChannelSouthbound, Notification, SouthboundCommand};

    fn controller() -> (Arc<TrafficController>, Arc<RecordingSouthbound>) {
        let southbound = Arc::new(RecordingSouthbound::default());
        let controller = TrafficControllerBuilder::new(ControllerConfig::default())
            .southbound(southbound.clone())
            .seed(1)
            .build()
            .unwrap();
        (Arc::new(controller), southbound)
    }

    fn stats_requests(southbound: &RecordingSouthbound) -> Vec<u64> {
        southbound
            .commands()
            .into_iter()
            .filter_map(|c| match c {
                SouthboundCommand::RequestFlowStats { datapath_id } => Some(datapath_id),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_poll_once_requests_every_active_datapath() {
        let (controller, southbound) = controller();
        for datapath_id in [3, 1, 2] {
            controller
                .handle(Notification::SwitchConnected { datapath_id })
                .await
                .unwrap();
        }

        let poller = StatsPoller::new(controller, Duration::from_secs(2));
        let results = poller.poll_once().await;

        assert_eq!(results, PollResults { requested: 3, errors: 0 });
        assert_eq!(stats_requests(&southbound), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_poll_once_with_no_switches() {
        let (controller, southbound) = controller();
        let results = StatsPoller::new(controller, Duration::from_secs(2)).poll_once().await;
        assert_eq!(results, PollResults::default());
        assert!(southbound.commands().is_empty());
    }

    #[tokio::test]
    async fn test_closed_channel_counts_errors_and_degrades() {
        let (southbound, rx) = ChannelSouthbound::new(16);
        let controller = Arc::new(
            TrafficControllerBuilder::new(ControllerConfig::default())
                .southbound(Arc::new(southbound))
                .build()
                .unwrap(),
        );
        controller
            .handle(Notification::SwitchConnected { datapath_id: 1 })
            .await
            .unwrap();
        drop(rx);

        let health = HealthRegistry::new();
        let mut poller = StatsPollerBuilder::new()
            .controller(controller)
            .health(health.clone())
            .build()
            .unwrap();

        let results = poller.poll_once().await;
        assert_eq!(results, PollResults { requested: 0, errors: 1 });

        poller.track_health(&results).await;
        assert_eq!(health.status(components::POLLER).await, Some(ComponentStatus::Degraded));
    }

    #[tokio::test]
    async fn test_run_polls_until_shutdown() {
        let (controller, southbound) = controller();
        controller
            .handle(Notification::SwitchConnected { datapath_id: 1 })
            .await
            .unwrap();

        let poller = StatsPollerBuilder::new()
            .controller(controller)
            .interval(Duration::from_millis(10))
            .build()
            .unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(poller.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(55)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(stats_requests(&southbound).len() >= 2);
    }

    #[test]
    fn test_builder_requires_controller() {
        assert!(StatsPollerBuilder::new().build().is_err());
    }
}
