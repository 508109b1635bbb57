//! Reroute decisions
//!
//! Compares the path recommended for a flow's class with the uplink the
//! flow currently uses and, on mismatch, rewrites the flow's output action.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::forecast::LoadForecast;
use crate::models::{FlowRate, PortNo, RerouteDecision, TrafficClass};
use crate::selector::{reward, PathSelector};
use crate::southbound::{FlowMod, Southbound};

/// Turns path recommendations into flow modifications
#[derive(Debug, Clone)]
pub struct RerouteController {
    uplink_ports: Vec<PortNo>,
    data_plane_priority: u16,
    reward_constant: f64,
}

impl RerouteController {
    pub fn new(uplink_ports: Vec<PortNo>, data_plane_priority: u16, reward_constant: f64) -> Self {
        Self {
            uplink_ports,
            data_plane_priority,
            reward_constant,
        }
    }

    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::new(
            config.uplink_port_list.clone(),
            config.data_plane_priority_level,
            config.reward_constant,
        )
    }

    /// Decide whether `flow` should move.
    ///
    /// No decision when the flow has no assigned output port yet or already
    /// uses the recommended uplink.
    pub fn evaluate(
        &self,
        flow: &FlowRate,
        class: TrafficClass,
        selector: &mut PathSelector,
        forecast: &LoadForecast,
    ) -> Option<RerouteDecision> {
        let path_index = selector.select(class);
        let new_port = *self.uplink_ports.get(path_index)?;
        let old_port = flow.output_port.filter(|port| *port != 0)?;

        if old_port == new_port {
            return None;
        }

        Some(RerouteDecision {
            flow_key: flow.key,
            class,
            path_index,
            old_port,
            new_port,
            reward: reward(self.reward_constant, forecast.predicted_load(new_port)),
        })
    }

    /// Learn from a decision and send the output rewrite. The switch reply
    /// is not awaited; the next poll re-evaluates the flow either way.
    pub fn apply(
        &self,
        decision: &RerouteDecision,
        flow: &FlowRate,
        selector: &mut PathSelector,
        southbound: &dyn Southbound,
    ) -> Result<(), ControllerError> {
        selector.update(decision.class, decision.path_index, decision.reward);
        southbound.flow_mod(FlowMod::modify_output(
            flow.key.datapath_id,
            self.data_plane_priority,
            flow.flow_match.clone(),
            decision.new_port,
        ))
    }
}
