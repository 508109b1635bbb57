//! Controller configuration
//!
//! Every option has a default so a partial file or environment overlay is
//! enough to run. Loading from sources is the binary's concern; this module
//! only defines the shape and its validation.

use crate::error::ControllerError;
use crate::models::{DatapathId, PortNo};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Traffic engineering configuration consumed by the controller core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Interval between flow statistics polls
    #[serde(default = "default_polling_interval")]
    pub polling_interval_seconds: f64,

    /// Length of the per-uplink load window fed to the forecaster
    #[serde(default = "default_sequence_length")]
    pub sequence_length: usize,

    /// Exploration probability of the path selector
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,

    /// Q-learning rate
    #[serde(default = "default_alpha")]
    pub alpha: f64,

    /// Q-learning discount factor
    #[serde(default = "default_gamma")]
    pub gamma: f64,

    /// Gateway ports of the parallel uplinks, in path index order
    #[serde(default = "default_uplink_ports")]
    pub uplink_port_list: Vec<PortNo>,

    /// Datapath that owns the uplinks
    #[serde(default = "default_gateway_datapath")]
    pub gateway_datapath_id: DatapathId,

    /// Priority of application flows installed by the controller
    #[serde(default = "default_data_plane_priority")]
    pub data_plane_priority_level: u16,

    /// Elapsed time below which a rate is reported as zero
    #[serde(default = "default_min_delta_time")]
    pub min_delta_time_threshold: f64,

    /// Numerator of the reroute reward
    #[serde(default = "default_reward_constant")]
    pub reward_constant: f64,

    /// Idle timeout of provisional flows installed on packet-in
    #[serde(default = "default_flow_idle_timeout")]
    pub flow_idle_timeout_secs: u16,

    /// Host-facing ports on the edge switches
    #[serde(default = "default_host_ports")]
    pub host_ports: Vec<PortNo>,

    /// The single uplink that carries ARP between edge switches.
    /// Defaults to the first uplink.
    #[serde(default)]
    pub arp_uplink_port: Option<PortNo>,

    /// Switches at either end of the parallel paths
    #[serde(default = "default_edge_datapaths")]
    pub edge_datapath_ids: Vec<DatapathId>,

    /// Directory holding the classifier and forecaster models
    #[serde(default)]
    pub model_dir: Option<PathBuf>,

    /// CSV file receiving one row per classified flow
    #[serde(default)]
    pub dataset_path: Option<PathBuf>,

    /// Capacity of the outgoing southbound command queue
    #[serde(default = "default_command_buffer")]
    pub command_buffer_size: usize,
}

fn default_polling_interval() -> f64 {
    2.0
}

fn default_sequence_length() -> usize {
    10
}

fn default_epsilon() -> f64 {
    0.1
}

fn default_alpha() -> f64 {
    0.5
}

fn default_gamma() -> f64 {
    0.9
}

fn default_uplink_ports() -> Vec<PortNo> {
    vec![5, 6, 7, 8, 9]
}

fn default_gateway_datapath() -> DatapathId {
    1
}

fn default_data_plane_priority() -> u16 {
    10
}

fn default_min_delta_time() -> f64 {
    0.05
}

fn default_reward_constant() -> f64 {
    1000.0
}

fn default_flow_idle_timeout() -> u16 {
    5
}

fn default_host_ports() -> Vec<PortNo> {
    vec![1, 2, 3, 4]
}

fn default_edge_datapaths() -> Vec<DatapathId> {
    vec![1, 2]
}

fn default_command_buffer() -> usize {
    1024
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            polling_interval_seconds: default_polling_interval(),
            sequence_length: default_sequence_length(),
            epsilon: default_epsilon(),
            alpha: default_alpha(),
            gamma: default_gamma(),
            uplink_port_list: default_uplink_ports(),
            gateway_datapath_id: default_gateway_datapath(),
            data_plane_priority_level: default_data_plane_priority(),
            min_delta_time_threshold: default_min_delta_time(),
            reward_constant: default_reward_constant(),
            flow_idle_timeout_secs: default_flow_idle_timeout(),
            host_ports: default_host_ports(),
            arp_uplink_port: None,
            edge_datapath_ids: default_edge_datapaths(),
            model_dir: None,
            dataset_path: None,
            command_buffer_size: default_command_buffer(),
        }
    }
}

impl ControllerConfig {
    /// Check ranges and cross-field constraints
    pub fn validate(&self) -> Result<(), ControllerError> {
        let invalid = |msg: String| Err(ControllerError::InvalidConfig(msg));

        if self.uplink_port_list.is_empty() {
            return invalid("uplink_port_list must not be empty".into());
        }
        if !(self.polling_interval_seconds.is_finite() && self.polling_interval_seconds > 0.0) {
            return invalid(format!(
                "polling_interval_seconds must be positive, got {}",
                self.polling_interval_seconds
            ));
        }
        if self.sequence_length == 0 {
            return invalid("sequence_length must be at least 1".into());
        }
        let rates = [
            ("epsilon", self.epsilon),
            ("alpha", self.alpha),
            ("gamma", self.gamma),
        ];
        for (name, value) in rates {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if !(self.min_delta_time_threshold.is_finite() && self.min_delta_time_threshold > 0.0) {
            return invalid(format!(
                "min_delta_time_threshold must be positive, got {}",
                self.min_delta_time_threshold
            ));
        }
        if !self.reward_constant.is_finite() {
            return invalid("reward_constant must be finite".into());
        }
        if let Some(port) = self.arp_uplink_port {
            if !self.uplink_port_list.contains(&port) {
                return invalid(format!("arp_uplink_port {} is not an uplink", port));
            }
        }
        if self.command_buffer_size == 0 {
            return invalid("command_buffer_size must be at least 1".into());
        }
        Ok(())
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs_f64(self.polling_interval_seconds)
    }

    /// The uplink that carries ARP between edge switches
    pub fn arp_uplink(&self) -> PortNo {
        self.arp_uplink_port
            .or_else(|| self.uplink_port_list.first().copied())
            .unwrap_or_default()
    }

    pub fn path_count(&self) -> usize {
        self.uplink_port_list.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.polling_interval(), Duration::from_secs(2));
        assert_eq!(config.arp_uplink(), 5);
        assert_eq!(config.path_count(), 5);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ControllerConfig =
            serde_json::from_str(r#"{"epsilon": 0.0, "uplink_port_list": [3, 4]}"#).unwrap();
        assert_eq!(config.epsilon, 0.0);
        assert_eq!(config.uplink_port_list, vec![3, 4]);
        assert_eq!(config.sequence_length, 10);
        assert_eq!(config.arp_uplink(), 3);
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let config = ControllerConfig {
            epsilon: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ControllerConfig {
            uplink_port_list: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ControllerConfig {
            sequence_length: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ControllerConfig {
            arp_uplink_port: Some(42),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
