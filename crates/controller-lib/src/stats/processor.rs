//! Flow statistics processing
//!
//! Turns cumulative switch counters into per-flow rates and per-uplink load
//! observations. The previous sample of every flow is kept so that each poll
//! yields a delta; nothing is appended beyond one sample per flow.

use super::PathHistory;
use crate::config::ControllerConfig;
use crate::models::{
    DatapathId, FlowKey, FlowRate, FlowStatSample, FlowStatsEntry, FlowStatsReply, PortNo,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Settings of the stats processor, derived from the controller config
#[derive(Debug, Clone)]
pub struct StatsProcessorConfig {
    pub data_plane_priority: u16,
    pub min_delta_time: f64,
    pub gateway_datapath_id: DatapathId,
    pub uplink_ports: Vec<PortNo>,
    pub poll_interval_secs: f64,
    pub sequence_length: usize,
}

impl From<&ControllerConfig> for StatsProcessorConfig {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            data_plane_priority: config.data_plane_priority_level,
            min_delta_time: config.min_delta_time_threshold,
            gateway_datapath_id: config.gateway_datapath_id,
            uplink_ports: config.uplink_port_list.clone(),
            poll_interval_secs: config.polling_interval_seconds,
            sequence_length: config.sequence_length,
        }
    }
}

/// Output of one processed stats reply
#[derive(Debug, Clone, Default)]
pub struct ProcessedBatch {
    pub datapath_id: DatapathId,
    /// Rate records of flows that have carried at least one byte
    pub flows: Vec<FlowRate>,
    /// Load observation pushed per uplink this cycle (gateway only)
    pub port_rates: Vec<(PortNo, f64)>,
}

/// Compute byte and packet rates of `current` against the previous sample.
///
/// Returns zeros on cold start, when the elapsed time is at or below
/// `min_delta_time`, and for any counter that went backwards.
pub fn compute_rates(
    previous: Option<&FlowStatSample>,
    current: &FlowStatSample,
    min_delta_time: f64,
) -> (f64, f64) {
    let Some(previous) = previous else {
        return (0.0, 0.0);
    };

    let delta_time = current.duration.as_secs_f64() - previous.duration.as_secs_f64();
    if !(delta_time > min_delta_time) {
        return (0.0, 0.0);
    }

    let delta_bytes = current.byte_count.saturating_sub(previous.byte_count);
    let delta_packets = current.packet_count.saturating_sub(previous.packet_count);

    (delta_bytes as f64 / delta_time, delta_packets as f64 / delta_time)
}

/// Converts raw flow counters into rates and rolling uplink load history
pub struct FlowStatsProcessor {
    config: StatsProcessorConfig,
    samples: HashMap<FlowKey, FlowStatSample>,
    port_totals: HashMap<PortNo, u64>,
    histories: BTreeMap<PortNo, PathHistory>,
}

impl FlowStatsProcessor {
    pub fn new(config: StatsProcessorConfig) -> Self {
        let histories = config
            .uplink_ports
            .iter()
            .map(|port| (*port, PathHistory::new(config.sequence_length)))
            .collect();

        Self {
            config,
            samples: HashMap::new(),
            port_totals: HashMap::new(),
            histories,
        }
    }

    /// Process one stats reply
    pub fn process(&mut self, reply: &FlowStatsReply) -> ProcessedBatch {
        let datapath_id = reply.datapath_id;
        let entries: Vec<&FlowStatsEntry> = reply
            .entries
            .iter()
            .filter(|entry| entry.priority == self.config.data_plane_priority)
            .collect();

        let mut seen = HashSet::with_capacity(entries.len());
        let mut flows = Vec::new();

        for entry in &entries {
            let key = FlowKey::from_match(datapath_id, &entry.flow_match);
            let sample = FlowStatSample {
                byte_count: entry.byte_count,
                packet_count: entry.packet_count,
                duration: entry.duration,
                output_port: entry.output_port(),
            };

            let (byte_rate, packet_rate) =
                compute_rates(self.samples.get(&key), &sample, self.config.min_delta_time);
            self.samples.insert(key, sample);
            seen.insert(key);

            if entry.byte_count == 0 {
                continue;
            }

            flows.push(FlowRate {
                key,
                flow_match: entry.flow_match.clone(),
                byte_count: entry.byte_count,
                packet_count: entry.packet_count,
                duration_secs: entry.duration.as_secs_f64(),
                byte_rate,
                packet_rate,
                output_port: sample.output_port,
            });
        }

        // Rules missing from a complete reply have expired on the switch
        self.samples
            .retain(|key, _| key.datapath_id != datapath_id || seen.contains(key));

        let port_rates = if datapath_id == self.config.gateway_datapath_id {
            self.update_port_loads(&entries)
        } else {
            Vec::new()
        };

        debug!(
            datapath_id,
            entries = entries.len(),
            active_flows = flows.len(),
            "Processed flow stats"
        );

        ProcessedBatch {
            datapath_id,
            flows,
            port_rates,
        }
    }

    /// Aggregate bytes per uplink and push the per-interval rate into each
    /// uplink's history
    fn update_port_loads(&mut self, entries: &[&FlowStatsEntry]) -> Vec<(PortNo, f64)> {
        let mut totals: HashMap<PortNo, u64> =
            self.config.uplink_ports.iter().map(|port| (*port, 0)).collect();

        for entry in entries {
            if let Some(total) = entry.output_port().and_then(|port| totals.get_mut(&port)) {
                *total = total.saturating_add(entry.byte_count);
            }
        }

        let interval = self.config.poll_interval_secs;
        let mut port_rates = Vec::with_capacity(totals.len());

        for port in &self.config.uplink_ports {
            let current = totals.get(port).copied().unwrap_or(0);
            let rate = match self.port_totals.get(port) {
                Some(previous) if interval > 0.0 => {
                    current.saturating_sub(*previous) as f64 / interval
                }
                _ => 0.0,
            };
            self.port_totals.insert(*port, current);

            if let Some(history) = self.histories.get_mut(port) {
                history.push(rate);
            }
            port_rates.push((*port, rate));
        }

        port_rates
    }

    /// Drop every stored sample of a disconnected datapath
    pub fn forget_datapath(&mut self, datapath_id: DatapathId) {
        self.samples.retain(|key, _| key.datapath_id != datapath_id);
        if datapath_id == self.config.gateway_datapath_id {
            self.port_totals.clear();
        }
    }

    pub fn sample(&self, key: &FlowKey) -> Option<&FlowStatSample> {
        self.samples.get(key)
    }

    pub fn history(&self, port: PortNo) -> Option<&PathHistory> {
        self.histories.get(&port)
    }

    /// Uplink histories in ascending port order
    pub fn histories(&self) -> &BTreeMap<PortNo, PathHistory> {
        &self.histories
    }

    pub fn tracked_flows(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, FlowDuration, FlowMatch, IP_PROTO_TCP, IP_PROTO_UDP};
    use std::net::Ipv4Addr;

    fn test_config() -> StatsProcessorConfig {
        StatsProcessorConfig {
            data_plane_priority: 10,
            min_delta_time: 0.05,
            gateway_datapath_id: 1,
            uplink_ports: vec![5, 6],
            poll_interval_secs: 2.0,
            sequence_length: 3,
        }
    }

    fn udp_match(src_last: u8) -> FlowMatch {
        FlowMatch {
            ipv4_src: Some(Ipv4Addr::new(10, 0, 0, src_last)),
            ipv4_dst: Some(Ipv4Addr::new(10, 0, 1, 1)),
            ip_proto: Some(IP_PROTO_UDP),
            udp_src: Some(5000),
            udp_dst: Some(6000),
            ..Default::default()
        }
    }

    fn entry(
        flow_match: FlowMatch,
        bytes: u64,
        packets: u64,
        secs: u32,
        port: PortNo,
    ) -> FlowStatsEntry {
        FlowStatsEntry {
            priority: 10,
            flow_match,
            actions: vec![Action::Output(port)],
            byte_count: bytes,
            packet_count: packets,
            duration: FlowDuration::new(secs, 0),
        }
    }

    fn reply(datapath_id: DatapathId, entries: Vec<FlowStatsEntry>) -> FlowStatsReply {
        FlowStatsReply {
            datapath_id,
            entries,
            partial: false,
        }
    }

    #[test]
    fn test_rate_sequence_over_three_polls() {
        let mut processor = FlowStatsProcessor::new(test_config());
        let polls = [(0u64, 0u32), (12_000_000, 2), (25_000_000, 4)];
        let mut rates = Vec::new();

        for (bytes, secs) in polls {
            let entries = vec![entry(udp_match(1), bytes, bytes / 1000, secs, 5)];
            let batch = processor.process(&reply(1, entries));
            let key = FlowKey::from_match(1, &udp_match(1));
            assert!(processor.sample(&key).is_some());
            rates.push(batch.flows.first().map(|f| f.byte_rate).unwrap_or(0.0));
        }

        assert_eq!(rates, vec![0.0, 6_000_000.0, 6_500_000.0]);
    }

    #[test]
    fn test_zero_byte_flows_are_not_emitted() {
        let mut processor = FlowStatsProcessor::new(test_config());
        let batch = processor.process(&reply(1, vec![entry(udp_match(1), 0, 0, 1, 5)]));
        assert!(batch.flows.is_empty());
        assert_eq!(processor.tracked_flows(), 1);
    }

    #[test]
    fn test_counter_reset_clamps_to_zero() {
        let mut processor = FlowStatsProcessor::new(test_config());
        processor.process(&reply(1, vec![entry(udp_match(1), 5_000, 50, 2, 5)]));
        let batch = processor.process(&reply(1, vec![entry(udp_match(1), 1_000, 10, 4, 5)]));

        let flow = &batch.flows[0];
        assert_eq!(flow.byte_rate, 0.0);
        assert_eq!(flow.packet_rate, 0.0);
    }

    #[test]
    fn test_idle_flow_has_zero_rate() {
        let mut processor = FlowStatsProcessor::new(test_config());
        processor.process(&reply(1, vec![entry(udp_match(1), 5_000, 50, 2, 5)]));
        let batch = processor.process(&reply(1, vec![entry(udp_match(1), 5_000, 50, 4, 5)]));
        assert_eq!(batch.flows[0].byte_rate, 0.0);
    }

    #[test]
    fn test_small_delta_time_yields_zero() {
        let previous = FlowStatSample {
            byte_count: 0,
            packet_count: 0,
            duration: FlowDuration::new(2, 0),
            output_port: Some(5),
        };
        let current = FlowStatSample {
            byte_count: 10_000,
            packet_count: 10,
            duration: FlowDuration::new(2, 10_000_000),
            output_port: Some(5),
        };
        assert_eq!(compute_rates(Some(&previous), &current, 0.05), (0.0, 0.0));
        assert_eq!(compute_rates(None, &current, 0.05), (0.0, 0.0));
    }

    #[test]
    fn test_sub_second_duration_is_used() {
        let previous = FlowStatSample {
            byte_count: 0,
            packet_count: 0,
            duration: FlowDuration::new(1, 500_000_000),
            output_port: None,
        };
        let current = FlowStatSample {
            byte_count: 1_000,
            packet_count: 4,
            duration: FlowDuration::new(2, 0),
            output_port: None,
        };
        let (byte_rate, packet_rate) = compute_rates(Some(&previous), &current, 0.05);
        assert!((byte_rate - 2_000.0).abs() < 1e-6);
        assert!((packet_rate - 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_non_data_plane_priority_ignored() {
        let mut processor = FlowStatsProcessor::new(test_config());
        let mut table_miss = entry(FlowMatch::default(), 9_000, 9, 3, 5);
        table_miss.priority = 0;
        table_miss.actions = vec![Action::ToController];

        let batch = processor.process(&reply(1, vec![table_miss]));
        assert!(batch.flows.is_empty());
        assert_eq!(processor.tracked_flows(), 0);
    }

    #[test]
    fn test_tcp_ports_in_key() {
        let mut processor = FlowStatsProcessor::new(test_config());
        let flow_match = FlowMatch {
            ipv4_src: Some(Ipv4Addr::new(10, 0, 0, 1)),
            ipv4_dst: Some(Ipv4Addr::new(10, 0, 1, 1)),
            ip_proto: Some(IP_PROTO_TCP),
            tcp_src: Some(43000),
            tcp_dst: Some(443),
            ..Default::default()
        };
        let batch = processor.process(&reply(1, vec![entry(flow_match, 100, 1, 1, 5)]));
        let key = batch.flows[0].key;
        assert_eq!((key.src_port, key.dst_port), (43000, 443));
    }

    #[test]
    fn test_port_history_from_aggregated_bytes() {
        let mut processor = FlowStatsProcessor::new(test_config());

        processor.process(&reply(
            1,
            vec![entry(udp_match(1), 1_000, 1, 1, 5), entry(udp_match(2), 3_000, 3, 1, 5)],
        ));
        let batch = processor.process(&reply(
            1,
            vec![entry(udp_match(1), 3_000, 3, 3, 5), entry(udp_match(2), 5_000, 5, 3, 6)],
        ));

        // port 5: 4000 -> 3000 clamps to 0, port 6: 0 -> 5000 over 2s
        assert_eq!(batch.port_rates, vec![(5, 0.0), (6, 2_500.0)]);
        assert_eq!(processor.history(5).unwrap().to_vec(), vec![0.0, 0.0]);
        assert_eq!(processor.history(6).unwrap().to_vec(), vec![0.0, 2_500.0]);
    }

    #[test]
    fn test_history_bounded_by_sequence_length() {
        let mut processor = FlowStatsProcessor::new(test_config());
        for i in 0..10u64 {
            processor.process(&reply(1, vec![entry(udp_match(1), i * 1_000, i, i as u32, 5)]));
            assert!(processor.history(5).unwrap().len() <= 3);
        }
        assert_eq!(processor.history(5).unwrap().to_vec(), vec![500.0, 500.0, 500.0]);
    }

    #[test]
    fn test_non_gateway_does_not_touch_history() {
        let mut processor = FlowStatsProcessor::new(test_config());
        let batch = processor.process(&reply(2, vec![entry(udp_match(1), 1_000, 1, 1, 5)]));
        assert!(batch.port_rates.is_empty());
        assert!(processor.history(5).unwrap().is_empty());
        assert_eq!(batch.flows.len(), 1);
    }

    #[test]
    fn test_expired_flows_are_pruned() {
        let mut processor = FlowStatsProcessor::new(test_config());
        processor.process(&reply(
            1,
            vec![
                entry(udp_match(1), 1_000, 1, 1, 5),
                entry(udp_match(2), 1_000, 1, 1, 6),
            ],
        ));
        processor.process(&reply(2, vec![entry(udp_match(3), 1_000, 1, 1, 5)]));
        assert_eq!(processor.tracked_flows(), 3);

        processor.process(&reply(1, vec![entry(udp_match(1), 2_000, 2, 3, 5)]));
        assert_eq!(processor.tracked_flows(), 2);

        processor.forget_datapath(2);
        assert_eq!(processor.tracked_flows(), 1);
    }
}
