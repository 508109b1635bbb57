//! Core data models for the traffic steering controller
//!
//! These are the in-memory records exchanged with the switch-control adapter
//! and between the stages of the control loop.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Numeric id of a managed switch
pub type DatapathId = u64;

/// Switch port number
pub type PortNo = u32;

pub const IP_PROTO_TCP: u8 = 6;
pub const IP_PROTO_UDP: u8 = 17;

/// Ethernet frame type as decoded by the switch-control adapter. Carried on
/// the wire as the raw 16-bit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum EtherType {
    Ipv4,
    Arp,
    Lldp,
    Ipv6,
    Other(u16),
}

impl EtherType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0800 => EtherType::Ipv4,
            0x0806 => EtherType::Arp,
            0x88cc => EtherType::Lldp,
            0x86dd => EtherType::Ipv6,
            other => EtherType::Other(other),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            EtherType::Ipv4 => 0x0800,
            EtherType::Arp => 0x0806,
            EtherType::Lldp => 0x88cc,
            EtherType::Ipv6 => 0x86dd,
            EtherType::Other(value) => *value,
        }
    }
}

impl From<u16> for EtherType {
    fn from(value: u16) -> Self {
        EtherType::from_u16(value)
    }
}

impl From<EtherType> for u16 {
    fn from(ether_type: EtherType) -> Self {
        ether_type.as_u16()
    }
}

/// 48-bit MAC address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Output action carried by an installed flow rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Forward out of a concrete port
    Output(PortNo),
    /// Flood to every port except the ingress port
    Flood,
    /// Punt to the controller as a packet-in
    ToController,
    Drop,
}

/// Returns the concrete output port of an action list, if any.
///
/// When several output actions are present the last one wins, matching the
/// order in which the switch applies them.
pub fn output_port(actions: &[Action]) -> Option<PortNo> {
    actions.iter().rev().find_map(|action| match action {
        Action::Output(port) => Some(*port),
        Action::Flood | Action::ToController | Action::Drop => None,
    })
}

/// Match criteria of a flow rule. Absent fields are wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_port: Option<PortNo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eth_type: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eth_src: Option<MacAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eth_dst: Option<MacAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_src: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_dst: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_proto: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_src: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_dst: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udp_src: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udp_dst: Option<u16>,
}

impl FlowMatch {
    /// Transport ports for this match: TCP fields for TCP, UDP fields for
    /// UDP, zero for every other protocol.
    pub fn transport_ports(&self) -> (u16, u16) {
        match self.ip_proto {
            Some(IP_PROTO_TCP) => (self.tcp_src.unwrap_or(0), self.tcp_dst.unwrap_or(0)),
            Some(IP_PROTO_UDP) => (self.udp_src.unwrap_or(0), self.udp_dst.unwrap_or(0)),
            _ => (0, 0),
        }
    }
}

/// Identity of a tracked flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    pub datapath_id: DatapathId,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub ip_proto: u8,
    pub src_port: u16,
    pub dst_port: u16,
}

impl FlowKey {
    /// Derive the key of a flow rule installed on `datapath_id`
    pub fn from_match(datapath_id: DatapathId, flow_match: &FlowMatch) -> Self {
        let (src_port, dst_port) = flow_match.transport_ports();
        Self {
            datapath_id,
            src_ip: flow_match.ipv4_src.unwrap_or(Ipv4Addr::UNSPECIFIED),
            dst_ip: flow_match.ipv4_dst.unwrap_or(Ipv4Addr::UNSPECIFIED),
            ip_proto: flow_match.ip_proto.unwrap_or(0),
            src_port,
            dst_port,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dp{} {}:{} -> {}:{} proto {}",
            self.datapath_id, self.src_ip, self.src_port, self.dst_ip, self.dst_port, self.ip_proto
        )
    }
}

/// Elapsed lifetime of a flow rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDuration {
    pub secs: u32,
    pub nanos: u32,
}

impl FlowDuration {
    pub fn new(secs: u32, nanos: u32) -> Self {
        Self { secs, nanos }
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.secs as f64 + self.nanos as f64 / 1_000_000_000.0
    }
}

/// One entry of a flow statistics reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowStatsEntry {
    pub priority: u16,
    pub flow_match: FlowMatch,
    #[serde(default)]
    pub actions: Vec<Action>,
    pub byte_count: u64,
    pub packet_count: u64,
    pub duration: FlowDuration,
}

impl FlowStatsEntry {
    pub fn output_port(&self) -> Option<PortNo> {
        output_port(&self.actions)
    }
}

/// Flow statistics reply for one datapath
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowStatsReply {
    pub datapath_id: DatapathId,
    pub entries: Vec<FlowStatsEntry>,
    /// Set when the adapter could not assemble every part of a multipart reply
    #[serde(default)]
    pub partial: bool,
}

/// Last observed counters of a flow. One per flow key, overwritten each poll.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowStatSample {
    pub byte_count: u64,
    pub packet_count: u64,
    pub duration: FlowDuration,
    pub output_port: Option<PortNo>,
}

/// Per-flow rate record produced by the stats processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRate {
    pub key: FlowKey,
    pub flow_match: FlowMatch,
    pub byte_count: u64,
    pub packet_count: u64,
    pub duration_secs: f64,
    pub byte_rate: f64,
    pub packet_rate: f64,
    pub output_port: Option<PortNo>,
}

impl FlowRate {
    /// Build the classifier input for this flow
    pub fn features(&self) -> FeatureVector {
        let avg_packet_size = if self.packet_count > 0 {
            self.byte_count as f64 / self.packet_count as f64
        } else {
            0.0
        };

        FeatureVector {
            ip_proto: self.key.ip_proto as f32,
            packet_count: self.packet_count as f32,
            byte_count: self.byte_count as f32,
            duration: self.duration_secs as f32,
            byte_rate: self.byte_rate as f32,
            packet_rate: self.packet_rate as f32,
            avg_packet_size: avg_packet_size as f32,
        }
    }
}

/// Feature vector for flow classification, in model input order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub ip_proto: f32,
    pub packet_count: f32,
    pub byte_count: f32,
    pub duration: f32,
    pub byte_rate: f32,
    pub packet_rate: f32,
    pub avg_packet_size: f32,
}

impl FeatureVector {
    pub const LEN: usize = 7;

    pub fn to_array(&self) -> [f32; Self::LEN] {
        [
            self.ip_proto,
            self.packet_count,
            self.byte_count,
            self.duration,
            self.byte_rate,
            self.packet_rate,
            self.avg_packet_size,
        ]
    }
}

/// Traffic class assigned by the classifier. Doubles as the RL state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficClass {
    Background,
    Video,
    Voip,
    Web,
}

impl TrafficClass {
    pub const COUNT: usize = 4;
    pub const ALL: [TrafficClass; Self::COUNT] = [
        TrafficClass::Background,
        TrafficClass::Video,
        TrafficClass::Voip,
        TrafficClass::Web,
    ];

    pub fn index(&self) -> usize {
        match self {
            TrafficClass::Background => 0,
            TrafficClass::Video => 1,
            TrafficClass::Voip => 2,
            TrafficClass::Web => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficClass::Background => "background",
            TrafficClass::Video => "video",
            TrafficClass::Voip => "voip",
            TrafficClass::Web => "web",
        }
    }
}

impl fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transient outcome of a reroute evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct RerouteDecision {
    pub flow_key: FlowKey,
    pub class: TrafficClass,
    pub path_index: usize,
    pub old_port: PortNo,
    pub new_port: PortNo,
    pub reward: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ether_type_uses_raw_value_on_the_wire() {
        assert_eq!(serde_json::to_string(&EtherType::Ipv6).unwrap(), "34525");
        assert_eq!(serde_json::from_str::<EtherType>("2054").unwrap(), EtherType::Arp);
        assert_eq!(
            serde_json::from_str::<EtherType>("35020").unwrap(),
            EtherType::Lldp
        );
        assert_eq!(
            serde_json::from_str::<EtherType>("34984").unwrap(),
            EtherType::Other(0x88a8)
        );
    }

    #[test]
    fn test_output_port_extraction() {
        assert_eq!(output_port(&[Action::Output(7)]), Some(7));
        assert_eq!(output_port(&[Action::Output(5), Action::Output(6)]), Some(6));
        assert_eq!(output_port(&[Action::Flood]), None);
        assert_eq!(output_port(&[Action::ToController]), None);
        assert_eq!(output_port(&[]), None);
    }

    #[test]
    fn test_transport_ports_by_protocol() {
        let tcp = FlowMatch {
            ip_proto: Some(IP_PROTO_TCP),
            tcp_src: Some(40000),
            tcp_dst: Some(80),
            udp_src: Some(1),
            ..Default::default()
        };
        assert_eq!(tcp.transport_ports(), (40000, 80));

        let udp = FlowMatch {
            ip_proto: Some(IP_PROTO_UDP),
            udp_src: Some(5004),
            udp_dst: Some(5006),
            ..Default::default()
        };
        assert_eq!(udp.transport_ports(), (5004, 5006));

        let icmp = FlowMatch {
            ip_proto: Some(1),
            tcp_src: Some(10),
            ..Default::default()
        };
        assert_eq!(icmp.transport_ports(), (0, 0));
    }

    #[test]
    fn test_features_guard_zero_packets() {
        let rate = FlowRate {
            key: FlowKey::from_match(1, &FlowMatch::default()),
            flow_match: FlowMatch::default(),
            byte_count: 0,
            packet_count: 0,
            duration_secs: 0.0,
            byte_rate: 0.0,
            packet_rate: 0.0,
            output_port: None,
        };
        assert_eq!(rate.features().avg_packet_size, 0.0);
    }

    #[test]
    fn test_traffic_class_index_roundtrip() {
        for class in TrafficClass::ALL {
            assert_eq!(TrafficClass::from_index(class.index()), Some(class));
        }
        assert_eq!(TrafficClass::from_index(4), None);
        assert_eq!(TrafficClass::Video.to_string(), "video");
    }

    #[test]
    fn test_duration_fraction() {
        let d = FlowDuration::new(2, 500_000_000);
        assert!((d.as_secs_f64() - 2.5).abs() < 1e-9);
    }
}
