//! Packet-in handling
//!
//! New IPv4 flows entering the gateway from a host get a provisional uplink
//! picked at random; the stats loop takes over once counters exist. ARP
//! follows a fixed flood policy that keeps it on a single uplink. LLDP and
//! IPv6 are dropped: neighbour discovery multicast would otherwise be flooded
//! over every parallel uplink. Anything else falls through to the L2
//! collaborator.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::l2::L2Forwarder;
use crate::models::{
    Action, DatapathId, EtherType, FlowKey, FlowMatch, PortNo, IP_PROTO_TCP, IP_PROTO_UDP,
};
use crate::southbound::{FlowMod, Ipv4Header, PacketIn, PacketOut, Southbound};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Settings of the packet-in handler, derived from the controller config
#[derive(Debug, Clone)]
pub struct PacketInConfig {
    pub gateway_datapath_id: DatapathId,
    pub uplink_ports: Vec<PortNo>,
    pub host_ports: Vec<PortNo>,
    pub arp_uplink: PortNo,
    pub edge_datapath_ids: Vec<DatapathId>,
    pub data_plane_priority: u16,
    pub idle_timeout_secs: u16,
}

impl From<&ControllerConfig> for PacketInConfig {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            gateway_datapath_id: config.gateway_datapath_id,
            uplink_ports: config.uplink_port_list.clone(),
            host_ports: config.host_ports.clone(),
            arp_uplink: config.arp_uplink(),
            edge_datapath_ids: config.edge_datapath_ids.clone(),
            data_plane_priority: config.data_plane_priority_level,
            idle_timeout_secs: config.flow_idle_timeout_secs,
        }
    }
}

/// What the handler did with a packet-in
#[derive(Debug, Clone, PartialEq)]
pub enum PacketInOutcome {
    /// LLDP and IPv6 frames are dropped
    Ignored,
    /// ARP sent out of `ports` ports, or flooded when `ports` is `None`
    ArpFlooded { ports: Option<usize> },
    /// A new gateway flow was pinned to an uplink
    FlowInstalled { key: FlowKey, port: PortNo },
    /// Handed to the L2 collaborator
    Forwarded,
}

pub struct PacketInHandler {
    config: PacketInConfig,
    rng: StdRng,
    l2: Box<dyn L2Forwarder>,
}

impl PacketInHandler {
    pub fn new(config: PacketInConfig, l2: Box<dyn L2Forwarder>) -> Self {
        Self::with_rng(config, l2, StdRng::from_entropy())
    }

    pub fn with_seed(config: PacketInConfig, l2: Box<dyn L2Forwarder>, seed: u64) -> Self {
        Self::with_rng(config, l2, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: PacketInConfig, l2: Box<dyn L2Forwarder>, rng: StdRng) -> Self {
        Self { config, rng, l2 }
    }

    pub fn handle(
        &mut self,
        packet: &PacketIn,
        southbound: &dyn Southbound,
    ) -> Result<PacketInOutcome, ControllerError> {
        match packet.ether_type {
            EtherType::Lldp | EtherType::Ipv6 => Ok(PacketInOutcome::Ignored),
            EtherType::Arp => self.flood_arp(packet, southbound),
            EtherType::Ipv4 if self.is_new_gateway_flow(packet) => match packet.ipv4 {
                Some(header) => self.install_flow(packet, &header, southbound),
                None => self.forward(packet, southbound),
            },
            _ => self.forward(packet, southbound),
        }
    }

    /// Drop L2 state of a disconnected datapath
    pub fn forget(&mut self, datapath_id: DatapathId) {
        self.l2.forget(datapath_id);
    }

    fn is_new_gateway_flow(&self, packet: &PacketIn) -> bool {
        packet.datapath_id == self.config.gateway_datapath_id
            && self.config.host_ports.contains(&packet.in_port)
    }

    fn flood_arp(
        &self,
        packet: &PacketIn,
        southbound: &dyn Southbound,
    ) -> Result<PacketInOutcome, ControllerError> {
        let (actions, ports) = if self.config.edge_datapath_ids.contains(&packet.datapath_id) {
            let mut actions: Vec<Action> = self
                .config
                .host_ports
                .iter()
                .filter(|port| **port != packet.in_port)
                .map(|port| Action::Output(*port))
                .collect();
            // Replies coming back over the uplink stay on the host side
            if self.config.host_ports.contains(&packet.in_port) {
                actions.push(Action::Output(self.config.arp_uplink));
            }
            let ports = actions.len();
            (actions, Some(ports))
        } else {
            (vec![Action::Flood], None)
        };

        southbound.packet_out(PacketOut {
            datapath_id: packet.datapath_id,
            in_port: packet.in_port,
            actions,
            buffer_id: packet.buffer_id,
            data: packet.data.clone(),
        })?;
        Ok(PacketInOutcome::ArpFlooded { ports })
    }

    fn install_flow(
        &mut self,
        packet: &PacketIn,
        header: &Ipv4Header,
        southbound: &dyn Southbound,
    ) -> Result<PacketInOutcome, ControllerError> {
        if self.config.uplink_ports.is_empty() {
            return self.forward(packet, southbound);
        }
        let port = self.config.uplink_ports[self.rng.gen_range(0..self.config.uplink_ports.len())];

        let flow_match = flow_match(packet.in_port, header);
        let key = FlowKey::from_match(packet.datapath_id, &flow_match);

        let flow_mod = FlowMod::add(
            packet.datapath_id,
            self.config.data_plane_priority,
            flow_match,
            vec![Action::Output(port)],
        )
        .with_idle_timeout(self.config.idle_timeout_secs)
        .with_buffer_id(packet.buffer_id);
        southbound.flow_mod(flow_mod)?;

        // A buffered packet is released by the new rule
        if packet.buffer_id.is_none() {
            southbound.packet_out(PacketOut {
                datapath_id: packet.datapath_id,
                in_port: packet.in_port,
                actions: vec![Action::Output(port)],
                buffer_id: None,
                data: packet.data.clone(),
            })?;
        }

        Ok(PacketInOutcome::FlowInstalled { key, port })
    }

    fn forward(
        &mut self,
        packet: &PacketIn,
        southbound: &dyn Southbound,
    ) -> Result<PacketInOutcome, ControllerError> {
        self.l2.handle(packet, southbound)?;
        Ok(PacketInOutcome::Forwarded)
    }
}

fn flow_match(in_port: PortNo, header: &Ipv4Header) -> FlowMatch {
    let mut flow_match = FlowMatch {
        in_port: Some(in_port),
        eth_type: Some(EtherType::Ipv4.as_u16()),
        ipv4_src: Some(header.src),
        ipv4_dst: Some(header.dst),
        ip_proto: Some(header.proto),
        ..Default::default()
    };

    if let Some((src, dst)) = header.ports {
        match header.proto {
            IP_PROTO_TCP => {
                flow_match.tcp_src = Some(src);
                flow_match.tcp_dst = Some(dst);
            }
            IP_PROTO_UDP => {
                flow_match.udp_src = Some(src);
                flow_match.udp_dst = Some(dst);
            }
            _ => {}
        }
    }

    flow_match
}
