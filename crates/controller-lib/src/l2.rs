//! Plain L2 forwarding for traffic the decision core does not steer

use crate::error::ControllerError;
use crate::models::{Action, DatapathId, FlowMatch, MacAddr, PortNo};
use crate::southbound::{FlowMod, PacketIn, PacketOut, Southbound};
use std::collections::HashMap;
use tracing::trace;

/// Priority of rules installed by the learning switch
pub const L2_FLOW_PRIORITY: u16 = 1;

/// Fallback forwarding collaborator for packet-ins the controller does not
/// handle itself
pub trait L2Forwarder: Send {
    fn handle(
        &mut self,
        packet: &PacketIn,
        southbound: &dyn Southbound,
    ) -> Result<(), ControllerError>;

    /// Drop any state held for a datapath
    fn forget(&mut self, _datapath_id: DatapathId) {}
}

/// MAC-learning switch: learns source addresses per datapath, forwards to a
/// known destination or floods.
#[derive(Debug, Default)]
pub struct MacLearningSwitch {
    tables: HashMap<DatapathId, HashMap<MacAddr, PortNo>>,
}

impl MacLearningSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, datapath_id: DatapathId, mac: &MacAddr) -> Option<PortNo> {
        self.tables.get(&datapath_id)?.get(mac).copied()
    }
}

impl L2Forwarder for MacLearningSwitch {
    fn handle(
        &mut self,
        packet: &PacketIn,
        southbound: &dyn Southbound,
    ) -> Result<(), ControllerError> {
        self.tables
            .entry(packet.datapath_id)
            .or_default()
            .insert(packet.eth_src, packet.in_port);

        let out_port = self.lookup(packet.datapath_id, &packet.eth_dst);
        let action = match out_port {
            Some(port) => Action::Output(port),
            None => Action::Flood,
        };
        trace!(
            datapath_id = packet.datapath_id,
            src = %packet.eth_src,
            dst = %packet.eth_dst,
            in_port = packet.in_port,
            action = ?action,
            "L2 forwarding"
        );

        if out_port.is_some() {
            let flow_match = FlowMatch {
                in_port: Some(packet.in_port),
                eth_src: Some(packet.eth_src),
                eth_dst: Some(packet.eth_dst),
                ..Default::default()
            };
            let flow_mod =
                FlowMod::add(packet.datapath_id, L2_FLOW_PRIORITY, flow_match, vec![action])
                    .with_buffer_id(packet.buffer_id);
            southbound.flow_mod(flow_mod)?;

            // The switch releases a buffered packet through the new rule
            if packet.buffer_id.is_some() {
                return Ok(());
            }
        }

        southbound.packet_out(PacketOut {
            datapath_id: packet.datapath_id,
            in_port: packet.in_port,
            actions: vec![action],
            buffer_id: packet.buffer_id,
            data: if packet.buffer_id.is_none() {
                packet.data.clone()
            } else {
                Vec::new()
            },
        })
    }

    fn forget(&mut self, datapath_id: DatapathId) {
        self.tables.remove(&datapath_id);
    }
}
