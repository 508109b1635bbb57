//! Southbound seam to the switch-control adapter
//!
//! The adapter owns the wire protocol. The controller only exchanges the
//! records below with it: notifications flow up, commands flow down. Every
//! command is fire-and-forget.

use crate::error::ControllerError;
use crate::models::{Action, DatapathId, EtherType, FlowMatch, FlowStatsReply, MacAddr, PortNo};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tokio::sync::mpsc;
use tracing::debug;

/// Decoded IPv4 header fields of a packet-in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Header {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub proto: u8,
    /// Transport ports when the packet is TCP or UDP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<(u16, u16)>,
}

/// Packet punted to the controller by a table-miss rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketIn {
    pub datapath_id: DatapathId,
    pub in_port: PortNo,
    /// Switch-side buffer holding the packet, if any
    #[serde(default)]
    pub buffer_id: Option<u32>,
    pub eth_src: MacAddr,
    pub eth_dst: MacAddr,
    pub ether_type: EtherType,
    #[serde(default)]
    pub ipv4: Option<Ipv4Header>,
    #[serde(default)]
    pub data: Vec<u8>,
}

/// Events reported by the switch-control adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    SwitchConnected { datapath_id: DatapathId },
    SwitchDisconnected { datapath_id: DatapathId },
    FlowStatsReply(FlowStatsReply),
    PacketIn(PacketIn),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowModCommand {
    Add,
    /// Replace the actions of matching rules, leaving their match untouched
    Modify,
}

/// Install or modify a flow rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowMod {
    pub datapath_id: DatapathId,
    pub command: FlowModCommand,
    pub priority: u16,
    pub flow_match: FlowMatch,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub idle_timeout: u16,
    #[serde(default)]
    pub hard_timeout: u16,
    #[serde(default)]
    pub buffer_id: Option<u32>,
}

impl FlowMod {
    pub fn add(
        datapath_id: DatapathId,
        priority: u16,
        flow_match: FlowMatch,
        actions: Vec<Action>,
    ) -> Self {
        Self {
            datapath_id,
            command: FlowModCommand::Add,
            priority,
            flow_match,
            actions,
            idle_timeout: 0,
            hard_timeout: 0,
            buffer_id: None,
        }
    }

    /// Rewrite only the output action of an existing rule
    pub fn modify_output(
        datapath_id: DatapathId,
        priority: u16,
        flow_match: FlowMatch,
        port: PortNo,
    ) -> Self {
        Self {
            command: FlowModCommand::Modify,
            ..Self::add(datapath_id, priority, flow_match, vec![Action::Output(port)])
        }
    }

    pub fn with_idle_timeout(mut self, secs: u16) -> Self {
        self.idle_timeout = secs;
        self
    }

    pub fn with_buffer_id(mut self, buffer_id: Option<u32>) -> Self {
        self.buffer_id = buffer_id;
        self
    }
}

/// Emit a packet out of the switch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketOut {
    pub datapath_id: DatapathId,
    pub in_port: PortNo,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub buffer_id: Option<u32>,
    /// Raw frame, sent only when the switch did not buffer it
    #[serde(default)]
    pub data: Vec<u8>,
}

/// Commands issued to the switch-control adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SouthboundCommand {
    RequestFlowStats { datapath_id: DatapathId },
    FlowMod(FlowMod),
    PacketOut(PacketOut),
}

impl SouthboundCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            SouthboundCommand::RequestFlowStats { .. } => "flow_stats_request",
            SouthboundCommand::FlowMod(_) => "flow_mod",
            SouthboundCommand::PacketOut(_) => "packet_out",
        }
    }
}

/// Non-blocking sink for southbound commands
pub trait Southbound: Send + Sync {
    /// Queue a command. Must never wait for the switch.
    fn send(&self, command: SouthboundCommand) -> Result<(), ControllerError>;

    fn request_flow_stats(&self, datapath_id: DatapathId) -> Result<(), ControllerError> {
        self.send(SouthboundCommand::RequestFlowStats { datapath_id })
    }

    fn flow_mod(&self, flow_mod: FlowMod) -> Result<(), ControllerError> {
        self.send(SouthboundCommand::FlowMod(flow_mod))
    }

    fn packet_out(&self, packet_out: PacketOut) -> Result<(), ControllerError> {
        self.send(SouthboundCommand::PacketOut(packet_out))
    }
}

/// Southbound that hands commands to an adapter task over a bounded queue
#[derive(Debug, Clone)]
pub struct ChannelSouthbound {
    tx: mpsc::Sender<SouthboundCommand>,
}

impl ChannelSouthbound {
    pub fn new(buffer_size: usize) -> (Self, mpsc::Receiver<SouthboundCommand>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        (Self { tx }, rx)
    }
}

impl Southbound for ChannelSouthbound {
    fn send(&self, command: SouthboundCommand) -> Result<(), ControllerError> {
        let kind = command.kind();
        match self.tx.try_send(command) {
            Ok(()) => {
                debug!(command = kind, "Queued southbound command");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(ControllerError::SouthboundFull(kind)),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ControllerError::SouthboundClosed),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_southbound_delivers_in_order() {
        let (southbound, mut rx) = ChannelSouthbound::new(4);
        southbound.request_flow_stats(1).unwrap();
        southbound.request_flow_stats(2).unwrap();

        assert_eq!(rx.recv().await, Some(SouthboundCommand::RequestFlowStats { datapath_id: 1 }));
        assert_eq!(rx.recv().await, Some(SouthboundCommand::RequestFlowStats { datapath_id: 2 }));
    }

    #[test]
    fn test_channel_southbound_full_queue_does_not_block() {
        let (southbound, _rx) = ChannelSouthbound::new(1);
        southbound.request_flow_stats(1).unwrap();

        let err = southbound.request_flow_stats(1).unwrap_err();
        assert!(matches!(err, ControllerError::SouthboundFull("flow_stats_request")));
    }

    #[test]
    fn test_channel_southbound_closed() {
        let (southbound, rx) = ChannelSouthbound::new(1);
        drop(rx);
        assert!(matches!(
            southbound.request_flow_stats(1),
            Err(ControllerError::SouthboundClosed)
        ));
    }

    #[test]
    fn test_modify_output_replaces_only_actions() {
        let flow_match = FlowMatch {
            ipv4_src: Some(Ipv4Addr::new(10, 0, 0, 1)),
            ..Default::default()
        };
        let flow_mod = FlowMod::modify_output(1, 10, flow_match.clone(), 7);
        assert_eq!(flow_mod.command, FlowModCommand::Modify);
        assert_eq!(flow_mod.flow_match, flow_match);
        assert_eq!(flow_mod.actions, vec![Action::Output(7)]);
    }

    #[test]
    fn test_notification_json_shape() {
        let json = r#"{"type":"switch_connected","datapath_id":3}"#;
        let notification: Notification = serde_json::from_str(json).unwrap();
        assert!(matches!(notification, Notification::SwitchConnected { datapath_id: 3 }));
    }
}
