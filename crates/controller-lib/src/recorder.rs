//! CSV log of classified flows, one row per flow per stats cycle

use crate::models::{DatapathId, FlowRate, TrafficClass};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// One dataset row
#[derive(Debug, Clone, Serialize)]
pub struct FlowRecord {
    pub timestamp: String,
    pub datapath_id: DatapathId,
    pub ip_src: String,
    pub ip_dst: String,
    pub ip_proto: u8,
    pub src_port: u16,
    pub dst_port: u16,
    pub packet_count: u64,
    pub byte_count: u64,
    pub duration_sec: f64,
    pub byte_rate: f64,
    pub packet_rate: f64,
    pub avg_packet_size: f64,
    pub label: &'static str,
}

impl FlowRecord {
    pub fn new(flow: &FlowRate, class: TrafficClass) -> Self {
        let features = flow.features();
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            datapath_id: flow.key.datapath_id,
            ip_src: flow.key.src_ip.to_string(),
            ip_dst: flow.key.dst_ip.to_string(),
            ip_proto: flow.key.ip_proto,
            src_port: flow.key.src_port,
            dst_port: flow.key.dst_port,
            packet_count: flow.packet_count,
            byte_count: flow.byte_count,
            duration_sec: flow.duration_secs,
            byte_rate: flow.byte_rate,
            packet_rate: flow.packet_rate,
            avg_packet_size: features.avg_packet_size as f64,
            label: class.as_str(),
        }
    }
}

/// Appends flow records to a CSV file
pub struct FlowRecorder {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl FlowRecorder {
    /// Open `path` for appending. The header row is written only when the
    /// file is new or empty.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open dataset {}", path.display()))?;
        let is_empty = file
            .metadata()
            .with_context(|| format!("Failed to stat dataset {}", path.display()))?
            .len()
            == 0;

        let writer = csv::WriterBuilder::new()
            .has_headers(is_empty)
            .from_writer(file);

        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, flow: &FlowRate, class: TrafficClass) -> Result<()> {
        self.writer
            .serialize(FlowRecord::new(flow, class))
            .context("Failed to write flow record")
    }

    /// Flush buffered rows, once per cycle
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush dataset")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FlowKey, FlowMatch, IP_PROTO_TCP};
    use std::net::Ipv4Addr;

    fn flow() -> FlowRate {
        let flow_match = FlowMatch {
            ipv4_src: Some(Ipv4Addr::new(10, 0, 0, 1)),
            ipv4_dst: Some(Ipv4Addr::new(10, 0, 0, 5)),
            ip_proto: Some(IP_PROTO_TCP),
            tcp_src: Some(40000),
            tcp_dst: Some(80),
            ..Default::default()
        };
        FlowRate {
            key: FlowKey::from_match(1, &flow_match),
            flow_match,
            byte_count: 3000,
            packet_count: 3,
            duration_secs: 2.0,
            byte_rate: 1500.0,
            packet_rate: 1.5,
            output_port: Some(5),
        }
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flows.csv");

        let mut recorder = FlowRecorder::open(&path).unwrap();
        recorder.record(&flow(), TrafficClass::Web).unwrap();
        recorder.flush().unwrap();
        drop(recorder);

        let mut recorder = FlowRecorder::open(&path).unwrap();
        recorder.record(&flow(), TrafficClass::Video).unwrap();
        recorder.flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,datapath_id,ip_src"));
        assert!(lines[1].ends_with(",web"));
        assert!(lines[2].contains(",10.0.0.1,10.0.0.5,6,40000,80,3,3000,"));
        assert!(lines[2].ends_with(",video"));
    }
}
