//! JSON-lines bridge to an external switch-control adapter
//!
//! Notifications arrive one JSON object per line; commands leave the same
//! way. The records are the controller's own serde types.

use anyhow::{Context, Result};
use controller_lib::{Notification, SouthboundCommand};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Forward decoded notifications until the reader hits EOF or the
/// controller stops listening. Undecodable lines are skipped.
pub async fn read_notifications<R>(reader: R, tx: mpsc::Sender<Notification>) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;

    while let Some(line) = lines.next_line().await.context("Failed to read notification")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let notification: Notification = match serde_json::from_str(line) {
            Ok(notification) => notification,
            Err(e) => {
                warn!(error = %e, "Skipping malformed notification");
                continue;
            }
        };

        if tx.send(notification).await.is_err() {
            debug!("Notification receiver dropped");
            break;
        }
        forwarded += 1;
    }

    info!(forwarded, "Notification input closed");
    Ok(forwarded)
}

/// Write every queued command as one JSON line, flushing after each
pub async fn write_commands<W>(
    mut rx: mpsc::Receiver<SouthboundCommand>,
    mut writer: W,
) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;

    while let Some(command) = rx.recv().await {
        let mut line = serde_json::to_vec(&command).context("Failed to encode command")?;
        line.push(b'\n');
        writer.write_all(&line).await.context("Failed to write command")?;
        writer.flush().await.context("Failed to flush command")?;
        written += 1;
    }

    Ok(written)
}
