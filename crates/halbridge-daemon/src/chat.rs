//! Chat network events and the NDJSON adapter that carries them.
//!
//! The chat connection itself lives outside the daemon. It writes one JSON
//! event per line to the daemon's stdin and reads one JSON `say` object per
//! line from its stdout.

use serde::{Deserialize, Serialize};
use std::io::BufRead;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// An event delivered by the chat network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Someone said something on a channel.
    Message {
        user: String,
        channel: String,
        text: String,
    },
    UserEntered {
        channel: String,
        user: String,
    },
    UserLeft {
        channel: String,
        user: String,
    },
    UserQuit {
        channel: String,
        user: String,
    },
    /// Full member list of a channel, e.g. after a WHO reply.
    RosterSync {
        channel: String,
        users: Vec<String>,
    },
}

/// A line to say on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outbound {
    pub channel: String,
    pub text: String,
}

/// Parse one NDJSON line. Blank lines yield `None`.
pub fn parse_event(line: &str) -> Result<Option<ChatEvent>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

/// Read events from `reader` until end of input or until the bridge goes
/// away. Malformed lines are logged and skipped.
///
/// Blocking: run it on a dedicated thread. A read stuck on an idle pipe then
/// cannot hold up runtime shutdown.
pub fn read_events<R: BufRead>(reader: R, tx: &mpsc::Sender<ChatEvent>) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to read chat events");
                break;
            }
        };
        match parse_event(&line) {
            Ok(Some(event)) => {
                if tx.blocking_send(event).is_err() {
                    debug!("Bridge stopped accepting chat events");
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Skipping malformed chat event"),
        }
    }
    info!("Chat event stream ended");
}

/// Read chat events from the process's stdin on a detached thread.
pub fn spawn_stdin_reader(tx: mpsc::Sender<ChatEvent>) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("chat-stdin".into())
        .spawn(move || read_events(std::io::stdin().lock(), &tx))
        .map(drop)
}

/// Write every outbound line to `writer` as NDJSON.
pub async fn write_outbound<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Outbound>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        let mut line = match serde_json::to_string(&outbound) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to encode outbound message");
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!(error = %e, "Failed to write outbound message");
            return;
        }
        if let Err(e) = writer.flush().await {
            warn!(error = %e, "Failed to flush outbound message");
            return;
        }
    }
}
