// =============================================================================
// Streaming channels — one exchange WebSocket per stream group
// =============================================================================
//
// A `Connector` opens a channel and reports its lifecycle as `ChannelEvent`s
// on the sender handed to `open`:
//
//   Ready            socket handshake completed, subscriptions may be sent
//   Message(text)    one inbound text frame
//   Error(reason)    transport failure (always followed by Closed)
//   Closed           socket gone; no further events
//
// Every `open` gets a fresh event sender, so events from a replaced channel
// can never reach the group that replaced it.
// =============================================================================

use std::time::Duration;

use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::market_data::StreamKind;

/// Application-level keepalive; the exchange drops idle sockets after ~60 s.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);
const KEEPALIVE_FRAME: &str = r#"{"method":"PING"}"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Ready,
    Message(String),
    Error(String),
    Closed,
}

/// An open (or opening) channel.
pub trait Channel: Send + 'static {
    /// Queue a text frame for sending.
    fn send(&mut self, text: String) -> Result<()>;

    /// Close the channel.  Calling it more than once is a no-op.
    fn close(&mut self);
}

pub trait Connector: Send + Sync + 'static {
    type Channel: Channel;

    fn open(&self, kind: StreamKind, events: mpsc::UnboundedSender<ChannelEvent>) -> Self::Channel;
}

// ---------------------------------------------------------------------------
// WebSocket implementation
// ---------------------------------------------------------------------------

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WsConnector {
    type Channel = WsChannel;

    fn open(&self, kind: StreamKind, events: mpsc::UnboundedSender<ChannelEvent>) -> WsChannel {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let url = self.url.clone();
        tokio::spawn(async move {
            run_socket(url, kind, cmd_rx, events).await;
        });
        WsChannel {
            commands: Some(cmd_tx),
        }
    }
}

enum SocketCommand {
    Send(String),
    Close,
}

pub struct WsChannel {
    commands: Option<mpsc::UnboundedSender<SocketCommand>>,
}

impl Channel for WsChannel {
    fn send(&mut self, text: String) -> Result<()> {
        let tx = self
            .commands
            .as_ref()
            .ok_or_else(|| anyhow!("channel already closed"))?;
        tx.send(SocketCommand::Send(text))
            .map_err(|_| anyhow!("socket task has exited"))
    }

    fn close(&mut self) {
        if let Some(tx) = self.commands.take() {
            let _ = tx.send(SocketCommand::Close);
        }
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_socket(
    url: String,
    kind: StreamKind,
    mut commands: mpsc::UnboundedReceiver<SocketCommand>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    info!(stream = %kind, url = %url, "connecting stream WebSocket");

    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            warn!(stream = %kind, error = %e, "stream WebSocket connect failed");
            let _ = events.send(ChannelEvent::Error(e.to_string()));
            let _ = events.send(ChannelEvent::Closed);
            return;
        }
    };

    info!(stream = %kind, "stream WebSocket connected");
    let (mut write, mut read) = ws_stream.split();
    let _ = events.send(ChannelEvent::Ready);

    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if events.send(ChannelEvent::Message(text)).is_err() {
                            // Owner dropped the receiver; nobody is listening.
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            let _ = events.send(ChannelEvent::Error(e.to_string()));
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(stream = %kind, frame = ?frame, "stream WebSocket closed by peer");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(stream = %kind, error = %e, "stream WebSocket read error");
                        let _ = events.send(ChannelEvent::Error(e.to_string()));
                        break;
                    }
                    None => {
                        info!(stream = %kind, "stream WebSocket ended");
                        break;
                    }
                }
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(SocketCommand::Send(text)) => {
                        debug!(stream = %kind, frame = %text, "sending");
                        if let Err(e) = write.send(Message::Text(text)).await {
                            warn!(stream = %kind, error = %e, "stream WebSocket write error");
                            let _ = events.send(ChannelEvent::Error(e.to_string()));
                            break;
                        }
                    }
                    Some(SocketCommand::Close) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        info!(stream = %kind, "stream WebSocket closed");
                        break;
                    }
                }
            }
            _ = keepalive.tick() => {
                if let Err(e) = write.send(Message::Text(KEEPALIVE_FRAME.to_string())).await {
                    let _ = events.send(ChannelEvent::Error(e.to_string()));
                    break;
                }
            }
        }
    }

    let _ = events.send(ChannelEvent::Closed);
}

// ---------------------------------------------------------------------------
// Scripted connector for tests
// ---------------------------------------------------------------------------
