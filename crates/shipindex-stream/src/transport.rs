//! Frame transport to the state-history node.
//!
//! A [`Connector`] opens one duplex session split into a [`FrameSink`] (the
//! driver's requests) and a [`FrameSource`] (the node's frames), so the
//! source can be moved into a reader task while the driver keeps the sink.
//!
//! Implementations:
//! - [`WsConnector`]: WebSocket via `tokio-tungstenite`
//! - [`ChannelConnector`]: in-process pair, driven by a [`ChannelPeer`]

use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use shipindex_core::error::IndexerError;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

/// One inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, bytes: Vec<u8>) -> Result<(), IndexerError>;

    async fn close(&mut self) -> Result<(), IndexerError>;
}

#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` once the node closed the session.
    async fn next_frame(&mut self) -> Result<Option<Frame>, IndexerError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), IndexerError>;
}

fn transport_err(e: impl ToString) -> IndexerError {
    IndexerError::Transport(e.to_string())
}

// ─── WebSocket ────────────────────────────────────────────────────────────────

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// `url` is `ws://` or `wss://`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), IndexerError> {
        info!(url = %self.url, "connecting to state-history node");
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| IndexerError::Transport(format!("connect {}: {e}", self.url)))?;
        let (write, read) = ws.split();
        Ok((Box::new(WsSink { write }), Box::new(WsSource { read })))
    }
}

struct WsSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, bytes: Vec<u8>) -> Result<(), IndexerError> {
        self.write.send(Message::Binary(bytes)).await.map_err(transport_err)
    }

    async fn close(&mut self) -> Result<(), IndexerError> {
        self.write.close().await.map_err(transport_err)
    }
}

struct WsSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, IndexerError> {
        while let Some(msg) = self.read.next().await {
            match msg.map_err(transport_err)? {
                Message::Text(text) => return Ok(Some(Frame::Text(text))),
                Message::Binary(bytes) => return Ok(Some(Frame::Binary(bytes))),
                Message::Close(reason) => {
                    info!(?reason, "state-history node closed the connection");
                    return Ok(None);
                }
                // pongs are queued by tungstenite and flushed with the next ack
                other => debug!(kind = ?other, "control frame"),
            }
        }
        Ok(None)
    }
}

// ─── In-process channel ───────────────────────────────────────────────────────

/// Hands out one in-process session. A second `connect` fails.
pub struct ChannelConnector {
    session: Mutex<Option<(ChannelSink, ChannelSource)>>,
}

/// The node's end of a [`ChannelConnector`] session.
pub struct ChannelPeer {
    to_client: Option<mpsc::UnboundedSender<Frame>>,
    from_client: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// A connected in-process pair.
pub fn channel_transport() -> (ChannelConnector, ChannelPeer) {
    let (to_client, inbound) = mpsc::unbounded_channel();
    let (outbound, from_client) = mpsc::unbounded_channel();
    let connector = ChannelConnector {
        session: Mutex::new(Some((
            ChannelSink {
                outbound: Some(outbound),
            },
            ChannelSource { inbound },
        ))),
    };
    let peer = ChannelPeer {
        to_client: Some(to_client),
        from_client,
    };
    (connector, peer)
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), IndexerError> {
        let taken = self
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let (sink, source) =
            taken.ok_or_else(|| IndexerError::Transport("channel session already used".into()))?;
        Ok((Box::new(sink), Box::new(source)))
    }
}

struct ChannelSink {
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, bytes: Vec<u8>) -> Result<(), IndexerError> {
        let tx = self
            .outbound
            .as_ref()
            .ok_or_else(|| IndexerError::Transport("sink closed".into()))?;
        tx.send(bytes)
            .map_err(|_| IndexerError::Transport("peer went away".into()))
    }

    async fn close(&mut self) -> Result<(), IndexerError> {
        self.outbound = None;
        Ok(())
    }
}

struct ChannelSource {
    inbound: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, IndexerError> {
        Ok(self.inbound.recv().await)
    }
}

impl ChannelPeer {
    pub fn send_text(&self, text: impl Into<String>) {
        self.push(Frame::Text(text.into()));
    }

    pub fn send_binary(&self, bytes: Vec<u8>) {
        self.push(Frame::Binary(bytes));
    }

    fn push(&self, frame: Frame) {
        if let Some(tx) = &self.to_client {
            // a closed client simply misses the frame
            let _ = tx.send(frame);
        }
    }

    /// End the session from the node's side once queued frames are read.
    pub fn close(&mut self) {
        self.to_client = None;
    }

    /// Next request the client sent, `None` once it closed its sink.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.from_client.recv().await
    }

    /// Requests already sent, without waiting.
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Ok(bytes) = self.from_client.try_recv() {
            out.push(bytes);
        }
        out
    }
}
