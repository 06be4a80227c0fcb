//! Session driver.
//!
//! ```text
//! Connecting → AwaitingSchema → Idle → Streaming → Closed
//!      └─────────────┴───────────┴─────────┴─────→ Terminated
//! ```
//!
//! A reader task moves inbound frames into a bounded FIFO; this task drains
//! it one frame at a time. Each block result is acknowledged before it is
//! processed, so the node keeps its in-flight window full while the store
//! works. Any error ends the session: no further requests are sent, the sink
//! is closed and the error is returned to the caller.

use std::fmt;
use std::sync::Arc;

use shipindex_core::error::IndexerError;
use shipindex_core::store::ChainStore;
use shipindex_core::types::ChainStatus;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::processor::BlockProcessor;
use crate::protocol::{BlocksRequest, Request, ShipProtocol, ShipResult, END_OF_CHAIN};
use crate::transport::{Connector, Frame, FrameSink, FrameSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    AwaitingSchema,
    Idle,
    Streaming,
    /// The node ended the stream and every queued block was committed.
    Closed,
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::AwaitingSchema => "awaiting_schema",
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::Closed => "closed",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Request parameters for the block stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub max_messages_in_flight: u32,
    pub queue_capacity: usize,
    pub irreversible_only: bool,
    pub fetch_deltas: bool,
}

/// How a session that ended cleanly left things.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub state: SessionState,
    pub status: ChainStatus,
    pub blocks_processed: u64,
}

pub struct SessionDriver {
    connector: Arc<dyn Connector>,
    store: Arc<dyn ChainStore>,
    processor: BlockProcessor,
    settings: SessionSettings,
    state: SessionState,
}

impl SessionDriver {
    pub fn new(
        connector: Arc<dyn Connector>,
        store: Arc<dyn ChainStore>,
        processor: BlockProcessor,
        settings: SessionSettings,
    ) -> Self {
        Self {
            connector,
            store,
            processor,
            settings,
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn processor(&self) -> &BlockProcessor {
        &self.processor
    }

    /// Run one session to its end.
    pub async fn run(&mut self) -> Result<SessionSummary, IndexerError> {
        self.transition(SessionState::Connecting);
        let result = match self.connector.connect().await {
            Ok((mut sink, source)) => {
                let result = self.drive(sink.as_mut(), source).await;
                if let Err(e) = sink.close().await {
                    debug!(error = %e, "closing sink");
                }
                result
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.transition(SessionState::Closed);
                Ok(self.summary())
            }
            Err(e) => {
                self.transition(SessionState::Terminated);
                let status = self.processor.status();
                error!(
                    error = %e,
                    category = e.category(),
                    failed_block = ?self.processor.failed_block(),
                    head = status.head,
                    irreversible = status.irreversible,
                    "session terminated"
                );
                Err(e)
            }
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            state: self.state,
            status: self.processor.status(),
            blocks_processed: self.processor.blocks_processed(),
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "session state");
        }
        self.state = next;
    }

    async fn drive(
        &mut self,
        sink: &mut dyn FrameSink,
        mut source: Box<dyn FrameSource>,
    ) -> Result<(), IndexerError> {
        self.transition(SessionState::AwaitingSchema);
        let protocol = match source.next_frame().await? {
            Some(frame) => ShipProtocol::from_abi_json(&handshake_text(frame)?)?,
            None => {
                return Err(IndexerError::Protocol(
                    "connection closed before the protocol abi arrived".into(),
                ))
            }
        };

        let status = self.store.load_status().await?;
        self.processor.resume_from(status);
        let continuity = self.processor.continuity();
        let have_positions = match continuity.resume_range() {
            Some((from, to)) => self.store.block_positions(from, to).await?,
            None => Vec::new(),
        };
        let start_block_num = continuity.start_block();
        info!(
            head = status.head,
            irreversible = status.irreversible,
            start = start_block_num,
            positions = have_positions.len(),
            "requesting blocks"
        );

        send(sink, &protocol, &Request::Status).await?;
        let request = BlocksRequest {
            start_block_num,
            end_block_num: END_OF_CHAIN,
            max_messages_in_flight: self.settings.max_messages_in_flight,
            have_positions,
            irreversible_only: self.settings.irreversible_only,
            fetch_block: true,
            fetch_traces: true,
            fetch_deltas: self.settings.fetch_deltas,
        };
        send(sink, &protocol, &Request::Blocks(request)).await?;
        self.transition(SessionState::Idle);

        let (tx, mut rx) = mpsc::channel(self.settings.queue_capacity.max(1));
        let reader = tokio::spawn(read_frames(source, tx));
        let result = self.drain(sink, &protocol, &mut rx).await;
        reader.abort();
        result
    }

    async fn drain(
        &mut self,
        sink: &mut dyn FrameSink,
        protocol: &ShipProtocol,
        rx: &mut mpsc::Receiver<Result<Frame, IndexerError>>,
    ) -> Result<(), IndexerError> {
        while let Some(item) = rx.recv().await {
            let bytes = match item? {
                Frame::Binary(bytes) => bytes,
                Frame::Text(_) => {
                    return Err(IndexerError::Protocol(
                        "unexpected text frame after handshake".into(),
                    ))
                }
            };
            match protocol.decode_result(&bytes)? {
                ShipResult::Status(status) => info!(
                    head = status.head.block_num,
                    irreversible = status.last_irreversible.block_num,
                    trace_begin = status.trace_begin_block,
                    trace_end = status.trace_end_block,
                    "node status"
                ),
                ShipResult::Blocks(result) => {
                    if self.state == SessionState::Idle {
                        self.transition(SessionState::Streaming);
                    }
                    send(sink, protocol, &Request::Ack { num_messages: 1 }).await?;
                    self.processor.process(protocol, result).await?;
                }
            }
        }
        Ok(())
    }
}

async fn send(sink: &mut dyn FrameSink, protocol: &ShipProtocol, request: &Request) -> Result<(), IndexerError> {
    let bytes = protocol.encode_request(request)?;
    debug!(request = request.tag(), len = bytes.len(), "send");
    sink.send(bytes).await
}

fn handshake_text(frame: Frame) -> Result<String, IndexerError> {
    match frame {
        Frame::Text(text) => Ok(text),
        Frame::Binary(bytes) => String::from_utf8(bytes)
            .map_err(|_| IndexerError::Protocol("protocol abi frame is not utf-8".into())),
    }
}

async fn read_frames(mut source: Box<dyn FrameSource>, tx: mpsc::Sender<Result<Frame, IndexerError>>) {
    loop {
        match source.next_frame().await {
            Ok(Some(frame)) => {
                if tx.send(Ok(frame)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }
    debug!("frame reader finished");
}
