//! # shipindex-stream
//!
//! Drives a state-history session: handshake, block requests with flow
//! control, and strictly ordered processing of each block into the store.
//!
//! - [`SessionDriver`]: the session state machine
//! - [`BlockProcessor`]: one block result to one committed store transaction
//! - [`ShipProtocol`]: request/result messages over the node's protocol ABI
//! - [`transport`]: WebSocket and in-process frame transports
//! - [`SessionBuilder`]: fluent construction from [`IndexerConfig`](shipindex_core::IndexerConfig)

pub mod builder;
pub mod compression;
pub mod processor;
pub mod protocol;
pub mod session;
pub mod transport;

pub use builder::SessionBuilder;
pub use processor::{BlockOutcome, BlockProcessor, ProcessorOptions};
pub use protocol::{BlocksRequest, BlocksResult, Request, ShipProtocol, ShipResult, StatusResult};
pub use session::{SessionDriver, SessionState, SessionSummary};
pub use transport::{channel_transport, ChannelConnector, ChannelPeer, Connector, Frame, WsConnector};
