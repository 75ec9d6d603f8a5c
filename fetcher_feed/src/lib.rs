//!
//! Streaming feed ingestion: from websocket frames to per-pair delivery.
//!
//! Data flow:
//! network frames → `decoder` → `Tick` → `client::StreamClient::ticks` →
//! `router::FanoutRouter` → per-pair queue → delivery worker → `TickStorage`.
//!
//! Modules:
//! - `coinbase`: endpoint, constants and wire shapes of the feed.
//! - `decoder`: frame classification and quote decoding.
//! - `transport`: session seam with websocket and in-process implementations.
//! - `client`: connection/subscription state machine and the read loop.
//! - `router`: fan-out into bounded per-pair queues with delivery workers.
#![warn(missing_docs)]
pub mod client;
pub mod coinbase;
pub mod decoder;
pub mod router;
pub mod transport;

pub use client::{ClientState, ReadStats, StopHandle, StreamClient};
pub use router::{DeadLetter, DeliveryPolicy, FanoutRouter, Overflow, RouterConfig, RouterReport};
pub use transport::{ChannelConnector, Connector, FeedConnection, Frame, WsConnector};
