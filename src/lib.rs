//! Social Arena - real-time ten-player social matches
//!
//! A hand-rolled WebSocket transport, a matchmaking queue, the five-round
//! match state machine, and a RESP-backed match store with an in-process
//! cache.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod game;
pub mod matchmaking;
pub mod metrics;
pub mod service;
pub mod store;
pub mod transport;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use error::{ArenaError, ErrorKind, Result};
pub use types::*;

// Re-export key components
pub use game::{MatchEngine, MatchOrigin};
pub use matchmaking::{MatchmakingQueue, PoolKey};
pub use store::{CommandTransport, InMemoryRespStore, MatchStore, TcpRespClient};
pub use transport::{ConnectionRegistry, Dispatcher, WsServer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
