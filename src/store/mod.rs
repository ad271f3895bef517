//! Persistence for match records
//!
//! A minimal RESP codec over per-request sockets, and the cache-first match
//! store built on top of it.

pub mod client;
pub mod match_store;
pub mod resp;

pub use client::{CommandTransport, InMemoryRespStore, StoreEndpoint, TcpRespClient};
pub use match_store::{MatchStore, DEFAULT_KEY_PREFIX};
pub use resp::{decode_reply, encode_command, RespReply};
