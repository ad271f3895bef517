//! Real-time transport: handshake, framing, connection registry and dispatch

pub mod dispatcher;
pub mod frame;
pub mod handshake;
pub mod registry;
pub mod server;

pub use dispatcher::{Dispatcher, DEFAULT_MAX_CHAT_LENGTH};
pub use frame::{
    encode_masked_close_frame, encode_masked_text_frame, encode_text_frame, parse_client_frame,
    parse_frame_header, parse_server_frame, FrameHeader, FrameParse, MAX_PAYLOAD_LEN,
};
pub use handshake::{accept_key, UpgradeRequest};
pub use registry::{ConnectionId, ConnectionRegistry, Outbound, RegistryStats};
pub use server::WsServer;
