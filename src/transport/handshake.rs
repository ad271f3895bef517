//! Upgrade handshake: request head parsing and canned responses

use crate::auth::bearer_token;
use crate::error::{ArenaError, Result};
use axum::extract::Query;
use axum::http::Uri;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::RngCore;
use sha1::{Digest, Sha1};
use std::collections::HashMap;

/// Fixed GUID appended to the client key before hashing
pub const HANDSHAKE_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on a request head before the connection is dropped
pub const MAX_HEAD_LEN: usize = 8 * 1024;

/// Parsed request line and headers of an upgrade request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub method: String,
    pub target: String,
    headers: HashMap<String, String>,
}

impl UpgradeRequest {
    pub fn parse(head: &str) -> Result<Self> {
        let mut lines = head.split("\r\n");
        let request_line = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| ArenaError::protocol("Missing request line"))?;

        let mut parts = request_line.split_whitespace();
        let (method, target) = match (parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(target), Some(version)) if version.starts_with("HTTP/") => {
                (method.to_string(), target.to_string())
            }
            _ => return Err(ArenaError::protocol("Malformed request line")),
        };

        let mut headers = HashMap::new();
        for line in lines.take_while(|line| !line.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ArenaError::protocol("Malformed header line"))?;
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        Ok(Self {
            method,
            target,
            headers,
        })
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }

    /// First value of a query parameter, percent-decoded
    pub fn query_param(&self, name: &str) -> Option<String> {
        let uri: Uri = self.target.parse().ok()?;
        let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(&uri).ok()?;
        pairs
            .into_iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Bearer credential from the `token` query parameter, else the Authorization header
    pub fn credential(&self) -> Option<String> {
        self.query_param("token")
            .filter(|token| !token.is_empty())
            .or_else(|| {
                self.header("authorization")
                    .and_then(bearer_token)
                    .map(str::to_string)
            })
    }

    pub fn websocket_key(&self) -> Option<&str> {
        self.header("sec-websocket-key").filter(|key| !key.is_empty())
    }
}

/// Position just past the blank line ending the request head
pub fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// Acceptance digest for a client handshake key
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(HANDSHAKE_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

pub fn switching_protocols_response(client_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(client_key)
    )
}

/// Plain-text rejection that asks the client to close
pub fn error_response(status: u16, reason: &str) -> String {
    let body = format!("{}\n", reason);
    format!(
        "HTTP/1.1 {} {}\r\nConnection: close\r\nContent-Length: {}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    )
}

/// Random client handshake key
pub fn generate_client_key() -> String {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    STANDARD.encode(nonce)
}

/// Client-side upgrade request for `target` (path plus query)
pub fn client_upgrade_request(host: &str, target: &str, client_key: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n\r\n",
        target, host, client_key
    )
}

/// Status code of a response head, e.g. `101`
pub fn response_status(head: &str) -> Option<u16> {
    head.lines().next()?.split_whitespace().nth(1)?.parse().ok()
}
