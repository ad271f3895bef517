//! Socket transport for the RESP codec
//!
//! Each command opens its own connection, writes the request, half-closes the
//! write side and reads until the server closes. Any read or connect that stays
//! idle longer than the configured timeout fails the request.

use crate::error::{lock_poisoned, ArenaError, Result};
use crate::store::resp::{decode_reply, encode_command, RespReply};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Default port when the store URL does not name one
pub const DEFAULT_STORE_PORT: u16 = 6379;

/// Host and port of the key/value store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEndpoint {
    pub host: String,
    pub port: u16,
}

impl StoreEndpoint {
    /// Parse `redis://[user:pass@]host[:port][/db]`
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("redis://")
            .ok_or_else(|| ArenaError::validation(format!("Store URL is invalid: {}", url)))?;

        let authority = rest.split('/').next().unwrap_or_default();
        let host_port = authority.rsplit('@').next().unwrap_or_default();

        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    ArenaError::validation(format!("Store URL has an invalid port: {}", url))
                })?;
                (host, port)
            }
            None => (host_port, DEFAULT_STORE_PORT),
        };

        let host = if host.is_empty() { "127.0.0.1" } else { host };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl std::fmt::Display for StoreEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Executes a single store command and returns its decoded reply
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn execute(&self, args: &[&str]) -> Result<RespReply>;
}

/// Transport that opens one TCP connection per command
#[derive(Debug, Clone)]
pub struct TcpRespClient {
    endpoint: StoreEndpoint,
    idle_timeout: Duration,
}

impl TcpRespClient {
    pub fn new(endpoint: StoreEndpoint, idle_timeout: Duration) -> Self {
        Self {
            endpoint,
            idle_timeout,
        }
    }

    pub fn endpoint(&self) -> &StoreEndpoint {
        &self.endpoint
    }
}

#[async_trait]
impl CommandTransport for TcpRespClient {
    async fn execute(&self, args: &[&str]) -> Result<RespReply> {
        let payload = encode_command(args);

        let mut stream = timeout(
            self.idle_timeout,
            TcpStream::connect((self.endpoint.host.as_str(), self.endpoint.port)),
        )
        .await
        .map_err(|_| ArenaError::persistence("Redis request timeout"))?
        .map_err(|e| ArenaError::persistence(format!("Redis connection failed: {}", e)))?;

        debug!(
            "Store command {} sent to {}",
            args.first().copied().unwrap_or_default(),
            self.endpoint
        );

        exchange(&mut stream, &payload, self.idle_timeout).await
    }
}

/// Write a request, half-close, and decode everything read until EOF
pub async fn exchange<S>(stream: &mut S, payload: &[u8], idle_timeout: Duration) -> Result<RespReply>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let io_failed = |e: std::io::Error| ArenaError::persistence(format!("Redis connection failed: {}", e));

    timeout(idle_timeout, stream.write_all(payload))
        .await
        .map_err(|_| ArenaError::persistence("Redis request timeout"))?
        .map_err(io_failed)?;
    timeout(idle_timeout, stream.shutdown())
        .await
        .map_err(|_| ArenaError::persistence("Redis request timeout"))?
        .map_err(io_failed)?;

    let mut response = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let read = timeout(idle_timeout, stream.read(&mut chunk))
            .await
            .map_err(|_| ArenaError::persistence("Redis request timeout"))?
            .map_err(io_failed)?;
        if read == 0 {
            break;
        }
        response.extend_from_slice(&chunk[..read]);
    }

    decode_reply(&response)
}

/// In-process store speaking the same command set, for tests and local runs
#[derive(Debug, Default)]
pub struct InMemoryRespStore {
    values: RwLock<HashMap<String, String>>,
    fail_writes: RwLock<bool>,
}

impl InMemoryRespStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent SET answer with an error reply
    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_writes.write() {
            *flag = fail;
        }
    }

    /// Raw value stored under a key
    pub fn raw_value(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .ok()
            .and_then(|values| values.get(key).cloned())
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.values.read().map(|values| values.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CommandTransport for InMemoryRespStore {
    async fn execute(&self, args: &[&str]) -> Result<RespReply> {
        // Round-trip through the codec so tests exercise the same reply parsing
        let raw: Vec<u8> = match args {
            ["PING"] => b"+PONG\r\n".to_vec(),
            ["GET", key] => {
                let values = self.values.read().map_err(|_| lock_poisoned("store"))?;
                match values.get(*key) {
                    Some(value) => {
                        let mut raw = format!("${}\r\n", value.len()).into_bytes();
                        raw.extend_from_slice(value.as_bytes());
                        raw.extend_from_slice(b"\r\n");
                        raw
                    }
                    None => b"$-1\r\n".to_vec(),
                }
            }
            ["SET", key, value] => {
                let failing = *self.fail_writes.read().map_err(|_| lock_poisoned("store"))?;
                if failing {
                    b"-ERR write refused\r\n".to_vec()
                } else {
                    let mut values = self.values.write().map_err(|_| lock_poisoned("store"))?;
                    values.insert(key.to_string(), value.to_string());
                    b"+OK\r\n".to_vec()
                }
            }
            _ => b"-ERR unknown command\r\n".to_vec(),
        };

        decode_reply(&raw)
    }
}
