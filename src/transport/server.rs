//! WebSocket listener
//!
//! One task per accepted stream performs the handshake and then reads frames.
//! A paired writer task drains the connection's outbound channel, and every
//! decoded message is handled on its own task.

use crate::auth::IdentityVerifier;
use crate::error::{ArenaError, Result};
use crate::metrics::MetricsCollector;
use crate::transport::dispatcher::Dispatcher;
use crate::transport::frame::{parse_client_frame, parse_frame_header, FrameParse};
use crate::transport::handshake::{
    error_response, find_head_end, switching_protocols_response, UpgradeRequest, MAX_HEAD_LEN,
};
use crate::transport::registry::{ConnectionId, Outbound};
use crate::types::UserId;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Time allowed for a client to send its full upgrade request
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const READ_CHUNK: usize = 4096;

/// Receive buffer that can skip the unread tail of a rejected frame
#[derive(Debug, Default)]
struct InboundBuffer {
    bytes: Vec<u8>,
    skip: usize,
}

impl InboundBuffer {
    fn push(&mut self, chunk: &[u8]) {
        let skipped = self.skip.min(chunk.len());
        self.skip -= skipped;
        self.bytes.extend_from_slice(&chunk[skipped..]);
    }

    fn consume(&mut self, len: usize) {
        self.bytes.drain(..len);
    }

    /// Drop a whole frame, including any part still to arrive
    fn discard_frame(&mut self, frame_len: usize) {
        if frame_len <= self.bytes.len() {
            self.bytes.drain(..frame_len);
        } else {
            self.skip = frame_len - self.bytes.len();
            self.bytes.clear();
        }
    }
}

/// Accepts upgrade requests and runs connections
pub struct WsServer {
    path_prefix: String,
    verifier: Arc<dyn IdentityVerifier>,
    dispatcher: Arc<Dispatcher>,
    metrics_collector: Arc<MetricsCollector>,
}

impl WsServer {
    pub fn new(
        path_prefix: impl Into<String>,
        verifier: Arc<dyn IdentityVerifier>,
        dispatcher: Arc<Dispatcher>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            verifier,
            dispatcher,
            metrics_collector,
        }
    }

    /// Accept connections until the shutdown signal flips to `true`
    pub async fn run(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        match listener.local_addr() {
            Ok(addr) => info!("WebSocket listener on {}{}", addr, self.path_prefix),
            Err(e) => warn!("WebSocket listener address unavailable: {}", e),
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = self.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            server.handle_stream(stream, peer, shutdown).await;
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let closed = self.dispatcher.registry().close_all();
        info!("WebSocket listener stopped, closing {} connections", closed);
    }

    async fn handle_stream(
        &self,
        mut stream: TcpStream,
        peer: SocketAddr,
        shutdown: watch::Receiver<bool>,
    ) {
        let (user_id, leftover) = match self.handshake(&mut stream, peer).await {
            Ok(Some(accepted)) => accepted,
            Ok(None) => return,
            Err(e) => {
                debug!("Handshake with {} failed: {}", peer, e);
                return;
            }
        };

        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();

        let registry = self.dispatcher.registry();
        let connection_id = match registry.register(user_id, tx) {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to register connection from {}: {}", peer, e);
                return;
            }
        };

        let writer_task = tokio::spawn(write_loop(writer, rx, connection_id));
        self.read_loop(reader, connection_id, user_id, leftover, shutdown)
            .await;

        if let Err(e) = registry.unregister(connection_id) {
            error!("Failed to unregister connection {}: {}", connection_id, e);
        }
        if let Err(e) = writer_task.await {
            warn!("Writer for connection {} ended abnormally: {}", connection_id, e);
        }
    }

    /// Read and answer the upgrade request; `None` when it was rejected
    async fn handshake(
        &self,
        stream: &mut TcpStream,
        peer: SocketAddr,
    ) -> Result<Option<(UserId, Vec<u8>)>> {
        let mut buffer = Vec::with_capacity(1024);
        let mut chunk = [0u8; READ_CHUNK];

        let head_end = loop {
            if let Some(end) = find_head_end(&buffer) {
                break end;
            }
            if buffer.len() > MAX_HEAD_LEN {
                return Err(ArenaError::protocol("Request head too large"));
            }
            let read = timeout(HANDSHAKE_TIMEOUT, stream.read(&mut chunk))
                .await
                .map_err(|_| ArenaError::protocol("Handshake timed out"))?
                .map_err(|e| ArenaError::protocol(format!("Handshake read failed: {}", e)))?;
            if read == 0 {
                return Err(ArenaError::protocol("Connection closed during handshake"));
            }
            buffer.extend_from_slice(&chunk[..read]);
        };

        let head = String::from_utf8_lossy(&buffer[..head_end]).into_owned();
        let leftover = buffer[head_end..].to_vec();

        let request = match UpgradeRequest::parse(&head) {
            Ok(request) => request,
            Err(_) => {
                self.reject(stream, peer, 400, "Bad Request").await;
                return Ok(None);
            }
        };

        if !request.path().starts_with(&self.path_prefix) {
            self.reject(stream, peer, 404, "Not Found").await;
            return Ok(None);
        }

        let user_id = match request.credential().map(|token| self.verifier.verify(&token)) {
            Some(Ok(user_id)) => user_id,
            Some(Err(e)) => {
                debug!("Credential from {} rejected: {}", peer, e);
                self.reject(stream, peer, 401, "Unauthorized").await;
                return Ok(None);
            }
            None => {
                self.reject(stream, peer, 401, "Unauthorized").await;
                return Ok(None);
            }
        };

        let Some(key) = request.websocket_key() else {
            self.reject(stream, peer, 400, "Bad Request").await;
            return Ok(None);
        };

        stream
            .write_all(switching_protocols_response(key).as_bytes())
            .await
            .map_err(|e| ArenaError::protocol(format!("Failed to write upgrade response: {}", e)))?;

        info!("Upgraded connection from {} for user {}", peer, user_id);
        Ok(Some((user_id, leftover)))
    }

    async fn reject(&self, stream: &mut TcpStream, peer: SocketAddr, status: u16, reason: &str) {
        self.metrics_collector.record_upgrade_rejected();
        warn!("WS upgrade from {} rejected: {} {}", peer, status, reason);

        if let Err(e) = stream.write_all(error_response(status, reason).as_bytes()).await {
            debug!("Failed to write rejection to {}: {}", peer, e);
        }
        let _ = stream.shutdown().await;
    }

    async fn read_loop(
        &self,
        mut reader: OwnedReadHalf,
        connection_id: ConnectionId,
        user_id: UserId,
        leftover: Vec<u8>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut chunk = [0u8; READ_CHUNK];
        let mut buffer = InboundBuffer::default();
        buffer.push(&leftover);

        loop {
            if !self.drain_frames(connection_id, user_id, &mut buffer) {
                return;
            }

            tokio::select! {
                read = reader.read(&mut chunk) => match read {
                    Ok(0) => return,
                    Ok(n) => buffer.push(&chunk[..n]),
                    Err(e) => {
                        debug!("Read from connection {} failed: {}", connection_id, e);
                        return;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Dispatch every complete frame in the buffer; `false` once the connection must end
    fn drain_frames(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        buffer: &mut InboundBuffer,
    ) -> bool {
        loop {
            match parse_client_frame(&buffer.bytes) {
                Ok(FrameParse::Text { payload, consumed }) => {
                    buffer.consume(consumed);
                    let dispatcher = self.dispatcher.clone();
                    tokio::spawn(async move {
                        dispatcher
                            .handle_message(connection_id, user_id, &payload)
                            .await;
                    });
                }
                Ok(FrameParse::Incomplete) => return true,
                Ok(FrameParse::Close) => {
                    debug!("Connection {} sent close", connection_id);
                    return false;
                }
                Err(e) => {
                    let reason = e.to_string();
                    warn!("Connection {} sent a bad frame: {}", connection_id, reason);
                    self.metrics_collector.record_frame_rejected(&reason);
                    self.dispatcher.report_error(connection_id, &reason);

                    // Without a known frame end the stream cannot be resynchronized
                    match parse_frame_header(&buffer.bytes) {
                        Ok(Some(header)) => buffer.discard_frame(header.frame_len()),
                        _ => {
                            debug!("Closing connection {} after unbounded frame", connection_id);
                            return false;
                        }
                    }
                }
            }
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    connection_id: ConnectionId,
) {
    while let Some(message) = rx.recv().await {
        match message {
            Outbound::Frame(bytes) => {
                if let Err(e) = writer.write_all(&bytes).await {
                    debug!("Write to connection {} failed: {}", connection_id, e);
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    let _ = writer.shutdown().await;
}
