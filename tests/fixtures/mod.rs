//! Shared fixtures for integration and load tests
//!
//! An in-memory engine stack, a fake RESP server on a real socket, and a
//! minimal WebSocket client built on the crate's own framing helpers.

#![allow(dead_code)]

use serde_json::{json, Value};
use social_arena::auth::issue_token;
use social_arena::game::MatchEngine;
use social_arena::matchmaking::MatchmakingQueue;
use social_arena::store::{InMemoryRespStore, MatchStore};
use social_arena::transport::handshake::{
    client_upgrade_request, find_head_end, generate_client_key, response_status,
};
use social_arena::transport::{encode_masked_text_frame, parse_server_frame, FrameParse};
use social_arena::types::{Match, RoundType, ServerEvent, UserId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const TEST_SECRET: &str = "integration-test-secret";
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn players() -> Vec<UserId> {
    (1..=10).collect()
}

pub fn token_for(user_id: UserId) -> String {
    issue_token(TEST_SECRET, user_id, 3600).expect("token")
}

/// Engine stack over an in-memory store
pub struct TestSystem {
    pub backend: Arc<InMemoryRespStore>,
    pub store: Arc<MatchStore>,
    pub engine: Arc<MatchEngine>,
    pub queue: Arc<MatchmakingQueue>,
}

pub fn create_test_system() -> TestSystem {
    let backend = Arc::new(InMemoryRespStore::new());
    let store = Arc::new(MatchStore::new(backend.clone(), "it:match:"));
    let engine = Arc::new(MatchEngine::new(store.clone()));
    let queue = Arc::new(MatchmakingQueue::new(engine.clone(), 10));
    TestSystem {
        backend,
        store,
        engine,
        queue,
    }
}

/// An answer that earns points in the current round
pub fn scoring_answer(game: &Match, voter: UserId) -> Value {
    answer_for_round(game, game.current_round_index, voter)
}

/// An answer that earns points in the given round
///
/// Group voting answers `1` so everyone lands on the plurality option.
/// Social voting nominates the first player, who nominates the second.
pub fn answer_for_round(game: &Match, round_index: usize, voter: UserId) -> Value {
    let round = &game.rounds[round_index];
    match round.round_type {
        RoundType::Logic => json!(round.details.correct_option),
        RoundType::GroupVoting => json!(1),
        RoundType::PersonalChoice => json!(round.details.beneficial_choice),
        RoundType::SocialVoting => {
            let first = game.player_ids[0];
            json!(if voter == first { game.player_ids[1] } else { first })
        }
    }
}

/// RESP server answering PING, GET and SET from a shared map
pub struct FakeRespServer {
    pub addr: SocketAddr,
    values: Arc<Mutex<HashMap<String, String>>>,
    task: JoinHandle<()>,
}

impl FakeRespServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let values = Arc::new(Mutex::new(HashMap::new()));

        let shared = values.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let values = shared.clone();
                tokio::spawn(serve_command(stream, values));
            }
        });

        Self { addr, values, task }
    }

    pub fn url(&self) -> String {
        format!("redis://{}", self.addr)
    }

    pub fn stored_keys(&self) -> Vec<String> {
        self.values.lock().unwrap().keys().cloned().collect()
    }
}

impl Drop for FakeRespServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_command(mut stream: TcpStream, values: Arc<Mutex<HashMap<String, String>>>) {
    let mut request = Vec::new();
    if stream.read_to_end(&mut request).await.is_err() {
        return;
    }

    let reply = match parse_resp_array(&request).as_deref() {
        Some([cmd]) if cmd == "PING" => "+PONG\r\n".to_string(),
        Some([cmd, key]) if cmd == "GET" => match values.lock().unwrap().get(key) {
            Some(value) => format!("${}\r\n{}\r\n", value.len(), value),
            None => "$-1\r\n".to_string(),
        },
        Some([cmd, key, value]) if cmd == "SET" => {
            values.lock().unwrap().insert(key.clone(), value.clone());
            "+OK\r\n".to_string()
        }
        _ => "-ERR unknown command\r\n".to_string(),
    };

    let _ = stream.write_all(reply.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Parse `*N\r\n($len\r\n<bytes>\r\n)*`
fn parse_resp_array(raw: &[u8]) -> Option<Vec<String>> {
    fn line(raw: &[u8], at: usize) -> Option<(&str, usize)> {
        let end = raw[at..].windows(2).position(|w| w == b"\r\n")? + at;
        Some((std::str::from_utf8(&raw[at..end]).ok()?, end + 2))
    }

    let (header, mut at) = line(raw, 0)?;
    let count: usize = header.strip_prefix('*')?.parse().ok()?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let (len_line, next) = line(raw, at)?;
        let len: usize = len_line.strip_prefix('$')?.parse().ok()?;
        let body = raw.get(next..next + len)?;
        args.push(String::from_utf8(body.to_vec()).ok()?);
        at = next + len + 2;
    }
    Some(args)
}

/// Client side of one WebSocket connection
pub struct WsTestClient {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl WsTestClient {
    /// Connect and upgrade; `Err` carries the HTTP status of a rejection
    pub async fn connect(addr: SocketAddr, target: &str) -> Result<Self, u16> {
        let mut stream = TcpStream::connect(addr).await.map_err(|_| 0u16)?;
        let key = generate_client_key();
        let request = client_upgrade_request(&addr.to_string(), target, &key);
        stream.write_all(request.as_bytes()).await.map_err(|_| 0u16)?;

        let mut buffer = Vec::new();
        let mut chunk = [0u8; 1024];
        let head_end = loop {
            if let Some(end) = find_head_end(&buffer) {
                break end;
            }
            let read = tokio::time::timeout(EVENT_TIMEOUT, stream.read(&mut chunk))
                .await
                .map_err(|_| 0u16)?
                .map_err(|_| 0u16)?;
            if read == 0 {
                return Err(0);
            }
            buffer.extend_from_slice(&chunk[..read]);
        };

        let head = String::from_utf8_lossy(&buffer[..head_end]).to_string();
        match response_status(&head) {
            Some(101) => Ok(Self {
                stream,
                buffer: buffer[head_end..].to_vec(),
            }),
            Some(status) => Err(status),
            None => Err(0),
        }
    }

    pub async fn connect_as(addr: SocketAddr, path: &str, user_id: UserId) -> Self {
        let target = format!("{}?token={}", path, token_for(user_id));
        Self::connect(addr, &target)
            .await
            .unwrap_or_else(|status| panic!("upgrade rejected with {}", status))
    }

    pub async fn send(&mut self, event: &str, payload: Value) {
        let text = json!({ "event": event, "payload": payload }).to_string();
        self.send_text(&text).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        let mask: [u8; 4] = rand::random();
        let frame = encode_masked_text_frame(text, mask).expect("frame");
        self.stream.write_all(&frame).await.expect("write");
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write");
    }

    /// Next server event, or `None` when the server closed the connection
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        let mut chunk = [0u8; 4096];
        loop {
            match parse_server_frame(&self.buffer).expect("server frame") {
                FrameParse::Text { payload, consumed } => {
                    self.buffer.drain(..consumed);
                    return Some(serde_json::from_str(&payload).expect("event json"));
                }
                FrameParse::Close => return None,
                FrameParse::Incomplete => {}
            }

            let read = tokio::time::timeout(EVENT_TIMEOUT, self.stream.read(&mut chunk))
                .await
                .expect("timed out waiting for event")
                .ok()?;
            if read == 0 {
                return None;
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }

    /// Skip events until one with the given wire name arrives
    pub async fn expect_event(&mut self, name: &str) -> ServerEvent {
        loop {
            let event = self
                .next_event()
                .await
                .unwrap_or_else(|| panic!("connection closed before {}", name));
            if event.name() == name {
                return event;
            }
        }
    }
}
