//! Arena Probe CLI Tool
//!
//! Mints test tokens and plays complete matches against a running server
//! with simulated clients.
//!
//! Usage:
//!   cargo run --bin arena-probe -- token --user-id 7
//!   cargo run --bin arena-probe -- play --addr 127.0.0.1:3002 --players 10
//!   cargo run --bin arena-probe -- play --mode paid --stake 25

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};
use social_arena::auth::{issue_token, DEFAULT_JWT_SECRET};
use social_arena::transport::handshake::{
    client_upgrade_request, find_head_end, generate_client_key, response_status, MAX_HEAD_LEN,
};
use social_arena::transport::{
    encode_masked_close_frame, encode_masked_text_frame, parse_server_frame, FrameParse,
};
use social_arena::types::{Match, RoundType, ServerEvent, UserId, PLAYERS_PER_MATCH};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "arena-probe")]
#[command(about = "Token minting and simulated match play for the social arena server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// HS256 secret shared with the server
    #[arg(long, default_value = DEFAULT_JWT_SECRET, global = true)]
    secret: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a signed token for a user
    Token {
        #[arg(short, long)]
        user_id: UserId,
        /// Lifetime in seconds
        #[arg(short, long, default_value = "3600")]
        ttl: u64,
    },
    /// Connect simulated players, queue them, and play until the match ends
    Play(PlayArgs),
}

#[derive(Args)]
struct PlayArgs {
    /// WebSocket listener address
    #[arg(short, long, default_value = "127.0.0.1:3002")]
    addr: String,
    #[arg(long, default_value = "/ws/match")]
    path: String,
    #[arg(short, long, default_value_t = PLAYERS_PER_MATCH)]
    players: usize,
    /// User id of the first simulated player; the rest follow
    #[arg(long, default_value = "1000")]
    first_user_id: UserId,
    #[arg(short, long, default_value = "free")]
    mode: String,
    #[arg(short, long)]
    stake: Option<f64>,
    /// Give up after this many seconds
    #[arg(long, default_value = "60")]
    timeout_secs: u64,
}

/// One simulated player speaking the framed JSON protocol
struct ProbeClient {
    user_id: UserId,
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl ProbeClient {
    async fn connect(addr: &str, path: &str, user_id: UserId, token: &str) -> Result<Self> {
        let mut stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to connect to {}", addr))?;

        let key = generate_client_key();
        let target = format!("{}?token={}", path, token);
        stream
            .write_all(client_upgrade_request(addr, &target, &key).as_bytes())
            .await?;

        let mut buffer = Vec::new();
        let mut chunk = [0u8; 1024];
        let head_end = loop {
            if let Some(end) = find_head_end(&buffer) {
                break end;
            }
            if buffer.len() > MAX_HEAD_LEN {
                bail!("Upgrade response head too large");
            }
            let read = stream.read(&mut chunk).await?;
            if read == 0 {
                bail!("Server closed the connection during the upgrade");
            }
            buffer.extend_from_slice(&chunk[..read]);
        };

        let head = String::from_utf8_lossy(&buffer[..head_end]).into_owned();
        match response_status(&head) {
            Some(101) => {}
            Some(status) => bail!("Upgrade for user {} rejected with {}", user_id, status),
            None => bail!("Malformed upgrade response"),
        }

        Ok(Self {
            user_id,
            stream,
            buffer: buffer[head_end..].to_vec(),
        })
    }

    async fn send(&mut self, event: &str, payload: Value) -> Result<()> {
        let text = json!({ "event": event, "payload": payload }).to_string();
        let frame = encode_masked_text_frame(&text, rand::random())?;
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<ServerEvent>> {
        let mut chunk = [0u8; 4096];
        loop {
            match parse_server_frame(&self.buffer)? {
                FrameParse::Text { payload, consumed } => {
                    self.buffer.drain(..consumed);
                    let event = serde_json::from_str(&payload)
                        .with_context(|| format!("Unexpected event payload: {}", payload))?;
                    return Ok(Some(event));
                }
                FrameParse::Close => return Ok(None),
                FrameParse::Incomplete => {}
            }

            let read = self.stream.read(&mut chunk).await?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }

    async fn close(mut self) {
        let frame = encode_masked_close_frame(rand::random());
        if let Err(e) = self.stream.write_all(&frame).await {
            debug!("Close frame for user {} not sent: {}", self.user_id, e);
        }
    }
}

/// A valid, randomly chosen answer for the current round
fn pick_answer(game: &Match, round_number: u32, voter: UserId) -> Option<Value> {
    let round = game.rounds.get(round_number.checked_sub(1)? as usize)?;
    let mut rng = rand::thread_rng();
    Some(match round.round_type {
        RoundType::Logic | RoundType::GroupVoting => json!(rng.gen_range(0..=3)),
        RoundType::PersonalChoice => json!(if rng.gen_bool(0.5) { "A" } else { "B" }),
        RoundType::SocialVoting => {
            let others: Vec<UserId> = game
                .player_ids
                .iter()
                .copied()
                .filter(|&id| id != voter)
                .collect();
            json!(others.choose(&mut rng)?)
        }
    })
}

/// Queue one player and answer every round until the match result arrives
async fn play_one(mut client: ProbeClient, join_payload: Value) -> Result<()> {
    let user_id = client.user_id;
    client.send("joinQueue", join_payload).await?;

    let mut game: Option<Match> = None;
    let mut answered_round = 0;

    while let Some(event) = client.next_event().await? {
        match event {
            ServerEvent::JoinQueue(outcome) => {
                info!(
                    "user {} queued ({} waiting, {} needed)",
                    user_id,
                    outcome.queued_players.unwrap_or_default(),
                    outcome.players_needed.unwrap_or_default()
                );
            }
            ServerEvent::MatchFound { matched } => {
                info!("user {} matched into {}", user_id, matched.id);
                game = Some(matched);
            }
            ServerEvent::RoundState(state) => {
                let Some(game) = &game else { continue };
                if state.round_number > answered_round {
                    if let Some(answer) = pick_answer(game, state.round_number, user_id) {
                        debug!(
                            "user {} answers round {} ({}) with {}",
                            user_id, state.round_number, state.round_type, answer
                        );
                        answered_round = state.round_number;
                        client
                            .send(
                                "submitAnswer",
                                json!({ "matchId": state.match_id, "answer": answer }),
                            )
                            .await?;
                    }
                }
            }
            ServerEvent::RoundResult(result) => {
                // Lowest id reports for the whole group
                if result.scores.keys().next() == Some(&user_id) {
                    info!(
                        "round {} ({}) resolved: {:?}",
                        result.round_number, result.round_type, result.details
                    );
                }
            }
            ServerEvent::MatchResult(result) => {
                if result.winners.contains(&user_id) {
                    info!(
                        "🏆 user {} won match {} with {} points",
                        user_id,
                        result.match_id,
                        result.scores.get(&user_id).copied().unwrap_or_default()
                    );
                }
                client.close().await;
                return Ok(());
            }
            ServerEvent::ChatMessage(chat) => {
                debug!("chat from {}: {}", chat.from_user_id, chat.message);
            }
            ServerEvent::Error { message } => {
                warn!("user {} received error: {}", user_id, message);
            }
        }
    }

    Err(anyhow!("Connection for user {} closed before the match ended", user_id))
}

async fn run_play(secret: &str, args: PlayArgs) -> Result<()> {
    let PlayArgs {
        addr,
        path,
        players,
        first_user_id,
        mode,
        stake,
        timeout_secs,
    } = args;

    if players == 0 {
        bail!("--players must be positive");
    }

    let mut join_payload = json!({ "mode": mode });
    if let Some(stake) = stake {
        join_payload["stakeAmount"] = json!(stake);
    }

    info!(
        "Connecting {} players to {}{} (mode {})",
        players, addr, path, mode
    );

    let mut clients = Vec::with_capacity(players);
    for offset in 0..players as u64 {
        let user_id = first_user_id + offset;
        let token = issue_token(secret, user_id, 3600)?;
        clients.push(ProbeClient::connect(&addr, &path, user_id, &token).await?);
    }

    let handles: Vec<_> = clients
        .into_iter()
        .map(|client| tokio::spawn(play_one(client, join_payload.clone())))
        .collect();

    let all = join_players(handles);
    match timeout(Duration::from_secs(timeout_secs), all).await {
        Ok(results) => {
            let failures = results.iter().filter(|r| r.is_err()).count();
            for result in results.into_iter().filter_map(|r| r.err()) {
                error!("{}", result);
            }
            if failures > 0 {
                bail!("{} of {} players did not finish", failures, players);
            }
            info!("✅ Match played to completion");
            Ok(())
        }
        Err(_) => bail!(
            "Timed out after {}s; with fewer than {} players the match never forms",
            timeout_secs,
            PLAYERS_PER_MATCH
        ),
    }
}

/// Await every player task, flattening join errors
async fn join_players(handles: Vec<tokio::task::JoinHandle<Result<()>>>) -> Vec<Result<()>> {
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(match handle.await {
            Ok(result) => result,
            Err(e) => Err(anyhow!("Player task failed: {}", e)),
        });
    }
    results
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Token { user_id, ttl } => {
            println!("{}", issue_token(&cli.secret, user_id, ttl)?);
            Ok(())
        }
        Commands::Play(args) => run_play(&cli.secret, args).await,
    }
}
