//! Envelope routing and room fan-out
//!
//! Each decoded text message is one `{event, payload}` envelope. Failures are
//! reported as an `error` event to the originating connection only.

use crate::error::{ArenaError, Result};
use crate::game::MatchEngine;
use crate::matchmaking::MatchmakingQueue;
use crate::transport::registry::{ConnectionId, ConnectionRegistry};
use crate::types::{
    ChatBroadcast, ChatRequest, ClientEnvelope, JoinOutcome, JoinQueueRequest, JoinStatus,
    ServerEvent, SubmitAnswerRequest, SubmitOutcome, UserId,
};
use crate::utils::{char_len, current_timestamp};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default cap on chat message length, in characters
pub const DEFAULT_MAX_CHAT_LENGTH: usize = 500;

/// Routes client envelopes to the queue and the engine
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    queue: Arc<MatchmakingQueue>,
    engine: Arc<MatchEngine>,
    max_chat_length: usize,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        queue: Arc<MatchmakingQueue>,
        engine: Arc<MatchEngine>,
        max_chat_length: usize,
    ) -> Self {
        Self {
            registry,
            queue,
            engine,
            max_chat_length,
        }
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Handle one text message from a connection
    pub async fn handle_message(&self, connection_id: ConnectionId, user_id: UserId, raw: &str) {
        if let Err(e) = self.route(connection_id, user_id, raw).await {
            if e.is_caller_error() {
                debug!(
                    "Message from connection {} (user {}) rejected: {}",
                    connection_id, user_id, e
                );
            } else {
                warn!(
                    "Message from connection {} (user {}) failed: {}",
                    connection_id, user_id, e
                );
            }
            self.report_error(connection_id, &e.to_string());
        }
    }

    /// Send an `error` event to one connection
    pub fn report_error(&self, connection_id: ConnectionId, message: &str) {
        if let Err(e) = self.registry.send_to(connection_id, &ServerEvent::error(message)) {
            warn!("Failed to report error to connection {}: {}", connection_id, e);
        }
    }

    async fn route(&self, connection_id: ConnectionId, user_id: UserId, raw: &str) -> Result<()> {
        let envelope: ClientEnvelope = serde_json::from_str(raw)
            .map_err(|_| ArenaError::validation("Invalid message"))?;

        let event = envelope
            .event
            .filter(|event| !event.is_empty())
            .ok_or_else(|| ArenaError::validation("event is required"))?;

        match event.as_str() {
            "joinQueue" => {
                let request: JoinQueueRequest = payload_as(envelope.payload)?;
                self.join_queue(connection_id, user_id, request).await
            }
            "submitAnswer" => {
                let request: SubmitAnswerRequest = payload_as(envelope.payload)?;
                self.submit_answer(connection_id, user_id, request).await
            }
            "chatMessage" => {
                let request: ChatRequest = payload_as(envelope.payload)?;
                self.chat_message(connection_id, user_id, request).await
            }
            other => Err(ArenaError::validation(format!(
                "Unsupported event: {}",
                other
            ))),
        }
    }

    async fn join_queue(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        request: JoinQueueRequest,
    ) -> Result<()> {
        let outcome = self
            .queue
            .join_raw(user_id, request.mode.as_deref(), request.stake_amount.as_ref())
            .await?;

        if outcome.status == JoinStatus::Queued {
            self.registry
                .send_to(connection_id, &ServerEvent::JoinQueue(outcome))?;
            return Ok(());
        }

        self.publish_join_outcome(&outcome)
    }

    /// Subscribe a new match's participants and announce it to the room
    pub fn publish_join_outcome(&self, outcome: &JoinOutcome) -> Result<()> {
        let Some(game) = &outcome.matched else {
            return Ok(());
        };

        let subscribed = self.registry.subscribe_users(&game.id, &game.player_ids)?;
        debug!("Match {} room opened with {} connections", game.id, subscribed);

        self.registry.broadcast(
            &game.id,
            &ServerEvent::MatchFound {
                matched: game.clone(),
            },
        )?;
        if let Some(state) = game.round_state() {
            self.registry
                .broadcast(&game.id, &ServerEvent::RoundState(state))?;
        }
        Ok(())
    }

    async fn submit_answer(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        request: SubmitAnswerRequest,
    ) -> Result<()> {
        let match_id = required_match_id(request.match_id)?;
        let answer = request.answer.unwrap_or(Value::Null);

        let outcome = self.engine.submit_answer(&match_id, user_id, &answer).await?;

        self.registry.subscribe_connection(&match_id, connection_id)?;
        self.publish_submit_outcome(&outcome)
    }

    /// Broadcast progress and any results produced by an accepted answer
    pub fn publish_submit_outcome(&self, outcome: &SubmitOutcome) -> Result<()> {
        let match_id = &outcome.game.id;

        if let Some(state) = outcome.game.round_state() {
            self.registry
                .broadcast(match_id, &ServerEvent::RoundState(state))?;
        }
        if let Some(result) = &outcome.round_result {
            self.registry
                .broadcast(match_id, &ServerEvent::RoundResult(result.clone()))?;
        }
        if let Some(result) = &outcome.match_result {
            self.registry
                .broadcast(match_id, &ServerEvent::MatchResult(result.clone()))?;
        }
        Ok(())
    }

    async fn chat_message(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        request: ChatRequest,
    ) -> Result<()> {
        let match_id = required_match_id(request.match_id)?;

        let text = request.message.unwrap_or_default().trim().to_string();
        if text.is_empty() {
            return Err(ArenaError::validation("message is required"));
        }
        if char_len(&text) > self.max_chat_length {
            return Err(ArenaError::validation("message is too long"));
        }

        let game = self.engine.get_match(&match_id).await?;
        if !game.is_participant(user_id) {
            return Err(ArenaError::unauthorized(
                "Chat is allowed only for match participants",
            ));
        }

        self.registry.subscribe_connection(&match_id, connection_id)?;
        self.registry.broadcast(
            &match_id,
            &ServerEvent::ChatMessage(ChatBroadcast {
                match_id: match_id.clone(),
                from_user_id: user_id,
                message: text,
                created_at: current_timestamp(),
            }),
        )?;
        Ok(())
    }
}

fn payload_as<T: DeserializeOwned + Default>(payload: Value) -> Result<T> {
    if payload.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(payload).map_err(|e| ArenaError::validation(format!("Invalid payload: {}", e)))
}

fn required_match_id(match_id: Option<String>) -> Result<String> {
    match_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ArenaError::validation("matchId is required"))
}
