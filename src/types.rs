//! Common types used throughout the social arena service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity of a user, as issued by the identity collaborator
pub type UserId = u64;

/// Opaque unique identifier of a match
pub type MatchId = String;

/// Every match is played by exactly this many participants
pub const PLAYERS_PER_MATCH: usize = 10;

/// Allowed range for a match duration, in minutes
pub const MIN_DURATION_MINUTES: u32 = 10;
pub const MAX_DURATION_MINUTES: u32 = 20;

/// Round type sequence shared by every match
pub const ROUND_SEQUENCE: [RoundType; 5] = [
    RoundType::Logic,
    RoundType::GroupVoting,
    RoundType::PersonalChoice,
    RoundType::Logic,
    RoundType::SocialVoting,
];

/// Matchmaking mode a player queues for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    Free,
    Paid,
}

impl std::fmt::Display for QueueMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueMode::Free => write!(f, "free"),
            QueueMode::Paid => write!(f, "paid"),
        }
    }
}

/// Kind of a round, which decides answer shape and scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundType {
    Logic,
    GroupVoting,
    PersonalChoice,
    SocialVoting,
}

impl RoundType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundType::Logic => "logic",
            RoundType::GroupVoting => "group_voting",
            RoundType::PersonalChoice => "personal_choice",
            RoundType::SocialVoting => "social_voting",
        }
    }
}

impl std::fmt::Display for RoundType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binary choice offered in a personal choice round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Choice {
    A,
    B,
}

/// A normalized, recorded answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    /// Option index for logic/group voting, or a nominated user for social voting
    Number(u64),
    Choice(Choice),
}

/// Type-specific round configuration and outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_option: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beneficial_choice: Option<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winning_option: Option<u8>,
}

/// One scoring phase of a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    /// 1-based position in the match
    pub round_number: u32,
    #[serde(rename = "type")]
    pub round_type: RoundType,
    pub answers: BTreeMap<UserId, Answer>,
    pub resolved: bool,
    pub details: RoundDetails,
}

/// Authoritative match record, persisted as a whole on every mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: MatchId,
    pub player_ids: Vec<UserId>,
    /// Queue mode for matchmade matches, `None` for administratively created ones
    #[serde(default)]
    pub mode: Option<QueueMode>,
    #[serde(default)]
    pub stake_amount: Option<String>,
    pub duration_minutes: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed: bool,
    pub current_round_index: usize,
    pub scores: BTreeMap<UserId, u32>,
    pub rounds: Vec<Round>,
}

impl Match {
    /// Whether the user is one of the listed participants
    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.player_ids.contains(&user_id)
    }

    /// The round currently accepting answers, if the match is still active
    pub fn current_round(&self) -> Option<&Round> {
        if self.completed {
            return None;
        }
        self.rounds.get(self.current_round_index)
    }

    /// Participants sharing the highest score, in participant order
    pub fn winners(&self) -> Vec<UserId> {
        let best = self.scores.values().copied().max().unwrap_or(0);
        self.player_ids
            .iter()
            .copied()
            .filter(|id| self.scores.get(id).copied().unwrap_or(0) == best)
            .collect()
    }

    /// Progress snapshot of the current round
    pub fn round_state(&self) -> Option<RoundState> {
        self.current_round().map(|round| RoundState {
            match_id: self.id.clone(),
            round_number: round.round_number,
            round_type: round.round_type,
            players_answered: round.answers.len(),
            total_players: self.player_ids.len(),
        })
    }
}

/// Outcome of a join request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinStatus {
    Queued,
    Matched,
}

/// Reply to a queue join, sent back on the `joinQueue` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinOutcome {
    pub status: JoinStatus,
    pub mode: QueueMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stake_amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_players: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub players_needed: Option<usize>,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<Match>,
}

/// Progress of the round currently accepting answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundState {
    pub match_id: MatchId,
    pub round_number: u32,
    #[serde(rename = "type")]
    pub round_type: RoundType,
    pub players_answered: usize,
    pub total_players: usize,
}

/// Published once a round resolves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResult {
    pub match_id: MatchId,
    pub round_number: u32,
    #[serde(rename = "type")]
    pub round_type: RoundType,
    pub details: RoundDetails,
    pub scores: BTreeMap<UserId, u32>,
}

/// Published once the final round resolves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub match_id: MatchId,
    pub winners: Vec<UserId>,
    pub scores: BTreeMap<UserId, u32>,
}

/// Result of a successful answer submission
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOutcome {
    pub game: Match,
    pub round_result: Option<RoundResult>,
    pub match_result: Option<MatchResult>,
}

/// Chat line relayed to a match room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBroadcast {
    pub match_id: MatchId,
    pub from_user_id: UserId,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Envelope sent by clients: `{ "event": ..., "payload": ... }`
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEnvelope {
    pub event: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// `joinQueue` payload
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinQueueRequest {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub stake_amount: Option<serde_json::Value>,
}

/// `submitAnswer` payload
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerRequest {
    #[serde(default)]
    pub match_id: Option<String>,
    #[serde(default)]
    pub answer: Option<serde_json::Value>,
}

/// `chatMessage` payload
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub match_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Events pushed from the server, serialized as `{ "event": ..., "payload": ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum ServerEvent {
    JoinQueue(JoinOutcome),
    MatchFound {
        #[serde(rename = "match")]
        matched: Match,
    },
    RoundState(RoundState),
    RoundResult(RoundResult),
    MatchResult(MatchResult),
    ChatMessage(ChatBroadcast),
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::JoinQueue(_) => "joinQueue",
            ServerEvent::MatchFound { .. } => "matchFound",
            ServerEvent::RoundState(_) => "roundState",
            ServerEvent::RoundResult(_) => "roundResult",
            ServerEvent::MatchResult(_) => "matchResult",
            ServerEvent::ChatMessage(_) => "chatMessage",
            ServerEvent::Error { .. } => "error",
        }
    }
}
