//! Match engine: creation, answer submission and round progression
//!
//! Every mutation follows load, validate, mutate, persist. Mutations of the
//! same match are serialized through a per-match async lock so concurrent
//! submissions cannot overwrite each other.

use crate::error::{lock_poisoned, ArenaError, Result};
use crate::game::rounds::{build_rounds, normalize_answer, resolve_current_round};
use crate::metrics::MetricsCollector;
use crate::store::MatchStore;
use crate::types::{
    Match, MatchId, MatchResult, QueueMode, RoundState, SubmitOutcome, UserId,
    MAX_DURATION_MINUTES, MIN_DURATION_MINUTES, PLAYERS_PER_MATCH,
};
use crate::utils::{current_timestamp, generate_match_id};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Where a match came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOrigin {
    /// Filled from a matchmaking pool
    Queue {
        mode: QueueMode,
        stake_amount: Option<String>,
    },
    /// Created directly through the admin API
    Admin,
}

impl MatchOrigin {
    fn label(&self) -> &'static str {
        match self {
            MatchOrigin::Queue { .. } => "queue",
            MatchOrigin::Admin => "admin",
        }
    }
}

/// Counters about engine activity
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub matches_created: u64,
    pub answers_accepted: u64,
    pub answers_rejected: u64,
    pub rounds_resolved: u64,
    pub matches_completed: u64,
}

/// Owns the match state machine on top of the match store
pub struct MatchEngine {
    store: Arc<MatchStore>,
    match_locks: MatchLocks,
    stats: RwLock<EngineStats>,
    metrics_collector: Arc<MetricsCollector>,
}

impl MatchEngine {
    pub fn new(store: Arc<MatchStore>) -> Self {
        Self::with_metrics(store, Arc::new(MetricsCollector::default()))
    }

    pub fn with_metrics(store: Arc<MatchStore>, metrics_collector: Arc<MetricsCollector>) -> Self {
        Self {
            store,
            match_locks: Mutex::new(HashMap::new()),
            stats: RwLock::new(EngineStats::default()),
            metrics_collector,
        }
    }

    pub fn store(&self) -> Arc<MatchStore> {
        self.store.clone()
    }

    /// Validate participants and duration, then persist a fresh match
    pub async fn create_match(
        &self,
        player_ids: &[UserId],
        duration_minutes: Option<u32>,
        origin: MatchOrigin,
    ) -> Result<Match> {
        if player_ids.len() != PLAYERS_PER_MATCH {
            return Err(ArenaError::validation(format!(
                "Match must contain exactly {} players",
                PLAYERS_PER_MATCH
            )));
        }

        let unique: HashSet<UserId> = player_ids.iter().copied().collect();
        if unique.len() != player_ids.len() {
            return Err(ArenaError::validation("Players must be unique"));
        }

        if player_ids.iter().any(|&id| id == 0) {
            return Err(ArenaError::validation(
                "Every playerId must be a positive integer",
            ));
        }

        let duration_minutes = duration_minutes.unwrap_or(MIN_DURATION_MINUTES);
        if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&duration_minutes) {
            return Err(duration_error());
        }

        let (mode, stake_amount) = match &origin {
            MatchOrigin::Queue { mode, stake_amount } => (Some(*mode), stake_amount.clone()),
            MatchOrigin::Admin => (None, None),
        };

        let now = current_timestamp();
        let rounds = build_rounds(&mut rand::thread_rng());
        let game = Match {
            id: generate_match_id(),
            player_ids: player_ids.to_vec(),
            mode,
            stake_amount,
            duration_minutes,
            created_at: now,
            updated_at: now,
            completed: false,
            current_round_index: 0,
            scores: player_ids.iter().map(|&id| (id, 0)).collect(),
            rounds,
        };

        self.store.save(&game).await?;

        self.metrics_collector.record_match_created(origin.label());
        if let Ok(mut stats) = self.stats.write() {
            stats.matches_created += 1;
        }

        info!(
            "Created match {} ({}) with players {:?}",
            game.id,
            origin.label(),
            game.player_ids
        );
        Ok(game)
    }

    pub async fn get_match(&self, match_id: &str) -> Result<Match> {
        self.store.load(match_id).await
    }

    /// Progress of the current round, `None` once the match is completed
    pub async fn round_state(&self, match_id: &str) -> Result<Option<RoundState>> {
        Ok(self.store.load(match_id).await?.round_state())
    }

    /// Record one participant's answer for the current round
    ///
    /// Resolves the round once every participant has answered, and completes
    /// the match after the last round. Nothing is changed when any check or
    /// the final save fails.
    pub async fn submit_answer(
        &self,
        match_id: &str,
        user_id: UserId,
        raw_answer: &Value,
    ) -> Result<SubmitOutcome> {
        let result = self.submit_answer_locked(match_id, user_id, raw_answer).await;

        self.metrics_collector.record_answer(result.is_ok());
        if let Ok(mut stats) = self.stats.write() {
            if result.is_ok() {
                stats.answers_accepted += 1;
            } else {
                stats.answers_rejected += 1;
            }
        }

        if let Err(e) = &result {
            debug!("Answer from {} for match {} rejected: {}", user_id, match_id, e);
        }
        result
    }

    async fn submit_answer_locked(
        &self,
        match_id: &str,
        user_id: UserId,
        raw_answer: &Value,
    ) -> Result<SubmitOutcome> {
        let lease = self.match_lock(match_id)?;
        let _guard = lease.lock.lock().await;
        self.apply_answer(match_id, user_id, raw_answer).await
    }

    async fn apply_answer(
        &self,
        match_id: &str,
        user_id: UserId,
        raw_answer: &Value,
    ) -> Result<SubmitOutcome> {
        let mut game = self.store.load(match_id).await?;

        if game.completed {
            return Err(ArenaError::validation("Match is already completed"));
        }
        if !game.is_participant(user_id) {
            return Err(ArenaError::validation("Player is not part of this match"));
        }

        let round = game
            .rounds
            .get_mut(game.current_round_index)
            .ok_or_else(|| ArenaError::internal("Current round is not available"))?;
        if round.answers.contains_key(&user_id) {
            return Err(ArenaError::validation(
                "Answer for current round is already submitted",
            ));
        }

        let answer = normalize_answer(round.round_type, user_id, raw_answer, &game.player_ids)?;
        round.answers.insert(user_id, answer);

        let mut round_result = None;
        if round.answers.len() == game.player_ids.len() {
            round_result = Some(resolve_current_round(&mut game)?);
        }

        let match_result = if game.completed {
            Some(MatchResult {
                match_id: game.id.clone(),
                winners: game.winners(),
                scores: game.scores.clone(),
            })
        } else {
            None
        };

        game.updated_at = current_timestamp();
        self.store.save(&game).await?;

        if let Some(result) = &round_result {
            info!(
                "Match {} resolved round {} ({})",
                game.id, result.round_number, result.round_type
            );
            self.metrics_collector.record_round_resolved(result.round_type);
            if let Ok(mut stats) = self.stats.write() {
                stats.rounds_resolved += 1;
            }
        }

        if let Some(result) = &match_result {
            info!("Match {} completed, winners {:?}", game.id, result.winners);
            self.metrics_collector.record_match_completed();
            if let Ok(mut stats) = self.stats.write() {
                stats.matches_completed += 1;
            }
        }

        Ok(SubmitOutcome {
            game,
            round_result,
            match_result,
        })
    }

    fn match_lock<'a>(&'a self, match_id: &'a str) -> Result<MatchLockLease<'a>> {
        let mut locks = self
            .match_locks
            .lock()
            .map_err(|_| lock_poisoned("match locks"))?;
        let lock = locks
            .entry(match_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        Ok(MatchLockLease {
            locks: &self.match_locks,
            match_id,
            lock,
        })
    }

    /// Number of matches with a submission in flight
    pub fn pending_submissions(&self) -> usize {
        self.match_locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.read().map(|s| s.clone()).unwrap_or_default()
    }
}

type MatchLocks = Mutex<HashMap<MatchId, Arc<tokio::sync::Mutex<()>>>>;

/// Shared handle on one match's lock; the map entry is dropped with the
/// last handle, even when the submission is cancelled
struct MatchLockLease<'a> {
    locks: &'a MatchLocks,
    match_id: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for MatchLockLease<'_> {
    fn drop(&mut self) {
        match self.locks.lock() {
            Ok(mut locks) => {
                // One reference in the map, one here
                let idle = locks
                    .get(self.match_id)
                    .is_some_and(|tracked| Arc::ptr_eq(tracked, &self.lock))
                    && Arc::strong_count(&self.lock) == 2;
                if idle {
                    locks.remove(self.match_id);
                }
            }
            Err(_) => warn!("Failed to acquire match locks to release {}", self.match_id),
        }
    }
}

fn duration_error() -> ArenaError {
    ArenaError::validation(format!(
        "durationMinutes must be an integer in range {}..{}",
        MIN_DURATION_MINUTES, MAX_DURATION_MINUTES
    ))
}

/// A JSON number with no fractional part, as an unsigned integer
fn whole_number(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    (f.is_finite() && f.fract() == 0.0 && f >= 0.0 && f <= u64::MAX as f64).then_some(f as u64)
}

/// Parse a raw participant list, requiring positive integers
pub fn parse_player_ids(raw: &Value) -> Result<Vec<UserId>> {
    let items = raw.as_array().ok_or_else(|| {
        ArenaError::validation(format!(
            "Match must contain exactly {} players",
            PLAYERS_PER_MATCH
        ))
    })?;

    items
        .iter()
        .map(|item| {
            whole_number(item).filter(|&id| id > 0).ok_or_else(|| {
                ArenaError::validation("Every playerId must be a positive integer")
            })
        })
        .collect()
}

/// Parse an optional raw duration; absent means the default
pub fn parse_duration(raw: Option<&Value>) -> Result<Option<u32>> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(value) => whole_number(value)
            .and_then(|minutes| u32::try_from(minutes).ok())
            .map(Some)
            .ok_or_else(duration_error),
    }
}
