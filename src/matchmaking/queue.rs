//! Matchmaking pools
//!
//! Players wait in FIFO pools keyed by mode and, for paid play, by stake.
//! Each pool sits behind its own async lock which is held across the drain
//! and the match creation, so a cohort is drained exactly once.

use crate::error::{lock_poisoned, ArenaError, Result};
use crate::game::{MatchEngine, MatchOrigin};
use crate::metrics::MetricsCollector;
use crate::types::{JoinOutcome, JoinStatus, QueueMode, UserId, PLAYERS_PER_MATCH};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{error, info};

/// Identifies one waiting pool
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub mode: QueueMode,
    /// Normalized stake for paid pools, `None` for free play
    pub stake_amount: Option<String>,
}

impl PoolKey {
    /// Build a pool key from raw request fields
    pub fn from_request(mode: Option<&str>, stake_amount: Option<&Value>) -> Result<Self> {
        let mode = match mode.map(str::trim) {
            None | Some("") | Some("free") => QueueMode::Free,
            Some("paid") => QueueMode::Paid,
            Some(other) => {
                return Err(ArenaError::validation(format!(
                    "Unsupported mode: {}",
                    other
                )))
            }
        };

        let stake_amount = match mode {
            QueueMode::Free => None,
            QueueMode::Paid => Some(normalize_stake(stake_amount)?),
        };

        Ok(Self { mode, stake_amount })
    }
}

/// Canonical decimal form of a positive stake
pub fn normalize_stake(raw: Option<&Value>) -> Result<String> {
    let invalid = || ArenaError::validation("stakeAmount must be a positive number");

    let amount = match raw {
        Some(Value::Number(number)) => number.as_f64().ok_or_else(invalid)?,
        Some(Value::String(text)) if !text.trim().is_empty() => {
            text.trim().parse::<f64>().map_err(|_| invalid())?
        }
        _ => return Err(invalid()),
    };

    if !amount.is_finite() || amount <= 0.0 {
        return Err(invalid());
    }

    Ok(format!("{}", amount))
}

/// Counters about queue activity
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub joins: u64,
    pub matches_formed: u64,
    pub failed_formations: u64,
}

type Pool = Arc<tokio::sync::Mutex<VecDeque<UserId>>>;

/// Groups waiting players into ten-player matches
pub struct MatchmakingQueue {
    engine: Arc<MatchEngine>,
    pools: Mutex<HashMap<PoolKey, Pool>>,
    default_duration_minutes: u32,
    stats: RwLock<QueueStats>,
    metrics_collector: Arc<MetricsCollector>,
}

impl MatchmakingQueue {
    pub fn new(engine: Arc<MatchEngine>, default_duration_minutes: u32) -> Self {
        Self::with_metrics(
            engine,
            default_duration_minutes,
            Arc::new(MetricsCollector::default()),
        )
    }

    pub fn with_metrics(
        engine: Arc<MatchEngine>,
        default_duration_minutes: u32,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            engine,
            pools: Mutex::new(HashMap::new()),
            default_duration_minutes,
            stats: RwLock::new(QueueStats::default()),
            metrics_collector,
        }
    }

    /// Join from raw request fields
    pub async fn join_raw(
        &self,
        user_id: UserId,
        mode: Option<&str>,
        stake_amount: Option<&Value>,
    ) -> Result<JoinOutcome> {
        let key = PoolKey::from_request(mode, stake_amount)?;
        self.join(user_id, key).await
    }

    /// Enqueue a user, forming a match once the pool holds ten players
    pub async fn join(&self, user_id: UserId, key: PoolKey) -> Result<JoinOutcome> {
        if user_id == 0 {
            return Err(ArenaError::validation("userId must be a positive integer"));
        }

        let pool = self.pool_for(&key)?;
        let mut waiting = pool.lock().await;

        if !waiting.contains(&user_id) {
            waiting.push_back(user_id);
            self.metrics_collector.record_queue_join(key.mode);
            if let Ok(mut stats) = self.stats.write() {
                stats.joins += 1;
            }
            info!(
                "User {} joined {} pool (stake {:?}), {} waiting",
                user_id,
                key.mode,
                key.stake_amount,
                waiting.len()
            );
        }

        if waiting.len() < PLAYERS_PER_MATCH {
            return Ok(JoinOutcome {
                status: JoinStatus::Queued,
                mode: key.mode,
                stake_amount: key.stake_amount.clone(),
                queued_players: Some(waiting.len()),
                players_needed: Some(PLAYERS_PER_MATCH - waiting.len()),
                matched: None,
            });
        }

        let cohort: Vec<UserId> = waiting.drain(..PLAYERS_PER_MATCH).collect();
        let origin = MatchOrigin::Queue {
            mode: key.mode,
            stake_amount: key.stake_amount.clone(),
        };

        match self
            .engine
            .create_match(&cohort, Some(self.default_duration_minutes), origin)
            .await
        {
            Ok(game) => {
                if let Ok(mut stats) = self.stats.write() {
                    stats.matches_formed += 1;
                }
                info!("Formed match {} from {} pool", game.id, key.mode);
                Ok(JoinOutcome {
                    status: JoinStatus::Matched,
                    mode: key.mode,
                    stake_amount: key.stake_amount,
                    queued_players: None,
                    players_needed: None,
                    matched: Some(game),
                })
            }
            Err(e) => {
                for &player in cohort.iter().rev() {
                    waiting.push_front(player);
                }
                if let Ok(mut stats) = self.stats.write() {
                    stats.failed_formations += 1;
                }
                error!("Failed to form match from {} pool: {}", key.mode, e);
                Err(e)
            }
        }
    }

    /// Number of players waiting in a pool
    pub async fn pool_depth(&self, key: &PoolKey) -> Result<usize> {
        let pool = {
            let pools = self.pools.lock().map_err(|_| lock_poisoned("queue pools"))?;
            pools.get(key).cloned()
        };
        match pool {
            Some(pool) => Ok(pool.lock().await.len()),
            None => Ok(0),
        }
    }

    /// Total waiting players across every pool
    pub async fn total_waiting(&self) -> Result<usize> {
        let pools: Vec<Pool> = {
            let pools = self.pools.lock().map_err(|_| lock_poisoned("queue pools"))?;
            pools.values().cloned().collect()
        };
        let mut total = 0;
        for pool in pools {
            total += pool.lock().await.len();
        }
        Ok(total)
    }

    pub fn stats(&self) -> QueueStats {
        self.stats.read().map(|s| s.clone()).unwrap_or_default()
    }

    fn pool_for(&self, key: &PoolKey) -> Result<Pool> {
        let mut pools = self.pools.lock().map_err(|_| lock_poisoned("queue pools"))?;
        Ok(pools
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(VecDeque::new())))
            .clone())
    }
}
