//! Match store: cache-first reads, write-through saves
//!
//! The external key/value store is the source of truth. The in-process cache
//! only short-circuits reads and is updated after a save is acknowledged.
//! It holds active matches only and is bounded; completed records are read
//! back from the store.

use crate::error::{lock_poisoned, ArenaError, Result};
use crate::metrics::MetricsCollector;
use crate::store::client::CommandTransport;
use crate::store::resp::RespReply;
use crate::types::{Match, MatchId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, warn};

/// Default key namespace for match records
pub const DEFAULT_KEY_PREFIX: &str = "social_tournament:match:";

/// Default bound on cached match records
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Owns the canonical match records
pub struct MatchStore {
    transport: Arc<dyn CommandTransport>,
    key_prefix: String,
    cache: RwLock<HashMap<MatchId, Match>>,
    cache_capacity: usize,
    metrics_collector: Arc<MetricsCollector>,
}

impl MatchStore {
    pub fn new(transport: Arc<dyn CommandTransport>, key_prefix: impl Into<String>) -> Self {
        Self::with_metrics(transport, key_prefix, Arc::new(MetricsCollector::default()))
    }

    pub fn with_metrics(
        transport: Arc<dyn CommandTransport>,
        key_prefix: impl Into<String>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            transport,
            key_prefix: key_prefix.into(),
            cache: RwLock::new(HashMap::new()),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            metrics_collector,
        }
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity.max(1);
        self
    }

    /// Storage key for a match
    pub fn key_for(&self, match_id: &str) -> String {
        format!("{}{}", self.key_prefix, match_id)
    }

    /// Persist the full match record, then refresh the cache
    pub async fn save(&self, game: &Match) -> Result<()> {
        let payload = serde_json::to_string(game).map_err(|e| {
            ArenaError::persistence(format!("Failed to serialize match {}: {}", game.id, e))
        })?;
        let key = self.key_for(&game.id);

        let timer = self.metrics_collector.start_timer();
        let reply = self.transport.execute(&["SET", &key, &payload]).await;
        let acknowledged = matches!(&reply, Ok(reply) if reply.is_simple("OK"));
        self.metrics_collector
            .record_store_request("SET", acknowledged, timer.stop());

        match reply {
            Ok(reply) if reply.is_simple("OK") => {}
            Ok(other) => {
                error!("Store SET for match {} not acknowledged: {:?}", game.id, other);
                return Err(ArenaError::persistence("Failed to persist match in Redis"));
            }
            Err(e) => {
                error!("Store SET for match {} failed: {}", game.id, e);
                return Err(ArenaError::persistence("Failed to persist match in Redis"));
            }
        }

        self.cache_put(game)?;
        debug!("Match {} persisted ({} bytes)", game.id, payload.len());
        Ok(())
    }

    /// Load a match, from cache when present, otherwise from the store
    pub async fn load(&self, match_id: &str) -> Result<Match> {
        {
            let cache = self.cache.read().map_err(|_| lock_poisoned("match cache"))?;
            if let Some(game) = cache.get(match_id) {
                return Ok(game.clone());
            }
        }

        let key = self.key_for(match_id);
        let timer = self.metrics_collector.start_timer();
        let reply = self.transport.execute(&["GET", &key]).await;
        self.metrics_collector
            .record_store_request("GET", reply.is_ok(), timer.stop());

        let raw = match reply {
            Ok(RespReply::Bulk(Some(raw))) => raw,
            Ok(RespReply::Bulk(None)) => return Err(ArenaError::not_found("Match")),
            Ok(RespReply::Simple(other)) => {
                warn!("Unexpected simple reply for GET {}: {}", key, other);
                return Err(ArenaError::persistence("Failed to load match from Redis"));
            }
            Err(e) => {
                error!("Store GET for match {} failed: {}", match_id, e);
                return Err(ArenaError::persistence("Failed to load match from Redis"));
            }
        };

        let game: Match = serde_json::from_str(&raw).map_err(|e| {
            error!("Stored match {} is not decodable: {}", match_id, e);
            ArenaError::persistence("Failed to load match from Redis")
        })?;

        self.cache_put(&game)?;
        Ok(game)
    }

    /// Cache an active match, evicting the stalest entry when full
    fn cache_put(&self, game: &Match) -> Result<()> {
        let mut cache = self.cache.write().map_err(|_| lock_poisoned("match cache"))?;
        if game.completed {
            cache.remove(&game.id);
            return Ok(());
        }

        if !cache.contains_key(&game.id) && cache.len() >= self.cache_capacity {
            let stalest = cache
                .values()
                .min_by_key(|cached| cached.updated_at)
                .map(|cached| cached.id.clone());
            if let Some(id) = stalest {
                debug!("Match cache full, evicting {}", id);
                cache.remove(&id);
            }
        }
        cache.insert(game.id.clone(), game.clone());
        Ok(())
    }

    /// Drop a cached copy so the next load goes to the store
    pub fn evict(&self, match_id: &str) -> Result<bool> {
        let mut cache = self.cache.write().map_err(|_| lock_poisoned("match cache"))?;
        Ok(cache.remove(match_id).is_some())
    }

    /// Number of cached matches
    pub fn cached_count(&self) -> usize {
        self.cache.read().map(|cache| cache.len()).unwrap_or(0)
    }

    /// Check the store answers `PING`
    pub async fn ping(&self) -> Result<()> {
        let timer = self.metrics_collector.start_timer();
        let reply = self.transport.execute(&["PING"]).await;
        let ok = matches!(&reply, Ok(reply) if reply.is_simple("PONG"));
        self.metrics_collector
            .record_store_request("PING", ok, timer.stop());

        if ok {
            Ok(())
        } else {
            Err(ArenaError::persistence("Redis did not answer PING"))
        }
    }
}
