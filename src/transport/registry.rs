//! Connection registry
//!
//! Tracks live connections, the connections of each user, and the match
//! rooms connections are subscribed to. Rooms are joined through activity
//! and pruned when a connection goes away.

use crate::error::{lock_poisoned, ArenaError, Result};
use crate::metrics::MetricsCollector;
use crate::transport::frame::encode_text_frame;
use crate::types::{MatchId, ServerEvent, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub type ConnectionId = u64;

/// Work item for a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Pre-encoded frame bytes
    Frame(Arc<[u8]>),
    /// Stop writing and close the stream
    Close,
}

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

#[derive(Debug)]
struct ConnectionEntry {
    user_id: UserId,
    sender: OutboundSender,
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    user_connections: HashMap<UserId, HashSet<ConnectionId>>,
    match_rooms: HashMap<MatchId, HashSet<ConnectionId>>,
}

/// Snapshot of registry sizes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub connections: usize,
    pub users: usize,
    pub rooms: usize,
}

/// Owns all live connections for one server instance
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    next_id: AtomicU64,
    metrics_collector: Arc<MetricsCollector>,
}

/// Serialize and frame an event once, for any number of recipients
pub fn encode_event(event: &ServerEvent) -> Result<Arc<[u8]>> {
    let json = serde_json::to_string(event)
        .map_err(|e| ArenaError::internal(format!("Failed to encode {} event: {}", event.name(), e)))?;
    Ok(encode_text_frame(&json)?.into())
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_metrics(Arc::new(MetricsCollector::default()))
    }

    pub fn with_metrics(metrics_collector: Arc<MetricsCollector>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            next_id: AtomicU64::new(1),
            metrics_collector,
        }
    }

    /// Register an authenticated connection
    pub fn register(&self, user_id: UserId, sender: OutboundSender) -> Result<ConnectionId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write().map_err(|_| lock_poisoned("registry"))?;
        state
            .connections
            .insert(id, ConnectionEntry { user_id, sender });
        state.user_connections.entry(user_id).or_default().insert(id);

        self.metrics_collector.record_connection_opened();
        info!("Connection {} registered for user {}", id, user_id);
        Ok(id)
    }

    /// Remove a connection from the user index and every room
    pub fn unregister(&self, connection_id: ConnectionId) -> Result<bool> {
        let mut state = self.state.write().map_err(|_| lock_poisoned("registry"))?;
        let Some(entry) = state.connections.remove(&connection_id) else {
            return Ok(false);
        };

        if let Some(ids) = state.user_connections.get_mut(&entry.user_id) {
            ids.remove(&connection_id);
            if ids.is_empty() {
                state.user_connections.remove(&entry.user_id);
            }
        }

        state.match_rooms.retain(|_, members| {
            members.remove(&connection_id);
            !members.is_empty()
        });

        self.metrics_collector.record_connection_closed();
        info!(
            "Connection {} of user {} unregistered",
            connection_id, entry.user_id
        );
        Ok(true)
    }

    /// Live connections of a user
    pub fn connections_of(&self, user_id: UserId) -> Vec<ConnectionId> {
        self.state
            .read()
            .map(|state| {
                state
                    .user_connections
                    .get(&user_id)
                    .map(|ids| ids.iter().copied().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Add one live connection to a match room
    pub fn subscribe_connection(&self, match_id: &str, connection_id: ConnectionId) -> Result<()> {
        let mut state = self.state.write().map_err(|_| lock_poisoned("registry"))?;
        if !state.connections.contains_key(&connection_id) {
            debug!("Connection {} closed before joining room {}", connection_id, match_id);
            return Ok(());
        }
        state
            .match_rooms
            .entry(match_id.to_string())
            .or_default()
            .insert(connection_id);
        Ok(())
    }

    /// Add every live connection of the given users to a match room
    pub fn subscribe_users(&self, match_id: &str, user_ids: &[UserId]) -> Result<usize> {
        let mut state = self.state.write().map_err(|_| lock_poisoned("registry"))?;
        let ids: Vec<ConnectionId> = user_ids
            .iter()
            .filter_map(|user_id| state.user_connections.get(user_id))
            .flat_map(|ids| ids.iter().copied())
            .collect();

        if ids.is_empty() {
            return Ok(0);
        }

        let room = state.match_rooms.entry(match_id.to_string()).or_default();
        room.extend(ids.iter().copied());
        Ok(ids.len())
    }

    pub fn room_members(&self, match_id: &str) -> Vec<ConnectionId> {
        self.state
            .read()
            .map(|state| {
                state
                    .match_rooms
                    .get(match_id)
                    .map(|ids| ids.iter().copied().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Send an event to every connection in a match room
    pub fn broadcast(&self, match_id: &str, event: &ServerEvent) -> Result<usize> {
        let frame = encode_event(event)?;
        let state = self.state.read().map_err(|_| lock_poisoned("registry"))?;
        let Some(members) = state.match_rooms.get(match_id) else {
            return Ok(0);
        };

        let mut delivered = 0;
        for id in members {
            if let Some(entry) = state.connections.get(id) {
                if entry.sender.send(Outbound::Frame(frame.clone())).is_ok() {
                    delivered += 1;
                }
            }
        }

        debug!(
            "Broadcast {} to {}/{} connections in room {}",
            event.name(),
            delivered,
            members.len(),
            match_id
        );
        Ok(delivered)
    }

    /// Send an event to a single connection
    pub fn send_to(&self, connection_id: ConnectionId, event: &ServerEvent) -> Result<bool> {
        let frame = encode_event(event)?;
        let state = self.state.read().map_err(|_| lock_poisoned("registry"))?;
        match state.connections.get(&connection_id) {
            Some(entry) => Ok(entry.sender.send(Outbound::Frame(frame)).is_ok()),
            None => {
                warn!("Dropping {} for closed connection {}", event.name(), connection_id);
                Ok(false)
            }
        }
    }

    /// Ask every writer task to close its stream
    pub fn close_all(&self) -> usize {
        match self.state.read() {
            Ok(state) => state
                .connections
                .values()
                .filter(|entry| entry.sender.send(Outbound::Close).is_ok())
                .count(),
            Err(_) => 0,
        }
    }

    pub fn stats(&self) -> RegistryStats {
        self.state
            .read()
            .map(|state| RegistryStats {
                connections: state.connections.len(),
                users: state.user_connections.len(),
                rooms: state.match_rooms.len(),
            })
            .unwrap_or_default()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
