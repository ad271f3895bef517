//! Matchmaking queue that groups waiting players into matches

pub mod queue;

pub use queue::{normalize_stake, MatchmakingQueue, PoolKey, QueueStats};
