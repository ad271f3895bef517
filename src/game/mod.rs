//! Match state machine and round rules

pub mod engine;
pub mod rounds;

pub use engine::{parse_duration, parse_player_ids, EngineStats, MatchEngine, MatchOrigin};
pub use rounds::{build_rounds, normalize_answer, resolve_current_round};
