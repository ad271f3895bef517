//! Utility functions for the social arena service

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new unique match ID
pub fn generate_match_id() -> String {
    Uuid::new_v4().to_string()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Number of characters in a string, counted the way clients count them
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}
