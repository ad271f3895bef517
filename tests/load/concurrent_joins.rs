//! Concurrent queue joins
//!
//! Players joining at once never end up in two matches, and every complete
//! group of ten becomes exactly one match.

use crate::fixtures::create_test_system;
use futures::future::join_all;
use serde_json::json;
use social_arena::matchmaking::PoolKey;
use social_arena::types::{JoinStatus, QueueMode, UserId};
use std::collections::HashSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_form_disjoint_matches() {
    let system = create_test_system();

    let joins = (1..=105u64).map(|player| {
        let queue = system.queue.clone();
        tokio::spawn(async move { queue.join_raw(player, Some("free"), None).await })
    });

    let mut matched_players: Vec<UserId> = Vec::new();
    let mut matches = 0;
    for result in join_all(joins).await {
        let outcome = result.unwrap().unwrap();
        if outcome.status == JoinStatus::Matched {
            matches += 1;
            matched_players.extend(outcome.matched.unwrap().player_ids);
        }
    }

    assert_eq!(matches, 10);
    assert_eq!(matched_players.len(), 100);
    let unique: HashSet<UserId> = matched_players.iter().copied().collect();
    assert_eq!(unique.len(), 100, "a player was enrolled twice");

    let key = PoolKey::from_request(Some("free"), None).unwrap();
    assert_eq!(system.queue.pool_depth(&key).await.unwrap(), 5);
    assert_eq!(system.queue.stats().matches_formed, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeated_joins_do_not_duplicate_players() {
    let system = create_test_system();

    // Nine players each join five times concurrently
    let joins = (0..45u64).map(|n| {
        let queue = system.queue.clone();
        let player = n % 9 + 1;
        tokio::spawn(async move { queue.join_raw(player, Some("paid"), Some(&json!(5))).await })
    });

    for result in join_all(joins).await {
        let outcome = result.unwrap().unwrap();
        assert_eq!(outcome.status, JoinStatus::Queued);
        assert_eq!(outcome.mode, QueueMode::Paid);
    }

    let key = PoolKey::from_request(Some("paid"), Some(&json!(5))).unwrap();
    assert_eq!(system.queue.pool_depth(&key).await.unwrap(), 9);
    assert_eq!(system.queue.stats().joins, 9);
}
