//! Match lifecycle through the engine and queue over an in-memory store

use crate::fixtures::{create_test_system, players, scoring_answer};
use serde_json::json;
use social_arena::error::ArenaError;
use social_arena::game::MatchOrigin;
use social_arena::types::{JoinStatus, QueueMode, RoundType};

#[tokio::test]
async fn test_complete_match_workflow() {
    let system = create_test_system();
    let game = system
        .engine
        .create_match(&players(), Some(15), MatchOrigin::Admin)
        .await
        .unwrap();
    assert_eq!(game.duration_minutes, 15);

    let mut round_results = Vec::new();
    let mut final_result = None;
    let mut current = game.clone();

    for _ in 0..5 {
        for player in players() {
            let answer = scoring_answer(&current, player);
            let outcome = system
                .engine
                .submit_answer(&game.id, player, &answer)
                .await
                .unwrap();
            if let Some(result) = outcome.round_result.clone() {
                round_results.push(result);
            }
            if let Some(result) = outcome.match_result.clone() {
                final_result = Some(result);
            }
            current = outcome.game;
        }
    }

    assert_eq!(round_results.len(), 5);
    let types: Vec<RoundType> = round_results.iter().map(|r| r.round_type).collect();
    assert_eq!(
        types,
        vec![
            RoundType::Logic,
            RoundType::GroupVoting,
            RoundType::PersonalChoice,
            RoundType::Logic,
            RoundType::SocialVoting
        ]
    );

    let result = final_result.expect("match result");
    assert_eq!(result.winners, vec![1]);
    assert_eq!(result.scores[&1], 8 + 9);
    assert_eq!(result.scores[&2], 8 + 1);
    assert_eq!(result.scores[&10], 8);

    let stored = system.engine.get_match(&game.id).await.unwrap();
    assert!(stored.completed);
    assert_eq!(stored.scores, result.scores);
}

#[tokio::test]
async fn test_group_voting_plurality_scores_majority() {
    let system = create_test_system();
    let game = system
        .engine
        .create_match(&players(), None, MatchOrigin::Admin)
        .await
        .unwrap();

    for player in players() {
        let answer = scoring_answer(&game, player);
        system
            .engine
            .submit_answer(&game.id, player, &answer)
            .await
            .unwrap();
    }

    let votes = [0, 0, 0, 1, 1, 2, 2, 2, 2, 3];
    let mut result = None;
    for (player, vote) in players().into_iter().zip(votes) {
        let outcome = system
            .engine
            .submit_answer(&game.id, player, &json!(vote))
            .await
            .unwrap();
        result = outcome.round_result.or(result);
    }

    let result = result.expect("group voting resolved");
    assert_eq!(result.round_type, RoundType::GroupVoting);
    assert_eq!(result.details.winning_option, Some(2));
    // Voters 6..=9 picked the plurality option on top of round one
    assert_eq!(result.scores[&6], 4);
    assert_eq!(result.scores[&1], 2);
}

#[tokio::test]
async fn test_social_vote_for_self_is_rejected() {
    let system = create_test_system();
    let mut game = system
        .engine
        .create_match(&players(), None, MatchOrigin::Admin)
        .await
        .unwrap();

    for _ in 0..4 {
        for player in players() {
            let answer = scoring_answer(&game, player);
            game = system
                .engine
                .submit_answer(&game.id, player, &answer)
                .await
                .unwrap()
                .game;
        }
    }
    assert_eq!(
        game.current_round().unwrap().round_type,
        RoundType::SocialVoting
    );

    let err = system
        .engine
        .submit_answer(&game.id, 3, &json!(3))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "You cannot vote for yourself in social voting round"
    );

    let err = system
        .engine
        .submit_answer(&game.id, 3, &json!(99))
        .await
        .unwrap_err();
    assert!(matches!(err, ArenaError::Validation { .. }));
}

#[tokio::test]
async fn test_match_survives_cache_eviction() {
    let system = create_test_system();
    let game = system
        .engine
        .create_match(&players(), None, MatchOrigin::Admin)
        .await
        .unwrap();
    let answer = scoring_answer(&game, 4);
    let updated = system
        .engine
        .submit_answer(&game.id, 4, &answer)
        .await
        .unwrap()
        .game;

    assert!(system.store.evict(&game.id).unwrap());
    assert_eq!(system.store.cached_count(), 0);

    let reloaded = system.engine.get_match(&game.id).await.unwrap();
    assert_eq!(reloaded, updated);
    assert!(system
        .backend
        .raw_value(&system.store.key_for(&game.id))
        .is_some());
}

#[tokio::test]
async fn test_queue_forms_persisted_match() {
    let system = create_test_system();

    for player in 1..=9 {
        let outcome = system
            .queue
            .join_raw(player, Some("paid"), Some(&json!("25.50")))
            .await
            .unwrap();
        assert_eq!(outcome.status, JoinStatus::Queued);
        assert_eq!(outcome.stake_amount.as_deref(), Some("25.5"));
    }

    // A different stake waits in its own pool
    let other = system
        .queue
        .join_raw(50, Some("paid"), Some(&json!(10)))
        .await
        .unwrap();
    assert_eq!(other.queued_players, Some(1));

    let outcome = system
        .queue
        .join_raw(10, Some("paid"), Some(&json!(25.5)))
        .await
        .unwrap();
    assert_eq!(outcome.status, JoinStatus::Matched);
    let game = outcome.matched.unwrap();
    assert_eq!(game.player_ids, players());
    assert_eq!(game.mode, Some(QueueMode::Paid));
    assert_eq!(game.stake_amount.as_deref(), Some("25.5"));

    let stored = system.engine.get_match(&game.id).await.unwrap();
    assert_eq!(stored, game);
    assert_eq!(system.queue.total_waiting().await.unwrap(), 1);
}

#[tokio::test]
async fn test_failed_formation_keeps_players_waiting() {
    let system = create_test_system();
    for player in 1..=9 {
        system.queue.join_raw(player, None, None).await.unwrap();
    }

    system.backend.set_fail_writes(true);
    let err = system.queue.join_raw(10, None, None).await.unwrap_err();
    assert!(matches!(err, ArenaError::Persistence { .. }));
    assert_eq!(system.queue.total_waiting().await.unwrap(), 10);

    system.backend.set_fail_writes(false);
    let outcome = system.queue.join_raw(11, None, None).await.unwrap();
    assert_eq!(outcome.status, JoinStatus::Matched);
    assert_eq!(outcome.matched.unwrap().player_ids, players());
    assert_eq!(system.queue.total_waiting().await.unwrap(), 1);
}
