//! Concurrent answer submissions against a single match
//!
//! Every submission is serialized per match, so no answer is lost and each
//! round resolves exactly once.

use crate::fixtures::{answer_for_round, create_test_system, players};
use futures::future::join_all;
use social_arena::game::MatchOrigin;
use std::time::{Duration, Instant};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_lose_no_answers() {
    let system = create_test_system();
    let game = system
        .engine
        .create_match(&players(), None, MatchOrigin::Admin)
        .await
        .unwrap();

    let start = Instant::now();
    let mut resolutions = 0;
    let mut completions = 0;

    for round_index in 0..5 {
        let submissions = players().into_iter().map(|player| {
            let engine = system.engine.clone();
            let id = game.id.clone();
            let answer = answer_for_round(&game, round_index, player);
            tokio::spawn(async move { engine.submit_answer(&id, player, &answer).await })
        });

        for result in join_all(submissions).await {
            let outcome = result.unwrap().unwrap();
            if outcome.round_result.is_some() {
                resolutions += 1;
            }
            if outcome.match_result.is_some() {
                completions += 1;
            }
        }

        let stored = system.engine.get_match(&game.id).await.unwrap();
        assert_eq!(stored.rounds[round_index].answers.len(), 10);
        assert!(stored.rounds[round_index].resolved);
    }

    assert_eq!(resolutions, 5);
    assert_eq!(completions, 1);

    let stored = system.engine.get_match(&game.id).await.unwrap();
    assert!(stored.completed);
    assert_eq!(stored.scores[&1], 17);
    assert_eq!(system.engine.stats().answers_accepted, 50);

    assert!(
        start.elapsed() < Duration::from_secs(5),
        "50 submissions took {:?}",
        start.elapsed()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_submissions_race() {
    let system = create_test_system();
    let game = system
        .engine
        .create_match(&players(), None, MatchOrigin::Admin)
        .await
        .unwrap();

    // The same player submits twenty times at once; exactly one is accepted
    let attempts = (0..20).map(|_| {
        let engine = system.engine.clone();
        let id = game.id.clone();
        let answer = answer_for_round(&game, 0, 3);
        tokio::spawn(async move { engine.submit_answer(&id, 3, &answer).await })
    });

    let accepted = join_all(attempts)
        .await
        .into_iter()
        .filter(|result| matches!(result, Ok(Ok(_))))
        .count();
    assert_eq!(accepted, 1);

    let stored = system.engine.get_match(&game.id).await.unwrap();
    assert_eq!(stored.rounds[0].answers.len(), 1);
}
