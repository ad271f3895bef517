//! Round configuration, answer validation and resolution
//!
//! Each round type accepts one answer shape and scores it with one rule:
//!
//! | type            | answer                      | scoring                               |
//! |-----------------|-----------------------------|---------------------------------------|
//! | logic           | option 0-3                  | +2 for the pre-set correct option     |
//! | group_voting    | option 0-3                  | +2 for voters of the plurality option |
//! | personal_choice | "A" or "B"                  | +2 for the pre-set beneficial choice  |
//! | social_voting   | another participant's id    | +1 per nomination received            |

use crate::error::{ArenaError, Result};
use crate::types::{
    Answer, Choice, Match, Round, RoundDetails, RoundResult, RoundType, UserId, ROUND_SEQUENCE,
};
use rand::Rng;
use serde_json::Value;
use std::collections::BTreeMap;

/// Points for a correct logic answer, a plurality vote or the beneficial choice
pub const MATCHING_ANSWER_POINTS: u32 = 2;

/// Points per nomination in a social voting round
pub const NOMINATION_POINTS: u32 = 1;

/// Highest option index in four-option rounds
pub const MAX_OPTION: u8 = 3;

/// Build the fixed round sequence with its one-time random configuration
pub fn build_rounds<R: Rng + ?Sized>(rng: &mut R) -> Vec<Round> {
    ROUND_SEQUENCE
        .iter()
        .enumerate()
        .map(|(index, &round_type)| {
            let mut details = RoundDetails::default();
            match round_type {
                RoundType::Logic => details.correct_option = Some(rng.gen_range(0..=MAX_OPTION)),
                RoundType::PersonalChoice => {
                    details.beneficial_choice =
                        Some(if rng.gen_bool(0.5) { Choice::A } else { Choice::B })
                }
                RoundType::GroupVoting | RoundType::SocialVoting => {}
            }

            Round {
                round_number: index as u32 + 1,
                round_type,
                answers: BTreeMap::new(),
                resolved: false,
                details,
            }
        })
        .collect()
}

/// Validate a raw answer against the round type and normalize it
pub fn normalize_answer(
    round_type: RoundType,
    voter: UserId,
    raw: &Value,
    participants: &[UserId],
) -> Result<Answer> {
    match round_type {
        RoundType::Logic | RoundType::GroupVoting => match as_integer(raw) {
            Some(option) if (0..=MAX_OPTION as i64).contains(&option) => {
                Ok(Answer::Number(option as u64))
            }
            _ => Err(ArenaError::validation(
                "Answer must be an integer from 0 to 3",
            )),
        },
        RoundType::PersonalChoice => match raw.as_str() {
            Some("A") => Ok(Answer::Choice(Choice::A)),
            Some("B") => Ok(Answer::Choice(Choice::B)),
            _ => Err(ArenaError::validation("Answer must be A or B")),
        },
        RoundType::SocialVoting => {
            let target = as_integer(raw)
                .filter(|&id| id > 0)
                .map(|id| id as UserId)
                .filter(|id| participants.contains(id))
                .ok_or_else(|| {
                    ArenaError::validation("Vote target must be one of match players")
                })?;

            if target == voter {
                return Err(ArenaError::validation(
                    "You cannot vote for yourself in social voting round",
                ));
            }

            Ok(Answer::Number(target))
        }
    }
}

/// Integer value of a JSON number or numeric string
fn as_integer(raw: &Value) -> Option<i64> {
    let value = match raw {
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                return Some(int);
            }
            number.as_f64()?
        }
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok()?
        }
        _ => return None,
    };

    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

/// Resolve the current round: apply scores, mark it resolved, advance the match
pub fn resolve_current_round(game: &mut Match) -> Result<RoundResult> {
    let index = game.current_round_index;
    let round = game
        .rounds
        .get_mut(index)
        .ok_or_else(|| ArenaError::internal("Current round is not available"))?;

    if round.resolved {
        return Err(ArenaError::internal("Current round is already resolved"));
    }

    let mut awards: Vec<(UserId, u32)> = Vec::new();

    match round.round_type {
        RoundType::Logic => {
            let correct = round
                .details
                .correct_option
                .ok_or_else(|| ArenaError::internal("Logic round is not configured"))?;
            awards.extend(
                round
                    .answers
                    .iter()
                    .filter(|(_, answer)| **answer == Answer::Number(correct as u64))
                    .map(|(&player, _)| (player, MATCHING_ANSWER_POINTS)),
            );
        }
        RoundType::GroupVoting => {
            let winning = plurality_option(&round.answers);
            round.details.winning_option = Some(winning);
            awards.extend(
                round
                    .answers
                    .iter()
                    .filter(|(_, answer)| **answer == Answer::Number(winning as u64))
                    .map(|(&player, _)| (player, MATCHING_ANSWER_POINTS)),
            );
        }
        RoundType::PersonalChoice => {
            let beneficial = round
                .details
                .beneficial_choice
                .ok_or_else(|| ArenaError::internal("Personal choice round is not configured"))?;
            awards.extend(
                round
                    .answers
                    .iter()
                    .filter(|(_, answer)| **answer == Answer::Choice(beneficial))
                    .map(|(&player, _)| (player, MATCHING_ANSWER_POINTS)),
            );
        }
        RoundType::SocialVoting => {
            awards.extend(round.answers.values().filter_map(|answer| match answer {
                Answer::Number(target) => Some((*target, NOMINATION_POINTS)),
                Answer::Choice(_) => None,
            }));
        }
    }

    round.resolved = true;
    let round_number = round.round_number;
    let round_type = round.round_type;
    let details = round.details.clone();

    for (player, points) in awards {
        if let Some(score) = game.scores.get_mut(&player) {
            *score += points;
        }
    }

    game.current_round_index += 1;
    if game.current_round_index >= game.rounds.len() {
        game.completed = true;
    }

    Ok(RoundResult {
        match_id: game.id.clone(),
        round_number,
        round_type,
        details,
        scores: game.scores.clone(),
    })
}

/// Option with the most votes, ties going to the lowest option index
fn plurality_option(answers: &BTreeMap<UserId, Answer>) -> u8 {
    let mut votes: BTreeMap<u8, u32> = BTreeMap::new();
    for answer in answers.values() {
        if let Answer::Number(option) = answer {
            if *option <= MAX_OPTION as u64 {
                *votes.entry(*option as u8).or_insert(0) += 1;
            }
        }
    }

    // BTreeMap iterates options in ascending order, so a strict comparison keeps the lowest on ties
    let mut winning = (0u8, 0u32);
    for (option, count) in votes {
        if count > winning.1 {
            winning = (option, count);
        }
    }
    winning.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::current_timestamp;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn players() -> Vec<UserId> {
        (101..=110).collect()
    }

    fn new_match() -> Match {
        let now = current_timestamp();
        let mut rng = StdRng::seed_from_u64(7);
        Match {
            id: "m".to_string(),
            player_ids: players(),
            mode: None,
            stake_amount: None,
            duration_minutes: 10,
            created_at: now,
            updated_at: now,
            completed: false,
            current_round_index: 0,
            scores: players().into_iter().map(|id| (id, 0)).collect(),
            rounds: build_rounds(&mut rng),
        }
    }

    #[test]
    fn test_build_rounds_sequence_and_configuration() {
        let mut rng = StdRng::seed_from_u64(42);
        let rounds = build_rounds(&mut rng);

        let types: Vec<_> = rounds.iter().map(|r| r.round_type).collect();
        assert_eq!(types, ROUND_SEQUENCE.to_vec());

        for (index, round) in rounds.iter().enumerate() {
            assert_eq!(round.round_number, index as u32 + 1);
            assert!(round.answers.is_empty());
            assert!(!round.resolved);
            match round.round_type {
                RoundType::Logic => assert!(round.details.correct_option.unwrap() <= 3),
                RoundType::PersonalChoice => assert!(round.details.beneficial_choice.is_some()),
                _ => assert_eq!(round.details, RoundDetails::default()),
            }
        }
    }

    #[test]
    fn test_option_answers_accept_numbers_and_numeric_strings() {
        let p = players();
        assert_eq!(
            normalize_answer(RoundType::Logic, 101, &json!(2), &p).unwrap(),
            Answer::Number(2)
        );
        assert_eq!(
            normalize_answer(RoundType::GroupVoting, 101, &json!("3"), &p).unwrap(),
            Answer::Number(3)
        );
        assert_eq!(
            normalize_answer(RoundType::Logic, 101, &json!(1.0), &p).unwrap(),
            Answer::Number(1)
        );
    }

    #[test]
    fn test_option_answers_reject_out_of_range_and_garbage() {
        let p = players();
        for bad in [json!(4), json!(-1), json!(1.5), json!(""), json!("two"), json!(null), json!([1])] {
            let err = normalize_answer(RoundType::Logic, 101, &bad, &p).unwrap_err();
            assert!(matches!(err, ArenaError::Validation { .. }), "accepted {}", bad);
        }
    }

    #[test]
    fn test_personal_choice_is_exact() {
        let p = players();
        assert_eq!(
            normalize_answer(RoundType::PersonalChoice, 101, &json!("A"), &p).unwrap(),
            Answer::Choice(Choice::A)
        );
        assert!(normalize_answer(RoundType::PersonalChoice, 101, &json!("a"), &p).is_err());
        assert!(normalize_answer(RoundType::PersonalChoice, 101, &json!(" B"), &p).is_err());
        assert!(normalize_answer(RoundType::PersonalChoice, 101, &json!(0), &p).is_err());
    }

    #[test]
    fn test_social_vote_targets() {
        let p = players();
        assert_eq!(
            normalize_answer(RoundType::SocialVoting, 101, &json!(105), &p).unwrap(),
            Answer::Number(105)
        );
        assert_eq!(
            normalize_answer(RoundType::SocialVoting, 101, &json!("106"), &p).unwrap(),
            Answer::Number(106)
        );

        let own = normalize_answer(RoundType::SocialVoting, 101, &json!(101), &p).unwrap_err();
        assert!(own.to_string().contains("yourself"));

        let outsider = normalize_answer(RoundType::SocialVoting, 101, &json!(999), &p).unwrap_err();
        assert!(outsider.to_string().contains("one of match players"));
    }

    #[test]
    fn test_resolve_logic_round() {
        let mut game = new_match();
        let correct = game.rounds[0].details.correct_option.unwrap();
        let wrong = (correct + 1) % 4;

        for (i, &player) in players().iter().enumerate() {
            let option = if i < 7 { correct } else { wrong };
            game.rounds[0]
                .answers
                .insert(player, Answer::Number(option as u64));
        }

        let result = resolve_current_round(&mut game).unwrap();
        assert_eq!(result.round_number, 1);
        assert_eq!(game.current_round_index, 1);
        assert!(game.rounds[0].resolved);
        assert_eq!(game.scores[&101], 2);
        assert_eq!(game.scores[&108], 0);
        assert_eq!(game.scores.values().sum::<u32>(), 14);
    }

    #[test]
    fn test_resolve_group_voting_plurality() {
        let mut game = new_match();
        game.current_round_index = 1;
        let votes = [0, 0, 0, 1, 1, 2, 2, 2, 2, 3];
        for (&player, &vote) in players().iter().zip(votes.iter()) {
            game.rounds[1].answers.insert(player, Answer::Number(vote));
        }

        let result = resolve_current_round(&mut game).unwrap();
        assert_eq!(result.details.winning_option, Some(2));
        assert_eq!(game.rounds[1].details.winning_option, Some(2));
        for &player in &players()[5..9] {
            assert_eq!(game.scores[&player], 2);
        }
        assert_eq!(game.scores[&101], 0);
        assert_eq!(game.scores[&110], 0);
    }

    #[test]
    fn test_group_voting_tie_goes_to_lowest_option() {
        let mut game = new_match();
        game.current_round_index = 1;
        let votes = [3, 3, 3, 1, 1, 1, 2, 2, 0, 0];
        for (&player, &vote) in players().iter().zip(votes.iter()) {
            game.rounds[1].answers.insert(player, Answer::Number(vote));
        }

        resolve_current_round(&mut game).unwrap();
        assert_eq!(game.rounds[1].details.winning_option, Some(1));
    }

    #[test]
    fn test_resolve_personal_choice() {
        let mut game = new_match();
        game.current_round_index = 2;
        game.rounds[2].details.beneficial_choice = Some(Choice::B);
        for (i, &player) in players().iter().enumerate() {
            let choice = if i % 2 == 0 { Choice::A } else { Choice::B };
            game.rounds[2].answers.insert(player, Answer::Choice(choice));
        }

        resolve_current_round(&mut game).unwrap();
        assert_eq!(game.scores[&101], 0);
        assert_eq!(game.scores[&102], 2);
    }

    #[test]
    fn test_resolve_social_voting_and_completion() {
        let mut game = new_match();
        game.current_round_index = 4;
        for &player in &players() {
            let target = if player == 101 { 102 } else { 101 };
            game.rounds[4].answers.insert(player, Answer::Number(target));
        }

        let result = resolve_current_round(&mut game).unwrap();
        assert_eq!(result.scores[&101], 9);
        assert_eq!(result.scores[&102], 1);
        assert!(game.completed);
        assert_eq!(game.current_round_index, 5);
    }

    #[test]
    fn test_unconfigured_rounds_are_internal_errors() {
        let mut game = new_match();
        game.rounds[0].details.correct_option = None;
        let err = resolve_current_round(&mut game).unwrap_err();
        assert!(matches!(err, ArenaError::Internal { .. }));
        assert!(!game.rounds[0].resolved);

        game.current_round_index = 2;
        game.rounds[2].details.beneficial_choice = None;
        assert!(resolve_current_round(&mut game).is_err());
    }
}
