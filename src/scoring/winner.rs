use serde::{Deserialize, Serialize};

use super::types::{get_scoring_type_config, ScoringType};

/// Scores closer than this are considered tied.
pub const TIE_EPSILON: f64 = 0.0001;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub id: String,
    pub score: f64,
}

impl ScoreEntry {
    pub fn new(id: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

/// Whether a score takes part in winner determination. A literal zero means
/// "did not submit" for every type except rank.
pub fn counts_as_submitted(score: f64, scoring_type: ScoringType) -> bool {
    scoring_type == ScoringType::Rank || score != 0.0
}

/// Returns the ids of every entry tied for the best score.
///
/// `lower_is_better_override` pins the comparison direction for sessions
/// configured differently from the catalog default. An empty result means
/// nobody won: no entries, or every entry was a zero.
pub fn determine_winner(
    scores: &[ScoreEntry],
    scoring_type: ScoringType,
    lower_is_better_override: Option<bool>,
) -> Vec<String> {
    if scores.is_empty() {
        return Vec::new();
    }

    let lower_is_better = lower_is_better_override
        .unwrap_or_else(|| get_scoring_type_config(scoring_type).lower_is_better);

    let mut candidates: Vec<&ScoreEntry> = scores
        .iter()
        .filter(|entry| counts_as_submitted(entry.score, scoring_type))
        .collect();

    if candidates.is_empty() {
        return Vec::new();
    }

    if lower_is_better {
        candidates.sort_by(|a, b| a.score.total_cmp(&b.score));
    } else {
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    }

    let winning_score = candidates[0].score;

    candidates
        .into_iter()
        .filter(|entry| (entry.score - winning_score).abs() < TIE_EPSILON)
        .map(|entry| entry.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn entries(scores: &[(&str, f64)]) -> Vec<ScoreEntry> {
        scores
            .iter()
            .map(|(id, score)| ScoreEntry::new(*id, *score))
            .collect()
    }

    #[test]
    fn empty_input_has_no_winner() {
        assert!(determine_winner(&[], ScoringType::Points, None).is_empty());
    }

    #[test]
    fn single_zero_score_has_no_winner_except_for_rank() {
        let solo = entries(&[("a", 0.0)]);
        assert!(determine_winner(&solo, ScoringType::Points, None).is_empty());
        assert_eq!(determine_winner(&solo, ScoringType::Rank, None), vec!["a"]);
    }

    #[test]
    fn zero_scores_are_excluded_from_consideration() {
        let scores = entries(&[("a", 0.0), ("b", 4.0)]);
        assert_eq!(
            determine_winner(&scores, ScoringType::ReactionTime, None),
            vec!["b"]
        );
    }

    #[test]
    fn exact_and_near_ties_return_every_tied_player() {
        let exact = entries(&[("a", 10.0), ("b", 10.0)]);
        assert_eq!(determine_winner(&exact, ScoringType::Points, None), vec!["a", "b"]);

        let near = entries(&[("a", 10.00005), ("b", 10.0)]);
        assert_eq!(determine_winner(&near, ScoringType::Points, None), vec!["a", "b"]);

        let gap = entries(&[("a", 10.01), ("b", 10.0)]);
        assert_eq!(determine_winner(&gap, ScoringType::Points, None), vec!["a"]);
    }

    #[test]
    fn override_pins_comparison_direction() {
        let scores = entries(&[("five", 5.0), ("three", 3.0)]);
        assert_eq!(
            determine_winner(&scores, ScoringType::Points, Some(true)),
            vec!["three"]
        );
        assert_eq!(
            determine_winner(&scores, ScoringType::Points, Some(false)),
            vec!["five"]
        );
        assert_eq!(determine_winner(&scores, ScoringType::Points, None), vec!["five"]);
        assert_eq!(
            determine_winner(&scores, ScoringType::Duration, None),
            vec!["three"]
        );
    }

    #[test]
    fn winner_set_does_not_depend_on_input_order() {
        let base = [("a", 7.0), ("b", 9.0), ("c", 9.0), ("d", 0.0), ("e", 2.5)];
        let expected: HashSet<String> = ["b", "c"].iter().map(|s| s.to_string()).collect();

        let mut permuted = base.to_vec();
        for rotation in 0..base.len() {
            permuted.rotate_left(1);
            let mut reversed = permuted.clone();
            reversed.reverse();

            for order in [&permuted, &reversed] {
                let winners: HashSet<String> =
                    determine_winner(&entries(order), ScoringType::Points, None)
                        .into_iter()
                        .collect();
                assert_eq!(winners, expected, "rotation {}", rotation);
            }
        }
    }
}
