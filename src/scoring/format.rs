use serde::{Deserialize, Serialize};

use super::types::{get_scoring_type_config, ScoringType};

/// Optional annotations that specialize how a score is rendered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreMetadata {
    pub hits: Option<u32>,
    pub attempts: Option<u32>,
    pub numerator: Option<f64>,
    pub denominator: Option<f64>,
    /// Unit label chosen for display; the score must already be converted to it.
    pub display_unit: Option<String>,
}

/// Renders a score for humans. Never fails: metadata that does not fit the
/// scoring type is ignored and the generic format is used instead.
pub fn format_score(score: f64, scoring_type: ScoringType, metadata: Option<&ScoreMetadata>) -> String {
    let definition = get_scoring_type_config(scoring_type);

    match (scoring_type, metadata) {
        (
            ScoringType::Accuracy,
            Some(ScoreMetadata {
                hits: Some(hits),
                attempts: Some(attempts),
                ..
            }),
        ) => format!("{}/{} ({}%)", hits, attempts, to_fixed(score, 1)),
        (
            ScoringType::Ratio,
            Some(ScoreMetadata {
                numerator: Some(numerator),
                denominator: Some(denominator),
                ..
            }),
        ) => format!(
            "{} ÷ {} = {}",
            to_fixed(*numerator, 1),
            to_fixed(*denominator, 1),
            to_fixed(score, 2)
        ),
        (ScoringType::Rank, _) => format!("{} place", ordinal(score.round() as i64)),
        (
            ScoringType::Distance | ScoringType::Weight,
            Some(ScoreMetadata {
                display_unit: Some(unit),
                ..
            }),
        ) => format!("{} {}", to_fixed(score, 1), unit),
        _ => {
            let value = if definition.allow_decimals {
                to_fixed(score, 2)
            } else {
                format!("{}", score.round() as i64)
            };
            format!("{} {}", value, definition.unit).trim_end().to_string()
        }
    }
}

/// Fixed-point rendering that rounds halves away from zero, so 0.125 shows
/// as 0.13 rather than the banker's 0.12.
pub fn to_fixed(value: f64, digits: u32) -> String {
    let scale = 10f64.powi(digits as i32);
    let rounded = (value * scale).round() / scale;
    format!("{:.*}", digits as usize, rounded)
}

/// English ordinal: 1st, 2nd, 3rd, 4th, ..., 11th, 12th, 13th, ..., 21st.
pub fn ordinal(n: i64) -> String {
    let suffix = match (n.rem_euclid(100), n.rem_euclid(10)) {
        (11..=13, _) => "th",
        (_, 1) => "st",
        (_, 2) => "nd",
        (_, 3) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

/// Hit rate as a percentage. Zero attempts yields 0; hits above attempts are capped.
pub fn accuracy_percentage(hits: u32, attempts: u32) -> f64 {
    if attempts == 0 {
        return 0.0;
    }
    f64::from(hits.min(attempts)) / f64::from(attempts) * 100.0
}

/// Quotient of a ratio input. A zero denominator yields 0.
pub fn ratio_value(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        return 0.0;
    }
    numerator / denominator
}
