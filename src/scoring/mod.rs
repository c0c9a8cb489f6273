// Scoring engine: catalog, formatting and winner determination.
//
// Everything here is pure and never fails. Unknown scoring types degrade to
// the `points` definition, malformed metadata degrades to generic formatting
// and empty input degrades to empty output.

pub use format::{
    accuracy_percentage, format_score, ordinal, ratio_value, to_fixed, ScoreMetadata,
};
pub use types::{
    get_scoring_type_config, scoring_catalog, scoring_types, InputMode, ScoringCategory,
    ScoringType, ScoringTypeDefinition, ScoringTypeKey,
};
pub use units::{units_for, MeasurementUnit};
pub use winner::{counts_as_submitted, determine_winner, ScoreEntry, TIE_EPSILON};

mod format;
mod types;
mod units;
mod winner;
