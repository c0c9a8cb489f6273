use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, EnumIter, EnumString};

/// Every scoring type the catalog knows about.
///
/// Identifiers are the snake_case strings stored by the backend. Parsing an
/// unknown identifier does not fail: see [`ScoringType::from_id`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScoringType {
    Points,
    Wins,
    Accuracy,
    Reps,
    Distance,
    Weight,
    Streak,
    ReactionTime,
    Duration,
    Rank,
    Ratio,
}

impl ScoringType {
    /// Resolves a backend identifier, degrading to `Points` when the
    /// identifier belongs to a scoring type this build does not know.
    pub fn from_id(id: &str) -> Self {
        ScoringType::from_str(id).unwrap_or(ScoringType::Points)
    }

    pub fn id(&self) -> &str {
        self.as_ref()
    }

    /// Types whose canonical score is a physical quantity with selectable units.
    pub fn is_measurement(&self) -> bool {
        matches!(self, ScoringType::Distance | ScoringType::Weight)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringCategory {
    Competitive,
    Speed,
    Endurance,
    Ranking,
}

/// How the score input widget collects a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    Timer,
    QuickTally,
    Measurement,
    AccuracyDual,
    RatioDual,
    PositionSelector,
    UnitMeasurement,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoringTypeDefinition {
    pub id: ScoringType,
    pub label: &'static str,
    pub category: ScoringCategory,
    pub unit: &'static str,
    pub lower_is_better: bool,
    pub step: f64,
    pub allow_decimals: bool,
    pub input_mode: InputMode,
}

static CATALOG: [ScoringTypeDefinition; 11] = [
    ScoringTypeDefinition {
        id: ScoringType::Points,
        label: "Points",
        category: ScoringCategory::Competitive,
        unit: "pts",
        lower_is_better: false,
        step: 1.0,
        allow_decimals: false,
        input_mode: InputMode::QuickTally,
    },
    ScoringTypeDefinition {
        id: ScoringType::Wins,
        label: "Wins",
        category: ScoringCategory::Competitive,
        unit: "wins",
        lower_is_better: false,
        step: 1.0,
        allow_decimals: false,
        input_mode: InputMode::QuickTally,
    },
    ScoringTypeDefinition {
        id: ScoringType::Accuracy,
        label: "Accuracy",
        category: ScoringCategory::Competitive,
        unit: "%",
        lower_is_better: false,
        step: 1.0,
        allow_decimals: true,
        input_mode: InputMode::AccuracyDual,
    },
    ScoringTypeDefinition {
        id: ScoringType::Reps,
        label: "Reps",
        category: ScoringCategory::Endurance,
        unit: "reps",
        lower_is_better: false,
        step: 1.0,
        allow_decimals: false,
        input_mode: InputMode::QuickTally,
    },
    ScoringTypeDefinition {
        id: ScoringType::Distance,
        label: "Distance",
        category: ScoringCategory::Competitive,
        unit: "m",
        lower_is_better: false,
        step: 0.1,
        allow_decimals: true,
        input_mode: InputMode::UnitMeasurement,
    },
    ScoringTypeDefinition {
        id: ScoringType::Weight,
        label: "Weight",
        category: ScoringCategory::Endurance,
        unit: "kg",
        lower_is_better: false,
        step: 0.5,
        allow_decimals: true,
        input_mode: InputMode::UnitMeasurement,
    },
    ScoringTypeDefinition {
        id: ScoringType::Streak,
        label: "Streak",
        category: ScoringCategory::Endurance,
        unit: "in a row",
        lower_is_better: false,
        step: 1.0,
        allow_decimals: false,
        input_mode: InputMode::QuickTally,
    },
    ScoringTypeDefinition {
        id: ScoringType::ReactionTime,
        label: "Reaction Time",
        category: ScoringCategory::Speed,
        unit: "ms",
        lower_is_better: true,
        step: 1.0,
        allow_decimals: false,
        input_mode: InputMode::Timer,
    },
    ScoringTypeDefinition {
        id: ScoringType::Duration,
        label: "Duration",
        category: ScoringCategory::Speed,
        unit: "s",
        lower_is_better: true,
        step: 0.1,
        allow_decimals: true,
        input_mode: InputMode::Timer,
    },
    ScoringTypeDefinition {
        id: ScoringType::Rank,
        label: "Rank",
        category: ScoringCategory::Ranking,
        unit: "place",
        lower_is_better: true,
        step: 1.0,
        allow_decimals: false,
        input_mode: InputMode::PositionSelector,
    },
    ScoringTypeDefinition {
        id: ScoringType::Ratio,
        label: "Ratio",
        category: ScoringCategory::Competitive,
        unit: "",
        lower_is_better: false,
        step: 0.01,
        allow_decimals: true,
        input_mode: InputMode::RatioDual,
    },
];

/// Anything that can name a scoring type: the enum itself or a raw
/// backend identifier.
pub trait ScoringTypeKey {
    fn resolve(&self) -> ScoringType;
}

impl ScoringTypeKey for ScoringType {
    fn resolve(&self) -> ScoringType {
        *self
    }
}

impl ScoringTypeKey for &str {
    fn resolve(&self) -> ScoringType {
        ScoringType::from_id(self)
    }
}

impl ScoringTypeKey for String {
    fn resolve(&self) -> ScoringType {
        ScoringType::from_id(self)
    }
}

/// Looks up a catalog entry. Unknown identifiers get the `points` entry.
pub fn get_scoring_type_config<K: ScoringTypeKey>(key: K) -> &'static ScoringTypeDefinition {
    let scoring_type = key.resolve();
    CATALOG
        .iter()
        .find(|definition| definition.id == scoring_type)
        .unwrap_or(&CATALOG[0])
}

/// All catalog entries, `points` first.
pub fn scoring_catalog() -> &'static [ScoringTypeDefinition] {
    &CATALOG
}

/// Scoring types in declaration order.
pub fn scoring_types() -> impl Iterator<Item = ScoringType> {
    ScoringType::iter()
}
