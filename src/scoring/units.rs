use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::ScoringType;

/// Display units for measurement scoring types.
///
/// Scores are always stored canonically (meters for distance, kilograms for
/// weight); these units only exist at the input and display edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementUnit {
    Meters,
    Kilometers,
    Feet,
    Yards,
    Miles,
    Kilograms,
    Grams,
    Pounds,
    Ounces,
}

const DISTANCE_UNITS: [MeasurementUnit; 5] = [
    MeasurementUnit::Meters,
    MeasurementUnit::Kilometers,
    MeasurementUnit::Feet,
    MeasurementUnit::Yards,
    MeasurementUnit::Miles,
];

const WEIGHT_UNITS: [MeasurementUnit; 4] = [
    MeasurementUnit::Kilograms,
    MeasurementUnit::Grams,
    MeasurementUnit::Pounds,
    MeasurementUnit::Ounces,
];

impl MeasurementUnit {
    /// How many canonical units one of this unit is worth.
    fn canonical_factor(&self) -> f64 {
        match self {
            MeasurementUnit::Meters => 1.0,
            MeasurementUnit::Kilometers => 1000.0,
            MeasurementUnit::Feet => 0.3048,
            MeasurementUnit::Yards => 0.9144,
            MeasurementUnit::Miles => 1609.344,
            MeasurementUnit::Kilograms => 1.0,
            MeasurementUnit::Grams => 0.001,
            MeasurementUnit::Pounds => 0.453_592_37,
            MeasurementUnit::Ounces => 0.028_349_523_125,
        }
    }

    pub fn to_canonical(&self, value: f64) -> f64 {
        value * self.canonical_factor()
    }

    pub fn from_canonical(&self, canonical: f64) -> f64 {
        canonical / self.canonical_factor()
    }

    pub fn label(&self) -> &'static str {
        match self {
            MeasurementUnit::Meters => "m",
            MeasurementUnit::Kilometers => "km",
            MeasurementUnit::Feet => "ft",
            MeasurementUnit::Yards => "yd",
            MeasurementUnit::Miles => "mi",
            MeasurementUnit::Kilograms => "kg",
            MeasurementUnit::Grams => "g",
            MeasurementUnit::Pounds => "lb",
            MeasurementUnit::Ounces => "oz",
        }
    }

    /// Parses a short label or a spelled-out unit name.
    pub fn from_label(label: &str) -> Option<Self> {
        let unit = match label.trim().to_ascii_lowercase().as_str() {
            "m" | "meter" | "meters" => MeasurementUnit::Meters,
            "km" | "kilometer" | "kilometers" => MeasurementUnit::Kilometers,
            "ft" | "foot" | "feet" => MeasurementUnit::Feet,
            "yd" | "yard" | "yards" => MeasurementUnit::Yards,
            "mi" | "mile" | "miles" => MeasurementUnit::Miles,
            "kg" | "kilogram" | "kilograms" => MeasurementUnit::Kilograms,
            "g" | "gram" | "grams" => MeasurementUnit::Grams,
            "lb" | "lbs" | "pound" | "pounds" => MeasurementUnit::Pounds,
            "oz" | "ounce" | "ounces" => MeasurementUnit::Ounces,
            _ => return None,
        };
        Some(unit)
    }

    pub fn applies_to(&self, scoring_type: ScoringType) -> bool {
        units_for(scoring_type).contains(self)
    }
}

impl fmt::Display for MeasurementUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Units a user may pick for the given scoring type. Empty for
/// non-measurement types.
pub fn units_for(scoring_type: ScoringType) -> &'static [MeasurementUnit] {
    match scoring_type {
        ScoringType::Distance => &DISTANCE_UNITS,
        ScoringType::Weight => &WEIGHT_UNITS,
        _ => &[],
    }
}
