//! Severity flags.

use schemars::JsonSchema;

use crate::{catalog::Bounds, prelude::*};

/// Below `min * CRITICAL_LOW_RATIO` is critical.
const CRITICAL_LOW_RATIO: f64 = 0.8;
/// Below `min * ABNORMAL_LOW_RATIO` is abnormal.
const ABNORMAL_LOW_RATIO: f64 = 0.9;
/// Above `max * ABNORMAL_HIGH_RATIO` is abnormal.
const ABNORMAL_HIGH_RATIO: f64 = 1.1;
/// Above `max * CRITICAL_HIGH_RATIO` is critical.
const CRITICAL_HIGH_RATIO: f64 = 1.2;

/// How far a value is from its reference range.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, JsonSchema, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    /// Inside the reference range.
    Normal,
    /// Outside the range, but within 10% of the nearest bound.
    Borderline,
    /// Between 10% and 20% outside the range.
    Abnormal,
    /// More than 20% outside the range.
    Critical,
}

impl Flag {
    /// Classify `value` against `bounds`.
    ///
    /// The ladder is proportional to the bound it crossed, so it behaves the
    /// same way regardless of the unit's magnitude.
    pub fn classify(value: f64, bounds: Bounds) -> Self {
        let Bounds { min, max } = bounds;
        if value < min {
            if value < min * CRITICAL_LOW_RATIO {
                Flag::Critical
            } else if value < min * ABNORMAL_LOW_RATIO {
                Flag::Abnormal
            } else {
                Flag::Borderline
            }
        } else if value > max {
            if value > max * CRITICAL_HIGH_RATIO {
                Flag::Critical
            } else if value > max * ABNORMAL_HIGH_RATIO {
                Flag::Abnormal
            } else {
                Flag::Borderline
            }
        } else {
            Flag::Normal
        }
    }

    /// Is this anything other than [`Flag::Normal`]?
    pub fn is_flagged(self) -> bool {
        self != Flag::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEMOGLOBIN: Bounds = Bounds {
        min: 120.0,
        max: 155.0,
    };

    #[test]
    fn test_inside_range_is_normal() {
        assert_eq!(Flag::classify(150.0, HEMOGLOBIN), Flag::Normal);
        assert_eq!(Flag::classify(120.0, HEMOGLOBIN), Flag::Normal);
        assert_eq!(Flag::classify(155.0, HEMOGLOBIN), Flag::Normal);
    }

    #[test]
    fn test_low_ladder() {
        // 120 * 0.9 = 108, 120 * 0.8 = 96.
        assert_eq!(Flag::classify(110.0, HEMOGLOBIN), Flag::Borderline);
        assert_eq!(Flag::classify(108.0, HEMOGLOBIN), Flag::Borderline);
        assert_eq!(Flag::classify(100.0, HEMOGLOBIN), Flag::Abnormal);
        assert_eq!(Flag::classify(96.0, HEMOGLOBIN), Flag::Abnormal);
        assert_eq!(Flag::classify(95.0, HEMOGLOBIN), Flag::Critical);
    }

    #[test]
    fn test_high_ladder() {
        // 155 * 1.1 = 170.5, 155 * 1.2 = 186.
        assert_eq!(Flag::classify(160.0, HEMOGLOBIN), Flag::Borderline);
        assert_eq!(Flag::classify(170.0, HEMOGLOBIN), Flag::Borderline);
        assert_eq!(Flag::classify(171.0, HEMOGLOBIN), Flag::Abnormal);
        assert_eq!(Flag::classify(186.0, HEMOGLOBIN), Flag::Abnormal);
        assert_eq!(Flag::classify(187.0, HEMOGLOBIN), Flag::Critical);
    }

    #[test]
    fn test_zero_minimum() {
        let bounds = Bounds { min: 0.0, max: 5.0 };
        assert_eq!(Flag::classify(0.0, bounds), Flag::Normal);
        assert_eq!(Flag::classify(-1.0, bounds), Flag::Critical);
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(serde_json::to_value(Flag::Borderline).unwrap(), "borderline");
        assert!(Flag::Critical.is_flagged());
        assert!(!Flag::Normal.is_flagged());
    }
}
