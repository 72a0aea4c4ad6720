use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::QueueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayUnit {
    Minutes,
    Hours,
    Days,
}

impl DelayUnit {
    pub fn seconds(self) -> u64 {
        match self {
            Self::Minutes => 60,
            Self::Hours => 3_600,
            Self::Days => 86_400,
        }
    }
}

impl FromStr for DelayUnit {
    type Err = QueueError;

    /// Accepts plural, singular and short forms, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minutes" | "minute" | "min" | "m" => Ok(Self::Minutes),
            "hours" | "hour" | "h" => Ok(Self::Hours),
            "days" | "day" | "d" => Ok(Self::Days),
            _ => Err(QueueError::InvalidDelayUnit(s.to_owned())),
        }
    }
}

impl fmt::Display for DelayUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minutes => write!(f, "minutes"),
            Self::Hours => write!(f, "hours"),
            Self::Days => write!(f, "days"),
        }
    }
}

/// Whole seconds for `value` `unit`s, clamped at zero.  Fractions round
/// down; NaN and negatives are zero.
pub fn calculate_delay_seconds(value: f64, unit: DelayUnit) -> u64 {
    let seconds = value * unit.seconds() as f64;
    if seconds.is_nan() || seconds <= 0.0 {
        0
    } else {
        // Saturates at u64::MAX for absurd inputs.
        seconds.floor() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_units() {
        assert_eq!(calculate_delay_seconds(5.0, DelayUnit::Minutes), 300);
        assert_eq!(calculate_delay_seconds(2.0, DelayUnit::Hours), 7_200);
        assert_eq!(calculate_delay_seconds(1.5, DelayUnit::Days), 129_600);
    }

    #[test]
    fn clamps_non_positive_to_zero() {
        assert_eq!(calculate_delay_seconds(0.0, DelayUnit::Days), 0);
        assert_eq!(calculate_delay_seconds(-3.0, DelayUnit::Hours), 0);
        assert_eq!(calculate_delay_seconds(f64::NAN, DelayUnit::Minutes), 0);
    }

    #[test]
    fn parses_unit_aliases() {
        assert_eq!("Hours".parse::<DelayUnit>().unwrap(), DelayUnit::Hours);
        assert_eq!("day".parse::<DelayUnit>().unwrap(), DelayUnit::Days);
        assert!(matches!("weeks".parse::<DelayUnit>(), Err(QueueError::InvalidDelayUnit(u)) if u == "weeks"));
    }
}
