//! Odds math: American / decimal / implied probability conversions.
//!
//! Every function is total. Invalid input (zero, NaN, infinities, non-positive
//! decimals) yields 0 instead of panicking so callers can feed raw upstream
//! prices straight through.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Implied probability of an American price.
pub fn american_to_implied_probability(odds: f64) -> f64 {
    if !odds.is_finite() || odds == 0.0 {
        return 0.0;
    }
    if odds > 0.0 {
        100.0 / (odds + 100.0)
    } else {
        let abs = odds.abs();
        abs / (abs + 100.0)
    }
}

/// Decimal (European) odds of an American price.
pub fn american_to_decimal(odds: f64) -> f64 {
    if !odds.is_finite() || odds == 0.0 {
        return 0.0;
    }
    if odds > 0.0 {
        1.0 + odds / 100.0
    } else {
        1.0 + 100.0 / odds.abs()
    }
}

pub fn decimal_to_implied_probability(decimal: f64) -> f64 {
    if decimal.is_finite() && decimal > 0.0 {
        1.0 / decimal
    } else {
        0.0
    }
}

/// Price formats understood by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OddsFormat {
    #[default]
    American,
    Decimal,
    /// Hong Kong odds: net profit per unit staked (decimal - 1).
    HongKong,
}

impl OddsFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OddsFormat::American => "american",
            OddsFormat::Decimal => "decimal",
            OddsFormat::HongKong => "hongkong",
        }
    }

    /// Convert a raw price in this format to decimal odds (0 when invalid).
    pub fn to_decimal(&self, price: f64) -> f64 {
        match self {
            OddsFormat::American => american_to_decimal(price),
            OddsFormat::Decimal => {
                if price.is_finite() && price > 0.0 {
                    price
                } else {
                    0.0
                }
            }
            OddsFormat::HongKong => {
                if price.is_finite() && price > 0.0 {
                    price + 1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn implied_probability(&self, price: f64) -> f64 {
        match self {
            OddsFormat::American => american_to_implied_probability(price),
            _ => decimal_to_implied_probability(self.to_decimal(price)),
        }
    }
}

impl fmt::Display for OddsFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OddsFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "american" => Ok(OddsFormat::American),
            "decimal" => Ok(OddsFormat::Decimal),
            "hongkong" => Ok(OddsFormat::HongKong),
            other => Err(format!(
                "unsupported odds format '{other}', expected american, decimal or hongkong"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn american_implied_probability_positive_and_negative() {
        assert_relative_eq!(american_to_implied_probability(150.0), 0.4, epsilon = 1e-12);
        assert_relative_eq!(american_to_implied_probability(-120.0), 120.0 / 220.0, epsilon = 1e-12);
        assert_relative_eq!(american_to_implied_probability(100.0), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn american_to_decimal_values() {
        assert_relative_eq!(american_to_decimal(150.0), 2.5, epsilon = 1e-12);
        assert_relative_eq!(american_to_decimal(-200.0), 1.5, epsilon = 1e-12);
    }

    #[test]
    fn invalid_inputs_return_zero() {
        for bad in [0.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(american_to_implied_probability(bad), 0.0);
            assert_eq!(american_to_decimal(bad), 0.0);
        }
        assert_eq!(decimal_to_implied_probability(0.0), 0.0);
        assert_eq!(decimal_to_implied_probability(-1.5), 0.0);
        assert_eq!(decimal_to_implied_probability(f64::NAN), 0.0);
    }

    #[test]
    fn american_round_trips_through_decimal() {
        for odds in [-10000.0, -450.0, -110.0, -101.0, 101.0, 105.0, 150.0, 333.0, 2500.0] {
            let via_decimal = decimal_to_implied_probability(american_to_decimal(odds));
            assert_relative_eq!(via_decimal, american_to_implied_probability(odds), epsilon = 1e-12);
        }
    }

    #[test]
    fn format_dispatch() {
        assert_relative_eq!(OddsFormat::Decimal.implied_probability(2.0), 0.5, epsilon = 1e-12);
        assert_relative_eq!(OddsFormat::HongKong.to_decimal(0.9), 1.9, epsilon = 1e-12);
        assert_relative_eq!(OddsFormat::American.to_decimal(-110.0), 1.0 + 100.0 / 110.0, epsilon = 1e-12);
        assert_eq!(OddsFormat::Decimal.to_decimal(-3.0), 0.0);
    }

    #[test]
    fn parses_format_names() {
        assert_eq!("American".parse::<OddsFormat>(), Ok(OddsFormat::American));
        assert_eq!(" hongkong ".parse::<OddsFormat>(), Ok(OddsFormat::HongKong));
        assert!("fractional".parse::<OddsFormat>().is_err());
    }
}
