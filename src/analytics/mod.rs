//! Read-only analytics computed straight from fresh feed data (never the store).

use serde::Serialize;

use crate::error::{Error, Result};
use crate::feed::FeedResponse;
use crate::odds::OddsFormat;

pub mod arbitrage;
pub mod cheat_sheet;
pub mod positive_ev;

pub use arbitrage::{find_arbitrage, ArbitrageLeg, ArbitrageOpportunity};
pub use cheat_sheet::{build_cheat_sheet, CheatSheetRow};
pub use positive_ev::{find_positive_ev, PositiveEvBet, PositiveEvQuery, PositiveEvReport};

pub const DEFAULT_TOP: i64 = 50;
pub const DEFAULT_REGION: &str = "us";

/// Request shared by the arbitrage and cheat-sheet views.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsQuery {
    pub sport: String,
    pub market: String,
    pub regions: Option<Vec<String>>,
    pub odds_format: Option<OddsFormat>,
    pub top: Option<i64>,
}

impl AnalyticsQuery {
    pub fn new(sport: impl Into<String>, market: impl Into<String>) -> Self {
        Self {
            sport: sport.into(),
            market: market.into(),
            ..Default::default()
        }
    }
}

/// Validated, defaulted form of [`AnalyticsQuery`].
#[derive(Debug, Clone)]
pub(crate) struct ResolvedQuery {
    pub sport: String,
    pub market: String,
    pub regions: Vec<String>,
    pub odds_format: OddsFormat,
}

impl AnalyticsQuery {
    pub(crate) fn resolve(&self) -> Result<ResolvedQuery> {
        let sport = require("sport", &self.sport)?;
        let market = require("market", &self.market)?;
        let regions = self
            .regions
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_REGION.to_string()]);
        Ok(ResolvedQuery {
            sport,
            market,
            regions,
            odds_format: self.odds_format.unwrap_or_default(),
        })
    }
}

pub(crate) fn require(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Validation(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

/// Caller limit, defaulted and clamped to `[1, max]`.
pub(crate) fn clamp_top(top: Option<i64>, max: i64) -> usize {
    top.unwrap_or(DEFAULT_TOP).clamp(1, max) as usize
}

/// `{ data, remaining, warning? }` as returned to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsResponse<T> {
    pub data: Vec<T>,
    pub remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl<T> AnalyticsResponse<T> {
    pub fn degraded(warning: String) -> Self {
        Self {
            data: Vec::new(),
            remaining: None,
            warning: Some(warning),
        }
    }
}

/// Split a feed response into payload + quota, or the pass-through degraded response.
pub(crate) fn unpack<T, U>(
    response: FeedResponse<T>,
) -> std::result::Result<(T, Option<u32>), AnalyticsResponse<U>> {
    match response {
        FeedResponse::Fresh { data, remaining } => Ok((data, remaining)),
        FeedResponse::NotConfigured { warning } => Err(AnalyticsResponse::degraded(warning)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_is_clamped() {
        assert_eq!(clamp_top(None, 200), 50);
        assert_eq!(clamp_top(Some(0), 200), 1);
        assert_eq!(clamp_top(Some(-5), 200), 1);
        assert_eq!(clamp_top(Some(1000), 200), 200);
        assert_eq!(clamp_top(Some(1000), 500), 500);
    }

    #[test]
    fn resolve_requires_sport_and_market() {
        assert!(AnalyticsQuery::new("", "h2h").resolve().is_err());
        assert!(AnalyticsQuery::new("basketball_nba", " ").resolve().is_err());

        let resolved = AnalyticsQuery::new(" basketball_nba ", "h2h").resolve().unwrap();
        assert_eq!(resolved.sport, "basketball_nba");
        assert_eq!(resolved.regions, vec!["us"]);
        assert_eq!(resolved.odds_format, OddsFormat::American);
    }
}
