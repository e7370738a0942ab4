//! Two-way arbitrage across bookmakers on head-to-head markets.
//!
//! For every event the best price per outcome is taken across all books. If
//! exactly two outcomes exist and their implied probabilities sum below 1,
//! staking each leg in proportion to its implied probability locks in a
//! profit of `1/sum - 1` per unit staked.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::{clamp_top, unpack, AnalyticsQuery, AnalyticsResponse};
use crate::error::{Error, Result, UNSUPPORTED_MARKET};
use crate::feed::{Bookmaker, FeedClient, OddsEvent, OddsQuery};
use crate::odds::OddsFormat;

/// The only market with exactly two mutually exclusive outcomes.
pub const ARBITRAGE_MARKET: &str = "h2h";
pub const MAX_TOP: i64 = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArbitrageLeg {
    pub outcome: String,
    pub bookmaker: String,
    pub bookmaker_title: String,
    pub price: f64,
    pub decimal_odds: f64,
    pub implied_probability: f64,
    /// Share of the total stake to place on this leg for an equal payout.
    pub stake_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArbitrageOpportunity {
    pub event_id: String,
    pub sport_key: String,
    pub commence_time: Option<DateTime<Utc>>,
    pub home_team: String,
    pub away_team: String,
    pub market: String,
    pub implied_sum: f64,
    pub edge_percent: f64,
    pub legs: Vec<ArbitrageLeg>,
}

pub async fn find_arbitrage(
    feed: &dyn FeedClient,
    query: &AnalyticsQuery,
) -> Result<AnalyticsResponse<ArbitrageOpportunity>> {
    let q = query.resolve()?;
    if q.market != ARBITRAGE_MARKET {
        return Err(Error::unsupported_market(&q.market, UNSUPPORTED_MARKET));
    }
    let top = clamp_top(query.top, MAX_TOP);

    let response = feed
        .get_odds(&OddsQuery {
            sport: q.sport.clone(),
            regions: q.regions.clone(),
            markets: vec![q.market.clone()],
            odds_format: q.odds_format,
        })
        .await?;
    let (events, remaining) = match unpack(response) {
        Ok(parts) => parts,
        Err(degraded) => return Ok(degraded),
    };

    let mut opportunities: Vec<ArbitrageOpportunity> = events
        .iter()
        .filter_map(|event| detect_two_way(event, &q.market, q.odds_format))
        .collect();
    opportunities.sort_by(|a, b| b.edge_percent.total_cmp(&a.edge_percent));
    opportunities.truncate(top);

    debug!(
        "Arbitrage scan for {}: {} opportunities in {} events",
        q.sport,
        opportunities.len(),
        events.len()
    );

    Ok(AnalyticsResponse {
        data: opportunities,
        remaining,
        warning: None,
    })
}

struct BestQuote<'a> {
    outcome: &'a str,
    price: f64,
    bookmaker: &'a Bookmaker,
}

/// Best-price two-way arbitrage for one event, if any.
pub fn detect_two_way(event: &OddsEvent, market_key: &str, format: OddsFormat) -> Option<ArbitrageOpportunity> {
    let mut best: Vec<BestQuote<'_>> = Vec::new();

    for bookmaker in &event.bookmakers {
        for market in bookmaker.markets.iter().filter(|m| m.key == market_key) {
            for outcome in &market.outcomes {
                let Some(price) = outcome.price.filter(|p| p.is_finite()) else {
                    continue;
                };
                match best.iter_mut().find(|q| q.outcome == outcome.name) {
                    Some(existing) => {
                        if price > existing.price {
                            existing.price = price;
                            existing.bookmaker = bookmaker;
                        }
                    }
                    None => best.push(BestQuote {
                        outcome: &outcome.name,
                        price,
                        bookmaker,
                    }),
                }
            }
        }
    }

    if best.len() != 2 {
        return None;
    }

    let priced: Vec<(f64, f64)> = best
        .iter()
        .map(|q| (format.to_decimal(q.price), format.implied_probability(q.price)))
        .collect();
    if priced.iter().any(|&(decimal, implied)| decimal <= 0.0 || implied <= 0.0) {
        return None;
    }

    let implied_sum: f64 = priced.iter().map(|&(_, implied)| implied).sum();
    if implied_sum >= 1.0 {
        return None;
    }

    let legs = best
        .iter()
        .zip(&priced)
        .map(|(quote, &(decimal_odds, implied_probability))| ArbitrageLeg {
            outcome: quote.outcome.to_string(),
            bookmaker: quote.bookmaker.key.clone(),
            bookmaker_title: quote.bookmaker.title.clone(),
            price: quote.price,
            decimal_odds,
            implied_probability,
            stake_fraction: implied_probability / implied_sum,
        })
        .collect();

    Some(ArbitrageOpportunity {
        event_id: event.id.clone(),
        sport_key: event.sport_key.clone(),
        commence_time: event.commence_time,
        home_team: event.home_team.clone(),
        away_team: event.away_team.clone(),
        market: market_key.to_string(),
        implied_sum,
        edge_percent: (1.0 / implied_sum - 1.0) * 100.0,
        legs,
    })
}
