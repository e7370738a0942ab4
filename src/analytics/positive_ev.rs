//! Positive expected value detection.
//!
//! The fair probability of a proposition is the mean implied probability
//! quoted by every bookmaker other than the one offering the best price.
//! The best price is +EV when `fair * decimal_odds > 1`. Vig is not removed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use super::{require, DEFAULT_REGION};
use crate::error::Result;
use crate::feed::{Bookmaker, FeedClient, FeedResponse, OddsEvent, OddsQuery};
use crate::odds::OddsFormat;

/// Other books needed to form a consensus against the best price.
pub const MIN_CONSENSUS_BOOKS: usize = 2;
pub const UNKNOWN_SPORT_GROUP: &str = "Unknown";
pub const DEFAULT_EV_MARKETS: [&str; 3] = ["h2h", "spreads", "totals"];

#[derive(Debug, Clone, Default)]
pub struct PositiveEvQuery {
    pub sport: String,
    pub region: Option<String>,
    pub markets: Option<Vec<String>>,
    pub odds_format: Option<OddsFormat>,
}

impl PositiveEvQuery {
    pub fn new(sport: impl Into<String>) -> Self {
        Self {
            sport: sport.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositiveEvBet {
    pub event_id: String,
    pub sport_key: String,
    pub sport_title: String,
    pub sport_group: String,
    pub commence_time: Option<DateTime<Utc>>,
    pub home_team: String,
    pub away_team: String,
    pub market: String,
    pub outcome: String,
    pub description: Option<String>,
    pub point: Option<f64>,
    pub bookmaker: String,
    pub bookmaker_title: String,
    pub price: f64,
    pub decimal_odds: f64,
    pub implied_probability: f64,
    pub fair_probability: f64,
    pub ev_percent: f64,
    pub books_compared: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositiveEvReport {
    pub bets: Vec<PositiveEvBet>,
    pub count: usize,
    pub remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

pub async fn find_positive_ev(feed: &dyn FeedClient, query: &PositiveEvQuery) -> Result<PositiveEvReport> {
    let sport = require("sport", &query.sport)?;
    let region = query
        .region
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_REGION)
        .to_string();
    let markets = query
        .markets
        .clone()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_EV_MARKETS.iter().map(|m| m.to_string()).collect());
    let odds_format = query.odds_format.unwrap_or_default();

    let response = feed
        .get_odds(&OddsQuery {
            sport: sport.clone(),
            regions: vec![region],
            markets,
            odds_format,
        })
        .await?;
    let (events, remaining) = match response {
        FeedResponse::Fresh { data, remaining } => (data, remaining),
        FeedResponse::NotConfigured { warning } => {
            return Ok(PositiveEvReport {
                bets: Vec::new(),
                count: 0,
                remaining: None,
                warning: Some(warning),
            })
        }
    };

    let (sport_title, sport_group) = resolve_sport(feed, &sport).await?;

    let mut bets: Vec<PositiveEvBet> = events
        .iter()
        .flat_map(|event| detect_positive_ev(event, odds_format))
        .map(|mut bet| {
            bet.sport_title = sport_title.clone();
            bet.sport_group = sport_group.clone();
            bet
        })
        .collect();
    bets.sort_by(|a, b| b.ev_percent.total_cmp(&a.ev_percent));

    debug!("Positive EV scan for {}: {} bets in {} events", sport, bets.len(), events.len());

    Ok(PositiveEvReport {
        count: bets.len(),
        bets,
        remaining,
        warning: None,
    })
}

/// Sport title and group from the full listing; the raw key and `Unknown` when absent.
async fn resolve_sport(feed: &dyn FeedClient, sport_key: &str) -> Result<(String, String)> {
    let fallback = (sport_key.to_string(), UNKNOWN_SPORT_GROUP.to_string());
    let sports = match feed.get_sports().await? {
        FeedResponse::Fresh { data, .. } => data,
        FeedResponse::NotConfigured { .. } => return Ok(fallback),
    };
    Ok(sports
        .into_iter()
        .find(|s| s.key == sport_key)
        .map(|s| (s.title, s.group))
        .unwrap_or(fallback))
}

type PropositionKey<'a> = (&'a str, &'a str, Option<&'a str>, Option<u64>);

struct Quote<'a> {
    bookmaker: &'a Bookmaker,
    price: f64,
    implied: f64,
}

/// +EV bets for one event; sport annotations are left blank.
pub fn detect_positive_ev(event: &OddsEvent, format: OddsFormat) -> Vec<PositiveEvBet> {
    let mut order: Vec<PropositionKey<'_>> = Vec::new();
    let mut quotes: HashMap<PropositionKey<'_>, Vec<Quote<'_>>> = HashMap::new();

    for bookmaker in &event.bookmakers {
        for market in &bookmaker.markets {
            for outcome in &market.outcomes {
                let Some(price) = outcome.price.filter(|p| p.is_finite()) else {
                    continue;
                };
                let implied = format.implied_probability(price);
                if implied <= 0.0 {
                    continue;
                }
                let key = (
                    market.key.as_str(),
                    outcome.name.as_str(),
                    outcome.description.as_deref(),
                    outcome.point.map(f64::to_bits),
                );
                quotes
                    .entry(key)
                    .or_insert_with(|| {
                        order.push(key);
                        Vec::new()
                    })
                    .push(Quote {
                        bookmaker,
                        price,
                        implied,
                    });
            }
        }
    }

    let mut bets = Vec::new();
    for key in order {
        let Some(book_quotes) = quotes.get(&key) else {
            continue;
        };
        if book_quotes.len() < MIN_CONSENSUS_BOOKS + 1 {
            continue;
        }

        // First of the highest prices wins.
        let mut best_idx = 0;
        for (i, quote) in book_quotes.iter().enumerate() {
            if quote.price > book_quotes[best_idx].price {
                best_idx = i;
            }
        }
        let best = &book_quotes[best_idx];

        let others: Vec<f64> = book_quotes
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != best_idx)
            .map(|(_, q)| q.implied)
            .collect();
        let fair_probability = others.iter().sum::<f64>() / others.len() as f64;
        let decimal_odds = format.to_decimal(best.price);
        let ev_percent = (fair_probability * decimal_odds - 1.0) * 100.0;
        if ev_percent <= 0.0 {
            continue;
        }

        let (market, outcome, description, point) = key;
        bets.push(PositiveEvBet {
            event_id: event.id.clone(),
            sport_key: event.sport_key.clone(),
            sport_title: String::new(),
            sport_group: String::new(),
            commence_time: event.commence_time,
            home_team: event.home_team.clone(),
            away_team: event.away_team.clone(),
            market: market.to_string(),
            outcome: outcome.to_string(),
            description: description.map(str::to_string),
            point: point.map(f64::from_bits),
            bookmaker: best.bookmaker.key.clone(),
            bookmaker_title: best.bookmaker.title.clone(),
            price: best.price,
            decimal_odds,
            implied_probability: best.implied,
            fair_probability,
            ev_percent,
            books_compared: book_quotes.len(),
        });
    }
    bets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::mock::{book, event, outcome, MockFeed};
    use crate::feed::SportInfo;
    use crate::odds::{american_to_decimal, american_to_implied_probability};
    use approx::assert_relative_eq;

    fn three_books() -> OddsEvent {
        event(
            "e1",
            "Boston Celtics",
            "Miami Heat",
            vec![
                book("a", "h2h", vec![outcome("Boston Celtics", -110.0), outcome("Miami Heat", -110.0)]),
                book("b", "h2h", vec![outcome("Boston Celtics", -115.0), outcome("Miami Heat", -105.0)]),
                book("c", "h2h", vec![outcome("Boston Celtics", 120.0), outcome("Miami Heat", -140.0)]),
            ],
        )
    }

    #[test]
    fn flags_best_price_above_consensus() {
        let bets = detect_positive_ev(&three_books(), OddsFormat::American);
        let celtics = bets.iter().find(|b| b.outcome == "Boston Celtics").unwrap();

        let fair = (american_to_implied_probability(-110.0) + american_to_implied_probability(-115.0)) / 2.0;
        assert_eq!(celtics.bookmaker, "c");
        assert_eq!(celtics.price, 120.0);
        assert_eq!(celtics.books_compared, 3);
        assert_relative_eq!(celtics.fair_probability, fair, epsilon = 1e-12);
        assert_relative_eq!(
            celtics.ev_percent,
            (fair * american_to_decimal(120.0) - 1.0) * 100.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn identical_prices_are_not_positive() {
        let ev = event(
            "flat",
            "A",
            "B",
            ["x", "y", "z"]
                .iter()
                .map(|k| book(k, "h2h", vec![outcome("A", 100.0), outcome("B", 100.0)]))
                .collect(),
        );
        assert!(detect_positive_ev(&ev, OddsFormat::American).is_empty());
    }

    #[test]
    fn needs_enough_books_for_consensus() {
        let ev = event(
            "thin",
            "A",
            "B",
            vec![
                book("x", "h2h", vec![outcome("A", 150.0)]),
                book("y", "h2h", vec![outcome("A", -200.0)]),
            ],
        );
        assert!(detect_positive_ev(&ev, OddsFormat::American).is_empty());
    }

    #[tokio::test]
    async fn annotates_with_sport_listing() {
        let mut feed = MockFeed::with_odds(vec![three_books()]);
        feed.sports = vec![SportInfo {
            key: "basketball_nba".into(),
            group: "Basketball".into(),
            title: "NBA".into(),
            ..Default::default()
        }];

        let report = find_positive_ev(&feed, &PositiveEvQuery::new("basketball_nba"))
            .await
            .unwrap();
        assert_eq!(report.count, report.bets.len());
        assert!(report.count >= 1);
        assert_eq!(report.bets[0].sport_title, "NBA");
        assert_eq!(report.bets[0].sport_group, "Basketball");
        assert!(report
            .bets
            .windows(2)
            .all(|w| w[0].ev_percent >= w[1].ev_percent));
    }

    #[tokio::test]
    async fn unknown_sport_falls_back_to_key() {
        let feed = MockFeed::with_odds(vec![three_books()]);
        let report = find_positive_ev(&feed, &PositiveEvQuery::new("basketball_nba"))
            .await
            .unwrap();
        assert_eq!(report.bets[0].sport_title, "basketball_nba");
        assert_eq!(report.bets[0].sport_group, UNKNOWN_SPORT_GROUP);
    }

    #[tokio::test]
    async fn degraded_feed_reports_warning() {
        let feed = MockFeed::unconfigured();
        let report = find_positive_ev(&feed, &PositiveEvQuery::new("basketball_nba"))
            .await
            .unwrap();
        assert_eq!(report.count, 0);
        assert!(report.warning.is_some());
    }

    #[tokio::test]
    async fn empty_sport_rejected_without_feed_call() {
        let feed = MockFeed::default();
        assert!(find_positive_ev(&feed, &PositiveEvQuery::new("")).await.is_err());
        assert_eq!(feed.call_count(), 0);
    }
}
