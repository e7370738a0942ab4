//! Best available price per proposition across all bookmakers.
//!
//! A proposition is `(event, player, side, line)`. For player props the
//! player is the outcome's participant and the side is Over/Under; for game
//! markets the "player" is the outcome name (usually a team) and the side is
//! the market key.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{clamp_top, unpack, AnalyticsQuery, AnalyticsResponse, ResolvedQuery};
use crate::error::{Error, Result};
use crate::feed::{is_player_market, Bookmaker, EventOddsQuery, FeedClient, FeedResponse, OddsEvent, OddsQuery};
use crate::odds::OddsFormat;

pub const MAX_TOP: i64 = 500;
/// Upper bound on per-event calls for player props.
pub const PLAYER_EVENT_LIMIT: usize = 10;

const EVENT_CALL_TIMEOUT: Duration = Duration::from_secs(10);
const PLAYER_FETCH_BUDGET: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheatSheetRow {
    pub event_id: String,
    pub commence_time: Option<DateTime<Utc>>,
    pub home_team: String,
    pub away_team: String,
    pub market: String,
    pub player: String,
    pub side: String,
    pub line: Option<f64>,
    pub best_price: Option<f64>,
    pub bookmaker: String,
    pub bookmaker_title: String,
    pub implied_probability: Option<f64>,
}

pub async fn build_cheat_sheet(
    feed: &dyn FeedClient,
    query: &AnalyticsQuery,
) -> Result<AnalyticsResponse<CheatSheetRow>> {
    let q = query.resolve()?;
    let top = clamp_top(query.top, MAX_TOP);

    let response = if is_player_market(&q.market) {
        fetch_player_events(feed, &q).await?
    } else {
        feed.get_odds(&OddsQuery {
            sport: q.sport.clone(),
            regions: q.regions.clone(),
            markets: vec![q.market.clone()],
            odds_format: q.odds_format,
        })
        .await?
    };
    let (events, remaining) = match unpack(response) {
        Ok(parts) => parts,
        Err(degraded) => return Ok(degraded),
    };

    let mut rows = best_price_rows(&events, &q.market, q.odds_format);
    rows.sort_by(compare_rows);
    rows.truncate(top);

    Ok(AnalyticsResponse {
        data: rows,
        remaining,
        warning: None,
    })
}

/// List events, then pull event-level odds for the first [`PLAYER_EVENT_LIMIT`].
///
/// Per-event calls run concurrently, each under its own timeout; a failed or
/// slow event is logged and left out rather than failing the sheet.
async fn fetch_player_events(feed: &dyn FeedClient, q: &ResolvedQuery) -> Result<FeedResponse<Vec<OddsEvent>>> {
    let (listing, mut remaining) = match feed.get_events(&q.sport).await? {
        FeedResponse::Fresh { data, remaining } => (data, remaining),
        FeedResponse::NotConfigured { warning } => return Ok(FeedResponse::not_configured(warning)),
    };
    let selected: Vec<OddsEvent> = listing.into_iter().take(PLAYER_EVENT_LIMIT).collect();

    let calls = selected.iter().map(|event| {
        let query = EventOddsQuery {
            sport: q.sport.clone(),
            event_id: event.id.clone(),
            regions: q.regions.clone(),
            markets: vec![q.market.clone()],
            odds_format: q.odds_format,
        };
        async move { tokio::time::timeout(EVENT_CALL_TIMEOUT, feed.get_event_odds(&query)).await }
    });
    let results = tokio::time::timeout(PLAYER_FETCH_BUDGET, join_all(calls))
        .await
        .map_err(|_| {
            Error::Timeout(format!(
                "player prop fetch for {} exceeded {:?}",
                q.sport, PLAYER_FETCH_BUDGET
            ))
        })?;

    let mut enriched = Vec::with_capacity(selected.len());
    for (listed, result) in selected.iter().zip(results) {
        match result {
            Ok(Ok(FeedResponse::Fresh { data, remaining: r })) => {
                remaining = lowest_quota(remaining, r);
                match data {
                    Some(mut event) => {
                        if event.commence_time.is_none() {
                            event.commence_time = listed.commence_time;
                        }
                        enriched.push(event);
                    }
                    None => debug!("No {} odds for event {}", q.market, listed.id),
                }
            }
            Ok(Ok(FeedResponse::NotConfigured { warning })) => {
                return Ok(FeedResponse::not_configured(warning));
            }
            Ok(Err(e)) => warn!("Failed to fetch {} odds for event {}: {}", q.market, listed.id, e),
            Err(_) => warn!("Timed out fetching {} odds for event {}", q.market, listed.id),
        }
    }

    info!(
        "Fetched {} odds for {}/{} events",
        q.market,
        enriched.len(),
        selected.len()
    );
    Ok(FeedResponse::fresh(enriched, remaining))
}

fn lowest_quota(current: Option<u32>, latest: Option<u32>) -> Option<u32> {
    match (current, latest) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => b.or(a),
    }
}

type PropositionKey = (String, String, String, Option<u64>);

/// Keep the best price per proposition.
///
/// A strictly higher price wins, any price beats no price, ties keep the
/// entry seen first.
pub fn best_price_rows(events: &[OddsEvent], market_key: &str, format: OddsFormat) -> Vec<CheatSheetRow> {
    let player_market = is_player_market(market_key);
    let mut rows: Vec<CheatSheetRow> = Vec::new();
    let mut index: HashMap<PropositionKey, usize> = HashMap::new();

    for event in events {
        for bookmaker in &event.bookmakers {
            for market in bookmaker.markets.iter().filter(|m| m.key == market_key) {
                for outcome in &market.outcomes {
                    let (player, side) = if player_market {
                        (outcome.description.clone().unwrap_or_default(), outcome.name.clone())
                    } else {
                        (outcome.name.clone(), market_key.to_string())
                    };
                    let price = outcome.price.filter(|p| p.is_finite());
                    let key = (event.id.clone(), player.clone(), side.clone(), outcome.point.map(f64::to_bits));

                    match index.get(&key) {
                        Some(&i) => {
                            let row = &mut rows[i];
                            let better = match (price, row.best_price) {
                                (Some(candidate), Some(current)) => candidate > current,
                                (Some(_), None) => true,
                                _ => false,
                            };
                            if better {
                                row.best_price = price;
                                set_bookmaker(row, bookmaker);
                            }
                        }
                        None => {
                            index.insert(key, rows.len());
                            let mut row = CheatSheetRow {
                                event_id: event.id.clone(),
                                commence_time: event.commence_time,
                                home_team: event.home_team.clone(),
                                away_team: event.away_team.clone(),
                                market: market_key.to_string(),
                                player,
                                side,
                                line: outcome.point,
                                best_price: price,
                                bookmaker: String::new(),
                                bookmaker_title: String::new(),
                                implied_probability: None,
                            };
                            set_bookmaker(&mut row, bookmaker);
                            rows.push(row);
                        }
                    }
                }
            }
        }
    }

    for row in &mut rows {
        row.implied_probability = row.best_price.map(|p| format.implied_probability(p));
    }
    rows
}

fn set_bookmaker(row: &mut CheatSheetRow, bookmaker: &Bookmaker) {
    row.bookmaker = bookmaker.key.clone();
    row.bookmaker_title = bookmaker.title.clone();
}

/// Start time ascending, then implied probability ascending; unknowns sort last.
fn compare_rows(a: &CheatSheetRow, b: &CheatSheetRow) -> Ordering {
    none_last(a.commence_time, b.commence_time, |x, y| x.cmp(&y)).then_with(|| {
        none_last(a.implied_probability, b.implied_probability, |x, y| x.total_cmp(&y))
    })
}

fn none_last<T>(a: Option<T>, b: Option<T>, cmp: impl FnOnce(T, T) -> Ordering) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => cmp(x, y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::mock::{book, event, outcome, MockFeed};
    use crate::feed::Outcome;
    use chrono::TimeZone;

    fn prop(player: &str, side: &str, point: f64, price: f64) -> Outcome {
        Outcome {
            name: side.into(),
            description: Some(player.into()),
            price: Some(price),
            point: Some(point),
        }
    }

    #[tokio::test]
    async fn keeps_highest_price_per_proposition() {
        let feed = MockFeed::with_odds(vec![event(
            "e1",
            "Boston Celtics",
            "Miami Heat",
            vec![
                book("draftkings", "h2h", vec![outcome("Boston Celtics", -110.0)]),
                book("fanduel", "h2h", vec![outcome("Boston Celtics", 105.0)]),
            ],
        )]);

        let resp = build_cheat_sheet(&feed, &AnalyticsQuery::new("basketball_nba", "h2h"))
            .await
            .unwrap();
        assert_eq!(resp.data.len(), 1);
        let row = &resp.data[0];
        assert_eq!(row.best_price, Some(105.0));
        assert_eq!(row.bookmaker, "fanduel");
        assert_eq!(row.player, "Boston Celtics");
        assert_eq!(row.side, "h2h");
        assert!((row.implied_probability.unwrap() - 100.0 / 205.0).abs() < 1e-12);
    }

    #[test]
    fn priced_beats_unpriced_and_ties_keep_first() {
        let mut unpriced = outcome("Boston Celtics", 0.0);
        unpriced.price = None;
        let events = vec![event(
            "e1",
            "Boston Celtics",
            "Miami Heat",
            vec![
                book("a", "h2h", vec![unpriced]),
                book("b", "h2h", vec![outcome("Boston Celtics", -120.0)]),
                book("c", "h2h", vec![outcome("Boston Celtics", -120.0)]),
            ],
        )];
        let rows = best_price_rows(&events, "h2h", OddsFormat::American);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].best_price, Some(-120.0));
        assert_eq!(rows[0].bookmaker, "b");
    }

    #[test]
    fn sorts_by_start_then_long_shots_first() {
        let early = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();

        let mut late_event = event(
            "late",
            "A",
            "B",
            vec![book("x", "h2h", vec![outcome("A", 300.0), outcome("B", -400.0)])],
        );
        late_event.commence_time = Some(late);
        let mut early_event = event(
            "early",
            "C",
            "D",
            vec![book("x", "h2h", vec![outcome("C", -150.0), outcome("D", 130.0)])],
        );
        early_event.commence_time = Some(early);

        let mut rows = best_price_rows(&[late_event, early_event], "h2h", OddsFormat::American);
        rows.sort_by(compare_rows);
        let order: Vec<&str> = rows.iter().map(|r| r.player.as_str()).collect();
        assert_eq!(order, vec!["D", "C", "A", "B"]);
    }

    #[tokio::test]
    async fn player_props_are_assembled_per_event() {
        let mut feed = MockFeed::default();
        feed.remaining = Some(300);
        feed.events = vec![
            event("g1", "Boston Celtics", "Miami Heat", vec![]),
            event("g2", "Denver Nuggets", "Utah Jazz", vec![]),
        ];

        let mut m = book(
            "fanduel",
            "player_points",
            vec![
                prop("Jayson Tatum", "Over", 27.5, -115.0),
                prop("Jayson Tatum", "Under", 27.5, -105.0),
            ],
        );
        m.markets[0].outcomes.push(prop("Jaylen Brown", "Over", 22.5, 110.0));
        let dk = book("draftkings", "player_points", vec![prop("Jayson Tatum", "Over", 27.5, -105.0)]);
        feed.event_odds
            .insert("g1".into(), event("g1", "Boston Celtics", "Miami Heat", vec![m, dk]));

        let resp = build_cheat_sheet(&feed, &AnalyticsQuery::new("basketball_nba", "player_points"))
            .await
            .unwrap();

        // one listing call + one event call per listed event
        assert_eq!(feed.call_count(), 3);
        assert_eq!(resp.remaining, Some(300));
        assert_eq!(resp.data.len(), 3);

        let tatum_over = resp
            .data
            .iter()
            .find(|r| r.player == "Jayson Tatum" && r.side == "Over")
            .unwrap();
        assert_eq!(tatum_over.best_price, Some(-105.0));
        assert_eq!(tatum_over.bookmaker, "draftkings");
        assert_eq!(tatum_over.line, Some(27.5));

        // long shot first within the same event
        assert_eq!(resp.data[0].player, "Jaylen Brown");
    }

    #[tokio::test]
    async fn player_event_calls_are_capped() {
        let mut feed = MockFeed::default();
        feed.events = (0..25)
            .map(|i| event(&format!("g{i}"), "A", "B", vec![]))
            .collect();

        let resp = build_cheat_sheet(&feed, &AnalyticsQuery::new("basketball_nba", "player_assists"))
            .await
            .unwrap();
        assert!(resp.data.is_empty());
        assert_eq!(feed.call_count(), 1 + PLAYER_EVENT_LIMIT);
    }

    #[tokio::test]
    async fn missing_market_is_a_validation_error() {
        let feed = MockFeed::default();
        let err = build_cheat_sheet(&feed, &AnalyticsQuery::new("basketball_nba", ""))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");
        assert_eq!(feed.call_count(), 0);
    }

    #[tokio::test]
    async fn degraded_feed_yields_warning() {
        let feed = MockFeed::unconfigured();
        let resp = build_cheat_sheet(&feed, &AnalyticsQuery::new("basketball_nba", "player_points"))
            .await
            .unwrap();
        assert!(resp.data.is_empty());
        assert!(resp.warning.unwrap().contains("ODDS_API_KEY"));
    }

    #[test]
    fn quota_tracks_lowest_seen() {
        assert_eq!(lowest_quota(None, Some(5)), Some(5));
        assert_eq!(lowest_quota(Some(3), Some(5)), Some(3));
        assert_eq!(lowest_quota(Some(3), None), Some(3));
    }
}
