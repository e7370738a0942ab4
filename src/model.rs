//! Normalized entity graph persisted by the ingestion pipeline.
//!
//! References between entities are plain ids; nothing here owns anything else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::odds::OddsFormat;

/// Field every snapshot document is range-scanned on.
pub const FETCHED_AT_FIELD: &str = "fetched_at";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sport {
    pub id: u32,
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub sport_id: u32,
    pub name: String,
    pub abbreviation: String,
    pub external_ref: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SportEvent {
    pub id: String,
    pub sport_id: u32,
    pub league: String,
    /// None for outrights, which have no teams.
    pub home_team_id: Option<String>,
    pub away_team_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub status: String,
    pub external_ref: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sportsbook {
    pub id: String,
    pub name: String,
    pub code: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketMetadata {
    pub bookmaker_key: String,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub event_id: String,
    pub sportsbook_id: String,
    pub key: String,
    pub label: String,
    pub metadata: MarketMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSelection {
    pub id: String,
    pub market_id: String,
    pub label: String,
    /// Reserved for player props; never populated by feed ingestion.
    pub player_id: Option<String>,
    pub line: f64,
    pub side: String,
}

/// Formats a snapshot can be stored in. Hong Kong prices are stored as decimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    American,
    Decimal,
}

impl SnapshotFormat {
    /// Storage format and stored value for a raw feed price.
    pub fn normalize(format: OddsFormat, price: f64) -> (SnapshotFormat, f64) {
        match format {
            OddsFormat::American => (SnapshotFormat::American, price),
            OddsFormat::Decimal => (SnapshotFormat::Decimal, price),
            OddsFormat::HongKong => (SnapshotFormat::Decimal, format.to_decimal(price)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsSnapshot {
    pub id: i64,
    pub sportsbook_id: String,
    pub selection_id: String,
    pub format: SnapshotFormat,
    pub odds: f64,
    pub implied_probability: f64,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedSnapshot {
    #[serde(flatten)]
    pub snapshot: OddsSnapshot,
    pub archived_at: DateTime<Utc>,
}

/// League code from a feed sport key: `basketball_nba` -> `NBA`.
pub fn league_code(sport_key: &str) -> String {
    sport_key
        .rsplit('_')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(sport_key)
        .to_uppercase()
}

/// Human label for a market key, including the period suffix.
pub fn market_label(market_key: &str) -> String {
    let (base, period) = match market_key.rsplit_once('_') {
        Some((base, suffix)) if is_period_suffix(suffix) => (base, Some(suffix)),
        _ => (market_key, None),
    };

    let name = match base {
        "h2h" => "Moneyline",
        "spreads" => "Point Spread",
        "totals" => "Total",
        "team_totals" => "Team Total",
        "outrights" => "Outright",
        _ => return market_key.to_string(),
    };

    match period {
        Some(p) => format!("{} ({})", name, p.to_uppercase().chars().rev().collect::<String>()),
        None => name.to_string(),
    }
}

fn is_period_suffix(suffix: &str) -> bool {
    matches!(suffix, "h1" | "h2" | "q1" | "q2" | "q3" | "q4" | "p1" | "p2" | "p3")
}

/// Selection side relative to the event.
pub fn selection_side(outcome_name: &str, home_team: &str, away_team: &str) -> String {
    if outcome_name == home_team {
        return "home".to_string();
    }
    if outcome_name == away_team {
        return "away".to_string();
    }
    match outcome_name.to_ascii_lowercase().as_str() {
        "over" => "over".to_string(),
        "under" => "under".to_string(),
        "draw" => "draw".to_string(),
        _ => crate::identity::slugify(outcome_name),
    }
}
