//! Odds feed seam: payload types, the degraded-mode response union, and the
//! [`FeedClient`] trait implemented by [`OddsApiClient`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;
use crate::odds::OddsFormat;

pub mod client;

pub use client::OddsApiClient;

/// Market keys with this prefix are only served by the per-event endpoint.
pub const PLAYER_MARKET_PREFIX: &str = "player_";

pub fn is_player_market(market_key: &str) -> bool {
    market_key.starts_with(PLAYER_MARKET_PREFIX)
}

/// Outright (futures) events arrive with `"home_team": null`.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// The Odds API event structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct OddsEvent {
    pub id: String,
    pub sport_key: String,
    #[serde(deserialize_with = "null_as_default")]
    pub sport_title: String,
    pub commence_time: Option<DateTime<Utc>>,
    /// Empty for outrights.
    #[serde(deserialize_with = "null_as_default")]
    pub home_team: String,
    #[serde(deserialize_with = "null_as_default")]
    pub away_team: String,
    pub bookmakers: Vec<Bookmaker>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Bookmaker {
    pub key: String,
    pub title: String,
    pub last_update: Option<DateTime<Utc>>,
    pub markets: Vec<Market>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Market {
    pub key: String,
    pub last_update: Option<DateTime<Utc>>,
    pub outcomes: Vec<Outcome>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Outcome {
    pub name: String,
    /// Participant for player props (`description`, `participant` or `player` upstream).
    #[serde(alias = "participant", alias = "player")]
    pub description: Option<String>,
    pub price: Option<f64>,
    pub point: Option<f64>,
}

impl Outcome {
    /// Natural label: participant + outcome name when a participant exists.
    pub fn label(&self) -> String {
        match self.description.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(desc) => format!("{} {}", desc, self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct SportInfo {
    pub key: String,
    pub group: String,
    pub title: String,
    pub description: String,
    pub active: bool,
    pub has_outrights: bool,
}

/// Result of a feed call. A missing credential is data, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedResponse<T> {
    Fresh { data: T, remaining: Option<u32> },
    NotConfigured { warning: String },
}

impl<T> FeedResponse<T> {
    pub fn fresh(data: T, remaining: Option<u32>) -> Self {
        FeedResponse::Fresh { data, remaining }
    }

    pub fn not_configured(warning: impl Into<String>) -> Self {
        FeedResponse::NotConfigured {
            warning: warning.into(),
        }
    }

    pub fn remaining(&self) -> Option<u32> {
        match self {
            FeedResponse::Fresh { remaining, .. } => *remaining,
            FeedResponse::NotConfigured { .. } => None,
        }
    }

    pub fn warning(&self) -> Option<&str> {
        match self {
            FeedResponse::Fresh { .. } => None,
            FeedResponse::NotConfigured { warning } => Some(warning),
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> FeedResponse<U> {
        match self {
            FeedResponse::Fresh { data, remaining } => FeedResponse::Fresh {
                data: f(data),
                remaining,
            },
            FeedResponse::NotConfigured { warning } => FeedResponse::NotConfigured { warning },
        }
    }
}

impl<T: Default> FeedResponse<T> {
    /// The `{ data, remaining, warning? }` view; degraded responses carry empty data.
    pub fn into_parts(self) -> (T, Option<u32>, Option<String>) {
        match self {
            FeedResponse::Fresh { data, remaining } => (data, remaining, None),
            FeedResponse::NotConfigured { warning } => (T::default(), None, Some(warning)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OddsQuery {
    pub sport: String,
    pub regions: Vec<String>,
    pub markets: Vec<String>,
    pub odds_format: OddsFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventOddsQuery {
    pub sport: String,
    pub event_id: String,
    pub regions: Vec<String>,
    pub markets: Vec<String>,
    pub odds_format: OddsFormat,
}

#[async_trait]
pub trait FeedClient: Send + Sync {
    async fn get_sports(&self) -> Result<FeedResponse<Vec<SportInfo>>>;

    /// Odds for every upcoming event of a sport.
    ///
    /// Player-prop markets are rejected with `INVALID_MARKET`; fetch them per
    /// event with [`FeedClient::get_event_odds`].
    async fn get_odds(&self, query: &OddsQuery) -> Result<FeedResponse<Vec<OddsEvent>>>;

    /// Bare event listing (no bookmakers).
    async fn get_events(&self, sport: &str) -> Result<FeedResponse<Vec<OddsEvent>>>;

    async fn get_event_odds(&self, query: &EventOddsQuery) -> Result<FeedResponse<Option<OddsEvent>>>;

    async fn get_sport_by_key(&self, sport_key: &str) -> Result<FeedResponse<Option<SportInfo>>> {
        Ok(self
            .get_sports()
            .await?
            .map(|sports| sports.into_iter().find(|s| s.key == sport_key)))
    }
}
