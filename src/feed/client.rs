use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{is_player_market, EventOddsQuery, FeedClient, FeedResponse, OddsEvent, OddsQuery, SportInfo};
use crate::error::{Error, Result, INVALID_MARKET};

pub const DEFAULT_BASE_URL: &str = "https://api.the-odds-api.com/v4";

const NOT_CONFIGURED_WARNING: &str = "ODDS_API_KEY is not configured; odds feed disabled";

type DirectLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

/// The Odds API v4 client.
///
/// Without an API key every call short-circuits to
/// [`FeedResponse::NotConfigured`] and nothing goes over the wire.
pub struct OddsApiClient {
    api_key: Option<String>,
    base_url: String,
    http_client: reqwest::Client,
    rate_limiter: DirectLimiter,
}

impl OddsApiClient {
    pub fn new(api_key: Option<String>, base_url: &str, requests_per_minute: u32) -> Result<Self> {
        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_minute(per_minute));

        // HTTP client with timeouts
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(5)
            .build()?;

        Ok(Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            rate_limiter,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// GET `path` with the API key appended.
    ///
    /// Returns the decoded body (None on 404 when `allow_missing`) and the
    /// `x-requests-remaining` quota counter.
    async fn fetch<T: DeserializeOwned>(
        &self,
        api_key: &str,
        path: &str,
        params: &[(&str, String)],
        allow_missing: bool,
    ) -> Result<(Option<T>, Option<u32>)> {
        // Wait for rate limit
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        let mut query: Vec<(&str, &str)> = vec![("apiKey", api_key)];
        query.extend(params.iter().map(|(k, v)| (*k, v.as_str())));

        let response = self.http_client.get(&url).query(&query).send().await?;

        let remaining = response
            .headers()
            .get("x-requests-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .map(|v| v.max(0.0) as u32);
        if let Some(remaining) = remaining {
            debug!("API requests remaining: {}", remaining);
        }

        let status = response.status();
        let body = response.text().await?;

        if allow_missing && status == StatusCode::NOT_FOUND {
            warn!("Odds API returned 404 for {}", path);
            return Ok((None, remaining));
        }
        if !status.is_success() {
            return Err(Error::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: T = serde_json::from_str(&body)?;
        Ok((Some(parsed), remaining))
    }
}

#[async_trait]
impl FeedClient for OddsApiClient {
    async fn get_sports(&self) -> Result<FeedResponse<Vec<SportInfo>>> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(FeedResponse::not_configured(NOT_CONFIGURED_WARNING));
        };
        let (sports, remaining) = self
            .fetch::<Vec<SportInfo>>(api_key, "/sports", &[("all", "true".to_string())], false)
            .await?;
        Ok(FeedResponse::fresh(sports.unwrap_or_default(), remaining))
    }

    async fn get_odds(&self, query: &OddsQuery) -> Result<FeedResponse<Vec<OddsEvent>>> {
        if let Some(market) = query.markets.iter().find(|m| is_player_market(m)) {
            return Err(Error::unsupported_market(market, INVALID_MARKET));
        }
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(FeedResponse::not_configured(NOT_CONFIGURED_WARNING));
        };

        let path = format!("/sports/{}/odds", query.sport);
        let params = [
            ("regions", query.regions.join(",")),
            ("markets", query.markets.join(",")),
            ("oddsFormat", query.odds_format.as_str().to_string()),
            ("dateFormat", "iso".to_string()),
        ];
        let (events, remaining) = self.fetch::<Vec<OddsEvent>>(api_key, &path, &params, false).await?;
        let events = events.unwrap_or_default();

        info!("Fetched {} events from The Odds API ({})", events.len(), query.sport);
        Ok(FeedResponse::fresh(events, remaining))
    }

    async fn get_events(&self, sport: &str) -> Result<FeedResponse<Vec<OddsEvent>>> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(FeedResponse::not_configured(NOT_CONFIGURED_WARNING));
        };
        let path = format!("/sports/{}/events", sport);
        let params = [("dateFormat", "iso".to_string())];
        let (events, remaining) = self.fetch::<Vec<OddsEvent>>(api_key, &path, &params, false).await?;
        Ok(FeedResponse::fresh(events.unwrap_or_default(), remaining))
    }

    async fn get_event_odds(&self, query: &EventOddsQuery) -> Result<FeedResponse<Option<OddsEvent>>> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(FeedResponse::not_configured(NOT_CONFIGURED_WARNING));
        };
        let path = format!("/sports/{}/events/{}/odds", query.sport, query.event_id);
        let params = [
            ("regions", query.regions.join(",")),
            ("markets", query.markets.join(",")),
            ("oddsFormat", query.odds_format.as_str().to_string()),
            ("dateFormat", "iso".to_string()),
        ];
        // Event-level markets are not offered for every event; 404 means "none".
        let (event, remaining) = self.fetch::<OddsEvent>(api_key, &path, &params, true).await?;
        Ok(FeedResponse::fresh(event, remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odds::OddsFormat;

    fn unconfigured() -> OddsApiClient {
        OddsApiClient::new(None, DEFAULT_BASE_URL, 45).unwrap()
    }

    #[tokio::test]
    async fn missing_key_degrades_instead_of_failing() {
        let client = unconfigured();
        assert!(!client.is_configured());

        let resp = client.get_sports().await.unwrap();
        assert!(resp.warning().is_some());

        let resp = client.get_events("basketball_nba").await.unwrap();
        let (events, remaining, warning) = resp.into_parts();
        assert!(events.is_empty());
        assert_eq!(remaining, None);
        assert!(warning.unwrap().contains("ODDS_API_KEY"));
    }

    #[tokio::test]
    async fn blank_key_counts_as_missing() {
        let client = OddsApiClient::new(Some("   ".into()), DEFAULT_BASE_URL, 45).unwrap();
        assert!(!client.is_configured());
    }

    #[tokio::test]
    async fn player_markets_rejected_on_sport_odds_endpoint() {
        let client = unconfigured();
        let query = OddsQuery {
            sport: "basketball_nba".into(),
            regions: vec!["us".into()],
            markets: vec!["h2h".into(), "player_points".into()],
            odds_format: OddsFormat::American,
        };
        let err = client.get_odds(&query).await.unwrap_err();
        assert_eq!(err.code(), INVALID_MARKET);
    }
}
