//! Odds ingestion: feed payload -> normalized entity graph + odds snapshots,
//! and the hot -> archive snapshot sweep.
//!
//! Every write is either insert-if-absent (sports, teams) or a full replace
//! keyed by a derived id (events, sportsbooks, markets, selections), so a
//! failed refresh is recovered by running it again. Nothing is rolled back.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::feed::{FeedClient, FeedResponse, OddsEvent, OddsQuery};
use crate::identity::{
    make_book_id, make_event_id, make_market_id, make_selection_id, make_sport_id, make_team_id,
    team_abbreviation, SnapshotIdAllocator,
};
use crate::model::{
    league_code, market_label, selection_side, ArchivedSnapshot, Market, MarketMetadata, MarketSelection,
    OddsSnapshot, SnapshotFormat, Sport, SportEvent, Sportsbook, Team, FETCHED_AT_FIELD,
};
use crate::odds::OddsFormat;
use crate::store::{from_document, to_document, BulkInsertReport, Collection, Document, Store};

const EVENT_STATUS_SCHEDULED: &str = "scheduled";

/// Parameters for one refresh. Unset fields fall back to [`IngestDefaults`].
#[derive(Debug, Clone, Default)]
pub struct RefreshRequest {
    pub sport_key: String,
    pub regions: Option<Vec<String>>,
    pub markets: Option<Vec<String>>,
    pub odds_format: Option<OddsFormat>,
}

impl RefreshRequest {
    pub fn new(sport_key: impl Into<String>) -> Self {
        Self {
            sport_key: sport_key.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    pub ingested_snapshots: usize,
    pub remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveSummary {
    /// Snapshots evicted from the hot collection.
    pub archived: usize,
    /// Archive copies that already existed.
    pub duplicates: usize,
    /// Archive copies that could not be written (evicted anyway).
    pub archive_failures: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStatus {
    pub snapshots: u64,
    pub archived: u64,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct IngestDefaults {
    pub regions: Vec<String>,
    pub markets: Vec<String>,
    pub odds_format: OddsFormat,
}

impl Default for IngestDefaults {
    fn default() -> Self {
        Self {
            regions: vec!["us".to_string()],
            markets: vec!["h2h".to_string(), "spreads".to_string(), "totals".to_string()],
            odds_format: OddsFormat::American,
        }
    }
}

impl IngestDefaults {
    pub fn from_config(config: &Config) -> Self {
        let fallback = Self::default();
        Self {
            regions: non_empty_or(config.default_regions.clone(), fallback.regions),
            markets: non_empty_or(config.default_markets.clone(), fallback.markets),
            odds_format: config.default_odds_format,
        }
    }
}

fn non_empty_or(values: Vec<String>, fallback: Vec<String>) -> Vec<String> {
    if values.is_empty() {
        fallback
    } else {
        values
    }
}

/// One async mutex per sport key so overlapping refreshes of the same sport
/// run one after the other.
#[derive(Clone, Default)]
pub struct SportLocks {
    inner: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SportLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock_for(&self, sport_key: &str) -> Arc<Mutex<()>> {
        // Fast path under the read lock
        {
            let locks = self.inner.read().await;
            if let Some(lock) = locks.get(sport_key) {
                return lock.clone();
            }
        }

        // Entry API under the write lock; another task may have inserted meanwhile
        let mut locks = self.inner.write().await;
        locks
            .entry(sport_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Odds ingestion service
pub struct OddsIngestionService {
    feed: Arc<dyn FeedClient>,
    store: Arc<dyn Store>,
    defaults: IngestDefaults,
    snapshot_ids: Mutex<SnapshotIdAllocator>,
    sport_locks: SportLocks,
}

impl OddsIngestionService {
    pub fn new(feed: Arc<dyn FeedClient>, store: Arc<dyn Store>, defaults: IngestDefaults) -> Self {
        Self {
            feed,
            store,
            defaults,
            snapshot_ids: Mutex::new(SnapshotIdAllocator::new()),
            sport_locks: SportLocks::new(),
        }
    }

    /// Pull odds for one sport and upsert the entity graph plus one snapshot per priced outcome.
    pub async fn refresh_odds(&self, request: RefreshRequest) -> Result<RefreshSummary> {
        let sport_key = request.sport_key.trim().to_string();
        if sport_key.is_empty() {
            return Err(Error::Validation("sport key is required".to_string()));
        }

        let lock = self.sport_locks.lock_for(&sport_key).await;
        let _guard = lock.lock().await;

        let regions = request
            .regions
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| self.defaults.regions.clone());
        let markets = request
            .markets
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.defaults.markets.clone());
        let odds_format = request.odds_format.unwrap_or(self.defaults.odds_format);

        // The sport row is written before the feed call, so degraded mode leaves exactly this row.
        let sport_id = make_sport_id(&sport_key);
        let sport = Sport {
            id: sport_id,
            key: sport_key.clone(),
            name: sport_key.clone(),
        };
        if self
            .store
            .insert_if_absent(Collection::Sports, &sport_id.to_string(), to_document(&sport)?)
            .await?
        {
            info!("Registered sport {} (id {})", sport_key, sport_id);
        }

        let query = OddsQuery {
            sport: sport_key.clone(),
            regions,
            markets,
            odds_format,
        };
        let (events, remaining) = match self.feed.get_odds(&query).await? {
            FeedResponse::Fresh { data, remaining } => (data, remaining),
            FeedResponse::NotConfigured { warning } => {
                warn!("Skipping odds refresh for {}: {}", sport_key, warning);
                return Ok(RefreshSummary {
                    ingested_snapshots: 0,
                    remaining: None,
                    warning: Some(warning),
                });
            }
        };

        if let Some(title) = events.iter().map(|e| e.sport_title.trim()).find(|t| !t.is_empty()) {
            self.name_sport(&sport, title).await?;
        }

        let now = Utc::now();
        self.snapshot_ids.lock().await.begin_batch(now.timestamp_millis());

        let mut ingested = 0;
        for event in &events {
            ingested += self.process_event(sport_id, &sport_key, event, odds_format, now).await?;
        }

        info!(
            "Ingested {} odds snapshots across {} {} events (quota remaining: {})",
            ingested,
            events.len(),
            sport_key,
            remaining.map_or_else(|| "?".to_string(), |r| r.to_string())
        );

        Ok(RefreshSummary {
            ingested_snapshots: ingested,
            remaining,
            warning: None,
        })
    }

    async fn process_event(
        &self,
        sport_id: u32,
        sport_key: &str,
        event: &OddsEvent,
        odds_format: OddsFormat,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let event_id = make_event_id(&event.id);

        let home_team_id = self.ensure_team(sport_id, &event.home_team).await?;
        let away_team_id = self.ensure_team(sport_id, &event.away_team).await?;
        if home_team_id.is_some() && home_team_id == away_team_id {
            warn!(
                "Event {}: home and away resolve to the same team ({})",
                event.id, event.home_team
            );
        }

        let record = SportEvent {
            id: event_id.clone(),
            sport_id,
            league: league_code(sport_key),
            home_team_id,
            away_team_id,
            start_time: event.commence_time.unwrap_or(now),
            status: EVENT_STATUS_SCHEDULED.to_string(),
            external_ref: event.id.clone(),
        };
        self.store
            .upsert_replace(Collection::Events, &event_id, to_document(&record)?)
            .await?;

        let mut ingested = 0;
        for bookmaker in &event.bookmakers {
            let book_id = make_book_id(&bookmaker.key);
            let book = Sportsbook {
                id: book_id.clone(),
                name: bookmaker.title.clone(),
                code: bookmaker.key.clone(),
                base_url: None,
            };
            self.store
                .upsert_replace(Collection::Sportsbooks, &book_id, to_document(&book)?)
                .await?;

            for market in &bookmaker.markets {
                let market_id = make_market_id(&event_id, &book_id, &market.key);
                let record = Market {
                    id: market_id.clone(),
                    event_id: event_id.clone(),
                    sportsbook_id: book_id.clone(),
                    key: market.key.clone(),
                    label: market_label(&market.key),
                    metadata: MarketMetadata {
                        bookmaker_key: bookmaker.key.clone(),
                        last_update: market.last_update,
                    },
                };
                self.store
                    .upsert_replace(Collection::Markets, &market_id, to_document(&record)?)
                    .await?;

                for outcome in &market.outcomes {
                    let label = outcome.label();
                    let selection_id = make_selection_id(&market_id, &label, outcome.point);
                    let selection = MarketSelection {
                        id: selection_id.clone(),
                        market_id: market_id.clone(),
                        label,
                        player_id: None,
                        line: outcome.point.unwrap_or(0.0),
                        side: selection_side(&outcome.name, &event.home_team, &event.away_team),
                    };
                    self.store
                        .upsert_replace(Collection::Selections, &selection_id, to_document(&selection)?)
                        .await?;

                    let Some(price) = outcome.price else {
                        debug!("No price for {}, snapshot skipped", selection_id);
                        continue;
                    };

                    let (format, odds) = SnapshotFormat::normalize(odds_format, price);
                    let snapshot = OddsSnapshot {
                        id: self.snapshot_ids.lock().await.next_id(),
                        sportsbook_id: book_id.clone(),
                        selection_id,
                        format,
                        odds,
                        implied_probability: odds_format.implied_probability(price),
                        fetched_at: now,
                    };
                    self.store
                        .insert(Collection::Snapshots, &snapshot.id.to_string(), to_document(&snapshot)?)
                        .await?;
                    ingested += 1;
                }
            }
        }

        debug!("Event {} ({} @ {}): {} snapshots", event_id, event.away_team, event.home_team, ingested);
        Ok(ingested)
    }

    /// Replace the placeholder sport name (the key) with the feed's title.
    /// A name that differs from the key is never overwritten.
    async fn name_sport(&self, sport: &Sport, title: &str) -> Result<()> {
        let key = sport.id.to_string();
        let stored: Option<Sport> = match self.store.get(Collection::Sports, &key).await? {
            Some(doc) => Some(from_document(doc)?),
            None => None,
        };
        let Some(mut stored) = stored else {
            return Ok(());
        };
        if stored.name != sport.key || stored.name == title {
            return Ok(());
        }
        stored.name = title.to_string();
        self.store
            .upsert_replace(Collection::Sports, &key, to_document(&stored)?)
            .await?;
        debug!("Sport {} named {}", sport.key, title);
        Ok(())
    }

    /// Insert the team once; later refreshes never touch it. Blank names have no team.
    async fn ensure_team(&self, sport_id: u32, team_name: &str) -> Result<Option<String>> {
        let team_name = team_name.trim();
        if team_name.is_empty() {
            return Ok(None);
        }
        let team_id = make_team_id(sport_id, team_name);
        let team = Team {
            id: team_id.clone(),
            sport_id,
            name: team_name.to_string(),
            abbreviation: team_abbreviation(team_name),
            external_ref: team_name.to_string(),
        };
        if self
            .store
            .insert_if_absent(Collection::Teams, &team_id, to_document(&team)?)
            .await?
        {
            debug!("Created team {} ({})", team_id, team_name);
        }
        Ok(Some(team_id))
    }

    /// Move snapshots fetched more than `days_old` days ago into the archive.
    ///
    /// Copying is best effort, eviction is not: selected rows leave the hot
    /// collection even if their archive copy could not be written.
    pub async fn archive_old_snapshots(&self, days_old: i64) -> Result<ArchiveSummary> {
        if days_old < 0 {
            return Err(Error::Validation(format!(
                "days_old must be non-negative, got {}",
                days_old
            )));
        }

        let cutoff = Utc::now() - Duration::days(days_old);
        let stale = self
            .store
            .find_older_than(Collection::Snapshots, FETCHED_AT_FIELD, cutoff)
            .await?;
        if stale.is_empty() {
            debug!("No snapshots older than {} to archive", cutoff);
            return Ok(ArchiveSummary::default());
        }

        let archived_at = Utc::now();
        let mut keys = Vec::with_capacity(stale.len());
        let mut copies = Vec::with_capacity(stale.len());
        let mut unreadable = 0;
        for (key, doc) in stale {
            match archive_copy(doc, archived_at) {
                Ok(copy) => copies.push((key.clone(), copy)),
                Err(e) => {
                    warn!("Snapshot {} could not be converted for archival: {}", key, e);
                    unreadable += 1;
                }
            }
            keys.push(key);
        }

        let report: BulkInsertReport = self
            .store
            .insert_many(Collection::SnapshotArchive, copies)
            .await
            .into_iter()
            .collect();
        for failure in &report.failures {
            warn!("Archive insert failed: {}", failure);
        }

        let evicted = self.store.delete_by_keys(Collection::Snapshots, &keys).await?;

        info!(
            "Archived snapshots older than {}: {} evicted, {} copied, {} already archived, {} failed",
            cutoff,
            evicted,
            report.inserted,
            report.duplicates,
            report.failures.len() + unreadable
        );

        Ok(ArchiveSummary {
            archived: evicted as usize,
            duplicates: report.duplicates,
            archive_failures: report.failures.len() + unreadable,
        })
    }

    pub async fn status(&self) -> Result<IngestStatus> {
        Ok(IngestStatus {
            snapshots: self.store.count(Collection::Snapshots).await?,
            archived: self.store.count(Collection::SnapshotArchive).await?,
            last_fetched_at: self
                .store
                .latest_timestamp(Collection::Snapshots, FETCHED_AT_FIELD)
                .await?,
        })
    }
}

fn archive_copy(doc: Document, archived_at: DateTime<Utc>) -> Result<Document> {
    let snapshot: OddsSnapshot = from_document(doc)?;
    Ok(to_document(&ArchivedSnapshot { snapshot, archived_at })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::mock::{book, event, outcome, MockFeed};
    use crate::error::ErrorKind;
    use crate::store::MemoryStore;
    use tokio_test::{assert_err, assert_ok};

    fn service(feed: MockFeed, store: &MemoryStore) -> OddsIngestionService {
        OddsIngestionService::new(Arc::new(feed), Arc::new(store.clone()), IngestDefaults::default())
    }

    fn sample_feed() -> MockFeed {
        let mut spread_home = outcome("Boston Celtics", -110.0);
        spread_home.point = Some(-4.5);
        let mut spread_away = outcome("Miami Heat", -110.0);
        spread_away.point = Some(4.5);

        let mut dk = book(
            "draftkings",
            "h2h",
            vec![outcome("Boston Celtics", -180.0), outcome("Miami Heat", 155.0)],
        );
        dk.markets.push(crate::feed::Market {
            key: "spreads".into(),
            last_update: None,
            outcomes: vec![spread_home, spread_away],
        });

        MockFeed::with_odds(vec![event("evt123", "Boston Celtics", "Miami Heat", vec![dk])])
    }

    #[tokio::test]
    async fn refresh_writes_full_graph() {
        let store = MemoryStore::new();
        let svc = service(sample_feed(), &store);

        let summary = assert_ok!(svc.refresh_odds(RefreshRequest::new("basketball_nba")).await);
        assert_eq!(summary.ingested_snapshots, 4);
        assert_eq!(summary.remaining, Some(480));
        assert_eq!(summary.warning, None);

        assert_eq!(store.count(Collection::Sports).await.unwrap(), 1);
        assert_eq!(store.count(Collection::Teams).await.unwrap(), 2);
        assert_eq!(store.count(Collection::Events).await.unwrap(), 1);
        assert_eq!(store.count(Collection::Sportsbooks).await.unwrap(), 1);
        assert_eq!(store.count(Collection::Markets).await.unwrap(), 2);
        assert_eq!(store.count(Collection::Selections).await.unwrap(), 4);
        assert_eq!(store.count(Collection::Snapshots).await.unwrap(), 4);

        let event = store.get(Collection::Events, "evt:evt123").await.unwrap().unwrap();
        assert_eq!(event["status"], "scheduled");
        assert_eq!(event["league"], "NBA");

        // No commence time upstream: the event starts at the batch timestamp.
        let snapshot_key = &store.keys(Collection::Snapshots).await[0];
        let snapshot = store.get(Collection::Snapshots, snapshot_key).await.unwrap().unwrap();
        assert!(event["start_time"].is_string());
        assert_eq!(event["start_time"], snapshot["fetched_at"]);

        let sport_id = make_sport_id("basketball_nba").to_string();
        let sport = store.get(Collection::Sports, &sport_id).await.unwrap().unwrap();
        assert_eq!(sport["name"], "NBA");
        assert_eq!(sport["key"], "basketball_nba");

        let sel_id = "sel:mkt:evt:evt123:book:draftkings:spreads:boston-celtics:-4.5";
        let sel = store.get(Collection::Selections, sel_id).await.unwrap().unwrap();
        assert_eq!(sel["side"], "home");
        assert_eq!(sel["line"], -4.5);
    }

    #[tokio::test]
    async fn missing_line_defaults_to_zero_without_suffix() {
        let store = MemoryStore::new();
        let svc = service(sample_feed(), &store);
        svc.refresh_odds(RefreshRequest::new("basketball_nba")).await.unwrap();

        let sel = store
            .get(Collection::Selections, "sel:mkt:evt:evt123:book:draftkings:h2h:miami-heat")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sel["line"], 0.0);
        assert_eq!(sel["side"], "away");
    }

    #[tokio::test]
    async fn empty_sport_is_rejected_before_any_write() {
        let store = MemoryStore::new();
        let feed = MockFeed::default();
        let svc = service(feed, &store);
        let err = assert_err!(svc.refresh_odds(RefreshRequest::new("  ")).await);
        assert!(err.is_client_error());
        assert_eq!(store.count(Collection::Sports).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unpriced_outcomes_get_selection_but_no_snapshot() {
        let store = MemoryStore::new();
        let mut unpriced = outcome("Miami Heat", 0.0);
        unpriced.price = None;
        let feed = MockFeed::with_odds(vec![event(
            "e9",
            "Boston Celtics",
            "Miami Heat",
            vec![book("fanduel", "h2h", vec![outcome("Boston Celtics", -150.0), unpriced])],
        )]);
        let svc = service(feed, &store);

        let summary = svc.refresh_odds(RefreshRequest::new("basketball_nba")).await.unwrap();
        assert_eq!(summary.ingested_snapshots, 1);
        assert_eq!(store.count(Collection::Selections).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn outright_events_are_ingested_without_teams() {
        let store = MemoryStore::new();
        let mut golf = event(
            "masters2025",
            "",
            "",
            vec![book(
                "fanduel",
                "outrights",
                vec![outcome("Scottie Scheffler", 450.0), outcome("Rory McIlroy", 700.0)],
            )],
        );
        golf.sport_key = "golf_masters_tournament_winner".into();
        golf.sport_title = "Masters Tournament Winner".into();
        let svc = service(MockFeed::with_odds(vec![golf]), &store);

        let summary = svc
            .refresh_odds(RefreshRequest::new("golf_masters_tournament_winner"))
            .await
            .unwrap();
        assert_eq!(summary.ingested_snapshots, 2);
        assert_eq!(store.count(Collection::Events).await.unwrap(), 1);
        assert_eq!(store.count(Collection::Teams).await.unwrap(), 0);
        assert_eq!(store.count(Collection::Selections).await.unwrap(), 2);
        assert_eq!(store.count(Collection::Snapshots).await.unwrap(), 2);

        let event = store.get(Collection::Events, "evt:masters2025").await.unwrap().unwrap();
        assert!(event["home_team_id"].is_null());
        assert!(event["away_team_id"].is_null());

        let market = store
            .get(Collection::Markets, "mkt:evt:masters2025:book:fanduel:outrights")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(market["label"], "Outright");
    }

    #[tokio::test]
    async fn feed_failure_propagates_and_keeps_sport_row() {
        let store = MemoryStore::new();
        let mut feed = sample_feed();
        feed.fail_with = Some(503);
        let svc = service(feed, &store);

        let err = assert_err!(svc.refresh_odds(RefreshRequest::new("basketball_nba")).await);
        assert_eq!(err.kind(), ErrorKind::UpstreamFailure);
        assert!(matches!(err, Error::UpstreamStatus { status: 503, .. }));
        assert_eq!(store.count(Collection::Sports).await.unwrap(), 1);
        assert_eq!(store.count(Collection::Events).await.unwrap(), 0);
        assert_eq!(store.count(Collection::Snapshots).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sport_name_set_once_from_feed_title() {
        let store = MemoryStore::new();
        let sport_id = make_sport_id("basketball_nba").to_string();
        let renamed = Sport {
            id: make_sport_id("basketball_nba"),
            key: "basketball_nba".into(),
            name: "National Basketball Association".into(),
        };
        store
            .insert(Collection::Sports, &sport_id, to_document(&renamed).unwrap())
            .await
            .unwrap();

        let svc = service(sample_feed(), &store);
        svc.refresh_odds(RefreshRequest::new("basketball_nba")).await.unwrap();
        let sport = store.get(Collection::Sports, &sport_id).await.unwrap().unwrap();
        assert_eq!(sport["name"], "National Basketball Association");
    }

    #[tokio::test]
    async fn sport_locks_are_shared_per_key() {
        let locks = SportLocks::new();
        let a = locks.lock_for("basketball_nba").await;
        let b = locks.lock_for("basketball_nba").await;
        let c = locks.lock_for("icehockey_nhl").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn negative_retention_is_rejected() {
        let store = MemoryStore::new();
        let svc = service(MockFeed::default(), &store);
        assert_err!(svc.archive_old_snapshots(-1).await);
    }

    #[tokio::test]
    async fn status_reports_latest_fetch() {
        let store = MemoryStore::new();
        let svc = service(sample_feed(), &store);

        let empty = svc.status().await.unwrap();
        assert_eq!(empty.snapshots, 0);
        assert_eq!(empty.last_fetched_at, None);

        svc.refresh_odds(RefreshRequest::new("basketball_nba")).await.unwrap();
        let status = svc.status().await.unwrap();
        assert_eq!(status.snapshots, 4);
        assert_eq!(status.archived, 0);
        assert!(status.last_fetched_at.is_some());
    }
}
