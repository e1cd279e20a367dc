//! Shared fixtures for integration tests.
//!
//! Provides a deterministic in-memory `OddsFeed` that serves known
//! snapshots, can be forced to fail, and counts its calls, plus builders
//! for events and a test configuration.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use sharpedge::config::AppConfig;
use sharpedge::data::OddsFeed;
use sharpedge::types::*;

pub const CONFIG: &str = r#"
[agent]
name = "SHARPEDGE-TEST"
mode = "backtest"
bankroll = 1000.0
currency = "GBP"

[strategy]
sharp_books = ["pinnacle", "betfair"]
betting_bookmakers = ["williamhill", "bet365"]
markets = ["h2h", "totals"]
sports = ["basketball_nba"]
min_ev_threshold = 0.02
kelly_fraction = 0.25
use_vig_adjusted_ev = false
max_bet_failures = 3

[backtest]
start = "2025-01-01T00:00:00Z"
end = "2025-01-04T00:00:00Z"
step_hours = 12
report_path = "unused.json"

[data]
archive_dir = "unused"
results_file = "unused.json"
bet_history_path = "unused.csv"
"#;

pub fn test_config() -> AppConfig {
    AppConfig::parse(CONFIG).unwrap()
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

pub fn temp_path(prefix: &str) -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("{prefix}_{}", uuid::Uuid::new_v4()));
    p
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn book(key: &str, market: &str, outcomes: &[(&str, f64, Option<f64>)]) -> BookmakerOdds {
    BookmakerOdds {
        key: key.into(),
        title: key.into(),
        link: None,
        markets: vec![MarketOdds {
            key: market.into(),
            link: None,
            outcomes: outcomes
                .iter()
                .map(|(name, price, point)| OutcomeOdds {
                    name: name.to_string(),
                    price: *price,
                    point: *point,
                    link: None,
                })
                .collect(),
        }],
    }
}

pub fn event(
    id: &str,
    sport: &str,
    home: &str,
    away: &str,
    commence: DateTime<Utc>,
    bookmakers: Vec<BookmakerOdds>,
) -> EventOdds {
    EventOdds {
        event: Event {
            id: id.into(),
            sport_key: sport.into(),
            home_team: home.into(),
            away_team: away.into(),
            commence_time: commence,
            completed: false,
        },
        link: None,
        bookmakers,
    }
}

/// Sharp prices 2.00 / 2.50 on the home side (consensus 0.45) and a
/// williamhill price of 2.40 (EV +8%). The away side has no edge.
pub fn edge_event(id: &str, home: &str, away: &str, commence: DateTime<Utc>) -> EventOdds {
    event(id, "basketball_nba", home, away, commence, vec![
        book("pinnacle", "h2h", &[(home, 2.00, None), (away, 1.85, None)]),
        book("betfair", "h2h", &[(home, 2.50, None), (away, 1.55, None)]),
        book("williamhill", "h2h", &[(home, 2.40, None), (away, 1.60, None)]),
    ])
}

/// Totals at `line`: sharp 1.90 / 1.90, williamhill Under at 2.00.
pub fn totals_event(id: &str, home: &str, away: &str, commence: DateTime<Utc>, line: f64) -> EventOdds {
    event(id, "basketball_nba", home, away, commence, vec![
        book("pinnacle", "totals", &[("Over", 1.90, Some(line)), ("Under", 1.90, Some(line))]),
        book("williamhill", "totals", &[("Over", 1.80, Some(line)), ("Under", 2.00, Some(line))]),
    ])
}

pub fn snapshot(sport: &str, timestamp: DateTime<Utc>, events: Vec<EventOdds>) -> OddsSnapshot {
    OddsSnapshot {
        sport: sport.into(),
        timestamp,
        events,
    }
}

// ---------------------------------------------------------------------------
// Mock feed
// ---------------------------------------------------------------------------

/// In-memory odds feed. Historical requests get the latest snapshot at or
/// before the requested time.
pub struct MockFeed {
    snapshots: Vec<OddsSnapshot>,
    unsupported: HashSet<MarketType>,
    calls: Arc<Mutex<usize>>,
    /// If set, all requests return this error.
    force_error: Arc<Mutex<Option<String>>>,
}

impl MockFeed {
    pub fn new(snapshots: Vec<OddsSnapshot>) -> Self {
        Self {
            snapshots,
            unsupported: HashSet::new(),
            calls: Arc::new(Mutex::new(0)),
            force_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Reject any request that includes `market`.
    pub fn with_unsupported(mut self, market: MarketType) -> Self {
        self.unsupported.insert(market);
        self
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl OddsFeed for MockFeed {
    async fn fetch_odds(
        &self,
        sport: &str,
        markets: &[MarketType],
        at: Option<DateTime<Utc>>,
    ) -> Result<OddsSnapshot, EdgeError> {
        *self.calls.lock().unwrap() += 1;

        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(EdgeError::Feed {
                sport: sport.to_string(),
                message: msg,
            });
        }
        if let Some(market) = markets.iter().find(|m| self.unsupported.contains(*m)) {
            return Err(EdgeError::UnsupportedMarket {
                sport: sport.to_string(),
                market: market.key().to_string(),
            });
        }

        let latest = self
            .snapshots
            .iter()
            .filter(|s| s.sport == sport)
            .filter(|s| at.map_or(true, |t| s.timestamp <= t))
            .max_by_key(|s| s.timestamp);

        let Some(found) = latest else {
            return Ok(OddsSnapshot::empty(sport, at.unwrap_or_else(Utc::now)));
        };

        let mut snapshot = found.clone();
        for event in &mut snapshot.events {
            for book in &mut event.bookmakers {
                book.markets
                    .retain(|m| m.market_type().is_some_and(|t| markets.contains(&t)));
            }
        }
        Ok(snapshot)
    }
}

pub fn hours(h: i64) -> Duration {
    Duration::hours(h)
}
