//! Ports for external collaborators.
//!
//! The odds feed and the result source are owned outside this crate; the
//! pipeline only sees these traits. File-backed adapters live in
//! [`archive`].

pub mod archive;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::types::{EdgeError, GameResult, MarketType, OddsSnapshot};

/// Source of price snapshots.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OddsFeed: Send + Sync {
    /// Prices for `sport` in the given markets. `at` selects a historical
    /// snapshot; `None` means the latest available.
    ///
    /// Returns [`EdgeError::UnsupportedMarket`] when the provider rejects
    /// one of the requested markets for this sport.
    async fn fetch_odds(
        &self,
        sport: &str,
        markets: &[MarketType],
        at: Option<DateTime<Utc>>,
    ) -> Result<OddsSnapshot, EdgeError>;
}

/// Source of final scores.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultLookup: Send + Sync {
    /// Final score of the game between `team_a` and `team_b` played around
    /// `date`, or `None` if no such game is known.
    async fn lookup(
        &self,
        sport: &str,
        team_a: &str,
        team_b: &str,
        date: DateTime<Utc>,
    ) -> Result<Option<GameResult>, EdgeError>;
}

// ---------------------------------------------------------------------------
// Price cache
// ---------------------------------------------------------------------------

/// Short-lived cache of snapshots keyed by sport and market set.
///
/// Check-then-write: two workers may both miss and both fetch. The later
/// write wins and no entry is ever partially written.
pub trait PriceCache: Send + Sync {
    fn get(&self, key: &str) -> Option<OddsSnapshot>;
    fn put(&self, key: String, snapshot: OddsSnapshot);
    fn ttl(&self) -> Duration;
}

/// Cache key for a sport and a set of markets. Market order is irrelevant.
pub fn cache_key(sport: &str, markets: &[MarketType]) -> String {
    let mut keys: Vec<&str> = markets.iter().map(MarketType::key).collect();
    keys.sort_unstable();
    keys.dedup();
    format!("{sport}:{}", keys.join(","))
}

pub struct TtlPriceCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, OddsSnapshot)>>,
}

impl TtlPriceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PriceCache for TtlPriceCache {
    fn get(&self, key: &str) -> Option<OddsSnapshot> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some((stored, snapshot)) if stored.elapsed() < self.ttl => {
                debug!(key, "Price cache hit");
                Some(snapshot.clone())
            }
            Some(_) => {
                debug!(key, "Price cache entry expired");
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn put(&self, key: String, snapshot: OddsSnapshot) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key, (Instant::now(), snapshot));
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_ignores_order() {
        assert_eq!(
            cache_key("soccer_epl", &[MarketType::Totals, MarketType::H2h]),
            cache_key("soccer_epl", &[MarketType::H2h, MarketType::Totals, MarketType::H2h]),
        );
        assert_eq!(cache_key("soccer_epl", &[MarketType::H2h]), "soccer_epl:h2h");
    }

    #[test]
    fn test_cache_hit_and_expiry() {
        let snap = OddsSnapshot::empty("soccer_epl", Utc::now());

        let cache = TtlPriceCache::new(Duration::from_secs(60));
        assert!(cache.get("k").is_none());
        cache.put("k".into(), snap.clone());
        assert_eq!(cache.get("k").map(|s| s.sport), Some("soccer_epl".to_string()));

        let expired = TtlPriceCache::new(Duration::ZERO);
        expired.put("k".into(), snap);
        assert!(expired.get("k").is_none());
        assert!(expired.is_empty());
    }
}
