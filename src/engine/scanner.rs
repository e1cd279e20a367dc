//! Live multi-sport scanner.
//!
//! Fetches one snapshot per configured sport through a bounded pool of
//! concurrent workers and runs each through the strategy pipeline. Workers
//! only read the suppression view and return opportunities; the caller
//! serialises any writes to the bet repository.
//!
//! A sport that fails to fetch is logged and skipped. A market the provider
//! rejects for a sport is dropped and the remaining markets are fetched
//! individually.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::data::{cache_key, OddsFeed, PriceCache};
use crate::storage::SuppressionSet;
use crate::strategy::{rank, DecisionRecord, ScanContext, StrategyPipeline};
use crate::types::{EdgeError, EventOdds, MarketType, OddsSnapshot, Opportunity};

// ---------------------------------------------------------------------------
// Scan results
// ---------------------------------------------------------------------------

/// Outcome of scanning one sport.
#[derive(Debug, Clone)]
pub struct SportScan {
    pub sport: String,
    pub events: usize,
    pub from_cache: bool,
    pub opportunities: Vec<Opportunity>,
    pub decisions: Vec<DecisionRecord>,
}

/// Outcome of a full scan across every sport.
#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub scanned_at: DateTime<Utc>,
    pub sports: Vec<SportScan>,
    pub failed_sports: Vec<String>,
    /// All opportunities, ranked.
    pub opportunities: Vec<Opportunity>,
}

impl ScanSummary {
    pub fn events(&self) -> usize {
        self.sports.iter().map(|s| s.events).sum()
    }

    pub fn rejected(&self) -> usize {
        self.sports
            .iter()
            .flat_map(|s| &s.decisions)
            .filter(|d| matches!(d, DecisionRecord::Rejected { .. }))
            .count()
    }
}

// ---------------------------------------------------------------------------
// Snapshot merging
// ---------------------------------------------------------------------------

/// Merge per-market snapshots of one sport. Events are joined by id and
/// bookmaker postings by bookmaker key.
pub fn merge_snapshots(sport: &str, snapshots: Vec<OddsSnapshot>) -> OddsSnapshot {
    let timestamp = snapshots
        .iter()
        .map(|s| s.timestamp)
        .max()
        .unwrap_or_else(Utc::now);

    let mut events: Vec<EventOdds> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for snapshot in snapshots {
        for event in snapshot.events {
            let Some(&i) = index.get(&event.event.id) else {
                index.insert(event.event.id.clone(), events.len());
                events.push(event);
                continue;
            };
            let merged = &mut events[i];
            if merged.link.is_none() {
                merged.link = event.link;
            }
            for book in event.bookmakers {
                match merged.bookmakers.iter_mut().find(|b| b.key == book.key) {
                    Some(existing) => existing.markets.extend(book.markets),
                    None => merged.bookmakers.push(book),
                }
            }
        }
    }

    OddsSnapshot {
        sport: sport.to_string(),
        timestamp,
        events,
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

pub struct Scanner {
    feed: Arc<dyn OddsFeed>,
    cache: Arc<dyn PriceCache>,
    pipeline: StrategyPipeline,
    sports: Vec<String>,
    max_concurrency: usize,
}

impl Scanner {
    pub fn new(
        feed: Arc<dyn OddsFeed>,
        cache: Arc<dyn PriceCache>,
        pipeline: StrategyPipeline,
        sports: Vec<String>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            feed,
            cache,
            pipeline,
            sports,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Scan every sport once.
    pub async fn scan(
        &self,
        bankroll: f64,
        suppression: &SuppressionSet,
        max_days_ahead: Option<u32>,
        now: DateTime<Utc>,
    ) -> ScanSummary {
        info!(
            sports = self.sports.len(),
            workers = self.max_concurrency,
            wagered = suppression.wagered_count(),
            blacklisted = suppression.blacklisted_count(),
            "Starting scan"
        );

        let ctx = ScanContext {
            reference_time: now,
            bankroll,
            suppression,
            max_days_ahead,
        };

        let results: Vec<(String, Result<SportScan, EdgeError>)> = stream::iter(self.sports.iter())
            .map(|sport| async move { (sport.clone(), self.scan_sport(sport, &ctx).await) })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut sports = Vec::new();
        let mut failed_sports = Vec::new();
        for (sport, result) in results {
            match result {
                Ok(scan) => sports.push(scan),
                Err(e) => {
                    warn!(sport = %sport, error = %e, "Sport scan failed, continuing without");
                    failed_sports.push(sport);
                }
            }
        }
        sports.sort_by(|a, b| a.sport.cmp(&b.sport));
        failed_sports.sort();

        let mut opportunities: Vec<Opportunity> = sports
            .iter()
            .flat_map(|s| s.opportunities.iter().cloned())
            .collect();
        let (order_by, sort_order) = self.pipeline.ranking();
        rank(&mut opportunities, order_by, sort_order);

        let summary = ScanSummary {
            scanned_at: now,
            sports,
            failed_sports,
            opportunities,
        };
        info!(
            sports_ok = summary.sports.len(),
            sports_failed = summary.failed_sports.len(),
            events = summary.events(),
            rejected = summary.rejected(),
            opportunities = summary.opportunities.len(),
            "Scan complete"
        );
        summary
    }

    async fn scan_sport(&self, sport: &str, ctx: &ScanContext<'_>) -> Result<SportScan, EdgeError> {
        let (snapshot, from_cache) = self.snapshot(sport).await?;
        let (opportunities, decisions) = self.pipeline.evaluate_snapshot(&snapshot, ctx);
        Ok(SportScan {
            sport: sport.to_string(),
            events: snapshot.events.len(),
            from_cache,
            opportunities,
            decisions,
        })
    }

    /// Cached snapshot for a sport, fetching on a miss.
    async fn snapshot(&self, sport: &str) -> Result<(OddsSnapshot, bool), EdgeError> {
        let markets = self.pipeline.markets();
        let key = cache_key(sport, markets);
        if let Some(snapshot) = self.cache.get(&key) {
            debug!(sport, key = %key, "Using cached snapshot");
            return Ok((snapshot, true));
        }

        let snapshot = match self.feed.fetch_odds(sport, markets, None).await {
            Ok(snapshot) => snapshot,
            Err(EdgeError::UnsupportedMarket { market, .. }) if markets.len() > 1 => {
                warn!(sport, market = %market, "Market unsupported, fetching markets individually");
                let (snapshot, supported) = self.fetch_per_market(sport, markets).await?;
                self.cache.put(cache_key(sport, &supported), snapshot.clone());
                snapshot
            }
            Err(e) => return Err(e),
        };

        self.cache.put(key, snapshot.clone());
        Ok((snapshot, false))
    }

    async fn fetch_per_market(
        &self,
        sport: &str,
        markets: &[MarketType],
    ) -> Result<(OddsSnapshot, Vec<MarketType>), EdgeError> {
        let mut snapshots = Vec::new();
        let mut supported = Vec::new();
        for market in markets {
            match self.feed.fetch_odds(sport, std::slice::from_ref(market), None).await {
                Ok(snapshot) => {
                    snapshots.push(snapshot);
                    supported.push(*market);
                }
                Err(e) => debug!(sport, market = %market, error = %e, "Skipping market"),
            }
        }

        if supported.is_empty() {
            return Err(EdgeError::Feed {
                sport: sport.to_string(),
                message: "no configured market is available".into(),
            });
        }
        info!(sport, markets = supported.len(), "Merged per-market snapshots");
        Ok((merge_snapshots(sport, snapshots), supported))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
