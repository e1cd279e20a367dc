//! Strategy engine: normalisation, consensus, edge evaluation and Kelly sizing.
//!
//! [`StrategyPipeline`] runs one snapshot through
//! Normalizer → Consensus → Edge → Kelly. It is a pure function of the
//! snapshot, the bankroll and a read-only [`SuppressionSet`]; the caller
//! owns every write.

pub mod consensus;
pub mod edge;
pub mod kelly;
pub mod normalizer;
pub mod vig;

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::StrategyConfig;
use crate::engine::links::bookmaker_link;
use crate::storage::SuppressionSet;
use crate::types::{
    EdgeError, EventOdds, MarketType, OddsSnapshot, Opportunity, OpportunityKey,
};
use consensus::{Consensus, ConsensusConfig, ConsensusEstimator};
use edge::{Edge, EdgeConfig, EdgeEvaluator, Rejection};
use kelly::{KellyCalculator, KellyConfig};
use normalizer::MarketNormalizer;

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    #[default]
    Ev,
    Kelly,
    ExpectedProfit,
    Odds,
    MatchTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Sort opportunities by `order_by`, breaking ties on identity so that
/// identical inputs always produce identical output.
pub fn rank(opportunities: &mut [Opportunity], order_by: OrderBy, sort_order: SortOrder) {
    opportunities.sort_by(|a, b| {
        let primary = match order_by {
            OrderBy::Ev => a.ev.total_cmp(&b.ev),
            OrderBy::Kelly => a.kelly_full.total_cmp(&b.kelly_full),
            OrderBy::ExpectedProfit => a.expected_profit.total_cmp(&b.expected_profit),
            OrderBy::Odds => a.odds.total_cmp(&b.odds),
            OrderBy::MatchTime => a.event.commence_time.cmp(&b.event.commence_time),
        };
        let primary = match sort_order {
            SortOrder::Asc => primary,
            SortOrder::Desc => primary.reverse(),
        };
        primary.then_with(|| identity_cmp(a, b))
    });
}

fn identity_cmp(a: &Opportunity, b: &Opportunity) -> Ordering {
    (&a.event.id, a.market, &a.outcome, &a.bookmaker).cmp(&(&b.event.id, b.market, &b.outcome, &b.bookmaker))
}

/// Keep the best-EV price per outcome. Different outcomes of the same event
/// stay independent. Returns (kept, capped).
pub fn one_bet_per_outcome(opportunities: Vec<Opportunity>) -> (Vec<Opportunity>, Vec<Opportunity>) {
    let mut sorted = opportunities;
    sorted.sort_by(|a, b| {
        a.key()
            .cmp(&b.key())
            .then_with(|| b.ev.total_cmp(&a.ev))
            .then_with(|| b.odds.total_cmp(&a.odds))
            .then_with(|| a.bookmaker.cmp(&b.bookmaker))
    });

    let mut seen: HashSet<OpportunityKey> = HashSet::new();
    let mut kept = Vec::new();
    let mut capped = Vec::new();
    for opp in sorted {
        if seen.insert(opp.key()) {
            kept.push(opp);
        } else {
            capped.push(opp);
        }
    }
    (kept, capped)
}

// ---------------------------------------------------------------------------
// Decision log
// ---------------------------------------------------------------------------

/// Record of every candidate priced during a pass, including the ones
/// passed on and the reason why.
#[derive(Debug, Clone)]
pub enum DecisionRecord {
    Selected {
        key: OpportunityKey,
        bookmaker: String,
        ev: f64,
        stake: f64,
    },
    Rejected {
        key: OpportunityKey,
        bookmaker: String,
        reason: Rejection,
    },
    /// A better price for the same outcome was kept instead.
    Capped { key: OpportunityKey, bookmaker: String },
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Per-pass inputs that are not part of the strategy configuration.
#[derive(Debug, Clone, Copy)]
pub struct ScanContext<'a> {
    /// Events starting at or before this instant are skipped.
    pub reference_time: DateTime<Utc>,
    pub bankroll: f64,
    pub suppression: &'a SuppressionSet,
    /// Skip events starting further out than this. Live scans only.
    pub max_days_ahead: Option<u32>,
}

pub struct StrategyPipeline {
    normalizer: MarketNormalizer,
    consensus: ConsensusEstimator,
    edges: EdgeEvaluator,
    kelly: KellyCalculator,
    markets: Vec<MarketType>,
    order_by: OrderBy,
    sort_order: SortOrder,
    one_bet_per_outcome: bool,
}

impl StrategyPipeline {
    pub fn new(
        consensus: ConsensusEstimator,
        edges: EdgeEvaluator,
        kelly: KellyCalculator,
        markets: Vec<MarketType>,
    ) -> Self {
        Self {
            normalizer: MarketNormalizer::new(consensus.config().sharp_books.clone()),
            consensus,
            edges,
            kelly,
            markets,
            order_by: OrderBy::default(),
            sort_order: SortOrder::default(),
            one_bet_per_outcome: true,
        }
    }

    pub fn with_ranking(mut self, order_by: OrderBy, sort_order: SortOrder) -> Self {
        self.order_by = order_by;
        self.sort_order = sort_order;
        self
    }

    pub fn with_one_bet_per_outcome(mut self, enabled: bool) -> Self {
        self.one_bet_per_outcome = enabled;
        self
    }

    /// Build the pipeline from validated configuration.
    pub fn from_config(cfg: &StrategyConfig) -> Result<Self, EdgeError> {
        let sharp_books: HashSet<String> = cfg.sharp_books.iter().cloned().collect();
        let betting_books: HashSet<String> = cfg.betting_bookmakers.iter().cloned().collect();

        let pipeline = Self::new(
            ConsensusEstimator::new(ConsensusConfig {
                sharp_books: sharp_books.clone(),
                vig_method: cfg.vig_removal_method,
                power_exponent: cfg.power_exponent,
                use_vig_adjusted: cfg.use_vig_adjusted_ev,
            }),
            EdgeEvaluator::new(EdgeConfig {
                betting_books,
                sharp_books,
                min_ev: cfg.min_ev_threshold,
                min_true_probability: cfg.min_true_probability,
                max_odds: cfg.max_odds,
                min_kelly: cfg.min_kelly_percentage,
            }),
            KellyCalculator::new(KellyConfig {
                fraction: cfg.kelly_fraction,
                rounding: cfg.bet_rounding,
            }),
            cfg.market_types()?,
        )
        .with_ranking(cfg.order_by, cfg.sort_order)
        .with_one_bet_per_outcome(cfg.one_bet_per_outcome);

        Ok(pipeline)
    }

    pub fn markets(&self) -> &[MarketType] {
        &self.markets
    }

    pub fn ranking(&self) -> (OrderBy, SortOrder) {
        (self.order_by, self.sort_order)
    }

    /// Run every event in a snapshot through the pipeline.
    ///
    /// Returns ranked opportunities and the full decision log.
    pub fn evaluate_snapshot(
        &self,
        snapshot: &OddsSnapshot,
        ctx: &ScanContext<'_>,
    ) -> (Vec<Opportunity>, Vec<DecisionRecord>) {
        let mut opportunities = Vec::new();
        let mut decisions = Vec::new();

        for event in &snapshot.events {
            let (opps, log) = self.evaluate_event(event, ctx);
            opportunities.extend(opps);
            decisions.extend(log);
        }

        if self.one_bet_per_outcome {
            let (kept, capped) = one_bet_per_outcome(opportunities);
            for opp in capped {
                decisions.push(DecisionRecord::Capped {
                    key: opp.key(),
                    bookmaker: opp.bookmaker.clone(),
                });
            }
            opportunities = kept;
        }

        rank(&mut opportunities, self.order_by, self.sort_order);

        for opp in &opportunities {
            decisions.push(DecisionRecord::Selected {
                key: opp.key(),
                bookmaker: opp.bookmaker.clone(),
                ev: opp.ev,
                stake: opp.stake,
            });
        }

        info!(
            sport = %snapshot.sport,
            events = snapshot.events.len(),
            opportunities = opportunities.len(),
            "Snapshot evaluated"
        );

        (opportunities, decisions)
    }

    /// Evaluate one event across every configured market.
    pub fn evaluate_event(
        &self,
        event: &EventOdds,
        ctx: &ScanContext<'_>,
    ) -> (Vec<Opportunity>, Vec<DecisionRecord>) {
        let mut opportunities = Vec::new();
        let mut decisions = Vec::new();

        if event.event.completed || event.event.has_started(ctx.reference_time) {
            debug!(event_id = %event.event.id, "Skipping started event");
            return (opportunities, decisions);
        }
        if let Some(days) = ctx.max_days_ahead.filter(|d| *d > 0) {
            if event.event.commence_time - ctx.reference_time > Duration::days(i64::from(days)) {
                debug!(event_id = %event.event.id, days, "Skipping event beyond horizon");
                return (opportunities, decisions);
            }
        }

        for market in &self.markets {
            for group in self.normalizer.normalize(event, *market) {
                let Some(consensus) = self.consensus.estimate(&group) else {
                    continue;
                };

                let (edges, rejected) =
                    self.edges.evaluate(&event.event.id, &group, &consensus, ctx.suppression);

                let key = OpportunityKey {
                    event_id: event.event.id.clone(),
                    market: group.market,
                    outcome: group.key.clone(),
                };
                for (bookmaker, reason) in rejected {
                    decisions.push(DecisionRecord::Rejected {
                        key: key.clone(),
                        bookmaker,
                        reason,
                    });
                }

                for edge in edges {
                    opportunities.push(self.build_opportunity(event, &consensus, edge, ctx));
                }
            }
        }

        (opportunities, decisions)
    }

    fn build_opportunity(
        &self,
        event: &EventOdds,
        consensus: &Consensus,
        edge: Edge,
        ctx: &ScanContext<'_>,
    ) -> Opportunity {
        let sized = self.kelly.size(edge.quote.odds, edge.probability, ctx.bankroll);
        let quote = edge.quote;

        let link = quote.link.clone().unwrap_or_else(|| {
            bookmaker_link(&quote.bookmaker, &event.event.home_team, &event.event.away_team)
        });

        debug!(
            event_id = %event.event.id,
            market = %quote.market,
            outcome = %quote.outcome,
            bookmaker = %quote.bookmaker,
            odds = quote.odds,
            ev = format!("{:.2}%", edge.ev * 100.0),
            stake = format!("${:.2}", sized.stake),
            "Opportunity found"
        );

        Opportunity {
            event: event.event.clone(),
            market: quote.market,
            outcome: quote.outcome.clone(),
            bookmaker: quote.bookmaker.clone(),
            bookmaker_title: quote.bookmaker_title.clone(),
            odds: quote.odds,
            cardinality: quote.cardinality,
            consensus_probability: edge.probability,
            implied_probability: quote.implied_probability(),
            sharp_odds: 1.0 / edge.probability,
            ev: edge.ev,
            kelly_full: edge.kelly_full,
            kelly_applied: sized.kelly_applied,
            stake: sized.stake,
            expected_profit: sized.expected_profit,
            sharp_references: consensus.references.clone(),
            link,
            generated_at: ctx.reference_time,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BookmakerOdds, Event, MarketOdds, OutcomeKey, OutcomeOdds};
    use chrono::TimeZone;

    // ---- helpers -----------------------------------------------------------

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 4, 12, 0, 0).unwrap()
    }

    fn book(key: &str, market: &str, prices: &[(&str, f64)]) -> BookmakerOdds {
        BookmakerOdds {
            key: key.into(),
            title: key.to_uppercase(),
            link: None,
            markets: vec![MarketOdds {
                key: market.into(),
                link: None,
                outcomes: prices
                    .iter()
                    .map(|(name, price)| OutcomeOdds {
                        name: name.to_string(),
                        price: *price,
                        point: None,
                        link: None,
                    })
                    .collect(),
            }],
        }
    }

    fn make_event(id: &str, hours_ahead: i64, bookmakers: Vec<BookmakerOdds>) -> EventOdds {
        EventOdds {
            event: Event {
                id: id.into(),
                sport_key: "basketball_nba".into(),
                home_team: "Team A".into(),
                away_team: "Team B".into(),
                commence_time: now() + Duration::hours(hours_ahead),
                completed: false,
            },
            link: None,
            bookmakers,
        }
    }

    fn snapshot(events: Vec<EventOdds>) -> OddsSnapshot {
        OddsSnapshot {
            sport: "basketball_nba".into(),
            timestamp: now(),
            events,
        }
    }

    fn pipeline(use_vig_adjusted: bool) -> StrategyPipeline {
        let sharp: HashSet<String> = ["pinnacle".to_string(), "betfair".to_string()].into();
        StrategyPipeline::new(
            ConsensusEstimator::new(ConsensusConfig {
                sharp_books: sharp.clone(),
                use_vig_adjusted,
                ..Default::default()
            }),
            EdgeEvaluator::new(EdgeConfig {
                betting_books: ["bet365".to_string(), "williamhill".to_string()].into(),
                sharp_books: sharp,
                ..Default::default()
            }),
            KellyCalculator::new(KellyConfig::default()),
            vec![MarketType::H2h],
        )
    }

    fn ctx(suppression: &SuppressionSet) -> ScanContext<'_> {
        ScanContext {
            reference_time: now(),
            bankroll: 1000.0,
            suppression,
            max_days_ahead: None,
        }
    }

    fn scenario_event(id: &str) -> EventOdds {
        make_event(id, 6, vec![
            book("pinnacle", "h2h", &[("Team A", 2.00), ("Team B", 1.85)]),
            book("betfair", "h2h", &[("Team A", 2.50), ("Team B", 1.55)]),
            book("bet365", "h2h", &[("Team A", 2.40), ("Team B", 1.60)]),
        ])
    }

    // ---- tests -------------------------------------------------------------

    #[test]
    fn test_scenario_consensus_and_ev() {
        let s = SuppressionSet::default();
        let (opps, _) = pipeline(false).evaluate_snapshot(&snapshot(vec![scenario_event("E1")]), &ctx(&s));
        assert_eq!(opps.len(), 1);
        let opp = &opps[0];
        assert_eq!(opp.outcome, OutcomeKey::new("Team A", None));
        assert!((opp.consensus_probability - 0.45).abs() < 1e-12);
        assert!((opp.ev - 0.08).abs() < 1e-9);
        assert_eq!(opp.sharp_references.len(), 2);
        assert!(opp.stake > 0.0);
        assert!(opp.link.contains("bet365"));
        assert_eq!(opp.generated_at, now());
    }

    #[test]
    fn test_idempotent_scan() {
        let s = SuppressionSet::default();
        let p = pipeline(true);
        let snap = snapshot(vec![scenario_event("E1"), scenario_event("E2")]);
        let (first, _) = p.evaluate_snapshot(&snap, &ctx(&s));
        let (second, _) = p.evaluate_snapshot(&snap, &ctx(&s));
        let keys = |v: &[Opportunity]| -> Vec<(OpportunityKey, String, f64)> {
            v.iter().map(|o| (o.key(), o.bookmaker.clone(), o.stake)).collect()
        };
        assert_eq!(keys(&first), keys(&second));
    }

    #[test]
    fn test_three_way_sharp_two_way_candidate() {
        let event = make_event("E1", 6, vec![
            book("pinnacle", "h2h", &[("Team A", 2.6), ("Team B", 3.1), ("Draw", 3.2)]),
            book("bet365", "h2h", &[("Team A", 1.9), ("Team B", 2.2)]),
        ]);
        let s = SuppressionSet::default();
        let (opps, _) = pipeline(true).evaluate_snapshot(&snapshot(vec![event]), &ctx(&s));
        assert!(opps.is_empty());
    }

    #[test]
    fn test_started_event_skipped() {
        let mut event = scenario_event("E1");
        event.event.commence_time = now();
        let s = SuppressionSet::default();
        let (opps, _) = pipeline(false).evaluate_snapshot(&snapshot(vec![event]), &ctx(&s));
        assert!(opps.is_empty());
    }

    #[test]
    fn test_max_days_ahead() {
        let event = make_event("E1", 24 * 10, scenario_event("E1").bookmakers);
        let s = SuppressionSet::default();
        let mut c = ctx(&s);
        c.max_days_ahead = Some(3);
        let (opps, _) = pipeline(false).evaluate_snapshot(&snapshot(vec![event.clone()]), &c);
        assert!(opps.is_empty());
        c.max_days_ahead = Some(0);
        let (opps, _) = pipeline(false).evaluate_snapshot(&snapshot(vec![event]), &c);
        assert_eq!(opps.len(), 1);
    }

    #[test]
    fn test_wagered_outcome_suppressed() {
        let key = OpportunityKey {
            event_id: "E1".into(),
            market: MarketType::H2h,
            outcome: OutcomeKey::new("Team A", None),
        };
        let s = SuppressionSet::new([key].into(), Default::default());
        let (opps, decisions) =
            pipeline(false).evaluate_snapshot(&snapshot(vec![scenario_event("E1")]), &ctx(&s));
        assert!(opps.is_empty());
        assert!(decisions.iter().any(|d| matches!(
            d,
            DecisionRecord::Rejected { reason: Rejection::AlreadyWagered, .. }
        )));
    }

    #[test]
    fn test_one_bet_per_outcome_keeps_best_price() {
        let event = make_event("E1", 6, vec![
            book("pinnacle", "h2h", &[("Team A", 2.00), ("Team B", 1.85)]),
            book("betfair", "h2h", &[("Team A", 2.50), ("Team B", 1.55)]),
            book("bet365", "h2h", &[("Team A", 2.40), ("Team B", 1.60)]),
            book("williamhill", "h2h", &[("Team A", 2.60), ("Team B", 1.50)]),
        ]);
        let s = SuppressionSet::default();
        let (opps, decisions) = pipeline(false).evaluate_snapshot(&snapshot(vec![event.clone()]), &ctx(&s));
        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].bookmaker, "williamhill");
        assert!(decisions.iter().any(|d| matches!(d, DecisionRecord::Capped { .. })));

        let (opps, _) = pipeline(false)
            .with_one_bet_per_outcome(false)
            .evaluate_snapshot(&snapshot(vec![event]), &ctx(&s));
        assert_eq!(opps.len(), 2);
    }

    #[test]
    fn test_rank_orders() {
        let s = SuppressionSet::default();
        let snap = snapshot(vec![
            scenario_event("E1"),
            make_event("E2", 30, vec![
                book("pinnacle", "h2h", &[("Team A", 2.00), ("Team B", 1.85)]),
                book("bet365", "h2h", &[("Team A", 2.20), ("Team B", 1.60)]),
            ]),
        ]);
        let (mut opps, _) = pipeline(false)
            .with_one_bet_per_outcome(false)
            .evaluate_snapshot(&snap, &ctx(&s));
        assert_eq!(opps.len(), 2);
        assert!(opps[0].ev >= opps[1].ev);

        rank(&mut opps, OrderBy::MatchTime, SortOrder::Asc);
        assert_eq!(opps[0].event.id, "E1");
        rank(&mut opps, OrderBy::MatchTime, SortOrder::Desc);
        assert_eq!(opps[0].event.id, "E2");
        rank(&mut opps, OrderBy::Odds, SortOrder::Asc);
        assert!(opps[0].odds <= opps[1].odds);
    }
}
