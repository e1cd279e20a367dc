//! Edge evaluation.
//!
//! Prices every candidate (non-sharp, betting-set) quote in an outcome
//! group against the consensus probability and applies the configured
//! filters in a fixed order, stopping at the first failure.

use std::collections::HashSet;
use std::fmt;

use tracing::debug;

use super::consensus::Consensus;
use super::kelly::{expected_value, full_kelly};
use crate::storage::SuppressionSet;
use crate::types::{OpportunityKey, OutcomeGroup, PriceQuote};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Bookmakers we are able to bet with.
    pub betting_books: HashSet<String>,
    /// Consensus sources; never candidates.
    pub sharp_books: HashSet<String>,
    /// Minimum EV per unit staked (0.02 = +2%).
    pub min_ev: f64,
    pub min_true_probability: f64,
    /// Maximum offered odds. 0 = off.
    pub max_odds: f64,
    /// Minimum full-Kelly fraction of bankroll. 0 = off.
    pub min_kelly: f64,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            betting_books: HashSet::new(),
            sharp_books: ["pinnacle".to_string()].into(),
            min_ev: 0.02,
            min_true_probability: 0.0,
            max_odds: 0.0,
            min_kelly: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Edge detection
// ---------------------------------------------------------------------------

/// A candidate quote that passed every filter.
#[derive(Debug, Clone)]
pub struct Edge {
    pub quote: PriceQuote,
    pub probability: f64,
    pub ev: f64,
    pub kelly_full: f64,
}

/// First filter a candidate quote failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    CardinalityMismatch { quote: usize, group: usize },
    BelowMinEv { ev: f64 },
    BelowMinProbability { probability: f64 },
    AboveMaxOdds { odds: f64 },
    Blacklisted,
    AlreadyWagered,
    BelowMinKelly { kelly: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::CardinalityMismatch { quote, group } => {
                write!(f, "{quote}-way quote in {group}-way group")
            }
            Rejection::BelowMinEv { ev } => write!(f, "EV {:.2}% below minimum", ev * 100.0),
            Rejection::BelowMinProbability { probability } => {
                write!(f, "probability {:.1}% below minimum", probability * 100.0)
            }
            Rejection::AboveMaxOdds { odds } => write!(f, "odds {odds:.2} above maximum"),
            Rejection::Blacklisted => f.write_str("blacklisted after repeated failures"),
            Rejection::AlreadyWagered => f.write_str("outcome already wagered"),
            Rejection::BelowMinKelly { kelly } => {
                write!(f, "full Kelly {:.2}% below minimum", kelly * 100.0)
            }
        }
    }
}

pub struct EdgeEvaluator {
    config: EdgeConfig,
}

impl EdgeEvaluator {
    pub fn new(config: EdgeConfig) -> Self {
        Self { config }
    }

    /// Access the edge configuration.
    pub fn config(&self) -> &EdgeConfig {
        &self.config
    }

    /// Whether a quote is eligible to be priced at all.
    pub fn is_candidate(&self, quote: &PriceQuote) -> bool {
        !self.config.sharp_books.contains(&quote.bookmaker)
            && self.config.betting_books.contains(&quote.bookmaker)
    }

    /// Evaluate every candidate quote in `group`.
    ///
    /// Returns the surviving edges and, for each rejected candidate, the
    /// bookmaker and the first filter it failed.
    pub fn evaluate(
        &self,
        event_id: &str,
        group: &OutcomeGroup,
        consensus: &Consensus,
        suppression: &SuppressionSet,
    ) -> (Vec<Edge>, Vec<(String, Rejection)>) {
        let key = OpportunityKey {
            event_id: event_id.to_string(),
            market: group.market,
            outcome: group.key.clone(),
        };

        let mut edges = Vec::new();
        let mut rejected = Vec::new();
        for quote in group.quotes.iter().filter(|q| self.is_candidate(q)) {
            match self.check(quote, group.cardinality, consensus.probability, &key, suppression) {
                Ok(edge) => edges.push(edge),
                Err(reason) => {
                    debug!(
                        outcome = %key,
                        bookmaker = %quote.bookmaker,
                        odds = quote.odds,
                        reason = %reason,
                        "Candidate rejected"
                    );
                    rejected.push((quote.bookmaker.clone(), reason));
                }
            }
        }
        (edges, rejected)
    }

    /// Apply the filters to one candidate quote, in order.
    pub fn check(
        &self,
        quote: &PriceQuote,
        group_cardinality: usize,
        probability: f64,
        key: &OpportunityKey,
        suppression: &SuppressionSet,
    ) -> Result<Edge, Rejection> {
        if quote.cardinality != group_cardinality {
            return Err(Rejection::CardinalityMismatch {
                quote: quote.cardinality,
                group: group_cardinality,
            });
        }

        let ev = expected_value(quote.odds, probability);
        if ev < self.config.min_ev {
            return Err(Rejection::BelowMinEv { ev });
        }
        if probability < self.config.min_true_probability {
            return Err(Rejection::BelowMinProbability { probability });
        }
        if self.config.max_odds > 0.0 && quote.odds > self.config.max_odds {
            return Err(Rejection::AboveMaxOdds { odds: quote.odds });
        }
        if suppression.is_blacklisted(key) {
            return Err(Rejection::Blacklisted);
        }
        if suppression.is_wagered(key) {
            return Err(Rejection::AlreadyWagered);
        }

        let kelly_full = full_kelly(quote.odds, probability);
        if self.config.min_kelly > 0.0 && kelly_full < self.config.min_kelly {
            return Err(Rejection::BelowMinKelly { kelly: kelly_full });
        }

        Ok(Edge {
            quote: quote.clone(),
            probability,
            ev,
            kelly_full,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
