//! Consensus (fair) probability estimation.
//!
//! Averages the implied probabilities of sharp-book quotes in an outcome
//! group, optionally after removing each sharp book's margin from its full
//! posted market. Odds are never averaged directly.

use std::collections::HashSet;

use tracing::warn;

use super::vig::{VigMethod, DEFAULT_POWER_EXPONENT};
use crate::types::{OutcomeGroup, PriceQuote, SharpReference};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Bookmakers whose prices define the consensus.
    pub sharp_books: HashSet<String>,
    pub vig_method: VigMethod,
    pub power_exponent: f64,
    /// De-vig each sharp market before averaging; otherwise use 1/odds.
    pub use_vig_adjusted: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            sharp_books: ["pinnacle".to_string()].into(),
            vig_method: VigMethod::Proportional,
            power_exponent: DEFAULT_POWER_EXPONENT,
            use_vig_adjusted: true,
        }
    }
}

/// Fair probability for an outcome group and the quotes it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Consensus {
    pub probability: f64,
    pub references: Vec<SharpReference>,
}

pub struct ConsensusEstimator {
    config: ConsensusConfig,
}

impl ConsensusEstimator {
    pub fn new(config: ConsensusConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn is_sharp(&self, bookmaker: &str) -> bool {
        self.config.sharp_books.contains(bookmaker)
    }

    /// Mean fair probability over the sharp quotes in `group`.
    ///
    /// Returns `None` when no sharp book quotes the outcome, or none of
    /// their postings can be de-vigged.
    pub fn estimate(&self, group: &OutcomeGroup) -> Option<Consensus> {
        let references: Vec<SharpReference> = group
            .quotes
            .iter()
            .filter(|q| self.is_sharp(&q.bookmaker))
            .filter_map(|q| {
                let fair_probability = if self.config.use_vig_adjusted {
                    self.devigged(q)?
                } else {
                    q.implied_probability()
                };
                Some(SharpReference {
                    bookmaker: q.bookmaker.clone(),
                    odds: q.odds,
                    fair_probability,
                })
            })
            .collect();

        if references.is_empty() {
            return None;
        }

        let probability =
            references.iter().map(|r| r.fair_probability).sum::<f64>() / references.len() as f64;

        Some(Consensus {
            probability,
            references,
        })
    }

    /// Fair probability of a sharp quote under the configured method, then
    /// proportional. A posting that cannot be de-vigged at all is left out
    /// so raw and fair probabilities are never averaged together.
    fn devigged(&self, quote: &PriceQuote) -> Option<f64> {
        let exponent = self.config.power_exponent;
        let fair = self
            .config
            .vig_method
            .fair_probability(&quote.market_prices, quote.side_index, exponent)
            .or_else(|| {
                VigMethod::Proportional.fair_probability(&quote.market_prices, quote.side_index, exponent)
            });
        if fair.is_none() {
            warn!(
                bookmaker = %quote.bookmaker,
                outcome = %quote.outcome,
                prices = ?quote.market_prices,
                "Sharp posting cannot be de-vigged, excluded from consensus"
            );
        }
        fair
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
