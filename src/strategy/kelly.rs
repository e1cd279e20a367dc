//! Kelly criterion stake sizing.
//!
//! Turns a consensus probability and offered decimal odds into a
//! fractional-Kelly stake, optionally rounded to a stake granularity.

use tracing::debug;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Kelly sizing configuration.
#[derive(Debug, Clone)]
pub struct KellyConfig {
    /// Fractional Kelly multiplier (0.25 = quarter-Kelly).
    pub fraction: f64,
    /// Stake granularity; stakes round to the nearest multiple. 0 = off.
    pub rounding: f64,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            fraction: 0.25, // Quarter-Kelly
            rounding: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Formulas
// ---------------------------------------------------------------------------

/// Expected profit per unit staked: p·(odds−1) − (1−p).
pub fn expected_value(odds: f64, probability: f64) -> f64 {
    probability * (odds - 1.0) - (1.0 - probability)
}

/// Full Kelly fraction f* = (b·p − q) / b with b = odds − 1.
pub fn full_kelly(odds: f64, probability: f64) -> f64 {
    let b = odds - 1.0;
    if b <= 0.0 {
        return 0.0;
    }
    (b * probability - (1.0 - probability)) / b
}

/// Round to the nearest multiple of `nearest`. 0 leaves the value alone.
pub fn round_to_nearest(value: f64, nearest: f64) -> f64 {
    if nearest <= 0.0 {
        return value;
    }
    (value / nearest).round() * nearest
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Kelly calculator
// ---------------------------------------------------------------------------

/// Sized stake recommendation.
#[derive(Debug, Clone, PartialEq)]
pub struct StakeRecommendation {
    pub ev: f64,
    pub kelly_full: f64,    // Raw Kelly fraction
    pub kelly_applied: f64, // After multiplier, floored at 0
    pub stake: f64,
    pub expected_profit: f64,
}

pub struct KellyCalculator {
    config: KellyConfig,
}

impl KellyCalculator {
    pub fn new(config: KellyConfig) -> Self {
        Self { config }
    }

    /// Access the Kelly configuration.
    pub fn config(&self) -> &KellyConfig {
        &self.config
    }

    /// Size a stake for `odds` given a fair `probability` and `bankroll`.
    ///
    /// The stake is never negative: a non-positive edge sizes to zero.
    pub fn size(&self, odds: f64, probability: f64, bankroll: f64) -> StakeRecommendation {
        let ev = expected_value(odds, probability);
        let kelly_full = full_kelly(odds, probability);
        let kelly_applied = (kelly_full * self.config.fraction).max(0.0);

        let raw = if bankroll > 0.0 { bankroll * kelly_applied } else { 0.0 };
        let stake = round_cents(round_to_nearest(raw, self.config.rounding)).max(0.0);
        let expected_profit = round_cents(stake * ev);

        debug!(
            odds,
            probability = format!("{:.2}%", probability * 100.0),
            raw_kelly = format!("{:.2}%", kelly_full * 100.0),
            applied = format!("{:.2}%", kelly_applied * 100.0),
            stake = format!("${:.2}", stake),
            "Stake sized"
        );

        StakeRecommendation {
            ev,
            kelly_full,
            kelly_applied,
            stake,
            expected_profit,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
