//! Vig removal.
//!
//! Converts the odds a bookmaker posts for every side of one market into
//! fair (de-margined) odds. Each model is a variant of [`VigModel`]
//! selected once from configuration; numeric failures never escape and
//! fall back to the proportional model instead.

use serde::Deserialize;
use tracing::warn;

/// Default exponent for the power model.
pub const DEFAULT_POWER_EXPONENT: f64 = 1.5;

/// Iteration cap for the multi-outcome Shin solver.
const SHIN_MAX_ITERATIONS: usize = 1000;
/// Convergence tolerance on the insider share `z`.
const SHIN_TOLERANCE: f64 = 1e-9;
/// Upper clamp on the insider share.
const SHIN_MAX_Z: f64 = 0.99;

// ---------------------------------------------------------------------------
// Configured method
// ---------------------------------------------------------------------------

/// Vig removal method as named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VigMethod {
    #[default]
    Proportional,
    Power,
    Shin,
    /// Most pessimistic probability for the side being bet.
    WorstCase,
}

impl VigMethod {
    /// Fair probability of `side` within the full posted market `odds`.
    ///
    /// Returns `None` when the market cannot be de-vigged (fewer than two
    /// valid prices or `side` out of range).
    pub fn fair_probability(&self, odds: &[f64], side: usize, power_exponent: f64) -> Option<f64> {
        if side >= odds.len() {
            return None;
        }
        match self {
            VigMethod::Proportional => VigModel::Proportional.fair_probabilities(odds).map(|p| p[side]),
            VigMethod::Power => VigModel::Power { exponent: power_exponent }
                .fair_probabilities(odds)
                .map(|p| p[side]),
            VigMethod::Shin => VigModel::Shin.fair_probabilities(odds).map(|p| p[side]),
            VigMethod::WorstCase => worst_case_probability(odds, side, power_exponent),
        }
    }
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// A vig removal model usable as a generic odds transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VigModel {
    /// Scale implied probabilities so they sum to one.
    Proportional,
    /// Raise implied probabilities to `exponent` before normalising.
    Power { exponent: f64 },
    /// Shin's insider-trading model.
    Shin,
}

impl VigModel {
    /// Fair odds for every side. Input that cannot be de-vigged is returned unchanged.
    pub fn remove_vig(&self, odds: &[f64]) -> Vec<f64> {
        match self.fair_probabilities(odds) {
            Some(probs) => probs.iter().map(|p| 1.0 / p).collect(),
            None => odds.to_vec(),
        }
    }

    /// Fair probabilities for every side, summing to one.
    pub fn fair_probabilities(&self, odds: &[f64]) -> Option<Vec<f64>> {
        self.solve(odds, SHIN_MAX_ITERATIONS)
    }

    fn solve(&self, odds: &[f64], shin_iterations: usize) -> Option<Vec<f64>> {
        let implied = implied_probabilities(odds)?;
        let fair = match self {
            VigModel::Proportional => None,
            VigModel::Power { exponent } => power(&implied, *exponent),
            VigModel::Shin => shin(&implied, shin_iterations),
        };
        match fair {
            Some(p) => Some(p),
            None => {
                if *self != VigModel::Proportional {
                    warn!(model = ?self, ?odds, "Vig removal failed, using proportional");
                }
                Some(proportional(&implied))
            }
        }
    }
}

/// Implied probabilities (1/odds) when every price is a valid decimal price.
pub fn implied_probabilities(odds: &[f64]) -> Option<Vec<f64>> {
    if odds.len() < 2 || odds.iter().any(|o| !o.is_finite() || *o <= 1.0) {
        return None;
    }
    Some(odds.iter().map(|o| 1.0 / o).collect())
}

/// Sum of implied probabilities minus one.
pub fn overround(odds: &[f64]) -> f64 {
    odds.iter().map(|o| 1.0 / o).sum::<f64>() - 1.0
}

fn proportional(implied: &[f64]) -> Vec<f64> {
    let total: f64 = implied.iter().sum();
    implied.iter().map(|p| p / total).collect()
}

fn power(implied: &[f64], exponent: f64) -> Option<Vec<f64>> {
    if !exponent.is_finite() || exponent <= 0.0 {
        return None;
    }
    let raised: Vec<f64> = implied.iter().map(|p| p.powf(exponent)).collect();
    normalised(raised)
}

fn shin(implied: &[f64], max_iterations: usize) -> Option<Vec<f64>> {
    let n = implied.len();
    let booksum: f64 = implied.iter().sum();

    let z = if n == 2 {
        // Closed form for two outcomes.
        let d = implied[0] - implied[1];
        let d2 = d * d;
        let denom = booksum * (d2 - 1.0);
        if denom.abs() < f64::EPSILON {
            return None;
        }
        ((booksum - 1.0) * (d2 - booksum) / denom).clamp(0.0, SHIN_MAX_Z)
    } else {
        let mut z = 0.0_f64;
        let mut converged = false;
        for _ in 0..max_iterations {
            let root_sum: f64 = implied
                .iter()
                .map(|p| (z * z + 4.0 * (1.0 - z) * p * p / booksum).sqrt())
                .sum();
            let next = ((root_sum - 2.0) / (n as f64 - 2.0)).clamp(0.0, SHIN_MAX_Z);
            if (next - z).abs() < SHIN_TOLERANCE {
                z = next;
                converged = true;
                break;
            }
            z = next;
        }
        if !converged {
            return None;
        }
        z
    };

    let probs: Vec<f64> = implied
        .iter()
        .map(|p| ((z * z + 4.0 * (1.0 - z) * p * p / booksum).sqrt() - z) / (2.0 * (1.0 - z)))
        .collect();
    normalised(probs)
}

/// Normalise to sum one, rejecting any non-positive or non-finite entry.
fn normalised(values: Vec<f64>) -> Option<Vec<f64>> {
    if values.iter().any(|v| !v.is_finite() || *v <= 0.0) {
        return None;
    }
    let total: f64 = values.iter().sum();
    Some(values.into_iter().map(|v| v / total).collect())
}

/// The lowest fair probability any model assigns to `side`, including the
/// case where the whole margin is charged to that side.
pub fn worst_case_probability(odds: &[f64], side: usize, power_exponent: f64) -> Option<f64> {
    let implied = implied_probabilities(odds)?;
    let own = *implied.get(side)?;

    let mut candidates = vec![
        proportional(&implied)[side],
        power(&implied, power_exponent)
            .map(|p| p[side])
            .unwrap_or(f64::INFINITY),
        shin(&implied, SHIN_MAX_ITERATIONS).map(|p| p[side]).unwrap_or(f64::INFINITY),
    ];
    let additive = own - overround(odds);
    if additive > 0.0 {
        candidates.push(additive);
    }

    candidates
        .into_iter()
        .filter(|p| p.is_finite() && *p > 0.0)
        .min_by(|a, b| a.total_cmp(b))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    const MODELS: [VigModel; 3] = [
        VigModel::Proportional,
        VigModel::Power { exponent: DEFAULT_POWER_EXPONENT },
        VigModel::Shin,
    ];

    fn prob_sum(fair_odds: &[f64]) -> f64 {
        fair_odds.iter().map(|o| 1.0 / o).sum()
    }

    #[test]
    fn test_proportional_symmetric() {
        let fair = VigModel::Proportional.remove_vig(&[1.95, 1.95]);
        assert!((fair[0] - 2.0).abs() < 1e-9);
        assert!((fair[1] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_every_model_sums_to_one() {
        let markets: [&[f64]; 6] = [
            &[1.95, 1.95],
            &[1.45, 3.2],
            &[2.1, 3.5, 3.8],
            &[1.2, 6.5, 13.0],
            &[4.0, 5.0, 6.0, 8.0],
            &[1.01, 30.0],
        ];
        for model in MODELS {
            for odds in markets {
                let fair = model.remove_vig(odds);
                assert_eq!(fair.len(), odds.len());
                assert!(
                    (prob_sum(&fair) - 1.0).abs() < 1e-6,
                    "{model:?} on {odds:?} sums to {}",
                    prob_sum(&fair)
                );
            }
        }
    }

    #[test]
    fn test_known_values_asymmetric() {
        let odds = [1.45, 3.2];
        let p = VigModel::Proportional.fair_probabilities(&odds).unwrap();
        assert!((p[0] - 0.68817).abs() < 1e-4);

        let p = VigModel::Power { exponent: 1.5 }.fair_probabilities(&odds).unwrap();
        assert!((p[1] - 0.23373).abs() < 1e-4);

        let p = VigModel::Shin.fair_probabilities(&odds).unwrap();
        assert!((p[0] - 0.68858).abs() < 1e-4);
    }

    #[test]
    fn test_power_shrinks_longshot() {
        let odds = [1.45, 3.2];
        let prop = VigModel::Proportional.fair_probabilities(&odds).unwrap();
        let pow = VigModel::Power { exponent: 1.5 }.fair_probabilities(&odds).unwrap();
        assert!(pow[1] < prop[1]);
        assert!(pow[0] > prop[0]);
    }

    #[test]
    fn test_shin_three_way_converges() {
        let fair = VigModel::Shin.fair_probabilities(&[2.1, 3.5, 3.8]).unwrap();
        let sum: f64 = fair.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(fair[0] > fair[1] && fair[1] > fair[2]);
    }

    #[test]
    fn test_too_few_prices_unchanged() {
        for model in MODELS {
            assert_eq!(model.remove_vig(&[1.9]), vec![1.9]);
            assert!(model.fair_probabilities(&[]).is_none());
        }
    }

    #[test]
    fn test_invalid_price_unchanged() {
        assert_eq!(VigModel::Shin.remove_vig(&[1.0, 2.0]), vec![1.0, 2.0]);
        assert_eq!(
            VigModel::Proportional.remove_vig(&[f64::NAN, 2.0]).len(),
            2
        );
    }

    #[test]
    fn test_bad_exponent_falls_back_to_proportional() {
        let odds = [1.45, 3.2];
        let bad = VigModel::Power { exponent: 0.0 }.fair_probabilities(&odds).unwrap();
        let prop = VigModel::Proportional.fair_probabilities(&odds).unwrap();
        assert_eq!(bad, prop);
    }

    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` with warnings captured as plain text.
    fn capture_warnings<T>(f: impl FnOnce() -> T) -> (T, String) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || Captured(sink.clone()))
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let out = tracing::subscriber::with_default(subscriber, f);
        let logs = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        (out, logs)
    }

    #[test]
    fn test_shin_iteration_cap_falls_back() {
        let odds = [2.1, 3.5, 3.8];
        assert!(shin(&implied_probabilities(&odds).unwrap(), 1).is_none());

        let (capped, logs) = capture_warnings(|| VigModel::Shin.solve(&odds, 1).unwrap());
        let prop = VigModel::Proportional.fair_probabilities(&odds).unwrap();
        assert_eq!(capped, prop);
        assert!(logs.contains("Vig removal failed, using proportional"));

        // The full budget converges to a different answer.
        let solved = VigModel::Shin.fair_probabilities(&odds).unwrap();
        assert!((solved[0] - prop[0]).abs() > 1e-6);
    }

    #[test]
    fn test_degenerate_model_output_falls_back() {
        // The longshot underflows to zero under a huge exponent.
        let odds = [1.45, 3.2];
        let model = VigModel::Power { exponent: 1000.0 };
        let (fair, logs) = capture_warnings(|| model.fair_probabilities(&odds).unwrap());
        assert_eq!(fair, VigModel::Proportional.fair_probabilities(&odds).unwrap());
        assert!(fair.iter().all(|p| p.is_finite() && *p > 0.0));
        assert!(logs.contains("WARN"));
    }

    #[test]
    fn test_proportional_never_warns() {
        let (_, logs) = capture_warnings(|| VigModel::Proportional.fair_probabilities(&[1.45, 3.2]));
        assert!(logs.is_empty());
    }

    #[test]
    fn test_worst_case_is_minimum() {
        let odds = [1.45, 3.2];
        for side in 0..2 {
            let wc = worst_case_probability(&odds, side, 1.5).unwrap();
            for model in MODELS {
                let p = model.fair_probabilities(&odds).unwrap()[side];
                assert!(wc <= p + 1e-12);
            }
        }
        // Underdog is worst under power, favourite under the additive case.
        assert!((worst_case_probability(&odds, 1, 1.5).unwrap() - 0.23373).abs() < 1e-4);
        assert!((worst_case_probability(&odds, 0, 1.5).unwrap() - 0.6875).abs() < 1e-4);
    }

    #[test]
    fn test_worst_case_symmetric() {
        let wc = worst_case_probability(&[1.95, 1.95], 0, 1.5).unwrap();
        assert!((wc - 0.48718).abs() < 1e-4);
    }

    #[test]
    fn test_method_dispatch() {
        let odds = [2.0, 2.0];
        for method in [
            VigMethod::Proportional,
            VigMethod::Power,
            VigMethod::Shin,
            VigMethod::WorstCase,
        ] {
            let p = method.fair_probability(&odds, 0, 1.5).unwrap();
            assert!((p - 0.5).abs() < 1e-9, "{method:?} gave {p}");
        }
        assert!(VigMethod::Shin.fair_probability(&odds, 2, 1.5).is_none());
    }

    #[test]
    fn test_method_deserialise() {
        #[derive(Deserialize)]
        struct Wrap {
            m: VigMethod,
        }
        let w: Wrap = toml::from_str("m = \"worst_case\"").unwrap();
        assert_eq!(w.m, VigMethod::WorstCase);
    }
}
