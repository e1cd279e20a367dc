//! Calibration of consensus probabilities.
//!
//! Measures how well the fair probabilities we bet on match what actually
//! happened: Brier score overall and per sport, plus a binned calibration
//! curve. Only won/lost bets count; void and unsettled bets say nothing
//! about the estimate.

use std::collections::BTreeMap;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Calibration data
// ---------------------------------------------------------------------------

/// A single prediction–outcome pair.
#[derive(Debug, Clone)]
pub struct CalibrationPoint {
    pub sport: String,
    pub probability: f64,
    pub won: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CalibrationReport {
    pub total_predictions: usize,
    pub brier_score: f64,
    pub sport_brier: BTreeMap<String, f64>,
    /// Populated bins only.
    pub curve: Vec<CalibrationBucket>,
    pub diagnosis: CalibrationDiagnosis,
}

/// All predictions in one probability bin.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationBucket {
    pub bin_start: f64,
    pub bin_end: f64,
    pub mean_predicted: f64,
    pub actual_rate: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationDiagnosis {
    WellCalibrated,
    /// Won less often than the consensus said.
    Optimistic,
    /// Won more often than the consensus said.
    Pessimistic,
    #[default]
    InsufficientData,
}

// ---------------------------------------------------------------------------
// Calibrator
// ---------------------------------------------------------------------------

pub struct Calibrator {
    points: Vec<CalibrationPoint>,
    num_bins: usize,
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Calibrator {
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            num_bins: 10,
        }
    }

    pub fn add_point(&mut self, point: CalibrationPoint) {
        self.points.push(point);
    }

    pub fn count(&self) -> usize {
        self.points.len()
    }

    pub fn report(&self) -> CalibrationReport {
        if self.points.is_empty() {
            return CalibrationReport::default();
        }

        let mut by_sport: BTreeMap<String, Vec<&CalibrationPoint>> = BTreeMap::new();
        for p in &self.points {
            by_sport.entry(p.sport.clone()).or_default().push(p);
        }

        let curve = self.curve();
        CalibrationReport {
            total_predictions: self.points.len(),
            brier_score: brier(self.points.iter()),
            sport_brier: by_sport
                .into_iter()
                .map(|(sport, points)| (sport, brier(points.into_iter())))
                .collect(),
            diagnosis: self.diagnose(),
            curve,
        }
    }

    fn curve(&self) -> Vec<CalibrationBucket> {
        let width = 1.0 / self.num_bins as f64;
        let mut bins: Vec<Vec<&CalibrationPoint>> = vec![Vec::new(); self.num_bins];
        for p in &self.points {
            let idx = ((p.probability / width) as usize).min(self.num_bins - 1);
            bins[idx].push(p);
        }

        bins.into_iter()
            .enumerate()
            .filter(|(_, points)| !points.is_empty())
            .map(|(i, points)| {
                let count = points.len();
                CalibrationBucket {
                    bin_start: i as f64 * width,
                    bin_end: (i + 1) as f64 * width,
                    mean_predicted: points.iter().map(|p| p.probability).sum::<f64>() / count as f64,
                    actual_rate: points.iter().filter(|p| p.won).count() as f64 / count as f64,
                    count,
                }
            })
            .collect()
    }

    /// Compare total expected wins with actual wins.
    fn diagnose(&self) -> CalibrationDiagnosis {
        if self.points.len() < 20 {
            return CalibrationDiagnosis::InsufficientData;
        }
        let n = self.points.len() as f64;
        let expected = self.points.iter().map(|p| p.probability).sum::<f64>() / n;
        let actual = self.points.iter().filter(|p| p.won).count() as f64 / n;
        if expected - actual > 0.05 {
            CalibrationDiagnosis::Optimistic
        } else if actual - expected > 0.05 {
            CalibrationDiagnosis::Pessimistic
        } else {
            CalibrationDiagnosis::WellCalibrated
        }
    }
}

/// Brier = (1/N) Σ (p − outcome)². 0 is perfect, 0.25 is a coin flip.
fn brier<'a>(points: impl Iterator<Item = &'a CalibrationPoint>) -> f64 {
    let (sum, n) = points.fold((0.0, 0usize), |(sum, n), p| {
        let outcome = if p.won { 1.0 } else { 0.0 };
        (sum + (p.probability - outcome).powi(2), n + 1)
    });
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}
