//! Bankroll ledger.
//!
//! Ordered record of every bet's effect on capital. Pending entries carry a
//! zero delta; the balance only moves when an outcome is fully determined,
//! so `balance == initial + Σ delta` holds after every entry.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::types::{Bet, BetStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub at: DateTime<Utc>,
    pub bet_id: String,
    pub status: BetStatus,
    pub delta: Decimal,
    pub balance_after: Decimal,
}

/// A point on the bankroll curve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BankrollPoint {
    pub at: DateTime<Utc>,
    pub balance: Decimal,
}

#[derive(Debug, Clone)]
pub struct BankrollLedger {
    initial: Decimal,
    balance: Decimal,
    started_at: DateTime<Utc>,
    entries: Vec<LedgerEntry>,
}

impl BankrollLedger {
    pub fn new(initial: Decimal, started_at: DateTime<Utc>) -> Self {
        Self {
            initial,
            balance: initial,
            started_at,
            entries: Vec::new(),
        }
    }

    pub fn initial(&self) -> Decimal {
        self.initial
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Record a newly accepted bet. Capital is untouched.
    pub fn record_pending(&mut self, bet: &Bet, at: DateTime<Utc>) {
        self.entries.push(LedgerEntry {
            at,
            bet_id: bet.id.clone(),
            status: BetStatus::Pending,
            delta: Decimal::ZERO,
            balance_after: self.balance,
        });
    }

    /// Apply a settled outcome and return its capital delta.
    pub fn record_settlement(&mut self, bet: &Bet, status: BetStatus, at: DateTime<Utc>) -> Decimal {
        let delta = bet.settlement_profit(status);
        self.balance += delta;
        self.entries.push(LedgerEntry {
            at,
            bet_id: bet.id.clone(),
            status,
            delta,
            balance_after: self.balance,
        });
        debug!(
            bet_id = %bet.id,
            status = %status,
            delta = %delta,
            balance = %self.balance,
            "Ledger updated"
        );
        delta
    }

    /// Sum of every recorded delta.
    pub fn total_delta(&self) -> Decimal {
        self.entries.iter().map(|e| e.delta).sum()
    }

    /// Bankroll after each settlement, starting with the initial balance.
    pub fn history(&self) -> Vec<BankrollPoint> {
        let mut points = vec![BankrollPoint {
            at: self.started_at,
            balance: self.initial,
        }];
        points.extend(
            self.entries
                .iter()
                .filter(|e| e.status.is_settled())
                .map(|e| BankrollPoint {
                    at: e.at,
                    balance: e.balance_after,
                }),
        );
        points
    }

    /// Largest peak-to-trough fall of the settled balance, as
    /// (amount, percentage of the peak).
    pub fn max_drawdown(&self) -> (Decimal, f64) {
        let mut peak = self.initial;
        let mut worst = Decimal::ZERO;
        let mut worst_pct = 0.0_f64;

        for point in self.history() {
            if point.balance > peak {
                peak = point.balance;
            }
            let dd = peak - point.balance;
            if dd > worst {
                worst = dd;
                if peak > Decimal::ZERO {
                    worst_pct = (dd / peak * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0);
                }
            }
        }
        (worst, worst_pct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarketType, OutcomeKey};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn make_bet(id: &str, odds: f64, stake: Decimal) -> Bet {
        Bet {
            id: id.into(),
            event_id: format!("E-{id}"),
            sport: "basketball_nba".into(),
            home_team: "Team A".into(),
            away_team: "Team B".into(),
            commence_time: start(),
            market: MarketType::H2h,
            outcome: OutcomeKey::new("Team A", None),
            bookmaker: "bet365".into(),
            odds,
            cardinality: 2,
            consensus_probability: 0.5,
            ev: 0.05,
            stake,
            expected_profit: dec!(0),
            status: BetStatus::Pending,
            placed_at: start(),
            settled_at: None,
            profit_loss: None,
        }
    }

    #[test]
    fn test_round_trip_invariant() {
        let mut ledger = BankrollLedger::new(dec!(1000), start());
        let script = [
            (make_bet("b1", 2.5, dec!(20)), BetStatus::Won),
            (make_bet("b2", 1.8, dec!(15)), BetStatus::Lost),
            (make_bet("b3", 3.1, dec!(12.34)), BetStatus::Void),
            (make_bet("b4", 2.0, dec!(50)), BetStatus::Pending),
            (make_bet("b5", 1.91, dec!(33.33)), BetStatus::Won),
        ];

        let mut expected = Decimal::ZERO;
        for (i, (bet, status)) in script.iter().enumerate() {
            let at = start() + Duration::hours(i as i64);
            ledger.record_pending(bet, at);
            if status.is_settled() {
                ledger.record_settlement(bet, *status, at);
            }
            expected += match status {
                BetStatus::Won => (bet.stake * Decimal::from_f64(bet.odds - 1.0).unwrap()).round_dp(2),
                BetStatus::Lost => -bet.stake,
                _ => Decimal::ZERO,
            };
            assert_eq!(ledger.balance(), ledger.initial() + ledger.total_delta());
        }

        // 20*1.5 - 15 + 0 + 0 + 33.33*0.91
        assert_eq!(expected, dec!(45.33));
        assert_eq!(ledger.balance() - ledger.initial(), expected);
    }

    #[test]
    fn test_pending_is_neutral() {
        let mut ledger = BankrollLedger::new(dec!(100), start());
        ledger.record_pending(&make_bet("b1", 2.0, dec!(10)), start());
        assert_eq!(ledger.balance(), dec!(100));
        assert_eq!(ledger.entries().len(), 1);
        assert_eq!(ledger.history().len(), 1);
    }

    #[test]
    fn test_max_drawdown() {
        let mut ledger = BankrollLedger::new(dec!(100), start());
        ledger.record_settlement(&make_bet("b1", 2.0, dec!(20)), BetStatus::Won, start());
        ledger.record_settlement(&make_bet("b2", 2.0, dec!(30)), BetStatus::Lost, start());
        ledger.record_settlement(&make_bet("b3", 2.0, dec!(30)), BetStatus::Lost, start());
        ledger.record_settlement(&make_bet("b4", 2.0, dec!(10)), BetStatus::Won, start());

        let (amount, pct) = ledger.max_drawdown();
        assert_eq!(amount, dec!(60));
        assert!((pct - 50.0).abs() < 1e-9);
        assert_eq!(ledger.history().len(), 5);
        assert_eq!(ledger.balance(), dec!(70));
    }
}
