//! Backtest simulator: chronological replay, settlement and the bankroll
//! ledger.

pub mod calibration;
pub mod ledger;
pub mod runner;
pub mod settlement;

pub use runner::{BacktestReport, Backtester};
