//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`. `validate` is run once at
//! startup and any failure is fatal.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs;

use crate::strategy::vig::{VigMethod, DEFAULT_POWER_EXPONENT};
use crate::strategy::{OrderBy, SortOrder};
use crate::types::{EdgeError, MarketType};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    pub backtest: BacktestConfig,
    pub data: DataConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Scan,
    Backtest,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub mode: RunMode,
    pub bankroll: f64,
    pub currency: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategyConfig {
    pub sharp_books: Vec<String>,
    pub betting_bookmakers: Vec<String>,
    pub markets: Vec<String>,
    pub sports: Vec<String>,
    pub min_ev_threshold: f64,
    #[serde(default)]
    pub min_true_probability: f64,
    /// 0 = off.
    #[serde(default)]
    pub max_odds: f64,
    /// Minimum full Kelly as a fraction of bankroll. 0 = off.
    #[serde(default)]
    pub min_kelly_percentage: f64,
    pub kelly_fraction: f64,
    /// Stake granularity. 0 = off.
    #[serde(default)]
    pub bet_rounding: f64,
    #[serde(default)]
    pub vig_removal_method: VigMethod,
    #[serde(default = "default_power_exponent")]
    pub power_exponent: f64,
    #[serde(default = "default_true")]
    pub use_vig_adjusted_ev: bool,
    #[serde(default = "default_true")]
    pub one_bet_per_outcome: bool,
    /// 0 disables the blacklist.
    #[serde(default)]
    pub max_bet_failures: u32,
    /// Live scans only. 0 = off.
    #[serde(default)]
    pub max_days_ahead: u32,
    #[serde(default)]
    pub order_by: OrderBy,
    #[serde(default)]
    pub sort_order: SortOrder,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScannerConfig {
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_concurrency(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BacktestConfig {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default = "default_step_hours")]
    pub step_hours: i64,
    #[serde(default = "default_settlement_buffer")]
    pub settlement_buffer_hours: i64,
    #[serde(default = "default_event_duration")]
    pub assumed_event_duration_hours: i64,
    #[serde(default = "default_final_settlement_days")]
    pub final_settlement_days: i64,
    #[serde(default = "default_concurrency")]
    pub result_concurrency: usize,
    pub report_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    pub archive_dir: String,
    pub results_file: String,
    pub bet_history_path: String,
    /// Env var holding the odds provider key; checked only when set.
    pub odds_api_key_env: Option<String>,
}

fn default_power_exponent() -> f64 {
    DEFAULT_POWER_EXPONENT
}
fn default_true() -> bool {
    true
}
fn default_concurrency() -> usize {
    10
}
fn default_cache_ttl() -> u64 {
    60
}
fn default_step_hours() -> i64 {
    12
}
fn default_settlement_buffer() -> i64 {
    3
}
fn default_event_duration() -> i64 {
    4
}
fn default_final_settlement_days() -> i64 {
    7
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Check every required value before any pipeline work begins.
    pub fn validate(&self) -> std::result::Result<(), EdgeError> {
        let fail = |msg: String| -> std::result::Result<(), EdgeError> { Err(EdgeError::Config(msg)) };

        if !(self.agent.bankroll.is_finite() && self.agent.bankroll > 0.0) {
            return fail(format!("agent.bankroll must be positive, got {}", self.agent.bankroll));
        }

        let s = &self.strategy;
        if s.sharp_books.is_empty() {
            return fail("strategy.sharp_books is empty".into());
        }
        if s.betting_bookmakers.is_empty() {
            return fail("strategy.betting_bookmakers is empty".into());
        }
        if s.sports.is_empty() {
            return fail("strategy.sports is empty".into());
        }
        self.strategy.market_types()?;
        if !(s.kelly_fraction > 0.0 && s.kelly_fraction <= 1.0) {
            return fail(format!("strategy.kelly_fraction must be in (0, 1], got {}", s.kelly_fraction));
        }
        for (name, value) in [
            ("min_true_probability", s.min_true_probability),
            ("max_odds", s.max_odds),
            ("min_kelly_percentage", s.min_kelly_percentage),
            ("bet_rounding", s.bet_rounding),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return fail(format!("strategy.{name} must be non-negative, got {value}"));
            }
        }
        if !(s.power_exponent.is_finite() && s.power_exponent > 0.0) {
            return fail(format!("strategy.power_exponent must be positive, got {}", s.power_exponent));
        }

        if self.scanner.max_concurrency == 0 {
            return fail("scanner.max_concurrency must be at least 1".into());
        }

        let b = &self.backtest;
        if self.agent.mode == RunMode::Backtest {
            if b.end < b.start {
                return fail(format!("backtest.end {} is before start {}", b.end, b.start));
            }
            if b.step_hours <= 0 {
                return fail("backtest.step_hours must be positive".into());
            }
            if b.settlement_buffer_hours < 0 || b.assumed_event_duration_hours < 0 || b.final_settlement_days < 0 {
                return fail("backtest durations must be non-negative".into());
            }
            if b.result_concurrency == 0 {
                return fail("backtest.result_concurrency must be at least 1".into());
            }
        }

        if let Some(env) = &self.data.odds_api_key_env {
            if Self::resolve_env(env).map(|v| v.is_empty()).unwrap_or(true) {
                return fail(format!("odds provider credential {env} is not set"));
            }
        }

        Ok(())
    }
}

impl StrategyConfig {
    /// Configured markets as typed values.
    pub fn market_types(&self) -> std::result::Result<Vec<MarketType>, EdgeError> {
        if self.markets.is_empty() {
            return Err(EdgeError::Config("strategy.markets is empty".into()));
        }
        self.markets
            .iter()
            .map(|m| {
                MarketType::from_key(m.trim())
                    .ok_or_else(|| EdgeError::Config(format!("unknown market '{m}'")))
            })
            .collect()
    }
}
