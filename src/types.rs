//! Shared types for the SHARPEDGE engine.
//!
//! These types form the data model used across all modules: the price
//! snapshot contract consumed from the odds feed, the normalised quote and
//! outcome-group model built from it, opportunities, bets and the domain
//! error enum.

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Market type
// ---------------------------------------------------------------------------

/// The market types the engine knows how to compare and settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MarketType {
    #[serde(rename = "h2h")]
    H2h,
    #[serde(rename = "h2h_3_way")]
    H2hThreeWay,
    #[serde(rename = "spreads")]
    Spreads,
    #[serde(rename = "totals")]
    Totals,
}

impl MarketType {
    /// Feed key for this market type.
    pub fn key(&self) -> &'static str {
        match self {
            MarketType::H2h => "h2h",
            MarketType::H2hThreeWay => "h2h_3_way",
            MarketType::Spreads => "spreads",
            MarketType::Totals => "totals",
        }
    }

    /// Parse a feed market key. Unknown keys return `None` and are ignored.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "h2h" => Some(MarketType::H2h),
            "h2h_3_way" => Some(MarketType::H2hThreeWay),
            "spreads" => Some(MarketType::Spreads),
            "totals" => Some(MarketType::Totals),
            _ => None,
        }
    }

    /// Whether the market is settled on the winner of the game.
    pub fn is_head_to_head(&self) -> bool {
        matches!(self, MarketType::H2h | MarketType::H2hThreeWay)
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// ---------------------------------------------------------------------------
// Price snapshot (consumed contract)
// ---------------------------------------------------------------------------

/// A sporting event as described by the odds feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub sport_key: String,
    pub home_team: String,
    pub away_team: String,
    /// Scheduled start (UTC).
    pub commence_time: DateTime<Utc>,
    #[serde(default)]
    pub completed: bool,
}

impl Event {
    pub fn has_started(&self, at: DateTime<Utc>) -> bool {
        self.commence_time <= at
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {} ({})",
            self.away_team,
            self.home_team,
            self.commence_time.format("%Y-%m-%d %H:%M UTC")
        )
    }
}

/// One event plus every bookmaker posting for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventOdds {
    #[serde(flatten)]
    pub event: Event,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub bookmakers: Vec<BookmakerOdds>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmakerOdds {
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub markets: Vec<MarketOdds>,
}

/// A single market instance posted by one bookmaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketOdds {
    pub key: String,
    #[serde(default)]
    pub link: Option<String>,
    pub outcomes: Vec<OutcomeOdds>,
}

impl MarketOdds {
    pub fn market_type(&self) -> Option<MarketType> {
        MarketType::from_key(&self.key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeOdds {
    pub name: String,
    /// Decimal odds.
    pub price: f64,
    #[serde(default)]
    pub point: Option<f64>,
    #[serde(default)]
    pub link: Option<String>,
}

/// Everything the feed returned for one sport at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsSnapshot {
    pub sport: String,
    pub timestamp: DateTime<Utc>,
    pub events: Vec<EventOdds>,
}

impl OddsSnapshot {
    pub fn empty(sport: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            sport: sport.to_string(),
            timestamp,
            events: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Normalised quotes
// ---------------------------------------------------------------------------

/// Outcome label plus the line as a typed value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutcomeKey {
    pub name: String,
    pub point: Option<OrderedFloat<f64>>,
}

impl OutcomeKey {
    pub fn new(name: impl Into<String>, point: Option<f64>) -> Self {
        Self {
            name: name.into(),
            point: point.map(OrderedFloat),
        }
    }

    pub fn line(&self) -> Option<f64> {
        self.point.map(|p| p.into_inner())
    }

    pub fn is_draw(&self) -> bool {
        matches!(self.name.trim().to_lowercase().as_str(), "draw" | "tie" | "x")
    }
}

impl fmt::Display for OutcomeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.point {
            Some(p) => write!(f, "{} ({:+.1})", self.name, p.into_inner()),
            None => f.write_str(&self.name),
        }
    }
}

/// One bookmaker's price for one outcome, with the posting it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuote {
    pub bookmaker: String,
    pub bookmaker_title: String,
    pub market: MarketType,
    pub outcome: OutcomeKey,
    pub odds: f64,
    pub link: Option<String>,
    /// Number of outcomes in the bookmaker's posting.
    pub cardinality: usize,
    /// Every price in the posting, in posting order.
    pub market_prices: Vec<f64>,
    /// Position of this quote within `market_prices`.
    pub side_index: usize,
}

impl PriceQuote {
    pub fn implied_probability(&self) -> f64 {
        1.0 / self.odds
    }
}

/// Quotes for one outcome that share a cardinality and are comparable.
#[derive(Debug, Clone)]
pub struct OutcomeGroup {
    pub market: MarketType,
    pub key: OutcomeKey,
    pub cardinality: usize,
    pub quotes: Vec<PriceQuote>,
}

// ---------------------------------------------------------------------------
// Opportunity
// ---------------------------------------------------------------------------

/// Identity of an outcome for dedup and blacklist purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpportunityKey {
    pub event_id: String,
    pub market: MarketType,
    pub outcome: OutcomeKey,
}

impl fmt::Display for OpportunityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.event_id, self.market, self.outcome)
    }
}

/// A sharp quote that contributed to a consensus probability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SharpReference {
    pub bookmaker: String,
    pub odds: f64,
    pub fair_probability: f64,
}

/// A priced, sized candidate bet.
#[derive(Debug, Clone, Serialize)]
pub struct Opportunity {
    pub event: Event,
    pub market: MarketType,
    pub outcome: OutcomeKey,
    pub bookmaker: String,
    pub bookmaker_title: String,
    pub odds: f64,
    pub cardinality: usize,
    pub consensus_probability: f64,
    /// Bookmaker implied probability (1/odds).
    pub implied_probability: f64,
    /// Fair odds implied by the consensus (1/p).
    pub sharp_odds: f64,
    pub ev: f64,
    /// Full Kelly fraction of bankroll.
    pub kelly_full: f64,
    /// Fraction of bankroll actually staked.
    pub kelly_applied: f64,
    pub stake: f64,
    pub expected_profit: f64,
    pub sharp_references: Vec<SharpReference>,
    pub link: String,
    pub generated_at: DateTime<Utc>,
}

impl Opportunity {
    pub fn key(&self) -> OpportunityKey {
        OpportunityKey {
            event_id: self.event.id.clone(),
            market: self.market,
            outcome: self.outcome.clone(),
        }
    }
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} | {} {} @ {:.2} ({}) | p={:.1}% EV={:+.2}% stake=${:.2}",
            self.bookmaker_title,
            self.event,
            self.market,
            self.outcome,
            self.odds,
            fractional_odds(self.odds),
            self.consensus_probability * 100.0,
            self.ev * 100.0,
            self.stake,
        )
    }
}

/// Render decimal odds as a simplified fraction, e.g. 2.5 -> "3/2".
pub fn fractional_odds(decimal_odds: f64) -> String {
    let profit = decimal_odds - 1.0;
    if !profit.is_finite() || profit <= 0.0 {
        return "0/1".to_string();
    }

    let mut best = (profit.round() as i64, 1_i64);
    let mut best_err = (profit - best.0 as f64).abs();
    for den in 2..=100_i64 {
        let num = (profit * den as f64).round() as i64;
        let err = (profit - num as f64 / den as f64).abs();
        if err + 1e-12 < best_err {
            best = (num, den);
            best_err = err;
        }
    }

    let divisor = gcd(best.0, best.1).max(1);
    format!("{}/{}", best.0 / divisor, best.1 / divisor)
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a.abs()
    } else {
        gcd(b, a % b)
    }
}

// ---------------------------------------------------------------------------
// Bets
// ---------------------------------------------------------------------------

/// Lifecycle of a recorded bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    Pending,
    Won,
    Lost,
    Void,
    /// The placement step could not execute the bet.
    NotPlaced,
}

impl BetStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, BetStatus::Won | BetStatus::Lost | BetStatus::Void)
    }

    /// Only pending bets move, and only to a settled state.
    pub fn can_transition_to(&self, next: BetStatus) -> bool {
        *self == BetStatus::Pending && next.is_settled()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BetStatus::Pending => "pending",
            BetStatus::Won => "won",
            BetStatus::Lost => "lost",
            BetStatus::Void => "void",
            BetStatus::NotPlaced => "not_placed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BetStatus::Pending),
            "won" => Some(BetStatus::Won),
            "lost" => Some(BetStatus::Lost),
            "void" => Some(BetStatus::Void),
            "not_placed" => Some(BetStatus::NotPlaced),
            _ => None,
        }
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted (or attempted) opportunity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bet {
    pub id: String,
    pub event_id: String,
    pub sport: String,
    pub home_team: String,
    pub away_team: String,
    pub commence_time: DateTime<Utc>,
    pub market: MarketType,
    pub outcome: OutcomeKey,
    pub bookmaker: String,
    pub odds: f64,
    pub cardinality: usize,
    pub consensus_probability: f64,
    pub ev: f64,
    pub stake: Decimal,
    pub expected_profit: Decimal,
    pub status: BetStatus,
    pub placed_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub profit_loss: Option<Decimal>,
}

impl Bet {
    /// Build a bet from an accepted opportunity. Money is kept to cents.
    pub fn from_opportunity(
        id: impl Into<String>,
        opp: &Opportunity,
        status: BetStatus,
        placed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            event_id: opp.event.id.clone(),
            sport: opp.event.sport_key.clone(),
            home_team: opp.event.home_team.clone(),
            away_team: opp.event.away_team.clone(),
            commence_time: opp.event.commence_time,
            market: opp.market,
            outcome: opp.outcome.clone(),
            bookmaker: opp.bookmaker.clone(),
            odds: opp.odds,
            cardinality: opp.cardinality,
            consensus_probability: opp.consensus_probability,
            ev: opp.ev,
            stake: to_money(opp.stake),
            expected_profit: to_money(opp.expected_profit),
            status,
            placed_at,
            settled_at: None,
            profit_loss: None,
        }
    }

    pub fn opportunity_key(&self) -> OpportunityKey {
        OpportunityKey {
            event_id: self.event_id.clone(),
            market: self.market,
            outcome: self.outcome.clone(),
        }
    }

    /// Live-flow uniqueness key: (event, market, outcome, bookmaker).
    pub fn natural_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.event_id, self.market, self.outcome, self.bookmaker
        )
    }

    /// Capital effect of settling this bet with `outcome`.
    pub fn settlement_profit(&self, outcome: BetStatus) -> Decimal {
        match outcome {
            BetStatus::Won => {
                let net_odds = Decimal::from_f64(self.odds - 1.0).unwrap_or(Decimal::ZERO);
                (self.stake * net_odds).round_dp(2)
            }
            BetStatus::Lost => -self.stake,
            BetStatus::Void | BetStatus::Pending | BetStatus::NotPlaced => Decimal::ZERO,
        }
    }
}

/// Convert an f64 amount to a Decimal rounded to cents.
pub fn to_money(amount: f64) -> Decimal {
    Decimal::from_f64(amount)
        .unwrap_or(Decimal::ZERO)
        .round_dp(2)
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Final score of a game as returned by the result lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameResult {
    pub home_team: String,
    pub away_team: String,
    pub home_score: i64,
    pub away_score: i64,
    pub completed: bool,
    /// When the game finished, if the source reports it.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Domain-specific error types.
#[derive(Debug, thiserror::Error)]
pub enum EdgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Bet already recorded: {0}")]
    DuplicateBet(String),

    #[error("Bet not found: {0}")]
    BetNotFound(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: BetStatus, to: BetStatus },

    #[error("Feed error ({sport}): {message}")]
    Feed { sport: String, message: String },

    #[error("Market {market} not supported for {sport}")]
    UnsupportedMarket { sport: String, market: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
