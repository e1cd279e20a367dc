//! Settlement engine.
//!
//! Turns a final score into a terminal [`BetStatus`]. Anything that cannot
//! be decided with certainty is an error and the bet stays pending; a bet
//! is never guessed as a loss.

use std::collections::HashSet;

use crate::types::{Bet, BetStatus, GameResult, MarketType};

/// Words that carry no identity in a team name.
const IGNORED_WORDS: &[&str] = &[
    "fc", "sc", "cf", "ac", "bk", "the", "afc", "vs", "@", "and", "jk", "de", "el", "la",
    "united", "city",
];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettlementError {
    #[error("Game not completed: {home} vs {away}")]
    Incomplete { home: String, away: String },

    #[error("Result teams {result_home} / {result_away} do not match {home} / {away}")]
    UnmatchedTeams {
        home: String,
        away: String,
        result_home: String,
        result_away: String,
    },

    #[error("Outcome '{0}' matches neither team")]
    UnknownOutcome(String),

    #[error("Outcome '{0}' matches both teams")]
    AmbiguousOutcome(String),

    #[error("Outcome '{0}' has no line")]
    MissingLine(String),
}

// ---------------------------------------------------------------------------
// Team matching
// ---------------------------------------------------------------------------

fn significant_words(name: &str) -> Vec<String> {
    name.split_whitespace()
        .filter(|w| w.len() > 2 && !IGNORED_WORDS.contains(w))
        .map(String::from)
        .collect()
}

/// Whether `found` names the same team or player as `target`.
///
/// Every significant word of `target` must match a distinct word of
/// `found`, exactly or (for words of five letters or more) as a substring
/// of similar length. "Manchester United" does not match "Manchester City".
pub fn teams_match(target: &str, found: &str) -> bool {
    let target = target.trim().to_lowercase();
    let found = found.trim().to_lowercase();
    if target == found {
        return true;
    }

    let target_words = significant_words(&target);
    let found_words = significant_words(&found);
    if target_words.is_empty() || found_words.is_empty() {
        return false;
    }

    let mut used: HashSet<&str> = HashSet::new();
    let mut matched = 0;
    for tw in &target_words {
        if found_words.contains(tw) && !used.contains(tw.as_str()) {
            used.insert(tw.as_str());
            matched += 1;
            continue;
        }
        for fw in &found_words {
            if used.contains(fw.as_str()) {
                continue;
            }
            if tw.len() >= 5
                && fw.len() >= 5
                && (tw.contains(fw.as_str()) || fw.contains(tw.as_str()))
                && tw.len().abs_diff(fw.len()) <= 3
            {
                used.insert(fw.as_str());
                matched += 1;
                break;
            }
        }
    }

    matched == target_words.len()
}

/// Whether a result describes the fixture between `team_a` and `team_b`.
/// Tennis needs only one side to match since player names vary by source.
pub fn fixture_matches(sport: &str, team_a: &str, team_b: &str, result: &GameResult) -> bool {
    let found = [result.home_team.as_str(), result.away_team.as_str()];
    let matched = [team_a, team_b]
        .iter()
        .filter(|target| found.iter().any(|f| teams_match(target, f)))
        .count();
    let required = if sport.contains("tennis") { 1 } else { 2 };
    matched >= required
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// Scores oriented to the bet's own home/away teams.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Scores {
    home: f64,
    away: f64,
}

/// Exact names outrank word matches, so "Team A" / "Team B" still orient.
fn name_score(a: &str, b: &str) -> u8 {
    if a.trim().eq_ignore_ascii_case(b.trim()) {
        2
    } else {
        u8::from(teams_match(a, b))
    }
}

fn orient(bet: &Bet, result: &GameResult) -> Result<Scores, SettlementError> {
    let m = name_score;
    let straight = m(&bet.home_team, &result.home_team) + m(&bet.away_team, &result.away_team);
    let swapped = m(&bet.home_team, &result.away_team) + m(&bet.away_team, &result.home_team);

    let (home, away) = match straight.cmp(&swapped) {
        std::cmp::Ordering::Greater => (result.home_score, result.away_score),
        std::cmp::Ordering::Less => (result.away_score, result.home_score),
        std::cmp::Ordering::Equal => {
            return Err(SettlementError::UnmatchedTeams {
                home: bet.home_team.clone(),
                away: bet.away_team.clone(),
                result_home: result.home_team.clone(),
                result_away: result.away_team.clone(),
            })
        }
    };
    Ok(Scores {
        home: home as f64,
        away: away as f64,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Side {
    Home,
    Away,
}

fn outcome_side(bet: &Bet) -> Result<Side, SettlementError> {
    let name = bet.outcome.name.trim();
    if name.eq_ignore_ascii_case(bet.home_team.trim()) {
        return Ok(Side::Home);
    }
    if name.eq_ignore_ascii_case(bet.away_team.trim()) {
        return Ok(Side::Away);
    }
    match (teams_match(name, &bet.home_team), teams_match(name, &bet.away_team)) {
        (true, false) => Ok(Side::Home),
        (false, true) => Ok(Side::Away),
        (true, true) => Err(SettlementError::AmbiguousOutcome(name.to_string())),
        (false, false) => Err(SettlementError::UnknownOutcome(name.to_string())),
    }
}

fn compare(ours: f64, theirs: f64) -> BetStatus {
    if ours > theirs {
        BetStatus::Won
    } else if ours < theirs {
        BetStatus::Lost
    } else {
        BetStatus::Void
    }
}

/// Decide the terminal status of `bet` from a final score.
///
/// Head-to-head with level scores: a draw label wins. A team bet in a
/// two-way market is void (stake returned), since no side beat the other
/// and the market offered no draw. A team bet in a three-way market
/// (`h2h_3_way`, or three or more posted sides) loses to the draw.
/// Totals and spreads landing exactly on the line are void.
pub fn settle(bet: &Bet, result: &GameResult) -> Result<BetStatus, SettlementError> {
    if !result.completed {
        return Err(SettlementError::Incomplete {
            home: result.home_team.clone(),
            away: result.away_team.clone(),
        });
    }
    let scores = orient(bet, result)?;

    match bet.market {
        MarketType::H2h | MarketType::H2hThreeWay => {
            if bet.outcome.is_draw() {
                return Ok(if scores.home == scores.away {
                    BetStatus::Won
                } else {
                    BetStatus::Lost
                });
            }
            let (ours, theirs) = match outcome_side(bet)? {
                Side::Home => (scores.home, scores.away),
                Side::Away => (scores.away, scores.home),
            };
            let three_way = bet.market == MarketType::H2hThreeWay || bet.cardinality >= 3;
            match compare(ours, theirs) {
                BetStatus::Void if three_way => Ok(BetStatus::Lost),
                status => Ok(status),
            }
        }
        MarketType::Totals => {
            let line = bet
                .outcome
                .line()
                .ok_or_else(|| SettlementError::MissingLine(bet.outcome.name.clone()))?;
            let total = scores.home + scores.away;
            let name = bet.outcome.name.trim().to_lowercase();
            if name.starts_with("over") {
                Ok(compare(total, line))
            } else if name.starts_with("under") {
                Ok(compare(line, total))
            } else {
                Err(SettlementError::UnknownOutcome(bet.outcome.name.clone()))
            }
        }
        MarketType::Spreads => {
            let line = bet
                .outcome
                .line()
                .ok_or_else(|| SettlementError::MissingLine(bet.outcome.name.clone()))?;
            let (ours, theirs) = match outcome_side(bet)? {
                Side::Home => (scores.home, scores.away),
                Side::Away => (scores.away, scores.home),
            };
            Ok(compare(ours + line, theirs))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
