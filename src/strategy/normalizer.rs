//! Market normalisation.
//!
//! Groups every bookmaker posting for one event and market type into
//! outcome groups whose quotes are directly comparable: the same outcome
//! label, the same line and the same number of sides.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::types::{EventOdds, MarketType, OutcomeGroup, OutcomeKey, PriceQuote};

pub struct MarketNormalizer {
    sharp_books: HashSet<String>,
}

impl MarketNormalizer {
    pub fn new(sharp_books: HashSet<String>) -> Self {
        Self { sharp_books }
    }

    /// Flatten every posting of `market` into quotes, in feed order.
    ///
    /// The most specific link available is kept: outcome, then market,
    /// then bookmaker, then event.
    pub fn collect_quotes(event: &EventOdds, market: MarketType) -> Vec<PriceQuote> {
        let mut quotes = Vec::new();

        for book in &event.bookmakers {
            for posting in book.markets.iter().filter(|m| m.market_type() == Some(market)) {
                let cardinality = posting.outcomes.len();
                // Only valid prices take part in de-vigging.
                let market_prices: Vec<f64> = posting
                    .outcomes
                    .iter()
                    .map(|o| o.price)
                    .filter(|p| is_valid_price(*p))
                    .collect();

                let mut side_index = 0;
                for outcome in &posting.outcomes {
                    if !is_valid_price(outcome.price) {
                        debug!(
                            event_id = %event.event.id,
                            bookmaker = %book.key,
                            outcome = %outcome.name,
                            price = outcome.price,
                            "Skipping invalid price"
                        );
                        continue;
                    }

                    let link = outcome
                        .link
                        .clone()
                        .or_else(|| posting.link.clone())
                        .or_else(|| book.link.clone())
                        .or_else(|| event.link.clone());

                    quotes.push(PriceQuote {
                        bookmaker: book.key.clone(),
                        bookmaker_title: book.title.clone(),
                        market,
                        outcome: OutcomeKey::new(outcome.name.clone(), outcome.point),
                        odds: outcome.price,
                        link,
                        cardinality,
                        market_prices: market_prices.clone(),
                        side_index,
                    });
                    side_index += 1;
                }
            }
        }

        quotes
    }

    /// Build the outcome groups for one event and market type.
    ///
    /// For each outcome the comparison set is the majority cardinality among
    /// sharp postings (ties go to the first seen). Outcomes with no sharp
    /// quote use the majority over all postings; they cannot produce a
    /// consensus anyway. Quotes of any other cardinality are dropped.
    pub fn normalize(&self, event: &EventOdds, market: MarketType) -> Vec<OutcomeGroup> {
        let quotes = Self::collect_quotes(event, market);

        let mut order: Vec<OutcomeKey> = Vec::new();
        let mut by_key: HashMap<OutcomeKey, Vec<PriceQuote>> = HashMap::new();
        for quote in quotes {
            let key = quote.outcome.clone();
            if !by_key.contains_key(&key) {
                order.push(key.clone());
            }
            by_key.entry(key).or_default().push(quote);
        }

        let mut groups = Vec::with_capacity(order.len());
        for key in order {
            let Some(quotes) = by_key.remove(&key) else {
                continue;
            };

            let sharp: Vec<usize> = quotes
                .iter()
                .filter(|q| self.sharp_books.contains(&q.bookmaker))
                .map(|q| q.cardinality)
                .collect();
            let pool: Vec<usize> = if sharp.is_empty() {
                quotes.iter().map(|q| q.cardinality).collect()
            } else {
                sharp
            };
            let Some(cardinality) = majority(&pool) else {
                continue;
            };

            let total = quotes.len();
            let kept: Vec<PriceQuote> = quotes
                .into_iter()
                .filter(|q| q.cardinality == cardinality)
                .collect();

            if kept.len() < total {
                debug!(
                    event_id = %event.event.id,
                    market = %market,
                    outcome = %key,
                    cardinality,
                    dropped = total - kept.len(),
                    "Dropped quotes with mismatched cardinality"
                );
            }

            groups.push(OutcomeGroup {
                market,
                key,
                cardinality,
                quotes: kept,
            });
        }

        groups
    }
}

fn is_valid_price(price: f64) -> bool {
    price.is_finite() && price > 1.0
}

/// Most frequent value; ties resolve to the value seen first.
fn majority(values: &[usize]) -> Option<usize> {
    let mut counts: Vec<(usize, usize)> = Vec::new();
    for v in values {
        match counts.iter_mut().find(|(value, _)| value == v) {
            Some((_, n)) => *n += 1,
            None => counts.push((*v, 1)),
        }
    }
    let mut best: Option<(usize, usize)> = None;
    for (value, n) in counts {
        if best.map_or(true, |(_, best_n)| n > best_n) {
            best = Some((value, n));
        }
    }
    best.map(|(value, _)| value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BookmakerOdds, Event, MarketOdds, OutcomeOdds};
    use chrono::{TimeZone, Utc};

    fn outcome(name: &str, price: f64, point: Option<f64>) -> OutcomeOdds {
        OutcomeOdds {
            name: name.into(),
            price,
            point,
            link: None,
        }
    }

    fn book(key: &str, market: &str, outcomes: Vec<OutcomeOdds>) -> BookmakerOdds {
        BookmakerOdds {
            key: key.into(),
            title: key.to_uppercase(),
            link: None,
            markets: vec![MarketOdds {
                key: market.into(),
                link: None,
                outcomes,
            }],
        }
    }

    fn make_event(bookmakers: Vec<BookmakerOdds>) -> EventOdds {
        EventOdds {
            event: Event {
                id: "E1".into(),
                sport_key: "soccer_epl".into(),
                home_team: "Arsenal".into(),
                away_team: "Chelsea".into(),
                commence_time: Utc.with_ymd_and_hms(2025, 1, 4, 15, 0, 0).unwrap(),
                completed: false,
            },
            link: Some("https://event".into()),
            bookmakers,
        }
    }

    fn normalizer() -> MarketNormalizer {
        MarketNormalizer::new(["pinnacle".to_string(), "betfair".to_string()].into())
    }

    #[test]
    fn test_majority_ties_first_seen() {
        assert_eq!(majority(&[3, 2]), Some(3));
        assert_eq!(majority(&[2, 3, 3]), Some(3));
        assert_eq!(majority(&[]), None);
    }

    #[test]
    fn test_groups_by_label_and_line() {
        let event = make_event(vec![
            book("pinnacle", "totals", vec![
                outcome("Over", 1.9, Some(2.5)),
                outcome("Under", 1.95, Some(2.5)),
            ]),
            book("bet365", "totals", vec![
                outcome("Over", 2.1, Some(3.0)),
                outcome("Under", 1.75, Some(3.0)),
            ]),
        ]);
        let groups = normalizer().normalize(&event, MarketType::Totals);
        assert_eq!(groups.len(), 4);
        let over_25 = groups
            .iter()
            .find(|g| g.key == OutcomeKey::new("Over", Some(2.5)))
            .unwrap();
        assert_eq!(over_25.quotes.len(), 1);
        assert_eq!(over_25.quotes[0].bookmaker, "pinnacle");
    }

    #[test]
    fn test_cardinality_follows_sharp_majority() {
        // Sharp books post 3-way, the candidate only 2-way.
        let event = make_event(vec![
            book("pinnacle", "h2h", vec![
                outcome("Arsenal", 2.2, None),
                outcome("Chelsea", 3.4, None),
                outcome("Draw", 3.5, None),
            ]),
            book("betfair", "h2h", vec![
                outcome("Arsenal", 2.25, None),
                outcome("Chelsea", 3.3, None),
                outcome("Draw", 3.6, None),
            ]),
            book("bet365", "h2h", vec![outcome("Arsenal", 1.6, None), outcome("Chelsea", 2.5, None)]),
            book("williamhill", "h2h", vec![outcome("Arsenal", 1.62, None), outcome("Chelsea", 2.4, None)]),
            book("paddypower", "h2h", vec![outcome("Arsenal", 1.61, None), outcome("Chelsea", 2.45, None)]),
        ]);
        let groups = normalizer().normalize(&event, MarketType::H2h);
        let arsenal = groups.iter().find(|g| g.key.name == "Arsenal").unwrap();
        assert_eq!(arsenal.cardinality, 3);
        assert!(arsenal.quotes.iter().all(|q| q.cardinality == 3));
        assert_eq!(arsenal.quotes.len(), 2);
    }

    #[test]
    fn test_links_most_specific_first() {
        let mut event = make_event(vec![book("bet365", "h2h", vec![
            OutcomeOdds {
                name: "Arsenal".into(),
                price: 2.0,
                point: None,
                link: Some("https://slip".into()),
            },
            outcome("Chelsea", 2.0, None),
        ])]);
        event.bookmakers[0].link = Some("https://book".into());
        let quotes = MarketNormalizer::collect_quotes(&event, MarketType::H2h);
        assert_eq!(quotes[0].link.as_deref(), Some("https://slip"));
        assert_eq!(quotes[1].link.as_deref(), Some("https://book"));
    }

    #[test]
    fn test_full_posting_kept_on_each_quote() {
        let event = make_event(vec![book("pinnacle", "h2h", vec![
            outcome("Arsenal", 2.2, None),
            outcome("Chelsea", 3.4, None),
            outcome("Draw", 3.5, None),
        ])]);
        let quotes = MarketNormalizer::collect_quotes(&event, MarketType::H2h);
        assert_eq!(quotes[2].market_prices, vec![2.2, 3.4, 3.5]);
        assert_eq!(quotes[2].side_index, 2);
    }

    #[test]
    fn test_other_markets_ignored() {
        let event = make_event(vec![book("pinnacle", "spreads", vec![
            outcome("Arsenal", 1.9, Some(-0.5)),
            outcome("Chelsea", 1.9, Some(0.5)),
        ])]);
        assert!(normalizer().normalize(&event, MarketType::H2h).is_empty());
    }

    #[test]
    fn test_invalid_price_skipped() {
        let event = make_event(vec![book("bet365", "h2h", vec![
            outcome("Arsenal", 1.0, None),
            outcome("Chelsea", 2.0, None),
        ])]);
        let quotes = MarketNormalizer::collect_quotes(&event, MarketType::H2h);
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].cardinality, 2);
    }

    #[test]
    fn test_invalid_price_left_out_of_posting() {
        let event = make_event(vec![book("pinnacle", "h2h", vec![
            outcome("Arsenal", 2.2, None),
            outcome("Draw", 0.0, None),
            outcome("Chelsea", 2.2, None),
        ])]);
        let quotes = MarketNormalizer::collect_quotes(&event, MarketType::H2h);
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[1].outcome.name, "Chelsea");
        assert_eq!(quotes[1].market_prices, vec![2.2, 2.2]);
        assert_eq!(quotes[1].side_index, 1);
        assert_eq!(quotes[1].cardinality, 3);
    }
}
