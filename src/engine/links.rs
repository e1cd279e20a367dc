//! Bookmaker deep links.
//!
//! The feed often omits a link for a price. In that case we point at the
//! bookmaker's own search page for the fixture, or at a site-restricted web
//! search when the bookmaker has no search page we know about.

/// Search page template per bookmaker; `{query}` is replaced.
fn search_template(bookmaker: &str) -> Option<&'static str> {
    match bookmaker {
        "williamhill" => Some("https://sports.williamhill.com/betting/en-gb/football?q={query}"),
        "ladbrokes_uk" => Some("https://sports.ladbrokes.com/en-gb/betting/football?q={query}"),
        "coral" => Some("https://sports.coral.co.uk/en-gb/betting/football?q={query}"),
        "paddypower" => Some("https://www.paddypower.com/football?q={query}"),
        "skybet" => Some("https://m.skybet.com/football?search={query}"),
        "betvictor" => Some("https://www.betvictor.com/en-gb/sports/football?q={query}"),
        "unibet_uk" => Some("https://www.unibet.co.uk/betting/sports/filter/all/all/all?search={query}"),
        "betfred" => Some("https://www.betfred.com/sport/football?q={query}"),
        "sport888" => Some("https://www.888sport.com/football?q={query}"),
        _ => None,
    }
}

fn site_domain(bookmaker: &str) -> &str {
    match bookmaker {
        "williamhill" => "sports.williamhill.com",
        "ladbrokes_uk" => "sports.ladbrokes.com",
        "coral" => "sports.coral.co.uk",
        "betway" => "betway.com",
        "unibet_uk" => "unibet.co.uk",
        "sport888" => "888sport.com",
        other => other,
    }
}

/// Best-effort link to a fixture on a bookmaker's site.
pub fn bookmaker_link(bookmaker: &str, home_team: &str, away_team: &str) -> String {
    let query = format!("{away_team} {home_team}");
    let encoded = urlencoding::encode(&query);

    match search_template(bookmaker) {
        Some(template) => template.replace("{query}", &encoded),
        None => format!(
            "https://www.google.com/search?q={encoded}+site:{}",
            site_domain(bookmaker)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_bookmaker_search() {
        let link = bookmaker_link("paddypower", "Arsenal", "Chelsea");
        assert_eq!(link, "https://www.paddypower.com/football?q=Chelsea%20Arsenal");
    }

    #[test]
    fn test_unknown_bookmaker_falls_back_to_site_search() {
        let link = bookmaker_link("betway", "Man Utd", "Spurs");
        assert_eq!(link, "https://www.google.com/search?q=Spurs%20Man%20Utd+site:betway.com");

        let link = bookmaker_link("somebook", "A", "B");
        assert!(link.ends_with("+site:somebook"));
    }
}
