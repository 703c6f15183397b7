//! Country name/code resolution using the ISO 3166 registry shipped with `celes`

use celes::Country;
use std::str::FromStr;
use tracing::{debug, warn};

/// Resolve free text (a country name, alias, alpha-3 code or alpha-2 code) to an
/// ISO alpha-2 code.
///
/// Two-character input is trusted verbatim and only upper-cased, so invalid
/// pairs such as `"ZZ"` pass through. Anything the registry cannot place
/// yields `None`, which callers treat as "no country filter".
pub fn resolve(input: &str) -> Option<String> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    if s.chars().count() == 2 {
        return Some(s.to_uppercase());
    }

    match lookup(s) {
        Some(country) => {
            debug!("Resolved country '{}' to {}", s, country.alpha2);
            Some(country.alpha2.to_string())
        }
        None => {
            warn!("Could not resolve country '{}'", s);
            None
        }
    }
}

/// Registry lookup. Registry names are stored without separators in places
/// ("UnitedStates"), so a second pass drops whitespace and punctuation.
fn lookup(name: &str) -> Option<Country> {
    if let Ok(country) = Country::from_str(name) {
        return Some(country);
    }

    let compact: String = name.chars().filter(|c| c.is_alphanumeric()).collect();
    if compact.is_empty() || compact == name {
        return None;
    }
    Country::from_str(&compact).ok()
}
