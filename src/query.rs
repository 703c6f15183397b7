//! openFDA search expression builder
//!
//! openFDA takes a Lucene-flavoured `search` parameter that is placed in the
//! URL as-is:
//! - `field:value` clauses joined by `+` are ANDed
//! - `(a+OR+b)` groups alternatives
//! - `field.exact:VALUE` matches the whole, untokenized value
//! - `field:"two+words"` is a phrase
//! - `field:[20200101+TO+20241231]` is an inclusive range
//!
//! Builders never fail. A filter value that cannot be expressed is left out
//! of the expression, and an empty filter set yields an empty string so the
//! caller can drop the parameter entirely.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const REG_COUNTRY: &str = "registration.iso_country_code";
pub const REG_STATE_EXACT: &str = "registration.state_code.exact";
pub const REG_PRODUCT_CODE_EXACT: &str = "products.product_code.exact";
pub const CLASS_DEVICE_NAME: &str = "device_name";
pub const CLEARANCE_APPLICANT: &str = "applicant";
pub const CLEARANCE_PRODUCT_CODE_EXACT: &str = "product_code.exact";
pub const CLEARANCE_DECISION_DATE: &str = "decision_date";
pub const EVENT_DATE_RECEIVED: &str = "date_received";

/// Region codes only mean something inside this country.
const STATE_COUNTRY: &str = "US";

/// Inclusive calendar date window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    /// `field:[YYYYMMDD+TO+YYYYMMDD]`, or `None` for an inverted range
    pub fn clause(&self, field: &str) -> Option<String> {
        if !self.is_valid() {
            return None;
        }
        Some(format!(
            "{}:[{}+TO+{}]",
            field,
            compact_date(self.start),
            compact_date(self.end)
        ))
    }
}

/// 8-digit `YYYYMMDD`
pub fn compact_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Filters for the establishment registration listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationFilter {
    pub country: Option<String>,
    pub state: Option<String>,
    #[serde(default)]
    pub product_codes: Vec<String>,
}

impl RegistrationFilter {
    pub fn build(&self) -> String {
        let country = self.country.as_deref().and_then(normalize_country);

        let mut parts = Vec::new();
        if let Some(ref iso2) = country {
            parts.push(format!("{}:{}", REG_COUNTRY, iso2));
        }
        if country.as_deref() == Some(STATE_COUNTRY) {
            if let Some(state) = self.state.as_deref().and_then(normalize_state) {
                parts.push(format!("{}:{}", REG_STATE_EXACT, state));
            }
        }
        if let Some(group) = exact_any(REG_PRODUCT_CODE_EXACT, &self.product_codes) {
            parts.push(group);
        }
        join_and(parts)
    }
}

/// Filters for 510(k) clearance records
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClearanceFilter {
    pub applicant: Option<String>,
    #[serde(default)]
    pub product_codes: Vec<String>,
    pub decided: Option<DateRange>,
}

impl ClearanceFilter {
    pub fn build(&self) -> String {
        let mut parts = Vec::new();
        if let Some(clause) = self.applicant.as_deref().and_then(|a| phrase(CLEARANCE_APPLICANT, a)) {
            parts.push(clause);
        }
        if let Some(group) = exact_any(CLEARANCE_PRODUCT_CODE_EXACT, &self.product_codes) {
            parts.push(group);
        }
        if let Some(clause) = self.decided.and_then(|r| r.clause(CLEARANCE_DECISION_DATE)) {
            parts.push(clause);
        }
        join_and(parts)
    }
}

/// Which adverse-event field carries the manufacturer name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManufacturerField {
    /// `device.manufacturer_d_name`, the name printed on the device entry
    Device,
    /// `manufacturer_name`, the reporting manufacturer
    Report,
}

impl ManufacturerField {
    /// Strategy order used when looking a firm up in adverse-event reports
    pub const ALL: [ManufacturerField; 2] = [ManufacturerField::Device, ManufacturerField::Report];

    pub fn field(&self) -> &'static str {
        match self {
            ManufacturerField::Device => "device.manufacturer_d_name",
            ManufacturerField::Report => "manufacturer_name",
        }
    }
}

/// Filters for adverse-event reports
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventFilter {
    pub manufacturer: String,
    pub field: ManufacturerField,
    pub received: Option<DateRange>,
}

impl EventFilter {
    pub fn build(&self) -> String {
        let mut parts = Vec::new();
        if let Some(clause) = phrase(self.field.field(), &self.manufacturer) {
            parts.push(clause);
        }
        if let Some(clause) = self.received.and_then(|r| r.clause(EVENT_DATE_RECEIVED)) {
            parts.push(clause);
        }
        join_and(parts)
    }
}

/// Full-text match on the classification device name: `device_name:pulse+oximeter`
pub fn device_name_search(text: &str) -> String {
    free_text(text)
        .map(|t| format!("{}:{}", CLASS_DEVICE_NAME, t))
        .unwrap_or_default()
}

/// Split comma/whitespace separated user input into upper-cased product codes
pub fn parse_product_codes(input: &str) -> Vec<String> {
    let mut codes: Vec<String> = input
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter_map(normalize_product_code)
        .collect();
    dedup_in_order(&mut codes);
    codes
}

fn join_and(parts: Vec<String>) -> String {
    parts.join("+")
}

/// One `.exact` clause per usable code; several codes become an OR group.
fn exact_any(field: &str, codes: &[String]) -> Option<String> {
    let mut codes: Vec<String> = codes.iter().filter_map(|c| normalize_product_code(c)).collect();
    dedup_in_order(&mut codes);

    let clauses: Vec<String> = codes.iter().map(|c| format!("{}:{}", field, c)).collect();
    match clauses.len() {
        0 => None,
        1 => clauses.into_iter().next(),
        _ => Some(format!("({})", clauses.join("+OR+"))),
    }
}

fn phrase(field: &str, value: &str) -> Option<String> {
    let cleaned: String = value.chars().filter(|c| *c != '"').collect();
    free_text(&cleaned).map(|t| format!("{}:\"{}\"", field, t))
}

/// Words URL-encoded and joined with `+`, the form-encoding openFDA expects
fn free_text(text: &str) -> Option<String> {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| urlencoding::encode(w).into_owned())
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join("+"))
    }
}

fn normalize_country(code: &str) -> Option<String> {
    let code = code.trim();
    if code.chars().count() == 2 && code.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(code.to_ascii_uppercase())
    } else {
        None
    }
}

fn normalize_state(code: &str) -> Option<String> {
    let code = code.trim();
    if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(code.to_ascii_uppercase())
    } else {
        None
    }
}

fn normalize_product_code(code: &str) -> Option<String> {
    let code = code.trim();
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some(code.to_ascii_uppercase())
}

fn dedup_in_order(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}
