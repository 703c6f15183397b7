//! Zero-filled monthly and yearly counts over trailing windows

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::HashMap;

use crate::query::DateRange;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyBucket {
    pub year: i32,
    pub month: u32,
    pub count: u64,
}

impl MonthlyBucket {
    /// `YYYY-MM`
    pub fn label(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YearlyCount {
    pub year: i32,
    pub count: u64,
}

/// Parse an 8-digit `YYYYMMDD` date. Anything else is `None`.
pub fn parse_compact_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y%m%d").ok()
}

/// The `months` whole calendar months ending with the month of `today`,
/// oldest first
pub fn trailing_months(today: NaiveDate, months: u32) -> Vec<(i32, u32)> {
    let current = month_index(today.year(), today.month());
    (0..months as i64)
        .rev()
        .map(|back| from_month_index(current - back))
        .collect()
}

/// First day of the oldest month through `today`, for server-side filtering
pub fn month_window(today: NaiveDate, months: u32) -> Option<DateRange> {
    let (year, month) = *trailing_months(today, months).first()?;
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    Some(DateRange::new(start, today))
}

/// January 1st of the oldest year through `today`
pub fn year_window(today: NaiveDate, years: u32) -> Option<DateRange> {
    let first = first_year(today.year(), years)?;
    if first > today.year() {
        return None;
    }
    let start = NaiveDate::from_ymd_opt(first, 1, 1)?;
    Some(DateRange::new(start, today))
}

/// Count dates per month over the trailing window. Every month in the window
/// is present, in order, even with a zero count. Unparseable dates and dates
/// outside the window are dropped.
pub fn monthly_counts<'a>(
    dates: impl IntoIterator<Item = &'a str>,
    months: u32,
    today: NaiveDate,
) -> Vec<MonthlyBucket> {
    let window = trailing_months(today, months);
    let mut counts: HashMap<(i32, u32), u64> = window.iter().map(|m| (*m, 0)).collect();

    for date in dates.into_iter().filter_map(parse_compact_date) {
        if let Some(count) = counts.get_mut(&(date.year(), date.month())) {
            *count += 1;
        }
    }

    window
        .into_iter()
        .map(|(year, month)| MonthlyBucket {
            year,
            month,
            count: counts.get(&(year, month)).copied().unwrap_or(0),
        })
        .collect()
}

/// Count dates per calendar year over the `years` years ending with the year of `today`
pub fn yearly_counts<'a>(
    dates: impl IntoIterator<Item = &'a str>,
    years: u32,
    today: NaiveDate,
) -> Vec<YearlyCount> {
    let last = today.year();
    let Some(first) = first_year(last, years) else {
        return Vec::new();
    };
    let mut counts: HashMap<i32, u64> = HashMap::new();

    for date in dates.into_iter().filter_map(parse_compact_date) {
        if (first..=last).contains(&date.year()) {
            *counts.entry(date.year()).or_insert(0) += 1;
        }
    }

    (first..=last)
        .map(|year| YearlyCount {
            year,
            count: counts.get(&year).copied().unwrap_or(0),
        })
        .collect()
}

/// Oldest year of a `years`-long window ending at `last`, if representable
fn first_year(last: i32, years: u32) -> Option<i32> {
    let span = i32::try_from(years).ok()?;
    last.checked_sub(span)?.checked_add(1)
}

fn month_index(year: i32, month: u32) -> i64 {
    year as i64 * 12 + (month as i64 - 1)
}

fn from_month_index(index: i64) -> (i32, u32) {
    (index.div_euclid(12) as i32, index.rem_euclid(12) as u32 + 1)
}
