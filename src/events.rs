//! Adverse-event gathering across manufacturer-name strategies
//!
//! A firm's name can appear on the device entry of a report or as the
//! reporting manufacturer, and either may be the one that matches. Each
//! field is a separate search strategy, tried in `ManufacturerField::ALL`
//! order. Records are never deduplicated across strategies.

use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{debug, info};

use crate::openfda::{Endpoint, FetchOutcome, FetchRequest, StopReason};
use crate::query::{DateRange, EventFilter, ManufacturerField};
use crate::records::{normalize_events, EventRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyPolicy {
    /// Stop at the first strategy that returns anything. Cheaper, may miss
    /// reports only the later fields match.
    FirstNonEmpty,
    /// Run every strategy and concatenate. A report matched by both fields
    /// is counted twice.
    MergeAll,
}

/// Result of one strategy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyRun {
    pub field: ManufacturerField,
    pub search: String,
    pub records: usize,
    pub stop: StopReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventGathering {
    pub records: Vec<EventRecord>,
    pub runs: Vec<StrategyRun>,
}

impl EventGathering {
    /// Every strategy that ran failed, so an empty result means "unknown",
    /// not "no reports"
    pub fn all_failed(&self) -> bool {
        !self.runs.is_empty() && self.runs.iter().all(|r| r.stop.is_failure())
    }
}

/// Run the manufacturer strategies under `policy`. `fetch` performs one
/// bounded search, so the caller decides about caching.
pub async fn gather<F, Fut>(
    manufacturer: &str,
    received: Option<DateRange>,
    policy: StrategyPolicy,
    page_size: usize,
    cap: usize,
    mut fetch: F,
) -> EventGathering
where
    F: FnMut(FetchRequest) -> Fut,
    Fut: Future<Output = FetchOutcome>,
{
    let mut gathering = EventGathering {
        records: Vec::new(),
        runs: Vec::new(),
    };
    // without a name the date clause alone would match every report
    if !manufacturer.chars().any(|c| !c.is_whitespace() && c != '"') {
        debug!("No manufacturer given, skipping event search");
        return gathering;
    }

    for field in ManufacturerField::ALL {
        let filter = EventFilter {
            manufacturer: manufacturer.to_string(),
            field,
            received,
        };
        let search = filter.build();

        let outcome = fetch(FetchRequest::new(Endpoint::Event, search.clone(), page_size, cap)).await;
        let records = normalize_events(&outcome.records);

        gathering.runs.push(StrategyRun {
            field,
            search,
            records: records.len(),
            stop: outcome.stop,
        });
        let found = !records.is_empty();
        gathering.records.extend(records);

        if found && policy == StrategyPolicy::FirstNonEmpty {
            break;
        }
    }

    info!(
        "Gathered {} event reports for '{}' using {} strategies ({:?})",
        gathering.records.len(),
        manufacturer,
        gathering.runs.len(),
        policy
    );

    gathering
}
