//! Device name to product code lookup via the classification dataset

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::openfda::{fetch_all, Endpoint, FetchRequest, PageSource, StopReason};
use crate::query;

/// How a lookup ended. `codes` is empty for everything but `Found`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LookupOutcome {
    Found,
    /// The classification search matched nothing
    NoMatch,
    /// Blank input, nothing was requested
    NoInput,
    /// The request failed; treated as "no codes"
    Failed { stop: StopReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductCodeLookup {
    pub codes: Vec<String>,
    pub outcome: LookupOutcome,
}

impl ProductCodeLookup {
    fn empty(outcome: LookupOutcome) -> Self {
        Self {
            codes: Vec::new(),
            outcome,
        }
    }
}

/// Distinct product codes whose classification device name matches `device_name`.
/// One shallow fetch of at most `limit` records; failures give an empty list.
pub async fn resolve(source: &dyn PageSource, device_name: &str, limit: usize) -> ProductCodeLookup {
    let search = query::device_name_search(device_name);
    if search.is_empty() {
        return ProductCodeLookup::empty(LookupOutcome::NoInput);
    }

    let request = FetchRequest::new(Endpoint::Classification, search, limit, limit);
    let outcome = fetch_all(source, &request).await;

    if outcome.is_failure() {
        warn!("Product code lookup for '{}' failed: {:?}", device_name, outcome.stop);
        return ProductCodeLookup::empty(LookupOutcome::Failed { stop: outcome.stop });
    }

    let codes = distinct_codes(&outcome.records);
    info!("Device name '{}' resolved to {} product codes", device_name, codes.len());

    if codes.is_empty() {
        ProductCodeLookup::empty(LookupOutcome::NoMatch)
    } else {
        ProductCodeLookup {
            codes,
            outcome: LookupOutcome::Found,
        }
    }
}

fn distinct_codes(records: &[Value]) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| r.get("product_code").and_then(Value::as_str))
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
