//! Paged retrieval up to a record cap
//!
//! Pages are requested one after another with `skip` advanced by the number of
//! records just received. The loop ends on an empty page, a short page, a
//! failed page, or once the accumulated count reaches the cap. The cap is
//! checked between pages, so the last page can carry the total past it.
//! Whatever was accumulated before a failure is returned, never discarded.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{Endpoint, FetchError, PageSource};

/// A bounded search against one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FetchRequest {
    pub endpoint: Endpoint,
    pub search: String,
    pub page_size: usize,
    pub cap: usize,
}

impl FetchRequest {
    pub fn new(endpoint: Endpoint, search: impl Into<String>, page_size: usize, cap: usize) -> Self {
        Self {
            endpoint,
            search: search.into(),
            page_size,
            cap,
        }
    }
}

/// Why a fetch stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum StopReason {
    /// The endpoint ran out of matching records
    Exhausted,
    /// The record cap was reached
    CapReached,
    /// A page came back with a non-success status
    HttpStatus(u16),
    /// Connection failure or timeout
    Transport(String),
    /// The body was not the expected JSON envelope
    Malformed(String),
}

impl StopReason {
    /// The fetch was cut short by a failure rather than by the data or the cap
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StopReason::HttpStatus(_) | StopReason::Transport(_) | StopReason::Malformed(_)
        )
    }
}

impl From<FetchError> for StopReason {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NoMatches => StopReason::Exhausted,
            FetchError::Status(code) => StopReason::HttpStatus(code),
            FetchError::Transport(e) => StopReason::Transport(e.to_string()),
            FetchError::Malformed(msg) => StopReason::Malformed(msg),
            FetchError::InvalidUrl(msg) => StopReason::Malformed(msg),
        }
    }
}

/// Records accumulated by a fetch and the reason it ended
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub records: Vec<Value>,
    pub stop: StopReason,
    pub pages: usize,
}

impl FetchOutcome {
    pub fn is_failure(&self) -> bool {
        self.stop.is_failure()
    }
}

/// Page through `request` until the data, the cap, or a failure stops it
pub async fn fetch_all(source: &dyn PageSource, request: &FetchRequest) -> FetchOutcome {
    let page_size = request.page_size.max(1);
    let mut records: Vec<Value> = Vec::new();
    let mut skip = 0;
    let mut pages = 0;

    let stop = loop {
        if records.len() >= request.cap {
            break StopReason::CapReached;
        }

        match source.fetch_page(request.endpoint, &request.search, page_size, skip).await {
            Ok(page) => {
                pages += 1;
                let received = page.len();
                debug!(
                    "{} page {} (skip={}) returned {} records",
                    request.endpoint, pages, skip, received
                );
                if received == 0 {
                    break StopReason::Exhausted;
                }
                records.extend(page);
                if received < page_size {
                    break StopReason::Exhausted;
                }
                skip += received;
            }
            Err(FetchError::NoMatches) => {
                pages += 1;
                break StopReason::Exhausted;
            }
            Err(e) => {
                pages += 1;
                warn!(
                    "{} fetch stopped at skip={} with {} records: {}",
                    request.endpoint,
                    skip,
                    records.len(),
                    e
                );
                break StopReason::from(e);
            }
        }
    };

    info!(
        "{} search '{}' returned {} records in {} pages ({:?})",
        request.endpoint,
        request.search,
        records.len(),
        pages,
        stop
    );

    FetchOutcome { records, stop, pages }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn cap_is_checked_between_pages() {
        let source = EndlessSource::new();
        let request = FetchRequest::new(Endpoint::Registration, "q", 1000, 2500);

        let outcome = fetch_all(&source, &request).await;

        assert_eq!(*source.calls.lock().unwrap(), vec![0, 1000, 2000]);
        assert_eq!(outcome.records.len(), 3000);
        assert_eq!(outcome.stop, StopReason::CapReached);
        assert_eq!(outcome.pages, 3);
    }

    #[tokio::test]
    async fn exact_cap_stops_without_extra_call() {
        let source = EndlessSource::new();
        let request = FetchRequest::new(Endpoint::Registration, "q", 1000, 2000);

        let outcome = fetch_all(&source, &request).await;

        assert_eq!(*source.calls.lock().unwrap(), vec![0, 1000]);
        assert_eq!(outcome.records.len(), 2000);
    }

    #[tokio::test]
    async fn short_page_ends_the_fetch() {
        let source = ScriptedSource::new(vec![Ok(rows(1000)), Ok(rows(10)), Ok(rows(1000))]);
        let request = FetchRequest::new(Endpoint::Registration, "q", 1000, 5000);

        let outcome = fetch_all(&source, &request).await;

        assert_eq!(source.call_count(), 2);
        assert_eq!(outcome.records.len(), 1010);
        assert_eq!(outcome.stop, StopReason::Exhausted);
        assert!(!outcome.is_failure());
    }

    #[tokio::test]
    async fn empty_page_ends_the_fetch() {
        let source = ScriptedSource::new(vec![Ok(rows(5)), Ok(Vec::new())]);
        let request = FetchRequest::new(Endpoint::Event, "q", 5, 100);

        let outcome = fetch_all(&source, &request).await;

        assert_eq!(source.call_count(), 2);
        let skips: Vec<usize> = source.calls.lock().unwrap().iter().map(|c| c.3).collect();
        assert_eq!(skips, vec![0, 5]);
        assert_eq!(outcome.records.len(), 5);
        assert_eq!(outcome.stop, StopReason::Exhausted);
    }

    #[tokio::test]
    async fn failure_keeps_partial_results() {
        let source = ScriptedSource::new(vec![
            Ok(rows(3)),
            Ok(rows(3)),
            Err(FetchError::Status(500)),
        ]);
        let request = FetchRequest::new(Endpoint::Clearance, "q", 3, 100);

        let outcome = fetch_all(&source, &request).await;

        assert_eq!(outcome.records.len(), 6);
        assert_eq!(outcome.stop, StopReason::HttpStatus(500));
        assert!(outcome.is_failure());
    }

    #[tokio::test]
    async fn no_matches_is_a_clean_empty_result() {
        let source = ScriptedSource::new(vec![Err(FetchError::NoMatches)]);
        let request = FetchRequest::new(Endpoint::Registration, "q", 1000, 2000);

        let outcome = fetch_all(&source, &request).await;

        assert!(outcome.records.is_empty());
        assert_eq!(outcome.stop, StopReason::Exhausted);
        assert!(!outcome.is_failure());
    }

    #[tokio::test]
    async fn malformed_first_page_is_an_empty_failure() {
        let source = ScriptedSource::new(vec![Err(FetchError::Malformed("bad".to_string()))]);
        let request = FetchRequest::new(Endpoint::Registration, "q", 1000, 2000);

        let outcome = fetch_all(&source, &request).await;

        assert!(outcome.records.is_empty());
        assert_eq!(outcome.stop, StopReason::Malformed("bad".to_string()));
    }

    #[tokio::test]
    async fn zero_cap_makes_no_calls() {
        let source = EndlessSource::new();
        let request = FetchRequest::new(Endpoint::Registration, "q", 1000, 0);

        let outcome = fetch_all(&source, &request).await;

        assert!(source.calls.lock().unwrap().is_empty());
        assert_eq!(outcome.stop, StopReason::CapReached);
        assert_eq!(outcome.pages, 0);
    }
}
