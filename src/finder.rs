//! Request/response layer tying resolution, query building, fetching,
//! normalization and aggregation together
//!
//! `Finder` holds no per-user state. Every call takes plain parameters and
//! returns a fresh result; the only thing shared between calls is the
//! memoization of identical remote lookups.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{FetchConfig, MAX_EVENT_MONTHS, MAX_EVENT_YEARS};
use crate::country;
use crate::events::{self, StrategyPolicy, StrategyRun};
use crate::openfda::{fetch_all, CacheKey, Endpoint, FetchOutcome, FetchRequest, PageSource, QueryCache, StopReason};
use crate::products::{self, LookupOutcome, ProductCodeLookup};
use crate::query::{self, ClearanceFilter, DateRange, RegistrationFilter};
use crate::records::{dedup_clearances, normalize_clearances, normalize_establishments};
use crate::records::{ClearanceRecord, EstablishmentRecord, EventRecord};
use crate::timeseries::{self, MonthlyBucket, YearlyCount};

/// Records shown in a query preview URL
const PREVIEW_LIMIT: usize = 5;

/// How the product side of an establishment search is given
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum ProductSelector {
    Any,
    /// Product codes as typed, comma or space separated
    Codes(String),
    /// Free-text device name resolved through the classification dataset
    DeviceName(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstablishmentSearch {
    /// Country name or code as typed
    pub country: String,
    pub state: Option<String>,
    pub products: ProductSelector,
    pub max_records: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchStatus {
    Fetched { stop: StopReason },
    /// A device name was given but resolved to no product codes, so
    /// nothing was searched
    NoProductCodes { lookup: LookupOutcome },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstablishmentResults {
    pub country: Option<String>,
    pub product_codes: Vec<String>,
    pub search: String,
    pub preview_url: Option<String>,
    pub rows: Vec<EstablishmentRecord>,
    pub status: SearchStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearanceSearch {
    pub applicant: Option<String>,
    #[serde(default)]
    pub product_codes: Vec<String>,
    pub decided: Option<DateRange>,
    pub max_records: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClearanceRun {
    pub search: String,
    pub records: usize,
    pub stop: StopReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClearanceResults {
    pub rows: Vec<ClearanceRecord>,
    pub runs: Vec<ClearanceRun>,
}

impl ClearanceResults {
    pub fn any_failed(&self) -> bool {
        self.runs.iter().any(|r| r.stop.is_failure())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventTrend {
    pub manufacturer: String,
    pub policy: StrategyPolicy,
    pub window: Option<DateRange>,
    pub buckets: Vec<MonthlyBucket>,
    pub runs: Vec<StrategyRun>,
    pub records: Vec<EventRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearlyEvents {
    pub manufacturer: String,
    pub policy: StrategyPolicy,
    pub window: Option<DateRange>,
    pub years: Vec<YearlyCount>,
    pub runs: Vec<StrategyRun>,
}

pub struct Finder {
    source: Arc<dyn PageSource>,
    settings: FetchConfig,
    fetches: QueryCache<FetchOutcome>,
    lookups: QueryCache<ProductCodeLookup>,
}

impl Finder {
    pub fn new(source: Arc<dyn PageSource>, settings: FetchConfig) -> Self {
        Self {
            source,
            settings,
            fetches: QueryCache::new(),
            lookups: QueryCache::new(),
        }
    }

    /// Paged fetch, memoized by the full request. Failed fetches are not kept.
    pub async fn fetch(&self, request: FetchRequest) -> FetchOutcome {
        let key = CacheKey::new("fetch", &request);
        self.fetches
            .get_or_compute(
                key,
                || async { fetch_all(self.source.as_ref(), &request).await },
                |outcome| !outcome.is_failure(),
            )
            .await
    }

    /// Product codes for a device name, memoized by the text and lookup size
    pub async fn product_codes(&self, device_name: &str) -> ProductCodeLookup {
        let device_name = device_name.trim();
        let limit = self.settings.classification_limit;
        let key = CacheKey::new("product_codes", &(device_name, limit));
        self.lookups
            .get_or_compute(
                key,
                || products::resolve(self.source.as_ref(), device_name, limit),
                |lookup| !matches!(lookup.outcome, LookupOutcome::Failed { .. }),
            )
            .await
    }

    /// First-page URL for a search, for display. Never includes the API key.
    pub fn preview(&self, endpoint: Endpoint, search: &str) -> Option<String> {
        self.source.page_url(endpoint, search, PREVIEW_LIMIT, 0)
    }

    pub async fn search_establishments(&self, request: &EstablishmentSearch) -> EstablishmentResults {
        let country = country::resolve(&request.country);

        let product_codes = match &request.products {
            ProductSelector::Any => Vec::new(),
            ProductSelector::Codes(input) => query::parse_product_codes(input),
            ProductSelector::DeviceName(name) => {
                let lookup = self.product_codes(name).await;
                if lookup.codes.is_empty() {
                    info!("No product codes for device name '{}', skipping search", name);
                    return EstablishmentResults {
                        country,
                        product_codes: Vec::new(),
                        search: String::new(),
                        preview_url: None,
                        rows: Vec::new(),
                        status: SearchStatus::NoProductCodes { lookup: lookup.outcome },
                    };
                }
                lookup.codes
            }
        };

        let filter = RegistrationFilter {
            country: country.clone(),
            state: request.state.clone(),
            product_codes: product_codes.clone(),
        };
        let search = filter.build();
        let cap = request.max_records.unwrap_or(self.settings.max_records);

        let outcome = self
            .fetch(FetchRequest::new(Endpoint::Registration, search.clone(), self.settings.page_size, cap))
            .await;
        let rows = normalize_establishments(&outcome.records);
        info!("Found {} establishments from {} records", rows.len(), outcome.records.len());

        EstablishmentResults {
            country,
            product_codes,
            preview_url: self.preview(Endpoint::Registration, &search),
            search,
            rows,
            status: SearchStatus::Fetched { stop: outcome.stop },
        }
    }

    pub async fn search_clearances(&self, request: &ClearanceSearch) -> ClearanceResults {
        let filter = ClearanceFilter {
            applicant: request.applicant.clone(),
            product_codes: request.product_codes.clone(),
            decided: request.decided,
        };
        let cap = request.max_records.unwrap_or(self.settings.max_records);
        let (rows, run) = self.run_clearance_filter(&filter, cap).await;
        ClearanceResults { rows, runs: vec![run] }
    }

    /// Clearances for one firm: the firm's own product codes first, then the
    /// firm name alone. Overlap is merged keeping the first row per clearance.
    pub async fn clearances_for_firm(
        &self,
        firm_name: &str,
        product_codes: &[String],
        decided: Option<DateRange>,
        max_records: Option<usize>,
    ) -> ClearanceResults {
        let mut results = ClearanceResults {
            rows: Vec::new(),
            runs: Vec::new(),
        };
        if firm_name.trim().is_empty() {
            return results;
        }

        let cap = max_records.unwrap_or(self.settings.max_records);
        let mut filters = Vec::new();
        if !product_codes.is_empty() {
            filters.push(ClearanceFilter {
                applicant: Some(firm_name.to_string()),
                product_codes: product_codes.to_vec(),
                decided,
            });
        }
        filters.push(ClearanceFilter {
            applicant: Some(firm_name.to_string()),
            product_codes: Vec::new(),
            decided,
        });

        for filter in &filters {
            let (rows, run) = self.run_clearance_filter(filter, cap).await;
            results.rows.extend(rows);
            results.runs.push(run);
        }
        results.rows = dedup_clearances(results.rows);
        results
    }

    async fn run_clearance_filter(&self, filter: &ClearanceFilter, cap: usize) -> (Vec<ClearanceRecord>, ClearanceRun) {
        let search = filter.build();
        let outcome = self
            .fetch(FetchRequest::new(Endpoint::Clearance, search.clone(), self.settings.page_size, cap))
            .await;
        let rows = normalize_clearances(&outcome.records);
        let run = ClearanceRun {
            search,
            records: rows.len(),
            stop: outcome.stop,
        };
        (rows, run)
    }

    /// Monthly report counts over the trailing `months` months ending with the
    /// month of `today`, at most `MAX_EVENT_MONTHS`. Stops at the first
    /// manufacturer strategy that matches.
    pub async fn monthly_events(&self, manufacturer: &str, months: Option<u32>, today: NaiveDate) -> EventTrend {
        let months = months
            .filter(|m| *m > 0)
            .unwrap_or(self.settings.event_months)
            .min(MAX_EVENT_MONTHS);
        let window = timeseries::month_window(today, months);
        let policy = StrategyPolicy::FirstNonEmpty;

        let gathering = events::gather(
            manufacturer,
            window,
            policy,
            self.settings.page_size,
            self.settings.event_max_records,
            |request| self.fetch(request),
        )
        .await;

        if gathering.all_failed() {
            warn!("Every event query for '{}' failed; its zero counts mean unknown", manufacturer);
        }

        let buckets = timeseries::monthly_counts(
            gathering.records.iter().map(|r| r.date_received.as_str()),
            months,
            today,
        );

        EventTrend {
            manufacturer: manufacturer.to_string(),
            policy,
            window,
            buckets,
            runs: gathering.runs,
            records: gathering.records,
        }
    }

    /// Yearly report counts over the trailing `years` years, at most
    /// `MAX_EVENT_YEARS`. Every strategy is run and the results merged.
    pub async fn yearly_events(&self, manufacturer: &str, years: Option<u32>, today: NaiveDate) -> YearlyEvents {
        let years = years
            .filter(|y| *y > 0)
            .unwrap_or(self.settings.event_years)
            .min(MAX_EVENT_YEARS);
        let window = timeseries::year_window(today, years);
        let policy = StrategyPolicy::MergeAll;

        let gathering = events::gather(
            manufacturer,
            window,
            policy,
            self.settings.page_size,
            self.settings.event_max_records,
            |request| self.fetch(request),
        )
        .await;

        if gathering.all_failed() {
            warn!("Every event query for '{}' failed; its zero counts mean unknown", manufacturer);
        }

        YearlyEvents {
            manufacturer: manufacturer.to_string(),
            policy,
            window,
            years: timeseries::yearly_counts(
                gathering.records.iter().map(|r| r.date_received.as_str()),
                years,
                today,
            ),
            runs: gathering.runs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openfda::fetcher::testing::ScriptedSource;
    use crate::openfda::FetchError;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn finder(source: Arc<ScriptedSource>) -> Finder {
        Finder::new(source, FetchConfig::default())
    }

    fn registration(fei: &str, name: &str, code: &str) -> serde_json::Value {
        json!({
            "registration": {"fei_number": fei, "name": name, "city": "Austin", "state_code": "TX", "iso_country_code": "US"},
            "establishment_type": ["Manufacture Medical Device"],
            "products": [{"product_code": code}]
        })
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn establishment_search_by_codes() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(vec![
            registration("1", "ACME", "DQD"),
            registration("1", "ACME", "DQD"),
            registration("2", "BETA", "FMF"),
        ])]));
        let finder = finder(source.clone());

        let results = finder
            .search_establishments(&EstablishmentSearch {
                country: "us".to_string(),
                state: Some("tx".to_string()),
                products: ProductSelector::Codes("dqd, fmf".to_string()),
                max_records: Some(100),
            })
            .await;

        assert_eq!(results.country.as_deref(), Some("US"));
        assert_eq!(results.product_codes, vec!["DQD", "FMF"]);
        assert_eq!(
            results.search,
            "registration.iso_country_code:US+registration.state_code.exact:TX+(products.product_code.exact:DQD+OR+products.product_code.exact:FMF)"
        );
        assert_eq!(results.rows.len(), 2);
        assert_eq!(results.status, SearchStatus::Fetched { stop: StopReason::Exhausted });
        let calls = source.calls.lock().unwrap();
        assert_eq!(calls[0].0, Endpoint::Registration);
        assert_eq!(calls[0].2, 1000);
    }

    #[tokio::test]
    async fn unresolved_country_means_no_country_filter() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(vec![registration("1", "ACME", "DQD")])]));
        let finder = finder(source.clone());

        let results = finder
            .search_establishments(&EstablishmentSearch {
                country: "Atlantis".to_string(),
                state: None,
                products: ProductSelector::Any,
                max_records: None,
            })
            .await;

        assert_eq!(results.country, None);
        assert_eq!(results.search, "");
        assert_eq!(results.rows.len(), 1);
    }

    #[tokio::test]
    async fn device_name_resolves_then_searches() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(vec![json!({"product_code": "DQA"}), json!({"product_code": "DQA"})]),
            Ok(vec![registration("1", "OXI INC", "DQA")]),
        ]));
        let finder = finder(source.clone());

        let results = finder
            .search_establishments(&EstablishmentSearch {
                country: "US".to_string(),
                state: None,
                products: ProductSelector::DeviceName("pulse oximeter".to_string()),
                max_records: None,
            })
            .await;

        assert_eq!(
            source.searches(),
            vec![
                "device_name:pulse+oximeter".to_string(),
                "registration.iso_country_code:US+products.product_code.exact:DQA".to_string()
            ]
        );
        assert_eq!(results.rows[0].firm_name, "OXI INC");
    }

    #[tokio::test]
    async fn device_name_without_codes_is_no_results() {
        let source = Arc::new(ScriptedSource::new(vec![Err(FetchError::NoMatches)]));
        let finder = finder(source.clone());

        let results = finder
            .search_establishments(&EstablishmentSearch {
                country: "US".to_string(),
                state: None,
                products: ProductSelector::DeviceName("flux capacitor".to_string()),
                max_records: None,
            })
            .await;

        assert!(results.rows.is_empty());
        assert_eq!(
            results.status,
            SearchStatus::NoProductCodes { lookup: LookupOutcome::NoMatch }
        );
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn identical_searches_hit_the_cache() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(vec![registration("1", "ACME", "DQD")]),
            Ok(vec![registration("2", "CHANGED", "DQD")]),
        ]));
        let finder = finder(source.clone());
        let request = EstablishmentSearch {
            country: "DE".to_string(),
            state: None,
            products: ProductSelector::Any,
            max_records: Some(10),
        };

        let first = finder.search_establishments(&request).await;
        let second = finder.search_establishments(&request).await;

        assert_eq!(source.call_count(), 1);
        assert_eq!(first.rows, second.rows);
        assert_eq!(second.rows[0].firm_name, "ACME");
    }

    #[tokio::test]
    async fn different_cap_is_a_different_cache_entry() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(vec![registration("1", "ACME", "DQD")]),
            Ok(vec![registration("1", "ACME", "DQD")]),
        ]));
        let finder = finder(source.clone());
        let mut request = EstablishmentSearch {
            country: "DE".to_string(),
            state: None,
            products: ProductSelector::Any,
            max_records: Some(10),
        };

        finder.search_establishments(&request).await;
        request.max_records = Some(20);
        finder.search_establishments(&request).await;

        assert_eq!(source.call_count(), 2);
    }

    #[tokio::test]
    async fn failed_fetches_are_retried_next_time() {
        let source = Arc::new(ScriptedSource::new(vec![
            Err(FetchError::Status(502)),
            Ok(vec![registration("1", "ACME", "DQD")]),
        ]));
        let finder = finder(source.clone());
        let request = EstablishmentSearch {
            country: "DE".to_string(),
            state: None,
            products: ProductSelector::Any,
            max_records: None,
        };

        let first = finder.search_establishments(&request).await;
        assert!(first.rows.is_empty());
        assert_eq!(first.status, SearchStatus::Fetched { stop: StopReason::HttpStatus(502) });

        let second = finder.search_establishments(&request).await;
        assert_eq!(second.rows.len(), 1);
    }

    #[tokio::test]
    async fn firm_clearances_merge_overlapping_queries() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(vec![json!({"k_number": "K1", "applicant": "ACME", "product_code": "DQD", "device_name": "specific"})]),
            Ok(vec![
                json!({"k_number": "K1", "applicant": "ACME", "product_code": "DQD", "device_name": "broad"}),
                json!({"k_number": "K2", "applicant": "ACME", "product_code": "LZG"}),
            ]),
        ]));
        let finder = finder(source.clone());

        let results = finder
            .clearances_for_firm("ACME", &["DQD".to_string()], None, None)
            .await;

        assert_eq!(
            source.searches(),
            vec![
                "applicant:\"ACME\"+product_code.exact:DQD".to_string(),
                "applicant:\"ACME\"".to_string()
            ]
        );
        assert_eq!(results.rows.len(), 2);
        assert_eq!(results.rows[0].device_name, "specific");
        assert!(!results.any_failed());
    }

    #[tokio::test]
    async fn blank_firm_has_no_clearances() {
        let source = Arc::new(ScriptedSource::new(vec![]));
        let finder = finder(source.clone());

        let results = finder.clearances_for_firm(" ", &[], None, None).await;

        assert!(results.rows.is_empty());
        assert_eq!(source.call_count(), 0);
    }

    #[tokio::test]
    async fn clearance_search_with_date_range() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(vec![json!({"k_number": "K9"})])]));
        let finder = finder(source.clone());

        let results = finder
            .search_clearances(&ClearanceSearch {
                applicant: None,
                product_codes: vec!["lzg".to_string()],
                decided: Some(DateRange::new(day(2023, 1, 1), day(2023, 12, 31))),
                max_records: Some(50),
            })
            .await;

        assert_eq!(
            source.searches(),
            vec!["product_code.exact:LZG+decision_date:[20230101+TO+20231231]".to_string()]
        );
        assert_eq!(results.rows.len(), 1);
    }

    #[tokio::test]
    async fn monthly_trend_is_zero_filled() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(vec![
            json!({"date_received": "20260915"}),
            json!({"date_received": "20260901"}),
            json!({"date_received": "20250101"}),
        ])]));
        let finder = finder(source.clone());

        let trend = finder.monthly_events("ACME", Some(18), day(2026, 10, 18)).await;

        assert_eq!(trend.buckets.len(), 18);
        assert_eq!(trend.buckets[16].label(), "2026-09");
        assert_eq!(trend.buckets[16].count, 2);
        assert_eq!(trend.buckets.iter().map(|b| b.count).sum::<u64>(), 2);
        assert_eq!(trend.runs.len(), 1);
        assert_eq!(
            source.searches(),
            vec!["device.manufacturer_d_name:\"ACME\"+date_received:[20250501+TO+20261018]".to_string()]
        );
    }

    #[tokio::test]
    async fn yearly_counts_merge_strategies() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(vec![json!({"date_received": "20240101"})]),
            Ok(vec![json!({"date_received": "20240101"}), json!({"date_received": "20260202"})]),
        ]));
        let finder = finder(source.clone());

        let yearly = finder.yearly_events("ACME", Some(3), day(2026, 10, 18)).await;

        assert_eq!(source.call_count(), 2);
        assert_eq!(
            yearly.years,
            vec![
                YearlyCount { year: 2024, count: 2 },
                YearlyCount { year: 2025, count: 0 },
                YearlyCount { year: 2026, count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn oversized_windows_are_clamped() {
        let source = Arc::new(ScriptedSource::new(vec![]));
        let finder = finder(source.clone());
        let today = day(2026, 10, 18);

        let yearly = finder.yearly_events("ACME", Some(1 << 31), today).await;
        assert_eq!(yearly.years.len(), MAX_EVENT_YEARS as usize);
        assert_eq!(yearly.years[0].year, 1977);
        assert_eq!(yearly.years.last().map(|y| y.year), Some(2026));

        let trend = finder.monthly_events("ACME", Some(u32::MAX), today).await;
        assert_eq!(trend.buckets.len(), MAX_EVENT_MONTHS as usize);
        assert_eq!(trend.buckets[0].label(), "2006-11");
    }
}
