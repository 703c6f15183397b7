//! JSON and CSV endpoints

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::AppState;
use crate::config::{MAX_EVENT_MONTHS, MAX_EVENT_YEARS};
use crate::export;
use crate::finder::{ClearanceSearch, EstablishmentSearch, ProductSelector};
use crate::query::{self, DateRange};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Json,
    Csv,
}

#[derive(Debug, Deserialize)]
pub struct EstablishmentParams {
    #[serde(default)]
    pub country: String,
    pub state: Option<String>,
    pub product_codes: Option<String>,
    pub device_name: Option<String>,
    pub max_records: Option<usize>,
    #[serde(default)]
    pub format: Format,
}

impl EstablishmentParams {
    fn into_search(self) -> EstablishmentSearch {
        let products = match (self.device_name, self.product_codes) {
            (Some(name), _) if !name.trim().is_empty() => ProductSelector::DeviceName(name),
            (_, Some(codes)) if !codes.trim().is_empty() => ProductSelector::Codes(codes),
            _ => ProductSelector::Any,
        };
        EstablishmentSearch {
            country: self.country,
            state: self.state.filter(|s| !s.trim().is_empty()),
            products,
            max_records: self.max_records,
        }
    }
}

/// Serve rows as CSV or a full JSON body
fn respond<T: Serialize, B: Serialize>(format: Format, rows: &[T], body: &B, filename: &str) -> Response {
    match format {
        Format::Json => Json(body).into_response(),
        Format::Csv => match export::to_csv(rows) {
            Ok(text) => (
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", filename),
                    ),
                ],
                text,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("CSV export failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "export failed").into_response()
            }
        },
    }
}

/// API: establishments by country / state / products
pub async fn api_establishments(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EstablishmentParams>,
) -> Response {
    let format = params.format;
    let results = state.finder.search_establishments(&params.into_search()).await;
    respond(format, &results.rows, &results, "fda_mfrs.csv")
}

#[derive(Debug, Deserialize)]
pub struct ProductCodeParams {
    #[serde(default)]
    pub device_name: String,
}

/// API: resolve a device name to product codes
pub async fn api_product_codes(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProductCodeParams>,
) -> Response {
    Json(state.finder.product_codes(&params.device_name).await).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ClearanceParams {
    pub applicant: Option<String>,
    pub product_codes: Option<String>,
    /// `YYYY-MM-DD`
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub max_records: Option<usize>,
    #[serde(default)]
    pub format: Format,
}

impl ClearanceParams {
    fn decided(&self) -> Option<DateRange> {
        match (self.from, self.to) {
            (Some(from), Some(to)) => Some(DateRange::new(from, to)),
            (Some(from), None) => Some(DateRange::new(from, Utc::now().date_naive())),
            (None, Some(to)) => NaiveDate::from_ymd_opt(1976, 1, 1).map(|start| DateRange::new(start, to)),
            (None, None) => None,
        }
    }

    fn codes(&self) -> Vec<String> {
        self.product_codes
            .as_deref()
            .map(query::parse_product_codes)
            .unwrap_or_default()
    }
}

/// API: 510(k) clearances by applicant / product codes / decision window
pub async fn api_clearances(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ClearanceParams>,
) -> Response {
    let search = ClearanceSearch {
        applicant: params.applicant.clone().filter(|a| !a.trim().is_empty()),
        product_codes: params.codes(),
        decided: params.decided(),
        max_records: params.max_records,
    };
    let results = state.finder.search_clearances(&search).await;
    respond(params.format, &results.rows, &results, "fda_510k.csv")
}

/// API: clearances for a selected firm, merging the by-product and by-name queries
pub async fn api_firm_clearances(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ClearanceParams>,
) -> Response {
    let firm = params.applicant.clone().unwrap_or_default();
    let results = state
        .finder
        .clearances_for_firm(&firm, &params.codes(), params.decided(), params.max_records)
        .await;
    respond(params.format, &results.rows, &results, "fda_510k.csv")
}

#[derive(Debug, Deserialize)]
pub struct EventParams {
    #[serde(default)]
    pub manufacturer: String,
    pub months: Option<u32>,
    pub years: Option<u32>,
    #[serde(default)]
    pub format: Format,
}

/// API: monthly adverse-event counts for a manufacturer
pub async fn api_monthly_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventParams>,
) -> Response {
    let months = params.months.filter(|m| (1..=MAX_EVENT_MONTHS).contains(m));
    let trend = state
        .finder
        .monthly_events(&params.manufacturer, months, Utc::now().date_naive())
        .await;
    respond(params.format, &trend.buckets, &trend, "maude_monthly.csv")
}

/// API: yearly adverse-event counts for a manufacturer
pub async fn api_yearly_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventParams>,
) -> Response {
    let years = params.years.filter(|y| (1..=MAX_EVENT_YEARS).contains(y));
    let yearly = state
        .finder
        .yearly_events(&params.manufacturer, years, Utc::now().date_naive())
        .await;
    respond(params.format, &yearly.years, &yearly, "maude_yearly.csv")
}

pub async fn healthz() -> &'static str {
    "ok"
}
