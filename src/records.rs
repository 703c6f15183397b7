//! Flat record types and normalization of openFDA result JSON
//!
//! openFDA records are deeply nested and inconsistent: fields go missing,
//! lists show up as scalars, numbers show up as strings. Every accessor here
//! defaults a missing or oddly typed field to an empty string instead of
//! failing the row.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};

/// One registered establishment, flattened for display and export
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EstablishmentRecord {
    #[serde(rename = "FEI")]
    pub fei_number: String,
    #[serde(rename = "Firm Name")]
    pub firm_name: String,
    #[serde(rename = "City")]
    pub city: String,
    #[serde(rename = "State/Prov")]
    pub region: String,
    #[serde(rename = "Country")]
    pub country: String,
    #[serde(rename = "Establishment Types")]
    pub establishment_types: String,
    #[serde(rename = "Product Codes")]
    pub product_codes: String,
    #[serde(rename = "Label")]
    pub label: String,
}

/// One 510(k) clearance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ClearanceRecord {
    #[serde(rename = "K Number")]
    pub k_number: String,
    #[serde(rename = "Applicant")]
    pub applicant: String,
    #[serde(rename = "Product Code")]
    pub product_code: String,
    #[serde(rename = "Decision Date")]
    pub decision_date: String,
    #[serde(rename = "Device Name")]
    pub device_name: String,
}

/// One adverse-event report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    #[serde(rename = "Report Number")]
    pub report_number: String,
    /// `YYYYMMDD`
    #[serde(rename = "Date Received")]
    pub date_received: String,
    #[serde(rename = "Event Type")]
    pub event_type: String,
    #[serde(rename = "Manufacturer")]
    pub manufacturer: String,
    #[serde(rename = "Brand Name")]
    pub brand_name: String,
    #[serde(rename = "Generic Name")]
    pub generic_name: String,
    #[serde(rename = "Product Codes")]
    pub product_codes: String,
}

/// Flatten registration listing results, collapsing rows that are identical
/// in every field. First occurrence order is kept.
pub fn normalize_establishments(results: &[Value]) -> Vec<EstablishmentRecord> {
    let rows = results.iter().map(|r| {
        let reg = r.get("registration").unwrap_or(&Value::Null);

        let firm_name = text(reg, "name");
        let city = text(reg, "city");
        let region = first_non_empty(&[
            text(reg, "state_code"),
            text(reg, "state_province"),
            text(reg, "foreign_state_province"),
        ]);
        let country = text(reg, "iso_country_code");

        let product_codes = join_sorted(
            r.get("products")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .map(|p| text(p, "product_code")),
        );
        let establishment_types = join_sorted(strings(r.get("establishment_type")));

        let fei_number = text(reg, "fei_number");
        let label = label(&firm_name, &fei_number, &[&city, &region, &country]);

        EstablishmentRecord {
            fei_number,
            firm_name,
            city,
            region,
            country,
            establishment_types,
            product_codes,
            label,
        }
    });

    dedup_rows(rows)
}

/// Flatten 510(k) results and drop repeated clearance identifiers
pub fn normalize_clearances(results: &[Value]) -> Vec<ClearanceRecord> {
    let rows = results
        .iter()
        .map(|r| ClearanceRecord {
            k_number: text(r, "k_number"),
            applicant: text(r, "applicant"),
            product_code: text(r, "product_code"),
            decision_date: text(r, "decision_date"),
            device_name: text(r, "device_name"),
        })
        .collect();
    dedup_clearances(rows)
}

/// Keep the first row per clearance identifier. Rows without one cannot be
/// matched against anything and are all kept.
pub fn dedup_clearances(rows: Vec<ClearanceRecord>) -> Vec<ClearanceRecord> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| row.k_number.is_empty() || seen.insert(row.k_number.clone()))
        .collect()
}

/// Flatten adverse-event results. Reports are not deduplicated.
pub fn normalize_events(results: &[Value]) -> Vec<EventRecord> {
    results
        .iter()
        .map(|r| {
            let devices: Vec<&Value> = r
                .get("device")
                .and_then(Value::as_array)
                .map(|d| d.iter().collect())
                .unwrap_or_default();
            let first = devices.first().copied().unwrap_or(&Value::Null);

            EventRecord {
                report_number: first_non_empty(&[text(r, "report_number"), text(r, "mdr_report_key")]),
                date_received: text(r, "date_received"),
                event_type: text(r, "event_type"),
                manufacturer: first_non_empty(&[text(first, "manufacturer_d_name"), text(r, "manufacturer_name")]),
                brand_name: text(first, "brand_name"),
                generic_name: text(first, "generic_name"),
                product_codes: join_sorted(devices.iter().map(|d| text(d, "device_report_product_code"))),
            }
        })
        .collect()
}

/// `FIRM (City, Region, CC)` with empty location parts left out
fn label(firm_name: &str, fei_number: &str, location: &[&str]) -> String {
    let name = if !firm_name.is_empty() {
        firm_name.to_string()
    } else if !fei_number.is_empty() {
        format!("FEI {}", fei_number)
    } else {
        "Unnamed establishment".to_string()
    };

    let place: Vec<&str> = location.iter().copied().filter(|p| !p.is_empty()).collect();
    if place.is_empty() {
        name
    } else {
        format!("{} ({})", name, place.join(", "))
    }
}

fn dedup_rows<T: Clone + Eq + std::hash::Hash>(rows: impl Iterator<Item = T>) -> Vec<T> {
    let mut seen = HashSet::new();
    rows.filter(|row| seen.insert(row.clone())).collect()
}

/// Scalar field as text. Numbers are rendered, anything else is empty.
fn text(obj: &Value, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// A field that may be a list of strings or a single string
fn strings(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .collect(),
        Some(Value::String(s)) => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

fn join_sorted(values: impl IntoIterator<Item = String>) -> String {
    let set: BTreeSet<String> = values.into_iter().filter(|v| !v.is_empty()).collect();
    set.into_iter().collect::<Vec<_>>().join(", ")
}

fn first_non_empty(candidates: &[String]) -> String {
    candidates
        .iter()
        .find(|c| !c.is_empty())
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn registration(fei: &str, name: &str, products: &[&str]) -> Value {
        json!({
            "registration": {
                "fei_number": fei,
                "name": name,
                "city": "Springfield",
                "state_code": "IL",
                "iso_country_code": "US"
            },
            "establishment_type": ["Manufacture Medical Device", "Contract Manufacturer"],
            "products": products.iter().map(|p| json!({"product_code": p})).collect::<Vec<_>>()
        })
    }

    #[test]
    fn flattens_nested_registration() {
        let rows = normalize_establishments(&[registration("3001", "ACME MEDICAL", &["FMF", "DQD", "FMF"])]);

        assert_eq!(
            rows,
            vec![EstablishmentRecord {
                fei_number: "3001".to_string(),
                firm_name: "ACME MEDICAL".to_string(),
                city: "Springfield".to_string(),
                region: "IL".to_string(),
                country: "US".to_string(),
                establishment_types: "Contract Manufacturer, Manufacture Medical Device".to_string(),
                product_codes: "DQD, FMF".to_string(),
                label: "ACME MEDICAL (Springfield, IL, US)".to_string(),
            }]
        );
    }

    #[test]
    fn identical_rows_collapse() {
        // product order differs but the joined, sorted output is identical
        let rows = normalize_establishments(&[
            registration("3001", "ACME MEDICAL", &["DQD", "FMF"]),
            registration("3001", "ACME MEDICAL", &["FMF", "DQD"]),
            registration("3002", "ACME MEDICAL", &["DQD", "FMF"]),
        ]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].fei_number, "3001");
        assert_eq!(rows[1].fei_number, "3002");
    }

    #[test]
    fn missing_pieces_default_to_empty() {
        let rows = normalize_establishments(&[
            json!({"registration": {"name": "LONE FIRM", "iso_country_code": "DE", "fei_number": 12345}}),
            json!({"establishment_type": "Specification Developer"}),
            json!({"registration": null, "products": "not a list"}),
        ]);

        assert_eq!(rows[0].label, "LONE FIRM (DE)");
        assert_eq!(rows[0].fei_number, "12345");
        assert_eq!(rows[0].city, "");
        assert_eq!(rows[1].establishment_types, "Specification Developer");
        assert_eq!(rows[1].label, "Unnamed establishment");
        assert_eq!(rows[2].product_codes, "");
    }

    #[test]
    fn region_falls_back_to_province() {
        let rows = normalize_establishments(&[json!({
            "registration": {"name": "NORD AG", "city": "Kiel", "state_province": "SH", "iso_country_code": "DE"}
        })]);
        assert_eq!(rows[0].region, "SH");
        assert_eq!(rows[0].label, "NORD AG (Kiel, SH, DE)");
    }

    #[test]
    fn clearances_keep_first_per_identifier() {
        let rows = normalize_clearances(&[
            json!({"k_number": "K201234", "applicant": "ACME", "product_code": "DQD", "decision_date": "2020-06-01", "device_name": "First"}),
            json!({"k_number": "K201234", "applicant": "ACME", "product_code": "DQD", "decision_date": "2020-06-01", "device_name": "Second"}),
            json!({"k_number": "K209999", "applicant": "ACME"}),
            json!({"applicant": "NO NUMBER"}),
            json!({"applicant": "NO NUMBER"}),
        ]);

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].device_name, "First");
        assert_eq!(rows[1].k_number, "K209999");
        assert_eq!(rows[1].decision_date, "");
    }

    #[test]
    fn events_read_first_device() {
        let rows = normalize_events(&[json!({
            "report_number": "123-2024-0001",
            "date_received": "20240315",
            "event_type": "Malfunction",
            "device": [
                {"manufacturer_d_name": "ACME CORP", "brand_name": "OxiOne", "generic_name": "Oximeter", "device_report_product_code": "DQA"},
                {"manufacturer_d_name": "OTHER", "device_report_product_code": "DPZ"}
            ]
        })]);

        assert_eq!(rows[0].manufacturer, "ACME CORP");
        assert_eq!(rows[0].brand_name, "OxiOne");
        assert_eq!(rows[0].product_codes, "DPZ, DQA");
        assert_eq!(rows[0].date_received, "20240315");
    }

    #[test]
    fn events_without_devices_still_normalize() {
        let rows = normalize_events(&[json!({"mdr_report_key": "998", "manufacturer_name": "ACME"})]);
        assert_eq!(rows[0].report_number, "998");
        assert_eq!(rows[0].manufacturer, "ACME");
        assert_eq!(rows[0].date_received, "");
    }
}
