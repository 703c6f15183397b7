//! FDA Manufacturer Finder
//!
//! Locates FDA-registered device establishments by country and product, then
//! drills into a firm's 510(k) clearances and adverse-event reports through
//! the openFDA device API:
//! - country and device-name resolution
//! - paged, capped searches with typed partial-result outcomes
//! - flat, deduplicated tables exportable as CSV
//! - zero-filled monthly and yearly event counts

mod config;
mod country;
mod events;
mod export;
mod finder;
mod openfda;
mod products;
mod query;
mod records;
mod timeseries;
mod web;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::finder::{ClearanceSearch, EstablishmentSearch, Finder, ProductSelector, SearchStatus};
use crate::openfda::{Endpoint, OpenFdaClient};
use crate::query::DateRange;

#[derive(Parser)]
#[command(name = "fda-finder", version, about = "Find FDA device establishments via openFDA")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the JSON/CSV API
    Serve,
    /// Search establishment registrations, printing CSV
    Establishments {
        /// Country name or ISO code
        #[arg(long, default_value = "United States")]
        country: String,
        /// Region code, only applied for US
        #[arg(long)]
        state: Option<String>,
        /// Comma-separated product codes
        #[arg(long, conflicts_with = "device_name")]
        product_codes: Option<String>,
        /// Free-text device name, resolved to product codes
        #[arg(long)]
        device_name: Option<String>,
        #[arg(long)]
        max_records: Option<usize>,
    },
    /// Resolve a device name to product codes
    ProductCodes {
        device_name: String,
    },
    /// Search 510(k) clearances, printing CSV
    Clearances {
        #[arg(long)]
        applicant: Option<String>,
        #[arg(long)]
        product_codes: Option<String>,
        /// Decision date lower bound, YYYY-MM-DD
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,
        /// Decision date upper bound, YYYY-MM-DD
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,
        /// Treat the applicant as a selected firm and merge by-product and by-name queries
        #[arg(long, requires = "applicant")]
        firm: bool,
        #[arg(long)]
        max_records: Option<usize>,
    },
    /// Adverse-event counts for a manufacturer, printing CSV
    Events {
        #[arg(long)]
        manufacturer: String,
        /// Trailing months for the monthly series
        #[arg(long)]
        months: Option<u32>,
        /// Yearly counts over this many years instead of the monthly series
        #[arg(long)]
        years: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before any other initialization)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = config::Config::load()?;

    // LOG_FORMAT=gcp for structured Cloud Logging, otherwise plain text on stderr
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "gcp" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    info!("Configuration loaded (api key {})", if config.api_key().is_some() { "present" } else { "absent" });

    let client = OpenFdaClient::new(&config.api).context("Failed to build HTTP client")?;
    let finder = Finder::new(Arc::new(client), config.fetch.clone());

    match cli.command {
        Command::Serve => web::start_server(&config, finder).await?,
        Command::Establishments {
            country,
            state,
            product_codes,
            device_name,
            max_records,
        } => {
            let products = match (device_name, product_codes) {
                (Some(name), _) => ProductSelector::DeviceName(name),
                (None, Some(codes)) => ProductSelector::Codes(codes),
                (None, None) => ProductSelector::Any,
            };
            let results = finder
                .search_establishments(&EstablishmentSearch {
                    country,
                    state,
                    products,
                    max_records,
                })
                .await;

            if let Some(ref url) = results.preview_url {
                info!("Query preview: {}", url);
            }
            match results.status {
                SearchStatus::NoProductCodes { ref lookup } => warn!("No product codes resolved ({:?})", lookup),
                SearchStatus::Fetched { ref stop } if stop.is_failure() => {
                    warn!("Search stopped early ({:?}); results are partial", stop)
                }
                SearchStatus::Fetched { .. } => {}
            }
            if results.rows.is_empty() {
                warn!("No results. Try a different country/state or product selection.");
            } else {
                info!("Found {} establishments", results.rows.len());
            }
            export::write_csv(&results.rows, std::io::stdout(), b',')?;
        }
        Command::ProductCodes { device_name } => {
            let lookup = finder.product_codes(&device_name).await;
            info!("Lookup outcome: {:?}", lookup.outcome);
            println!("{}", lookup.codes.join(", "));
        }
        Command::Clearances {
            applicant,
            product_codes,
            from,
            to,
            firm,
            max_records,
        } => {
            let product_codes = product_codes
                .as_deref()
                .map(query::parse_product_codes)
                .unwrap_or_default();
            let decided = from.zip(to).map(|(from, to)| DateRange::new(from, to));

            let results = if firm {
                let name = applicant.unwrap_or_default();
                finder.clearances_for_firm(&name, &product_codes, decided, max_records).await
            } else {
                finder
                    .search_clearances(&ClearanceSearch {
                        applicant,
                        product_codes,
                        decided,
                        max_records,
                    })
                    .await
            };

            for run in &results.runs {
                info!("{} -> {} records ({:?})", run.search, run.records, run.stop);
                if let Some(url) = finder.preview(Endpoint::Clearance, &run.search) {
                    info!("Query preview: {}", url);
                }
            }
            if results.any_failed() {
                warn!("At least one clearance query failed; results are partial");
            }
            export::write_csv(&results.rows, std::io::stdout(), b',')?;
        }
        Command::Events {
            manufacturer,
            months,
            years,
        } => {
            let today = Utc::now().date_naive();
            if years.is_some() {
                let yearly = finder.yearly_events(&manufacturer, years, today).await;
                for run in &yearly.runs {
                    info!("{} -> {} reports ({:?})", run.search, run.records, run.stop);
                }
                export::write_csv(&yearly.years, std::io::stdout(), b',')?;
            } else {
                let trend = finder.monthly_events(&manufacturer, months, today).await;
                for run in &trend.runs {
                    info!("{} -> {} reports ({:?})", run.search, run.records, run.stop);
                }
                if let Some(peak) = trend.buckets.iter().filter(|b| b.count > 0).max_by_key(|b| b.count) {
                    info!("Busiest month {} with {} reports", peak.label(), peak.count);
                }
                export::write_csv(&trend.buckets, std::io::stdout(), b',')?;
            }
        }
    }

    Ok(())
}
