#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the plot enrichment pipeline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use plot_enrich_enrich::{
    EnrichmentStore, MemoryStore, OrchestratorConfig, PlotRow, Resolver, run,
};
use plot_enrich_models::GeoPoint;
use plot_enrich_region::{all_regions, services_for};
use plot_enrich_wfs::build_http_client;
use serde::Deserialize;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";

#[derive(Parser)]
#[command(name = "plot-enrich", about = "Cadastral and zoning enrichment tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enrich a file of plots and write the merged documents back out
    Enrich {
        /// JSON file of plots: `[{"id": 1, "lon": 2.17, "lat": 41.38}, ...]`
        plots: String,
        /// Output file for the enrichment documents (JSON, keyed by plot id)
        #[arg(long, default_value = "enriched.json")]
        out: String,
        /// Maximum number of plots to process (dry runs)
        #[arg(long)]
        limit: Option<u64>,
        /// Worker count (clamped to 1-5)
        #[arg(long)]
        concurrency: Option<usize>,
        /// Delay between items per worker, in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
        /// Re-resolve plots that already have every category
        #[arg(long)]
        force: bool,
        /// Reverse-geocoder base URL for points outside the static regions
        #[arg(long, default_value = DEFAULT_NOMINATIM_URL)]
        nominatim_url: String,
        /// Target language for zoning label translation (e.g., "en");
        /// requires a configured translation backend
        #[arg(long)]
        translate_to: Option<String>,
    },
    /// Resolve a single point and print the payloads as JSON
    Resolve {
        /// Longitude (WGS84)
        lon: f64,
        /// Latitude (WGS84)
        lat: f64,
        /// Reverse-geocoder base URL for points outside the static regions
        #[arg(long, default_value = DEFAULT_NOMINATIM_URL)]
        nominatim_url: String,
    },
    /// List the configured regions
    Regions,
    /// List the configured service endpoints for a region
    Services {
        /// Region label (e.g., "Catalunya")
        region: String,
    },
}

/// One input row of the `enrich` command's plots file.
#[derive(Deserialize)]
struct PlotInput {
    id: i64,
    lon: f64,
    lat: f64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Enrich {
            plots,
            out,
            limit,
            concurrency,
            delay_ms,
            force,
            nominatim_url,
            translate_to,
        } => {
            if let Some(lang) = translate_to {
                log::warn!(
                    "Translation to '{lang}' requested but no translation backend is \
                     configured; labels stay untranslated"
                );
            }
            let rows = load_plots(&plots)?;
            log::info!("Loaded {} plot(s) from {plots}", rows.len());

            let mut config = OrchestratorConfig::from_env();
            if let Some(limit) = limit {
                config.dry_run_limit = Some(limit);
            }
            if let Some(concurrency) = concurrency {
                config.concurrency = concurrency;
            }
            if let Some(delay_ms) = delay_ms {
                config.inter_item_delay = Duration::from_millis(delay_ms);
            }
            config.force_refresh |= force;

            let http = build_http_client(HTTP_TIMEOUT)?;
            let resolver = Resolver::new(http).with_reverse_geocoding(&nominatim_url);
            let store = Arc::new(MemoryStore::new(rows));

            let start = Instant::now();
            let outcome = run(store.clone(), Arc::new(resolver), &config).await?;
            log::info!(
                "Run {:?}: {} processed, {} skipped, {} failed in {:.1}s",
                outcome.state,
                outcome.processed,
                outcome.skipped,
                outcome.failed,
                start.elapsed().as_secs_f64()
            );

            write_documents(store.as_ref(), &out).await?;
            log::info!("Documents written to {out}");
        }
        Commands::Resolve {
            lon,
            lat,
            nominatim_url,
        } => {
            let point = GeoPoint::new(lon, lat)?;
            let http = build_http_client(HTTP_TIMEOUT)?;
            let resolver = Resolver::new(http).with_reverse_geocoding(&nominatim_url);

            use plot_enrich_enrich::PointResolver as _;
            let payloads = resolver.resolve(&point).await;

            let document: serde_json::Map<String, serde_json::Value> = payloads
                .into_iter()
                .map(|(category, payload)| (category.to_string(), payload))
                .collect();
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
        Commands::Regions => {
            println!("{:<16} COUNTRY", "REGION");
            println!("{}", "-".repeat(30));
            for region in all_regions() {
                let country = services_region_country(&region.region);
                println!("{:<16} {country}", region.region);
            }
        }
        Commands::Services { region } => {
            let endpoints = services_for(&region);
            if endpoints.is_empty() {
                return Err(format!("Unknown or unconfigured region: {region}").into());
            }
            println!("{:<10} {:<28} {:<18} URL", "CATEGORY", "NAME", "PROTOCOL");
            println!("{}", "-".repeat(90));
            for endpoint in &endpoints {
                println!(
                    "{:<10} {:<28} {:<18} {}",
                    endpoint.category.to_string(),
                    endpoint.name,
                    endpoint.protocol.label(),
                    endpoint.base_url
                );
            }
        }
    }

    Ok(())
}

fn load_plots(path: &str) -> Result<Vec<PlotRow>, Box<dyn std::error::Error>> {
    let body = std::fs::read_to_string(path)?;
    let inputs: Vec<PlotInput> = serde_json::from_str(&body)?;
    inputs
        .into_iter()
        .map(|input| {
            Ok(PlotRow {
                id: input.id,
                point: GeoPoint::new(input.lon, input.lat)?,
            })
        })
        .collect()
}

async fn write_documents(
    store: &MemoryStore,
    path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    // Walk ids back out of the store in pages; the store owns the result
    // of the run.
    let mut documents = serde_json::Map::new();
    let mut offset = 0;
    loop {
        let rows = store.fetch_batch(offset, 500).await?;
        if rows.is_empty() {
            break;
        }
        offset += rows.len() as u64;
        for row in rows {
            if let Some(document) = store.document(row.id) {
                documents.insert(row.id.to_string(), serde_json::to_value(document)?);
            }
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(&documents)?)?;
    Ok(())
}

/// Country tag for the regions listing, derived from the router table.
fn services_region_country(label: &str) -> String {
    plot_enrich_region::region_by_label(label)
        .and_then(|region| region.country)
        .unwrap_or_else(|| "?".to_string())
}

#[cfg(test)]
mod tests {
    use plot_enrich_region::classify;

    use super::*;

    #[test]
    fn every_service_region_is_routable() {
        for region in all_regions() {
            assert!(
                plot_enrich_region::region_by_label(&region.region).is_some(),
                "{} has services but no routing entry",
                region.region
            );
        }
    }

    #[test]
    fn router_and_registry_agree_on_barcelona() {
        let point = GeoPoint::new(2.1734, 41.3851).unwrap();
        let region = classify(&point);
        assert!(!services_for(&region.label).is_empty());
    }
}
