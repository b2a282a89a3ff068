//! Run command - register lands, drive the pipeline, and report.
//!
//! The `usage` subcommand shares this flow and only prints the usage table.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::ValueEnum;
use fieldlayer::coord::BoundingBox;
use fieldlayer::mapper::LandParcel;
use fieldlayer::service::FieldLayerService;
use tracing::{info, warn};

use super::report::{LandReport, RejectedLand, RunReport};
use crate::error::CliError;
use crate::runner::CliRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable tables
    Text,
    /// A single JSON document on stdout
    Json,
}

/// Arguments for the run and usage commands.
pub struct RunArgs {
    pub config: Option<PathBuf>,
    pub lands: PathBuf,
    pub timeout: u64,
    pub format: OutputFormat,
    pub verbose: bool,
    pub usage_only: bool,
}

/// Run the run command.
pub fn run(args: RunArgs) -> Result<(), CliError> {
    let runner = CliRunner::new(args.config.as_deref(), args.verbose)?;
    runner.log_startup(if args.usage_only { "usage" } else { "run" });

    let parcels = read_lands(&args.lands)?;
    info!(lands = parcels.len(), path = %args.lands.display(), "Lands loaded");

    let runtime = runner.create_runtime()?;
    let mut service = runner.create_service(&runtime)?;

    if service.config().grid.regions.is_empty() {
        let regions: Vec<BoundingBox> = parcels.iter().filter_map(|p| p.boundary.bbox()).collect();
        service.generate_grid(&regions)?;
    }

    let rejected = register_all(&service, &parcels);
    let text = args.format == OutputFormat::Text;
    if text {
        println!(
            "Registered {} of {} lands on {} grid tiles",
            parcels.len() - rejected.len(),
            parcels.len(),
            service.grid().len()
        );
    }

    service.start();
    let clusters = service.build_clusters();
    if text {
        println!("Enqueued {} clusters, waiting up to {}s...", clusters.enqueued.len(), args.timeout);
    }

    let started = Instant::now();
    let drained = runtime.block_on(service.wait_idle(Duration::from_secs(args.timeout)));
    let remaining = service.queue_stats().active();
    info!(
        drained,
        remaining,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Acquisition finished"
    );

    let report = runtime.block_on(collect_report(&service, &parcels, rejected, clusters.rejected.len()));
    let shutdown = runtime.block_on(service.shutdown());

    let report = report?;
    match args.format {
        OutputFormat::Json => println!("{}", report.to_json()),
        OutputFormat::Text if args.usage_only => report.print_usage(),
        OutputFormat::Text => report.print(),
    }
    if text {
        println!();
        println!("Log: {}", runner.log_path().display());
    }

    shutdown?;
    if !drained {
        return Err(CliError::Timeout {
            secs: args.timeout,
            remaining,
        });
    }
    Ok(())
}

/// Parses a JSON array of land parcels.
fn read_lands(path: &Path) -> Result<Vec<LandParcel>, CliError> {
    let content = std::fs::read_to_string(path).map_err(|e| CliError::LandsInput {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_lands(&content).map_err(|reason| CliError::LandsInput {
        path: path.to_path_buf(),
        reason,
    })
}

fn parse_lands(content: &str) -> Result<Vec<LandParcel>, String> {
    let parcels: Vec<LandParcel> = serde_json::from_str(content).map_err(|e| e.to_string())?;
    if parcels.is_empty() {
        return Err("no lands in file".to_string());
    }
    Ok(parcels)
}

/// Registers every parcel, collecting the ones the mapper refused.
fn register_all(service: &FieldLayerService, parcels: &[LandParcel]) -> Vec<RejectedLand> {
    let mut rejected = Vec::new();
    for parcel in parcels {
        if let Err(e) = service.register_land(parcel) {
            warn!(land = %parcel.land_id, error = %e, "Land rejected");
            rejected.push(RejectedLand {
                land_id: parcel.land_id.clone(),
                reason: e.to_string(),
            });
        }
    }
    rejected
}

async fn collect_report(
    service: &FieldLayerService,
    parcels: &[LandParcel],
    rejected: Vec<RejectedLand>,
    oversized_clusters: usize,
) -> Result<RunReport, CliError> {
    let lands = parcels
        .iter()
        .filter(|p| !rejected.iter().any(|r| r.land_id == p.land_id))
        .map(|p| LandReport::from_lookup(p, service.get(&p.land_id, None)))
        .collect();

    Ok(RunReport {
        date: service.today(),
        lands,
        rejected,
        oversized_clusters,
        usage: service.all_usage().await?,
        alerts: service.alerts(),
        queue: service.queue_stats(),
        cache: service.cache_stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lands() {
        let json = r#"[
            {"land_id": "L1", "tenant_id": "acme",
             "boundary": [[1.0, 44.0], [1.003, 44.0], [1.003, 44.003], [1.0, 44.003]]},
            {"land_id": "L2", "tenant_id": "acme", "priority": 80,
             "boundary": [[1.01, 44.0], [1.013, 44.0], [1.013, 44.003], [1.01, 44.003]]}
        ]"#;
        let parcels = parse_lands(json).unwrap();
        assert_eq!(parcels.len(), 2);
        assert_eq!(parcels[1].priority, Some(80));
    }

    #[test]
    fn test_parse_lands_rejects_empty_and_malformed() {
        assert_eq!(parse_lands("[]").unwrap_err(), "no lands in file");
        assert!(parse_lands("{not json").is_err());
    }

    #[test]
    fn test_read_lands_missing_file() {
        let err = read_lands(Path::new("/nonexistent/lands.json")).unwrap_err();
        assert!(matches!(err, CliError::LandsInput { .. }));
    }
}
