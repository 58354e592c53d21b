//! CLI entry point for the bikeshare trends tool.
//!
//! Provides subcommands for normalizing raw feed snapshots, computing
//! hour-of-day trend statistics with divergent nearby pairs, exporting one
//! station's fullness series, and rebuilding the nearby-pairs cache.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::Path;

use anyhow::{Context, Result, bail};
use bikeshare_trends::feed::RawSnapshot;
use bikeshare_trends::fullness;
use bikeshare_trends::output::{self, FullnessReport, HourReport, TrendCsvRow, TrendReport};
use bikeshare_trends::registry::{FieldOutcome, ReconcilePolicy, StationRegistry, UpdateOutcome};
use bikeshare_trends::settings::{
    AggregationMode, AnalysisConfig, DEFAULT_RADIUS_MILES, DEFAULT_TZ_OFFSET_HOURS, HourSelection,
    LocalClock, MetricKind, WeekdayClass,
};
use bikeshare_trends::snapshot::{self, StationId};
use bikeshare_trends::store;
use bikeshare_trends::trends::buckets::{self, BucketStats};
use bikeshare_trends::trends::hourly::{self, HourlySample};
use bikeshare_trends::trends::pairs::{self, NearbyPairs};
use clap::{Parser, Subcommand};
use tracing::Instrument;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "bikeshare_trends")]
#[command(about = "A tool to analyze bike-share station snapshot trends", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize raw feed snapshots and rebuild the station registry
    Process {
        /// Directory of raw `<epoch>.json` feed snapshots
        #[arg(short, long, default_value = "raw_output")]
        raw_dir: String,

        /// Directory to write processed snapshots to
        #[arg(short, long, default_value = "processed_output")]
        processed_dir: String,

        /// Station registry file, rewritten by each run
        #[arg(long, default_value = "overall_stations.json")]
        registry: String,
    },
    /// Compute per-station trend statistics and divergent nearby pairs
    Trends {
        /// Hour of day to report on (0-23); omit to compute all 24 buckets
        #[arg(value_parser = clap::value_parser!(u32).range(0..24))]
        hour: Option<u32>,

        /// Use weekend days instead of weekdays
        #[arg(short, long)]
        weekend: bool,

        /// Per-record value to aggregate
        #[arg(long, value_enum, default_value_t = MetricKind::Bikes)]
        metric: MetricKind,

        /// Bucket samples as hour-over-hour deltas or direct levels
        #[arg(long, value_enum, default_value_t = AggregationMode::Delta)]
        mode: AggregationMode,

        /// Directory of processed snapshots
        #[arg(short, long, default_value = "processed_output")]
        processed_dir: String,

        /// Station registry file providing coordinates
        #[arg(long, default_value = "overall_stations.json")]
        registry: String,

        /// Nearby-pairs cache file, recomputed when stale
        #[arg(long, default_value = "nearby_pairs.json")]
        pairs_cache: String,

        /// Nearby-pair search radius in miles
        #[arg(long, default_value_t = DEFAULT_RADIUS_MILES)]
        radius_miles: f64,

        /// Divergence threshold for pair means; defaults per mode
        #[arg(long)]
        min_diff: Option<f64>,

        /// UTC offset in hours for the feed's local time
        #[arg(long, default_value_t = DEFAULT_TZ_OFFSET_HOURS, value_parser = clap::value_parser!(i32).range(-23..=23))]
        tz_offset: i32,

        /// Maximum number of concurrent per-station aggregation tasks
        #[arg(short, long, default_value_t = 8)]
        concurrency: usize,

        /// Optional: CSV file to append per-station rows to
        #[arg(long)]
        csv: Option<String>,
    },
    /// Export the full snapshot series for one station
    Fullness {
        /// Station id to export
        station_id: String,

        /// Directory of processed snapshots
        #[arg(short, long, default_value = "processed_output")]
        processed_dir: String,

        /// Station registry file providing the station name
        #[arg(long, default_value = "overall_stations.json")]
        registry: String,

        /// Optional: CSV file to append series rows to
        #[arg(long)]
        csv: Option<String>,
    },
    /// Rebuild the nearby-pairs cache from the station registry
    Pairs {
        /// Station registry file providing coordinates
        #[arg(long, default_value = "overall_stations.json")]
        registry: String,

        /// Nearby-pairs cache file to rewrite
        #[arg(long, default_value = "nearby_pairs.json")]
        pairs_cache: String,

        /// Nearby-pair search radius in miles
        #[arg(long, default_value_t = DEFAULT_RADIUS_MILES)]
        radius_miles: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/bikeshare_trends.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("bikeshare_trends.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            raw_dir,
            processed_dir,
            registry,
        } => {
            run_process(&raw_dir, &processed_dir, &registry)?;
        }
        Commands::Trends {
            hour,
            weekend,
            metric,
            mode,
            processed_dir,
            registry,
            pairs_cache,
            radius_miles,
            min_diff,
            tz_offset,
            concurrency,
            csv,
        } => {
            let clock = LocalClock::from_offset_hours(tz_offset)
                .context("timezone offset is out of range")?;
            let config = AnalysisConfig {
                metric,
                mode,
                class: WeekdayClass::from_weekend_flag(weekend),
                hours: hour.map_or(HourSelection::All, HourSelection::Single),
                clock,
                radius_miles,
                min_diff: min_diff.unwrap_or_else(|| mode.default_min_diff()),
            };
            run_trends(
                &processed_dir,
                &registry,
                &pairs_cache,
                config,
                concurrency,
                csv.as_deref(),
            )
            .await?;
        }
        Commands::Fullness {
            station_id,
            processed_dir,
            registry,
            csv,
        } => {
            run_fullness(&station_id, &processed_dir, &registry, csv.as_deref())?;
        }
        Commands::Pairs {
            registry,
            pairs_cache,
            radius_miles,
        } => {
            run_pairs(&registry, &pairs_cache, radius_miles)?;
        }
    }

    Ok(())
}

/// Normalizes every raw snapshot in timestamp order, feeding the station
/// registry and writing one processed snapshot per timestamp.
#[tracing::instrument(skip_all, fields(raw_dir, processed_dir))]
fn run_process(raw_dir: &str, processed_dir: &str, registry_path: &str) -> Result<()> {
    let files = store::list_snapshot_files(raw_dir)?;
    if files.is_empty() {
        bail!("no snapshot files found in {raw_dir}");
    }

    std::fs::create_dir_all(processed_dir)?;

    // The registry is rebuilt from the full raw history on every run, so
    // reconciliation always replays in timestamp order.
    let mut registry = StationRegistry::new(ReconcilePolicy::default());
    let mut written = 0usize;
    let mut sentinels = 0usize;
    let mut record_errors = 0usize;
    let mut identity_mismatches = 0usize;

    for (timestamp, path) in files {
        let raw = store::load_raw_snapshot(&path)?;
        let features = match raw {
            RawSnapshot::Sentinel { error } => {
                warn!(timestamp, error, "skipping upstream error snapshot");
                sentinels += 1;
                continue;
            }
            RawSnapshot::Stations { features } => features,
        };

        let normalized = snapshot::normalize_snapshot(&features);
        for err in &normalized.errors {
            error!(timestamp, error = %err, "station record rejected");
        }
        record_errors += normalized.errors.len();

        for station in &normalized.stations {
            let outcome = registry.update(&station.id, &station.name, station.coords, timestamp);
            if let UpdateOutcome::Reconciled { coords, name } = outcome {
                if coords == FieldOutcome::RejectedMismatch || name == FieldOutcome::RejectedMismatch
                {
                    identity_mismatches += 1;
                }
            }
        }

        store::write_processed_snapshot(processed_dir, timestamp, &normalized.to_processed())?;
        written += 1;
        debug!(
            timestamp,
            stations = normalized.stations.len(),
            "snapshot processed"
        );
    }

    registry.save(registry_path)?;
    info!(
        snapshots = written,
        sentinels,
        record_errors,
        identity_mismatches,
        stations = registry.len(),
        registry = registry_path,
        "processing complete"
    );
    Ok(())
}

/// Computes per-station bucket statistics across worker tasks, then reports
/// them together with diverging nearby pairs.
#[tracing::instrument(skip_all, fields(metric = %config.metric, mode = %config.mode))]
async fn run_trends(
    processed_dir: &str,
    registry_path: &str,
    pairs_cache_path: &str,
    config: AnalysisConfig,
    concurrency: usize,
    csv_path: Option<&str>,
) -> Result<()> {
    let snapshots = store::load_processed_snapshots(processed_dir)?;
    info!(snapshots = snapshots.len(), "processed snapshots loaded");

    let selected = hourly::select_hourly(snapshots, &config.clock)?;
    let series_by_station = hourly::per_station_series(&selected);
    info!(
        selected = selected.len(),
        stations = series_by_station.len(),
        "hourly series built"
    );

    let stats_by_station = aggregate_all(series_by_station, config, concurrency).await?;
    if stats_by_station.is_empty() {
        bail!("no station had enough samples for the requested buckets");
    }

    let registry = StationRegistry::load(registry_path, ReconcilePolicy::default())?;
    let coords = registry.latest_coords();
    let pairs = NearbyPairs::load_or_compute(pairs_cache_path, &coords, config.radius_miles)?;
    info!(nearby_pairs = pairs.len(), "nearby pairs ready");

    let mut hour_reports = Vec::new();
    for hour in config.hours.hours() {
        let mut bucket_by_station: BTreeMap<StationId, BucketStats> = BTreeMap::new();
        let mut means: BTreeMap<StationId, f64> = BTreeMap::new();
        for (station_id, station_buckets) in &stats_by_station {
            if let Some(bucket) = station_buckets.get(&hour) {
                bucket_by_station.insert(station_id.clone(), *bucket);
                means.insert(station_id.clone(), bucket.mean);
            }
        }
        let diverging = pairs::diverging_pairs(&pairs, &means, config.min_diff);
        hour_reports.push(HourReport::build(hour, &bucket_by_station, diverging));
    }

    if let Some(path) = csv_path {
        let mut rows = 0usize;
        for report in &hour_reports {
            for row in &report.stations {
                output::append_record(
                    path,
                    &TrendCsvRow {
                        station_id: row.station_id.clone(),
                        hour: report.hour,
                        weekday_class: config.class.to_string(),
                        metric: config.metric.to_string(),
                        mode: config.mode.to_string(),
                        mean: row.mean,
                        stdev: row.stdev,
                        samples: row.samples,
                    },
                )?;
                rows += 1;
            }
        }
        info!(path, rows, "CSV export written");
    }

    let report = TrendReport {
        metric: config.metric.to_string(),
        mode: config.mode.to_string(),
        weekday_class: config.class.to_string(),
        radius_miles: config.radius_miles,
        min_diff: config.min_diff,
        hours: hour_reports,
    };
    output::emit_json(&report)?;

    Ok(())
}

/// Fans per-station aggregation out across worker tasks, each owning its
/// series, bounded by a semaphore. Stations without enough history are
/// omitted with a warning rather than failing the run.
async fn aggregate_all(
    series_by_station: BTreeMap<StationId, Vec<HourlySample>>,
    config: AnalysisConfig,
    concurrency: usize,
) -> Result<BTreeMap<StationId, BTreeMap<u32, BucketStats>>> {
    let semaphore = std::sync::Arc::new(tokio::sync::Semaphore::new(concurrency.max(1)));

    let mut tasks = vec![];
    for (station_id, series) in series_by_station {
        let sem = semaphore.clone();

        let station_span = tracing::info_span!("aggregate_station", station_id = %station_id);

        let task = tokio::spawn(
            async move {
                let _permit = sem.acquire().await.expect("semaphore is never closed");
                let result = buckets::aggregate_station(&series, &config);
                (station_id, result)
            }
            .instrument(station_span),
        );

        tasks.push(task);
    }

    let mut stats_by_station = BTreeMap::new();
    let mut omitted = 0usize;
    for task in tasks {
        let (station_id, result) = task.await?;
        match result {
            Ok(station_buckets) => {
                stats_by_station.insert(station_id, station_buckets);
            }
            Err(e) => {
                warn!(station_id = %station_id, error = %e, "station omitted from aggregation");
                omitted += 1;
            }
        }
    }

    info!(
        aggregated = stats_by_station.len(),
        omitted,
        "per-station aggregation complete"
    );
    Ok(stats_by_station)
}

/// Exports one station's full snapshot series for external plotting.
#[tracing::instrument(skip_all, fields(station_id))]
fn run_fullness(
    station_id: &str,
    processed_dir: &str,
    registry_path: &str,
    csv_path: Option<&str>,
) -> Result<()> {
    let snapshots = store::load_processed_snapshots(processed_dir)?;
    let series = fullness::station_series(&snapshots, station_id)?;

    let registry = StationRegistry::load(registry_path, ReconcilePolicy::default())?;
    let name = registry
        .get(station_id)
        .map(|entry| entry.latest_name().to_string())
        .unwrap_or_else(|| station_id.to_string());

    if let Some(path) = csv_path {
        for point in &series {
            output::append_record(path, point)?;
        }
        info!(path, rows = series.len(), "CSV export written");
    }

    let report = FullnessReport {
        station_id: station_id.to_string(),
        name,
        series,
    };
    output::emit_json(&report)?;
    Ok(())
}

/// Rebuilds the nearby-pairs cache from the registry's latest coordinates.
#[tracing::instrument(skip_all, fields(radius_miles))]
fn run_pairs(registry_path: &str, pairs_cache_path: &str, radius_miles: f64) -> Result<()> {
    let registry = StationRegistry::load(registry_path, ReconcilePolicy::default())?;
    let coords = registry.latest_coords();
    let pairs = NearbyPairs::compute(&coords, radius_miles);
    pairs.save(pairs_cache_path)?;
    info!(
        stations = coords.len(),
        nearby_pairs = pairs.len(),
        radius_miles,
        cache = pairs_cache_path,
        "nearby-pairs cache rebuilt"
    );
    Ok(())
}
