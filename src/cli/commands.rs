use crate::cli::args::{Cli, Commands};
use crate::config::{PipelineConfig, StoreBackend, StoreConfig};
use crate::error::{PipelineError, Result};
use crate::logging::init_logging;
use crate::processors::{
    MatchStrategy, NearestStationMatcher, Normalizer, Pipeline, ReadingAggregator,
};
use crate::readers::{FileSource, RawSource};
use crate::utils::constants::READING_UNIT;
use crate::utils::progress::ProgressReporter;
use crate::writers::{BlobStore, FsBlobStore, JoinedStore, SnapshotWriter, SqliteStore};
use tracing::info;

pub async fn run(cli: Cli) -> Result<()> {
    init_logging(cli.verbose, cli.log_file.as_deref())?;

    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    let quiet = cli.quiet;

    match cli.command {
        Commands::Run {
            observations,
            water_quality,
            database,
            postgres_url,
            blob_root,
            matcher,
            state_province,
            max_workers,
            time_budget_secs,
            batch_size,
        } => {
            apply_store_overrides(&mut config.store, database, postgres_url);
            if let Some(root) = blob_root {
                config.blob.root = Some(root);
            }
            if let Some(matcher) = matcher {
                config.matcher = matcher.parse::<MatchStrategy>()?;
            }
            if state_province.is_some() {
                config.state_province = state_province;
            }
            if let Some(workers) = max_workers {
                config.workers = workers;
            }
            if let Some(secs) = time_budget_secs {
                config.time_budget_secs = secs;
            }
            if let Some(size) = batch_size {
                config.loader.batch_size = size;
            }
            config.check()?;

            println!("Joining observations to water-quality stations...");
            println!("Observations: {}", observations.display());
            println!("Water quality: {}", water_quality.display());
            println!(
                "Workers: {}, Matcher: {}, Time budget: {}s",
                config.workers, config.matcher, config.time_budget_secs
            );

            let pipeline = Pipeline::from_config(&config)?;
            let mut store = open_store(&config.store)?;
            let blobs = config.blob.root.clone().map(FsBlobStore::new);
            let mut source = FileSource::new(observations, water_quality);

            let report = tokio::task::spawn_blocking(move || {
                let progress = ProgressReporter::new_spinner("Starting run...", quiet);
                pipeline.run(
                    &mut source,
                    store.as_mut(),
                    blobs.as_ref().map(|b| b as &dyn BlobStore),
                    Some(&progress),
                )
            })
            .await?;

            println!("\n{}", report.summary);

            if let Some(error) = report.error {
                return Err(error);
            }
            println!("Run complete!");
        }

        Commands::Validate {
            observations,
            water_quality,
            matcher,
            state_province,
            max_workers,
        } => {
            if let Some(matcher) = matcher {
                config.matcher = matcher.parse::<MatchStrategy>()?;
            }
            if state_province.is_some() {
                config.state_province = state_province;
            }
            if let Some(workers) = max_workers {
                config.workers = workers;
            }
            config.check()?;

            println!("Validating inputs...");
            let mut source = FileSource::new(observations, water_quality);

            let (normalized, aggregate_stats, match_stats) =
                tokio::task::spawn_blocking(move || -> Result<_> {
                    let progress = ProgressReporter::new_spinner("Reading inputs...", quiet);
                    let batch = source.fetch()?;

                    progress.stage("Normalizing");
                    let normalized = Normalizer::new()
                        .with_region_filter(config.state_province.clone())
                        .normalize(batch.observations, batch.station_readings)?;

                    progress.stage("Aggregating");
                    let (summaries, aggregate_stats) = ReadingAggregator::new()
                        .aggregate(normalized.stations.clone(), normalized.readings.clone());

                    progress.stage("Matching");
                    let outcome = NearestStationMatcher::new(config.matcher)
                        .match_nearest(normalized.observations.clone(), &summaries);
                    progress.finish_with_message("Validation complete");

                    Ok((normalized, aggregate_stats, outcome.stats()))
                })
                .await??;

            let stats = &normalized.stats;
            println!("\n=== Validation Report ===");
            println!(
                "Observations: {} seen, {} valid, {} rejected, {} filtered",
                stats.observations_seen,
                normalized.observations.len(),
                stats.observations_rejected,
                stats.observations_filtered
            );
            println!(
                "Readings: {} seen, {} valid, {} rejected",
                stats.readings_seen,
                normalized.readings.len(),
                stats.readings_rejected
            );
            for (reason, count) in &stats.rejections {
                println!("  {}: {}", reason, count);
            }
            println!(
                "Stations: {} seen, {} with valid readings, {} without",
                aggregate_stats.stations_seen,
                aggregate_stats.stations_summarized,
                aggregate_stats.stations_without_readings
            );
            println!(
                "Matches: {} matched, {} unmatched",
                match_stats.observations_matched, match_stats.observations_unmatched
            );
            if let (Some(mean), Some(max)) = (match_stats.mean_distance_km, match_stats.max_distance_km) {
                println!("Distance: mean {:.3} km, max {:.3} km", mean, max);
            }

            if normalized.rejected_count() == 0 {
                println!("✅ All rows passed validation");
            } else {
                println!("⚠️  {} rows would be rejected", normalized.rejected_count());
            }
        }

        Commands::Info {
            database,
            postgres_url,
            sample,
            snapshot,
        } => {
            apply_store_overrides(&mut config.store, database, postgres_url);
            let mut store = open_store(&config.store)?;
            store.ensure_schema()?;

            let total = store.count()?;
            println!("Joined records: {}", total);

            if sample > 0 && total > 0 {
                println!("\nSample Records (showing up to {}):", sample);
                for (i, record) in store.sample(sample)?.iter().enumerate() {
                    println!(
                        "  {}. {} {} -> {} ({:.3} km, {:.2} {} over {} readings)",
                        i + 1,
                        record.observation_key,
                        record.species,
                        record.station_id,
                        record.distance_km,
                        record.avg_value_mg_l,
                        READING_UNIT,
                        record.reading_count
                    );
                }
            }

            if let Some(path) = snapshot {
                let info = SnapshotWriter::new().snapshot_info(&path)?;
                println!("\nSnapshot: {}", path.display());
                println!("  Rows: {}", info.total_rows);
                println!("  Row groups: {}", info.row_groups);
                println!("  Size: {} bytes", info.file_size);
            }
        }
    }

    Ok(())
}

fn apply_store_overrides(
    store: &mut StoreConfig,
    database: Option<std::path::PathBuf>,
    postgres_url: Option<String>,
) {
    if let Some(path) = database {
        store.backend = StoreBackend::Sqlite;
        store.sqlite_path = path;
    }
    if let Some(url) = postgres_url {
        store.backend = StoreBackend::Postgres;
        store.postgres_url = Some(url);
    }
}

fn open_store(config: &StoreConfig) -> Result<Box<dyn JoinedStore + Send>> {
    match config.backend {
        StoreBackend::Sqlite => {
            info!(path = %config.sqlite_path.display(), "using SQLite store");
            Ok(Box::new(SqliteStore::open(&config.sqlite_path)?))
        }
        StoreBackend::Postgres => open_postgres(config),
    }
}

#[cfg(feature = "postgres")]
fn open_postgres(config: &StoreConfig) -> Result<Box<dyn JoinedStore + Send>> {
    let url = config.postgres_url.clone().ok_or_else(|| {
        PipelineError::Config("store.postgres_url is required for the postgres backend".to_string())
    })?;
    info!("using PostgreSQL store");
    Ok(Box::new(crate::writers::PostgresStore::new(url)))
}

#[cfg(not(feature = "postgres"))]
fn open_postgres(_config: &StoreConfig) -> Result<Box<dyn JoinedStore + Send>> {
    Err(PipelineError::Config(
        "PostgreSQL backend requested but this build lacks the `postgres` feature".to_string(),
    ))
}
