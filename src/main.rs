//! Tile Pyramid - command-line front end of the tile acquisition engine.
//!
//! Locates tiles, fetches them through the cache and manages offline regions.

use std::error::Error;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tile_pyramid::{
    config::{BlockArgs, Cli, Command, Config, PointArgs, RegionCommand},
    geo::{PyramidLevel, TileRange},
    offline::{OfflineCache, Region},
    provider::{geoportail_pyramid, TileProvider, WmtsProvider},
    tile::{TileSession, ViewportTracker},
};

type CommandResult = Result<(), Box<dyn Error + Send + Sync>>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.config.verbose);

    if let Err(e) = cli.config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let config = cli.config;
    let result = match cli.command {
        Command::Levels => run_levels(),
        Command::Locate(point) => run_locate(&point),
        Command::Fetch(block) => run_fetch(&config, &block).await,
        Command::Region { command } => run_region(&config, command).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tile_pyramid=debug"
    } else {
        "tile_pyramid=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Geometry Commands
// =============================================================================

fn run_levels() -> CommandResult {
    let pyramid = geoportail_pyramid()?;

    println!("{:>5} {:>10} {:>16} {:>16}", "level", "mosaic", "resolution (m)", "tile (m)");
    for level in pyramid.levels() {
        println!(
            "{:>5} {:>10} {:>16.4} {:>16.2}",
            level.level(),
            level.mosaic_size(),
            level.resolution(),
            level.tile_length()
        );
    }
    Ok(())
}

fn run_locate(point: &PointArgs) -> CommandResult {
    let pyramid = geoportail_pyramid()?;
    let level = pyramid.level(point.level)?;
    let coordinate = point.coordinate()?;
    let projected = coordinate.to_projected();
    let index = level.projected_to_tile_index(projected)?;
    let rect = level.tile_rect(index);

    println!("coordinate: {} {}", coordinate.longitude, coordinate.latitude);
    println!("projected:  x={:.2} y={:.2}", projected.x, projected.y);
    println!("level {}:   row={} column={}", point.level, index.row, index.column);
    println!(
        "tile rect:  [{:.2}, {:.2}] x [{:.2}, {:.2}] (Mercator)",
        rect.inf.x, rect.sup.x, rect.inf.y, rect.sup.y
    );
    Ok(())
}

/// Square block of tiles around a point, which must fit in the mosaic.
fn block_range(
    level: &PyramidLevel,
    block: &BlockArgs,
) -> Result<TileRange, Box<dyn Error + Send + Sync>> {
    let center = level.coordinate_to_tile_index(&block.point.coordinate()?)?;
    Ok(block.range_around(center, level.mosaic_size())?)
}

// =============================================================================
// Fetch Command
// =============================================================================

async fn run_fetch(config: &Config, block: &BlockArgs) -> CommandResult {
    let licence = config.load_licence()?;
    let provider =
        WmtsProvider::new(&config.server, licence, config.layer, config.fetch_timeout())?;

    let mut session =
        TileSession::new(config.cache_bytes).with_fetch_timeout(config.fetch_timeout());
    if let Some(path) = &config.offline_db {
        session = session.with_offline_store(open_store(path).await?);
    }

    let pyramid = session.pyramid_for(Arc::new(provider));
    let level = *pyramid.pyramid().level(block.point.level)?;
    let range = block_range(&level, block)?;

    info!(
        layer = %config.layer,
        level = level.level(),
        rows = range.rows(),
        columns = range.columns(),
        "Fetching block"
    );

    let mut tracker = ViewportTracker::new(pyramid);
    let update = tracker.update(level.level(), &range).await?;

    for tile in &update.tiles {
        let image = tile.image();
        println!(
            "{} {}x{} at ({:.2}, {:.2})",
            tile.key(),
            image.width(),
            image.height(),
            tile.x(),
            tile.y()
        );
    }
    for (index, err) in &update.failures {
        warn!(row = index.row, column = index.column, error = %err, "Tile not available");
    }

    tracker.clear().await?;
    let stats = session.stats().await;
    println!(
        "fetched {} of {} tiles, {} failed; cache holds {} tiles, {} of {} bytes",
        update.acquired,
        range.len(),
        update.failures.len(),
        stats.entries,
        stats.resident_bytes,
        stats.constraint
    );

    if update.tiles.is_empty() && !update.failures.is_empty() {
        return Err("no tile could be fetched".into());
    }
    Ok(())
}

// =============================================================================
// Region Commands
// =============================================================================

async fn open_store(path: &Path) -> Result<Arc<OfflineCache>, Box<dyn Error + Send + Sync>> {
    let path = path.to_path_buf();
    let store = tokio::task::spawn_blocking(move || OfflineCache::open(path)).await??;
    Ok(Arc::new(store))
}

async fn run_region(config: &Config, command: RegionCommand) -> CommandResult {
    let store = open_store(config.require_offline_db()?).await?;

    match command {
        RegionCommand::Add { name, block } => {
            let pyramid = geoportail_pyramid()?;
            let level = pyramid.level(block.point.level)?;
            let range = block_range(level, &block)?;
            let map_level = config.layer.dataset().level(level.level());
            let region = Region::from_range(name, map_level, &range);

            if let Ok(licence) = config.load_licence() {
                let provider_id = region.map_level.provider_id;
                let pinned = store
                    .run_blocking(move |s| s.tile_count_for_provider(provider_id))
                    .await?;
                if pinned + range.len() > licence.offline_cache_limit {
                    warn!(
                        pinned,
                        adding = range.len(),
                        limit = licence.offline_cache_limit,
                        "Offline tile count exceeds the licence limit"
                    );
                }
            }

            let tiles = region.number_of_tiles();
            let region_name = region.name.clone();
            store.run_blocking(move |s| s.insert_region(&region)).await?;
            info!(region = %region_name, tiles, "Region pinned");
            println!("pinned {} tiles as '{}'", tiles, region_name);
        }

        RegionCommand::Remove { name } => {
            let removed = name.clone();
            store.run_blocking(move |s| s.delete_region(&name)).await?;
            println!("removed '{}'", removed);
        }

        RegionCommand::List => {
            let (names, stats) = store
                .run_blocking(|s| Ok((s.region_names()?, s.stats()?)))
                .await?;
            for name in &names {
                println!("{}", name);
            }
            println!(
                "{} regions, {} pinned tiles ({} with data, {} bytes)",
                stats.regions, stats.tiles, stats.tiles_with_data, stats.data_bytes
            );
        }

        RegionCommand::Show { name } => {
            let lookup = name.clone();
            let (region, missing) = store
                .run_blocking(move |s| Ok((s.get_region(&lookup)?, s.missing_tiles(&lookup)?)))
                .await?;
            println!("region '{}' on {}", region.name, region.map_level);
            for run in region.runs() {
                println!("  row {}: columns {}..={}", run.row, run.column_inf, run.column_sup);
            }
            println!(
                "{} tiles, {} without data",
                region.number_of_tiles(),
                missing.len()
            );
        }

        RegionCommand::Preload { name } => {
            let licence = config.load_licence()?;
            let provider =
                WmtsProvider::new(&config.server, licence, config.layer, config.fetch_timeout())?;
            info!(region = %name, dataset = %provider.dataset(), "Preloading region");

            let session = TileSession::new(config.cache_bytes)
                .with_fetch_timeout(config.fetch_timeout())
                .with_offline_store(store);
            let pyramid = session.pyramid_for(Arc::new(provider));
            let report = pyramid.preload_region(&name).await?;
            println!(
                "preloaded '{}': {} requested, {} stored, {} failed",
                name, report.requested, report.fetched, report.failed
            );
        }
    }

    Ok(())
}
