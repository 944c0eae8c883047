mod args;
mod validators;

use anyhow::{Context, Result};
use args::{Args, Command};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use terrasync_mirror::{
    resolve_targets, sync, Config, FreshnessChecker, HttpFetcher, Inventory, Mirrors, Remote,
    Storage, TaskDedup, Target,
};

/// Rough size of a tile's terrain, objects and overlays.
const APPROX_TILE_BYTES: f64 = 1_500_000f64;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse()?;
    let command = args.command.clone();
    let dry_run = args.dry_run;
    let config: Config = args.into();

    let target = match command {
        Command::Scan { deep } => return scan(config, deep).await,
        Command::Tile { lat, lon, radius } => Target::Tile { lat, lon, radius },
        Command::Plan { path, radius } => Target::Plan { path, radius },
    };

    if dry_run {
        let tile_count = resolve_targets(&target)
            .await
            .context("failed resolving tiles")?
            .len();

        let ortho_bytes = if config.stages.orthophoto {
            // DXT5 stores one byte per pixel, the mip chain adds a third
            f64::from(config.ortho_resolution).powi(2) * 4f64 / 3f64
        } else {
            0f64
        };

        eprintln!(
            "would sync {} tiles (approx {}, assuming {} per tile)",
            tile_count,
            pretty_bytes::converter::convert((tile_count as f64) * (APPROX_TILE_BYTES + ortho_bytes)),
            pretty_bytes::converter::convert(APPROX_TILE_BYTES + ortho_bytes),
        );

        return Ok(());
    }

    let report = sync(config, target).await?;
    eprintln!("{}", report);

    if report.failed > 0 {
        anyhow::bail!("{} tiles failed", report.failed);
    }
    Ok(())
}

async fn scan(config: Config, deep: bool) -> Result<()> {
    let storage = Arc::new(Storage::new(
        config.save_root.clone(),
        config.temp_dir(),
        config.version,
    ));
    let fetcher = HttpFetcher::new(config.timeout, config.request_retries)
        .context("failed creating HTTP client")?;
    let remote = Arc::new(Remote::new(
        fetcher,
        Mirrors::new(config.mirrors.iter().cloned()),
        Arc::new(TaskDedup::new(config.concurrency)),
    ));
    let freshness = FreshnessChecker::new(remote, Arc::clone(&storage));

    let inventory = Inventory::scan(&storage, &freshness, deep)
        .await
        .context("failed scanning the local mirror")?;

    for record in inventory.records() {
        println!(
            "{:<9} {:>8} {:<7} {}",
            record.kind,
            record.tile.map(|t| t.to_string()).unwrap_or_default(),
            if record.is_current { "current" } else { "stale" },
            record.path.display(),
        );
    }
    eprintln!(
        "{} files, {} stale",
        inventory.len(),
        inventory.stale().count()
    );

    Ok(())
}
