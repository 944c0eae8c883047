use anyhow::{Context, Result};
use futures::{prelude::*, stream};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    fmt,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::fs;
use tracing::{info, warn};

use crate::config::Config;
use crate::dedup::TaskDedup;
use crate::downloader::{Downloader, TileOutcome};
use crate::error::Error;
use crate::geo::{tiles_within_radius, LatLon};
use crate::http::{Fetch, HttpFetcher};
use crate::plan::expand_plan;

/// What to sync.
#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    /// Every tile within `radius` miles of a point. A zero radius is just the
    /// tile containing it.
    Tile { lat: f64, lon: f64, radius: f64 },
    /// Every tile within `radius` miles of a flight plan's route.
    Plan { path: PathBuf, radius: f64 },
}

/// Tile counts of a finished run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub requested: usize,
    pub completed: usize,
    pub partial: usize,
    pub no_data: usize,
    pub failed: usize,
}

impl SyncReport {
    fn record(&mut self, outcome: TileOutcome) {
        match outcome {
            TileOutcome::Complete => self.completed += 1,
            TileOutcome::Partial => self.partial += 1,
            TileOutcome::NoData => self.no_data += 1,
            TileOutcome::Failed => self.failed += 1,
        }
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tiles: {} complete, {} partial, {} without data, {} failed",
            self.requested, self.completed, self.partial, self.no_data, self.failed
        )
    }
}

/// The tile centers a target covers, ordered south to north, west to east.
pub async fn resolve_targets(target: &Target) -> Result<Vec<LatLon>, Error> {
    let tiles = match target {
        Target::Tile { lat, lon, radius } => tiles_within_radius(*lat, *lon, *radius),
        Target::Plan { path, radius } => expand_plan(path, *radius).await?,
    };

    let mut tiles: Vec<_> = tiles.into_iter().collect();
    tiles.sort_by(|a, b| a.lat.total_cmp(&b.lat).then(a.lon.total_cmp(&b.lon)));
    Ok(tiles)
}

/// Asynchronously sync every tile of `target` into the mirror at
/// `cfg.save_root`.
///
/// A failing tile never aborts the run; it is counted in the returned report.
pub async fn sync(cfg: Config, target: Target) -> Result<SyncReport> {
    let save_root = cfg.save_root.as_path();
    if save_root.exists() && !save_root.is_dir() {
        anyhow::bail!("output {} must be a directory", save_root.display());
    }
    fs::create_dir_all(save_root)
        .await
        .context("failed to create root output directory")?;

    let tiles = resolve_targets(&target)
        .await
        .with_context(|| format!("failed resolving tiles of {target:?}"))?;

    let fetcher = HttpFetcher::new(cfg.timeout, cfg.request_retries)
        .context("failed creating HTTP client")?;

    Ok(sync_tiles(&cfg, fetcher, tiles).await)
}

/// Runs the tile pipeline for every point in `tiles` with at most
/// `cfg.concurrency` tiles in flight, showing a progress bar.
pub async fn sync_tiles<F: Fetch>(cfg: &Config, fetcher: F, tiles: Vec<LatLon>) -> SyncReport {
    let dedup = Arc::new(TaskDedup::new(cfg.concurrency));
    let downloader = Downloader::new(cfg, fetcher, dedup);

    let report = Mutex::new(SyncReport {
        requested: tiles.len(),
        ..SyncReport::default()
    });

    let pb = ProgressBar::new(tiles.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:60.cyan/blue} {pos:>7}/{len:7} ETA: {eta} {msg}")
            .progress_chars("##-"),
    );

    let s = stream::iter(pb.wrap_iter(tiles.into_iter()));
    s.for_each_concurrent(cfg.concurrency.max(1), |point| {
        let downloader = &downloader;
        let report = &report;

        async move {
            let outcome = downloader.download_tile(point).await;
            report
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record(outcome);
        }
    })
    .await;

    pb.finish_and_clear();

    // manifests are only cached for the run
    let manifests = downloader.storage().temp_dir().join("sync");
    if let Err(e) = fs::remove_dir_all(&manifests).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %manifests.display(), error = %e, "failed removing manifest cache");
        }
    }

    let report = report.into_inner().unwrap_or_else(PoisonError::into_inner);
    info!(
        requested = report.requested,
        completed = report.completed,
        partial = report.partial,
        no_data = report.no_data,
        failed = report.failed,
        "sync finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counts_outcomes() {
        let mut report = SyncReport {
            requested: 4,
            ..SyncReport::default()
        };
        for outcome in [
            TileOutcome::Complete,
            TileOutcome::Partial,
            TileOutcome::NoData,
            TileOutcome::Failed,
        ] {
            report.record(outcome);
        }

        assert_eq!(
            report.to_string(),
            "4 tiles: 1 complete, 1 partial, 1 without data, 1 failed"
        );
    }

    #[tokio::test]
    async fn zero_radius_targets_one_tile() {
        let tiles = resolve_targets(&Target::Tile {
            lat: 37.62,
            lon: -122.38,
            radius: 0.0,
        })
        .await
        .unwrap();

        assert_eq!(tiles, vec![LatLon::new(37.5625, -122.375)]);
    }

    #[tokio::test]
    async fn targets_are_ordered() {
        let tiles = resolve_targets(&Target::Tile {
            lat: 47.56,
            lon: 8.07,
            radius: 15.0,
        })
        .await
        .unwrap();

        assert!(tiles.len() > 1);
        assert!(tiles
            .windows(2)
            .all(|w| w[0].lat < w[1].lat || (w[0].lat == w[1].lat && w[0].lon < w[1].lon)));
    }
}
