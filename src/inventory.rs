//! What the local mirror already holds, and whether it is still current.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::Error;
use crate::freshness::FreshnessChecker;
use crate::http::Fetch;
use crate::stg::StgEntry;
use crate::storage::{Overlay, RemotePath, Storage};

/// The artifact families of a tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TileKind {
    Terrain,
    Objects,
    Ortho,
    Buildings,
    Details,
    Pylons,
    Roads,
    Trees,
}

impl TileKind {
    fn of_overlay(overlay: Overlay) -> Self {
        match overlay {
            Overlay::Buildings => TileKind::Buildings,
            Overlay::Details => TileKind::Details,
            Overlay::Pylons => TileKind::Pylons,
            Overlay::Roads => TileKind::Roads,
            Overlay::Trees => TileKind::Trees,
        }
    }
}

impl fmt::Display for TileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TileKind::Terrain => "terrain",
            TileKind::Objects => "objects",
            TileKind::Ortho => "ortho",
            TileKind::Buildings => "buildings",
            TileKind::Details => "details",
            TileKind::Pylons => "pylons",
            TileKind::Roads => "roads",
            TileKind::Trees => "trees",
        };
        f.pad(name)
    }
}

/// One local file of the mirror.
#[derive(Clone, Debug, PartialEq)]
pub struct TileRecord {
    pub kind: TileKind,
    /// Tile index for per-tile files, `None` for per-cell archives.
    pub tile: Option<u32>,
    pub is_current: bool,
    pub url: String,
    pub path: PathBuf,
}

/// A snapshot of the local mirror.
#[derive(Clone, Debug, Default)]
pub struct Inventory {
    records: Vec<TileRecord>,
}

/// A file found on disk before its freshness is known.
struct Found {
    kind: TileKind,
    remote: RemotePath,
    local: PathBuf,
}

impl Inventory {
    /// Lists the manifests, meshes, orthophotos and overlay archives under the
    /// save root and checks each against its directory manifest.
    ///
    /// With `deep`, terrain meshes are listed too and a manifest only counts as
    /// current if every resource it references directly is current as well.
    pub async fn scan<F: Fetch>(
        storage: &Storage,
        freshness: &FreshnessChecker<F>,
        deep: bool,
    ) -> Result<Self, Error> {
        let listing = {
            let storage = storage.clone();
            tokio::task::spawn_blocking(move || list(&storage, deep)).await?
        };

        let mut records = Vec::with_capacity(listing.len());
        for found in listing {
            let is_current = match found.kind {
                // no manifest covers re-encoded textures
                TileKind::Ortho => true,
                _ => {
                    freshness.is_current(&found.remote).await
                        && (!deep || references_current(storage, freshness, &found).await)
                }
            };

            records.push(TileRecord {
                kind: found.kind,
                tile: tile_of(found.remote.file_name()),
                is_current,
                url: freshness.remote().url_of(&found.remote),
                path: found.local,
            });
        }

        debug!(records = records.len(), deep, "scanned local mirror");
        Ok(Self { records })
    }

    pub fn records(&self) -> &[TileRecord] {
        &self.records
    }

    pub fn stale(&self) -> impl Iterator<Item = &TileRecord> {
        self.records.iter().filter(|record| !record.is_current)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn list(storage: &Storage, deep: bool) -> Vec<Found> {
    let version = storage.version_root();
    let mut roots = vec![
        (TileKind::Terrain, format!("{version}/Terrain")),
        (TileKind::Objects, format!("{version}/Objects")),
        (TileKind::Ortho, "Orthophotos".to_owned()),
    ];
    roots.extend(
        Overlay::ALL
            .iter()
            .map(|&overlay| (TileKind::of_overlay(overlay), format!("osm2city/{}", overlay.dir_name()))),
    );

    let mut found = Vec::new();
    for (kind, dir) in roots {
        let base = storage.root().join(&dir);
        if !base.is_dir() {
            continue;
        }

        for entry in WalkDir::new(&base).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(path = %base.display(), error = %e, "failed walking mirror");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_listed(kind, &entry.file_name().to_string_lossy(), deep) {
                continue;
            }

            match remote_of(storage.root(), entry.path()) {
                Some(remote) => found.push(Found {
                    kind,
                    remote,
                    local: entry.into_path(),
                }),
                None => warn!(path = %entry.path().display(), "file outside the mirror layout"),
            }
        }
    }

    found
}

fn is_listed(kind: TileKind, name: &str, deep: bool) -> bool {
    match kind {
        TileKind::Terrain => name.ends_with(".stg") || (deep && name.ends_with(".btg.gz")),
        TileKind::Objects => name.ends_with(".stg"),
        TileKind::Ortho => name.ends_with(".dds"),
        _ => name.ends_with(".txz"),
    }
}

/// Mirror-relative path of a local file.
fn remote_of(root: &Path, local: &Path) -> Option<RemotePath> {
    let relative = local.strip_prefix(root).ok()?;
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    RemotePath::new(&joined).ok()
}

/// `3088961` for `3088961.stg`, `None` for names that are not a tile index.
fn tile_of(file_name: &str) -> Option<u32> {
    file_name.split('.').next()?.parse().ok()
}

/// Whether everything a manifest references directly is current. Anything
/// that cannot be checked counts as current.
async fn references_current<F: Fetch>(
    storage: &Storage,
    freshness: &FreshnessChecker<F>,
    found: &Found,
) -> bool {
    if !found.remote.file_name().ends_with(".stg") {
        return true;
    }

    let text = match tokio::fs::read_to_string(&found.local).await {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %found.local.display(), error = %e, "failed reading manifest");
            return true;
        }
    };

    let dir = found.remote.parent();
    for entry in StgEntry::parse(&text) {
        let reference = entry.and_then(|entry| match entry {
            StgEntry::Object(name) | StgEntry::Base(name) => dir.join(&format!("{name}.gz")),
            StgEntry::Static(path) => dir.join(&path),
            StgEntry::Shared(path) => storage.version_root().join(&path),
        });

        match reference {
            Ok(path) => {
                if !freshness.is_current(&path).await {
                    debug!(manifest = %found.remote, path = %path, "stale reference");
                    return false;
                }
            }
            Err(e) => debug!(manifest = %found.remote, error = %e, "unchecked reference"),
        }
    }

    true
}
