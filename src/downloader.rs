//! The per-tile pipeline.
//!
//! A tile runs its stages strictly in order: terrain, orthophoto, objects,
//! overlays. Missing terrain ends the tile early; a missing object manifest
//! or overlay archive only skips that piece. Any other error aborts the
//! tile. Every resource goes through one primitive, [`Downloader::fetch_resource`],
//! which dedups it against the whole session, reuses current local copies
//! and writes new ones through [`Storage`].

use std::sync::Arc;

use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::airport::{airport_code, airport_dir, listed_files};
use crate::archive::{extract_txz, extract_vpb};
use crate::config::{Config, SceneryVersion, Stages};
use crate::dedup::TaskDedup;
use crate::error::Error;
use crate::freshness::FreshnessChecker;
use crate::geo::LatLon;
use crate::http::{Fetch, Remote};
use crate::ortho::fetch_orthophoto;
use crate::stg::{Reference, StgEntry};
use crate::storage::{Overlay, RemotePath, Storage};
use crate::tile::Tile;
use crate::url::{ImageryUrl, Mirrors};

/// How far a tile got.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileOutcome {
    /// Every enabled stage found its data.
    Complete,
    /// Terrain is there but the objects or some overlays are not.
    Partial,
    /// The server has no terrain for this tile.
    NoData,
    Failed,
}

/// Result of [`Downloader::fetch_resource`].
#[derive(Debug)]
enum Fetched {
    Downloaded(Vec<u8>),
    /// The local copy is current and was used instead.
    Current(Vec<u8>),
    /// Another task has it in flight or already finished it.
    Skipped,
}

impl Fetched {
    fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Fetched::Downloaded(bytes) | Fetched::Current(bytes) => Some(bytes),
            Fetched::Skipped => None,
        }
    }
}

pub struct Downloader<F> {
    remote: Arc<Remote<F>>,
    storage: Arc<Storage>,
    freshness: FreshnessChecker<F>,
    imagery: ImageryUrl,
    ortho_resolution: u32,
    ortho_max_sub_tile: u32,
    fetch_existing: bool,
    stages: Stages,
}

impl<F: Fetch> Downloader<F> {
    pub fn new(config: &Config, fetcher: F, dedup: Arc<TaskDedup>) -> Self {
        let storage = Arc::new(Storage::new(
            config.save_root.clone(),
            config.temp_dir(),
            config.version,
        ));
        let remote = Arc::new(Remote::new(
            fetcher,
            Mirrors::new(config.mirrors.iter().cloned()),
            dedup,
        ));

        Self {
            freshness: FreshnessChecker::new(Arc::clone(&remote), Arc::clone(&storage)),
            remote,
            storage,
            imagery: ImageryUrl::new(config.imagery_url.clone(), config.imagery_token.clone()),
            ortho_resolution: config.ortho_resolution,
            ortho_max_sub_tile: config.ortho_max_sub_tile,
            fetch_existing: config.fetch_existing,
            stages: config.stages,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn freshness(&self) -> &FreshnessChecker<F> {
        &self.freshness
    }

    pub fn remote(&self) -> &Remote<F> {
        &self.remote
    }

    fn dedup(&self) -> &TaskDedup {
        self.remote.dedup()
    }

    /// Syncs the tile containing `point`, holding one tile slot throughout.
    ///
    /// Never fails: errors are logged and reported as [`TileOutcome::Failed`].
    pub async fn download_tile(&self, point: LatLon) -> TileOutcome {
        let tile = match Tile::at(point.lat, point.lon) {
            Some(tile) => tile,
            None => {
                warn!(lat = point.lat, lon = point.lon, "latitude or longitude out of range");
                return TileOutcome::Failed;
            }
        };

        let _slot = match self.dedup().acquire().await {
            Ok(slot) => slot,
            Err(e) => {
                error!(tile = tile.index, error = %e, "tile failed");
                return TileOutcome::Failed;
            }
        };

        match self.sync_tile(&tile).await {
            Ok(outcome) => {
                info!(tile = tile.index, folder = %tile.folder.path(), ?outcome, "tile done");
                outcome
            }
            Err(e) => {
                error!(tile = tile.index, folder = %tile.folder.path(), error = %e, "tile failed");
                TileOutcome::Failed
            }
        }
    }

    async fn sync_tile(&self, tile: &Tile) -> Result<TileOutcome, Error> {
        if !self.terrain(tile).await? {
            return Ok(TileOutcome::NoData);
        }

        let mut complete = true;
        if self.stages.orthophoto {
            self.orthophoto(tile).await?;
        }
        if self.stages.objects {
            complete &= self.objects(tile).await?;
        }
        if self.stages.overlays {
            complete &= self.overlays(tile).await?;
        }

        Ok(if complete {
            TileOutcome::Complete
        } else {
            TileOutcome::Partial
        })
    }

    /// Returns `false` if the server has no terrain for the tile.
    async fn terrain(&self, tile: &Tile) -> Result<bool, Error> {
        let dir = self.storage.terrain_dir(&tile.folder);
        let stg = dir.join(&format!("{}.stg", tile.index))?;

        let manifest = match self.storage.version() {
            SceneryVersion::Ws2 => {
                let btg = dir.join(&format!("{}.btg.gz", tile.index))?;
                match self.fetch_resource(&btg).await {
                    Err(e) if e.is_not_found() => {
                        warn!(stage = "terrain", tile = tile.index, url = %btg, "no terrain for tile");
                        return Ok(false);
                    }
                    other => {
                        other?;
                    }
                }
                self.optional(&stg, "terrain").await?
            }
            SceneryVersion::Ws3 => match self.fetch_resource(&stg).await {
                Err(e) if e.is_not_found() => {
                    warn!(stage = "terrain", tile = tile.index, url = %stg, "no terrain for tile");
                    return Ok(false);
                }
                other => other?.into_bytes(),
            },
        };

        if let Some(manifest) = manifest {
            self.walk_manifest(&dir, &manifest).await?;
        }

        if self.storage.version() == SceneryVersion::Ws3 {
            self.vpb(tile).await?;
        }

        Ok(true)
    }

    async fn vpb(&self, tile: &Tile) -> Result<(), Error> {
        let archive = self.storage.vpb_archive(&tile.folder);
        if let Some(bytes) = self.optional_download(&archive, "terrain").await? {
            let dest = self.storage.local(&self.storage.vpb_dir(&tile.folder));
            tokio::task::spawn_blocking(move || extract_vpb(&bytes, &dest)).await??;
        }
        Ok(())
    }

    async fn orthophoto(&self, tile: &Tile) -> Result<(), Error> {
        let target = self.storage.orthophoto(&tile.folder, tile.index);
        if !self.fetch_existing && self.storage.local(&target).is_file() {
            debug!(stage = "orthophoto", tile = tile.index, path = %target, "orthophoto exists");
            return Ok(());
        }

        let claim = match self.dedup().claim(target.as_str()) {
            Some(claim) => claim,
            None => return Ok(()),
        };

        let path = fetch_orthophoto(
            &self.remote,
            &self.storage,
            &self.imagery,
            tile,
            self.ortho_resolution,
            self.ortho_max_sub_tile,
        )
        .await?;
        claim.complete();

        debug!(stage = "orthophoto", tile = tile.index, path = %path.display(), "stored orthophoto");
        Ok(())
    }

    /// Returns `false` if the tile has no object manifest.
    async fn objects(&self, tile: &Tile) -> Result<bool, Error> {
        let dir = self.storage.objects_dir(&tile.folder);
        let stg = dir.join(&format!("{}.stg", tile.index))?;

        match self.fetch_resource(&stg).await {
            Ok(fetched) => {
                if let Some(manifest) = fetched.into_bytes() {
                    self.walk_manifest(&dir, &manifest).await?;
                }
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                warn!(stage = "objects", tile = tile.index, url = %stg, "no objects for tile");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Tries all five overlays. Returns `false` if any is missing, or the
    /// first real error once all have been attempted.
    async fn overlays(&self, tile: &Tile) -> Result<bool, Error> {
        let mut complete = true;
        let mut failure = None;

        for overlay in Overlay::ALL {
            match self.overlay(tile, overlay).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    warn!(stage = "overlays", tile = tile.index, overlay = overlay.dir_name(), "overlay not available");
                    complete = false;
                }
                Err(e) => {
                    error!(stage = "overlays", tile = tile.index, overlay = overlay.dir_name(), error = %e, "overlay failed");
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(complete),
        }
    }

    async fn overlay(&self, tile: &Tile, overlay: Overlay) -> Result<(), Error> {
        let archive = self.storage.overlay_archive(overlay, &tile.folder);

        // a current archive was unpacked when it was downloaded
        if let Fetched::Downloaded(bytes) = self.fetch_resource(&archive).await? {
            let dest = self.storage.local(&self.storage.overlay_dir(overlay, &tile.folder));
            tokio::task::spawn_blocking(move || extract_txz(&bytes, &dest)).await??;
        }
        Ok(())
    }

    /// Fetches every resource a manifest in `dir` references.
    async fn walk_manifest(&self, dir: &RemotePath, manifest: &[u8]) -> Result<(), Error> {
        let text = String::from_utf8_lossy(manifest);

        for entry in StgEntry::parse(&text) {
            let root = entry.and_then(|entry| self.root_reference(dir, &entry));
            match root {
                Ok(Some(reference)) => self.resolve(reference).await?,
                Ok(None) => {}
                Err(e) => warn!(path = %dir, error = %e, "skipping manifest entry"),
            }
        }

        Ok(())
    }

    fn root_reference(&self, dir: &RemotePath, entry: &StgEntry) -> Result<Option<Reference>, Error> {
        let reference = match entry {
            StgEntry::Object(name) => Reference::Direct(dir.join(&format!("{name}.gz"))?),
            StgEntry::Shared(path) => Reference::model(self.storage.version_root().join(path)?),
            StgEntry::Static(path) => Reference::model(dir.join(path)?),
            // the base mesh is the tile's own terrain
            StgEntry::Base(_) => return Ok(None),
        };
        Ok(Some(reference))
    }

    /// Fetches `root` and everything it references, depth first.
    ///
    /// A missing or malformed reference is logged and skipped.
    async fn resolve(&self, root: Reference) -> Result<(), Error> {
        if let Reference::Direct(path) = &root {
            if let Some(code) = object_airport(path) {
                self.airport(code).await;
            }
        }

        let mut pending = vec![root];
        while let Some(reference) = pending.pop() {
            let bytes = match self.fetch_resource(reference.path()).await {
                Ok(fetched) => match fetched.into_bytes() {
                    Some(bytes) => bytes,
                    None => continue,
                },
                Err(e) if e.is_skippable() => {
                    warn!(path = %reference.path(), error = %e, "skipping reference");
                    continue;
                }
                Err(e) => return Err(e),
            };

            match reference.children(&bytes) {
                Ok(children) => pending.extend(children),
                Err(e) => warn!(path = %reference.path(), error = %e, "skipping references of malformed resource"),
            }
        }

        Ok(())
    }

    /// Fetches the airport files belonging to `code`. Failures are logged.
    async fn airport(&self, code: &str) {
        if let Err(e) = self.try_airport(code).await {
            warn!(stage = "airport", code, error = %e, "airport lookup failed");
        }
    }

    async fn try_airport(&self, code: &str) -> Result<(), Error> {
        let dir = airport_dir(&self.storage.airports_dir(), code)?;
        let claim = match self.dedup().claim(&format!("{dir}/{code}.*")) {
            Some(claim) => claim,
            None => return Ok(()),
        };

        let listing = self
            .remote
            .get_url(&format!("{}/", self.remote.url_of(&dir)))
            .await?;
        for name in listed_files(&String::from_utf8_lossy(&listing), code)? {
            let file = dir.join(&name)?;
            if let Err(e) = self.fetch_resource(&file).await {
                if !e.is_skippable() {
                    return Err(e);
                }
                warn!(stage = "airport", code, path = %file, error = %e, "skipping airport file");
            }
        }

        claim.complete();
        Ok(())
    }

    /// Bytes of `path`, or `None` if it was skipped or is not on the server.
    async fn optional(&self, path: &RemotePath, stage: &'static str) -> Result<Option<Vec<u8>>, Error> {
        match self.fetch_resource(path).await {
            Ok(fetched) => Ok(fetched.into_bytes()),
            Err(e) if e.is_not_found() => {
                warn!(stage, url = %path, "resource not available");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Like [`optional`](Self::optional) but only returns freshly downloaded bytes.
    async fn optional_download(&self, path: &RemotePath, stage: &'static str) -> Result<Option<Vec<u8>>, Error> {
        match self.fetch_resource(path).await {
            Ok(Fetched::Downloaded(bytes)) => Ok(Some(bytes)),
            Ok(_) => Ok(None),
            Err(e) if e.is_not_found() => {
                warn!(stage, url = %path, "resource not available");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// The single fetch primitive: claim, reuse if current, download, store.
    async fn fetch_resource(&self, path: &RemotePath) -> Result<Fetched, Error> {
        if self.dedup().is_missing(path.as_str()) {
            return Err(Error::NotFound {
                url: path.to_string(),
            });
        }

        let claim = match self.dedup().claim(path.as_str()) {
            Some(claim) => claim,
            None => {
                debug!(path = %path, "already handled in this session");
                return Ok(Fetched::Skipped);
            }
        };

        if !self.fetch_existing && self.freshness.is_current(path).await {
            let local = self.storage.local(path);
            match fs::read(&local).await {
                Ok(bytes) => {
                    debug!(path = %path, "local copy is current");
                    claim.complete();
                    return Ok(Fetched::Current(bytes));
                }
                Err(e) => debug!(path = %local.display(), error = %e, "failed reading current copy"),
            }
        }

        let bytes = match self.remote.get(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                claim.missing();
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let local = self.storage.write(path, &bytes).await?;
        debug!(path = %local.display(), bytes = bytes.len(), "stored");

        claim.complete();
        Ok(Fetched::Downloaded(bytes))
    }
}

/// The airport code of an `OBJECT` companion mesh such as
/// `.../Terrain/e000n40/e008n47/LSZH.btg.gz`.
fn object_airport(path: &RemotePath) -> Option<&str> {
    let mut segments = path.segments();
    let _version = segments.next()?;
    if segments.next()? != "Terrain" {
        return None;
    }
    let name = path.file_name().strip_suffix(".gz")?;
    airport_code(name).filter(|code| !code.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn airport_codes_come_from_terrain_objects_only() {
        let path = |p: &str| RemotePath::new(p).unwrap();
        assert_eq!(object_airport(&path("ws2/Terrain/e000n40/e008n47/LSZH.btg.gz")), Some("LSZH"));
        assert_eq!(object_airport(&path("ws2/Terrain/e000n40/e008n47/3088961.btg.gz")), None);
        assert_eq!(object_airport(&path("ws2/Objects/e000n40/e008n47/LSZH.btg.gz")), None);
        assert_eq!(object_airport(&path("ws2/Models/Power/pylon.ac")), None);
    }
}
