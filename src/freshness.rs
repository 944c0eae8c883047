//! Deciding whether a local file still matches the server.
//!
//! Every remote directory carries a `.dirindex` manifest listing its files
//! with their SHA-1 digests. The manifest of a directory is fetched at most
//! once per session.
//!
//! The policy is deliberately asymmetric: a file the manifest does not list
//! counts as current, but a manifest that cannot be fetched makes every file
//! in its directory stale.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use sha1::{Digest, Sha1};
use tokio::{fs, sync::OnceCell};
use tracing::{debug, warn};

use crate::http::{Fetch, Remote};
use crate::storage::{write_file, RemotePath, Storage};

/// Name of the per-directory manifest.
pub const DIRINDEX: &str = ".dirindex";

/// File name to lowercase hex SHA-1, parsed from a `.dirindex`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DirIndex {
    digests: HashMap<String, String>,
}

impl DirIndex {
    /// Parses manifest lines of the form `kind:name:sha1:size`. Lines with a
    /// different number of fields (`version:1`, `path:...`) are ignored.
    pub fn parse(text: &str) -> Self {
        let digests = text
            .lines()
            .filter_map(|line| {
                let fields: Vec<&str> = line.trim_end_matches('\r').split(':').collect();
                match fields.as_slice() {
                    [_, name, digest, _] => Some(((*name).to_owned(), digest.to_ascii_lowercase())),
                    _ => None,
                }
            })
            .collect();

        Self { digests }
    }

    pub fn digest(&self, name: &str) -> Option<&str> {
        self.digests.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

type CachedIndex = Arc<OnceCell<Option<Arc<DirIndex>>>>;

pub struct FreshnessChecker<F> {
    remote: Arc<Remote<F>>,
    storage: Arc<Storage>,
    indexes: Mutex<HashMap<RemotePath, CachedIndex>>,
}

impl<F: Fetch> FreshnessChecker<F> {
    pub fn new(remote: Arc<Remote<F>>, storage: Arc<Storage>) -> Self {
        Self {
            remote,
            storage,
            indexes: Mutex::new(HashMap::new()),
        }
    }

    pub fn remote(&self) -> &Remote<F> {
        &self.remote
    }

    /// Freshness of the local copy of a full mirror URL.
    ///
    /// URLs that belong to none of the configured mirrors are never current.
    pub async fn is_up_to_date(&self, url: &str) -> bool {
        match self.remote.relative(url) {
            Some(Ok(path)) => self.is_current(&path).await,
            Some(Err(e)) => {
                warn!(url, error = %e, "cannot map URL to the local mirror");
                false
            }
            None => {
                warn!(url, "URL is not served by a configured mirror");
                false
            }
        }
    }

    /// Whether the local copy of `path` exists and matches its directory
    /// manifest.
    pub async fn is_current(&self, path: &RemotePath) -> bool {
        let local = self.storage.local(path);
        if !local.is_file() {
            return false;
        }

        let index = match self.index_of(&path.parent()).await {
            Some(index) => index,
            None => return false,
        };

        let expected = match index.digest(path.file_name()) {
            Some(expected) => expected,
            None => return true,
        };

        match fs::read(&local).await {
            Ok(bytes) => sha1_hex(&bytes) == expected,
            Err(e) => {
                warn!(path = %local.display(), error = %e, "failed hashing local file");
                false
            }
        }
    }

    /// The manifest of `dir`, fetched on first use. `None` if it could not be
    /// fetched; that outcome is remembered for the session too.
    async fn index_of(&self, dir: &RemotePath) -> Option<Arc<DirIndex>> {
        let cell = {
            let mut indexes = self.indexes.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(indexes.entry(dir.clone()).or_default())
        };

        cell.get_or_init(|| self.fetch_index(dir)).await.clone()
    }

    async fn fetch_index(&self, dir: &RemotePath) -> Option<Arc<DirIndex>> {
        let manifest = match dir.join(DIRINDEX) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(path = %dir, error = %e, "invalid manifest path");
                return None;
            }
        };

        let bytes = match self.remote.get(&manifest).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %manifest, error = %e, "manifest unavailable, treating directory as stale");
                return None;
            }
        };

        let cached = self
            .storage
            .temp_dir()
            .join("sync")
            .join(format!("{}{}", dir.as_str().replace('/', "_"), DIRINDEX));
        if let Err(e) = write_file(&cached, &bytes).await {
            debug!(path = %cached.display(), error = %e, "failed caching manifest");
        }

        let index = DirIndex::parse(&String::from_utf8_lossy(&bytes));
        debug!(path = %manifest, entries = index.len(), "parsed manifest");
        Some(Arc::new(index))
    }
}

/// Lowercase hex SHA-1 of `bytes`.
pub fn sha1_hex(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

impl<F> std::fmt::Debug for FreshnessChecker<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreshnessChecker")
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}
