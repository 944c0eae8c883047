use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use crate::dedup::DEFAULT_CONCURRENCY;
use crate::url::DEFAULT_IMAGERY_URL;

/// Public TerraSync mirrors, tried in rotation.
pub const DEFAULT_MIRRORS: &[&str] = &["https://terramaster.flightgear.org/terrasync/"];

/// Default edge length of the orthophoto texture in pixels.
pub const DEFAULT_ORTHO_RESOLUTION: u32 = 2048;

/// Largest image the imagery provider is asked for in one request.
pub const MAX_SUB_TILE_SIZE: u32 = 2048;

/// Scenery download configuration.
#[derive(Debug, PartialEq)]
pub struct Config {
    /// Root of the local mirror.
    pub save_root: PathBuf,

    /// Scratch folder for manifests and intermediate images. Defaults to
    /// `.terrasync-tmp` under the save root.
    pub temp_dir: Option<PathBuf>,

    /// Mirror base URLs, each including the path up to the version folder.
    pub mirrors: Vec<String>,

    /// Which scenery tree to sync.
    pub version: SceneryVersion,

    /// Edge length of the orthophoto textures in pixels.
    pub ortho_resolution: u32,

    /// Maximum edge length of a single imagery request.
    pub ortho_max_sub_tile: u32,

    /// The imagery export URL including the replacement specifiers
    /// `{xmin}`, `{ymin}`, `{xmax}`, `{ymax}`, `{width}` and `{height}`.
    pub imagery_url: String,

    /// Optional API token appended to imagery requests.
    pub imagery_token: Option<String>,

    /// Maximum number of tiles processed and requests issued at once.
    pub concurrency: usize,

    /// Timeout for a single request.
    ///
    /// Pass the zero duration to disable the timeout.
    pub timeout: Duration,

    /// How many times to retry a failed HTTP request.
    pub request_retries: u8,

    /// Whether to download resources again even if the local copy is current.
    pub fetch_existing: bool,

    /// Optional stages to run after terrain.
    pub stages: Stages,
}

impl Config {
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| self.save_root.join(".terrasync-tmp"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            save_root: PathBuf::from("./scenery"),
            temp_dir: None,
            mirrors: DEFAULT_MIRRORS.iter().map(|s| (*s).to_owned()).collect(),
            version: SceneryVersion::Ws2,
            ortho_resolution: DEFAULT_ORTHO_RESOLUTION,
            ortho_max_sub_tile: MAX_SUB_TILE_SIZE,
            imagery_url: DEFAULT_IMAGERY_URL.to_owned(),
            imagery_token: None,
            concurrency: DEFAULT_CONCURRENCY,
            timeout: Duration::from_secs(10 * 60),
            request_retries: 3,
            fetch_existing: false,
            stages: Stages::default(),
        }
    }
}

/// The scenery format served by the mirrors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SceneryVersion {
    /// Terrain as `.btg.gz` meshes.
    Ws2,
    /// Terrain as per-degree `vpb` archives.
    Ws3,
}

impl SceneryVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            SceneryVersion::Ws2 => "ws2",
            SceneryVersion::Ws3 => "ws3",
        }
    }
}

impl fmt::Display for SceneryVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SceneryVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ws2" => Ok(SceneryVersion::Ws2),
            "ws3" => Ok(SceneryVersion::Ws3),
            other => Err(format!("unknown scenery version '{other}', expected ws2 or ws3")),
        }
    }
}

/// Stages that run after the terrain stage. Terrain always runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stages {
    pub orthophoto: bool,
    pub objects: bool,
    pub overlays: bool,
}

impl Default for Stages {
    fn default() -> Self {
        Self {
            orthophoto: true,
            objects: true,
            overlays: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parses_case_insensitively() {
        assert_eq!("WS3".parse::<SceneryVersion>(), Ok(SceneryVersion::Ws3));
        assert_eq!(SceneryVersion::Ws2.to_string(), "ws2");
        assert!("ws1".parse::<SceneryVersion>().is_err());
    }

    #[test]
    fn temp_dir_defaults_under_save_root() {
        let config = Config {
            save_root: "/scenery".into(),
            ..Config::default()
        };
        assert_eq!(config.temp_dir(), PathBuf::from("/scenery/.terrasync-tmp"));
    }
}
