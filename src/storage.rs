//! Where things live, remotely and on disk.
//!
//! Remote resources are addressed by [`RemotePath`], a normalized
//! `/`-separated path relative to the mirror root (`ws2/Terrain/...`). The
//! local mirror uses the same relative layout under the save root, so every
//! writer goes through [`Storage`] to turn one into the other.

use std::{
    fmt,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tokio::fs;
use tracing::{debug, warn};

use crate::config::SceneryVersion;
use crate::error::Error;

/// A normalized path relative to the mirror root.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemotePath(String);

impl RemotePath {
    /// Parses `path`, accepting `\` separators and resolving `.`/`..`.
    ///
    /// Paths that climb above the root are rejected.
    pub fn new(path: &str) -> Result<Self, Error> {
        Self::root().join(path)
    }

    pub fn root() -> Self {
        RemotePath(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends a relative path.
    pub fn join(&self, path: &str) -> Result<Self, Error> {
        let mut segments: Vec<&str> = self.segments().collect();

        for segment in path.split(['/', '\\']) {
            match segment.trim() {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(Error::malformed(
                            path,
                            format!("climbs above the mirror root from '{}'", self.0),
                        ));
                    }
                }
                segment => segments.push(segment),
            }
        }

        Ok(RemotePath(segments.join("/")))
    }

    /// Resolves `path` against the directory containing this file.
    pub fn sibling(&self, path: &str) -> Result<Self, Error> {
        self.parent().join(path)
    }

    pub fn parent(&self) -> Self {
        match self.0.rfind('/') {
            Some(idx) => RemotePath(self.0[..idx].to_owned()),
            None => Self::root(),
        }
    }

    pub fn file_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two-level folder of a 1°×1° cell: `e000n40/e007n45`.
///
/// Hemisphere letters come first, longitudes are padded to three digits and
/// latitudes to two. The outer folder groups 10°×10°.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TileFolder {
    pub band10: String,
    pub band1: String,
}

impl TileFolder {
    pub fn of(lat: f64, lon: f64) -> Self {
        let hemi_lat = if lat >= 0.0 { 'n' } else { 's' };
        let hemi_lon = if lon >= 0.0 { 'e' } else { 'w' };

        let lat10 = ((lat / 10.0).floor() * 10.0).abs() as u32;
        let lon10 = ((lon / 10.0).floor() * 10.0).abs() as u32;
        let lat1 = lat.floor().abs() as u32;
        let lon1 = lon.floor().abs() as u32;

        Self {
            band10: format!("{hemi_lon}{lon10:03}{hemi_lat}{lat10:02}"),
            band1: format!("{hemi_lon}{lon1:03}{hemi_lat}{lat1:02}"),
        }
    }

    /// `band10/band1`
    pub fn path(&self) -> String {
        format!("{}/{}", self.band10, self.band1)
    }
}

/// The osm2city overlay families, each shipped as one archive per 1° cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Overlay {
    Buildings,
    Details,
    Pylons,
    Roads,
    Trees,
}

impl Overlay {
    pub const ALL: [Overlay; 5] = [
        Overlay::Buildings,
        Overlay::Details,
        Overlay::Pylons,
        Overlay::Roads,
        Overlay::Trees,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            Overlay::Buildings => "Buildings",
            Overlay::Details => "Details",
            Overlay::Pylons => "Pylons",
            Overlay::Roads => "Roads",
            Overlay::Trees => "Trees",
        }
    }
}

/// Path authority for the local mirror.
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
    temp: PathBuf,
    version: SceneryVersion,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>, temp: impl Into<PathBuf>, version: SceneryVersion) -> Self {
        Self {
            root: root.into(),
            temp: temp.into(),
            version,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The per-session scratch folder.
    pub fn temp_dir(&self) -> &Path {
        &self.temp
    }

    pub fn version(&self) -> SceneryVersion {
        self.version
    }

    /// `{version}`
    pub fn version_root(&self) -> RemotePath {
        RemotePath(self.version.as_str().to_owned())
    }

    /// `{version}/Terrain/{band10}/{band1}`
    pub fn terrain_dir(&self, folder: &TileFolder) -> RemotePath {
        RemotePath(format!("{}/Terrain/{}", self.version, folder.path()))
    }

    /// `{version}/Objects/{band10}/{band1}`
    pub fn objects_dir(&self, folder: &TileFolder) -> RemotePath {
        RemotePath(format!("{}/Objects/{}", self.version, folder.path()))
    }

    /// `{version}/Airports`
    pub fn airports_dir(&self) -> RemotePath {
        RemotePath(format!("{}/Airports", self.version))
    }

    /// `{version}/vpb/{band10}/{band1}.zip`
    pub fn vpb_archive(&self, folder: &TileFolder) -> RemotePath {
        RemotePath(format!("{}/vpb/{}.zip", self.version, folder.path()))
    }

    /// `{version}/vpb/{band10}/{band1}`
    pub fn vpb_dir(&self, folder: &TileFolder) -> RemotePath {
        RemotePath(format!("{}/vpb/{}", self.version, folder.path()))
    }

    /// `osm2city/{Overlay}/{band10}/{band1}.txz`
    pub fn overlay_archive(&self, overlay: Overlay, folder: &TileFolder) -> RemotePath {
        RemotePath(format!("osm2city/{}/{}.txz", overlay.dir_name(), folder.path()))
    }

    /// `osm2city/{Overlay}/{band10}`, the archives carry their 1° folder.
    pub fn overlay_dir(&self, overlay: Overlay, folder: &TileFolder) -> RemotePath {
        RemotePath(format!("osm2city/{}/{}", overlay.dir_name(), folder.band10))
    }

    /// `Orthophotos/{band10}/{band1}/{index}.dds`
    pub fn orthophoto(&self, folder: &TileFolder, index: u32) -> RemotePath {
        RemotePath(format!("Orthophotos/{}/{index}.dds", folder.path()))
    }

    /// Local file for a remote path.
    pub fn local(&self, path: &RemotePath) -> PathBuf {
        path.segments().fold(self.root.clone(), |acc, segment| acc.join(segment))
    }

    /// Scratch file named `name` in the session temp folder.
    pub fn temp_file(&self, name: &str) -> PathBuf {
        self.temp.join(name.replace(['/', '\\'], "_"))
    }

    /// Writes `bytes` to the local copy of `path`, creating directories.
    ///
    /// Two sessions racing on the same file is not an error: the content is
    /// the same, so if the write fails while the file exists the failure is
    /// only logged.
    pub async fn write(&self, path: &RemotePath, bytes: &[u8]) -> Result<PathBuf, Error> {
        let local = self.local(path);
        write_file(&local, bytes).await?;
        Ok(local)
    }
}

pub(crate) async fn ensure_parent(path: &Path) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            debug!(path = %parent.display(), "creating directories");
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(parent, e))?;
        }
    }
    Ok(())
}

pub(crate) async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    ensure_parent(path).await?;

    match fs::write(path, bytes).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() != ErrorKind::NotFound && path.exists() => {
            warn!(path = %path.display(), error = %e, "concurrent write to the same file, keeping existing copy");
            Ok(())
        }
        Err(e) => Err(Error::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_names_pad_and_prefix_hemispheres() {
        assert_eq!(
            TileFolder::of(37.62, -122.38),
            TileFolder {
                band10: "w130n30".into(),
                band1: "w123n37".into(),
            }
        );
        assert_eq!(TileFolder::of(47.56, 8.07).path(), "e000n40/e008n47");
        assert_eq!(TileFolder::of(-33.94, 151.17).path(), "e150s40/e151s34");
        assert_eq!(TileFolder::of(-0.5, -0.5).path(), "w010s10/w001s01");
        assert_eq!(TileFolder::of(0.0, 0.0).path(), "e000n00/e000n00");
    }

    #[test]
    fn remote_path_joins_and_normalizes() {
        let model = RemotePath::new("ws2/Models/Power/pylon.xml").unwrap();
        assert_eq!(model.parent().as_str(), "ws2/Models/Power");
        assert_eq!(model.file_name(), "pylon.xml");
        assert_eq!(
            model.sibling("../Textures\\steel.png").unwrap().as_str(),
            "ws2/Models/Textures/steel.png"
        );
        assert_eq!(RemotePath::new("./a//b/").unwrap().as_str(), "a/b");
    }

    #[test]
    fn remote_path_refuses_to_escape() {
        let err = RemotePath::new("ws2").unwrap().join("../../etc/passwd");
        assert!(matches!(err, Err(Error::MalformedRemoteData { .. })));
    }

    #[test]
    fn layout() {
        let storage = Storage::new("/scenery", "/tmp/session", SceneryVersion::Ws2);
        let folder = TileFolder::of(47.56, 8.07);

        assert_eq!(storage.terrain_dir(&folder).as_str(), "ws2/Terrain/e000n40/e008n47");
        assert_eq!(storage.objects_dir(&folder).as_str(), "ws2/Objects/e000n40/e008n47");
        assert_eq!(
            storage.overlay_archive(Overlay::Roads, &folder).as_str(),
            "osm2city/Roads/e000n40/e008n47.txz"
        );
        assert_eq!(
            storage.overlay_dir(Overlay::Trees, &folder).as_str(),
            "osm2city/Trees/e000n40"
        );
        assert_eq!(storage.vpb_archive(&folder).as_str(), "ws2/vpb/e000n40/e008n47.zip");
        assert_eq!(
            storage.local(&storage.orthophoto(&folder, 3_088_961)),
            PathBuf::from("/scenery/Orthophotos/e000n40/e008n47/3088961.dds")
        );
        assert_eq!(
            storage.temp_file("ws2/Terrain/.dirindex"),
            PathBuf::from("/tmp/session/ws2_Terrain_.dirindex")
        );
    }

    #[tokio::test]
    async fn write_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path(), dir.path().join("tmp"), SceneryVersion::Ws2);
        let path = RemotePath::new("ws2/Models/a/b.ac").unwrap();

        let local = storage.write(&path, b"AC3Db").await.unwrap();
        assert_eq!(std::fs::read(&local).unwrap(), b"AC3Db");

        // a second writer of the same content is fine
        storage.write(&path, b"AC3Db").await.unwrap();
    }
}
