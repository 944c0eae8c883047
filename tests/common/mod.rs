#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap},
    io::Write,
    path::Path,
    sync::{Arc, Mutex},
};

use terrasync_mirror::{sha1_hex, Config, Error, Fetch, Stages, Tile};

pub const MIRROR: &str = "https://mirror.test/";
pub const IMAGERY: &str = "https://imagery.test/export";

/// An in-memory mirror. Clones share their files and request counters.
#[derive(Clone, Default)]
pub struct MockFetcher {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    prefixes: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl MockFetcher {
    pub fn serve(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.files.lock().unwrap().insert(url.into(), body.into());
    }

    /// Answers every URL starting with `prefix`.
    pub fn serve_prefix(&self, prefix: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.prefixes.lock().unwrap().push((prefix.into(), body.into()));
    }

    /// Serves `path` below the mirror root.
    pub fn serve_remote(&self, path: &str, body: impl Into<Vec<u8>>) {
        self.serve(format!("{MIRROR}{path}"), body);
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn remote_hits(&self, path: &str) -> usize {
        self.hits(&format!("{MIRROR}{path}"))
    }

    pub fn hits_with_prefix(&self, prefix: &str) -> usize {
        self.hits
            .lock()
            .unwrap()
            .iter()
            .filter(|(url, _)| url.starts_with(prefix))
            .map(|(_, n)| n)
            .sum()
    }

    pub fn requested(&self) -> Vec<String> {
        let mut urls: Vec<_> = self.hits.lock().unwrap().keys().cloned().collect();
        urls.sort();
        urls
    }
}

impl Fetch for MockFetcher {
    async fn get(&self, url: &str) -> Result<Vec<u8>, Error> {
        *self.hits.lock().unwrap().entry(url.to_owned()).or_default() += 1;

        if let Some(body) = self.files.lock().unwrap().get(url) {
            return Ok(body.clone());
        }
        self.prefixes
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| url.starts_with(prefix.as_str()))
            .map(|(_, body)| body.clone())
            .ok_or_else(|| Error::NotFound {
                url: url.to_owned(),
            })
    }
}

/// Serves a `.dirindex` for every directory of `files` listing their digests.
pub fn serve_dirindexes(fetcher: &MockFetcher, files: &[(String, Vec<u8>)]) {
    let mut dirs: BTreeMap<&str, String> = BTreeMap::new();
    for (path, body) in files {
        let (dir, name) = path.rsplit_once('/').unwrap();
        let index = dirs
            .entry(dir)
            .or_insert_with(|| format!("version:1\npath:{dir}\n"));
        index.push_str(&format!("f:{name}:{}:{}\n", sha1_hex(body), body.len()));
    }

    for (dir, index) in dirs {
        fetcher.serve_remote(&format!("{dir}/.dirindex"), index);
    }
}

pub fn config(root: &Path) -> Config {
    Config {
        save_root: root.to_owned(),
        mirrors: vec![MIRROR.to_owned()],
        imagery_url: format!(
            "{IMAGERY}?bbox={{xmin}},{{ymin}},{{xmax}},{{ymax}}&size={{width}},{{height}}"
        ),
        concurrency: 4,
        request_retries: 0,
        stages: Stages {
            orthophoto: false,
            objects: true,
            overlays: true,
        },
        ..Config::default()
    }
}

pub fn tile(lat: f64, lon: f64) -> Tile {
    Tile::at(lat, lon).unwrap()
}

/// An xz-compressed tarball of `files`.
pub fn txz(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, body) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, *body).unwrap();
    }

    let mut xz = xz2::write::XzEncoder::new(Vec::new(), 6);
    xz.write_all(&builder.into_inner().unwrap()).unwrap();
    xz.finish().unwrap()
}

/// A solid color JPEG.
pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([40, 120, 60]));
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new(&mut out)
        .encode_image(&image)
        .unwrap();
    out
}
