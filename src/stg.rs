//! Tile manifests (`.stg`) and the resources they pull in.
//!
//! A manifest line names an object placed on the tile. Shared models live
//! under the version root, static ones next to the manifest. A model may be
//! an XML wrapper whose `<path>` names the real model file, and an AC3D model
//! in turn lists the textures it needs.

use crate::error::Error;
use crate::storage::RemotePath;

/// One object line of a manifest. Coordinates and orientation are ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StgEntry {
    /// `OBJECT`: a mesh in the tile's own directory, stored as `{name}.gz`.
    Object(String),
    /// `OBJECT_BASE`: the tile's base mesh.
    Base(String),
    /// `OBJECT_SHARED`: a model relative to the version root.
    Shared(String),
    /// `OBJECT_STATIC`: a model relative to the manifest's directory.
    Static(String),
}

impl StgEntry {
    /// `None` for lines that do not place an object (comments, signs, blank
    /// lines). A known keyword without a path is an error.
    pub fn parse_line(line: &str) -> Option<Result<Self, Error>> {
        let mut tokens = line.split_whitespace();
        let constructor: fn(String) -> StgEntry = match tokens.next()? {
            "OBJECT" => StgEntry::Object,
            "OBJECT_BASE" => StgEntry::Base,
            "OBJECT_SHARED" => StgEntry::Shared,
            "OBJECT_STATIC" => StgEntry::Static,
            _ => return None,
        };

        Some(
            tokens
                .next()
                .map(|path| constructor(path.to_owned()))
                .ok_or_else(|| Error::malformed("stg", format!("missing path in '{}'", line.trim()))),
        )
    }

    pub fn parse(text: &str) -> impl Iterator<Item = Result<StgEntry, Error>> + '_ {
        text.lines().filter_map(StgEntry::parse_line)
    }

    pub fn path(&self) -> &str {
        match self {
            StgEntry::Object(p) | StgEntry::Base(p) | StgEntry::Shared(p) | StgEntry::Static(p) => p,
        }
    }
}

/// A resource discovered while walking a manifest.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Reference {
    /// Fetched as is. AC3D models additionally yield their textures.
    Direct(RemotePath),
    /// A model XML whose `<path>` names the real model.
    IndirectXml(RemotePath),
    /// A texture image, never referencing anything.
    Texture(RemotePath),
}

impl Reference {
    /// Classifies a model path by its extension.
    pub fn model(path: RemotePath) -> Self {
        if path.file_name().to_ascii_lowercase().ends_with(".xml") {
            Reference::IndirectXml(path)
        } else {
            Reference::Direct(path)
        }
    }

    pub fn path(&self) -> &RemotePath {
        match self {
            Reference::Direct(p) | Reference::IndirectXml(p) | Reference::Texture(p) => p,
        }
    }

    /// The references contained in this resource's bytes.
    pub fn children(&self, bytes: &[u8]) -> Result<Vec<Reference>, Error> {
        match self {
            Reference::IndirectXml(xml) => {
                let text = String::from_utf8_lossy(bytes);
                let model = model_path_from_xml(&text).map_err(|reason| Error::malformed(xml.as_str(), reason))?;
                Ok(vec![Reference::Direct(xml.sibling(&model)?)])
            }
            Reference::Direct(model) if is_ac3d(model) => {
                let text = String::from_utf8_lossy(bytes);
                let found: Result<Vec<_>, _> = textures(&text)
                    .map(|texture| model.sibling(texture).map(Reference::Texture))
                    .collect();
                found
            }
            Reference::Direct(_) | Reference::Texture(_) => Ok(Vec::new()),
        }
    }
}

fn is_ac3d(path: &RemotePath) -> bool {
    path.file_name().to_ascii_lowercase().ends_with(".ac")
}

/// The text of the first `<path>` element of a model XML.
pub fn model_path_from_xml(text: &str) -> Result<String, String> {
    let doc = roxmltree::Document::parse(text).map_err(|e| e.to_string())?;

    let path = doc
        .descendants()
        .find(|node| node.has_tag_name("path"))
        .and_then(|node| node.text())
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(str::to_owned);

    path.ok_or_else(|| "no <path> element".to_owned())
}

/// Texture file names listed by an AC3D model, in order of appearance.
pub fn textures(ac: &str) -> impl Iterator<Item = &str> {
    ac.lines()
        .filter_map(|line| line.strip_prefix("texture "))
        .map(|name| name.trim().trim_matches('"'))
        .filter(|name| !name.is_empty())
}
