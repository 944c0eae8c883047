//! Orthophoto textures.
//!
//! The tile's box is reprojected to Web-Mercator and split into a square grid
//! of sub-tiles small enough for one export request each. The downloaded
//! images are stitched south row at the bottom, stretched to a square,
//! passed through a JPEG intermediate and stored as a mip-mapped DXT5 `.dds`.

use std::path::{Path, PathBuf};

use futures::future::try_join_all;
use image::{codecs::jpeg::JpegEncoder, imageops, imageops::FilterType, ImageFormat, RgbImage};
use tracing::{debug, warn};

use crate::bounding_box::{MercatorBounds, TileBounds};
use crate::dds::encode_bc3;
use crate::error::Error;
use crate::http::{Fetch, Remote};
use crate::storage::{write_file, Storage};
use crate::tile::Tile;
use crate::url::ImageryUrl;

const JPEG_QUALITY: u8 = 100;

/// One export request of the grid.
#[derive(Clone, Debug, PartialEq)]
pub struct SubTile {
    /// Row from the south edge.
    pub row: usize,
    /// Column from the west edge.
    pub col: usize,
    pub bbox: MercatorBounds,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrthoPlan {
    /// Edge length of the final square texture.
    pub size: u32,
    pub per_side: usize,
    pub sub_tiles: Vec<SubTile>,
}

impl OrthoPlan {
    /// Pixel size of the stitched mosaic before it is squared.
    pub fn mosaic_size(&self) -> (u32, u32) {
        match self.sub_tiles.first() {
            Some(first) => (first.width * self.per_side as u32, first.height * self.per_side as u32),
            None => (0, 0),
        }
    }
}

/// Splits the tile into `per_side²` requests of at most `max_sub_tile`
/// pixels wide. Each request keeps the Mercator aspect of its cell.
pub fn plan(bounds: &TileBounds, size: u32, max_sub_tile: u32) -> OrthoPlan {
    let size = size.max(1);
    let per_side = size.div_ceil(max_sub_tile.max(1)).max(1) as usize;
    let mercator = bounds.to_mercator();

    let width = (size / per_side as u32).max(1);
    let cells = mercator.split(per_side);
    let aspect = match cells.first() {
        Some(cell) if cell.width() > 0.0 => cell.height() / cell.width(),
        _ => 1.0,
    };
    let height = ((aspect * f64::from(width)).round() as u32).max(1);

    let sub_tiles = cells
        .into_iter()
        .enumerate()
        .map(|(i, bbox)| SubTile {
            row: i / per_side,
            col: i % per_side,
            bbox,
            width,
            height,
        })
        .collect();

    OrthoPlan {
        size,
        per_side,
        sub_tiles,
    }
}

/// Places each sub-tile image in the mosaic. Row 0 is the southernmost and
/// ends up at the bottom. Images of the wrong size are resized first.
pub fn stitch(plan: &OrthoPlan, images: Vec<RgbImage>) -> RgbImage {
    let (width, height) = plan.mosaic_size();
    let mut mosaic = RgbImage::new(width, height);

    for (sub, image) in plan.sub_tiles.iter().zip(images) {
        let image = if image.dimensions() == (sub.width, sub.height) {
            image
        } else {
            imageops::resize(&image, sub.width, sub.height, FilterType::Triangle)
        };

        let x = sub.col as u32 * sub.width;
        let y = (plan.per_side - 1 - sub.row) as u32 * sub.height;
        imageops::replace(&mut mosaic, &image, i64::from(x), i64::from(y));
    }

    mosaic
}

/// Stretches `image` to `size × size`.
pub fn to_square(image: RgbImage, size: u32) -> RgbImage {
    if image.dimensions() == (size, size) {
        image
    } else {
        imageops::resize(&image, size, size, FilterType::Triangle)
    }
}

/// Downloads, assembles and encodes the orthophoto of `tile`, returning the
/// local path of the `.dds`.
pub async fn fetch_orthophoto<F: Fetch>(
    remote: &Remote<F>,
    storage: &Storage,
    imagery: &ImageryUrl,
    tile: &Tile,
    size: u32,
    max_sub_tile: u32,
) -> Result<PathBuf, Error> {
    let plan = plan(&tile.bounds, size, max_sub_tile);
    debug!(tile = tile.index, requests = plan.sub_tiles.len(), "fetching orthophoto");

    let parts: Vec<PathBuf> = plan
        .sub_tiles
        .iter()
        .map(|sub| storage.temp_file(&format!("ortho_{}_{}_{}.jpg", tile.index, sub.row, sub.col)))
        .collect();
    let intermediate = storage.temp_file(&format!("ortho_{}.jpg", tile.index));

    let result = async {
        try_join_all(plan.sub_tiles.iter().zip(&parts).map(|(sub, part)| async move {
            let url = imagery.export_url(&sub.bbox, sub.width, sub.height)?;
            let bytes = remote.get_url(&url).await?;
            write_file(part, &bytes).await
        }))
        .await?;

        let dds = tokio::task::spawn_blocking({
            let parts = parts.clone();
            let intermediate = intermediate.clone();
            move || assemble(&plan, &parts, &intermediate)
        })
        .await??;

        storage.write(&storage.orthophoto(&tile.folder, tile.index), &dds).await
    }
    .await;

    for path in parts.iter().chain(Some(&intermediate)) {
        remove_temp(path).await;
    }

    result
}

fn assemble(plan: &OrthoPlan, parts: &[PathBuf], intermediate: &Path) -> Result<Vec<u8>, Error> {
    let images = parts
        .iter()
        .map(|part| -> Result<RgbImage, Error> {
            let bytes = std::fs::read(part).map_err(|e| Error::io(part, e))?;
            Ok(image::load_from_memory(&bytes)?.to_rgb8())
        })
        .collect::<Result<Vec<_>, Error>>()?;

    let square = to_square(stitch(plan, images), plan.size);

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode_image(&square)?;
    std::fs::write(intermediate, &jpeg).map_err(|e| Error::io(intermediate, e))?;

    let decoded = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)?.to_rgba8();
    Ok(encode_bc3(&decoded)?)
}

async fn remove_temp(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed removing temporary file");
        }
    }
}
