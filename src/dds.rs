//! DXT5 (BC3) texture encoding with a full mipmap chain.
//!
//! Each 4×4 pixel block compresses to 16 bytes: 8 bytes of interpolated
//! alpha followed by a 4-color RGB565 block. Blocks at the right and bottom
//! edge of odd-sized levels repeat their last row and column.

use image::{Rgba, RgbaImage};
use thiserror::Error;

const DDS_MAGIC: &[u8; 4] = b"DDS ";
const HEADER_SIZE: u32 = 124;
const PIXEL_FORMAT_SIZE: u32 = 32;

const DDSD_CAPS: u32 = 0x1;
const DDSD_HEIGHT: u32 = 0x2;
const DDSD_WIDTH: u32 = 0x4;
const DDSD_PIXELFORMAT: u32 = 0x1000;
const DDSD_MIPMAPCOUNT: u32 = 0x20000;
const DDSD_LINEARSIZE: u32 = 0x80000;
const DDPF_FOURCC: u32 = 0x4;
const DDSCAPS_COMPLEX: u32 = 0x8;
const DDSCAPS_TEXTURE: u32 = 0x1000;
const DDSCAPS_MIPMAP: u32 = 0x40_0000;

const BLOCK_BYTES: u32 = 16;

#[derive(Debug, Error, PartialEq)]
pub enum DdsError {
    #[error("cannot encode a {0}x{1} texture")]
    InvalidDimensions(u32, u32),
}

/// Encodes `image` as a DXT5 `.dds` file including all mip levels down to 1×1.
pub fn encode_bc3(image: &RgbaImage) -> Result<Vec<u8>, DdsError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(DdsError::InvalidDimensions(width, height));
    }

    let levels = mip_count(width, height);
    let mut out = header(width, height, levels);

    let mut level = image.clone();
    for i in 0..levels {
        if i > 0 {
            level = downsample(&level);
        }
        compress_level(&level, &mut out);
    }

    Ok(out)
}

/// Number of levels from `width × height` down to 1×1.
pub fn mip_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

fn header(width: u32, height: u32, mip_count: u32) -> Vec<u8> {
    let linear_size = width.div_ceil(4) * height.div_ceil(4) * BLOCK_BYTES;
    let flags = DDSD_CAPS | DDSD_HEIGHT | DDSD_WIDTH | DDSD_PIXELFORMAT | DDSD_MIPMAPCOUNT | DDSD_LINEARSIZE;
    let caps = DDSCAPS_TEXTURE | DDSCAPS_MIPMAP | DDSCAPS_COMPLEX;

    let mut out = Vec::with_capacity(128 + linear_size as usize * 4 / 3 + 64);
    out.extend_from_slice(DDS_MAGIC);
    for field in [HEADER_SIZE, flags, height, width, linear_size, 0, mip_count] {
        out.extend_from_slice(&field.to_le_bytes());
    }
    out.extend_from_slice(&[0; 11 * 4]);

    for field in [PIXEL_FORMAT_SIZE, DDPF_FOURCC] {
        out.extend_from_slice(&field.to_le_bytes());
    }
    out.extend_from_slice(b"DXT5");
    out.extend_from_slice(&[0; 5 * 4]);

    for field in [caps, 0, 0, 0, 0] {
        out.extend_from_slice(&field.to_le_bytes());
    }

    out
}

fn compress_level(image: &RgbaImage, out: &mut Vec<u8>) {
    let (width, height) = image.dimensions();

    for by in (0..height).step_by(4) {
        for bx in (0..width).step_by(4) {
            let mut block = [[0u8; 4]; 16];
            for (i, pixel) in block.iter_mut().enumerate() {
                let x = (bx + i as u32 % 4).min(width - 1);
                let y = (by + i as u32 / 4).min(height - 1);
                *pixel = image.get_pixel(x, y).0;
            }
            out.extend_from_slice(&alpha_block(&block));
            out.extend_from_slice(&color_block(&block));
        }
    }
}

fn alpha_block(pixels: &[[u8; 4]; 16]) -> [u8; 8] {
    let a0 = pixels.iter().map(|p| p[3]).max().unwrap_or(255);
    let a1 = pixels.iter().map(|p| p[3]).min().unwrap_or(255);

    let (w0, w1) = (u16::from(a0), u16::from(a1));
    let palette = [
        a0,
        a1,
        ((6 * w0 + w1) / 7) as u8,
        ((5 * w0 + 2 * w1) / 7) as u8,
        ((4 * w0 + 3 * w1) / 7) as u8,
        ((3 * w0 + 4 * w1) / 7) as u8,
        ((2 * w0 + 5 * w1) / 7) as u8,
        ((w0 + 6 * w1) / 7) as u8,
    ];

    let mut bits = 0u64;
    for (i, pixel) in pixels.iter().enumerate() {
        let index = nearest(palette.iter().map(|&a| u32::from(a.abs_diff(pixel[3]))));
        bits |= (index as u64) << (i * 3);
    }

    let mut block = [0u8; 8];
    block[0] = a0;
    block[1] = a1;
    block[2..].copy_from_slice(&bits.to_le_bytes()[..6]);
    block
}

fn color_block(pixels: &[[u8; 4]; 16]) -> [u8; 8] {
    let mut lo = [255u8; 3];
    let mut hi = [0u8; 3];
    for pixel in pixels {
        for c in 0..3 {
            lo[c] = lo[c].min(pixel[c]);
            hi[c] = hi[c].max(pixel[c]);
        }
    }

    // c0 > c1 selects the opaque four-color mode
    let (c0, c1) = {
        let (a, b) = (to_565(hi), to_565(lo));
        if a >= b { (a, b) } else { (b, a) }
    };

    let (e0, e1) = (from_565(c0), from_565(c1));
    let mix = |w0: u16, w1: u16| -> [u8; 3] {
        [0, 1, 2].map(|c| ((w0 * u16::from(e0[c]) + w1 * u16::from(e1[c])) / 3) as u8)
    };
    let palette = [e0, e1, mix(2, 1), mix(1, 2)];

    let mut bits = 0u32;
    for (i, pixel) in pixels.iter().enumerate() {
        let index = nearest(palette.iter().map(|color| distance(pixel, color)));
        bits |= (index as u32) << (i * 2);
    }

    let mut block = [0u8; 8];
    block[..2].copy_from_slice(&c0.to_le_bytes());
    block[2..4].copy_from_slice(&c1.to_le_bytes());
    block[4..].copy_from_slice(&bits.to_le_bytes());
    block
}

fn nearest(distances: impl Iterator<Item = u32>) -> usize {
    distances
        .enumerate()
        .min_by_key(|&(_, d)| d)
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Squared distance, weighted towards green.
fn distance(pixel: &[u8; 4], color: &[u8; 3]) -> u32 {
    let dr = (i32::from(pixel[0]) - i32::from(color[0])) * 3;
    let dg = (i32::from(pixel[1]) - i32::from(color[1])) * 6;
    let db = i32::from(pixel[2]) - i32::from(color[2]);
    (dr * dr + dg * dg + db * db) as u32
}

fn to_565([r, g, b]: [u8; 3]) -> u16 {
    (u16::from(r >> 3) << 11) | (u16::from(g >> 2) << 5) | u16::from(b >> 3)
}

fn from_565(color: u16) -> [u8; 3] {
    let r = (color >> 11) & 0x1f;
    let g = (color >> 5) & 0x3f;
    let b = color & 0x1f;
    [((r << 3) | (r >> 2)) as u8, ((g << 2) | (g >> 4)) as u8, ((b << 3) | (b >> 2)) as u8]
}

/// Halves both dimensions (never below 1) with a box filter.
fn downsample(image: &RgbaImage) -> RgbaImage {
    let (width, height) = image.dimensions();
    let (nw, nh) = ((width / 2).max(1), (height / 2).max(1));

    RgbaImage::from_fn(nw, nh, |x, y| {
        let xs = [(2 * x).min(width - 1), (2 * x + 1).min(width - 1)];
        let ys = [(2 * y).min(height - 1), (2 * y + 1).min(height - 1)];

        let mut sum = [0u16; 4];
        for &sy in &ys {
            for &sx in &xs {
                let pixel = image.get_pixel(sx, sy);
                for c in 0..4 {
                    sum[c] += u16::from(pixel[c]);
                }
            }
        }
        Rgba(sum.map(|s| (s / 4) as u8))
    })
}
