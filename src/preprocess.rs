// src/preprocess.rs - Grayscale conversion and CLAHE contrast enhancement

use image::{DynamicImage, GenericImageView, Luma};
use rayon::prelude::*;

use crate::config::ContrastSettings;
use crate::image_utils::{quantize, GrayF64Image};

/// Luminance weights for R, G and B (ITU-R BT.709 primaries)
pub const LUMA_WEIGHTS: [f64; 3] = [0.2125, 0.7154, 0.0721];

/// Histogram resolution used by contrast enhancement
pub const CLAHE_BINS: usize = 256;

#[inline]
fn luminance(r: f64, g: f64, b: f64) -> f64 {
    LUMA_WEIGHTS[0] * r + LUMA_WEIGHTS[1] * g + LUMA_WEIGHTS[2] * b
}

/// Convert a decoded image to luminance in [0, 1].
///
/// Channels are normalized by their type's maximum before weighting.
/// Single-channel images are only normalized; alpha is ignored.
pub fn to_grayscale(image: &DynamicImage) -> GrayF64Image {
    let (width, height) = image.dimensions();

    match image {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageLumaA8(_) => {
            let gray = image.to_luma8();
            GrayF64Image::from_fn(width, height, |x, y| {
                Luma([f64::from(gray.get_pixel(x, y)[0]) / 255.0])
            })
        }
        DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA16(_) => {
            let gray = image.to_luma16();
            GrayF64Image::from_fn(width, height, |x, y| {
                Luma([f64::from(gray.get_pixel(x, y)[0]) / 65535.0])
            })
        }
        DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgba16(_) => {
            let rgb = image.to_rgb16();
            GrayF64Image::from_fn(width, height, |x, y| {
                let p = rgb.get_pixel(x, y);
                Luma([luminance(
                    f64::from(p[0]) / 65535.0,
                    f64::from(p[1]) / 65535.0,
                    f64::from(p[2]) / 65535.0,
                )])
            })
        }
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            let rgb = image.to_rgb32f();
            GrayF64Image::from_fn(width, height, |x, y| {
                let p = rgb.get_pixel(x, y);
                Luma([luminance(f64::from(p[0]), f64::from(p[1]), f64::from(p[2]))])
            })
        }
        _ => {
            let rgb = image.to_rgb8();
            GrayF64Image::from_fn(width, height, |x, y| {
                let p = rgb.get_pixel(x, y);
                Luma([luminance(
                    f64::from(p[0]) / 255.0,
                    f64::from(p[1]) / 255.0,
                    f64::from(p[2]) / 255.0,
                )])
            })
        }
    }
}

/// Position of a pixel between two tile centres
#[derive(Debug, Clone, Copy, PartialEq)]
struct TileBlend {
    lower: usize,
    upper: usize,
    /// Weight of `upper`
    weight: f64,
}

/// Tile boundaries along one axis; tile `i` spans `bounds[i]..bounds[i + 1]`
fn tile_bounds(len: usize, tiles: usize) -> Vec<usize> {
    (0..=tiles).map(|i| i * len / tiles).collect()
}

fn tile_blend(position: usize, bounds: &[usize]) -> TileBlend {
    let tiles = bounds.len() - 1;
    let centre = |i: usize| (bounds[i] + bounds[i + 1] - 1) as f64 / 2.0;
    let p = position as f64;

    if p <= centre(0) {
        return TileBlend { lower: 0, upper: 0, weight: 0.0 };
    }
    if p >= centre(tiles - 1) {
        return TileBlend { lower: tiles - 1, upper: tiles - 1, weight: 0.0 };
    }

    let mut lower = 0;
    while lower + 1 < tiles - 1 && centre(lower + 1) <= p {
        lower += 1;
    }
    let (c0, c1) = (centre(lower), centre(lower + 1));
    TileBlend { lower, upper: lower + 1, weight: (p - c0) / (c1 - c0) }
}

/// Clip a histogram at `limit` and spread the excess evenly over all bins
fn clip_histogram(hist: &mut [u64; CLAHE_BINS], limit: u64) {
    let mut excess = 0;
    for count in hist.iter_mut() {
        if *count > limit {
            excess += *count - limit;
            *count = limit;
        }
    }

    let per_bin = excess / CLAHE_BINS as u64;
    let remainder = (excess % CLAHE_BINS as u64) as usize;
    for count in hist.iter_mut() {
        *count += per_bin;
    }
    if remainder > 0 {
        let step = (CLAHE_BINS / remainder).max(1);
        for idx in (0..CLAHE_BINS).step_by(step).take(remainder) {
            hist[idx] += 1;
        }
    }
}

/// Normalized cumulative histogram: bin -> output intensity in [0, 1]
fn cumulative_mapping(hist: &[u64; CLAHE_BINS], total: u64) -> Vec<f64> {
    let mut running = 0;
    hist.iter()
        .map(|&count| {
            running += count;
            running as f64 / total as f64
        })
        .collect()
}

#[inline]
fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Contrast-limited adaptive histogram equalization.
///
/// The raster is split into a `tiles x tiles` grid (fewer when the image is
/// smaller than the grid). Each tile's 256-bin histogram is clipped at
/// `clip_limit * tile_pixels` (at least 1), the excess is redistributed, and
/// the normalized cumulative histogram becomes the tile's mapping. Every
/// pixel blends the mappings of its four nearest tile centres bilinearly;
/// pixels outside the outermost centres use the nearest tile.
pub fn enhance_contrast(gray: &GrayF64Image, settings: &ContrastSettings) -> GrayF64Image {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return gray.clone();
    }

    let (w, h) = (width as usize, height as usize);
    let tiles_x = settings.tiles.clamp(1, width) as usize;
    let tiles_y = settings.tiles.clamp(1, height) as usize;
    let x_bounds = tile_bounds(w, tiles_x);
    let y_bounds = tile_bounds(h, tiles_y);

    let levels: Vec<u8> = gray.pixels().map(|p| quantize(p[0])).collect();

    let mappings: Vec<Vec<f64>> = (0..tiles_x * tiles_y)
        .into_par_iter()
        .map(|tile| {
            let (ty, tx) = (tile / tiles_x, tile % tiles_x);
            let mut hist = [0u64; CLAHE_BINS];
            for y in y_bounds[ty]..y_bounds[ty + 1] {
                for x in x_bounds[tx]..x_bounds[tx + 1] {
                    hist[levels[y * w + x] as usize] += 1;
                }
            }

            let total = ((y_bounds[ty + 1] - y_bounds[ty]) * (x_bounds[tx + 1] - x_bounds[tx])) as u64;
            let limit = ((settings.clip_limit * total as f64).floor() as u64).max(1);
            clip_histogram(&mut hist, limit);
            cumulative_mapping(&hist, total)
        })
        .collect();

    let x_blend: Vec<TileBlend> = (0..w).map(|x| tile_blend(x, &x_bounds)).collect();
    let y_blend: Vec<TileBlend> = (0..h).map(|y| tile_blend(y, &y_bounds)).collect();
    let map = |ty: usize, tx: usize, level: usize| mappings[ty * tiles_x + tx][level];

    GrayF64Image::from_fn(width, height, |x, y| {
        let bx = x_blend[x as usize];
        let by = y_blend[y as usize];
        let level = levels[y as usize * w + x as usize] as usize;

        let top = lerp(map(by.lower, bx.lower, level), map(by.lower, bx.upper, level), bx.weight);
        let bottom = lerp(map(by.upper, bx.lower, level), map(by.upper, bx.upper, level), bx.weight);
        Luma([lerp(top, bottom, by.weight)])
    })
}
