// src/threshold.rs - Adaptive local thresholding

use image::GrayImage;
use rayon::prelude::*;

use crate::config::ThresholdMethod;
use crate::errors::{LungError, Result};
use crate::image_utils::{mask_value, quantize, reflect_index, GrayF64Image};

/// Gaussian kernels are truncated at this many standard deviations
const GAUSSIAN_TRUNCATE: f64 = 4.0;

fn validate_block_size(block_size: u32) -> Result<()> {
    if block_size < 3 || block_size % 2 == 0 {
        return Err(LungError::InvalidParameter(format!(
            "block_size must be odd and >= 3, got {}", block_size
        )));
    }
    Ok(())
}

/// Correlate every line of `data` (row-major, `len` values per line) with
/// `weights`, reflecting at the line ends.
fn correlate_lines(data: &[f64], len: usize, weights: &[f64]) -> Vec<f64> {
    let radius = (weights.len() / 2) as isize;
    let mut out = vec![0.0; data.len()];

    out.par_chunks_mut(len)
        .zip(data.par_chunks(len))
        .for_each(|(out_line, line)| {
            for (i, value) in out_line.iter_mut().enumerate() {
                let mut acc = 0.0;
                for (k, w) in weights.iter().enumerate() {
                    let j = reflect_index(i as isize + k as isize - radius, len);
                    acc += w * line[j];
                }
                *value = acc;
            }
        });

    out
}

/// Box average of every line, reflecting at the line ends.
///
/// Uses a running prefix sum over the reflected line so cost is
/// independent of the window size.
fn box_mean_lines(data: &[f64], len: usize, size: usize) -> Vec<f64> {
    let radius = (size / 2) as isize;
    let mut out = vec![0.0; data.len()];

    out.par_chunks_mut(len)
        .zip(data.par_chunks(len))
        .for_each(|(out_line, line)| {
            let padded_len = len + size - 1;
            let mut prefix = Vec::with_capacity(padded_len + 1);
            prefix.push(0.0);
            let mut running = 0.0;
            for p in 0..padded_len {
                running += line[reflect_index(p as isize - radius, len)];
                prefix.push(running);
            }
            for (i, value) in out_line.iter_mut().enumerate() {
                *value = (prefix[i + size] - prefix[i]) / size as f64;
            }
        });

    out
}

fn transpose(data: &[f64], width: usize, height: usize) -> Vec<f64> {
    let mut out = vec![0.0; data.len()];
    for y in 0..height {
        for x in 0..width {
            out[x * height + y] = data[y * width + x];
        }
    }
    out
}

/// Apply a 1D line filter along rows, then along columns
fn separable<F>(image: &GrayF64Image, filter: F) -> GrayF64Image
where
    F: Fn(&[f64], usize) -> Vec<f64>,
{
    let (width, height) = image.dimensions();
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 {
        return image.clone();
    }

    let rows = filter(image.as_raw().as_slice(), w);
    let columns = filter(transpose(&rows, w, h).as_slice(), h);
    let result = transpose(&columns, h, w);

    // Dimensions are unchanged, so the buffer length always matches.
    GrayF64Image::from_raw(width, height, result)
        .unwrap_or_else(|| GrayF64Image::new(width, height))
}

/// Local mean over a `block_size x block_size` window
pub fn local_mean(image: &GrayF64Image, block_size: u32) -> GrayF64Image {
    let size = block_size as usize;
    separable(image, |data, len| box_mean_lines(data, len, size))
}

/// Normalized Gaussian kernel with `sigma = (block_size - 1) / 6`
pub fn gaussian_kernel(block_size: u32) -> Vec<f64> {
    let sigma = (f64::from(block_size) - 1.0) / 6.0;
    let radius = (GAUSSIAN_TRUNCATE * sigma + 0.5) as isize;
    let weights: Vec<f64> = (-radius..=radius)
        .map(|x| (-0.5 * (x * x) as f64 / (sigma * sigma)).exp())
        .collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// Local Gaussian-weighted average
pub fn local_gaussian(image: &GrayF64Image, block_size: u32) -> GrayF64Image {
    let kernel = gaussian_kernel(block_size);
    separable(image, |data, len| correlate_lines(data, len, &kernel))
}

/// Local median over a `block_size x block_size` window.
///
/// Intensities are quantized to 8 bits and the window histogram is slid
/// along each row, so the result is the median level scaled back to [0, 1].
pub fn local_median(image: &GrayF64Image, block_size: u32) -> GrayF64Image {
    let (width, height) = image.dimensions();
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 {
        return image.clone();
    }

    let levels: Vec<u8> = image.pixels().map(|p| quantize(p[0])).collect();
    let radius = (block_size / 2) as isize;
    let rank = (block_size as usize * block_size as usize) / 2 + 1;

    let rows: Vec<Vec<f64>> = (0..h)
        .into_par_iter()
        .map(|y| {
            let source_rows: Vec<usize> = (-radius..=radius)
                .map(|dy| reflect_index(y as isize + dy, h))
                .collect();
            let column = |x: isize| reflect_index(x, w);

            let mut hist = [0usize; 256];
            for &sy in &source_rows {
                for dx in -radius..=radius {
                    hist[levels[sy * w + column(dx)] as usize] += 1;
                }
            }

            let mut out = Vec::with_capacity(w);
            for x in 0..w as isize {
                if x > 0 {
                    let leaving = column(x - radius - 1);
                    let entering = column(x + radius);
                    for &sy in &source_rows {
                        hist[levels[sy * w + leaving] as usize] -= 1;
                        hist[levels[sy * w + entering] as usize] += 1;
                    }
                }
                out.push(histogram_rank(&hist, rank) as f64 / 255.0);
            }
            out
        })
        .collect();

    let data: Vec<f64> = rows.into_iter().flatten().collect();
    GrayF64Image::from_raw(width, height, data)
        .unwrap_or_else(|| GrayF64Image::new(width, height))
}

/// Smallest level whose cumulative count reaches `rank`
fn histogram_rank(hist: &[usize; 256], rank: usize) -> usize {
    let mut cumulative = 0;
    for (level, &count) in hist.iter().enumerate() {
        cumulative += count;
        if cumulative >= rank {
            return level;
        }
    }
    255
}

/// Per-pixel local statistic for the chosen method
pub fn local_statistic(
    image: &GrayF64Image,
    block_size: u32,
    method: ThresholdMethod,
) -> Result<GrayF64Image> {
    validate_block_size(block_size)?;

    Ok(match method {
        ThresholdMethod::Mean => local_mean(image, block_size),
        ThresholdMethod::Median => local_median(image, block_size),
        ThresholdMethod::Gaussian => local_gaussian(image, block_size),
    })
}

/// Adaptive threshold.
///
/// A pixel is airspace when its intensity exceeds the local statistic minus
/// `offset / 255`. `offset` is in 8-bit intensity units even though `image`
/// is in [0, 1]: pass `5.0` for a margin of five gray levels, not `0.02`.
pub fn threshold(
    image: &GrayF64Image,
    block_size: u32,
    offset: f64,
    method: ThresholdMethod,
) -> Result<GrayImage> {
    let local = local_statistic(image, block_size, method)?;
    let offset = offset / 255.0;
    let (width, height) = image.dimensions();

    Ok(GrayImage::from_fn(width, height, |x, y| {
        let value = image.get_pixel(x, y)[0];
        mask_value(value > local.get_pixel(x, y)[0] - offset)
    }))
}
