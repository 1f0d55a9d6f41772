use image::{GrayImage, ImageBuffer, Luma};

use crate::errors::{LungError, Result};

/// Single-channel intensity raster with values in [0, 1]
pub type GrayF64Image = ImageBuffer<Luma<f64>, Vec<f64>>;

/// Connected-component labels; 0 is background
pub type LabeledImage = ImageBuffer<Luma<u32>, Vec<u32>>;

/// Mask value for airspace pixels
pub const FOREGROUND: u8 = 255;
/// Mask value for tissue/background pixels
pub const BACKGROUND: u8 = 0;

/// Check if a mask pixel is airspace
#[inline]
pub fn is_foreground(pixel: &Luma<u8>) -> bool {
    pixel[0] != BACKGROUND
}

#[inline]
pub fn mask_value(foreground: bool) -> Luma<u8> {
    if foreground {
        Luma([FOREGROUND])
    } else {
        Luma([BACKGROUND])
    }
}

/// Map an out-of-range index back into `0..len` by half-sample symmetric
/// reflection (`d c b a | a b c d | d c b a`), repeating as often as needed.
#[inline]
pub fn reflect_index(index: isize, len: usize) -> usize {
    debug_assert!(len > 0);
    let len = len as isize;
    let period = 2 * len;
    let wrapped = index.rem_euclid(period);
    if wrapped < len {
        wrapped as usize
    } else {
        (period - 1 - wrapped) as usize
    }
}

/// Quantize a [0, 1] intensity to an 8-bit level
#[inline]
pub fn quantize(value: f64) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Convert an intensity raster to 8 bits for display or quantized filtering
pub fn to_gray_u8(image: &GrayF64Image) -> GrayImage {
    let (width, height) = image.dimensions();
    GrayImage::from_fn(width, height, |x, y| Luma([quantize(image.get_pixel(x, y)[0])]))
}

/// Count airspace pixels in a mask
#[cfg(test)]
pub(crate) fn count_foreground(mask: &GrayImage) -> u64 {
    mask.pixels().filter(|p| is_foreground(p)).count() as u64
}

/// Fail unless both rasters have the same dimensions
pub fn ensure_same_dimensions(expected: (u32, u32), found: (u32, u32)) -> Result<()> {
    if expected != found {
        return Err(LungError::DimensionMismatch { expected, found });
    }
    Ok(())
}

/// Build a mask from rows of 0/1 values
#[cfg(test)]
pub(crate) fn mask_from_rows(rows: &[&[u8]]) -> GrayImage {
    let height = rows.len() as u32;
    let width = rows.first().map_or(0, |r| r.len()) as u32;
    GrayImage::from_fn(width, height, |x, y| mask_value(rows[y as usize][x as usize] != 0))
}
