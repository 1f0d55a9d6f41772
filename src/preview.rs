// src/preview.rs - Four-panel diagnostic image for quality control

use std::path::{Path, PathBuf};

use image::{imageops, GrayImage, Rgb, RgbImage};

use crate::errors::Result;
use crate::image_io::save_image;
use crate::image_utils::{ensure_same_dimensions, to_gray_u8, GrayF64Image, LabeledImage};

/// Display colour of a label; background is black
pub fn label_color(label: u32) -> Rgb<u8> {
    if label == 0 {
        return Rgb([0, 0, 0]);
    }
    let hash = label.wrapping_mul(0x9E37_79B1);
    let channel = |shift: u32| ((hash >> shift) as u8) | 0x40;
    Rgb([channel(24), channel(16), channel(8)])
}

fn gray_to_rgb(gray: &GrayImage) -> RgbImage {
    let (width, height) = gray.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let v = gray.get_pixel(x, y)[0];
        Rgb([v, v, v])
    })
}

fn colorize_labels(labels: &LabeledImage) -> RgbImage {
    let (width, height) = labels.dimensions();
    RgbImage::from_fn(width, height, |x, y| label_color(labels.get_pixel(x, y)[0]))
}

/// Lay out grayscale, thresholded, cleaned and labeled rasters as a 2x2 grid
pub fn compose_preview(
    grayscale: &GrayF64Image,
    thresholded: &GrayImage,
    cleaned: &GrayImage,
    labels: &LabeledImage,
) -> Result<RgbImage> {
    let (width, height) = grayscale.dimensions();
    ensure_same_dimensions((width, height), thresholded.dimensions())?;
    ensure_same_dimensions((width, height), cleaned.dimensions())?;
    ensure_same_dimensions((width, height), labels.dimensions())?;

    let panels = [
        gray_to_rgb(&to_gray_u8(grayscale)),
        gray_to_rgb(thresholded),
        gray_to_rgb(cleaned),
        colorize_labels(labels),
    ];

    let mut canvas = RgbImage::new(width * 2, height * 2);
    for (idx, panel) in panels.iter().enumerate() {
        let x = (idx % 2) as i64 * i64::from(width);
        let y = (idx / 2) as i64 * i64::from(height);
        imageops::replace(&mut canvas, panel, x, y);
    }

    Ok(canvas)
}

/// Path of the preview PNG for an input image
pub fn preview_path(preview_dir: &Path, image_path: &Path) -> PathBuf {
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    preview_dir.join(format!("{}_preview.png", stem))
}

/// Compose the preview and save it under `preview_dir`
pub fn write_preview(
    preview_dir: &Path,
    image_path: &Path,
    grayscale: &GrayF64Image,
    thresholded: &GrayImage,
    cleaned: &GrayImage,
    labels: &LabeledImage,
) -> Result<PathBuf> {
    std::fs::create_dir_all(preview_dir)?;
    let canvas = compose_preview(grayscale, thresholded, cleaned, labels)?;
    let path = preview_path(preview_dir, image_path);
    save_image(&canvas, &path)?;
    Ok(path)
}
