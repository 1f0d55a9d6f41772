use std::path::{Path, PathBuf};
use std::fs;
use image::{DynamicImage, ImageFormat, RgbImage};
use log::info;

use crate::errors::{LungError, Result};

/// Represents an input image with its metadata
pub struct InputImage {
    pub image: DynamicImage,
    pub path: PathBuf,
    /// File name including extension
    pub filename: String,
}

/// Check whether a path has a TIFF extension (case-insensitive)
pub fn is_tif_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            ext == "tif" || ext == "tiff"
        })
        .unwrap_or(false)
}

/// Get all TIFF files from a directory (recursively), sorted by path
pub fn get_tif_files_in_dir<P: AsRef<Path>>(dir_path: P) -> Result<Vec<PathBuf>> {
    let dir_path = dir_path.as_ref();

    if !dir_path.exists() {
        return Err(LungError::InvalidPath(dir_path.to_path_buf()));
    }

    if !dir_path.is_dir() {
        return Err(LungError::Config(format!(
            "{} is not a directory", dir_path.display()
        )));
    }

    let mut tif_files = Vec::new();
    find_tif_files_recursive(dir_path, &mut tif_files)?;
    tif_files.sort();

    Ok(tif_files)
}

/// Helper function to recursively search for TIFF files
fn find_tif_files_recursive(dir_path: &Path, result: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir_path)? {
        let path = entry?.path();

        if path.is_dir() {
            find_tif_files_recursive(&path, result)?;
        } else if path.is_file() {
            if is_tif_file(&path) {
                result.push(path);
            } else {
                info!("{} is not compatible for image processing. Must be .tif", path.display());
            }
        }
    }

    Ok(())
}

/// Decode an image file.
///
/// Decode failures are reported as [`LungError::UnreadableImage`].
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<InputImage> {
    let path = path.as_ref();

    let filename = path.file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| LungError::InvalidPath(path.to_path_buf()))?
        .to_string();

    let image = image::open(path).map_err(|source| LungError::UnreadableImage {
        source,
        path: path.to_path_buf(),
    })?;

    Ok(InputImage {
        image,
        path: path.to_path_buf(),
        filename,
    })
}

/// Save an RGB image as PNG
pub fn save_image<P: AsRef<Path>>(image: &RgbImage, path: P) -> Result<()> {
    image.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}
