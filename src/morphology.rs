use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use log::debug;

use crate::image_utils::{is_foreground, mask_value, LabeledImage, BACKGROUND, FOREGROUND};

/// Pixel count of every component in a labeled raster, indexed by label.
/// Index 0 is the background and always stays 0.
fn component_sizes(labels: &LabeledImage) -> Vec<u64> {
    let max_label = labels.pixels().map(|p| p[0]).max().unwrap_or(0) as usize;
    let mut sizes = vec![0u64; max_label + 1];
    for p in labels.pixels() {
        if p[0] != 0 {
            sizes[p[0] as usize] += 1;
        }
    }
    sizes
}

/// Remove 4-connected airspace components smaller than `min_size` pixels.
///
/// Components of exactly `min_size` pixels are kept.
pub fn remove_small_objects(mask: &GrayImage, min_size: u32) -> GrayImage {
    let labels = connected_components(mask, Connectivity::Four, Luma([BACKGROUND]));
    let sizes = component_sizes(&labels);

    let removed = sizes.iter().skip(1).filter(|&&s| s > 0 && s < u64::from(min_size)).count();
    debug!("Removing {} objects smaller than {} px", removed, min_size);

    let (width, height) = mask.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let label = labels.get_pixel(x, y)[0] as usize;
        mask_value(label != 0 && sizes[label] >= u64::from(min_size))
    })
}

/// Fill 4-connected tissue components smaller than `max_size` pixels.
///
/// Holes touching the raster border are filled like any other hole.
pub fn remove_small_holes(mask: &GrayImage, max_size: u32) -> GrayImage {
    // Label the tissue by treating airspace as the background value.
    let labels = connected_components(mask, Connectivity::Four, Luma([FOREGROUND]));
    let sizes = component_sizes(&labels);

    let filled = sizes.iter().skip(1).filter(|&&s| s > 0 && s < u64::from(max_size)).count();
    debug!("Filling {} holes smaller than {} px", filled, max_size);

    let (width, height) = mask.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        if is_foreground(mask.get_pixel(x, y)) {
            return mask_value(true);
        }
        let label = labels.get_pixel(x, y)[0] as usize;
        mask_value(label != 0 && sizes[label] < u64::from(max_size))
    })
}

/// Drop small airspace fragments, then fill small tissue speckles
pub fn clean(mask: &GrayImage, min_alv_size: u32, max_speckle_size: u32) -> GrayImage {
    let without_objects = remove_small_objects(mask, min_alv_size);
    remove_small_holes(&without_objects, max_speckle_size)
}
