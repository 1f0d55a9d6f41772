use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::image_utils::{LabeledImage, BACKGROUND};

/// Label 8-connected airspace components.
///
/// Background is 0; every airspace gets a positive label. The result
/// only depends on the mask.
pub fn label(mask: &GrayImage) -> LabeledImage {
    connected_components(mask, Connectivity::Eight, Luma([BACKGROUND]))
}
