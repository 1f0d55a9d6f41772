use image::Luma;

use lung_morphometry_lib::statistics::{intercept_lengths, mean_linear_intercept};
use lung_morphometry_lib::{LabeledImage, MeasurementError};

fn raster(rows: &[&[u32]]) -> LabeledImage {
    let height = rows.len() as u32;
    let width = rows[0].len() as u32;
    LabeledImage::from_fn(width, height, |x, y| Luma([rows[y as usize][x as usize]]))
}

#[test]
fn full_image_intercept_is_its_width() {
    let labels = LabeledImage::from_pixel(100, 100, Luma([1]));
    assert_eq!(mean_linear_intercept(&labels).unwrap(), 100.0);
}

#[test]
fn diagonal_runs_of_three() {
    let labels = raster(&[
        &[1, 1, 1, 0, 0, 0, 0, 0, 0, 0],
        &[0, 1, 1, 1, 0, 0, 0, 0, 0, 0],
        &[0, 0, 1, 1, 1, 0, 0, 0, 0, 0],
        &[0, 0, 0, 1, 1, 1, 0, 0, 0, 0],
        &[0, 0, 0, 0, 1, 1, 1, 0, 0, 0],
        &[0, 0, 0, 0, 0, 1, 1, 1, 0, 0],
        &[0, 0, 0, 0, 0, 0, 1, 1, 1, 0],
        &[0, 0, 0, 0, 0, 0, 0, 1, 1, 1],
    ]);
    assert_eq!(mean_linear_intercept(&labels).unwrap(), 3.0);
}

#[test]
fn scattered_runs_of_different_lengths() {
    let labels = raster(&[
        &[1, 1, 0, 0, 0, 0, 0, 0, 0, 0],
        &[1, 1, 1, 1, 0, 0, 0, 0, 0, 1],
        &[1, 1, 1, 1, 1, 1, 0, 0, 0, 0],
        &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
        &[1, 1, 0, 0, 1, 1, 1, 0, 0, 0],
        &[0, 1, 0, 1, 1, 0, 0, 0, 1, 1],
    ]);
    assert_eq!(intercept_lengths(&labels), vec![2, 4, 1, 6, 2, 3, 1, 2, 2]);
    let expected = [2.0, 4.0, 1.0, 6.0, 2.0, 3.0, 1.0, 2.0, 2.0].iter().sum::<f64>() / 9.0;
    assert_eq!(mean_linear_intercept(&labels).unwrap(), expected);
}

#[test]
fn different_labels_count_as_airspace() {
    let labels = raster(&[&[1, 0, 2, 2, 0, 3]]);
    assert_eq!(intercept_lengths(&labels), vec![1, 2, 1]);
}

#[test]
fn no_airspace_has_no_intercept() {
    let labels = LabeledImage::new(8, 8);
    assert_eq!(
        mean_linear_intercept(&labels),
        Err(MeasurementError::EmptyInterceptPool)
    );
}
