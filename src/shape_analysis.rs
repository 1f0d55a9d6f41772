// src/shape_analysis.rs - Per-airspace area, perimeter and diameter

use std::collections::BTreeMap;
use std::f64::consts::{PI, SQRT_2};

use rayon::prelude::*;

use crate::image_utils::LabeledImage;

/// Measurements for one labeled airspace, in pixel units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AirspaceRecord {
    pub label: u32,
    /// Pixel count, always > 0
    pub area: u64,
    pub perimeter: f64,
    pub equivalent_diameter: f64,
}

/// Diameter of the circle with the same area
pub fn equivalent_diameter(area: f64) -> f64 {
    2.0 * (area / PI).sqrt()
}

/// Weight class of a border pixel code, see [`border_code`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeClass {
    Straight,
    Diagonal,
    Corner,
    Ignored,
}

impl EdgeClass {
    fn from_code(code: u32) -> Self {
        match code {
            5 | 7 | 15 | 17 | 25 | 27 => EdgeClass::Straight,
            21 | 33 => EdgeClass::Diagonal,
            13 | 23 => EdgeClass::Corner,
            _ => EdgeClass::Ignored,
        }
    }
}

/// Running per-label tallies. Edge classes are counted rather than summed
/// so that the parallel reduction is exact.
#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    area: u64,
    straight: u64,
    diagonal: u64,
    corner: u64,
}

impl Tally {
    fn merge(&mut self, other: &Tally) {
        self.area += other.area;
        self.straight += other.straight;
        self.diagonal += other.diagonal;
        self.corner += other.corner;
    }

    fn perimeter(&self) -> f64 {
        self.straight as f64 + self.diagonal as f64 * SQRT_2 + self.corner as f64 * (1.0 + SQRT_2) / 2.0
    }
}

const FOUR_NEIGHBOURS: [(i64, i64); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];
const DIAGONAL_NEIGHBOURS: [(i64, i64); 4] = [(-1, -1), (1, -1), (-1, 1), (1, 1)];

fn label_at(labels: &LabeledImage, x: i64, y: i64) -> u32 {
    let (width, height) = labels.dimensions();
    if x < 0 || y < 0 || x >= i64::from(width) || y >= i64::from(height) {
        return 0;
    }
    labels.get_pixel(x as u32, y as u32)[0]
}

/// A region pixel with at least one 4-neighbour outside its region.
/// Pixels beyond the raster edge count as outside.
fn is_border(labels: &LabeledImage, x: i64, y: i64) -> bool {
    let own = label_at(labels, x, y);
    own != 0
        && FOUR_NEIGHBOURS
            .iter()
            .any(|(dx, dy)| label_at(labels, x + dx, y + dy) != own)
}

/// `1 + 2 * (4-neighbour border pixels) + 10 * (diagonal border pixels)`,
/// counting only neighbours in the same region
fn border_code(labels: &LabeledImage, x: i64, y: i64) -> u32 {
    let own = label_at(labels, x, y);
    let count = |offsets: &[(i64, i64)]| {
        offsets
            .iter()
            .filter(|(dx, dy)| {
                let (nx, ny) = (x + dx, y + dy);
                label_at(labels, nx, ny) == own && is_border(labels, nx, ny)
            })
            .count() as u32
    };
    1 + 2 * count(&FOUR_NEIGHBOURS) + 10 * count(&DIAGONAL_NEIGHBOURS)
}

fn tally_row(labels: &LabeledImage, y: u32) -> BTreeMap<u32, Tally> {
    let mut tallies: BTreeMap<u32, Tally> = BTreeMap::new();
    for x in 0..labels.width() {
        let label = labels.get_pixel(x, y)[0];
        if label == 0 {
            continue;
        }
        let tally = tallies.entry(label).or_default();
        tally.area += 1;

        let (xi, yi) = (i64::from(x), i64::from(y));
        if !is_border(labels, xi, yi) {
            continue;
        }
        match EdgeClass::from_code(border_code(labels, xi, yi)) {
            EdgeClass::Straight => tally.straight += 1,
            EdgeClass::Diagonal => tally.diagonal += 1,
            EdgeClass::Corner => tally.corner += 1,
            EdgeClass::Ignored => {}
        }
    }
    tallies
}

/// Measure every labeled airspace.
///
/// Returns one record per positive label present, ordered by label.
/// Perimeter is the weighted border-pixel estimate: each border pixel's
/// neighbourhood code is weighted 1, sqrt(2) or (1 + sqrt(2)) / 2.
pub fn measure(labels: &LabeledImage) -> Vec<AirspaceRecord> {
    let tallies = (0..labels.height())
        .into_par_iter()
        .map(|y| tally_row(labels, y))
        .reduce(BTreeMap::new, |mut acc, row| {
            for (label, tally) in row {
                acc.entry(label).or_default().merge(&tally);
            }
            acc
        });

    tallies
        .into_iter()
        .map(|(label, tally)| AirspaceRecord {
            label,
            area: tally.area,
            perimeter: tally.perimeter(),
            equivalent_diameter: equivalent_diameter(tally.area as f64),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use image::Luma;

    fn labels_from_rows(rows: &[&[u32]]) -> LabeledImage {
        let height = rows.len() as u32;
        let width = rows[0].len() as u32;
        LabeledImage::from_fn(width, height, |x, y| Luma([rows[y as usize][x as usize]]))
    }

    fn square(size: u32, pad: u32) -> LabeledImage {
        let total = size + 2 * pad;
        LabeledImage::from_fn(total, total, |x, y| {
            let inside = (pad..pad + size).contains(&x) && (pad..pad + size).contains(&y);
            Luma([u32::from(inside)])
        })
    }

    #[test]
    fn equivalent_diameter_of_unit_circle_area() {
        assert_approx_eq!(equivalent_diameter(PI), 2.0, 1e-12);
        assert_approx_eq!(equivalent_diameter(1.0), 1.1283791670955126, 1e-12);
    }

    #[test]
    fn single_pixel_has_zero_perimeter() {
        let records = measure(&square(1, 2));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].area, 1);
        assert_approx_eq!(records[0].perimeter, 0.0, 1e-12);
    }

    #[test]
    fn square_perimeters() {
        assert_approx_eq!(measure(&square(2, 1))[0].perimeter, 4.0, 1e-12);
        assert_approx_eq!(measure(&square(3, 1))[0].perimeter, 8.0, 1e-12);
        assert_approx_eq!(measure(&square(10, 3))[0].perimeter, 36.0, 1e-12);
    }

    #[test]
    fn raster_edge_counts_as_outside() {
        let padded = measure(&square(4, 2))[0];
        let touching = measure(&square(4, 0))[0];
        assert_eq!(padded.area, touching.area);
        assert_approx_eq!(padded.perimeter, touching.perimeter, 1e-12);
    }

    #[test]
    fn diagonal_line_uses_sqrt2_weights() {
        let records = measure(&labels_from_rows(&[
            &[0, 0, 0, 0, 0],
            &[0, 1, 0, 0, 0],
            &[0, 0, 1, 0, 0],
            &[0, 0, 0, 1, 0],
            &[0, 0, 0, 0, 0],
        ]));
        // ends have code 11 (ignored), middle has code 21
        assert_approx_eq!(records[0].perimeter, SQRT_2, 1e-12);
    }

    #[test]
    fn records_are_ordered_by_label_and_regions_kept_apart() {
        let records = measure(&labels_from_rows(&[
            &[2, 2, 0, 1],
            &[2, 2, 0, 1],
            &[0, 0, 0, 1],
        ]));
        assert_eq!(records.iter().map(|r| r.label).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(records[0].area, 3);
        assert_eq!(records[1].area, 4);
        assert_approx_eq!(records[1].perimeter, 4.0, 1e-12);
    }

    #[test]
    fn adjacent_labels_do_not_share_border_codes() {
        let merged = measure(&labels_from_rows(&[&[1, 1, 1, 1], &[1, 1, 1, 1]]));
        let split = measure(&labels_from_rows(&[&[1, 1, 2, 2], &[1, 1, 2, 2]]));
        assert_eq!(split.len(), 2);
        assert_approx_eq!(split[0].perimeter, 4.0, 1e-12);
        assert_approx_eq!(split[1].perimeter, 4.0, 1e-12);
        assert_eq!(merged[0].area, 8);
    }

    #[test]
    fn empty_raster_has_no_records() {
        assert!(measure(&LabeledImage::new(5, 5)).is_empty());
    }
}
