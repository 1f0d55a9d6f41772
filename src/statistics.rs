// src/statistics.rs - Airspace statistics in calibrated units

use crate::errors::MeasurementError;
use crate::image_utils::LabeledImage;
use crate::shape_analysis::{measure, AirspaceRecord};

pub type MeasureResult<T> = std::result::Result<T, MeasurementError>;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population variance (divides by n)
pub fn variance(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    Some(values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64)
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> Option<f64> {
    variance(values).map(f64::sqrt)
}

/// Population (biased) skewness; 0 when the variance is 0
pub fn skewness(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let n = values.len() as f64;
    let m2 = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
    if m2 == 0.0 {
        return Some(0.0);
    }
    let m3 = values.iter().map(|v| (v - m).powi(3)).sum::<f64>() / n;
    Some(m3 / m2.powf(1.5))
}

/// Lengths of every maximal run of airspace (non-zero) pixels, row by row
pub fn intercept_lengths(labels: &LabeledImage) -> Vec<u64> {
    let mut lengths = Vec::new();
    for row in labels.rows() {
        let mut run = 0u64;
        for pixel in row {
            if pixel[0] != 0 {
                run += 1;
            } else if run > 0 {
                lengths.push(run);
                run = 0;
            }
        }
        if run > 0 {
            lengths.push(run);
        }
    }
    lengths
}

/// Mean linear intercept in pixels
pub fn mean_linear_intercept(labels: &LabeledImage) -> MeasureResult<f64> {
    let lengths = intercept_lengths(labels);
    if lengths.is_empty() {
        return Err(MeasurementError::EmptyInterceptPool);
    }
    Ok(lengths.iter().sum::<u64>() as f64 / lengths.len() as f64)
}

/// Airspace and tissue pixel areas of a labeled raster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpansionIndex {
    /// Columns
    pub width: u32,
    /// Rows
    pub height: u32,
    pub airspace_area: u64,
    pub tissue_area: u64,
}

impl ExpansionIndex {
    /// Airspace to tissue ratio in percent
    pub fn exp(&self) -> MeasureResult<f64> {
        if self.tissue_area == 0 {
            return Err(MeasurementError::NoTissue);
        }
        Ok(self.airspace_area as f64 / self.tissue_area as f64 * 100.0)
    }
}

pub fn expansion_index(labels: &LabeledImage) -> ExpansionIndex {
    let (width, height) = labels.dimensions();
    let total = u64::from(width) * u64::from(height);
    let airspace_area = labels.pixels().filter(|p| p[0] != 0).count() as u64;
    ExpansionIndex {
        width,
        height,
        airspace_area,
        tissue_area: total - airspace_area,
    }
}

/// Size-heterogeneity indices of the equivalent diameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DIndices {
    pub d0: f64,
    pub d1: f64,
    pub d2: f64,
}

impl DIndices {
    fn scaled(self, factor: f64) -> Self {
        DIndices { d0: self.d0 * factor, d1: self.d1 * factor, d2: self.d2 * factor }
    }
}

pub fn d_indices(diameters: &[f64]) -> MeasureResult<DIndices> {
    let (d0, var, skew) = match (mean(diameters), variance(diameters), skewness(diameters)) {
        (Some(m), Some(v), Some(s)) => (m, v, s),
        _ => return Err(MeasurementError::NoObjects),
    };

    let d1 = d0 * (1.0 + var / d0.powi(2));
    let d2 = d0 * (1.0 + (var / (d0.powi(2) + var)) * (2.0 + (var.sqrt() * skew) / d0));
    Ok(DIndices { d0, d1, d2 })
}

/// Pixel to micrometre conversion factors
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub um: f64,
    pub sq_um: f64,
}

impl Calibration {
    /// `scale` is in px/um and must be > 0
    pub fn from_scale(scale: f64) -> Self {
        let um = 1.0 / scale;
        Calibration { um, sq_um: um * um }
    }

    pub fn linear(&self, pixels: f64) -> f64 {
        pixels * self.um
    }

    pub fn area(&self, pixels: f64) -> f64 {
        pixels * self.sq_um
    }
}

/// Every per-image statistic, calibrated. Undefined values are NaN and
/// the reason is listed in `issues`.
#[derive(Debug, Clone, PartialEq)]
pub struct AirspaceStatistics {
    pub image_width: f64,
    pub image_height: f64,
    pub obj_num: usize,
    pub mean_area: f64,
    pub stdev_area: f64,
    pub mean_diameter: f64,
    pub mean_perimeter: f64,
    pub total_airspace_area: f64,
    pub total_tissue_area: f64,
    pub exp: f64,
    pub lm: f64,
    pub d0: f64,
    pub d1: f64,
    pub d2: f64,
    pub issues: Vec<MeasurementError>,
}

/// Compute all statistics for a labeled raster
pub fn aggregate(labels: &LabeledImage, calibration: &Calibration) -> AirspaceStatistics {
    let records = measure(labels);
    aggregate_records(labels, &records, calibration)
}

/// Same as [`aggregate`] with precomputed airspace records
pub fn aggregate_records(
    labels: &LabeledImage,
    records: &[AirspaceRecord],
    calibration: &Calibration,
) -> AirspaceStatistics {
    let mut issues = Vec::new();
    let mut settle = |value: MeasureResult<f64>| {
        value.unwrap_or_else(|err| {
            if !issues.contains(&err) {
                issues.push(err);
            }
            f64::NAN
        })
    };

    let areas: Vec<f64> = records.iter().map(|r| r.area as f64).collect();
    let diameters: Vec<f64> = records.iter().map(|r| r.equivalent_diameter).collect();
    let perimeters: Vec<f64> = records.iter().map(|r| r.perimeter).collect();
    let nan = f64::NAN;

    let expansion = expansion_index(labels);
    let exp = settle(expansion.exp());
    let lm = settle(mean_linear_intercept(labels).map(|v| calibration.linear(v)));
    let d = match d_indices(&diameters) {
        Ok(d) => d.scaled(calibration.um),
        Err(err) => {
            let nan_d = DIndices { d0: nan, d1: nan, d2: nan };
            settle(Err(err));
            nan_d
        }
    };

    AirspaceStatistics {
        image_width: calibration.linear(f64::from(expansion.width)),
        image_height: calibration.linear(f64::from(expansion.height)),
        obj_num: records.len(),
        mean_area: mean(&areas).map_or(nan, |v| calibration.area(v)),
        stdev_area: std_dev(&areas).map_or(nan, |v| calibration.area(v)),
        mean_diameter: mean(&diameters).map_or(nan, |v| calibration.linear(v)),
        mean_perimeter: mean(&perimeters).map_or(nan, |v| calibration.linear(v)),
        total_airspace_area: calibration.area(expansion.airspace_area as f64),
        total_tissue_area: calibration.area(expansion.tissue_area as f64),
        exp,
        lm,
        d0: d.d0,
        d1: d.d1,
        d2: d.d2,
        issues,
    }
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

    #[test]
    fn moments() {
        let values = [1.0, 2.0, 3.0, 10.0];
        assert_approx_eq!(mean(&values).unwrap(), 4.0, 1e-12);
        assert_approx_eq!(variance(&values).unwrap(), 12.5, 1e-12);
        assert_approx_eq!(std_dev(&values).unwrap(), 12.5f64.sqrt(), 1e-12);
        // m3 = (-27 - 8 - 1 + 216) / 4 = 45
        assert_approx_eq!(skewness(&values).unwrap(), 45.0 / 12.5f64.powf(1.5), 1e-12);
        assert!(mean(&[]).is_none());
    }

    #[test]
    fn intercepts_per_row() {
        let labels = labels_from_rows(&[
            &[1, 1, 0, 2],
            &[0, 0, 0, 0],
            &[3, 3, 3, 3],
        ]);
        assert_eq!(intercept_lengths(&labels), vec![2, 1, 4]);
        assert_approx_eq!(mean_linear_intercept(&labels).unwrap(), 7.0 / 3.0, 1e-12);
    }

    #[test]
    fn empty_intercept_pool_is_an_error() {
        let labels = LabeledImage::new(4, 4);
        assert_eq!(mean_linear_intercept(&labels), Err(MeasurementError::EmptyInterceptPool));
    }

    #[test]
    fn expansion_uses_columns_for_width() {
        let labels = labels_from_rows(&[&[1, 1, 0], &[0, 0, 0]]);
        let e = expansion_index(&labels);
        assert_eq!((e.width, e.height), (3, 2));
        assert_eq!((e.airspace_area, e.tissue_area), (2, 4));
        assert_approx_eq!(e.exp().unwrap(), 50.0, 1e-12);
    }

    #[test]
    fn all_airspace_has_no_tissue() {
        let labels = LabeledImage::from_pixel(3, 3, Luma([1]));
        assert_eq!(expansion_index(&labels).exp(), Err(MeasurementError::NoTissue));
    }

    #[test]
    fn d_indices_without_spread_collapse_to_mean() {
        let d = d_indices(&[4.0, 4.0, 4.0]).unwrap();
        assert_approx_eq!(d.d0, 4.0, 1e-12);
        assert_approx_eq!(d.d1, 4.0, 1e-12);
        assert_approx_eq!(d.d2, 4.0, 1e-12);

        let single = d_indices(&[2.5]).unwrap();
        assert_eq!((single.d0, single.d1, single.d2), (2.5, 2.5, 2.5));
    }

    #[test]
    fn d_indices_formulas() {
        // mean 2, var 2/3, skew 0
        let d = d_indices(&[1.0, 2.0, 3.0]).unwrap();
        let var = 2.0 / 3.0;
        assert_approx_eq!(d.d0, 2.0, 1e-12);
        assert_approx_eq!(d.d1, 2.0 * (1.0 + var / 4.0), 1e-12);
        assert_approx_eq!(d.d2, 2.0 * (1.0 + (var / (4.0 + var)) * 2.0), 1e-12);
        assert!(d.d0 <= d.d1 && d.d1 <= d.d2);
    }

    #[test]
    fn d2_includes_the_skew_term() {
        // mean 3, var 14/3, third central moment 6, so sqrt(var) * skew = 9/7
        let d = d_indices(&[1.0, 2.0, 6.0]).unwrap();
        assert_approx_eq!(d.d0, 3.0, 1e-12);
        assert_approx_eq!(d.d1, 41.0 / 9.0, 1e-12);
        // 3 * (1 + 14/41 * (2 + 3/7))
        assert_approx_eq!(d.d2, 225.0 / 41.0, 1e-12);
    }

    #[test]
    fn empty_diameters_have_no_indices() {
        assert_eq!(d_indices(&[]), Err(MeasurementError::NoObjects));
    }

    #[test]
    fn calibration_scales_linear_and_area() {
        let c = Calibration::from_scale(2.0);
        assert_approx_eq!(c.linear(10.0), 5.0, 1e-12);
        assert_approx_eq!(c.area(10.0), 2.5, 1e-12);
    }

    #[test]
    fn aggregate_reports_calibrated_values() {
        let labels = labels_from_rows(&[
            &[1, 1, 0, 2],
            &[1, 1, 0, 0],
        ]);
        let stats = aggregate(&labels, &Calibration::from_scale(2.0));
        assert_eq!(stats.obj_num, 2);
        assert_approx_eq!(stats.image_width, 2.0, 1e-12);
        assert_approx_eq!(stats.image_height, 1.0, 1e-12);
        assert_approx_eq!(stats.mean_area, 2.5 / 4.0, 1e-12);
        assert_approx_eq!(stats.stdev_area, 1.5 / 4.0, 1e-12);
        assert_approx_eq!(stats.total_airspace_area, 5.0 / 4.0, 1e-12);
        assert_approx_eq!(stats.total_tissue_area, 3.0 / 4.0, 1e-12);
        assert_approx_eq!(stats.exp, 5.0 / 3.0 * 100.0, 1e-9);
        // runs: [2, 1], [2]
        assert_approx_eq!(stats.lm, 5.0 / 3.0 / 2.0, 1e-12);
        assert!(stats.issues.is_empty());
    }

    #[test]
    fn exp_does_not_depend_on_scale() {
        let labels = labels_from_rows(&[&[1, 0, 1], &[1, 0, 0]]);
        let a = aggregate(&labels, &Calibration::from_scale(1.0));
        let b = aggregate(&labels, &Calibration::from_scale(3.7));
        assert_eq!(a.exp, b.exp);
        assert_approx_eq!(a.lm / 3.7, b.lm, 1e-12);
        assert_approx_eq!(a.mean_area / (3.7 * 3.7), b.mean_area, 1e-12);
    }

    #[test]
    fn empty_raster_yields_nan_with_issues() {
        let stats = aggregate(&LabeledImage::new(4, 3), &Calibration::from_scale(1.0));
        assert_eq!(stats.obj_num, 0);
        assert!(stats.mean_area.is_nan());
        assert!(stats.lm.is_nan());
        assert!(stats.d2.is_nan());
        assert_approx_eq!(stats.exp, 0.0, 1e-12);
        assert_eq!(
            stats.issues,
            vec![MeasurementError::EmptyInterceptPool, MeasurementError::NoObjects]
        );
    }
}
