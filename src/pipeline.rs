// src/pipeline.rs - Per-image processing and batch orchestration

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use image::{DynamicImage, GenericImageView, GrayImage};
use log::{debug, warn};
use rayon::prelude::*;

use crate::config::ParameterRecord;
use crate::errors::{LungError, Result};
use crate::image_io::load_image;
use crate::image_utils::{ensure_same_dimensions, GrayF64Image, LabeledImage};
use crate::labeling::label;
use crate::metadata::extract_metadata;
use crate::morphology::clean;
use crate::output::ImageResultRecord;
use crate::preprocess::{enhance_contrast, to_grayscale};
use crate::preview::write_preview;
use crate::progress::{ProgressEvent, ProgressObserver, Stage};
use crate::shape_analysis::measure;
use crate::statistics::{aggregate_records, AirspaceStatistics, Calibration};
use crate::threshold::threshold;

/// Every intermediate raster of one image
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub grayscale: GrayF64Image,
    pub enhanced: GrayF64Image,
    pub thresholded: GrayImage,
    /// After small objects are removed and small holes filled
    pub cleaned: GrayImage,
    pub labeled: LabeledImage,
}

/// Options that do not affect the numeric results
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Write a four-panel preview PNG here when set
    pub preview_dir: Option<PathBuf>,
}

/// Results of a batch, in input order
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub records: Vec<ImageResultRecord>,
    pub failures: Vec<(PathBuf, LungError)>,
    pub cancelled: bool,
}

/// Run the raster stages: grayscale, contrast, threshold, cleanup, labeling
pub fn process_raster(
    image: &DynamicImage,
    params: &ParameterRecord,
    path: &Path,
    observer: &dyn ProgressObserver,
) -> Result<ProcessedImage> {
    let stage = |stage: Stage| {
        observer.on_event(&ProgressEvent::StageStarted { path: path.to_path_buf(), stage })
    };
    let dimensions = image.dimensions();

    stage(Stage::Grayscale);
    let grayscale = to_grayscale(image);

    let enhanced = if params.contrast.enabled {
        stage(Stage::ContrastEnhancement);
        enhance_contrast(&grayscale, &params.contrast)
    } else {
        grayscale.clone()
    };

    stage(Stage::Thresholding);
    let thresholded = threshold(&enhanced, params.block_size, params.constant, params.method)?;

    stage(Stage::Cleaning);
    let cleaned = clean(&thresholded, params.min_alv_size, params.max_speckle_size);

    stage(Stage::Labeling);
    let labeled = label(&cleaned);

    ensure_same_dimensions(dimensions, grayscale.dimensions())?;
    ensure_same_dimensions(dimensions, cleaned.dimensions())?;
    ensure_same_dimensions(dimensions, labeled.dimensions())?;

    Ok(ProcessedImage { grayscale, enhanced, thresholded, cleaned, labeled })
}

/// Measure a labeled raster in calibrated units, logging degenerate values
pub fn measure_labels(labeled: &LabeledImage, scale: f64, file_name: &str) -> AirspaceStatistics {
    let records = measure(labeled);
    debug!("{}: {} airspaces", file_name, records.len());

    let stats = aggregate_records(labeled, &records, &Calibration::from_scale(scale));
    for issue in &stats.issues {
        warn!("{}: {}, written as NaN", file_name, issue);
    }
    stats
}

/// Process one image file into a result row
pub fn run(
    image_path: &Path,
    params: &ParameterRecord,
    options: &RunOptions,
    observer: &dyn ProgressObserver,
) -> Result<ImageResultRecord> {
    observer.on_event(&ProgressEvent::StageStarted {
        path: image_path.to_path_buf(),
        stage: Stage::Loading,
    });
    let input = load_image(image_path)?;

    let processed = process_raster(&input.image, params, image_path, observer)?;

    observer.on_event(&ProgressEvent::StageStarted {
        path: image_path.to_path_buf(),
        stage: Stage::Measuring,
    });
    let stats = measure_labels(&processed.labeled, params.scale, &input.filename);
    let (metadata, _warnings) = extract_metadata(&input.path);

    if let Some(preview_dir) = &options.preview_dir {
        observer.on_event(&ProgressEvent::StageStarted {
            path: image_path.to_path_buf(),
            stage: Stage::Preview,
        });
        // Preview failures never drop the record
        if let Err(e) = write_preview(
            preview_dir,
            image_path,
            &processed.grayscale,
            &processed.thresholded,
            &processed.cleaned,
            &processed.labeled,
        ) {
            warn!("{}: preview not written: {}", input.filename, e);
        }
    }

    Ok(ImageResultRecord::new(metadata, params, stats))
}

fn run_reporting(
    path: &Path,
    params: &ParameterRecord,
    options: &RunOptions,
    observer: &dyn ProgressObserver,
    cancel: &AtomicBool,
) -> Option<Result<ImageResultRecord>> {
    if cancel.load(Ordering::SeqCst) {
        return None;
    }

    observer.on_event(&ProgressEvent::ImageStarted { path: path.to_path_buf() });
    let result = run(path, params, options, observer);
    match &result {
        Ok(_) => observer.on_event(&ProgressEvent::ImageFinished { path: path.to_path_buf() }),
        Err(e) => observer.on_event(&ProgressEvent::ImageFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
    }
    Some(result)
}

/// Process every image; failures are collected and never stop the batch.
///
/// `cancel` is checked before each image starts. Images run in parallel
/// unless `params.use_parallel` is off.
pub fn process_batch(
    paths: &[PathBuf],
    params: &ParameterRecord,
    options: &RunOptions,
    observer: &dyn ProgressObserver,
    cancel: &AtomicBool,
) -> BatchOutcome {
    observer.on_event(&ProgressEvent::BatchStarted { total: paths.len() });

    let results: Vec<(PathBuf, Option<Result<ImageResultRecord>>)> = if params.use_parallel {
        paths
            .par_iter()
            .map(|path| (path.clone(), run_reporting(path, params, options, observer, cancel)))
            .collect()
    } else {
        paths
            .iter()
            .map(|path| (path.clone(), run_reporting(path, params, options, observer, cancel)))
            .collect()
    };

    let mut outcome = BatchOutcome::default();
    for (path, result) in results {
        match result {
            Some(Ok(record)) => outcome.records.push(record),
            Some(Err(e)) => outcome.failures.push((path, e)),
            None => outcome.cancelled = true,
        }
    }

    observer.on_event(&ProgressEvent::BatchFinished {
        succeeded: outcome.records.len(),
        failed: outcome.failures.len(),
        cancelled: outcome.cancelled,
    });

    outcome
}
