// src/lib.rs - Library interface for lung airspace morphometry

pub mod config;
pub mod errors;
pub mod image_io;
pub mod image_utils;
pub mod labeling;
pub mod metadata;
pub mod morphology;
pub mod output;
pub mod pipeline;
pub mod preprocess;
pub mod preview;
pub mod progress;
pub mod shape_analysis;
pub mod statistics;
pub mod threshold;

// Re-export commonly used types and functions
pub use config::{ConfigFile, ConfigWarning, ContrastSettings, ParameterRecord, ThresholdMethod};
pub use errors::{LungError, MeasurementError, Result};
pub use image_io::{get_tif_files_in_dir, load_image, InputImage};
pub use image_utils::{GrayF64Image, LabeledImage};
pub use metadata::{extract_metadata, FileMetadata, MetadataWarning};
pub use output::{
    group_and_summarize, write_grouped_csv, write_output, write_raw_csv, GroupedRow,
    ImageResultRecord, GROUPED_COLUMNS, RESULT_COLUMNS,
};
pub use pipeline::{process_batch, process_raster, run, BatchOutcome, ProcessedImage, RunOptions};
pub use progress::{LogObserver, NoopObserver, ProgressEvent, ProgressObserver, Stage};

// Re-export the individual stages
pub use labeling::label;
pub use morphology::{clean, remove_small_holes, remove_small_objects};
pub use preprocess::{enhance_contrast, to_grayscale};
pub use shape_analysis::{equivalent_diameter, measure, AirspaceRecord};
pub use statistics::{
    aggregate, d_indices, expansion_index, mean_linear_intercept, AirspaceStatistics,
    Calibration, DIndices, ExpansionIndex,
};
pub use threshold::threshold;
