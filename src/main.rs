use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use log::{error, info, warn};

use lung_morphometry_lib::config::{ConfigFile, ParameterRecord};
use lung_morphometry_lib::image_io::get_tif_files_in_dir;
use lung_morphometry_lib::output::write_output;
use lung_morphometry_lib::pipeline::{process_batch, RunOptions};
use lung_morphometry_lib::progress::LogObserver;

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about = "Lung histology airspace morphometry")]
struct Args {
    /// Directory containing .tif images (searched recursively)
    #[clap(short, long)]
    images: Option<PathBuf>,

    /// Output directory for the result sheets
    #[clap(short, long, default_value = "output")]
    output: PathBuf,

    /// Path to configuration file
    #[clap(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Save a four-panel preview of every image under <OUTPUT>/preview
    #[clap(long)]
    preview: bool,

    /// Process images one at a time (overrides config)
    #[clap(long)]
    sequential: bool,

    /// Write a configuration file with default values and exit
    #[clap(long, value_name = "FILE")]
    init_config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if let Some(path) = &args.init_config {
        ConfigFile::from(&ParameterRecord::default())
            .save_to_file(path)
            .with_context(|| format!("Failed to write default config to {}", path.display()))?;
        info!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let Some(image_dir) = args.images.clone() else {
        bail!("--images <DIR> is required (or use --init-config <FILE>)");
    };

    let (mut params, warnings) = ParameterRecord::from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    if !warnings.is_empty() {
        warn!("{} configuration value(s) replaced by defaults", warnings.len());
    }
    if args.sequential {
        params.use_parallel = false;
    }

    let start_time = Instant::now();

    let images = get_tif_files_in_dir(&image_dir)
        .with_context(|| format!("Failed to read image directory {}", image_dir.display()))?;
    if images.is_empty() {
        warn!("No .tif images found in {}", image_dir.display());
    }

    fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create output directory {}", args.output.display()))?;

    let options = RunOptions {
        preview_dir: args.preview.then(|| args.output.join("preview")),
    };

    let cancel = AtomicBool::new(false);
    let outcome = process_batch(&images, &params, &options, &LogObserver, &cancel);

    for (path, e) in &outcome.failures {
        error!("{}: {}", path.display(), e);
    }

    let (raw_path, grouped_path) = write_output(&outcome.records, &args.output)
        .with_context(|| format!("Failed to write results to {}", args.output.display()))?;
    info!("Raw data: {}", raw_path.display());
    info!("Grouped averages: {}", grouped_path.display());

    let elapsed = start_time.elapsed();
    info!(
        "Processing completed in {:.2} seconds ({} images, {} failed)",
        elapsed.as_secs_f64(),
        outcome.records.len(),
        outcome.failures.len()
    );

    Ok(())
}
