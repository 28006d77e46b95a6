//! Bactquant: batch quantification of bacteria in 3D fluorescence stacks.
//!
//! Bactquant walks a folder of multi-channel microscopy stacks and, for
//! each file, smooths the segmentation channel, runs an external Omnipose
//! model to label individual bacteria, drops objects below a calibrated
//! volume threshold or touching the lateral image borders, and measures
//! mean/median GFP and mCherry intensity per surviving object. Results
//! accumulate into one CSV, with a 3D ROI artifact per object for manual
//! review.
//!
//! # Modules
//!
//! - [`config`]: run parameters, prompting, and validation
//! - [`files`]: input enumeration with natural sort
//! - [`io_tiff`]: the volume reading/writing boundary
//! - [`preprocess`]: per-slice median filtering
//! - [`segment`]: the external segmentation boundary
//! - [`objects`]: volume/border filtering of label volumes
//! - [`measure`]: per-object intensity statistics
//! - [`export`]: CSV table and ROI artifacts
//! - [`pipeline`]: the sequential batch loop
//! - [`report`]: end-of-run summary
//! - [`error`]: error types for bactquant operations

pub mod config;
pub mod error;
pub mod export;
pub mod files;
pub mod io_tiff;
pub mod measure;
pub mod objects;
pub mod pipeline;
pub mod preprocess;
pub mod report;
pub mod segment;
pub mod volume;

use std::path::PathBuf;

use clap::Parser;

use config::RunConfig;
pub use error::BactquantError;
use segment::OmniposeRunner;

/// The bactquant CLI application.
///
/// Every parameter can be given as a flag; anything missing is asked for
/// interactively unless `--non-interactive` is set.
#[derive(Parser)]
#[command(name = "bactquant")]
#[command(version, author, about)]
struct Cli {
    /// Folder containing the images to process.
    #[arg(long)]
    input: Option<PathBuf>,

    /// File extension to look for (e.g. 'tif').
    #[arg(long)]
    extension: Option<String>,

    /// Minimum object volume, in calibrated units cubed.
    #[arg(long)]
    min_volume: Option<f64>,

    /// Expected bacteria diameter, in calibrated units.
    #[arg(long)]
    diameter: Option<f64>,

    /// Path to the conda environment with the Omnipose model.
    #[arg(long)]
    omnipose_env: Option<PathBuf>,

    /// Output folder (defaults to the input folder).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Never prompt; fail if a required flag is missing.
    #[arg(long)]
    non_interactive: bool,
}

/// Run the bactquant CLI.
///
/// This is the main entry point, called from `main.rs`.
pub fn run() -> Result<(), BactquantError> {
    let cli = Cli::parse();
    let config = collect_config(&cli)?;

    let segmenter = OmniposeRunner::new(&config)?;
    let report = pipeline::run_batch(&config, &segmenter)?;

    print!("{}", report);
    Ok(())
}

/// Builds and validates the run configuration, prompting for anything the
/// flags did not provide.
fn collect_config(cli: &Cli) -> Result<RunConfig, BactquantError> {
    let missing = |label: &str| {
        BactquantError::Config(format!(
            "--{} is required with --non-interactive",
            label
        ))
    };

    let input_dir = match &cli.input {
        Some(path) => path.clone(),
        None if cli.non_interactive => return Err(missing("input")),
        None => config::prompt_path("Folder with your images")?,
    };
    let extension = match &cli.extension {
        Some(ext) => ext.clone(),
        None if cli.non_interactive => config::DEFAULT_EXTENSION.to_string(),
        None => config::prompt_string("Extension for the images to look for", config::DEFAULT_EXTENSION)?,
    };
    let min_volume = match cli.min_volume {
        Some(v) => v,
        None if cli.non_interactive => config::DEFAULT_MIN_VOLUME,
        None => config::prompt_f64(
            "Minimum bacteria volume (calibrated units)",
            config::DEFAULT_MIN_VOLUME,
        )?,
    };
    let diameter = match cli.diameter {
        Some(v) => v,
        None if cli.non_interactive => config::DEFAULT_DIAMETER,
        None => config::prompt_f64(
            "Bacteria diameter (calibrated units)",
            config::DEFAULT_DIAMETER,
        )?,
    };
    let omnipose_env = match &cli.omnipose_env {
        Some(path) => path.clone(),
        None if cli.non_interactive => return Err(missing("omnipose-env")),
        None => config::prompt_path("Path to omnipose environment")?,
    };
    let output_dir = match &cli.output {
        Some(path) => path.clone(),
        None => input_dir.clone(),
    };

    let config = RunConfig {
        input_dir,
        extension,
        min_volume,
        diameter,
        omnipose_env,
        output_dir,
    };
    config.validate()?;
    Ok(config)
}
