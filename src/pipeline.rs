//! The batch loop: one strictly sequential pass over the input files.
//!
//! Each file runs read -> smooth -> segment -> filter -> measure -> export
//! to completion before the next file starts. Per-file errors are logged
//! and recorded in the run report; only configuration problems and
//! measurement-table failures abort the run.

use std::path::Path;

use log::{info, warn};

use crate::config::RunConfig;
use crate::error::BactquantError;
use crate::export::{self, CsvExporter};
use crate::files;
use crate::measure::{self, MIN_CHANNELS, SEGMENTATION_CHANNEL};
use crate::objects;
use crate::preprocess::{self, MEDIAN_RADIUS};
use crate::report::{FileSummary, RunReport};
use crate::segment::Segment;

/// Runs the whole batch and returns the accumulated report.
///
/// The measurement table is created before the first file, so an empty
/// folder still produces a header-only CSV.
pub fn run_batch(
    config: &RunConfig,
    segmenter: &dyn Segment,
) -> Result<RunReport, BactquantError> {
    let files = files::list_image_files(&config.input_dir, &config.extension)?;
    if files.is_empty() {
        warn!(
            "no *.{} files found in {}",
            config.extension.trim_start_matches('.'),
            config.input_dir.display()
        );
    }

    std::fs::create_dir_all(&config.output_dir)?;
    let mut exporter = CsvExporter::create(&config.csv_path())?;
    let mut report = RunReport::new(exporter.path().to_path_buf());

    for (index, file) in files.iter().enumerate() {
        let name = display_name(file);
        info!("[{}/{}] {}", index + 1, files.len(), name);

        match process_file(config, segmenter, file, &mut exporter) {
            Ok((summary, roi_failures)) => {
                report.roi_failures += roi_failures;
                report.add_processed(summary);
            }
            // A broken measurement table invalidates the whole run.
            Err(e @ BactquantError::CsvWrite { .. }) => return Err(e),
            Err(e) => {
                warn!("skipping {}: {}", name, e);
                report.add_skipped(name, e.to_string());
            }
        }
    }

    let csv_path = exporter.finish()?;
    info!(
        "finished: {} object(s) kept across {} file(s), table at {}",
        report.objects_kept(),
        report.processed.len(),
        csv_path.display()
    );
    Ok(report)
}

/// Runs all pipeline stages for one file.
///
/// Returns the file summary plus the number of ROI artifacts that could
/// not be written.
fn process_file(
    config: &RunConfig,
    segmenter: &dyn Segment,
    path: &Path,
    exporter: &mut CsvExporter,
) -> Result<(FileSummary, usize), BactquantError> {
    let stem = file_stem(path);

    let volume = crate::io_tiff::read_volume(path)?;
    if volume.channels() < MIN_CHANNELS {
        return Err(BactquantError::UnsupportedVolume {
            path: path.to_path_buf(),
            message: format!(
                "expected at least {} channels, found {}",
                MIN_CHANNELS,
                volume.channels()
            ),
        });
    }

    let smoothed = preprocess::median_filter_stack(
        &volume.channel(SEGMENTATION_CHANNEL.index()),
        MEDIAN_RADIUS,
    );
    let labels = segmenter.segment(&smoothed.view(), &volume.voxel)?;
    // Do not trust the backend: mismatched labels would index out of
    // bounds during measurement.
    if labels.dim() != smoothed.dim() {
        let (iz, iy, ix) = smoothed.dim();
        let (lz, ly, lx) = labels.dim();
        return Err(BactquantError::LabelMismatch {
            image: [iz, iy, ix],
            labels: [lz, ly, lx],
        });
    }

    let outcome = objects::filter_objects(&labels.view(), &volume.voxel, config.min_volume);
    info!(
        "{}: {} object(s) detected, {} kept",
        stem,
        outcome.detected(),
        outcome.kept.len()
    );

    let records = measure::measure_objects(&volume, &outcome.relabeled.view(), &outcome.kept, &stem);
    exporter.append(&records)?;

    let roi_failures = export::write_rois(
        &config.roi_dir(),
        &stem,
        &outcome.kept,
        &outcome.relabeled.view(),
    );

    Ok((
        FileSummary {
            file: display_name(path),
            detected: outcome.detected(),
            kept: outcome.kept.len(),
            dropped_small: outcome.dropped_small,
            dropped_border: outcome.dropped_border,
        },
        roi_failures,
    ))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| display_name(path))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
