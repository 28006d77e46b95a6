//! End-of-run reporting.
//!
//! The batch loop accumulates one [`RunReport`] across files and prints it
//! when the run finishes: per-file object counts, skipped files with their
//! reasons, and the path of the measurement table.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Outcome of one successfully processed file.
#[derive(Clone, Debug, Serialize)]
pub struct FileSummary {
    /// File name (without folder).
    pub file: String,
    /// Objects in the raw segmentation output.
    pub detected: usize,
    /// Objects surviving the volume/border filter.
    pub kept: usize,
    pub dropped_small: usize,
    pub dropped_border: usize,
}

/// A file skipped by the batch, with the reason.
#[derive(Clone, Debug, Serialize)]
pub struct SkippedFile {
    pub file: String,
    pub reason: String,
}

/// Accumulated outcome of a batch run.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub processed: Vec<FileSummary>,
    pub skipped: Vec<SkippedFile>,
    /// ROI artifacts that could not be written.
    pub roi_failures: usize,
    /// Path of the cumulative measurement table.
    pub csv_path: PathBuf,
}

impl RunReport {
    pub fn new(csv_path: PathBuf) -> Self {
        Self {
            processed: Vec::new(),
            skipped: Vec::new(),
            roi_failures: 0,
            csv_path,
        }
    }

    pub fn add_processed(&mut self, summary: FileSummary) {
        self.processed.push(summary);
    }

    pub fn add_skipped(&mut self, file: impl Into<String>, reason: impl Into<String>) {
        self.skipped.push(SkippedFile {
            file: file.into(),
            reason: reason.into(),
        });
    }

    /// Total objects retained across all files.
    pub fn objects_kept(&self) -> usize {
        self.processed.iter().map(|s| s.kept).sum()
    }

    pub fn objects_dropped(&self) -> usize {
        self.processed
            .iter()
            .map(|s| s.dropped_small + s.dropped_border)
            .sum()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.processed.is_empty() && self.skipped.is_empty() {
            writeln!(f, "No files matched the extension filter.")?;
        } else {
            writeln!(
                f,
                "Processed {} file(s), skipped {}.",
                self.processed.len(),
                self.skipped.len()
            )?;
            for summary in &self.processed {
                writeln!(
                    f,
                    "  {}: kept {} of {} object(s) ({} below volume, {} on border)",
                    summary.file,
                    summary.kept,
                    summary.detected,
                    summary.dropped_small,
                    summary.dropped_border
                )?;
            }
            if !self.skipped.is_empty() {
                writeln!(f, "Skipped files:")?;
                for skipped in &self.skipped {
                    writeln!(f, "  {}: {}", skipped.file, skipped.reason)?;
                }
            }
            if self.roi_failures > 0 {
                writeln!(f, "{} ROI artifact(s) could not be written.", self.roi_failures)?;
            }
        }
        writeln!(f, "Measurements written to {}", self.csv_path.display())
    }
}
