use std::path::PathBuf;
use thiserror::Error;

/// The main error type for bactquant operations.
///
/// Per-file variants (`TiffDecode`, `UnsupportedVolume`, `Segmentation`,
/// `LabelMismatch`) are caught by the batch loop, which logs the file and
/// moves on. `Config` and `CsvWrite` abort the run; `RoiWrite` is logged
/// and the affected artifact skipped.
#[derive(Debug, Error)]
pub enum BactquantError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode TIFF {path}: {source}")]
    TiffDecode {
        path: PathBuf,
        #[source]
        source: tiff::TiffError,
    },

    #[error("Failed to encode TIFF {path}: {source}")]
    TiffEncode {
        path: PathBuf,
        #[source]
        source: tiff::TiffError,
    },

    #[error("Unsupported volume in {path}: {message}")]
    UnsupportedVolume { path: PathBuf, message: String },

    #[error("Segmentation command failed: {message}")]
    Segmentation { message: String },

    #[error("Label volume dimensions {labels:?} do not match image dimensions {image:?}")]
    LabelMismatch {
        image: [usize; 3],
        labels: [usize; 3],
    },

    #[error("Failed to write measurement table {path}: {source}")]
    CsvWrite {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to write ROI artifact {path}: {message}")]
    RoiWrite { path: PathBuf, message: String },
}
