//! Run parameters: collection, validation, and derived paths.
//!
//! Every parameter can come from a CLI flag or, when absent, from an
//! interactive prompt. The resulting [`RunConfig`] is immutable for the
//! whole run.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use crate::error::BactquantError;

/// Default minimum object volume, in calibrated units cubed.
pub const DEFAULT_MIN_VOLUME: f64 = 0.1;

/// Default expected bacteria diameter, in calibrated units.
pub const DEFAULT_DIAMETER: f64 = 1.0;

/// Default file extension to look for.
pub const DEFAULT_EXTENSION: &str = "tif";

/// Immutable parameters for one batch run.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Folder containing the input images.
    pub input_dir: PathBuf,
    /// File extension filter (without leading dot).
    pub extension: String,
    /// Minimum retained object volume, in calibrated units cubed.
    pub min_volume: f64,
    /// Expected bacteria diameter, in calibrated units. Passed to the
    /// segmentation model after conversion to pixels.
    pub diameter: f64,
    /// Path to the conda environment hosting the segmentation model.
    pub omnipose_env: PathBuf,
    /// Folder receiving the CSV and ROI artifacts.
    pub output_dir: PathBuf,
}

impl RunConfig {
    /// Checks every parameter, returning the first problem found.
    pub fn validate(&self) -> Result<(), BactquantError> {
        if !self.input_dir.is_dir() {
            return Err(BactquantError::Config(format!(
                "input folder {} does not exist or is not a directory",
                self.input_dir.display()
            )));
        }
        if self.extension.trim().is_empty() {
            return Err(BactquantError::Config(
                "file extension must not be empty".into(),
            ));
        }
        if !(self.min_volume.is_finite() && self.min_volume > 0.0) {
            return Err(BactquantError::Config(format!(
                "minimum volume must be a positive number, got {}",
                self.min_volume
            )));
        }
        if !(self.diameter.is_finite() && self.diameter > 0.0) {
            return Err(BactquantError::Config(format!(
                "bacteria diameter must be a positive number, got {}",
                self.diameter
            )));
        }
        if resolve_python(&self.omnipose_env).is_none() {
            return Err(BactquantError::Config(format!(
                "no Python interpreter found under environment path {}",
                self.omnipose_env.display()
            )));
        }
        Ok(())
    }

    /// Python interpreter of the configured segmentation environment.
    pub fn python_interpreter(&self) -> Result<PathBuf, BactquantError> {
        resolve_python(&self.omnipose_env).ok_or_else(|| {
            BactquantError::Config(format!(
                "no Python interpreter found under environment path {}",
                self.omnipose_env.display()
            ))
        })
    }

    /// Path of the cumulative measurement table.
    pub fn csv_path(&self) -> PathBuf {
        self.output_dir.join("Results.csv")
    }

    /// Folder receiving per-object ROI artifacts.
    pub fn roi_dir(&self) -> PathBuf {
        self.output_dir.join("rois")
    }
}

/// Locates the Python interpreter of a conda-style environment.
///
/// Accepts either the environment root (looks in `bin/` on Unix and at the
/// root or `Scripts/` layout on Windows) or a direct path to the
/// interpreter binary. On Unix the candidate must also carry an
/// executable permission bit; elsewhere existing as a file is enough.
pub fn resolve_python(env: &Path) -> Option<PathBuf> {
    if is_executable(env) {
        return Some(env.to_path_buf());
    }
    let candidates = [
        env.join("bin").join("python"),
        env.join("bin").join("python3"),
        env.join("python.exe"),
        env.join("Scripts").join("python.exe"),
    ];
    candidates.into_iter().find(|c| is_executable(c))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.is_file()
        && path
            .metadata()
            .is_ok_and(|m| m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Prompts on stderr and reads one line from stdin.
///
/// An empty answer falls back to `default` when one is given.
fn prompt_line(label: &str, default: Option<&str>) -> Result<String, BactquantError> {
    let mut err = io::stderr().lock();
    match default {
        Some(d) => write!(err, "{} [{}]: ", label, d)?,
        None => write!(err, "{}: ", label)?,
    }
    err.flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let answer = line.trim();
    if answer.is_empty() {
        match default {
            Some(d) => Ok(d.to_string()),
            None => Err(BactquantError::Config(format!(
                "no value given for '{}'",
                label
            ))),
        }
    } else {
        Ok(answer.to_string())
    }
}

/// Prompts for a filesystem path.
pub fn prompt_path(label: &str) -> Result<PathBuf, BactquantError> {
    prompt_line(label, None).map(PathBuf::from)
}

/// Prompts for a string with an optional default.
pub fn prompt_string(label: &str, default: &str) -> Result<String, BactquantError> {
    prompt_line(label, Some(default))
}

/// Prompts for a positive number with a default.
pub fn prompt_f64(label: &str, default: f64) -> Result<f64, BactquantError> {
    let text = prompt_line(label, Some(&default.to_string()))?;
    text.parse::<f64>().map_err(|_| {
        BactquantError::Config(format!("'{}' is not a valid number for '{}'", text, label))
    })
}
