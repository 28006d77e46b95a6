//! External segmentation boundary.
//!
//! Segmentation is delegated to an Omnipose model running inside a
//! user-supplied conda environment. The exchange is file based: the
//! smoothed segmentation channel is written to a temporary directory as a
//! TIFF stack, the model CLI is invoked on that directory, and the
//! resulting `*_cp_masks.tif` label stack is read back.
//!
//! The [`Segment`] trait is the seam that lets tests substitute a
//! deterministic in-process backend.

use std::path::PathBuf;
use std::process::Command;

use log::{debug, info};
use ndarray::{Array3, ArrayView3};

use crate::config::RunConfig;
use crate::error::BactquantError;
use crate::volume::VoxelSize;

/// Pretrained model identifier, tuned for fluorescent bacterial morphology.
pub const MODEL_NAME: &str = "bact_fluor_omni";

/// Base name of the stack handed to the segmentation process.
const EXCHANGE_STACK: &str = "stack.tif";

/// Mask file the segmentation CLI writes next to the input stack.
const EXCHANGE_MASKS: &str = "stack_cp_masks.tif";

/// A 3D instance segmentation backend.
///
/// Returns a label volume with the same spatial dimensions as the input:
/// background 0, one positive integer per detected object.
pub trait Segment {
    fn segment(
        &self,
        volume: &ArrayView3<'_, f32>,
        voxel: &VoxelSize,
    ) -> Result<Array3<u32>, BactquantError>;
}

/// Production backend: one blocking `python -m cellpose` invocation per
/// volume, run from the configured environment with the Omnipose model.
pub struct OmniposeRunner {
    python: PathBuf,
    /// Expected bacteria diameter in calibrated units.
    diameter: f64,
}

impl OmniposeRunner {
    pub fn new(config: &RunConfig) -> Result<Self, BactquantError> {
        Ok(Self {
            python: config.python_interpreter()?,
            diameter: config.diameter,
        })
    }

    /// Diameter hint for the model, converted from calibrated units to
    /// whole pixels using the X calibration.
    fn diameter_px(&self, voxel: &VoxelSize) -> u32 {
        let px = if voxel.dx > 0.0 {
            (self.diameter / voxel.dx).round()
        } else {
            self.diameter.round()
        };
        px.clamp(1.0, f64::from(u32::MAX)) as u32
    }
}

impl Segment for OmniposeRunner {
    fn segment(
        &self,
        volume: &ArrayView3<'_, f32>,
        voxel: &VoxelSize,
    ) -> Result<Array3<u32>, BactquantError> {
        let exchange = tempfile::tempdir()?;
        let stack_path = exchange.path().join(EXCHANGE_STACK);
        crate::io_tiff::write_stack_f32(&stack_path, volume)?;

        let diameter = self.diameter_px(voxel);
        info!(
            "invoking {} model (diameter {} px) via {}",
            MODEL_NAME,
            diameter,
            self.python.display()
        );

        let output = Command::new(&self.python)
            .args(["-m", "cellpose"])
            .arg("--dir")
            .arg(exchange.path())
            .args(["--pretrained_model", MODEL_NAME])
            .args(["--omni", "--do_3D"])
            .args(["--chan", "0"])
            .args(["--flow_threshold", "0", "--mask_threshold", "0"])
            .arg("--diameter")
            .arg(diameter.to_string())
            .args(["--save_tif", "--no_npy", "--verbose"])
            .output()?;

        if !output.status.success() {
            return Err(BactquantError::Segmentation {
                message: format!(
                    "exit status {}: {}",
                    output.status,
                    stderr_tail(&output.stderr, 6)
                ),
            });
        }

        let masks_path = exchange.path().join(EXCHANGE_MASKS);
        if !masks_path.is_file() {
            return Err(BactquantError::Segmentation {
                message: format!(
                    "process exited successfully but wrote no mask file ({})",
                    EXCHANGE_MASKS
                ),
            });
        }

        let labels = crate::io_tiff::read_labels(&masks_path)?;
        if labels.dim() != volume.dim() {
            let (iz, iy, ix) = volume.dim();
            let (lz, ly, lx) = labels.dim();
            return Err(BactquantError::LabelMismatch {
                image: [iz, iy, ix],
                labels: [lz, ly, lx],
            });
        }

        debug!(
            "segmentation produced {} labeled voxel(s)",
            labels.iter().filter(|&&l| l > 0).count()
        );
        Ok(labels)
    }
}

/// Last `lines` lines of a child process stderr, for error messages.
fn stderr_tail(stderr: &[u8], lines: usize) -> String {
    let text = String::from_utf8_lossy(stderr);
    let kept: Vec<&str> = text
        .lines()
        .rev()
        .take(lines)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if kept.is_empty() {
        "(no stderr output)".to_string()
    } else {
        kept.join(" | ")
    }
}
