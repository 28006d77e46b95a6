//! Core volume types shared across the pipeline.
//!
//! All arrays use `(z, y, x)` index order, with an extra leading channel
//! axis for intensity data. Label volumes are plain `Array3<u32>` (0 is
//! background, each positive value one object) and borrow the calibration
//! of the image they were segmented from. Calibration travels with the
//! volume so downstream stages can convert voxel counts to physical
//! units.

use ndarray::{Array4, ArrayView3};
use serde::{Deserialize, Serialize};

/// Physical size of one voxel, in calibrated units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoxelSize {
    /// Size along X.
    pub dx: f64,
    /// Size along Y.
    pub dy: f64,
    /// Size along Z (slice spacing).
    pub dz: f64,
    /// Name of the calibration unit (e.g. "micron").
    pub unit: String,
}

impl VoxelSize {
    /// Creates an isotropic calibration with the given edge length.
    pub fn isotropic(size: f64, unit: impl Into<String>) -> Self {
        Self {
            dx: size,
            dy: size,
            dz: size,
            unit: unit.into(),
        }
    }

    /// Physical volume of a single voxel.
    pub fn voxel_volume(&self) -> f64 {
        self.dx * self.dy * self.dz
    }
}

impl Default for VoxelSize {
    fn default() -> Self {
        Self::isotropic(1.0, "pixel")
    }
}

/// A multi-channel 3D intensity volume with voxel calibration.
///
/// Indexed `(channel, z, y, x)`.
#[derive(Clone, Debug)]
pub struct ImageVolume {
    pub data: Array4<f32>,
    pub voxel: VoxelSize,
}

impl ImageVolume {
    pub fn channels(&self) -> usize {
        self.data.dim().0
    }

    pub fn depth(&self) -> usize {
        self.data.dim().1
    }

    pub fn height(&self) -> usize {
        self.data.dim().2
    }

    pub fn width(&self) -> usize {
        self.data.dim().3
    }

    /// Spatial dimensions as `(z, y, x)`.
    pub fn spatial_dim(&self) -> (usize, usize, usize) {
        let (_, z, y, x) = self.data.dim();
        (z, y, x)
    }

    /// View of one channel as a 3D stack.
    pub fn channel(&self, c: usize) -> ArrayView3<'_, f32> {
        self.data.index_axis(ndarray::Axis(0), c)
    }
}
