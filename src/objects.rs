//! Per-object analysis and filtering of label volumes.
//!
//! One pass over the label volume collects voxel count, bounding box, and
//! lateral border contact per label. Objects below the calibrated volume
//! threshold or touching an X/Y border are dropped; survivors are
//! relabeled densely from 1 in ascending original-label order.
//!
//! Only the lateral (X/Y) borders are tested. Objects cut off by the top
//! or bottom slice are kept, matching the upstream acquisition protocol
//! where the Z range rarely covers whole cells. See the README for the
//! rationale behind this asymmetry.

use std::collections::BTreeMap;

use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::volume::VoxelSize;

/// Inclusive voxel bounding box, axes ordered `(z, y, x)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: [usize; 3],
    pub max: [usize; 3],
}

impl BoundingBox {
    fn at(z: usize, y: usize, x: usize) -> Self {
        Self {
            min: [z, y, x],
            max: [z, y, x],
        }
    }

    fn include(&mut self, z: usize, y: usize, x: usize) {
        let p = [z, y, x];
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(p[axis]);
            self.max[axis] = self.max[axis].max(p[axis]);
        }
    }
}

/// Raw statistics for one label, before filtering.
#[derive(Clone, Debug)]
pub struct ObjectStats {
    pub label: u32,
    pub voxel_count: usize,
    pub bbox: BoundingBox,
    pub touches_xy_border: bool,
}

/// One object retained by the filter.
#[derive(Clone, Debug)]
pub struct RetainedObject {
    /// Dense id after relabeling, starting at 1.
    pub id: u32,
    /// Label in the original segmentation output.
    pub original_label: u32,
    pub voxel_count: usize,
    /// Calibrated volume (voxel count x voxel volume).
    pub volume: f64,
    pub bbox: BoundingBox,
}

/// Result of filtering one label volume.
#[derive(Clone, Debug)]
pub struct FilterOutcome {
    /// Surviving objects, ascending by id.
    pub kept: Vec<RetainedObject>,
    /// Label volume restricted to survivors, relabeled 1..=n.
    pub relabeled: Array3<u32>,
    /// Objects dropped for being below the volume threshold.
    pub dropped_small: usize,
    /// Objects dropped for touching an X or Y border.
    pub dropped_border: usize,
}

impl FilterOutcome {
    pub fn detected(&self) -> usize {
        self.kept.len() + self.dropped_small + self.dropped_border
    }
}

/// Collects per-label statistics in one pass, ordered by label.
pub fn analyze_labels(labels: &ArrayView3<'_, u32>) -> Vec<ObjectStats> {
    let (_, height, width) = labels.dim();
    let mut stats: BTreeMap<u32, ObjectStats> = BTreeMap::new();

    for ((z, y, x), &label) in labels.indexed_iter() {
        if label == 0 {
            continue;
        }
        let on_border = x == 0 || x + 1 == width || y == 0 || y + 1 == height;
        stats
            .entry(label)
            .and_modify(|s| {
                s.voxel_count += 1;
                s.bbox.include(z, y, x);
                s.touches_xy_border |= on_border;
            })
            .or_insert_with(|| ObjectStats {
                label,
                voxel_count: 1,
                bbox: BoundingBox::at(z, y, x),
                touches_xy_border: on_border,
            });
    }

    stats.into_values().collect()
}

/// Applies the volume threshold and lateral border filter.
///
/// `min_volume` is in calibrated units cubed. Survivors keep their
/// relative order and are relabeled densely from 1; dropped objects are
/// erased from the returned volume.
pub fn filter_objects(
    labels: &ArrayView3<'_, u32>,
    voxel: &VoxelSize,
    min_volume: f64,
) -> FilterOutcome {
    let voxel_volume = voxel.voxel_volume();
    let mut kept = Vec::new();
    let mut dropped_small = 0usize;
    let mut dropped_border = 0usize;
    let mut remap: BTreeMap<u32, u32> = BTreeMap::new();

    for stats in analyze_labels(labels) {
        let volume = stats.voxel_count as f64 * voxel_volume;
        if volume < min_volume {
            dropped_small += 1;
            continue;
        }
        if stats.touches_xy_border {
            dropped_border += 1;
            continue;
        }
        let id = kept.len() as u32 + 1;
        remap.insert(stats.label, id);
        kept.push(RetainedObject {
            id,
            original_label: stats.label,
            voxel_count: stats.voxel_count,
            volume,
            bbox: stats.bbox,
        });
    }

    let relabeled = labels.mapv(|label| remap.get(&label).copied().unwrap_or(0));

    FilterOutcome {
        kept,
        relabeled,
        dropped_small,
        dropped_border,
    }
}
