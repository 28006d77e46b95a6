//! Per-object intensity statistics.
//!
//! Mean and median intensity are computed over each retained object's
//! voxel set, in the two fixed fluorescence channels (GFP and mCherry) of
//! the raw, unfiltered volume.

use ndarray::ArrayView3;
use serde::{Deserialize, Serialize};

use crate::objects::RetainedObject;
use crate::volume::ImageVolume;

/// The fluorescence channels measured per object.
///
/// Channel indices follow the acquisition protocol: channel 2 (0-based 1)
/// is mCherry, channel 3 (0-based 2) is GFP. mCherry doubles as the
/// segmentation channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Gfp,
    Mcherry,
}

impl Channel {
    /// 0-based channel index in the acquired volume.
    pub const fn index(self) -> usize {
        match self {
            Channel::Mcherry => 1,
            Channel::Gfp => 2,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Channel::Mcherry => "mCherry",
            Channel::Gfp => "GFP",
        }
    }
}

/// Channels reported per object, in CSV row order.
pub const MEASURED_CHANNELS: [Channel; 2] = [Channel::Gfp, Channel::Mcherry];

/// Channel used for segmentation.
pub const SEGMENTATION_CHANNEL: Channel = Channel::Mcherry;

/// Minimum channel count a volume must have to be processed.
pub const MIN_CHANNELS: usize = 3;

/// One row of the cumulative measurement table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    /// Source image identifier (file stem).
    pub image: String,
    /// Object id after relabeling.
    pub object: u32,
    /// Channel name.
    pub channel: String,
    pub mean_intensity: f64,
    pub median_intensity: f64,
}

/// Measures every retained object in every measured channel.
///
/// `relabeled` must be the filtered label volume, so only surviving
/// objects are ever measured. Rows are ordered object-major, channels in
/// [`MEASURED_CHANNELS`] order.
pub fn measure_objects(
    volume: &ImageVolume,
    relabeled: &ArrayView3<'_, u32>,
    objects: &[RetainedObject],
    image: &str,
) -> Vec<MeasurementRecord> {
    if objects.is_empty() {
        return Vec::new();
    }
    let max_id = objects.iter().map(|o| o.id).max().unwrap_or(0) as usize;

    // Gather per-object intensities channel by channel in one pass each.
    let mut per_channel: Vec<Vec<Vec<f32>>> = Vec::with_capacity(MEASURED_CHANNELS.len());
    for channel in MEASURED_CHANNELS {
        let intensities = volume.channel(channel.index());
        let mut buckets: Vec<Vec<f32>> = vec![Vec::new(); max_id + 1];
        for (idx, &id) in relabeled.indexed_iter() {
            if id > 0 {
                buckets[id as usize].push(intensities[idx]);
            }
        }
        per_channel.push(buckets);
    }

    let mut records = Vec::with_capacity(objects.len() * MEASURED_CHANNELS.len());
    for object in objects {
        for (channel, buckets) in MEASURED_CHANNELS.iter().zip(&per_channel) {
            let values = &buckets[object.id as usize];
            records.push(MeasurementRecord {
                image: image.to_string(),
                object: object.id,
                channel: channel.name().to_string(),
                mean_intensity: mean(values),
                median_intensity: median(values),
            });
        }
    }
    records
}

fn mean(values: &[f32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|&v| f64::from(v)).sum::<f64>() / values.len() as f64
}

/// Median with the usual convention: average of the two middle values for
/// even-sized sets.
fn median(values: &[f32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f32> = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        f64::from(sorted[mid])
    } else {
        (f64::from(sorted[mid - 1]) + f64::from(sorted[mid])) / 2.0
    }
}
