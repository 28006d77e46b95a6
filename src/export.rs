//! Measurement table and ROI artifact output.
//!
//! The CSV is streamed: the header goes out when the exporter is created
//! (so an empty run still yields a header-only table) and rows are
//! appended file by file. Any CSV failure is fatal for the run. ROI
//! artifacts are best-effort: a failed write is logged and skipped.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::warn;
use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::error::BactquantError;
use crate::measure::MeasurementRecord;
use crate::objects::{BoundingBox, RetainedObject};

/// Column order of the measurement table.
pub const CSV_HEADER: [&str; 5] = [
    "image",
    "object",
    "channel",
    "mean_intensity",
    "median_intensity",
];

/// Streaming writer for the cumulative measurement table.
pub struct CsvExporter {
    writer: csv::Writer<BufWriter<File>>,
    path: PathBuf,
}

impl CsvExporter {
    /// Creates the table and writes the header row.
    pub fn create(path: &Path) -> Result<Self, BactquantError> {
        let file = File::create(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::new(file));
        writer
            .write_record(CSV_HEADER)
            .map_err(|source| csv_error(path, source))?;
        Ok(Self {
            writer,
            path: path.to_path_buf(),
        })
    }

    /// Appends one file's records.
    pub fn append(&mut self, records: &[MeasurementRecord]) -> Result<(), BactquantError> {
        for record in records {
            self.writer
                .serialize(record)
                .map_err(|source| csv_error(&self.path, source))?;
        }
        Ok(())
    }

    /// Flushes and closes the table, returning its path.
    pub fn finish(mut self) -> Result<PathBuf, BactquantError> {
        self.writer
            .flush()
            .map_err(|source| csv_error(&self.path, csv::Error::from(source)))?;
        Ok(self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn csv_error(path: &Path, source: csv::Error) -> BactquantError {
    BactquantError::CsvWrite {
        path: path.to_path_buf(),
        source,
    }
}

// ============================================================================
// ROI artifacts
// ============================================================================

/// One run of consecutive mask voxels along X.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskRun {
    pub z: usize,
    pub y: usize,
    pub x: usize,
    pub len: usize,
}

/// Serialized 3D region of interest: one object's voxel mask, run-length
/// encoded, tagged with the originating image and object id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoiArtifact {
    /// Source image identifier (file stem).
    pub image: String,
    /// Object id after relabeling.
    pub object: u32,
    /// Full volume dimensions `(z, y, x)` the mask indices refer to.
    pub dims: [usize; 3],
    pub bbox: BoundingBox,
    /// Mask voxels as runs along X, ordered by `(z, y, x)`.
    pub runs: Vec<MaskRun>,
}

impl RoiArtifact {
    /// Extracts the mask of `id` from a relabeled volume.
    pub fn from_mask(
        image: &str,
        id: u32,
        bbox: BoundingBox,
        relabeled: &ArrayView3<'_, u32>,
    ) -> Self {
        let (depth, height, width) = relabeled.dim();
        let mut runs = Vec::new();

        for z in bbox.min[0]..=bbox.max[0] {
            for y in bbox.min[1]..=bbox.max[1] {
                let mut x = bbox.min[2];
                while x <= bbox.max[2] {
                    if relabeled[[z, y, x]] == id {
                        let start = x;
                        while x <= bbox.max[2] && relabeled[[z, y, x]] == id {
                            x += 1;
                        }
                        runs.push(MaskRun {
                            z,
                            y,
                            x: start,
                            len: x - start,
                        });
                    } else {
                        x += 1;
                    }
                }
            }
        }

        Self {
            image: image.to_string(),
            object: id,
            dims: [depth, height, width],
            bbox,
            runs,
        }
    }

    /// Number of voxels covered by the mask.
    pub fn voxel_count(&self) -> usize {
        self.runs.iter().map(|r| r.len).sum()
    }

    /// Expands the runs back into a boolean volume of `dims`.
    pub fn to_mask(&self) -> Array3<bool> {
        let mut mask = Array3::from_elem((self.dims[0], self.dims[1], self.dims[2]), false);
        for run in &self.runs {
            for x in run.x..run.x + run.len {
                mask[[run.z, run.y, x]] = true;
            }
        }
        mask
    }

    /// File name of this artifact: `<image>_obj<id>.roi.json`.
    pub fn file_name(&self) -> String {
        format!("{}_obj{}.roi.json", self.image, self.object)
    }
}

/// Reads one ROI artifact back. Used for review tooling and tests.
pub fn read_roi(path: &Path) -> Result<RoiArtifact, BactquantError> {
    let file = File::open(path)?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| BactquantError::RoiWrite {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Writes one ROI artifact as pretty JSON.
fn write_roi(dir: &Path, artifact: &RoiArtifact) -> Result<(), BactquantError> {
    let path = dir.join(artifact.file_name());
    let roi_error = |message: String| BactquantError::RoiWrite {
        path: path.clone(),
        message,
    };

    let file = File::create(&path).map_err(|e| roi_error(e.to_string()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, artifact).map_err(|e| roi_error(e.to_string()))?;
    writer.flush().map_err(|e| roi_error(e.to_string()))?;
    Ok(())
}

/// Serializes every retained object of one file under `dir`.
///
/// Failures are logged per artifact and never abort the batch; the number
/// of failed writes is returned so the run report can surface it.
pub fn write_rois(
    dir: &Path,
    image: &str,
    objects: &[RetainedObject],
    relabeled: &ArrayView3<'_, u32>,
) -> usize {
    if objects.is_empty() {
        return 0;
    }
    if let Err(e) = fs::create_dir_all(dir) {
        warn!(
            "cannot create ROI folder {}: {}; skipping {} artifact(s)",
            dir.display(),
            e,
            objects.len()
        );
        return objects.len();
    }

    let mut failures = 0;
    for object in objects {
        let artifact = RoiArtifact::from_mask(image, object.id, object.bbox, relabeled);
        if let Err(e) = write_roi(dir, &artifact) {
            warn!("{}", e);
            failures += 1;
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::filter_objects;
    use crate::volume::VoxelSize;
    use ndarray::Array3;

    #[test]
    fn csv_starts_with_a_header_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Results.csv");
        let exporter = CsvExporter::create(&path).unwrap();
        exporter.finish().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text.trim(),
            "image,object,channel,mean_intensity,median_intensity"
        );
    }

    #[test]
    fn rows_follow_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Results.csv");
        let mut exporter = CsvExporter::create(&path).unwrap();
        exporter
            .append(&[MeasurementRecord {
                image: "a".into(),
                object: 1,
                channel: "GFP".into(),
                mean_intensity: 1.5,
                median_intensity: 1.0,
            }])
            .unwrap();
        exporter.finish().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "a,1,GFP,1.5,1.0");
    }

    #[test]
    fn roi_rle_round_trips() {
        let mut labels = Array3::<u32>::zeros((2, 5, 5));
        for x in 1..4 {
            labels[[0, 2, x]] = 1;
        }
        labels[[1, 2, 2]] = 1;

        let outcome = filter_objects(&labels.view(), &VoxelSize::default(), 0.5);
        let object = &outcome.kept[0];
        let artifact =
            RoiArtifact::from_mask("img", object.id, object.bbox, &outcome.relabeled.view());

        assert_eq!(artifact.voxel_count(), 4);
        assert_eq!(artifact.runs.len(), 2);
        let mask = artifact.to_mask();
        for (idx, &label) in outcome.relabeled.indexed_iter() {
            assert_eq!(mask[idx], label == 1);
        }
    }

    #[test]
    fn roi_json_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut labels = Array3::<u32>::zeros((1, 4, 4));
        labels[[0, 1, 1]] = 1;
        labels[[0, 1, 2]] = 1;

        let outcome = filter_objects(&labels.view(), &VoxelSize::default(), 0.5);
        let failures = write_rois(
            dir.path(),
            "sample",
            &outcome.kept,
            &outcome.relabeled.view(),
        );
        assert_eq!(failures, 0);

        let artifact = read_roi(&dir.path().join("sample_obj1.roi.json")).unwrap();
        assert_eq!(artifact.image, "sample");
        assert_eq!(artifact.object, 1);
        assert_eq!(artifact.voxel_count(), 2);
    }

    #[test]
    fn artifact_names_identify_file_and_object() {
        let artifact = RoiArtifact {
            image: "plate_03".into(),
            object: 12,
            dims: [1, 1, 1],
            bbox: BoundingBox {
                min: [0, 0, 0],
                max: [0, 0, 0],
            },
            runs: vec![],
        };
        assert_eq!(artifact.file_name(), "plate_03_obj12.roi.json");
    }
}
