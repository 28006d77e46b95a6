//! Batch pipeline tests with a deterministic in-process segmentation
//! backend, so no external environment is needed.

use std::collections::HashMap;
use std::path::Path;

use ndarray::{Array3, Array4, ArrayView3};

use bactquant::config::RunConfig;
use bactquant::error::BactquantError;
use bactquant::export::read_roi;
use bactquant::io_tiff::write_volume;
use bactquant::pipeline::run_batch;
use bactquant::segment::Segment;
use bactquant::volume::{ImageVolume, VoxelSize};

/// Returns canned labels keyed by volume dimensions; unknown dimensions
/// fail like a crashed external tool.
struct MapSegmenter {
    by_dims: HashMap<(usize, usize, usize), Array3<u32>>,
}

impl Segment for MapSegmenter {
    fn segment(
        &self,
        volume: &ArrayView3<'_, f32>,
        _voxel: &VoxelSize,
    ) -> Result<Array3<u32>, BactquantError> {
        self.by_dims
            .get(&volume.dim())
            .cloned()
            .ok_or_else(|| BactquantError::Segmentation {
                message: "exit status 1: (no stderr output)".into(),
            })
    }
}

fn config(input: &Path, output: &Path, min_volume: f64) -> RunConfig {
    RunConfig {
        input_dir: input.to_path_buf(),
        extension: "tif".into(),
        min_volume,
        diameter: 1.0,
        omnipose_env: input.join("unused-env"),
        output_dir: output.to_path_buf(),
    }
}

/// 5x10x10 labels: interior object of 50 voxels (label 1) and an object
/// of 200 voxels touching X=0 (label 2).
fn scenario_labels() -> Array3<u32> {
    let mut labels = Array3::<u32>::zeros((5, 10, 10));
    for z in 1..3 {
        for y in 2..7 {
            for x in 4..9 {
                labels[[z, y, x]] = 1;
            }
        }
    }
    for z in 0..5 {
        for y in 0..10 {
            for x in 0..4 {
                labels[[z, y, x]] = 2;
            }
        }
    }
    labels
}

/// 3-channel volume matching `scenario_labels`, with constant GFP and
/// mCherry intensity over the interior object.
fn scenario_volume() -> ImageVolume {
    let labels = scenario_labels();
    let mut data = Array4::<f32>::zeros((3, 5, 10, 10));
    for ((z, y, x), &label) in labels.indexed_iter() {
        if label == 1 {
            data[[1, z, y, x]] = 50.0; // mCherry
            data[[2, z, y, x]] = 4.0; // GFP
        }
    }
    ImageVolume {
        data,
        voxel: VoxelSize::isotropic(1.0, "micron"),
    }
}

fn read_csv_rows(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect()
}

#[test]
fn interior_object_survives_and_is_measured() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    std::fs::create_dir(&input).unwrap();

    write_volume(&input.join("sample.tif"), &scenario_volume()).unwrap();
    let segmenter = MapSegmenter {
        by_dims: HashMap::from([((5, 10, 10), scenario_labels())]),
    };

    let report = run_batch(&config(&input, &output, 20.0), &segmenter).unwrap();

    assert_eq!(report.processed.len(), 1);
    assert_eq!(report.processed[0].kept, 1);
    assert_eq!(report.processed[0].detected, 2);
    assert_eq!(report.processed[0].dropped_border, 1);

    let rows = read_csv_rows(&output.join("Results.csv"));
    assert_eq!(rows.len(), 2);
    // Object-major order: GFP row first, then mCherry.
    assert_eq!(rows[0][..3], ["sample", "1", "GFP"]);
    assert_eq!(rows[0][3].parse::<f64>().unwrap(), 4.0);
    assert_eq!(rows[0][4].parse::<f64>().unwrap(), 4.0);
    assert_eq!(rows[1][..3], ["sample", "1", "mCherry"]);
    assert_eq!(rows[1][3].parse::<f64>().unwrap(), 50.0);

    let roi = read_roi(&output.join("rois").join("sample_obj1.roi.json")).unwrap();
    assert_eq!(roi.voxel_count(), 50);
    assert_eq!(roi.dims, [5, 10, 10]);
}

#[test]
fn rois_and_csv_rows_stay_in_lockstep() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    std::fs::create_dir(&input).unwrap();

    // Two interior objects this time.
    let mut labels = scenario_labels();
    labels[[3, 8, 6]] = 3;
    labels[[3, 8, 7]] = 3;
    write_volume(&input.join("pair.tif"), &scenario_volume()).unwrap();
    let segmenter = MapSegmenter {
        by_dims: HashMap::from([((5, 10, 10), labels)]),
    };

    // Low threshold keeps the 2-voxel object too.
    let report = run_batch(&config(&input, &output, 1.0), &segmenter).unwrap();
    assert_eq!(report.objects_kept(), 2);

    let rows = read_csv_rows(&output.join("Results.csv"));
    let roi_dir = output.join("rois");
    let mut roi_objects: Vec<u32> = std::fs::read_dir(&roi_dir)
        .unwrap()
        .map(|e| read_roi(&e.unwrap().path()).unwrap().object)
        .collect();
    roi_objects.sort_unstable();

    // One ROI per object, one row per (object, channel), no orphans.
    assert_eq!(roi_objects, vec![1, 2]);
    for object in &roi_objects {
        let count = rows
            .iter()
            .filter(|r| r[1] == object.to_string())
            .count();
        assert_eq!(count, 2, "object {} should have one row per channel", object);
    }
    assert_eq!(rows.len(), roi_objects.len() * 2);
}

#[test]
fn one_failing_file_does_not_abort_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    std::fs::create_dir(&input).unwrap();

    write_volume(&input.join("a_good.tif"), &scenario_volume()).unwrap();
    // Different dimensions: the stub segmenter fails on this one.
    let odd = ImageVolume {
        data: Array4::<f32>::zeros((3, 2, 6, 6)),
        voxel: VoxelSize::isotropic(1.0, "micron"),
    };
    write_volume(&input.join("b_bad.tif"), &odd).unwrap();

    let segmenter = MapSegmenter {
        by_dims: HashMap::from([((5, 10, 10), scenario_labels())]),
    };
    let report = run_batch(&config(&input, &output, 20.0), &segmenter).unwrap();

    assert_eq!(report.processed.len(), 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].file, "b_bad.tif");
    assert!(report.skipped[0].reason.contains("Segmentation"));

    let rows = read_csv_rows(&output.join("Results.csv"));
    assert!(rows.iter().all(|r| r[0] == "a_good"));
    assert_eq!(rows.len(), 2);
}

/// A backend that violates the segmentation contract by answering with a
/// label volume of the wrong shape.
struct MisshapenSegmenter;

impl Segment for MisshapenSegmenter {
    fn segment(
        &self,
        _volume: &ArrayView3<'_, f32>,
        _voxel: &VoxelSize,
    ) -> Result<Array3<u32>, BactquantError> {
        Ok(Array3::zeros((1, 2, 2)))
    }
}

#[test]
fn mismatched_label_dimensions_skip_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    std::fs::create_dir(&input).unwrap();
    write_volume(&input.join("sample.tif"), &scenario_volume()).unwrap();

    let report = run_batch(&config(&input, &output, 20.0), &MisshapenSegmenter).unwrap();

    assert!(report.processed.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].reason.contains("dimensions"));

    let rows = read_csv_rows(&output.join("Results.csv"));
    assert!(rows.is_empty());
}

#[test]
fn volumes_with_too_few_channels_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    std::fs::create_dir(&input).unwrap();

    let thin = ImageVolume {
        data: Array4::<f32>::zeros((2, 2, 6, 6)),
        voxel: VoxelSize::isotropic(1.0, "micron"),
    };
    write_volume(&input.join("thin.tif"), &thin).unwrap();

    let segmenter = MapSegmenter {
        by_dims: HashMap::new(),
    };
    let report = run_batch(&config(&input, &output, 1.0), &segmenter).unwrap();

    assert!(report.processed.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].reason.contains("channels"));
}

#[test]
fn reruns_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    std::fs::create_dir(&input).unwrap();
    write_volume(&input.join("sample.tif"), &scenario_volume()).unwrap();

    let segmenter = MapSegmenter {
        by_dims: HashMap::from([((5, 10, 10), scenario_labels())]),
    };

    let out_a = dir.path().join("out_a");
    let out_b = dir.path().join("out_b");
    run_batch(&config(&input, &out_a, 20.0), &segmenter).unwrap();
    run_batch(&config(&input, &out_b, 20.0), &segmenter).unwrap();

    let csv_a = std::fs::read_to_string(out_a.join("Results.csv")).unwrap();
    let csv_b = std::fs::read_to_string(out_b.join("Results.csv")).unwrap();
    assert_eq!(csv_a, csv_b);

    let roi_a = read_roi(&out_a.join("rois").join("sample_obj1.roi.json")).unwrap();
    let roi_b = read_roi(&out_b.join("rois").join("sample_obj1.roi.json")).unwrap();
    assert_eq!(roi_a, roi_b);
}
