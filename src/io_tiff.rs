//! TIFF stack reader and writer.
//!
//! This is the file-reading boundary of the pipeline: multi-page grayscale
//! TIFF hyperstacks go in, calibrated [`ImageVolume`]s come out. The same
//! code handles the handoff to the segmentation process (single-channel
//! float stack out, integer mask stack back in).
//!
//! # Page order
//!
//! Hyperstacks are assumed to be in ImageJ XYCZT order: the channel index
//! varies fastest across pages, then the slice index. Channel and slice
//! counts, slice spacing, and the calibration unit are parsed from the
//! ImageJ-style `ImageDescription` tag of the first page; pixel width and
//! height come from the `XResolution`/`YResolution` tags (pixels per
//! unit). Missing metadata falls back to a single channel and unit
//! calibration.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::{Array3, Array4, ArrayView3};
use tiff::decoder::{ifd::Value, Decoder, DecodingResult};
use tiff::encoder::{colortype, Rational, TiffEncoder};
use tiff::tags::Tag;

use crate::error::BactquantError;
use crate::volume::{ImageVolume, VoxelSize};

// ============================================================================
// Reading
// ============================================================================

/// Reads a multi-channel 3D intensity volume plus voxel calibration.
pub fn read_volume(path: &Path) -> Result<ImageVolume, BactquantError> {
    let mut decoder = open_decoder(path)?;

    let description = decoder.get_tag_ascii_string(Tag::ImageDescription).ok();
    let fields = description
        .as_deref()
        .map(parse_description)
        .unwrap_or_default();
    let dx = resolution_to_spacing(decoder.get_tag(Tag::XResolution).ok());
    let dy = resolution_to_spacing(decoder.get_tag(Tag::YResolution).ok());

    let (pages, width, height) = read_pages_f32(&mut decoder, path)?;

    let channels = fields.channels.unwrap_or(1);
    if channels == 0 || pages.len() % channels != 0 {
        return Err(BactquantError::UnsupportedVolume {
            path: path.to_path_buf(),
            message: format!(
                "{} page(s) cannot be split into {} channel(s)",
                pages.len(),
                channels
            ),
        });
    }
    // Hyperstacks with a time axis: keep the first frame only.
    let slices = match fields.slices {
        Some(s) if s > 0 && s * channels <= pages.len() => s,
        _ => pages.len() / channels,
    };

    let voxel = VoxelSize {
        dx,
        dy,
        dz: fields.spacing.unwrap_or(1.0),
        unit: fields.unit.unwrap_or_else(|| "pixel".into()),
    };

    let mut data = Array4::<f32>::zeros((channels, slices, height, width));
    for z in 0..slices {
        for c in 0..channels {
            let page = &pages[z * channels + c];
            let mut target = data.index_axis_mut(ndarray::Axis(0), c);
            let mut slice = target.index_axis_mut(ndarray::Axis(0), z);
            for y in 0..height {
                for x in 0..width {
                    slice[[y, x]] = page[y * width + x];
                }
            }
        }
    }

    Ok(ImageVolume { data, voxel })
}

/// Reads a single-channel integer label stack.
///
/// Rejects floating point sample formats: label volumes must be integer.
pub fn read_labels(path: &Path) -> Result<Array3<u32>, BactquantError> {
    let mut decoder = open_decoder(path)?;
    let mut pages: Vec<Vec<u32>> = Vec::new();
    let mut dims: Option<(usize, usize)> = None;

    loop {
        let (w, h) = decoder
            .dimensions()
            .map_err(|source| decode_error(path, source))?;
        let (w, h) = (w as usize, h as usize);
        match dims {
            None => dims = Some((w, h)),
            Some(d) if d != (w, h) => {
                return Err(BactquantError::UnsupportedVolume {
                    path: path.to_path_buf(),
                    message: "pages have inconsistent dimensions".into(),
                });
            }
            Some(_) => {}
        }

        let page = decoder
            .read_image()
            .map_err(|source| decode_error(path, source))?;
        let data = match page {
            DecodingResult::U8(v) => v.into_iter().map(u32::from).collect(),
            DecodingResult::U16(v) => v.into_iter().map(u32::from).collect(),
            DecodingResult::U32(v) => v,
            _ => {
                return Err(BactquantError::UnsupportedVolume {
                    path: path.to_path_buf(),
                    message: "label data must be unsigned integer".into(),
                });
            }
        };
        pages.push(data);

        if !decoder.more_images() {
            break;
        }
        decoder
            .next_image()
            .map_err(|source| decode_error(path, source))?;
    }

    let (width, height) = dims.unwrap_or((0, 0));
    let mut labels = Array3::<u32>::zeros((pages.len(), height, width));
    for (z, page) in pages.iter().enumerate() {
        for y in 0..height {
            for x in 0..width {
                labels[[z, y, x]] = page[y * width + x];
            }
        }
    }
    Ok(labels)
}

// ============================================================================
// Writing
// ============================================================================

/// Writes a single-channel float stack, one page per slice.
///
/// Used for the TIFF handoff to the segmentation process.
pub fn write_stack_f32(path: &Path, stack: &ArrayView3<'_, f32>) -> Result<(), BactquantError> {
    let file = File::create(path)?;
    let mut encoder =
        TiffEncoder::new(BufWriter::new(file)).map_err(|source| encode_error(path, source))?;

    let (depth, height, width) = stack.dim();
    for z in 0..depth {
        let slice: Vec<f32> = stack
            .index_axis(ndarray::Axis(0), z)
            .iter()
            .copied()
            .collect();
        encoder
            .write_image::<colortype::Gray32Float>(width as u32, height as u32, &slice)
            .map_err(|source| encode_error(path, source))?;
    }
    Ok(())
}

/// Writes a single-channel integer label stack, one page per slice.
pub fn write_labels(path: &Path, labels: &ArrayView3<'_, u32>) -> Result<(), BactquantError> {
    let file = File::create(path)?;
    let mut encoder =
        TiffEncoder::new(BufWriter::new(file)).map_err(|source| encode_error(path, source))?;

    let (depth, height, width) = labels.dim();
    for z in 0..depth {
        let slice: Vec<u32> = labels
            .index_axis(ndarray::Axis(0), z)
            .iter()
            .copied()
            .collect();
        encoder
            .write_image::<colortype::Gray32>(width as u32, height as u32, &slice)
            .map_err(|source| encode_error(path, source))?;
    }
    Ok(())
}

/// Writes a full multi-channel volume as an ImageJ-style hyperstack,
/// channel index varying fastest, with calibration metadata on the first
/// page.
pub fn write_volume(path: &Path, volume: &ImageVolume) -> Result<(), BactquantError> {
    let file = File::create(path)?;
    let mut encoder =
        TiffEncoder::new(BufWriter::new(file)).map_err(|source| encode_error(path, source))?;

    let (channels, depth, height, width) = volume.data.dim();
    let description = format!(
        "ImageJ=1.53t\nimages={}\nchannels={}\nslices={}\nhyperstack=true\nmode=grayscale\nunit={}\nspacing={}\n",
        channels * depth,
        channels,
        depth,
        volume.voxel.unit,
        volume.voxel.dz,
    );

    let mut first = true;
    for z in 0..depth {
        for c in 0..channels {
            let slice: Vec<f32> = volume
                .data
                .index_axis(ndarray::Axis(0), c)
                .index_axis(ndarray::Axis(0), z)
                .iter()
                .copied()
                .collect();

            let mut image = encoder
                .new_image::<colortype::Gray32Float>(width as u32, height as u32)
                .map_err(|source| encode_error(path, source))?;
            if first {
                image
                    .encoder()
                    .write_tag(Tag::ImageDescription, description.as_str())
                    .map_err(|source| encode_error(path, source))?;
                image
                    .encoder()
                    .write_tag(Tag::XResolution, spacing_to_resolution(volume.voxel.dx))
                    .map_err(|source| encode_error(path, source))?;
                image
                    .encoder()
                    .write_tag(Tag::YResolution, spacing_to_resolution(volume.voxel.dy))
                    .map_err(|source| encode_error(path, source))?;
                first = false;
            }
            image
                .write_data(&slice)
                .map_err(|source| encode_error(path, source))?;
        }
    }
    Ok(())
}

// ============================================================================
// Metadata helpers
// ============================================================================

/// Fields parsed from an ImageJ `ImageDescription` tag.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DescriptionFields {
    pub channels: Option<usize>,
    pub slices: Option<usize>,
    pub spacing: Option<f64>,
    pub unit: Option<String>,
}

/// Parses the `key=value` lines of an ImageJ image description.
///
/// Unknown keys are ignored; malformed values are treated as absent.
pub fn parse_description(description: &str) -> DescriptionFields {
    let mut fields = DescriptionFields::default();
    for line in description.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "channels" => fields.channels = value.trim().parse().ok(),
            "slices" => fields.slices = value.trim().parse().ok(),
            "spacing" => fields.spacing = value.trim().parse().ok(),
            "unit" => {
                let unit = value.trim();
                if !unit.is_empty() {
                    fields.unit = Some(unit.to_string());
                }
            }
            _ => {}
        }
    }
    fields
}

fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>, BactquantError> {
    let file = File::open(path)?;
    Decoder::new(BufReader::new(file)).map_err(|source| decode_error(path, source))
}

fn decode_error(path: &Path, source: tiff::TiffError) -> BactquantError {
    BactquantError::TiffDecode {
        path: path.to_path_buf(),
        source,
    }
}

fn encode_error(path: &Path, source: tiff::TiffError) -> BactquantError {
    BactquantError::TiffEncode {
        path: path.to_path_buf(),
        source,
    }
}

/// Converts a resolution tag value (pixels per unit) to a pixel spacing.
fn resolution_to_spacing(value: Option<Value>) -> f64 {
    fn pixels_per_unit(value: Value) -> Option<f64> {
        match value {
            Value::Rational(n, d) if n > 0 && d > 0 => Some(f64::from(n) / f64::from(d)),
            Value::RationalBig(n, d) if n > 0 && d > 0 => Some(n as f64 / d as f64),
            Value::List(values) => values.into_iter().next().and_then(pixels_per_unit),
            _ => None,
        }
    }
    match value.and_then(pixels_per_unit) {
        Some(ppu) if ppu.is_finite() && ppu > 0.0 => 1.0 / ppu,
        _ => 1.0,
    }
}

/// Converts a pixel spacing back to a resolution rational (pixels per unit).
fn spacing_to_resolution(spacing: f64) -> Rational {
    if !(spacing.is_finite() && spacing > 0.0) {
        return Rational { n: 1, d: 1 };
    }
    // Fixed denominator keeps this exact for typical calibrations.
    let d: u32 = 1_000_000;
    let n = (f64::from(d) / spacing).round().clamp(1.0, f64::from(u32::MAX)) as u32;
    Rational { n, d }
}

fn read_pages_f32(
    decoder: &mut Decoder<BufReader<File>>,
    path: &Path,
) -> Result<(Vec<Vec<f32>>, usize, usize), BactquantError> {
    let mut pages: Vec<Vec<f32>> = Vec::new();
    let mut dims: Option<(usize, usize)> = None;

    loop {
        let (w, h) = decoder
            .dimensions()
            .map_err(|source| decode_error(path, source))?;
        let (w, h) = (w as usize, h as usize);
        match dims {
            None => dims = Some((w, h)),
            Some(d) if d != (w, h) => {
                return Err(BactquantError::UnsupportedVolume {
                    path: path.to_path_buf(),
                    message: "pages have inconsistent dimensions".into(),
                });
            }
            Some(_) => {}
        }

        let page = decoder
            .read_image()
            .map_err(|source| decode_error(path, source))?;
        pages.push(page_to_f32(page, path)?);

        if !decoder.more_images() {
            break;
        }
        decoder
            .next_image()
            .map_err(|source| decode_error(path, source))?;
    }

    let (width, height) = dims.unwrap_or((0, 0));
    Ok((pages, width, height))
}

#[allow(unreachable_patterns)]
fn page_to_f32(page: DecodingResult, path: &Path) -> Result<Vec<f32>, BactquantError> {
    Ok(match page {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        _ => {
            return Err(BactquantError::UnsupportedVolume {
                path: path.to_path_buf(),
                message: "unsupported sample format".into(),
            });
        }
    })
}
