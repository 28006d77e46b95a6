//! Noise suppression ahead of segmentation.
//!
//! A 2D median filter is applied independently to every slice of the
//! segmentation channel, with the same square window everywhere. The
//! measurement channels are never filtered; intensity statistics are
//! always taken from the raw data.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3};

/// Window radius of the pre-segmentation median filter.
pub const MEDIAN_RADIUS: usize = 3;

/// Applies a per-slice 2D median filter to a stack.
pub fn median_filter_stack(stack: &ArrayView3<'_, f32>, radius: usize) -> Array3<f32> {
    let (depth, height, width) = stack.dim();
    let mut out = Array3::<f32>::zeros((depth, height, width));
    for z in 0..depth {
        let filtered = median_filter_slice(&stack.index_axis(ndarray::Axis(0), z), radius);
        out.index_axis_mut(ndarray::Axis(0), z).assign(&filtered);
    }
    out
}

/// Median filter over a square window of side `2 * radius + 1`.
///
/// The window is clipped at the image edges, so border pixels take the
/// median of a smaller neighborhood.
pub fn median_filter_slice(slice: &ArrayView2<'_, f32>, radius: usize) -> Array2<f32> {
    let (height, width) = slice.dim();
    let mut out = Array2::<f32>::zeros((height, width));
    let mut window = Vec::with_capacity((2 * radius + 1) * (2 * radius + 1));

    for y in 0..height {
        let y0 = y.saturating_sub(radius);
        let y1 = (y + radius + 1).min(height);
        for x in 0..width {
            let x0 = x.saturating_sub(radius);
            let x1 = (x + radius + 1).min(width);

            window.clear();
            for wy in y0..y1 {
                for wx in x0..x1 {
                    window.push(slice[[wy, wx]]);
                }
            }
            window.sort_by(|a, b| a.total_cmp(b));
            out[[y, x]] = window[window.len() / 2];
        }
    }
    out
}
