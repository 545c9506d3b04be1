//! Parallel mean reduction along one axis
//!
//! Output cells are independent, so each lane along the reduced axis is averaged on the
//! rayon pool through ndarray's parallel `Zip`. Accumulation happens in `f64` to avoid
//! precision loss on long time series.

use crate::errors::{DiagError, Result};
use ndarray::{ArrayD, Axis, Zip};
use tracing::debug;

/// Arrays that can be averaged along an axis
pub trait AxisMean {
    /// Mean along `axis`, skipping NaN and infinite values
    ///
    /// # Errors
    ///
    /// Returns an error if `axis` is out of bounds.
    fn mean_along(&self, axis: usize) -> Result<ArrayD<f32>>;
}

impl AxisMean for ArrayD<f32> {
    fn mean_along(&self, axis: usize) -> Result<ArrayD<f32>> {
        parallel_mean_axis(self, axis)
    }
}

/// Computes the mean along an axis using parallel processing
///
/// Each lane along `axis` is reduced to one output cell. Cells whose values along
/// `axis` are all NaN or infinite (or where the axis is empty) become NaN.
///
/// # Errors
///
/// Returns an error if `axis` is out of bounds.
pub fn parallel_mean_axis(data: &ArrayD<f32>, axis: usize) -> Result<ArrayD<f32>> {
    if axis >= data.ndim() {
        return Err(DiagError::Generic(format!(
            "Axis {axis} is out of bounds for array with {} dimensions",
            data.ndim()
        )));
    }

    debug!(
        cells = data.len() / data.len_of(Axis(axis)).max(1),
        axis_len = data.len_of(Axis(axis)),
        threads = rayon::current_num_threads(),
        "Averaging along axis {axis}"
    );

    Ok(Zip::from(data.lanes(Axis(axis))).par_map_collect(|lane| finite_mean(lane.iter())))
}

fn finite_mean<'a>(values: impl Iterator<Item = &'a f32>) -> f32 {
    let (sum, count) = values
        .filter(|v| v.is_finite())
        .fold((0.0_f64, 0_u32), |(sum, count), &v| (sum + f64::from(v), count + 1));

    if count > 0 {
        #[allow(clippy::cast_possible_truncation)]
        {
            (sum / f64::from(count)) as f32
        }
    } else {
        f32::NAN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_skips_invalid_values() {
        let data = ArrayD::from_shape_vec(vec![3, 2], vec![1.0, f32::NAN, 3.0, f32::NAN, f32::INFINITY, f32::NAN])
            .unwrap();
        let mean = data.mean_along(0).unwrap();
        assert_eq!(mean.shape(), &[2]);
        assert_eq!(mean[[0]], 2.0);
        assert!(mean[[1]].is_nan());
    }

    #[test]
    fn test_mean_over_middle_axis() {
        let values: Vec<f32> = (0..24).map(|i| i as f32).collect();
        let data = ArrayD::from_shape_vec(vec![2, 3, 4], values).unwrap();
        let mean = data.mean_along(1).unwrap();
        assert_eq!(mean.shape(), &[2, 4]);
        // (0 + 4 + 8) / 3
        assert_eq!(mean[[0, 0]], 4.0);
        // (15 + 19 + 23) / 3
        assert_eq!(mean[[1, 3]], 19.0);
    }

    #[test]
    fn test_axis_out_of_bounds() {
        let data = ArrayD::<f32>::zeros(vec![2, 2]);
        assert!(data.mean_along(2).is_err());
        assert!(matches!(parallel_mean_axis(&data, 5), Err(DiagError::Generic(_))));
    }

    #[test]
    fn test_empty_axis_gives_nan_cells() {
        let data = ArrayD::<f32>::zeros(vec![0, 3]);
        let mean = parallel_mean_axis(&data, 0).unwrap();
        assert_eq!(mean.shape(), &[3]);
        assert!(mean.iter().all(|v| v.is_nan()));
    }
}
