//! Epoch mean: the time average of every time-varying variable in a dataset

use super::parallel::AxisMean;
use crate::dataset::{DataArray, Dataset};
use crate::errors::{DiagError, Result};
use tracing::debug;

/// Dimension averaged by the epoch mean
pub const TIME_DIM: &str = "time";

/// Average a dataset over its `time` dimension
///
/// Variables with a `time` axis are reduced; the `time` coordinate itself is dropped and
/// every other variable is carried over unchanged.
///
/// # Errors
///
/// Returns [`DiagError::DimensionNotFound`] if no variable has a `time` dimension.
pub fn epoch_mean(ds: &Dataset) -> Result<Dataset> {
    mean_over_dim(ds, TIME_DIM)
}

/// Average a dataset over an arbitrary dimension
///
/// # Errors
///
/// Returns [`DiagError::DimensionNotFound`] if no variable has `dim`.
pub fn mean_over_dim(ds: &Dataset, dim: &str) -> Result<Dataset> {
    if !ds.has_dim(dim) {
        return Err(DiagError::DimensionNotFound {
            var: "<dataset>".to_string(),
            dim: dim.to_string(),
        });
    }

    let mut reduced = Dataset::new();
    reduced.attributes = ds.attributes.clone();

    for (name, array) in ds.variables() {
        let Some(axis) = array.axis_of(dim) else {
            reduced.insert(name, array.clone())?;
            continue;
        };
        if name == dim && array.dims.len() == 1 {
            continue;
        }

        debug!(variable = name, "Computing mean over '{dim}'");
        let data = array.data.mean_along(axis)?;
        let dims = array
            .dims
            .iter()
            .enumerate()
            .filter_map(|(i, d)| (i != axis).then(|| d.clone()))
            .collect();
        reduced.insert(
            name,
            DataArray::new(dims, data)?.with_attributes(array.attributes.clone()),
        )?;
    }

    Ok(reduced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    fn dataset() -> Dataset {
        let mut ds = Dataset::new();
        ds.insert(
            "time",
            DataArray::new(vec!["time".into()], ArrayD::from_shape_vec(vec![2], vec![15.5, 45.0]).unwrap()).unwrap(),
        )
        .unwrap();
        ds.insert(
            "SST",
            DataArray::new(
                vec!["time".into(), "nlat".into()],
                ArrayD::from_shape_vec(vec![2, 2], vec![1.0, 2.0, 3.0, 6.0]).unwrap(),
            )
            .unwrap(),
        )
        .unwrap();
        ds.insert(
            "TAREA",
            DataArray::new(vec!["nlat".into()], ArrayD::from_shape_vec(vec![2], vec![7.0, 8.0]).unwrap()).unwrap(),
        )
        .unwrap();
        ds
    }

    #[test]
    fn test_epoch_mean_reduces_time_only() {
        let mean = epoch_mean(&dataset()).unwrap();
        let names: Vec<&str> = mean.variable_names().collect();
        assert_eq!(names, vec!["SST", "TAREA"]);

        let sst = mean.variable("SST").unwrap();
        assert_eq!(sst.dims, vec!["nlat"]);
        assert_eq!(sst.data[[0]], 2.0);
        assert_eq!(sst.data[[1]], 4.0);
        assert_eq!(mean.variable("TAREA").unwrap().data[[1]], 8.0);
    }

    #[test]
    fn test_epoch_mean_requires_time() {
        let mut ds = Dataset::new();
        ds.insert(
            "TAREA",
            DataArray::new(vec!["nlat".into()], ArrayD::from_shape_vec(vec![1], vec![1.0]).unwrap()).unwrap(),
        )
        .unwrap();
        assert!(matches!(epoch_mean(&ds), Err(DiagError::DimensionNotFound { .. })));
    }
}
