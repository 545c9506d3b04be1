//! Global map of one dataset variable over `nlon`/`nlat`

use super::colormap::{create_cmap, linspace, Colormap, Rgb, LIGHTGRAY};
use crate::dataset::{DataArray, Dataset};
use crate::errors::{DiagError, Result};
use image::RgbaImage;
use ndarray::{Array2, ArrayViewD, Axis, Ix2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const LON_DIM: &str = "nlon";
pub const LAT_DIM: &str = "nlat";

pub const PLOT_WIDTH: u32 = 600;
pub const PLOT_HEIGHT: u32 = 400;

/// Number of color levels between `vmin` and `vmax`
pub const N_COLOR_LEVELS: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotOptions {
    /// Take mesh coordinates from the dataset's `nlon`/`nlat` variables
    pub add_nlon_nlat: bool,
    /// Named colormap used when no level range is given
    pub cmap: String,
    pub vmin: Option<f64>,
    pub vmax: Option<f64>,
}

impl Default for PlotOptions {
    fn default() -> Self {
        Self {
            add_nlon_nlat: true,
            cmap: "magma".to_string(),
            vmin: None,
            vmax: None,
        }
    }
}

/// A rasterizable quad mesh and its display options
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuadMesh {
    /// Panel title, the collection key
    pub label: String,
    pub variable: String,
    pub kdims: [String; 2],
    /// Remaining dimensions and their sizes; the first frame is shown
    pub slider_dims: Vec<(String, usize)>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Finite data range of the shown frame
    pub clim: Option<(f64, f64)>,
    pub cmap: Colormap,
    pub color_levels: Option<Vec<f64>>,
    pub bgcolor: Option<Rgb>,
    pub width: u32,
    pub height: u32,
    pub colorbar: bool,
    pub tools: Vec<String>,
    /// `(nlat, nlon)` values of the shown frame
    #[serde(skip)]
    values: Array2<f32>,
}

/// Build the global map of `ds[variable]` labelled with `key`
///
/// # Errors
///
/// Returns [`DiagError::VariableNotFound`] for a missing variable,
/// [`DiagError::DimensionNotFound`] if it lacks `nlon` or `nlat`, and
/// [`DiagError::Plot`] for inconsistent options.
pub fn plot_ds_global_map(
    ds: &Dataset,
    variable: &str,
    key: &str,
    options: &PlotOptions,
) -> Result<QuadMesh> {
    let array = ds.variable(variable)?;
    let lon_axis = require_axis(array, variable, LON_DIM)?;
    let lat_axis = require_axis(array, variable, LAT_DIM)?;

    let mut slider_dims = Vec::new();
    let mut frame: ArrayViewD<'_, f32> = array.data.view();
    for axis in (0..array.dims.len()).rev() {
        if axis == lon_axis || axis == lat_axis {
            continue;
        }
        let len = array.data.len_of(Axis(axis));
        if len == 0 {
            return Err(DiagError::Plot(format!(
                "dimension '{}' of '{variable}' is empty",
                array.dims[axis]
            )));
        }
        slider_dims.push((array.dims[axis].clone(), len));
        frame = frame.index_axis_move(Axis(axis), 0);
    }
    slider_dims.reverse();

    let frame = frame.into_dimensionality::<Ix2>()?;
    let values = if lat_axis < lon_axis {
        frame.to_owned()
    } else {
        frame.t().to_owned()
    };

    let (nlat, nlon) = values.dim();
    let x = coordinate(ds, LON_DIM, nlon, options.add_nlon_nlat);
    let y = coordinate(ds, LAT_DIM, nlat, options.add_nlon_nlat);

    let (cmap, color_levels, bgcolor) = match (options.vmin, options.vmax) {
        (Some(vmin), Some(vmax)) => {
            let levels = linspace(vmin, vmax, N_COLOR_LEVELS);
            (create_cmap(&levels)?, Some(levels), Some(LIGHTGRAY))
        }
        (None, None) => (Colormap::named(&options.cmap)?, None, None),
        _ => {
            return Err(DiagError::Plot(
                "vmin and vmax must be given together".to_string(),
            ))
        }
    };

    debug!(variable, key, nlon, nlat, "Built quad mesh");
    Ok(QuadMesh {
        label: key.to_string(),
        variable: variable.to_string(),
        kdims: [LON_DIM.to_string(), LAT_DIM.to_string()],
        slider_dims,
        x,
        y,
        clim: finite_range(&values),
        cmap,
        color_levels,
        bgcolor,
        width: PLOT_WIDTH,
        height: PLOT_HEIGHT,
        colorbar: true,
        tools: vec!["hover".to_string()],
        values,
    })
}

fn require_axis(array: &DataArray, variable: &str, dim: &str) -> Result<usize> {
    array.axis_of(dim).ok_or_else(|| DiagError::DimensionNotFound {
        var: variable.to_string(),
        dim: dim.to_string(),
    })
}

/// Values of a 1-D coordinate variable, or the index range
fn coordinate(ds: &Dataset, dim: &str, len: usize, from_dataset: bool) -> Vec<f64> {
    if from_dataset {
        if let Ok(coord) = ds.variable(dim) {
            if coord.dims.len() == 1 && coord.dims[0] == dim && coord.data.len() == len {
                return coord.data.iter().map(|&v| f64::from(v)).collect();
            }
        }
    }
    (0..len).map(|i| i as f64).collect()
}

fn finite_range(values: &Array2<f32>) -> Option<(f64, f64)> {
    values
        .iter()
        .filter(|v| v.is_finite())
        .fold(None, |range, &v| {
            let v = f64::from(v);
            Some(match range {
                None => (v, v),
                Some((lo, hi)) => (f64::min(lo, v), f64::max(hi, v)),
            })
        })
}

impl QuadMesh {
    /// Values of the shown frame, `(nlat, nlon)`
    #[must_use]
    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    /// Color of one data value; `None` for missing values
    #[must_use]
    pub fn color_of(&self, value: f32) -> Option<Rgb> {
        if !value.is_finite() {
            return None;
        }
        let value = f64::from(value);
        match &self.color_levels {
            Some(levels) => {
                let bin = levels.iter().filter(|&&level| level <= value).count();
                let index = bin.saturating_sub(1).min(self.cmap.len().saturating_sub(1));
                self.cmap.colors().get(index).copied()
            }
            None => {
                let (lo, hi) = self.clim?;
                let t = if hi > lo { (value - lo) / (hi - lo) } else { 0.5 };
                self.cmap.color_at(t)
            }
        }
    }

    /// Rasterize to a `width × height` RGBA image by nearest-neighbour sampling
    ///
    /// Row 0 of the mesh (southernmost `nlat`) is drawn at the bottom.
    #[must_use]
    pub fn rasterize(&self) -> RgbaImage {
        let (nlat, nlon) = self.values.dim();
        let width = self.width as usize;
        let height = self.height as usize;
        let background = self.bgcolor.map_or([0, 0, 0, 0], Rgb::to_rgba8);

        let mut pixels = vec![0u8; width * height * 4];
        if nlat > 0 && nlon > 0 {
            pixels
                .par_chunks_mut(width * 4)
                .enumerate()
                .for_each(|(py, row)| {
                    let j = nlat - 1 - ((py * nlat) / height).min(nlat - 1);
                    for px in 0..width {
                        let i = ((px * nlon) / width).min(nlon - 1);
                        let color = self
                            .color_of(self.values[[j, i]])
                            .map_or(background, Rgb::to_rgba8);
                        row[px * 4..px * 4 + 4].copy_from_slice(&color);
                    }
                });
        }

        RgbaImage::from_raw(self.width, self.height, pixels).unwrap_or_else(|| {
            RgbaImage::from_pixel(self.width, self.height, image::Rgba(background))
        })
    }
}
