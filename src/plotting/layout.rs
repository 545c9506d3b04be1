//! Vertical panel layout of per-key maps

use super::quadmesh::{plot_ds_global_map, PlotOptions, QuadMesh};
use crate::dataset::Collection;
use crate::errors::{DiagError, Result};
use image::{imageops, ImageFormat, Rgba, RgbaImage};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Panels stacked top to bottom
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PanelColumn {
    panels: Vec<QuadMesh>,
}

impl PanelColumn {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, panel: QuadMesh) {
        self.panels.push(panel);
    }

    #[must_use]
    pub fn panels(&self) -> &[QuadMesh] {
        &self.panels
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.panels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }

    /// Rasterize every panel onto one white canvas
    ///
    /// # Errors
    ///
    /// Returns [`DiagError::Plot`] if the column has no panels.
    pub fn render(&self) -> Result<RgbaImage> {
        if self.is_empty() {
            return Err(DiagError::Plot("no panels to render".to_string()));
        }
        let width = self.panels.iter().map(|p| p.width).max().unwrap_or(0);
        let height = self.panels.iter().map(|p| p.height).sum();
        let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

        let mut top = 0_i64;
        for panel in &self.panels {
            imageops::overlay(&mut canvas, &panel.rasterize(), 0, top);
            top += i64::from(panel.height);
        }
        Ok(canvas)
    }

    /// Write the stacked panels as a PNG
    ///
    /// # Errors
    ///
    /// Returns an error if the column is empty or the image cannot be encoded or written.
    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.render()?.save_with_format(path, ImageFormat::Png)?;
        info!(path = %path.display(), panels = self.panels.len(), "🖼️ Saved panel column");
        Ok(())
    }

    /// JSON description of the layout
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::DiagError::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// One map per collection key, stacked in key order
///
/// # Errors
///
/// Returns the first panel that cannot be built.
pub fn plot_collection_global_map(
    collection: &Collection,
    variable: &str,
    options: &PlotOptions,
) -> Result<PanelColumn> {
    let mut column = PanelColumn::new();
    for (key, ds) in collection.iter() {
        column.push(plot_ds_global_map(ds, variable, key, options)?);
    }
    Ok(column)
}
