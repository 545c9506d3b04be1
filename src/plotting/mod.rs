//! Global maps of averaged datasets
//!
//! # Organization
//!
//! - [`colormap`]: Anchor-interpolated colormaps and [`create_cmap`]
//! - [`quadmesh`]: One variable of one dataset as a rasterizable quad mesh
//! - [`layout`]: Per-key meshes stacked into a column

pub mod colormap;
pub mod layout;
pub mod quadmesh;

pub use colormap::{create_cmap, linspace, Colormap, Rgb};
pub use layout::{plot_collection_global_map, PanelColumn};
pub use quadmesh::{plot_ds_global_map, PlotOptions, QuadMesh};
