//! epoch_diagnostics: catalog-driven epoch means of climate model output
//!
//! A Rust library for the epoch-mean diagnostics workflow: datasets listed in an ESM
//! catalog are searched and loaded from NetCDF, averaged over time in parallel, cached as
//! Zarr groups, and turned into parameterized plotting notebooks and global maps.
//!
//! ## Key Features
//!
//! - **Explicit Configuration**: `deploy.yml` and `analysis.yml` loaded once into a [`config::Config`]
//! - **Catalog Search**: intake-esm style JSON descriptor plus CSV table, with list-valued rows
//! - **Parallel Processing**: Per-key averaging and per-cell reductions on Rayon
//! - **Result Caching**: One Zarr v2 group per task target, reused when checkpointing
//! - **Notebooks**: Papermill execution or native parameter injection
//! - **Global Maps**: Quad meshes rasterized to PNG with diverging level colormaps
//!
//! ## Module Organization
//!
//! - [`config`]: Configuration loading and derived variable lists
//! - [`catalog`]: Catalog reading, searching and loading
//! - [`dataset`]: In-memory datasets and keyed collections
//! - [`netcdf_io`]: NetCDF asset reading
//! - [`statistics`]: Time means and parallel axis reductions
//! - [`zarr_io`]: Zarr v2 group reading and writing
//! - [`store`]: Task result cache
//! - [`flow`]: The epoch-mean flow driver
//! - [`notebook`]: Plotting notebook generation
//! - [`plotting`]: Colormaps, quad meshes and panel layouts
//! - [`parallel`]: Parallel processing configuration
//! - [`logging`]: Subscriber setup for the binary
//! - [`errors`]: Centralized error handling
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use epoch_diagnostics::prelude::*;
//!
//! let config = Config::load(".").unwrap();
//! println!("{} epoch-mean variables", config.epoch_mean().variables.len());
//!
//! let params = FlowParameters::new("catalog.json")
//!     .with_multi_var_row(config.deploy.reference_case_file_format.is_multi_variable_row());
//! let settings = FlowSettings::with_default_store().unwrap();
//! let averaged = epoch_mean_flow_collection(&params, &settings).unwrap();
//!
//! let column = plot_collection_global_map(&averaged, "TEMP", &PlotOptions::default()).unwrap();
//! column.save_png(std::path::Path::new("TEMP.png")).unwrap();
//! ```

pub mod catalog;
pub mod config;
pub mod dataset;
pub mod errors;
pub mod flow;
pub mod logging;
pub mod netcdf_io;
pub mod notebook;
pub mod parallel;
pub mod plotting;
pub mod statistics;
pub mod store;
pub mod zarr_io;

pub use errors::{DiagError, Result};

pub mod prelude {
    //! Commonly used imports for convenience
    pub use crate::catalog::{load_catalog, read_catalog, subset_catalog, EsmCatalog, SearchQuery};
    pub use crate::config::{Config, FileFormat};
    pub use crate::dataset::{convert_to_collection, Collection, DataArray, Dataset};
    pub use crate::errors::{DiagError, Result};
    pub use crate::flow::{
        epoch_average, epoch_mean_flow_collection, FlowParameters, FlowSettings, TaskState,
    };
    pub use crate::netcdf_io::OpenOptions;
    pub use crate::notebook::{
        generate_plotting_notebooks, modify_markdown_header, GenerateOptions, KernelSelection,
    };
    pub use crate::parallel::ParallelConfig;
    pub use crate::plotting::{
        create_cmap, plot_collection_global_map, plot_ds_global_map, PanelColumn, PlotOptions,
    };
    pub use crate::statistics::epoch_mean;
    pub use crate::store::ResultStore;
}
