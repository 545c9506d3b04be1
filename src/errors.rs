//! Centralized error handling for epoch diagnostics
//!
//! Every stage of the pipeline (config loading, catalog reading, dataset loading,
//! averaging, caching, notebook generation and plotting) reports failures through
//! [`DiagError`]. Nothing is retried locally; errors propagate to the caller.

use thiserror::Error;

/// Main error type for epoch diagnostics operations
#[derive(Error, Debug)]
pub enum DiagError {
    /// NetCDF file operation errors
    #[error("NetCDF error: {0}")]
    NetCDF(#[from] netcdf::Error),

    /// I/O operation errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration parse errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (catalog descriptor, notebook, Zarr metadata) errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catalog table errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Array shape or dimension error
    #[error("Array error: {0}")]
    Array(#[from] ndarray::ShapeError),

    /// PNG encoding errors
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Variable not found in a dataset
    #[error("Variable '{var}' not found in dataset")]
    VariableNotFound { var: String },

    /// Dimension not found in a variable or dataset
    #[error("Dimension '{dim}' not found in variable '{var}'")]
    DimensionNotFound { var: String, dim: String },

    /// Configuration file content is structurally wrong
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Catalog descriptor, table or search errors
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Notebook reading, parameterization or execution errors
    #[error("Notebook error: {0}")]
    Notebook(String),

    /// Zarr store opening or array decoding errors
    #[error("Zarr error: {0}")]
    Zarr(String),

    /// Plot construction errors
    #[error("Plot error: {0}")]
    Plot(String),

    /// Diverging colormaps need an even number of levels
    #[error("N levels must be even, got {0}")]
    OddLevelCount(usize),

    /// Thread pool configuration error
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// A mapped per-key task failed
    #[error("Task for key '{key}' failed: {source}")]
    Task {
        key: String,
        #[source]
        source: Box<DiagError>,
    },

    /// Generic error
    #[error("{0}")]
    Generic(String),
}

impl DiagError {
    /// Wrap an error raised while processing a single collection key
    #[must_use]
    pub fn for_key(key: &str, source: DiagError) -> Self {
        DiagError::Task {
            key: key.to_string(),
            source: Box::new(source),
        }
    }
}

impl From<String> for DiagError {
    fn from(error: String) -> Self {
        DiagError::Generic(error)
    }
}

impl From<&str> for DiagError {
    fn from(error: &str) -> Self {
        DiagError::Generic(error.to_string())
    }
}

/// Result type alias for epoch diagnostics operations
pub type Result<T> = std::result::Result<T, DiagError>;
