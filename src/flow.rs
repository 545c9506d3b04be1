//! The epoch-mean flow
//!
//! Four stages run in order: read the catalog, subset it, load each group, then average
//! every dataset over time. The last stage is mapped over the collection's keys on the
//! Rayon pool with each result cached in the [`ResultStore`].
//!
//! ```rust,no_run
//! use epoch_diagnostics::flow::{epoch_mean_flow_collection, FlowParameters, FlowSettings};
//! use epoch_diagnostics::catalog::SearchQuery;
//!
//! let params = FlowParameters::new("catalogs/cesm2-le.json")
//!     .with_search(SearchQuery::new().with("component", ["ocn"]).with("variable", ["TEMP"]));
//! let settings = FlowSettings::with_default_store().unwrap();
//! let averaged = epoch_mean_flow_collection(&params, &settings).unwrap();
//! for (key, ds) in averaged.iter() {
//!     println!("{key}: {} variables", ds.len());
//! }
//! ```

use crate::catalog::{load_catalog, read_catalog, subset_catalog, SearchQuery};
use crate::dataset::{convert_to_collection, Collection, Dataset};
use crate::errors::{DiagError, Result};
use crate::netcdf_io::OpenOptions;
use crate::statistics::epoch_mean;
use crate::store::{CacheOutcome, ResultStore};
use rayon::prelude::*;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, instrument, warn};

/// Task name used for result targets
pub const TASK_NAME: &str = "epoch_average";

/// Inputs of one flow run
#[derive(Debug, Clone, PartialEq)]
pub struct FlowParameters {
    /// Path to the catalog JSON descriptor
    pub catalog_path: PathBuf,
    /// Parse the variable column as a list of variables per row
    pub multi_var_row: bool,
    pub search: SearchQuery,
    /// Options applied when opening every asset
    pub cdf_kwargs: OpenOptions,
}

impl FlowParameters {
    #[must_use]
    pub fn new(catalog_path: impl Into<PathBuf>) -> Self {
        Self {
            catalog_path: catalog_path.into(),
            multi_var_row: false,
            search: SearchQuery::default(),
            cdf_kwargs: OpenOptions::default(),
        }
    }

    #[must_use]
    pub fn with_multi_var_row(mut self, multi_var_row: bool) -> Self {
        self.multi_var_row = multi_var_row;
        self
    }

    #[must_use]
    pub fn with_search(mut self, search: SearchQuery) -> Self {
        self.search = search;
        self
    }

    #[must_use]
    pub fn with_cdf_kwargs(mut self, cdf_kwargs: OpenOptions) -> Self {
        self.cdf_kwargs = cdf_kwargs;
        self
    }
}

/// Where and whether task results are cached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSettings {
    pub checkpointing: bool,
    pub store: ResultStore,
}

impl FlowSettings {
    #[must_use]
    pub fn new(store: ResultStore) -> Self {
        Self {
            checkpointing: true,
            store,
        }
    }

    /// Checkpointing on, store in the system temporary directory
    ///
    /// # Errors
    ///
    /// Returns an error if the store directory cannot be created.
    pub fn with_default_store() -> Result<Self> {
        Ok(Self::new(ResultStore::default_location()?))
    }

    #[must_use]
    pub fn with_checkpointing(mut self, checkpointing: bool) -> Self {
        self.checkpointing = checkpointing;
        self
    }
}

/// Final state of one mapped task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Read back from an existing target
    Cached,
    Computed,
    /// Failed with the given message
    Failed(String),
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Cached => write!(f, "cached"),
            TaskState::Computed => write!(f, "computed"),
            TaskState::Failed(message) => write!(f, "failed: {message}"),
        }
    }
}

/// Report of a flow run: the state of every mapped task, in key order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRun {
    pub tasks: Vec<(String, TaskState)>,
    pub elapsed: Duration,
}

impl FlowRun {
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self
            .tasks
            .iter()
            .any(|(_, state)| matches!(state, TaskState::Failed(_)))
    }

    /// State of the task for `key`
    #[must_use]
    pub fn state(&self, key: &str) -> Option<&TaskState> {
        self.tasks.iter().find(|(k, _)| k == key).map(|(_, s)| s)
    }

    /// Number of tasks that ended in a state equal to `state`
    #[must_use]
    pub fn count(&self, state: &TaskState) -> usize {
        self.tasks.iter().filter(|(_, s)| s == state).count()
    }

    fn log(&self) {
        if self.is_success() {
            info!(
                tasks = self.tasks.len(),
                cached = self.count(&TaskState::Cached),
                computed = self.count(&TaskState::Computed),
                elapsed_ms = self.elapsed.as_millis() as u64,
                "✅ Epoch-mean flow finished"
            );
        } else {
            for (key, state) in &self.tasks {
                if let TaskState::Failed(message) = state {
                    error!(key = %key, "Task failed: {message}");
                }
            }
            error!(tasks = self.tasks.len(), "❌ Epoch-mean flow failed");
        }
    }
}

/// Keys and averaged datasets of a successful run, index-aligned
#[derive(Debug, Clone, PartialEq)]
pub struct FlowOutput {
    pub keys: Vec<String>,
    pub averaged: Vec<Dataset>,
    pub run: FlowRun,
}

/// Average one dataset over time, reusing a cached result when available
///
/// # Errors
///
/// Returns an error if the dataset has no `time` dimension or the target cannot be read
/// or written.
#[instrument(skip(ds, store), fields(key = %key))]
pub fn epoch_average(
    ds: &Dataset,
    key: &str,
    store: &ResultStore,
    checkpointing: bool,
) -> Result<(Dataset, CacheOutcome)> {
    store.get_or_compute(TASK_NAME, key, checkpointing, || epoch_mean(ds))
}

/// Map [`epoch_average`] over every key of the collection in parallel
///
/// Every task runs to completion; failures are recorded in the returned report rather
/// than cancelling the remaining tasks.
pub fn map_epoch_average(
    collection: &Collection,
    settings: &FlowSettings,
) -> (Vec<(String, Result<Dataset>)>, FlowRun) {
    let started = Instant::now();
    let keys = collection.keys();
    let values = collection.values();

    let results: Vec<(String, Result<(Dataset, CacheOutcome)>)> = keys
        .into_par_iter()
        .zip(values.into_par_iter())
        .map(|(key, ds)| {
            let result = epoch_average(ds, &key, &settings.store, settings.checkpointing);
            (key, result)
        })
        .collect();

    let tasks = results
        .iter()
        .map(|(key, result)| {
            let state = match result {
                Ok((_, CacheOutcome::Hit)) => TaskState::Cached,
                Ok((_, CacheOutcome::Computed)) => TaskState::Computed,
                Err(e) => TaskState::Failed(e.to_string()),
            };
            (key.clone(), state)
        })
        .collect();

    let run = FlowRun {
        tasks,
        elapsed: started.elapsed(),
    };
    let results = results
        .into_iter()
        .map(|(key, result)| (key, result.map(|(ds, _)| ds)))
        .collect();
    (results, run)
}

/// Run all four stages
///
/// # Errors
///
/// Returns the first stage error. A failed averaging task is returned as
/// [`DiagError::Task`] for the first failing key after the whole map has been logged.
pub fn run_epoch_mean_flow(params: &FlowParameters, settings: &FlowSettings) -> Result<FlowOutput> {
    let span = info_span!("epoch_mean_flow", catalog = %params.catalog_path.display());
    let _guard = span.enter();

    let catalog = read_catalog(&params.catalog_path, params.multi_var_row)?;
    let subset = subset_catalog(&catalog, &params.search)?;
    let collection = load_catalog(&subset, &params.cdf_kwargs)?;
    if collection.is_empty() {
        warn!("Nothing to average");
    }

    let (results, run) = map_epoch_average(&collection, settings);
    run.log();

    let mut keys = Vec::with_capacity(results.len());
    let mut averaged = Vec::with_capacity(results.len());
    for (key, result) in results {
        match result {
            Ok(ds) => {
                keys.push(key);
                averaged.push(ds);
            }
            Err(e) => return Err(DiagError::for_key(&key, e)),
        }
    }

    Ok(FlowOutput { keys, averaged, run })
}

/// Run the flow and pair the keys with their averaged datasets
///
/// # Errors
///
/// See [`run_epoch_mean_flow`].
pub fn epoch_mean_flow_collection(
    params: &FlowParameters,
    settings: &FlowSettings,
) -> Result<Collection> {
    let output = run_epoch_mean_flow(params, settings)?;
    Ok(convert_to_collection(output.keys, output.averaged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DataArray;
    use ndarray::ArrayD;
    use tempfile::tempdir;

    fn dataset(dims: &[&str], shape: &[usize]) -> Dataset {
        let n: usize = shape.iter().product();
        let mut ds = Dataset::new();
        ds.insert(
            "SST",
            DataArray::new(
                dims.iter().map(|d| (*d).to_string()).collect(),
                ArrayD::from_shape_vec(shape.to_vec(), (0..n).map(|i| i as f32).collect()).unwrap(),
            )
            .unwrap(),
        )
        .unwrap();
        ds
    }

    #[test]
    fn test_map_records_every_task_state() {
        let dir = tempdir().unwrap();
        let settings = FlowSettings::new(ResultStore::open(dir.path()).unwrap());

        let mut collection = Collection::new();
        collection.insert("ocn.a", dataset(&["time", "nlat"], &[2, 3]));
        collection.insert("ocn.b", dataset(&["nlat"], &[3]));

        let (results, run) = map_epoch_average(&collection, &settings);
        assert_eq!(results.len(), 2);
        assert_eq!(run.state("ocn.a"), Some(&TaskState::Computed));
        assert!(matches!(run.state("ocn.b"), Some(TaskState::Failed(_))));
        assert!(!run.is_success());

        let (_, rerun) = map_epoch_average(&collection, &settings);
        assert_eq!(rerun.state("ocn.a"), Some(&TaskState::Cached));
    }

    #[test]
    fn test_parameters_defaults() {
        let params = FlowParameters::new("cat.json");
        assert!(!params.multi_var_row);
        assert!(params.search.is_empty());
        assert_eq!(params.cdf_kwargs, OpenOptions::default());
    }
}
