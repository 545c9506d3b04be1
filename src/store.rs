//! Cache of task results, one Zarr group per task target
//!
//! Targets are named `{task_name}-{key}.zarr` inside the store root. With checkpointing
//! enabled a task whose target already exists is not recomputed: the stored artifact is
//! read back instead. A target only counts as existing once its consolidated metadata is
//! on disk, so a group left behind by an interrupted write is recomputed and replaced.

use crate::dataset::Dataset;
use crate::errors::Result;
use crate::zarr_io::{read_zarr_dataset, write_zarr_dataset, ZarrSource};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directory name of the default store under the system temporary directory
pub const DEFAULT_STORE_NAME: &str = "marbl-example-cache";

/// Where a cached result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Read back from an existing target
    Hit,
    /// Computed and written to the target
    Computed,
}

/// Filesystem-backed result store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    /// Open (creating if needed) a store rooted at `root`
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "Opened result store");
        Ok(Self { root })
    }

    /// The default store in the system temporary directory
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn default_location() -> Result<Self> {
        Self::open(std::env::temp_dir().join(DEFAULT_STORE_NAME))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Target name for a task result
    #[must_use]
    pub fn target_name(task_name: &str, key: &str) -> String {
        format!("{task_name}-{key}.zarr")
    }

    /// Full path of a task's target
    #[must_use]
    pub fn target_path(&self, task_name: &str, key: &str) -> PathBuf {
        self.root.join(Self::target_name(task_name, key))
    }

    /// Whether a complete artifact exists for the target
    #[must_use]
    pub fn exists(&self, task_name: &str, key: &str) -> bool {
        let source = ZarrSource::new(self.target_path(task_name, key));
        source.exists() && source.is_consolidated()
    }

    /// Read a stored result
    ///
    /// # Errors
    ///
    /// Returns an error if the target is missing or unreadable.
    pub fn read(&self, task_name: &str, key: &str) -> Result<Dataset> {
        read_zarr_dataset(&self.target_path(task_name, key))
    }

    /// Write a result, overwriting any previous artifact
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact cannot be written.
    pub fn write(&self, task_name: &str, key: &str, dataset: &Dataset) -> Result<()> {
        write_zarr_dataset(&self.target_path(task_name, key), dataset)
    }

    /// Return the cached result for a target, or compute and store it
    ///
    /// When `checkpointing` is off the computation always runs and nothing is written.
    ///
    /// # Errors
    ///
    /// Returns the computation's error, or an error reading or writing the target.
    pub fn get_or_compute<F>(
        &self,
        task_name: &str,
        key: &str,
        checkpointing: bool,
        compute: F,
    ) -> Result<(Dataset, CacheOutcome)>
    where
        F: FnOnce() -> Result<Dataset>,
    {
        if !checkpointing {
            return Ok((compute()?, CacheOutcome::Computed));
        }

        if self.exists(task_name, key) {
            info!(target_name = %Self::target_name(task_name, key), "♻️ Using cached result");
            return Ok((self.read(task_name, key)?, CacheOutcome::Hit));
        }

        let dataset = compute()?;
        self.write(task_name, key, &dataset)?;
        Ok((dataset, CacheOutcome::Computed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DataArray;
    use ndarray::ArrayD;
    use std::cell::Cell;
    use tempfile::tempdir;

    fn small_dataset(value: f32) -> Dataset {
        let mut ds = Dataset::new();
        ds.insert(
            "SST",
            DataArray::new(vec!["nlat".into()], ArrayD::from_elem(vec![2], value)).unwrap(),
        )
        .unwrap();
        ds
    }

    #[test]
    fn test_target_name() {
        assert_eq!(
            ResultStore::target_name("epoch_average", "ocn.historical.pop.h"),
            "epoch_average-ocn.historical.pop.h.zarr"
        );
    }

    #[test]
    fn test_second_call_hits_cache() {
        let dir = tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        let calls = Cell::new(0);

        let (first, outcome) = store
            .get_or_compute("epoch_average", "k", true, || {
                calls.set(calls.get() + 1);
                Ok(small_dataset(1.5))
            })
            .unwrap();
        assert_eq!(outcome, CacheOutcome::Computed);

        let (second, outcome) = store
            .get_or_compute("epoch_average", "k", true, || {
                calls.set(calls.get() + 1);
                Ok(small_dataset(9.0))
            })
            .unwrap();
        assert_eq!(outcome, CacheOutcome::Hit);
        assert_eq!(calls.get(), 1);
        assert_eq!(
            first.variable("SST").unwrap().data,
            second.variable("SST").unwrap().data
        );
    }

    #[test]
    fn test_checkpointing_off_always_computes() {
        let dir = tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        let (_, outcome) = store
            .get_or_compute("epoch_average", "k", false, || Ok(small_dataset(1.0)))
            .unwrap();
        assert_eq!(outcome, CacheOutcome::Computed);
        assert!(!store.exists("epoch_average", "k"));
    }

    #[test]
    fn test_incomplete_target_is_recomputed() {
        let dir = tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        let target = store.target_path("epoch_average", "k");
        fs::create_dir_all(target.join("SST")).unwrap();
        fs::write(target.join(".zgroup"), r#"{"zarr_format": 2}"#).unwrap();
        assert!(!store.exists("epoch_average", "k"));

        let calls = Cell::new(0);
        let (dataset, outcome) = store
            .get_or_compute("epoch_average", "k", true, || {
                calls.set(calls.get() + 1);
                Ok(small_dataset(2.5))
            })
            .unwrap();
        assert_eq!(outcome, CacheOutcome::Computed);
        assert_eq!(calls.get(), 1);
        assert!(store.exists("epoch_average", "k"));
        assert_eq!(
            store.read("epoch_average", "k").unwrap().variable("SST").unwrap().data,
            dataset.variable("SST").unwrap().data
        );
    }
}
