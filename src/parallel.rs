//! Parallel processing configuration and management
//!
//! Per-key tasks of the epoch-mean flow and the axis reductions both run on Rayon's
//! global pool; this module configures it once at startup.

use crate::errors::{DiagError, Result};
use rayon::ThreadPoolBuilder;
use tracing::{debug, info};

/// Configuration for parallel processing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParallelConfig {
    /// `None` keeps Rayon's default (one thread per logical core)
    pub num_threads: Option<usize>,
}

impl ParallelConfig {
    #[must_use]
    pub fn new(num_threads: Option<usize>) -> Self {
        Self { num_threads }
    }

    /// Use every available CPU core
    #[must_use]
    pub fn all_cores() -> Self {
        Self::with_threads(num_cpus::get())
    }

    #[must_use]
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads: Some(num_threads),
        }
    }

    /// Set up the global Rayon thread pool
    ///
    /// The global pool can only be built once per process; a second call fails.
    ///
    /// # Errors
    ///
    /// Returns [`DiagError::ThreadPool`] for a zero thread count or if the global pool
    /// was already initialized.
    pub fn setup_global_pool(&self) -> Result<()> {
        match self.num_threads {
            Some(0) => Err(DiagError::ThreadPool(
                "thread count must be at least 1".to_string(),
            )),
            Some(num_threads) => {
                ThreadPoolBuilder::new()
                    .num_threads(num_threads)
                    .thread_name(|i| format!("epochdiag-{i}"))
                    .build_global()
                    .map_err(|e| {
                        DiagError::ThreadPool(format!(
                            "Failed to initialize thread pool with {num_threads} threads: {e}"
                        ))
                    })?;
                info!(threads = num_threads, "✅ Configured parallel processing");
                Ok(())
            }
            None => {
                debug!(threads = rayon::current_num_threads(), "Using default thread pool");
                Ok(())
            }
        }
    }
}

/// Information about the parallel processing environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelInfo {
    pub current_threads: usize,
    pub available_cores: usize,
    pub available_parallelism: usize,
}

impl ParallelInfo {
    /// Snapshot of the current environment
    #[must_use]
    pub fn current() -> Self {
        Self {
            current_threads: rayon::current_num_threads(),
            available_cores: num_cpus::get(),
            available_parallelism: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1),
        }
    }

    /// Log the environment at debug level
    pub fn log(&self) {
        debug!(
            current_threads = self.current_threads,
            available_cores = self.available_cores,
            available_parallelism = self.available_parallelism,
            "📊 Parallel processing information"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        assert_eq!(ParallelConfig::default().num_threads, None);
        assert_eq!(ParallelConfig::with_threads(3).num_threads, Some(3));
        assert_eq!(ParallelConfig::all_cores().num_threads, Some(num_cpus::get()));
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(matches!(
            ParallelConfig::with_threads(0).setup_global_pool(),
            Err(DiagError::ThreadPool(_))
        ));
    }

    #[test]
    fn test_info_is_positive() {
        let info = ParallelInfo::current();
        assert!(info.current_threads >= 1);
        assert!(info.available_parallelism >= 1);
    }
}
