//! Defines command-line interface options using `clap` for the `epochdiag` application.

use clap::{Args as ClapArgs, Parser, Subcommand};
use epoch_diagnostics::catalog::SearchQuery;
use epoch_diagnostics::errors::Result;
use serde_json::Value as JsonValue;
use std::path::PathBuf;

/// Catalog-driven epoch-mean diagnostics
#[derive(Parser, Debug)]
#[command(
    version,
    name = "epochdiag",
    about = "Epoch means of catalogued climate model output, plotting notebooks and global maps"
)]
pub struct Args {
    /// Directory holding deploy.yml and analysis.yml
    #[arg(long, global = true, default_value = ".")]
    pub config_dir: PathBuf,

    /// Number of threads to use for parallel processing. Defaults to number of CPU cores.
    #[arg(short = 't', long, global = true)]
    pub threads: Option<usize>,

    /// Enable verbose output.
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the loaded configuration, including the derived epoch-mean variables
    Config,

    /// Run the epoch-mean flow over a catalog
    EpochMean(FlowArgs),

    /// Generate one plotting notebook per configured variable
    Notebooks(NotebookArgs),

    /// Run the epoch-mean flow and draw one global map per key
    Plot(PlotArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct FlowArgs {
    /// Path to the catalog JSON descriptor
    #[arg(long)]
    pub catalog: PathBuf,

    /// Catalog rows list several variables (history files)
    #[arg(long, default_value_t = false)]
    pub multi_var_row: bool,

    /// Search criterion, formatted as <column>=<value>[,<value>...]; repeatable
    #[arg(long = "search")]
    pub search: Vec<String>,

    /// Dataset open options as a JSON object, e.g. '{"mask_and_scale": false}'
    #[arg(long, value_parser = parse_json_arg)]
    pub cdf_kwargs: Option<JsonValue>,

    /// Result store directory. Defaults to the system temporary directory.
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Always recompute and never write cached results
    #[arg(long, default_value_t = false)]
    pub no_checkpoint: bool,
}

impl FlowArgs {
    /// Combine every `--search` criterion into one query
    pub fn search_query(&self) -> Result<SearchQuery> {
        self.search
            .iter()
            .try_fold(SearchQuery::new(), |query, criterion| query.parse_criterion(criterion))
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct NotebookArgs {
    /// Directory the notebooks are written to
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Kernel for every notebook. Defaults to each template's own kernel.
    #[arg(long)]
    pub kernel: Option<String>,

    /// Execute with papermill instead of only injecting parameters
    #[arg(long, default_value_t = false)]
    pub execute: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct PlotArgs {
    #[command(flatten)]
    pub flow: FlowArgs,

    /// Variable to plot
    #[arg(long)]
    pub variable: String,

    /// Lower bound of the color levels (requires --vmax)
    #[arg(long, requires = "vmax", allow_negative_numbers = true)]
    pub vmin: Option<f64>,

    /// Upper bound of the color levels (requires --vmin)
    #[arg(long, requires = "vmin", allow_negative_numbers = true)]
    pub vmax: Option<f64>,

    /// Named colormap used without --vmin/--vmax
    #[arg(long, default_value = "magma")]
    pub cmap: String,

    /// Use index coordinates instead of the dataset's nlon/nlat variables
    #[arg(long, default_value_t = false)]
    pub no_nlon_nlat: bool,

    /// Output file: .json writes the layout description, anything else a PNG
    #[arg(short, long)]
    pub output: PathBuf,
}

fn parse_json_arg(s: &str) -> std::result::Result<JsonValue, String> {
    serde_json::from_str(s).map_err(|e| format!("Invalid JSON: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_mean_command() {
        let args = Args::try_parse_from([
            "epochdiag",
            "--threads",
            "4",
            "epoch-mean",
            "--catalog",
            "cat.json",
            "--search",
            "component=ocn",
            "--search",
            "variable=TEMP",
            "--cdf-kwargs",
            r#"{"chunks": {}}"#,
        ])
        .unwrap();
        assert_eq!(args.threads, Some(4));
        match args.command {
            Command::EpochMean(flow) => {
                let query = flow.search_query().unwrap();
                assert_eq!(query.values("component"), Some(&["ocn".to_string()][..]));
                assert_eq!(query.values("variable"), Some(&["TEMP".to_string()][..]));
                assert!(flow.cdf_kwargs.is_some());
                assert!(!flow.no_checkpoint);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_malformed_search_fails_when_building_the_query() {
        let args = Args::try_parse_from([
            "epochdiag", "epoch-mean", "--catalog", "cat.json", "--search", "variable",
        ])
        .unwrap();
        match args.command {
            Command::EpochMean(flow) => assert!(flow.search_query().is_err()),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_plot_requires_both_bounds() {
        let result = Args::try_parse_from([
            "epochdiag", "plot", "--catalog", "c.json", "--variable", "SST", "--vmin", "-2",
            "--output", "out.png",
        ]);
        assert!(result.is_err());
    }
}
