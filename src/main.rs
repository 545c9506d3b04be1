//! Entry point for the `epochdiag` application.
//! Handles CLI parsing, loads the configuration and dispatches the subcommands.

use clap::Parser;
use epoch_diagnostics::config::Config;
use epoch_diagnostics::dataset::convert_to_collection;
use epoch_diagnostics::errors::Result;
use epoch_diagnostics::flow::{run_epoch_mean_flow, FlowOutput, FlowParameters, FlowSettings};
use epoch_diagnostics::logging::init_logging;
use epoch_diagnostics::netcdf_io::OpenOptions;
use epoch_diagnostics::notebook::{
    generate_plotting_notebooks, GenerateOptions, InjectParameters, KernelSelection,
    NotebookExecutor, Papermill,
};
use epoch_diagnostics::parallel::{ParallelConfig, ParallelInfo};
use epoch_diagnostics::plotting::{plot_collection_global_map, PlotOptions};
use epoch_diagnostics::store::ResultStore;
use std::error::Error;
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use tracing::error;

mod cli;

use cli::{Args, Command, FlowArgs, NotebookArgs, PlotArgs};

fn main() -> ExitCode {
    // Parse command-line arguments
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            let mut source = e.source();
            while let Some(cause) = source {
                error!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    ParallelConfig::new(args.threads).setup_global_pool()?;
    ParallelInfo::current().log();

    match args.command {
        Command::Config => {
            let config = Config::load(&args.config_dir)?;
            print!("{}", serde_yaml::to_string(&config)?);
        }
        Command::EpochMean(flow) => {
            let output = run_flow(&flow)?;
            for (key, ds) in output.keys.iter().zip(&output.averaged) {
                let state = output
                    .run
                    .state(key)
                    .map_or_else(String::new, ToString::to_string);
                let variables: Vec<&str> = ds.variable_names().collect();
                println!("{key} [{state}]: {}", variables.join(", "));
            }
        }
        Command::Notebooks(notebooks) => generate_notebooks(&args.config_dir, &notebooks)?,
        Command::Plot(plot) => plot_maps(&plot)?,
    }

    Ok(())
}

fn run_flow(args: &FlowArgs) -> Result<FlowOutput> {
    let search = args.search_query()?;
    let cdf_kwargs = match &args.cdf_kwargs {
        Some(value) => OpenOptions::from_json(value.clone())?,
        None => OpenOptions::default(),
    };
    let params = FlowParameters::new(&args.catalog)
        .with_multi_var_row(args.multi_var_row)
        .with_search(search)
        .with_cdf_kwargs(cdf_kwargs);

    let store = match &args.store {
        Some(dir) => ResultStore::open(dir)?,
        None => ResultStore::default_location()?,
    };
    let settings = FlowSettings::new(store).with_checkpointing(!args.no_checkpoint);

    run_epoch_mean_flow(&params, &settings)
}

fn generate_notebooks(config_dir: &Path, args: &NotebookArgs) -> Result<()> {
    let config = Config::load(config_dir)?;
    let options = GenerateOptions {
        output_dir: args.output_dir.clone(),
        template_dir: config_dir.to_path_buf(),
        kernel: args
            .kernel
            .clone()
            .map_or(KernelSelection::FromTemplate, KernelSelection::Named),
    };
    let executor: Box<dyn NotebookExecutor> = if args.execute {
        Box::new(Papermill::default())
    } else {
        Box::new(InjectParameters)
    };

    for path in generate_plotting_notebooks(&config, &options, executor.as_ref())? {
        println!("{}", path.display());
    }
    Ok(())
}

fn plot_maps(args: &PlotArgs) -> Result<()> {
    let output = run_flow(&args.flow)?;
    let collection = convert_to_collection(output.keys, output.averaged);
    let options = PlotOptions {
        add_nlon_nlat: !args.no_nlon_nlat,
        cmap: args.cmap.clone(),
        vmin: args.vmin,
        vmax: args.vmax,
    };
    let column = plot_collection_global_map(&collection, &args.variable, &options)?;

    let is_json = args
        .output
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        fs::write(&args.output, column.to_json()?)?;
    } else {
        column.save_png(&args.output)?;
    }
    println!("✅ Saved {} panels to {}", column.len(), args.output.display());
    Ok(())
}
