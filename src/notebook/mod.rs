//! Parameterized plotting notebooks
//!
//! For every analysis section with a `template_notebook`, the template is executed once
//! per configured variable into `{collection_type}_{variable}.ipynb`, after which the
//! word `Variable` in its markdown cells is replaced by the variable name.
//!
//! # Organization
//!
//! - [`format`]: The ipynb document model
//! - [`executor`]: Papermill and native parameter injection

pub mod executor;
pub mod format;

pub use executor::{InjectParameters, NotebookExecutor, Papermill, Parameters};
pub use format::Notebook;

use crate::config::Config;
use crate::errors::{DiagError, Result};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Placeholder replaced in markdown cells
pub const HEADER_PLACEHOLDER: &str = "Variable";

/// How the kernel for each execution is chosen
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KernelSelection {
    /// Reuse the template's `metadata.kernelspec.name`
    #[default]
    FromTemplate,
    /// Always use this kernel
    Named(String),
}

impl KernelSelection {
    /// Kernel name to execute `template` with
    ///
    /// # Errors
    ///
    /// Returns [`DiagError::Notebook`] if the template has no kernelspec under
    /// [`KernelSelection::FromTemplate`].
    pub fn resolve(&self, template: &Path) -> Result<String> {
        match self {
            KernelSelection::FromTemplate => nb_get_kernelname(template),
            KernelSelection::Named(name) => Ok(name.clone()),
        }
    }
}

/// Kernel name declared by a notebook
///
/// # Errors
///
/// Returns [`DiagError::Notebook`] if the notebook is unreadable or declares no kernel.
pub fn nb_get_kernelname(path: &Path) -> Result<String> {
    Notebook::read(path)?
        .kernel_name()
        .map(str::to_string)
        .ok_or_else(|| {
            DiagError::Notebook(format!("{} has no metadata.kernelspec.name", path.display()))
        })
}

/// Replace `Variable` with `variable` in every markdown cell and overwrite the notebook
///
/// # Errors
///
/// Returns an error if the notebook cannot be read or written.
pub fn modify_markdown_header(path: &Path, variable: &str) -> Result<()> {
    let mut notebook = Notebook::read(path)?;
    let changed = notebook.replace_in_markdown(HEADER_PLACEHOLDER, variable);
    notebook.write(path)?;
    debug!(cells = changed, "Rewrote markdown cells");
    info!("Modified {} with {} header", path.display(), variable);
    Ok(())
}

/// One notebook to produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookJob {
    pub collection_type: String,
    pub variable: String,
    pub template: PathBuf,
    pub output: PathBuf,
}

/// Where templates are found and outputs written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateOptions {
    pub output_dir: PathBuf,
    /// Relative template paths are resolved against this directory
    pub template_dir: PathBuf,
    pub kernel: KernelSelection,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            template_dir: PathBuf::from("."),
            kernel: KernelSelection::default(),
        }
    }
}

/// Every (section, variable) pair that has a template, in file order
#[must_use]
pub fn notebook_jobs(config: &Config, options: &GenerateOptions) -> Vec<NotebookJob> {
    let mut jobs = Vec::new();
    for (collection_type, section) in config.analysis.sections() {
        let Some(template) = &section.template_notebook else {
            debug!(section = collection_type, "No template_notebook, skipping");
            continue;
        };
        for variable in &section.variables {
            jobs.push(NotebookJob {
                collection_type: collection_type.to_string(),
                variable: variable.clone(),
                template: options.template_dir.join(template),
                output: options
                    .output_dir
                    .join(format!("{collection_type}_{variable}.ipynb")),
            });
        }
    }
    jobs
}

/// Execute every template once per variable and rewrite the headers
///
/// Returns the written notebooks in generation order. Kernel names are resolved once per
/// template.
///
/// # Errors
///
/// Stops at the first notebook that cannot be executed or rewritten.
pub fn generate_plotting_notebooks(
    config: &Config,
    options: &GenerateOptions,
    executor: &dyn NotebookExecutor,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(&options.output_dir)?;

    let mut kernels: Vec<(PathBuf, String)> = Vec::new();
    let mut written = Vec::new();
    for job in notebook_jobs(config, options) {
        let kernel = match kernels.iter().find(|(t, _)| *t == job.template) {
            Some((_, kernel)) => kernel.clone(),
            None => {
                let kernel = options.kernel.resolve(&job.template)?;
                kernels.push((job.template.clone(), kernel.clone()));
                kernel
            }
        };

        let mut parameters = Parameters::new();
        parameters.insert("variable".to_string(), json!(job.variable));

        info!(
            template = %job.template.display(),
            output = %job.output.display(),
            kernel = %kernel,
            "📓 Executing notebook"
        );
        executor.execute(&job.template, &job.output, &parameters, &kernel)?;
        modify_markdown_header(&job.output, &job.variable)?;
        written.push(job.output);
    }

    info!(notebooks = written.len(), "Generated plotting notebooks");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPLOY: &str = "reference_case: ref_case\nreference_case_file_format: history\n";

    #[test]
    fn test_jobs_skip_sections_without_template() {
        let analysis = "\
epoch_mean:
  component:
    ocn: {TEMP: {}}
ocean_maps:
  template_notebook: templates/maps.ipynb
  variables: [SST, SSH]
";
        let config = Config::from_yaml_strs(DEPLOY, analysis).unwrap();
        let options = GenerateOptions {
            output_dir: PathBuf::from("out"),
            template_dir: PathBuf::from("cfg"),
            kernel: KernelSelection::Named("python3".to_string()),
        };
        let jobs = notebook_jobs(&config, &options);

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].output, PathBuf::from("out/ocean_maps_SST.ipynb"));
        assert_eq!(jobs[1].template, PathBuf::from("cfg/templates/maps.ipynb"));
        assert_eq!(
            options.kernel.resolve(&jobs[0].template).unwrap(),
            "python3"
        );
    }
}
