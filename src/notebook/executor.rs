//! Executing a template notebook with bound parameters

use super::format::{Notebook, NotebookCell, INJECTED_PARAMETERS_TAG, PARAMETERS_TAG};
use crate::errors::{DiagError, Result};
use serde_json::{json, Map, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, instrument};

/// Parameters bound into a notebook, in insertion order
pub type Parameters = Map<String, JsonValue>;

/// Runs a template notebook into an output notebook
pub trait NotebookExecutor: Send + Sync {
    /// Produce `output` from `input` with `parameters` bound, using kernel `kernel_name`
    ///
    /// # Errors
    ///
    /// Returns [`DiagError::Notebook`] if the notebook cannot be produced.
    fn execute(
        &self,
        input: &Path,
        output: &Path,
        parameters: &Parameters,
        kernel_name: &str,
    ) -> Result<()>;
}

/// Delegates to the `papermill` command-line tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Papermill {
    pub program: PathBuf,
    /// Passed after the generated arguments
    pub extra_args: Vec<String>,
}

impl Default for Papermill {
    fn default() -> Self {
        Self {
            program: PathBuf::from("papermill"),
            extra_args: Vec::new(),
        }
    }
}

impl Papermill {
    /// Command-line arguments for one execution
    #[must_use]
    pub fn arguments(
        &self,
        input: &Path,
        output: &Path,
        parameters: &Parameters,
        kernel_name: &str,
    ) -> Vec<String> {
        let mut args = vec![
            input.display().to_string(),
            output.display().to_string(),
        ];
        // `-p` re-parses its value, so strings go through `-r` to stay strings
        for (name, value) in parameters {
            let (flag, value) = match value {
                JsonValue::String(s) => ("-r", s.clone()),
                JsonValue::Array(_) | JsonValue::Object(_) => ("-y", value.to_string()),
                scalar => ("-p", python_literal(scalar)),
            };
            args.extend([flag.to_string(), name.clone(), value]);
        }
        args.extend(["-k".to_string(), kernel_name.to_string()]);
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

impl NotebookExecutor for Papermill {
    #[instrument(skip(self, parameters), fields(input = %input.display()))]
    fn execute(
        &self,
        input: &Path,
        output: &Path,
        parameters: &Parameters,
        kernel_name: &str,
    ) -> Result<()> {
        let args = self.arguments(input, output, parameters, kernel_name);
        debug!(program = %self.program.display(), ?args, "Running papermill");

        let result = Command::new(&self.program).args(&args).output().map_err(|e| {
            DiagError::Notebook(format!("cannot run {}: {e}", self.program.display()))
        })?;

        if !result.status.success() {
            return Err(DiagError::Notebook(format!(
                "{} exited with {}: {}",
                self.program.display(),
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Writes the parameterized notebook without running a kernel
///
/// A code cell tagged `injected-parameters` is placed after the cell tagged `parameters`
/// (or first when there is none), replacing any earlier injected cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InjectParameters;

impl NotebookExecutor for InjectParameters {
    fn execute(
        &self,
        input: &Path,
        output: &Path,
        parameters: &Parameters,
        kernel_name: &str,
    ) -> Result<()> {
        let mut notebook = Notebook::read(input)?;
        inject_parameters(&mut notebook, parameters, kernel_name);

        let papermill = notebook
            .metadata
            .entry("papermill")
            .or_insert_with(|| json!({}));
        if !papermill.is_object() {
            *papermill = json!({});
        }
        papermill["input_path"] = json!(input.display().to_string());
        papermill["output_path"] = json!(output.display().to_string());

        notebook.write(output)?;
        debug!(output = %output.display(), "Injected parameters");
        Ok(())
    }
}

/// Insert the parameter cell and record parameters and kernel in the metadata
pub fn inject_parameters(notebook: &mut Notebook, parameters: &Parameters, kernel_name: &str) {
    notebook
        .cells
        .retain(|cell| !cell.has_tag(INJECTED_PARAMETERS_TAG));

    let mut source = String::from("# Parameters\n");
    for (name, value) in parameters {
        source.push_str(&format!("{name} = {}\n", python_literal(value)));
    }
    let cell = NotebookCell::code(source).with_tags(&[INJECTED_PARAMETERS_TAG]);

    let position = notebook
        .cells
        .iter()
        .position(|cell| cell.has_tag(PARAMETERS_TAG))
        .map_or(0, |i| i + 1);
    notebook.cells.insert(position, cell);

    notebook.set_kernel_name(kernel_name);
    let papermill = notebook
        .metadata
        .entry("papermill")
        .or_insert_with(|| json!({}));
    if !papermill.is_object() {
        *papermill = json!({});
    }
    papermill["parameters"] = JsonValue::Object(parameters.clone());
}

/// Render a JSON value as Python source
fn python_literal(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "None".to_string(),
        JsonValue::Bool(true) => "True".to_string(),
        JsonValue::Bool(false) => "False".to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => JsonValue::String(s.clone()).to_string(),
        JsonValue::Array(items) => format!(
            "[{}]",
            items.iter().map(python_literal).collect::<Vec<_>>().join(", ")
        ),
        JsonValue::Object(map) => format!(
            "{{{}}}",
            map.iter()
                .map(|(k, v)| format!("{}: {}", JsonValue::String(k.clone()), python_literal(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}
