//! Deployment and analysis configuration
//!
//! Both files are loaded once at process start into a [`Config`] that is then passed by
//! reference to every consumer. Loading derives the flat `epoch_mean.variables` list from
//! the nested component mapping; nothing mutates the configuration afterwards.

use crate::errors::{DiagError, Result};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::{Mapping, Value as YamlValue};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Deployment file name, looked up in the configuration directory
pub const DEPLOY_FILE: &str = "deploy.yml";

/// Analysis file name, looked up in the configuration directory
pub const ANALYSIS_FILE: &str = "analysis.yml";

/// Analysis section holding the component/variable mapping for the epoch-mean flow
pub const EPOCH_MEAN_SECTION: &str = "epoch_mean";

/// Layout of the model output files for a case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// History files: many variables per file
    History,
    /// Timeseries files: one variable per file
    Timeseries,
}

impl FileFormat {
    /// Whether catalog rows for this format list several variables
    #[must_use]
    pub const fn is_multi_variable_row(self) -> bool {
        matches!(self, Self::History)
    }
}

/// Contents of `deploy.yml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    pub reference_case: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub reference_case_path: Vec<PathBuf>,
    pub reference_case_file_format: FileFormat,
    #[serde(default)]
    pub case_to_compare: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub case_to_compare_path: Vec<PathBuf>,
    #[serde(default)]
    pub case_to_compare_file_format: Option<FileFormat>,
    /// Keys this crate does not interpret
    #[serde(flatten)]
    pub extra: BTreeMap<String, YamlValue>,
}

/// One top-level section of `analysis.yml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisSection {
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub template_notebook: Option<PathBuf>,
    /// component name -> (variable name -> per-variable settings)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<Mapping>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, YamlValue>,
}

/// Contents of `analysis.yml`, sections kept in file order
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    sections: Vec<(String, AnalysisSection)>,
    epoch_mean: usize,
}

impl AnalysisConfig {
    /// Parse the analysis document and derive the epoch-mean variable list
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a mapping of mappings, if the
    /// `epoch_mean` section is missing, or if its `component` entry is malformed.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let document: Mapping = serde_yaml::from_str(contents)?;

        let mut sections = Vec::with_capacity(document.len());
        for (name, body) in document {
            let name = yaml_key_to_string(&name)?;
            let section: AnalysisSection = serde_yaml::from_value(body)?;
            sections.push((name, section));
        }

        let epoch_mean = sections
            .iter()
            .position(|(name, _)| name == EPOCH_MEAN_SECTION)
            .ok_or_else(|| DiagError::InvalidConfig(format!("missing '{EPOCH_MEAN_SECTION}' section")))?;

        let mut config = Self { sections, epoch_mean };
        config.derive_epoch_mean_variables()?;
        Ok(config)
    }

    fn derive_epoch_mean_variables(&mut self) -> Result<()> {
        let section = &mut self.sections[self.epoch_mean].1;

        let component = section.component.as_ref().ok_or_else(|| {
            DiagError::InvalidConfig(format!("'{EPOCH_MEAN_SECTION}' section has no 'component' mapping"))
        })?;

        section.variables = flatten_component_variables(component)?;
        debug!(variables = ?section.variables, "Derived epoch-mean variables");
        Ok(())
    }

    /// Look up a section by name
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&AnalysisSection> {
        self.sections
            .iter()
            .find_map(|(n, s)| (n == name).then_some(s))
    }

    /// The `epoch_mean` section, with its derived `variables`
    #[must_use]
    pub fn epoch_mean(&self) -> &AnalysisSection {
        &self.sections[self.epoch_mean].1
    }

    /// All sections in file order
    pub fn sections(&self) -> impl Iterator<Item = (&str, &AnalysisSection)> {
        self.sections.iter().map(|(n, s)| (n.as_str(), s))
    }
}

impl Serialize for AnalysisConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.sections.len()))?;
        for (name, section) in &self.sections {
            map.serialize_entry(name, section)?;
        }
        map.end()
    }
}

/// Flatten `component -> variable -> settings` into the variable names
///
/// Components and their variables are visited in file order. The result is a
/// concatenation: a variable listed under two components appears twice.
///
/// # Errors
///
/// Returns an error if a component body is not a mapping or a key is not a scalar.
pub fn flatten_component_variables(component: &Mapping) -> Result<Vec<String>> {
    let mut variables = Vec::new();
    for (name, body) in component {
        let body = body.as_mapping().ok_or_else(|| {
            DiagError::InvalidConfig(format!(
                "component '{}' must map variable names to settings",
                yaml_key_to_string(name).unwrap_or_else(|_| format!("{name:?}"))
            ))
        })?;
        for key in body.keys() {
            variables.push(yaml_key_to_string(key)?);
        }
    }
    Ok(variables)
}

fn yaml_key_to_string(key: &YamlValue) -> Result<String> {
    match key {
        YamlValue::String(s) => Ok(s.clone()),
        YamlValue::Number(n) => Ok(n.to_string()),
        YamlValue::Bool(b) => Ok(b.to_string()),
        other => Err(DiagError::InvalidConfig(format!(
            "expected a scalar key, found {other:?}"
        ))),
    }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(PathBuf),
        Many(Vec<PathBuf>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(path)) => vec![path],
        Some(OneOrMany::Many(paths)) => paths,
    })
}

/// Process-wide configuration, read-only after loading
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub deploy: DeployConfig,
    pub analysis: AnalysisConfig,
}

impl Config {
    /// Load `deploy.yml` and `analysis.yml` from `dir`
    ///
    /// # Errors
    ///
    /// Returns an I/O error if either file is missing and a YAML or configuration error
    /// if either is malformed.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let deploy = read_config_file(&dir.join(DEPLOY_FILE))?;
        let analysis = read_config_file(&dir.join(ANALYSIS_FILE))?;
        let config = Self::from_yaml_strs(&deploy, &analysis)?;

        info!(
            dir = %dir.display(),
            reference_case = %config.deploy.reference_case,
            sections = config.analysis.sections.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Load both files from the current working directory
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn from_current_dir() -> Result<Self> {
        Self::load(std::env::current_dir()?)
    }

    /// Build a configuration from the two documents' text
    ///
    /// # Errors
    ///
    /// Returns an error if either document does not parse.
    pub fn from_yaml_strs(deploy: &str, analysis: &str) -> Result<Self> {
        Ok(Self {
            deploy: serde_yaml::from_str(deploy)?,
            analysis: AnalysisConfig::from_yaml_str(analysis)?,
        })
    }

    /// The `epoch_mean` section, with its derived `variables`
    #[must_use]
    pub fn epoch_mean(&self) -> &AnalysisSection {
        self.analysis.epoch_mean()
    }
}

fn read_config_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        DiagError::Io(std::io::Error::new(
            e.kind(),
            format!("cannot read {}: {e}", path.display()),
        ))
    })
}
