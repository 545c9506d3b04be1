//! Jupyter notebook (ipynb, nbformat 4) document model
//!
//! Fields not modelled here are carried through `extra` maps so a read/write cycle
//! leaves the rest of the document intact.

use crate::errors::{DiagError, Result};
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::fmt;
use std::fs;
use std::path::Path;

/// Cell metadata tag marking the template's parameter cell
pub const PARAMETERS_TAG: &str = "parameters";

/// Cell metadata tag marking a cell written by parameter injection
pub const INJECTED_PARAMETERS_TAG: &str = "injected-parameters";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    pub cells: Vec<NotebookCell>,
    #[serde(default)]
    pub metadata: Map<String, JsonValue>,
    #[serde(default = "default_nbformat")]
    pub nbformat: u32,
    #[serde(default)]
    pub nbformat_minor: u32,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

fn default_nbformat() -> u32 {
    4
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Markdown,
    Code,
    Raw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotebookCell {
    pub cell_type: CellType,
    #[serde(default)]
    pub metadata: Map<String, JsonValue>,
    #[serde(default)]
    pub source: Source,
    /// `outputs`, `execution_count`, `id`, `attachments`, ...
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl NotebookCell {
    /// A fresh, unexecuted code cell
    #[must_use]
    pub fn code(source: impl Into<String>) -> Self {
        let mut extra = Map::new();
        extra.insert("execution_count".to_string(), JsonValue::Null);
        extra.insert("outputs".to_string(), json!([]));
        Self {
            cell_type: CellType::Code,
            metadata: Map::new(),
            source: Source(source.into()),
            extra,
        }
    }

    /// Tags from `metadata.tags`
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.metadata
            .get("tags")
            .and_then(JsonValue::as_array)
            .into_iter()
            .flatten()
            .filter_map(JsonValue::as_str)
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags().any(|t| t == tag)
    }

    #[must_use]
    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.metadata.insert("tags".to_string(), json!(tags));
        self
    }
}

/// Cell text; read from a string or a list of lines, written as a list of lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Source(pub String);

impl Source {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into nbformat lines, each keeping its trailing newline
    #[must_use]
    pub fn lines(&self) -> Vec<&str> {
        self.0.split_inclusive('\n').collect()
    }
}

impl Serialize for Source {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.lines())
    }
}

impl<'de> Deserialize<'de> for Source {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SourceVisitor;

        impl<'de> Visitor<'de> for SourceVisitor {
            type Value = Source;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or a list of strings")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Source, E> {
                Ok(Source(v.to_string()))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Source, A::Error> {
                let mut text = String::new();
                while let Some(line) = seq.next_element::<String>()? {
                    text.push_str(&line);
                }
                Ok(Source(text))
            }
        }

        deserializer.deserialize_any(SourceVisitor)
    }
}

impl Notebook {
    /// Read an ipynb file
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable or not a notebook.
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            DiagError::Notebook(format!("cannot read notebook {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
            .map_err(|e| DiagError::Notebook(format!("{}: {e}", path.display())))
    }

    /// Parse notebook JSON
    ///
    /// # Errors
    ///
    /// Returns [`DiagError::Json`] for malformed documents.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize with nbformat's layout: one-space indent and a trailing newline
    ///
    /// # Errors
    ///
    /// Returns [`DiagError::Json`] if serialization fails.
    pub fn to_json_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut serializer)?;
        let mut text = String::from_utf8(buf)
            .map_err(|e| DiagError::Notebook(format!("notebook is not UTF-8: {e}")))?;
        text.push('\n');
        Ok(text)
    }

    /// Overwrite `path` with this notebook
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    /// `metadata.kernelspec.name`
    #[must_use]
    pub fn kernel_name(&self) -> Option<&str> {
        self.metadata
            .get("kernelspec")
            .and_then(|k| k.get("name"))
            .and_then(JsonValue::as_str)
    }

    /// Set `metadata.kernelspec.name`, creating the kernelspec if needed
    pub fn set_kernel_name(&mut self, name: &str) {
        let kernelspec = self
            .metadata
            .entry("kernelspec")
            .or_insert_with(|| json!({"display_name": name, "name": name}));
        if !kernelspec.is_object() {
            *kernelspec = json!({"display_name": name});
        }
        kernelspec["name"] = json!(name);
    }

    /// Replace every occurrence of `from` with `to` in markdown cells only
    ///
    /// Returns the number of cells changed.
    pub fn replace_in_markdown(&mut self, from: &str, to: &str) -> usize {
        let mut changed = 0;
        for cell in &mut self.cells {
            if cell.cell_type == CellType::Markdown && cell.source.0.contains(from) {
                cell.source.0 = cell.source.0.replace(from, to);
                changed += 1;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTEBOOK: &str = r##"{
 "cells": [
  {"cell_type": "markdown", "metadata": {}, "source": ["# Variable\n", "Maps of Variable"]},
  {"cell_type": "code", "execution_count": null, "id": "abc", "metadata": {"tags": ["parameters"]},
   "outputs": [], "source": "variable = 'TEMP'"}
 ],
 "metadata": {"kernelspec": {"display_name": "Python [conda env:analysis]", "language": "python", "name": "conda-env-analysis-py"}},
 "nbformat": 4,
 "nbformat_minor": 5
}"##;

    #[test]
    fn test_source_accepts_string_and_lines() {
        let nb = Notebook::from_json_str(NOTEBOOK).unwrap();
        assert_eq!(nb.cells[0].source.as_str(), "# Variable\nMaps of Variable");
        assert_eq!(nb.cells[1].source.as_str(), "variable = 'TEMP'");
        assert!(nb.cells[1].has_tag(PARAMETERS_TAG));
        assert_eq!(nb.kernel_name(), Some("conda-env-analysis-py"));
    }

    #[test]
    fn test_write_keeps_unknown_fields_and_uses_line_lists() {
        let nb = Notebook::from_json_str(NOTEBOOK).unwrap();
        let value: JsonValue = serde_json::from_str(&nb.to_json_string().unwrap()).unwrap();

        assert_eq!(value["cells"][0]["source"], json!(["# Variable\n", "Maps of Variable"]));
        assert_eq!(value["cells"][1]["source"], json!(["variable = 'TEMP'"]));
        assert_eq!(value["cells"][1]["id"], json!("abc"));
        assert_eq!(value["metadata"]["kernelspec"]["language"], json!("python"));
        assert_eq!(value["nbformat_minor"], json!(5));
    }

    #[test]
    fn test_replace_only_touches_markdown() {
        let mut nb = Notebook::from_json_str(NOTEBOOK).unwrap();
        nb.cells[1].source = Source("# Variable is not replaced here".to_string());
        assert_eq!(nb.replace_in_markdown("Variable", "SST"), 1);
        assert_eq!(nb.cells[0].source.as_str(), "# SST\nMaps of SST");
        assert_eq!(nb.cells[1].source.as_str(), "# Variable is not replaced here");
    }

    #[test]
    fn test_set_kernel_name() {
        let mut nb = Notebook::from_json_str(NOTEBOOK).unwrap();
        nb.set_kernel_name("python3");
        assert_eq!(nb.kernel_name(), Some("python3"));
        assert_eq!(nb.metadata["kernelspec"]["language"], json!("python"));

        nb.metadata.clear();
        nb.set_kernel_name("python3");
        assert_eq!(nb.metadata["kernelspec"]["display_name"], json!("python3"));
    }
}
