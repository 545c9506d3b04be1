//! ESM catalog: a JSON descriptor plus a CSV table of assets
//!
//! # Organization
//!
//! - [`descriptor`]: The JSON descriptor (assets column, aggregation control)
//! - [`literal`]: Python-literal list cells of multi-variable rows
//! - [`search`]: Search queries and catalog subsetting
//! - [`load`]: Grouping rows into keyed datasets

pub mod descriptor;
pub mod literal;
pub mod load;
pub mod search;

pub use descriptor::{AggregationKind, AssetFormat, CatalogDescriptor};
pub use load::load_catalog;
pub use search::{subset_catalog, SearchQuery};

use crate::errors::{DiagError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Column that holds string-encoded variable lists in history-file catalogs
pub const MULTI_VARIABLE_COLUMN: &str = "variables";

/// One table cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    /// Empty CSV field
    Missing,
    Value(String),
    /// Literal-evaluated list (multi-variable rows)
    List(Vec<String>),
}

impl Cell {
    /// Whether the cell equals `value`, or contains it for list cells
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Cell::Missing => false,
            Cell::Value(v) => v == value,
            Cell::List(items) => items.iter().any(|item| item == value),
        }
    }

    /// Text form used for keys and partitions
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Cell::Missing => String::new(),
            Cell::Value(v) => v.clone(),
            Cell::List(items) => items.join(","),
        }
    }

    /// Values as a list (a scalar becomes a one-element list)
    #[must_use]
    pub fn values(&self) -> Vec<String> {
        match self {
            Cell::Missing => Vec::new(),
            Cell::Value(v) => vec![v.clone()],
            Cell::List(items) => items.clone(),
        }
    }
}

/// An opened catalog, possibly subset by a search
#[derive(Debug, Clone, PartialEq)]
pub struct EsmCatalog {
    pub descriptor: CatalogDescriptor,
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
    /// Directory relative asset paths are resolved against
    root: PathBuf,
    /// Variables requested by a search on the variable column
    requested_variables: Option<Vec<String>>,
}

impl EsmCatalog {
    /// Build a catalog from an in-memory table
    ///
    /// # Errors
    ///
    /// Returns an error if a row's width differs from the header or the asset column is
    /// missing.
    pub fn new(
        descriptor: CatalogDescriptor,
        columns: Vec<String>,
        rows: Vec<Vec<Cell>>,
        root: PathBuf,
    ) -> Result<Self> {
        if let Some(row) = rows.iter().position(|r| r.len() != columns.len()) {
            return Err(DiagError::Catalog(format!(
                "row {row} has {} fields, header has {}",
                rows[row].len(),
                columns.len()
            )));
        }
        let catalog = Self {
            descriptor,
            columns,
            rows,
            root,
            requested_variables: None,
        };
        catalog.column_index(&catalog.descriptor.assets.column_name)?;
        Ok(catalog)
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub(crate) fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn requested_variables(&self) -> Option<&[String]> {
        self.requested_variables.as_deref()
    }

    /// Name of the column listing each row's variables
    #[must_use]
    pub fn variable_column(&self) -> Option<&str> {
        self.descriptor
            .aggregation_control
            .as_ref()
            .map(|c| c.variable_column_name.as_str())
    }

    /// Position of a column in the table
    ///
    /// # Errors
    ///
    /// Returns [`DiagError::Catalog`] for unknown columns.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| DiagError::Catalog(format!("unknown catalog column '{name}'")))
    }

    /// Unique values of a column, in first-seen order
    ///
    /// # Errors
    ///
    /// Returns [`DiagError::Catalog`] for unknown columns.
    pub fn unique(&self, column: &str) -> Result<Vec<String>> {
        let index = self.column_index(column)?;
        let mut seen = Vec::new();
        for row in &self.rows {
            for value in row[index].values() {
                if !seen.contains(&value) {
                    seen.push(value);
                }
            }
        }
        Ok(seen)
    }

    /// Asset path of a row, resolved against the catalog root
    pub(crate) fn asset_path(&self, row: &[Cell]) -> Result<PathBuf> {
        let index = self.column_index(&self.descriptor.assets.column_name)?;
        match &row[index] {
            Cell::Value(path) => Ok(self.root.join(path)),
            other => Err(DiagError::Catalog(format!("invalid asset path cell {other:?}"))),
        }
    }

    pub(crate) fn with_rows(&self, rows: Vec<Vec<Cell>>, requested: Option<Vec<String>>) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            columns: self.columns.clone(),
            rows,
            root: self.root.clone(),
            requested_variables: requested.or_else(|| self.requested_variables.clone()),
        }
    }
}

/// Read an ESM catalog from its JSON descriptor
///
/// With `multi_var_row` set, the `variables` column (or the descriptor's variable
/// column when there is no `variables` column) is parsed as a Python list literal in
/// every row.
///
/// # Errors
///
/// Returns an error if either file cannot be read, the descriptor is not valid JSON, the
/// table is malformed, or a list literal does not parse.
#[instrument(skip_all, fields(path = %path.display(), multi_var_row = multi_var_row))]
pub fn read_catalog(path: &Path, multi_var_row: bool) -> Result<EsmCatalog> {
    let descriptor: CatalogDescriptor = serde_json::from_str(&fs::read_to_string(path).map_err(|e| {
        DiagError::Io(std::io::Error::new(
            e.kind(),
            format!("cannot read catalog {}: {e}", path.display()),
        ))
    })?)?;

    let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let table = descriptor
        .catalog_file
        .as_deref()
        .map(|file| root.join(file))
        .ok_or_else(|| DiagError::Catalog("descriptor has no 'catalog_file'".to_string()))?;

    let mut reader = csv::ReaderBuilder::new().from_path(&table)?;
    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let list_column = if multi_var_row {
        let name = if columns.iter().any(|c| c == MULTI_VARIABLE_COLUMN) {
            MULTI_VARIABLE_COLUMN.to_string()
        } else {
            descriptor
                .aggregation_control
                .as_ref()
                .map(|c| c.variable_column_name.clone())
                .ok_or_else(|| {
                    DiagError::Catalog("multi-variable rows need a variable column".to_string())
                })?
        };
        Some(
            columns
                .iter()
                .position(|c| *c == name)
                .ok_or_else(|| DiagError::Catalog(format!("unknown catalog column '{name}'")))?,
        )
    } else {
        None
    };

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = Vec::with_capacity(record.len());
        for (i, field) in record.iter().enumerate() {
            let cell = if field.is_empty() {
                Cell::Missing
            } else if Some(i) == list_column {
                Cell::List(literal::parse_string_list(field)?)
            } else {
                Cell::Value(field.to_string())
            };
            row.push(cell);
        }
        rows.push(row);
    }

    let catalog = EsmCatalog::new(descriptor, columns, rows, root)?;
    info!(
        rows = catalog.len(),
        id = catalog.descriptor.id.as_deref().unwrap_or("<unnamed>"),
        "📚 Read catalog"
    );
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const DESCRIPTOR: &str = r#"{
  "esmcat_version": "0.1.0",
  "id": "cesm-hist",
  "catalog_file": "cesm-hist.csv",
  "attributes": [{"column_name": "component", "vocabulary": ""}],
  "assets": {"column_name": "path", "format": "netcdf"},
  "aggregation_control": {
    "variable_column_name": "variables",
    "groupby_attrs": ["component", "stream"],
    "aggregations": [{"type": "union", "attribute_name": "variables"}]
  }
}"#;

    const TABLE: &str = "component,stream,variables,path
ocn,pop.h,\"['TEMP', 'SALT']\",hist/ocn.0001.nc
ocn,pop.h,\"['TEMP']\",hist/ocn.0002.nc
ice,cice.h,\"['aice', 'hi']\",
";

    fn write_catalog() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("cesm-hist.json"), DESCRIPTOR).unwrap();
        fs::write(dir.path().join("cesm-hist.csv"), TABLE).unwrap();
        dir
    }

    #[test]
    fn test_read_multi_variable_rows() {
        let dir = write_catalog();
        let catalog = read_catalog(&dir.path().join("cesm-hist.json"), true).unwrap();

        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.columns(), &["component", "stream", "variables", "path"]);
        assert_eq!(catalog.root(), dir.path());
        assert_eq!(catalog.unique("variables").unwrap(), vec!["TEMP", "SALT", "aice", "hi"]);
        assert_eq!(catalog.unique("component").unwrap(), vec!["ocn", "ice"]);
        assert_eq!(catalog.rows()[2][3], Cell::Missing);
        assert!(catalog.rows()[0][2].matches("SALT"));
        assert_eq!(
            catalog.asset_path(&catalog.rows()[1]).unwrap(),
            dir.path().join("hist/ocn.0002.nc")
        );
        assert!(catalog.asset_path(&catalog.rows()[2]).is_err());
    }

    #[test]
    fn test_single_variable_rows_keep_text() {
        let dir = write_catalog();
        let catalog = read_catalog(&dir.path().join("cesm-hist.json"), false).unwrap();
        assert_eq!(
            catalog.rows()[1][2],
            Cell::Value("['TEMP']".to_string())
        );
        assert!(matches!(catalog.unique("experiment"), Err(DiagError::Catalog(_))));
    }

    #[test]
    fn test_missing_descriptor_is_io_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            read_catalog(&dir.path().join("absent.json"), false),
            Err(DiagError::Io(_))
        ));
    }
}
