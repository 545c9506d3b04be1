//! Catalog search
//!
//! A query maps column names to accepted values. A row matches when, for every queried
//! column, its cell equals one of the values (or, for list cells, contains one).

use super::{Cell, EsmCatalog};
use crate::errors::{DiagError, Result};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

/// Column -> accepted values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    criteria: BTreeMap<String, Vec<String>>,
}

impl SearchQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add accepted values for a column
    #[must_use]
    pub fn with<I, S>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.criteria
            .entry(column.to_string())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Build a query from a JSON object whose values are scalars or lists of scalars
    ///
    /// # Errors
    ///
    /// Returns [`DiagError::Catalog`] if the value is not an object or contains nested
    /// structures.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let object = match value {
            JsonValue::Null => return Ok(Self::default()),
            JsonValue::Object(object) => object,
            other => {
                return Err(DiagError::Catalog(format!(
                    "search query must be an object, got {other}"
                )))
            }
        };

        let mut query = Self::default();
        for (column, values) in object {
            let values = match values {
                JsonValue::Array(items) => items.iter().map(scalar_text).collect::<Result<Vec<_>>>()?,
                scalar => vec![scalar_text(scalar)?],
            };
            query = query.with(column, values);
        }
        Ok(query)
    }

    /// Parse a `column=value1,value2` command-line criterion into the query
    ///
    /// Blank values are dropped, so `column=` leaves the column unconstrained.
    ///
    /// # Errors
    ///
    /// Returns [`DiagError::Catalog`] if there is no `=` or the column name is blank.
    pub fn parse_criterion(self, text: &str) -> Result<Self> {
        match text.split_once('=') {
            Some((column, values)) if !column.trim().is_empty() => Ok(self.with(
                column.trim(),
                values.split(',').map(str::trim).filter(|v| !v.is_empty()),
            )),
            _ => Err(DiagError::Catalog(format!(
                "Invalid format: expected '<column>=<value>[,<value>...]', got '{text}'"
            ))),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    /// Accepted values for a column
    #[must_use]
    pub fn values(&self, column: &str) -> Option<&[String]> {
        self.criteria.get(column).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.criteria.iter().map(|(c, v)| (c.as_str(), v.as_slice()))
    }
}

fn scalar_text(value: &JsonValue) -> Result<String> {
    match value {
        JsonValue::String(s) => Ok(s.clone()),
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::Bool(b) => Ok(b.to_string()),
        other => Err(DiagError::Catalog(format!(
            "search values must be scalars, got {other}"
        ))),
    }
}

/// Subset a catalog to the rows matching `query`
///
/// A column queried with an empty list is unconstrained. When the variable column is
/// queried, list cells are narrowed to the requested variables and the request is kept
/// so loading reads only those variables. An empty result is returned as-is.
///
/// # Errors
///
/// Returns [`DiagError::Catalog`] if the query names a column the catalog lacks.
#[instrument(skip_all, fields(rows = catalog.len()))]
pub fn subset_catalog(catalog: &EsmCatalog, query: &SearchQuery) -> Result<EsmCatalog> {
    let criteria: Vec<(usize, &[String])> = query
        .iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(column, values)| Ok((catalog.column_index(column)?, values)))
        .collect::<Result<_>>()?;

    let variable_column = catalog
        .variable_column()
        .and_then(|name| catalog.column_index(name).ok());
    let requested: Option<Vec<String>> = catalog
        .variable_column()
        .and_then(|name| query.values(name))
        .filter(|values| !values.is_empty())
        .map(<[String]>::to_vec);

    let rows: Vec<Vec<Cell>> = catalog
        .rows()
        .iter()
        .filter(|row| {
            criteria
                .iter()
                .all(|(index, values)| values.iter().any(|v| row[*index].matches(v)))
        })
        .map(|row| {
            let mut row = row.clone();
            if let (Some(index), Some(requested)) = (variable_column, requested.as_ref()) {
                if let Cell::List(items) = &mut row[index] {
                    items.retain(|item| requested.contains(item));
                }
            }
            row
        })
        .collect();

    if rows.is_empty() {
        warn!(query = ?query, "Search matched no catalog rows");
    } else {
        info!(matched = rows.len(), "🔍 Subset catalog");
    }

    Ok(catalog.with_rows(rows, requested))
}
