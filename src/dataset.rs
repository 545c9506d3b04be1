//! In-memory datasets and keyed collections
//!
//! A [`Dataset`] is a set of named [`DataArray`]s sharing dimension sizes, the unit the
//! catalog loader produces and the epoch mean reduces. A [`Collection`] maps catalog
//! keys to datasets.

use crate::errors::{DiagError, Result};
use ndarray::{ArrayD, ArrayViewD, Axis};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Attribute map attached to variables and datasets
pub type Attributes = BTreeMap<String, JsonValue>;

/// A labelled n-dimensional variable
#[derive(Debug, Clone, PartialEq)]
pub struct DataArray {
    pub dims: Vec<String>,
    pub data: ArrayD<f32>,
    pub attributes: Attributes,
}

impl DataArray {
    /// Create a data array, checking that every axis has a name
    ///
    /// # Errors
    ///
    /// Returns an error if the number of dimension names does not match the array rank.
    pub fn new(dims: Vec<String>, data: ArrayD<f32>) -> Result<Self> {
        if dims.len() != data.ndim() {
            return Err(DiagError::Generic(format!(
                "{} dimension names given for an array of rank {}",
                dims.len(),
                data.ndim()
            )));
        }
        Ok(Self {
            dims,
            data,
            attributes: Attributes::new(),
        })
    }

    /// Attach attributes
    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Position of `dim` among this array's axes
    #[must_use]
    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    /// Length of `dim`, if this array has it
    #[must_use]
    pub fn dim_len(&self, dim: &str) -> Option<usize> {
        self.axis_of(dim).map(|axis| self.data.shape()[axis])
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }
}

/// Named variables with consistent dimension sizes plus global attributes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    variables: BTreeMap<String, DataArray>,
    pub attributes: Attributes,
}

impl Dataset {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a variable
    ///
    /// # Errors
    ///
    /// Returns an error if one of the variable's dimensions already exists in the dataset
    /// with a different length.
    pub fn insert(&mut self, name: impl Into<String>, array: DataArray) -> Result<()> {
        let name = name.into();
        for (dim, &len) in array.dims.iter().zip(array.shape()) {
            if let Some(existing) = self.dim_len_excluding(dim, &name) {
                if existing != len {
                    return Err(DiagError::Generic(format!(
                        "conflicting sizes for dimension '{dim}': {existing} and {len} (variable '{name}')"
                    )));
                }
            }
        }
        self.variables.insert(name, array);
        Ok(())
    }

    fn dim_len_excluding(&self, dim: &str, skip: &str) -> Option<usize> {
        self.variables
            .iter()
            .filter(|(name, _)| name.as_str() != skip)
            .find_map(|(_, array)| array.dim_len(dim))
    }

    /// Look up a variable
    ///
    /// # Errors
    ///
    /// Returns [`DiagError::VariableNotFound`] if the dataset has no such variable.
    pub fn variable(&self, name: &str) -> Result<&DataArray> {
        self.variables
            .get(name)
            .ok_or_else(|| DiagError::VariableNotFound {
                var: name.to_string(),
            })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, &DataArray)> {
        self.variables.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Dimension name to length over all variables
    #[must_use]
    pub fn dims(&self) -> BTreeMap<String, usize> {
        let mut dims = BTreeMap::new();
        for array in self.variables.values() {
            for (dim, &len) in array.dims.iter().zip(array.shape()) {
                dims.entry(dim.clone()).or_insert(len);
            }
        }
        dims
    }

    #[must_use]
    pub fn has_dim(&self, dim: &str) -> bool {
        self.variables.values().any(|a| a.axis_of(dim).is_some())
    }

    /// Merge another dataset's variables and attributes into this one
    ///
    /// # Errors
    ///
    /// Returns an error on conflicting dimension sizes.
    pub fn merge(&mut self, other: Dataset) -> Result<()> {
        for (name, array) in other.variables {
            self.insert(name, array)?;
        }
        for (key, value) in other.attributes {
            self.attributes.entry(key).or_insert(value);
        }
        Ok(())
    }

    /// Concatenate datasets along an existing dimension
    ///
    /// Variables carrying `dim` are joined in the given order; variables without it are
    /// taken from the first dataset.
    ///
    /// # Errors
    ///
    /// Returns an error if `parts` is empty, if a variable with `dim` is missing from one
    /// of the parts, or if the remaining axes disagree.
    pub fn concat(parts: Vec<Dataset>, dim: &str) -> Result<Dataset> {
        let mut parts = parts.into_iter();
        let mut combined = parts
            .next()
            .ok_or_else(|| DiagError::Generic("cannot concatenate zero datasets".to_string()))?;
        let rest: Vec<Dataset> = parts.collect();
        if rest.is_empty() {
            return Ok(combined);
        }

        let names: Vec<String> = combined
            .variables
            .iter()
            .filter(|(_, a)| a.axis_of(dim).is_some())
            .map(|(n, _)| n.clone())
            .collect();

        for name in names {
            let first = &combined.variables[&name];
            let axis = first.axis_of(dim).unwrap_or_default();
            let mut views: Vec<ArrayViewD<'_, f32>> = vec![first.data.view()];
            for part in &rest {
                let array = part.variable(&name)?;
                if array.dims != first.dims {
                    return Err(DiagError::Generic(format!(
                        "dimensions of '{name}' differ between concatenated parts"
                    )));
                }
                views.push(array.data.view());
            }
            let joined = ndarray::concatenate(Axis(axis), &views)?;
            let attributes = first.attributes.clone();
            let dims = first.dims.clone();
            combined
                .variables
                .insert(name, DataArray::new(dims, joined)?.with_attributes(attributes));
        }

        Ok(combined)
    }

    /// Stack datasets along a new leading dimension
    ///
    /// # Errors
    ///
    /// Returns an error if `parts` is empty or the variables' shapes differ between parts.
    pub fn stack(parts: Vec<Dataset>, dim: &str) -> Result<Dataset> {
        let first = parts
            .first()
            .ok_or_else(|| DiagError::Generic("cannot stack zero datasets".to_string()))?;

        let mut stacked = Dataset {
            variables: BTreeMap::new(),
            attributes: first.attributes.clone(),
        };

        for (name, array) in &first.variables {
            let mut views = Vec::with_capacity(parts.len());
            for part in &parts {
                views.push(part.variable(name)?.data.view());
            }
            let data = ndarray::stack(Axis(0), &views)?;
            let mut dims = Vec::with_capacity(array.dims.len() + 1);
            dims.push(dim.to_string());
            dims.extend(array.dims.iter().cloned());
            stacked.insert(
                name.clone(),
                DataArray::new(dims, data)?.with_attributes(array.attributes.clone()),
            )?;
        }

        Ok(stacked)
    }

    /// Keep the named variables together with the coordinates they depend on
    ///
    /// Dimension coordinates (a variable named after one of its own dimensions) and
    /// anything listed in a kept variable's `coordinates` attribute survive the selection.
    /// Missing names are ignored.
    #[must_use]
    pub fn select(mut self, names: &[String]) -> Self {
        let mut keep: Vec<String> = names.to_vec();
        for name in names {
            if let Some(coords) = self
                .variables
                .get(name)
                .and_then(|a| a.attributes.get("coordinates"))
                .and_then(JsonValue::as_str)
            {
                keep.extend(coords.split_whitespace().map(str::to_string));
            }
        }
        self.variables.retain(|name, array| {
            keep.contains(name) || array.dims.iter().any(|d| d == name)
        });
        self
    }

    /// Remove the named variables
    #[must_use]
    pub fn drop_variables(mut self, names: &[String]) -> Self {
        self.variables.retain(|name, _| !names.contains(name));
        self
    }
}

/// Datasets keyed by catalog key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collection {
    datasets: BTreeMap<String, Dataset>,
}

impl Collection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a dataset, replacing any previous dataset under the same key
    pub fn insert(&mut self, key: impl Into<String>, dataset: Dataset) -> Option<Dataset> {
        self.datasets.insert(key.into(), dataset)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Dataset> {
        self.datasets.get(key)
    }

    /// Keys in sorted order
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.datasets.keys().cloned().collect()
    }

    /// Datasets in key order
    #[must_use]
    pub fn values(&self) -> Vec<&Dataset> {
        self.datasets.values().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Dataset)> {
        self.datasets.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

impl IntoIterator for Collection {
    type Item = (String, Dataset);
    type IntoIter = std::collections::btree_map::IntoIter<String, Dataset>;

    fn into_iter(self) -> Self::IntoIter {
        self.datasets.into_iter()
    }
}

impl FromIterator<(String, Dataset)> for Collection {
    fn from_iter<I: IntoIterator<Item = (String, Dataset)>>(iter: I) -> Self {
        Self {
            datasets: iter.into_iter().collect(),
        }
    }
}

/// Pair keys with datasets positionally
///
/// Extra keys or datasets beyond the shorter list are ignored; a repeated key keeps the
/// last dataset paired with it.
pub fn convert_to_collection<K, I>(keys: K, datasets: I) -> Collection
where
    K: IntoIterator<Item = String>,
    I: IntoIterator<Item = Dataset>,
{
    keys.into_iter().zip(datasets).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    fn array(dims: &[&str], shape: &[usize], start: f32) -> DataArray {
        let n: usize = shape.iter().product();
        let values: Vec<f32> = (0..n).map(|i| start + i as f32).collect();
        DataArray::new(
            dims.iter().map(|d| (*d).to_string()).collect(),
            ArrayD::from_shape_vec(shape.to_vec(), values).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_insert_rejects_conflicting_dimension() {
        let mut ds = Dataset::new();
        ds.insert("a", array(&["time", "x"], &[2, 3], 0.0)).unwrap();
        let err = ds.insert("b", array(&["x"], &[4], 0.0));
        assert!(err.is_err());
        assert_eq!(ds.dims()["x"], 3);
    }

    #[test]
    fn test_concat_along_time() {
        let mut first = Dataset::new();
        first.insert("v", array(&["time", "x"], &[1, 2], 0.0)).unwrap();
        first.insert("area", array(&["x"], &[2], 100.0)).unwrap();
        let mut second = Dataset::new();
        second.insert("v", array(&["time", "x"], &[2, 2], 10.0)).unwrap();

        let joined = Dataset::concat(vec![first, second], "time").unwrap();
        let v = joined.variable("v").unwrap();
        assert_eq!(v.shape(), &[3, 2]);
        assert_eq!(v.data[[2, 1]], 13.0);
        assert_eq!(joined.variable("area").unwrap().data[[0]], 100.0);
    }

    #[test]
    fn test_stack_adds_leading_dimension() {
        let mut a = Dataset::new();
        a.insert("v", array(&["x"], &[2], 0.0)).unwrap();
        let mut b = Dataset::new();
        b.insert("v", array(&["x"], &[2], 5.0)).unwrap();

        let stacked = Dataset::stack(vec![a, b], "member_id").unwrap();
        let v = stacked.variable("v").unwrap();
        assert_eq!(v.dims, vec!["member_id", "x"]);
        assert_eq!(v.data[[1, 0]], 5.0);
    }

    #[test]
    fn test_select_keeps_dimension_coordinates() {
        let mut ds = Dataset::new();
        ds.insert("time", array(&["time"], &[2], 0.0)).unwrap();
        ds.insert("TEMP", array(&["time", "x"], &[2, 3], 0.0)).unwrap();
        ds.insert("SALT", array(&["time", "x"], &[2, 3], 0.0)).unwrap();

        let selected = ds.select(&["TEMP".to_string()]);
        let names: Vec<&str> = selected.variable_names().collect();
        assert_eq!(names, vec!["TEMP", "time"]);
    }

    #[test]
    fn test_convert_to_collection_truncates_to_shorter() {
        let collection = convert_to_collection(
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            vec![Dataset::new(), Dataset::new()],
        );
        assert_eq!(collection.keys(), vec!["a", "b"]);
    }
}
