//! NetCDF input: opening catalog assets as in-memory datasets
//!
//! Every numeric variable is read as `f32` along with its attributes. Packed and masked
//! values are decoded according to [`OpenOptions`], the equivalent of the
//! `cdf_kwargs` passed to every asset of a catalog load.

use crate::dataset::{Attributes, DataArray, Dataset};
use crate::errors::Result;
use ndarray::ArrayD;
use netcdf::types::NcVariableType;
use netcdf::{AttributeValue, Variable};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::Path;
use tracing::{debug, warn};

const FILL_VALUE: &str = "_FillValue";
const MISSING_VALUE: &str = "missing_value";
const SCALE_FACTOR: &str = "scale_factor";
const ADD_OFFSET: &str = "add_offset";

/// Dataset-open keyword arguments applied to every asset of a load
///
/// Unknown keys (for example `chunks`) are accepted and ignored so that existing
/// search/open dictionaries can be passed through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenOptions {
    /// Replace fill/missing values with NaN and apply `scale_factor`/`add_offset`
    pub mask_and_scale: bool,
    /// Accepted for compatibility; time values are kept as stored numbers
    pub decode_times: bool,
    /// Variables that are never read
    pub drop_variables: Vec<String>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            mask_and_scale: true,
            decode_times: true,
            drop_variables: Vec::new(),
        }
    }
}

impl OpenOptions {
    /// Parse options from a JSON object, `null` meaning defaults
    ///
    /// # Errors
    ///
    /// Returns an error if a known key has the wrong type.
    pub fn from_json(value: JsonValue) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Open a NetCDF file as a [`Dataset`]
///
/// Non-numeric variables (characters, strings, compound types) are skipped.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or a variable cannot be read.
pub fn open_dataset(path: &Path, options: &OpenOptions) -> Result<Dataset> {
    let file = netcdf::open(path)?;
    debug!(path = %path.display(), "Opened NetCDF file");

    let mut dataset = Dataset::new();
    for attr in file.attributes() {
        dataset
            .attributes
            .insert(attr.name().to_string(), attribute_to_json(&attr.value()?));
    }

    for var in file.variables() {
        let name = var.name();
        if options.drop_variables.contains(&name) {
            continue;
        }
        if !matches!(var.vartype(), NcVariableType::Int(_) | NcVariableType::Float(_)) {
            debug!(variable = %name, "Skipping non-numeric variable");
            continue;
        }

        let array = read_variable(&var, options)?;
        dataset.insert(name, array)?;
    }

    if dataset.is_empty() {
        warn!(path = %path.display(), "No numeric variables found");
    }

    Ok(dataset)
}

/// Read one variable's values and attributes
///
/// # Errors
///
/// Returns an error if the values cannot be read as `f32` or do not fit the shape.
pub fn read_variable(var: &Variable, options: &OpenOptions) -> Result<DataArray> {
    let dims: Vec<String> = var
        .dimensions()
        .iter()
        .map(|d| d.name().to_string())
        .collect();
    let shape: Vec<usize> = var
        .dimensions()
        .iter()
        .map(netcdf::Dimension::len)
        .collect();

    let mut attributes = Attributes::new();
    for attr in var.attributes() {
        attributes.insert(attr.name().to_string(), attribute_to_json(&attr.value()?));
    }

    let mut values = var.get_values::<f32, _>(..)?;
    if options.mask_and_scale {
        mask_and_scale(&mut values, &mut attributes);
    }

    let data = ArrayD::from_shape_vec(shape, values)?;
    Ok(DataArray::new(dims, data)?.with_attributes(attributes))
}

/// Decode packed values in place and drop the encoding attributes
fn mask_and_scale(values: &mut [f32], attributes: &mut Attributes) {
    let fills: Vec<f64> = [FILL_VALUE, MISSING_VALUE]
        .iter()
        .filter_map(|key| attributes.remove(*key))
        .filter_map(|value| first_number(&value))
        .collect();
    let scale = attributes.remove(SCALE_FACTOR).and_then(|v| first_number(&v));
    let offset = attributes.remove(ADD_OFFSET).and_then(|v| first_number(&v));

    #[allow(clippy::cast_possible_truncation)]
    let fills: Vec<f32> = fills.into_iter().map(|f| f as f32).collect();
    #[allow(clippy::cast_possible_truncation)]
    let (scale, offset) = (scale.unwrap_or(1.0) as f32, offset.unwrap_or(0.0) as f32);

    for value in values.iter_mut() {
        if fills.iter().any(|fill| fill == value) {
            *value = f32::NAN;
        } else {
            *value = *value * scale + offset;
        }
    }
}

fn first_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::Array(items) => items.first().and_then(JsonValue::as_f64),
        _ => None,
    }
}

/// Convert a NetCDF attribute value to JSON
#[must_use]
pub fn attribute_to_json(value: &AttributeValue) -> JsonValue {
    match value {
        AttributeValue::Uchar(v) => JsonValue::from(*v),
        AttributeValue::Uchars(v) => JsonValue::from(v.clone()),
        AttributeValue::Schar(v) => JsonValue::from(*v),
        AttributeValue::Schars(v) => JsonValue::from(v.clone()),
        AttributeValue::Ushort(v) => JsonValue::from(*v),
        AttributeValue::Ushorts(v) => JsonValue::from(v.clone()),
        AttributeValue::Short(v) => JsonValue::from(*v),
        AttributeValue::Shorts(v) => JsonValue::from(v.clone()),
        AttributeValue::Uint(v) => JsonValue::from(*v),
        AttributeValue::Uints(v) => JsonValue::from(v.clone()),
        AttributeValue::Int(v) => JsonValue::from(*v),
        AttributeValue::Ints(v) => JsonValue::from(v.clone()),
        AttributeValue::Ulonglong(v) => JsonValue::from(*v),
        AttributeValue::Ulonglongs(v) => JsonValue::from(v.clone()),
        AttributeValue::Longlong(v) => JsonValue::from(*v),
        AttributeValue::Longlongs(v) => JsonValue::from(v.clone()),
        AttributeValue::Float(v) => JsonValue::from(*v),
        AttributeValue::Floats(v) => JsonValue::from(v.clone()),
        AttributeValue::Double(v) => JsonValue::from(*v),
        AttributeValue::Doubles(v) => JsonValue::from(v.clone()),
        AttributeValue::Str(v) => JsonValue::from(v.clone()),
        AttributeValue::Strs(v) => JsonValue::from(v.clone()),
        #[allow(unreachable_patterns)]
        _ => {
            warn!("Skipped unsupported attribute type");
            JsonValue::Null
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mask_and_scale_decodes_fill_and_packing() {
        let mut values = vec![1.0, -999.0, 3.0];
        let mut attributes = Attributes::new();
        attributes.insert(FILL_VALUE.to_string(), json!(-999.0));
        attributes.insert(SCALE_FACTOR.to_string(), json!(2.0));
        attributes.insert(ADD_OFFSET.to_string(), json!(0.5));
        attributes.insert("units".to_string(), json!("K"));

        mask_and_scale(&mut values, &mut attributes);

        assert_eq!(values[0], 2.5);
        assert!(values[1].is_nan());
        assert_eq!(values[2], 6.5);
        assert_eq!(attributes.len(), 1);
    }

    #[test]
    fn test_open_options_ignore_unknown_keys() {
        let options = OpenOptions::from_json(json!({
            "chunks": {"time": 12},
            "drop_variables": ["ULONG"]
        }))
        .unwrap();
        assert!(options.mask_and_scale);
        assert_eq!(options.drop_variables, vec!["ULONG"]);

        assert_eq!(OpenOptions::from_json(JsonValue::Null).unwrap(), OpenOptions::default());
    }
}
