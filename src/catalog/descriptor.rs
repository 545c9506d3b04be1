//! ESM catalog JSON descriptor
//!
//! Only the fields needed to locate the table, find asset paths and aggregate rows into
//! datasets are modelled; anything else in the descriptor is ignored.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogDescriptor {
    #[serde(default)]
    pub esmcat_version: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// CSV table path, relative paths resolved against the descriptor's directory
    #[serde(default)]
    pub catalog_file: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeSpec>,
    pub assets: AssetSpec,
    #[serde(default)]
    pub aggregation_control: Option<AggregationControl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub column_name: String,
    #[serde(default)]
    pub vocabulary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSpec {
    /// Column holding the asset path
    pub column_name: String,
    /// Format shared by every asset
    #[serde(default)]
    pub format: Option<String>,
    /// Column holding a per-row format, used when `format` is absent
    #[serde(default)]
    pub format_column_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationControl {
    pub variable_column_name: String,
    #[serde(default)]
    pub groupby_attrs: Vec<String>,
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    #[serde(rename = "type")]
    pub kind: AggregationKind,
    pub attribute_name: String,
    #[serde(default)]
    pub options: AggregationOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    /// Merge the variables of the partitions
    Union,
    /// Concatenate along an existing dimension (`options.dim`)
    JoinExisting,
    /// Stack along a new dimension named after the attribute
    JoinNew,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationOptions {
    #[serde(default)]
    pub dim: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// Asset storage formats the loader can open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetFormat {
    NetCDF,
    Zarr,
}

impl AssetFormat {
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "netcdf" | "netcdf4" | "nc" => Some(Self::NetCDF),
            "zarr" => Some(Self::Zarr),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_descriptor() {
        let descriptor: CatalogDescriptor = serde_json::from_str(
            r#"{
                "esmcat_version": "0.1.0",
                "id": "cesm2-le-subset",
                "catalog_file": "cesm2-le-subset.csv",
                "attributes": [{"column_name": "component", "vocabulary": ""}],
                "assets": {"column_name": "path", "format": "netcdf"},
                "aggregation_control": {
                    "variable_column_name": "variable",
                    "groupby_attrs": ["component", "stream"],
                    "aggregations": [
                        {"type": "union", "attribute_name": "variable"},
                        {"type": "join_existing", "attribute_name": "time_range",
                         "options": {"dim": "time", "coords": "minimal"}}
                    ]
                },
                "last_updated": "2021-06-01"
            }"#,
        )
        .unwrap();

        let control = descriptor.aggregation_control.unwrap();
        assert_eq!(control.groupby_attrs, vec!["component", "stream"]);
        assert_eq!(control.aggregations[1].kind, AggregationKind::JoinExisting);
        assert_eq!(control.aggregations[1].options.dim.as_deref(), Some("time"));
        assert_eq!(AssetFormat::parse("netcdf"), Some(AssetFormat::NetCDF));
        assert_eq!(AssetFormat::parse("grib"), None);
    }
}
