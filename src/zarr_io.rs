//! Zarr group I/O for datasets
//!
//! Groups are read through `zarrs`, which decodes Zarr v2 and v3 arrays together with
//! their compressors (Blosc, gzip, zstd). Dimension names come from xarray's
//! `_ARRAY_DIMENSIONS` attribute or from v3 `dimension_names`.
//!
//! Datasets are written as xarray-compatible Zarr v2 groups: one array directory per
//! variable with `.zarray` metadata, a `.zattrs` file carrying `_ARRAY_DIMENSIONS`, and
//! uncompressed little-endian `f4` chunks. Consolidated metadata (`.zmetadata`) is written
//! last. The group is assembled in a sibling staging directory and renamed into place,
//! so a group at the destination path is always complete.

use crate::dataset::{Attributes, DataArray, Dataset};
use crate::errors::{DiagError, Result};
use chrono::Utc;
use ndarray::ArrayD;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::ffi::OsString;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use zarrs::array::{Array, DataType};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

const ZGROUP: &str = ".zgroup";
const ZATTRS: &str = ".zattrs";
const ZARRAY: &str = ".zarray";
const ZMETADATA: &str = ".zmetadata";
const ZARR_JSON: &str = "zarr.json";
const ARRAY_DIMENSIONS: &str = "_ARRAY_DIMENSIONS";
const STAGING_SUFFIX: &str = ".partial";

/// Zarr store location on the local filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZarrSource {
    pub path: PathBuf,
}

impl ZarrSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Whether a Zarr group (v2 `.zgroup` or v3 `zarr.json`) exists at this location
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.join(ZGROUP).is_file() || self.path.join(ZARR_JSON).is_file()
    }

    /// Whether the group carries consolidated metadata, the last file a write produces
    #[must_use]
    pub fn is_consolidated(&self) -> bool {
        self.path.join(ZMETADATA).is_file()
    }
}

/// `.zarray` metadata document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayMetadata {
    pub zarr_format: u8,
    pub shape: Vec<usize>,
    pub chunks: Vec<usize>,
    pub dtype: String,
    pub compressor: Option<JsonValue>,
    pub fill_value: JsonValue,
    pub order: String,
    pub filters: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension_separator: Option<String>,
}

impl ArrayMetadata {
    /// Metadata for a single-chunk, uncompressed `f4` array
    #[must_use]
    pub fn single_chunk(shape: &[usize]) -> Self {
        Self {
            zarr_format: 2,
            shape: shape.to_vec(),
            chunks: shape.iter().map(|&n| n.max(1)).collect(),
            dtype: "<f4".to_string(),
            compressor: None,
            fill_value: JsonValue::String("NaN".to_string()),
            order: "C".to_string(),
            filters: None,
            dimension_separator: None,
        }
    }

    fn separator(&self) -> &str {
        self.dimension_separator.as_deref().unwrap_or(".")
    }

    fn chunk_key(&self, index: &[usize]) -> String {
        if index.is_empty() {
            return "0".to_string();
        }
        index
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(self.separator())
    }
}

/// Writer creating Zarr groups from datasets
pub struct ZarrWriter {
    source: ZarrSource,
}

impl ZarrWriter {
    #[must_use]
    pub fn new(source: ZarrSource) -> Self {
        Self { source }
    }

    /// Write a dataset, replacing anything already stored at the location
    ///
    /// Nothing appears at the destination unless every file was written. A failed write
    /// leaves any previous group in place and removes the staging directory.
    ///
    /// # Errors
    ///
    /// Returns an error if any file cannot be written or the group cannot be moved into
    /// place.
    pub fn write_dataset(&self, dataset: &Dataset) -> Result<()> {
        let root = &self.source.path;
        let staging = staging_path(root);
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let arrays = match write_group(&staging, dataset) {
            Ok(arrays) => arrays,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&staging) {
                    warn!(store = %staging.display(), "Could not remove partial store: {cleanup}");
                }
                return Err(e);
            }
        };

        if root.exists() {
            fs::remove_dir_all(root)?;
        }
        fs::rename(&staging, root)?;

        info!(store = %root.display(), "✅ Wrote dataset with {arrays} arrays");
        Ok(())
    }
}

/// `{name}.partial` next to the destination
fn staging_path(root: &Path) -> PathBuf {
    let mut name = root.file_name().map(OsString::from).unwrap_or_default();
    name.push(STAGING_SUFFIX);
    root.with_file_name(name)
}

/// Write every file of the group under `root`, consolidated metadata last
fn write_group(root: &Path, dataset: &Dataset) -> Result<usize> {
    let mut group_attrs = attributes_to_map(&dataset.attributes);
    group_attrs.insert(
        "history".to_string(),
        JsonValue::String(format!("Created by epoch_diagnostics on {}", Utc::now().to_rfc3339())),
    );

    write_json(&root.join(ZGROUP), &json!({ "zarr_format": 2 }))?;
    write_json(&root.join(ZATTRS), &JsonValue::Object(group_attrs.clone()))?;

    let variables: Vec<(&str, &DataArray)> = dataset.variables().collect();
    debug!(
        store = %root.display(),
        arrays = variables.len(),
        threads = rayon::current_num_threads(),
        "Writing Zarr arrays"
    );

    let documents = variables
        .par_iter()
        .map(|(name, array)| write_array(root, name, array))
        .collect::<Result<Vec<_>>>()?;

    let mut consolidated = Map::new();
    consolidated.insert(ZGROUP.to_string(), json!({ "zarr_format": 2 }));
    consolidated.insert(ZATTRS.to_string(), JsonValue::Object(group_attrs));
    for (name, zarray, zattrs) in documents {
        consolidated.insert(format!("{name}/{ZARRAY}"), zarray);
        consolidated.insert(format!("{name}/{ZATTRS}"), zattrs);
    }
    write_json(
        &root.join(ZMETADATA),
        &json!({ "metadata": consolidated, "zarr_consolidated_format": 1 }),
    )?;

    Ok(variables.len())
}

fn write_array(root: &Path, name: &str, array: &DataArray) -> Result<(String, JsonValue, JsonValue)> {
    let array_path = root.join(name);
    fs::create_dir_all(&array_path)?;

    let metadata = ArrayMetadata::single_chunk(array.shape());
    let zarray = serde_json::to_value(&metadata)?;
    write_json(&array_path.join(ZARRAY), &zarray)?;

    let mut attrs = attributes_to_map(&array.attributes);
    attrs.insert(ARRAY_DIMENSIONS.to_string(), json!(array.dims));
    let zattrs = JsonValue::Object(attrs);
    write_json(&array_path.join(ZATTRS), &zattrs)?;

    if !array.data.is_empty() {
        let bytes: Vec<u8> = array
            .data
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect();
        let key = metadata.chunk_key(&vec![0; metadata.shape.len()]);
        fs::write(array_path.join(key), bytes)?;
    }

    Ok((name.to_string(), zarray, zattrs))
}

/// Reader loading Zarr groups into datasets
pub struct ZarrReader {
    source: ZarrSource,
    store: Arc<FilesystemStore>,
}

impl ZarrReader {
    /// Open an existing Zarr group
    ///
    /// # Errors
    ///
    /// Returns an error if the location is not a Zarr group.
    pub fn new(source: ZarrSource) -> Result<Self> {
        if !source.exists() {
            return Err(DiagError::Zarr(format!(
                "Zarr group not found: {}",
                source.path.display()
            )));
        }
        let store = FilesystemStore::new(&source.path).map_err(zarr_error)?;
        Ok(Self {
            source,
            store: Arc::new(store),
        })
    }

    /// List all arrays in the group
    ///
    /// # Errors
    ///
    /// Returns an error if the group directory cannot be listed.
    pub fn list_arrays(&self) -> Result<Vec<String>> {
        let mut arrays = Vec::new();
        for entry in fs::read_dir(&self.source.path)? {
            let path = entry?.path();
            if is_array_node(&path) {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    arrays.push(name.to_string());
                }
            }
        }
        arrays.sort();
        Ok(arrays)
    }

    /// Read one array with its dimension names and attributes
    ///
    /// Numeric data types are converted to `f32`; chunks that were never written hold the
    /// array's fill value.
    ///
    /// # Errors
    ///
    /// Returns an error if the array cannot be opened or decoded, or has a non-numeric
    /// data type.
    pub fn read_array(&self, name: &str) -> Result<DataArray> {
        let array = Array::open(self.store.clone(), &format!("/{name}")).map_err(zarr_error)?;
        let shape = array
            .shape()
            .iter()
            .map(|&n| usize::try_from(n).map_err(zarr_error))
            .collect::<Result<Vec<usize>>>()?;
        let subset = ArraySubset::new_with_shape(array.shape().to_vec());
        let values = retrieve_as_f32(&array, &subset, name)?;

        let (mut attributes, dimension_names) = read_node(&self.source.path.join(name))?;
        let dims = match attributes.remove(ARRAY_DIMENSIONS).or(dimension_names) {
            Some(value) => serde_json::from_value::<Vec<Option<String>>>(value)?
                .into_iter()
                .enumerate()
                .map(|(i, dim)| dim.unwrap_or_else(|| format!("dim_{i}")))
                .collect(),
            None => (0..shape.len()).map(|i| format!("dim_{i}")).collect(),
        };

        Ok(DataArray::new(dims, ArrayD::from_shape_vec(shape, values)?)?.with_attributes(attributes))
    }

    /// Read the whole group
    ///
    /// # Errors
    ///
    /// Returns an error if any array cannot be read.
    pub fn read_dataset(&self) -> Result<Dataset> {
        let mut dataset = Dataset::new();
        dataset.attributes = read_node(&self.source.path)?.0;
        for name in self.list_arrays()? {
            let array = self.read_array(&name)?;
            dataset.insert(name, array)?;
        }
        Ok(dataset)
    }
}

fn zarr_error(e: impl Display) -> DiagError {
    DiagError::Zarr(e.to_string())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn retrieve_as_f32(
    array: &Array<FilesystemStore>,
    subset: &ArraySubset,
    name: &str,
) -> Result<Vec<f32>> {
    macro_rules! retrieve {
        ($t:ty) => {
            array
                .retrieve_array_subset_elements::<$t>(subset)
                .map_err(zarr_error)?
                .into_iter()
                .map(|v| v as f32)
                .collect()
        };
    }

    Ok(match array.data_type() {
        DataType::Float32 => array
            .retrieve_array_subset_elements::<f32>(subset)
            .map_err(zarr_error)?,
        DataType::Float64 => retrieve!(f64),
        DataType::Int8 => retrieve!(i8),
        DataType::Int16 => retrieve!(i16),
        DataType::Int32 => retrieve!(i32),
        DataType::Int64 => retrieve!(i64),
        DataType::UInt8 => retrieve!(u8),
        DataType::UInt16 => retrieve!(u16),
        DataType::UInt32 => retrieve!(u32),
        DataType::UInt64 => retrieve!(u64),
        other => {
            return Err(DiagError::Zarr(format!(
                "array '{name}': unsupported data type {other:?}"
            )))
        }
    })
}

/// Whether `dir` holds a v2 or v3 array
fn is_array_node(dir: &Path) -> bool {
    if dir.join(ZARRAY).is_file() {
        return true;
    }
    fs::read_to_string(dir.join(ZARR_JSON))
        .ok()
        .and_then(|text| serde_json::from_str::<JsonValue>(&text).ok())
        .is_some_and(|doc| doc["node_type"] == "array")
}

/// User attributes of a group or array node, plus v3 `dimension_names` when present
fn read_node(dir: &Path) -> Result<(Attributes, Option<JsonValue>)> {
    let v3 = dir.join(ZARR_JSON);
    if v3.is_file() {
        let mut doc: Map<String, JsonValue> = serde_json::from_str(&fs::read_to_string(v3)?)?;
        let attributes = match doc.remove("attributes") {
            Some(JsonValue::Object(map)) => map.into_iter().collect(),
            _ => Attributes::new(),
        };
        let dimension_names = doc.remove("dimension_names").filter(|v| !v.is_null());
        return Ok((attributes, dimension_names));
    }

    let path = dir.join(ZATTRS);
    if !path.is_file() {
        return Ok((Attributes::new(), None));
    }
    Ok((serde_json::from_str(&fs::read_to_string(path)?)?, None))
}

fn attributes_to_map(attributes: &Attributes) -> Map<String, JsonValue> {
    attributes
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn write_json(path: &Path, value: &JsonValue) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// Read a dataset from a Zarr group at `path`
///
/// # Errors
///
/// See [`ZarrReader::read_dataset`].
pub fn read_zarr_dataset(path: &Path) -> Result<Dataset> {
    ZarrReader::new(ZarrSource::new(path))?.read_dataset()
}

/// Write a dataset as a Zarr group at `path`, replacing any existing group
///
/// # Errors
///
/// See [`ZarrWriter::write_dataset`].
pub fn write_zarr_dataset(path: &Path, dataset: &Dataset) -> Result<()> {
    ZarrWriter::new(ZarrSource::new(path)).write_dataset(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use zarrs::array::codec::bytes_to_bytes::blosc::{
        BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
    };
    use zarrs::array::codec::BytesToBytesCodecTraits;
    use zarrs::array::{ArrayBuilder, FillValue};

    fn sst_dataset() -> Dataset {
        let mut ds = Dataset::new();
        ds.insert(
            "SST",
            DataArray::new(
                vec!["nlat".into(), "nlon".into()],
                ArrayD::from_shape_vec(vec![2, 2], vec![1.0, f32::NAN, 3.0, 4.5]).unwrap(),
            )
            .unwrap(),
        )
        .unwrap();
        ds
    }

    #[test]
    fn test_chunk_keys() {
        let meta = ArrayMetadata::single_chunk(&[3, 4]);
        assert_eq!(meta.chunk_key(&[0, 0]), "0.0");
        assert_eq!(ArrayMetadata::single_chunk(&[]).chunk_key(&[]), "0");
        assert_eq!(meta.chunks, vec![3, 4]);
    }

    #[test]
    fn test_reads_multi_chunk_array() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("group.zarr");
        let array_dir = root.join("v");
        fs::create_dir_all(&array_dir).unwrap();
        fs::write(root.join(ZGROUP), r#"{"zarr_format": 2}"#).unwrap();

        let mut meta = ArrayMetadata::single_chunk(&[3]);
        meta.chunks = vec![2];
        fs::write(array_dir.join(ZARRAY), serde_json::to_string(&meta).unwrap()).unwrap();
        fs::write(array_dir.join(ZATTRS), r#"{"_ARRAY_DIMENSIONS": ["x"], "units": "K"}"#).unwrap();
        let first: Vec<u8> = [1.0_f32, 2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let second: Vec<u8> = [3.0_f32, 0.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        fs::write(array_dir.join("0"), first).unwrap();
        fs::write(array_dir.join("1"), second).unwrap();

        let ds = read_zarr_dataset(&root).unwrap();
        let v = ds.variable("v").unwrap();
        assert_eq!(v.dims, vec!["x"]);
        assert_eq!(v.data.as_slice().unwrap(), &[1.0, 2.0, 3.0]);
        assert_eq!(v.attributes["units"], json!("K"));
    }

    #[test]
    fn test_reads_blosc_compressed_arrays() {
        let dir = tempdir().unwrap();

        // v3 group with a Blosc-compressed array
        let v3_root = dir.path().join("v3.zarr");
        fs::create_dir_all(&v3_root).unwrap();
        fs::write(
            v3_root.join(ZARR_JSON),
            r#"{"zarr_format": 3, "node_type": "group", "attributes": {"title": "blosc"}}"#,
        )
        .unwrap();
        let store = Arc::new(FilesystemStore::new(&v3_root).unwrap());

        let mut attrs = Map::new();
        attrs.insert(ARRAY_DIMENSIONS.to_string(), json!(["nlat", "nlon"]));
        attrs.insert("units".to_string(), json!("degC"));
        let level = BloscCompressionLevel::try_from(5_u8).ok().unwrap();
        let codec: Arc<dyn BytesToBytesCodecTraits> = Arc::new(
            BloscCodec::new(BloscCompressor::LZ4, level, None, BloscShuffleMode::Shuffle, Some(4))
                .map_err(|e| e.to_string())
                .unwrap(),
        );
        let values: Vec<f32> = (0..6).map(|v| v as f32 * 1.5).collect();

        let array = ArrayBuilder::new(
            vec![2, 3],
            DataType::Float32,
            vec![2_u64, 3].try_into().unwrap(),
            FillValue::from(f32::NAN),
        )
        .attributes(attrs)
        .bytes_to_bytes_codecs(vec![codec])
        .build(store, "/SST")
        .unwrap();
        array.store_metadata().unwrap();
        let subset = ArraySubset::new_with_start_shape(vec![0, 0], vec![2, 3]).unwrap();
        array
            .store_array_subset_elements(&subset, values.as_slice())
            .unwrap();

        let ds = read_zarr_dataset(&v3_root).unwrap();
        assert_eq!(ds.attributes["title"], json!("blosc"));
        let sst = ds.variable("SST").unwrap();
        assert_eq!(sst.dims, vec!["nlat", "nlon"]);
        assert_eq!(sst.data.as_slice().unwrap(), values.as_slice());
        assert_eq!(sst.attributes["units"], json!("degC"));

        // the same Blosc chunk under v2 metadata, as xarray writes by default
        let v2_root = dir.path().join("v2.zarr");
        let array_dir = v2_root.join("SST");
        fs::create_dir_all(&array_dir).unwrap();
        fs::write(v2_root.join(ZGROUP), r#"{"zarr_format": 2}"#).unwrap();
        let mut meta = ArrayMetadata::single_chunk(&[2, 3]);
        meta.compressor = Some(json!({
            "id": "blosc", "cname": "lz4", "clevel": 5, "shuffle": 1, "blocksize": 0
        }));
        fs::write(array_dir.join(ZARRAY), serde_json::to_string(&meta).unwrap()).unwrap();
        fs::write(array_dir.join(ZATTRS), r#"{"_ARRAY_DIMENSIONS": ["nlat", "nlon"]}"#).unwrap();
        fs::copy(v3_root.join("SST/c/0/0"), array_dir.join("0.0")).unwrap();

        let ds = read_zarr_dataset(&v2_root).unwrap();
        let sst = ds.variable("SST").unwrap();
        assert_eq!(sst.dims, vec!["nlat", "nlon"]);
        assert_eq!(sst.data.as_slice().unwrap(), values.as_slice());
    }

    #[test]
    fn test_write_publishes_complete_group() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("epoch_average-ocn.zarr");
        let staging = staging_path(&root);
        assert_eq!(staging, dir.path().join("epoch_average-ocn.zarr.partial"));

        // leftovers of an interrupted write are discarded
        fs::create_dir_all(staging.join("SST")).unwrap();
        fs::write(staging.join(ZGROUP), r#"{"zarr_format": 2}"#).unwrap();

        write_zarr_dataset(&root, &sst_dataset()).unwrap();
        assert!(!staging.exists());

        let source = ZarrSource::new(&root);
        assert!(source.exists());
        assert!(source.is_consolidated());

        let ds = read_zarr_dataset(&root).unwrap();
        let sst = ds.variable("SST").unwrap();
        assert_eq!(sst.dims, vec!["nlat", "nlon"]);
        assert_eq!(sst.data[[1, 1]], 4.5);
        assert!(sst.data[[0, 1]].is_nan());
        assert!(ds.attributes.contains_key("history"));
    }

    #[test]
    fn test_missing_group_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            ZarrReader::new(ZarrSource::new(dir.path().join("absent.zarr"))),
            Err(DiagError::Zarr(_))
        ));
    }
}
