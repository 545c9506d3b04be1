//! Loading a catalog into a keyed collection of datasets
//!
//! Rows are grouped by the descriptor's `groupby_attrs`; the group key is the joined
//! attribute values (`component.experiment.stream`). Within a group the aggregations are
//! applied outermost first: rows are partitioned by the aggregation's attribute, each
//! partition is aggregated with the remaining aggregations, and the partitions are then
//! combined.

use super::descriptor::{Aggregation, AggregationKind, AssetFormat};
use super::{Cell, EsmCatalog};
use crate::dataset::{Collection, Dataset};
use crate::errors::{DiagError, Result};
use crate::netcdf_io::{open_dataset, OpenOptions};
use crate::zarr_io::read_zarr_dataset;
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// Separator between groupby attribute values in collection keys
pub const KEY_SEPARATOR: &str = ".";

type Row = Vec<Cell>;

/// Load every group of the catalog as one dataset
///
/// Groups are opened in parallel. Requested variables from a prior search restrict what
/// is kept from each asset.
///
/// # Errors
///
/// Returns a [`DiagError::Task`] naming the group whose assets could not be opened or
/// combined.
#[instrument(skip_all, fields(rows = catalog.len()))]
pub fn load_catalog(catalog: &EsmCatalog, options: &OpenOptions) -> Result<Collection> {
    if catalog.is_empty() {
        warn!("Loading an empty catalog");
        return Ok(Collection::new());
    }

    let groups = group_rows(catalog)?;
    let aggregations: &[Aggregation] = catalog
        .descriptor
        .aggregation_control
        .as_ref()
        .map_or(&[][..], |c| c.aggregations.as_slice());

    let loaded: Vec<(String, Dataset)> = groups
        .into_par_iter()
        .map(|(key, rows)| {
            debug!(key = %key, assets = rows.len(), "Loading group");
            aggregate(catalog, &rows, aggregations, options)
                .map(|ds| (key.clone(), ds))
                .map_err(|e| DiagError::for_key(&key, e))
        })
        .collect::<Result<_>>()?;

    let collection: Collection = loaded.into_iter().collect();
    info!(datasets = collection.len(), "📂 Loaded catalog");
    Ok(collection)
}

/// Group rows by key, in key order
fn group_rows(catalog: &EsmCatalog) -> Result<BTreeMap<String, Vec<&Row>>> {
    let groupby: Vec<usize> = catalog
        .descriptor
        .aggregation_control
        .as_ref()
        .map(|c| {
            c.groupby_attrs
                .iter()
                .map(|attr| catalog.column_index(attr))
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();

    let mut groups: BTreeMap<String, Vec<&Row>> = BTreeMap::new();
    for row in catalog.rows() {
        let key = if groupby.is_empty() {
            catalog.asset_path(row)?.display().to_string()
        } else {
            groupby
                .iter()
                .map(|&i| row[i].as_text())
                .collect::<Vec<_>>()
                .join(KEY_SEPARATOR)
        };
        groups.entry(key).or_default().push(row);
    }
    Ok(groups)
}

fn aggregate(
    catalog: &EsmCatalog,
    rows: &[&Row],
    aggregations: &[Aggregation],
    options: &OpenOptions,
) -> Result<Dataset> {
    let Some((aggregation, rest)) = aggregations.split_first() else {
        let mut datasets = rows.iter().map(|row| open_row(catalog, row, options));
        let mut merged = datasets
            .next()
            .ok_or_else(|| DiagError::Catalog("no assets in group".to_string()))??;
        for ds in datasets {
            merged.merge(ds?)?;
        }
        return Ok(merged);
    };

    let column = catalog.column_index(&aggregation.attribute_name)?;
    let mut partitions: BTreeMap<String, Vec<&Row>> = BTreeMap::new();
    for row in rows {
        partitions.entry(row[column].as_text()).or_default().push(row);
    }

    let parts = partitions
        .values()
        .map(|part| aggregate(catalog, part, rest, options))
        .collect::<Result<Vec<_>>>()?;

    match aggregation.kind {
        AggregationKind::Union => {
            let mut parts = parts.into_iter();
            let mut merged = parts.next().unwrap_or_default();
            for part in parts {
                merged.merge(part)?;
            }
            Ok(merged)
        }
        AggregationKind::JoinExisting => {
            let dim = aggregation.options.dim.as_deref().ok_or_else(|| {
                DiagError::Catalog(format!(
                    "join_existing on '{}' needs options.dim",
                    aggregation.attribute_name
                ))
            })?;
            Dataset::concat(parts, dim)
        }
        AggregationKind::JoinNew => Dataset::stack(parts, &aggregation.attribute_name),
    }
}

fn open_row(catalog: &EsmCatalog, row: &[Cell], options: &OpenOptions) -> Result<Dataset> {
    let path = catalog.asset_path(row)?;
    let dataset = match row_format(catalog, row)? {
        AssetFormat::NetCDF => open_dataset(&path, options)?,
        AssetFormat::Zarr => read_zarr_dataset(&path)?.drop_variables(&options.drop_variables),
    };
    Ok(match catalog.requested_variables() {
        Some(requested) => dataset.select(requested),
        None => dataset,
    })
}

fn row_format(catalog: &EsmCatalog, row: &[Cell]) -> Result<AssetFormat> {
    let assets = &catalog.descriptor.assets;
    let name = match (&assets.format, &assets.format_column_name) {
        (Some(format), _) => format.clone(),
        (None, Some(column)) => row[catalog.column_index(column)?].as_text(),
        (None, None) => return Ok(AssetFormat::NetCDF),
    };
    AssetFormat::parse(&name)
        .ok_or_else(|| DiagError::Catalog(format!("unsupported asset format '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::descriptor::{AggregationControl, AggregationOptions, AssetSpec, CatalogDescriptor};
    use ndarray::Array2;
    use std::path::Path;
    use tempfile::tempdir;

    fn write_series(path: &Path, name: &str, start: f32) {
        let mut file = netcdf::create(path).unwrap();
        file.add_dimension("time", 2).unwrap();
        file.add_dimension("nlat", 3).unwrap();
        let mut var = file.add_variable::<f32>(name, &["time", "nlat"]).unwrap();
        let data = Array2::from_shape_fn((2, 3), |(t, j)| start + (t * 3 + j) as f32);
        var.put(data.view(), ..).unwrap();
    }

    fn descriptor(aggregations: Vec<Aggregation>) -> CatalogDescriptor {
        CatalogDescriptor {
            esmcat_version: None,
            id: None,
            description: None,
            catalog_file: None,
            attributes: Vec::new(),
            assets: AssetSpec {
                column_name: "path".into(),
                format: Some("netcdf".into()),
                format_column_name: None,
            },
            aggregation_control: Some(AggregationControl {
                variable_column_name: "variable".into(),
                groupby_attrs: vec!["component".into()],
                aggregations,
            }),
        }
    }

    #[test]
    fn test_join_existing_then_union() {
        let dir = tempdir().unwrap();
        write_series(&dir.path().join("TEMP.0001.nc"), "TEMP", 0.0);
        write_series(&dir.path().join("TEMP.0002.nc"), "TEMP", 100.0);
        write_series(&dir.path().join("SALT.0001.nc"), "SALT", 0.0);

        let v = |s: &str| Cell::Value(s.to_string());
        let catalog = EsmCatalog::new(
            descriptor(vec![
                Aggregation {
                    kind: AggregationKind::Union,
                    attribute_name: "variable".into(),
                    options: AggregationOptions::default(),
                },
                Aggregation {
                    kind: AggregationKind::JoinExisting,
                    attribute_name: "time_range".into(),
                    options: AggregationOptions {
                        dim: Some("time".into()),
                        ..AggregationOptions::default()
                    },
                },
            ]),
            vec!["component".into(), "variable".into(), "time_range".into(), "path".into()],
            vec![
                vec![v("ocn"), v("TEMP"), v("0002"), v("TEMP.0002.nc")],
                vec![v("ocn"), v("TEMP"), v("0001"), v("TEMP.0001.nc")],
                vec![v("ocn"), v("SALT"), v("0001"), v("SALT.0001.nc")],
            ],
            dir.path().to_path_buf(),
        )
        .unwrap();

        let collection = load_catalog(&catalog, &OpenOptions::default()).unwrap();
        assert_eq!(collection.keys(), vec!["ocn"]);

        let ds = collection.get("ocn").unwrap();
        let temp = ds.variable("TEMP").unwrap();
        assert_eq!(temp.shape(), &[4, 3]);
        // partitions are joined in attribute order, not row order
        assert_eq!(temp.data[[0, 0]], 0.0);
        assert_eq!(temp.data[[2, 0]], 100.0);
        assert_eq!(ds.variable("SALT").unwrap().shape(), &[2, 3]);
    }

    #[test]
    fn test_join_new_stacks_members() {
        let dir = tempdir().unwrap();
        write_series(&dir.path().join("r1.nc"), "TEMP", 0.0);
        write_series(&dir.path().join("r2.nc"), "TEMP", 10.0);

        let v = |s: &str| Cell::Value(s.to_string());
        let catalog = EsmCatalog::new(
            descriptor(vec![Aggregation {
                kind: AggregationKind::JoinNew,
                attribute_name: "member_id".into(),
                options: AggregationOptions::default(),
            }]),
            vec!["component".into(), "member_id".into(), "path".into()],
            vec![
                vec![v("ocn"), v("r2"), v("r2.nc")],
                vec![v("ocn"), v("r1"), v("r1.nc")],
            ],
            dir.path().to_path_buf(),
        )
        .unwrap();

        let collection = load_catalog(&catalog, &OpenOptions::default()).unwrap();
        let temp = collection.get("ocn").unwrap().variable("TEMP").unwrap();
        assert_eq!(temp.dims, vec!["member_id", "time", "nlat"]);
        assert_eq!(temp.shape(), &[2, 2, 3]);
        assert_eq!(temp.data[[0, 0, 0]], 0.0);
        assert_eq!(temp.data[[1, 0, 0]], 10.0);
    }

    #[test]
    fn test_missing_asset_names_the_group() {
        let dir = tempdir().unwrap();
        let v = |s: &str| Cell::Value(s.to_string());
        let catalog = EsmCatalog::new(
            descriptor(Vec::new()),
            vec!["component".into(), "variable".into(), "path".into()],
            vec![vec![v("atm"), v("TS"), v("missing.nc")]],
            dir.path().to_path_buf(),
        )
        .unwrap();

        match load_catalog(&catalog, &OpenOptions::default()) {
            Err(DiagError::Task { key, .. }) => assert_eq!(key, "atm"),
            other => panic!("expected a task error, got {other:?}"),
        }
    }
}
