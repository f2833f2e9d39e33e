//! In-memory stand-ins for the netCDF reader and writer, plus builders for
//! synthetic G5NR source trees.
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use chrono::{NaiveDateTime, Timelike};
use indexmap::IndexMap;
use ndarray::{ArrayD, IxDyn};

use crate::{
    container::{AttrValue, OutputContainer, VarArray, Variable},
    error::{ReadError, WriteError},
    fields::DirectField,
    io::{ContainerWriter, SourceReader},
    locator::SourceLocator,
    registry::PRESSURE_SOURCE_FIELD,
};

pub(crate) fn test_time() -> NaiveDateTime {
    NaiveDateTime::parse_from_str("2006-09-04 00:00", "%Y-%m-%d %H:%M").unwrap()
}

/// Source files and output containers kept in memory, keyed by path.
///
/// Reading a path that was never populated gives [`ReadError::MissingFile`], the same as
/// the netCDF reader would for a file that does not exist. Every call to
/// [`ContainerWriter::write_container`] is counted.
#[derive(Default)]
pub(crate) struct MemoryStore {
    files: Mutex<IndexMap<PathBuf, IndexMap<String, Variable>>>,
    outputs: Mutex<IndexMap<PathBuf, OutputContainer>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub(crate) fn add_variable<P: Into<PathBuf>>(&self, path: P, name: &str, var: Variable) {
        let mut files = self.files.lock().unwrap();
        files
            .entry(path.into())
            .or_default()
            .insert(name.to_string(), var);
    }

    pub(crate) fn remove_source_file(&self, path: &Path) {
        self.files.lock().unwrap().shift_remove(path);
    }

    pub(crate) fn output(&self, path: &Path) -> Option<OutputContainer> {
        self.outputs.lock().unwrap().get(path).cloned()
    }

    pub(crate) fn output_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.outputs.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub(crate) fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl SourceReader for MemoryStore {
    fn read_variable(
        &self,
        path: &Path,
        varname: &str,
    ) -> error_stack::Result<Variable, ReadError> {
        let files = self.files.lock().unwrap();
        let file = files
            .get(path)
            .ok_or_else(|| ReadError::MissingFile(path.to_path_buf()))?;
        let var = file
            .get(varname)
            .ok_or_else(|| ReadError::MissingVariable(path.to_path_buf(), varname.to_string()))?;
        Ok(var.clone())
    }
}

impl ContainerWriter for MemoryStore {
    fn exists(&self, path: &Path) -> bool {
        self.outputs.lock().unwrap().contains_key(path)
    }

    fn write_container(
        &self,
        container: &OutputContainer,
        path: &Path,
    ) -> error_stack::Result<(), WriteError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.outputs
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), container.clone());
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> error_stack::Result<(), WriteError> {
        let mut outputs = self.outputs.lock().unwrap();
        let cont = outputs.shift_remove(from).ok_or_else(|| WriteError::Rename {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        })?;
        outputs.insert(to.to_path_buf(), cont);
        Ok(())
    }

    fn remove(&self, path: &Path) -> error_stack::Result<(), WriteError> {
        self.outputs.lock().unwrap().shift_remove(path);
        Ok(())
    }
}

/// Sizes of the synthetic source grid.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TestGrid {
    pub nlev: usize,
    pub nlat: usize,
    pub nlon: usize,
}

impl Default for TestGrid {
    fn default() -> Self {
        Self {
            nlev: 4,
            nlat: 3,
            nlon: 2,
        }
    }
}

/// Mid-layer pressure of the synthetic grid: 250, 500, 750 and 1000 hPa for four
/// levels, the same in every column.
pub(crate) fn synthetic_pressure(k: usize) -> f32 {
    25000.0 * (k + 1) as f32
}

/// The value of a synthetic field at level `k`, row `j`, column `i`. It is linear in
/// the level index (and so in pressure), which makes interpolated values easy to check.
/// `FR*` fractions cycle through 0, 0.3, 0.6.
pub(crate) fn synthetic_value(name: &str, timestamp: NaiveDateTime, k: usize, j: usize, i: usize) -> f32 {
    if name == PRESSURE_SOURCE_FIELD {
        return synthetic_pressure(k);
    }
    if name.starts_with("FR") {
        return ((i + j) % 3) as f32 * 0.3;
    }
    let base: f32 = name.bytes().map(|b| b as f32).sum();
    base + 25.0 * k as f32 + j as f32 + 0.1 * i as f32 + timestamp.hour() as f32
}

/// Surface variables stored in otherwise 3-D collections
const SURFACE_VARS_IN_3D_COLLECTIONS: &[&str] = &["PS"];

fn is_3d_field(field: &DirectField) -> bool {
    field.source.dataset.contains("_3d_")
        && !SURFACE_VARS_IN_3D_COLLECTIONS.contains(&field.source.native_name.as_str())
}

fn coord(dim: &str, values: Vec<f64>, units: &str) -> Variable {
    let n = values.len();
    let data = ArrayD::from_shape_vec(IxDyn(&[n]), values).unwrap();
    let mut attrs = IndexMap::new();
    attrs.insert("units".to_string(), AttrValue::from(units));
    Variable::new(vec![dim.to_string()], VarArray::F64(data)).with_attributes(attrs)
}

/// Write `field` and the coordinate variables for `timestamp` into the store at the
/// path the locator gives for it.
pub(crate) fn add_synthetic_field(
    store: &MemoryStore,
    locator: &SourceLocator,
    field: &DirectField,
    timestamp: NaiveDateTime,
    grid: TestGrid,
) {
    let path = locator.locate(field, timestamp);
    let three_d = is_3d_field(field);

    let (dims, shape): (Vec<&str>, Vec<usize>) = if three_d {
        (vec!["time", "lev", "lat", "lon"], vec![1, grid.nlev, grid.nlat, grid.nlon])
    } else {
        (vec!["time", "lat", "lon"], vec![1, grid.nlat, grid.nlon])
    };
    let nlev = if three_d { grid.nlev } else { 1 };
    let mut values = Vec::with_capacity(nlev * grid.nlat * grid.nlon);
    for k in 0..nlev {
        for j in 0..grid.nlat {
            for i in 0..grid.nlon {
                values.push(synthetic_value(&field.name, timestamp, k, j, i));
            }
        }
    }
    let data = ArrayD::from_shape_vec(IxDyn(&shape), values).unwrap();

    let mut attrs = IndexMap::new();
    attrs.insert("units".to_string(), AttrValue::from("K"));
    attrs.insert(
        "long_name".to_string(),
        AttrValue::from(format!("synthetic {}", field.name)),
    );
    attrs.insert("fmissing_value".to_string(), AttrValue::from(1.0e15f32));
    let var = Variable::new(dims.iter().map(|d| d.to_string()).collect(), VarArray::F32(data))
        .with_attributes(attrs);
    store.add_variable(&path, &field.source.native_name, var);

    let lats = (0..grid.nlat).map(|j| -10.0 + j as f64).collect();
    let lons = (0..grid.nlon).map(|i| 100.0 + i as f64).collect();
    store.add_variable(&path, "lat", coord("lat", lats, "degrees_north"));
    store.add_variable(&path, "lon", coord("lon", lons, "degrees_east"));
    store.add_variable(
        &path,
        "time",
        Variable::new(
            vec!["time".to_string()],
            VarArray::I32(ArrayD::from_elem(IxDyn(&[1]), (timestamp.hour() * 60) as i32)),
        ),
    );
    if three_d {
        let levs = (1..=grid.nlev).map(|k| k as f64).collect();
        store.add_variable(&path, "lev", coord("lev", levs, "layer"));
    }
}

/// Populate the store with every field in `fields` for every timestamp in `times`.
pub(crate) fn populate_sources(
    store: &MemoryStore,
    locator: &SourceLocator,
    fields: &[DirectField],
    times: &[NaiveDateTime],
    grid: TestGrid,
) {
    for &t in times {
        for f in fields {
            add_synthetic_field(store, locator, f, t, grid);
        }
    }
}
