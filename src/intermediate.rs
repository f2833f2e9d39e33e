//! Writing merged fields in the WPS intermediate format read by the downstream
//! horizontal interpolation tool.
//!
//! Each file is a sequence of big-endian Fortran unformatted records. Every 2-D
//! slab gets five records: the format version, a header (date, field name,
//! units, description, level, grid size, projection code), the lat-lon projection
//! parameters, the earth-relative wind flag, and the data with x varying fastest.
//! Files are always appended to, so fields from several batches can share one file.
use std::{
    fs::OpenOptions,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{NaiveDateTime, Timelike};
use error_stack::ResultExt;
use ndarray::{Array3, ArrayView2, Axis, Ix2};
use tracing::{debug, info, warn};

use crate::{
    container::{AttrValue, OutputContainer, Variable},
    error::StepError,
    merge::{LAT_VAR, LEV_VAR, LON_VAR, TIME_VAR},
};

pub const WPS_FORMAT_VERSION: i32 = 5;
pub const EARTH_RADIUS_KM: f32 = 6367.47;
/// Value the downstream tool treats as missing
pub const WPS_MISSING_VALUE: f32 = -1.0e30;
/// XLVL of surface fields
pub const SURFACE_LEVEL: f32 = 200100.0;
/// XLVL of fields reduced to sea level
pub const SEA_LEVEL: f32 = 201300.0;
/// Fields that go on the sea level rather than the surface level
pub const SEA_LEVEL_FIELDS: &[&str] = &["PMSL"];
/// Value written into the MAP_SOURCE header entry
pub const DEFAULT_MAP_SOURCE: &str = "GEOS-5 Nature Run";

const HDATE_LEN: usize = 24;
const MAP_SOURCE_LEN: usize = 32;
const FIELD_LEN: usize = 9;
const UNITS_LEN: usize = 25;
const DESC_LEN: usize = 46;
const STARTLOC_LEN: usize = 8;
const PROJ_LATLON: i32 = 0;

/// Name of the intermediate file for `prefix` at `timestamp`: `PREFIX:YYYY-MM-DD_HH`,
/// with `:MM` appended when the minutes are not zero.
pub fn intermediate_file_name(prefix: &str, timestamp: NaiveDateTime) -> String {
    if timestamp.minute() == 0 {
        format!("{prefix}:{}", timestamp.format("%Y-%m-%d_%H"))
    } else {
        format!("{prefix}:{}", timestamp.format("%Y-%m-%d_%H:%M"))
    }
}

/// Name of a per-field, per-level file: `PREFIX_FIELD_XLVL:YYYY-MM-DD_HH`
pub fn separate_file_name(prefix: &str, field: &str, xlvl: f32, timestamp: NaiveDateTime) -> String {
    let base = intermediate_file_name("", timestamp);
    format!("{prefix}_{field}_{}{base}", xlvl.round() as i64)
}

/// A regular latitude/longitude grid, described by its southwest corner and spacing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLonGrid {
    pub start_lat: f32,
    pub start_lon: f32,
    pub delta_lat: f32,
    pub delta_lon: f32,
    pub nx: usize,
    pub ny: usize,
}

impl LatLonGrid {
    /// Take the grid from the `lat` and `lon` coordinate variables of `container`.
    /// They may be 1-D or 2-D (`(y, x)`, as in LIS output).
    pub fn from_container(container: &OutputContainer) -> Result<Self, String> {
        let lat = container
            .variable(LAT_VAR)
            .ok_or_else(|| format!("no '{LAT_VAR}' coordinate"))?
            .data
            .to_f32();
        let lon = container
            .variable(LON_VAR)
            .ok_or_else(|| format!("no '{LON_VAR}' coordinate"))?
            .data
            .to_f32();

        let (lats, lons): (Vec<f32>, Vec<f32>) = match (lat.ndim(), lon.ndim()) {
            (1, 1) => (lat.iter().copied().collect(), lon.iter().copied().collect()),
            (2, 2) => {
                let lat2 = lat.view().into_dimensionality::<Ix2>().map_err(|e| e.to_string())?;
                let lon2 = lon.view().into_dimensionality::<Ix2>().map_err(|e| e.to_string())?;
                (
                    lat2.column(0).iter().copied().collect(),
                    lon2.row(0).iter().copied().collect(),
                )
            }
            (a, b) => return Err(format!("cannot use {a}-D latitude with {b}-D longitude")),
        };

        let (start_lat, delta_lat) = start_and_step(&lats).ok_or("empty latitude coordinate")?;
        let (start_lon, delta_lon) = start_and_step(&lons).ok_or("empty longitude coordinate")?;
        Ok(Self {
            start_lat,
            start_lon,
            delta_lat,
            delta_lon,
            nx: lons.len(),
            ny: lats.len(),
        })
    }
}

fn start_and_step(values: &[f32]) -> Option<(f32, f32)> {
    let first = *values.first()?;
    let step = values.get(1).map(|v| v - first).unwrap_or(0.0);
    Some((first, step))
}

/// One horizontal slab ready to be written.
pub struct WpsSlab<'a> {
    pub field: &'a str,
    pub units: &'a str,
    pub description: &'a str,
    pub xlvl: f32,
    /// Data indexed `(y, x)`
    pub data: ArrayView2<'a, f32>,
}

fn fixed_width(s: &str, width: usize) -> Vec<u8> {
    let mut bytes: Vec<u8> = s.bytes().take(width).collect();
    bytes.resize(width, b' ');
    bytes
}

/// Writes slabs in the intermediate format to any [`Write`].
pub struct WpsWriter<W: Write> {
    inner: W,
    hdate: String,
    map_source: String,
}

impl<W: Write> WpsWriter<W> {
    pub fn new(inner: W, timestamp: NaiveDateTime, map_source: &str) -> Self {
        Self {
            inner,
            hdate: timestamp.format("%Y-%m-%d_%H:%M:%S").to_string(),
            map_source: map_source.to_string(),
        }
    }

    fn write_record(&mut self, payload: &[u8]) -> std::io::Result<()> {
        let marker = i32::try_from(payload.len())
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "record too long"))?
            .to_be_bytes();
        self.inner.write_all(&marker)?;
        self.inner.write_all(payload)?;
        self.inner.write_all(&marker)
    }

    pub fn write_slab(&mut self, grid: &LatLonGrid, slab: &WpsSlab<'_>) -> std::io::Result<()> {
        let (ny, nx) = slab.data.dim();
        if nx != grid.nx || ny != grid.ny {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "{} is {ny}x{nx} but the grid is {}x{}",
                    slab.field, grid.ny, grid.nx
                ),
            ));
        }

        self.write_record(&WPS_FORMAT_VERSION.to_be_bytes())?;

        let mut header = Vec::with_capacity(156);
        header.extend(fixed_width(&self.hdate, HDATE_LEN));
        header.extend(0.0f32.to_be_bytes());
        header.extend(fixed_width(&self.map_source, MAP_SOURCE_LEN));
        header.extend(fixed_width(slab.field, FIELD_LEN));
        header.extend(fixed_width(slab.units, UNITS_LEN));
        header.extend(fixed_width(slab.description, DESC_LEN));
        header.extend(slab.xlvl.to_be_bytes());
        header.extend((nx as i32).to_be_bytes());
        header.extend((ny as i32).to_be_bytes());
        header.extend(PROJ_LATLON.to_be_bytes());
        self.write_record(&header)?;

        let mut proj = Vec::with_capacity(28);
        proj.extend(fixed_width("SWCORNER", STARTLOC_LEN));
        for v in [
            grid.start_lat,
            grid.start_lon,
            grid.delta_lat,
            grid.delta_lon,
            EARTH_RADIUS_KM,
        ] {
            proj.extend(v.to_be_bytes());
        }
        self.write_record(&proj)?;

        // Winds on a lat-lon grid are earth relative
        self.write_record(&1i32.to_be_bytes())?;

        let mut data = Vec::with_capacity(nx * ny * 4);
        for v in slab.data.iter() {
            data.extend(v.to_be_bytes());
        }
        self.write_record(&data)
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// How to turn containers into intermediate files.
#[derive(Debug, Clone)]
pub struct ConversionOptions {
    pub out_dir: PathBuf,
    /// Also write one file per field and level
    pub separate_files: bool,
    /// Soil layer boundaries (cm), used to name the layers of LIS soil fields
    pub soil_layer_depths_cm: Vec<u32>,
    /// Pressure levels (Pa) of the vertical axis when fields were interpolated; otherwise
    /// 3-D fields are labeled with their 1-based model level index.
    pub isobaric_levels: Option<Vec<f32>>,
    pub map_source: String,
}

/// Remove the combined file and any separate files for `prefix` at `timestamp`,
/// so that appending starts from an empty file.
pub fn remove_stale_files(out_dir: &Path, prefix: &str, timestamp: NaiveDateTime) -> std::io::Result<()> {
    let combined = out_dir.join(intermediate_file_name(prefix, timestamp));
    if combined.exists() {
        warn!("Removing stale intermediate file {}", combined.display());
        std::fs::remove_file(&combined)?;
    }

    let date_suffix = intermediate_file_name("", timestamp);
    let sep_prefix = format!("{prefix}_");
    if !out_dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(out_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&sep_prefix) && name.ends_with(&date_suffix) {
            debug!("Removing stale intermediate file {name}");
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// A field's slabs, each with its name and level.
struct FieldSlabs {
    names: Vec<String>,
    levels: Vec<f32>,
    data: Array3<f32>,
    units: String,
    description: String,
}

fn fill_value_of(var: &Variable) -> Option<f32> {
    for key in ["_FillValue", "fmissing_value", "missing_value"] {
        match var.attributes.get(key) {
            Some(AttrValue::Float(v)) if !v.is_empty() => return Some(v[0]),
            Some(AttrValue::Double(v)) if !v.is_empty() => return Some(v[0] as f32),
            _ => (),
        }
    }
    None
}

fn prepare_field(
    name: &str,
    var: &Variable,
    opts: &ConversionOptions,
) -> Result<FieldSlabs, String> {
    let shape = var.data.shape();
    let ndim = shape.len();
    if ndim < 2 {
        return Err(format!("{name} has fewer than two dimensions"));
    }

    let mut nlayer = 1;
    for (dim, &len) in var.dims.iter().zip(shape).take(ndim - 2) {
        if dim == TIME_VAR && len != 1 {
            return Err(format!("{name} has {len} times, expected one"));
        }
        nlayer *= len;
    }
    let (ny, nx) = (shape[ndim - 2], shape[ndim - 1]);

    let fill = fill_value_of(var);
    let data = var
        .data
        .to_f32()
        .mapv(|v| {
            if !v.is_finite() || Some(v) == fill {
                WPS_MISSING_VALUE
            } else {
                v
            }
        })
        .into_shape((nlayer, ny, nx))
        .map_err(|e| e.to_string())?;

    let (names, levels) = if var.has_dim(LEV_VAR) {
        let levels = match &opts.isobaric_levels {
            Some(levels) if levels.len() == nlayer => levels.clone(),
            Some(levels) => {
                return Err(format!(
                    "{name} has {nlayer} levels but {} isobaric levels are configured",
                    levels.len()
                ))
            }
            None => (1..=nlayer).map(|k| k as f32).collect(),
        };
        (vec![name.to_string(); nlayer], levels)
    } else if nlayer > 1 {
        let depths = &opts.soil_layer_depths_cm;
        if depths.len() < nlayer + 1 {
            return Err(format!(
                "{name} has {nlayer} layers but only {} layer boundaries are configured",
                depths.len()
            ));
        }
        let names = depths
            .windows(2)
            .take(nlayer)
            .map(|w| format!("{name}{:03}{:03}", w[0], w[1]))
            .collect();
        (names, vec![SURFACE_LEVEL; nlayer])
    } else if SEA_LEVEL_FIELDS.contains(&name) {
        (vec![name.to_string()], vec![SEA_LEVEL])
    } else {
        (vec![name.to_string()], vec![SURFACE_LEVEL])
    };

    let description = var
        .attribute_str("long_name")
        .or_else(|| var.attribute_str("description"))
        .unwrap_or("")
        .to_string();
    Ok(FieldSlabs {
        names,
        levels,
        data,
        units: var.attribute_str("units").unwrap_or("").to_string(),
        description,
    })
}

fn open_append(path: &Path) -> std::io::Result<BufWriter<std::fs::File>> {
    let f = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(f))
}

/// Append `fields` from `container` to the `prefix` intermediate file for the container's
/// timestamp. Returns the paths written.
///
/// # Errors
/// A field missing from the container, a field not on the container's grid, or an I/O
/// failure gives [`StepError::Conversion`].
pub fn convert_container<S: AsRef<str>>(
    container: &OutputContainer,
    fields: &[S],
    prefix: &str,
    opts: &ConversionOptions,
) -> error_stack::Result<Vec<PathBuf>, StepError> {
    let timestamp = container.timestamp();
    let conv_err = || StepError::Conversion(timestamp);

    let grid = LatLonGrid::from_container(container)
        .map_err(|msg| error_stack::Report::new(conv_err()).attach_printable(msg))?;

    let combined_path = opts.out_dir.join(intermediate_file_name(prefix, timestamp));
    if combined_path.exists() {
        warn!("Appending to existing intermediate file {}", combined_path.display());
    }
    let mut written = vec![combined_path.clone()];
    let mut writer = WpsWriter::new(
        open_append(&combined_path)
            .change_context_lazy(conv_err)
            .attach_printable_lazy(|| format!("could not open {}", combined_path.display()))?,
        timestamp,
        &opts.map_source,
    );

    for field in fields {
        let field = field.as_ref();
        let var = container.variable(field).ok_or_else(|| {
            error_stack::Report::new(conv_err())
                .attach_printable(format!("field {field} is not in the merged output"))
        })?;
        let slabs = prepare_field(field, var, opts)
            .map_err(|msg| error_stack::Report::new(conv_err()).attach_printable(msg))?;
        debug!("Writing {} slab(s) of {field} to {}", slabs.names.len(), combined_path.display());

        for (k, (name, &xlvl)) in slabs.names.iter().zip(&slabs.levels).enumerate() {
            let slab = WpsSlab {
                field: name,
                units: &slabs.units,
                description: &slabs.description,
                xlvl,
                data: slabs.data.index_axis(Axis(0), k),
            };
            writer
                .write_slab(&grid, &slab)
                .change_context_lazy(conv_err)
                .attach_printable_lazy(|| format!("could not write {name} at level {xlvl}"))?;

            if opts.separate_files {
                let sep_path = opts
                    .out_dir
                    .join(separate_file_name(prefix, name, xlvl, timestamp));
                let mut sep = WpsWriter::new(
                    open_append(&sep_path).change_context_lazy(conv_err)?,
                    timestamp,
                    &opts.map_source,
                );
                sep.write_slab(&grid, &slab)
                    .and_then(|_| sep.flush())
                    .change_context_lazy(conv_err)
                    .attach_printable_lazy(|| format!("could not write {}", sep_path.display()))?;
                written.push(sep_path);
            }
        }
    }

    writer.flush().change_context_lazy(conv_err)?;
    info!("Wrote {} field(s) to {}", fields.len(), combined_path.display());
    Ok(written)
}
