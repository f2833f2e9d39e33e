//! Functions that compute derived fields.
//!
//! In-process derivations (signature [`crate::fields::InProcessFn`]) read their
//! dependencies' source files and return data already on the output grid. External
//! derivations (signature [`crate::fields::ExternalFn`]) run a utility that reads
//! fields back from the intermediate-format files.
use std::{
    io::Write,
    path::{Path, PathBuf},
    process::Command,
};

use chrono::{Datelike, Timelike};
use error_stack::ResultExt;
use indexmap::IndexMap;
use ndarray::{ArrayD, Zip};
use tracing::{debug, info, warn};

use crate::{
    container::AttrValue,
    error::DerivationError,
    fields::{DerivationInputs, DerivedVariable, FieldMetadata, IndirectArgs},
    intermediate::intermediate_file_name,
};

/// Standard gravity (m s-2), used to turn geopotential into height.
pub const GRAVITY: f32 = 9.80665;

/// Land fraction (land + land ice) at or above which a grid cell is flagged as land
pub const LAND_FRACTION_THRESHOLD: f32 = 0.5;

fn check_same_shape(
    a_name: &str,
    a: &ArrayD<f32>,
    b_name: &str,
    b: &ArrayD<f32>,
) -> error_stack::Result<(), DerivationError> {
    if a.shape() != b.shape() {
        return Err(DerivationError::InconsistentInputs(format!(
            "{a_name} has shape {:?} but {b_name} has shape {:?}",
            a.shape(),
            b.shape()
        ))
        .into());
    }
    Ok(())
}

/// LANDSEA: 1 where the land plus land ice fraction is at least one half, 0 elsewhere.
pub fn create_landsea(
    inputs: &DerivationInputs<'_>,
) -> error_stack::Result<DerivedVariable, DerivationError> {
    let frland = inputs.read("FRLAND")?;
    let frlandice = inputs.read("FRLANDICE")?;
    let land = frland.data.to_f32();
    let ice = frlandice.data.to_f32();
    check_same_shape("FRLAND", &land, "FRLANDICE", &ice)?;

    let mask = Zip::from(&land).and(&ice).map_collect(|&l, &i| {
        if l + i >= LAND_FRACTION_THRESHOLD {
            1.0
        } else {
            0.0
        }
    });

    Ok(DerivedVariable {
        dims: frland.dims,
        data: mask,
        units: "proprtn".to_string(),
        description: "Land/Sea flag (1=land, 0=sea)".to_string(),
        extra_attributes: IndexMap::new(),
    })
}

/// SOILHGT: terrain height from the surface geopotential.
pub fn create_soilhgt(
    inputs: &DerivationInputs<'_>,
) -> error_stack::Result<DerivedVariable, DerivationError> {
    let phis = inputs.read("PHIS")?;
    let height = phis.data.to_f32().mapv(|g| g / GRAVITY);
    Ok(DerivedVariable {
        dims: phis.dims,
        data: height,
        units: "m".to_string(),
        description: "Terrain field of source analysis".to_string(),
        extra_attributes: IndexMap::new(),
    })
}

/// SPEEDLML: lowest model level wind speed from its components. Attributes other
/// than the names are carried over from ULML.
pub fn create_speedlml(
    inputs: &DerivationInputs<'_>,
) -> error_stack::Result<DerivedVariable, DerivationError> {
    let ulml = inputs.read("ULML")?;
    let vlml = inputs.read("VLML")?;
    let u = ulml.data.to_f32();
    let v = vlml.data.to_f32();
    check_same_shape("ULML", &u, "VLML", &v)?;

    let speed = Zip::from(&u).and(&v).map_collect(|&u, &v| u.hypot(v));

    let units = ulml.attribute_str("units").unwrap_or("m s-1").to_string();
    let mut extra_attributes: IndexMap<String, AttrValue> = ulml
        .attributes
        .into_iter()
        .filter(|(k, _)| k != "units" && k != "long_name" && k != "standard_name")
        .collect();
    extra_attributes.insert("standard_name".to_string(), "surface_wind".into());

    Ok(DerivedVariable {
        dims: ulml.dims,
        data: speed,
        units,
        description: "surface_wind".to_string(),
        extra_attributes,
    })
}

/// Name of the geopotential height utility in the geos2wrf utilities directory
pub const CREATE_HGT_EXE: &str = "createHGT.exe";

/// GHT: geopotential height on the output levels, computed by the geos2wrf `createHGT`
/// utility from TT, SPECHUMD, PRESSURE and SOILHGT already written to the intermediate file.
///
/// The utility reads `namelist.createHGT` from its working directory and writes its output
/// there, so each timestamp gets its own `.ght_YYYYmmdd_HHMM` directory under the output
/// directory, removed once the output has been moved out. If `cat_output` is set, the output
/// is appended to the combined intermediate file for the input prefix, otherwise it is moved
/// into the output directory. The namelist only carries the hour, so timestamps that are not
/// on the hour are rejected.
pub fn create_ght(args: &IndirectArgs) -> error_stack::Result<Option<FieldMetadata>, DerivationError> {
    if args.timestamp.minute() != 0 || args.timestamp.second() != 0 {
        return Err(DerivationError::External(format!(
            "{CREATE_HGT_EXE} only accepts whole hours, cannot compute GHT for {}",
            args.timestamp
        ))
        .into());
    }
    let utils_dir = args.utils_dir.as_deref().ok_or_else(|| {
        DerivationError::External("no geos2wrf utilities directory is configured".to_string())
    })?;
    let exe = absolute(&utils_dir.join(CREATE_HGT_EXE))?;
    let in_dir = absolute(&args.in_dir)?;

    let work_dir = args
        .out_dir
        .join(format!(".ght_{}", args.timestamp.format("%Y%m%d_%H%M")));
    std::fs::create_dir_all(&work_dir).change_context_lazy(|| {
        DerivationError::External(format!("could not create {}", work_dir.display()))
    })?;

    let result = run_create_hgt(args, &exe, &in_dir, &work_dir);
    if let Err(e) = std::fs::remove_dir_all(&work_dir) {
        warn!("Could not remove GHT working directory {}: {e}", work_dir.display());
    }
    result?;

    Ok(Some(FieldMetadata {
        units: "m".to_string(),
        description: "Geopotential height".to_string(),
    }))
}

fn absolute(path: &Path) -> error_stack::Result<PathBuf, DerivationError> {
    std::fs::canonicalize(path).change_context_lazy(|| {
        DerivationError::External(format!("{} does not exist", path.display()))
    })
}

fn run_create_hgt(
    args: &IndirectArgs,
    exe: &Path,
    in_dir: &Path,
    work_dir: &Path,
) -> error_stack::Result<(), DerivationError> {
    let namelist = work_dir.join("namelist.createHGT");
    let contents = format!(
        "&input\n  directory='{}'\n  prefix='{}'\n  year={}\n  month={}\n  day={}\n  hour={}\n  modelTopPressure=1.\n/\n",
        in_dir.display(),
        args.in_prefix,
        args.timestamp.year(),
        args.timestamp.month(),
        args.timestamp.day(),
        args.timestamp.hour(),
    );
    std::fs::write(&namelist, contents).change_context_lazy(|| {
        DerivationError::External(format!("could not write {}", namelist.display()))
    })?;

    info!("Running {} in {}", exe.display(), work_dir.display());
    let status = Command::new(exe)
        .current_dir(work_dir)
        .status()
        .change_context_lazy(|| {
            DerivationError::External(format!("could not start {}", exe.display()))
        })?;
    if !status.success() {
        return Err(DerivationError::External(format!("{} exited with {status}", exe.display())).into());
    }

    let output_name = intermediate_file_name("GHT", args.timestamp);
    let produced = work_dir.join(&output_name);
    if args.cat_output {
        let combined = args
            .out_dir
            .join(intermediate_file_name(&args.in_prefix, args.timestamp));
        append_and_remove(&produced, &combined)
    } else {
        let dest = args.out_dir.join(&output_name);
        std::fs::rename(&produced, &dest).change_context_lazy(|| {
            DerivationError::External(format!(
                "could not move {} to {}",
                produced.display(),
                dest.display()
            ))
        })
    }
}

fn append_and_remove(from: &Path, to: &Path) -> error_stack::Result<(), DerivationError> {
    debug!("Appending {} to {}", from.display(), to.display());
    let bytes = std::fs::read(from).change_context_lazy(|| {
        DerivationError::External(format!("expected output {} was not readable", from.display()))
    })?;
    let mut out = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(to)
        .change_context_lazy(|| DerivationError::External(format!("could not open {}", to.display())))?;
    out.write_all(&bytes)
        .change_context_lazy(|| DerivationError::External(format!("could not append to {}", to.display())))?;
    std::fs::remove_file(from)
        .change_context_lazy(|| DerivationError::External(format!("could not remove {}", from.display())))?;
    Ok(())
}
