//! Merging the fields of a [`MergePlan`] into one [`OutputContainer`] per timestamp.
//!
//! The container's horizontal grid and time come from the first direct field's
//! source file. If a vertical axis is configured, the lev coordinate and the
//! output `PRESSURE` variable come from the mid-layer pressure file, and 3-D
//! fields are optionally interpolated from model levels to fixed pressure levels.
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use error_stack::{Report, ResultExt};
use indexmap::IndexMap;
use ndarray::{ArrayD, Axis, IxDyn};
use tracing::{debug, instrument};

use crate::{
    container::{AttrValue, ContainerError, OutputContainer, VarArray, Variable},
    error::{ReadError, StepError},
    fields::{DerivationInputs, DerivedField, DirectField},
    interpolation::{single_precision, VerticalInterpolator},
    io::SourceReader,
    locator::SourceLocator,
    registry::PRESSURE_OUTPUT_FIELD,
    resolver::MergePlan,
};

pub const LAT_VAR: &str = "lat";
pub const LON_VAR: &str = "lon";
pub const LEV_VAR: &str = "lev";
pub const TIME_VAR: &str = "time";

/// Value written where interpolation cannot produce a result.
pub const DEFAULT_FILL_VALUE: f32 = 1.0e15;

/// Settings for the vertical axis of the output.
#[derive(Debug, Clone)]
pub struct VerticalOptions {
    /// The direct field giving the pressure of each model level.
    pub pressure: DirectField,
    /// Pressure levels (Pa) to interpolate 3-D fields to; `None` keeps the model levels.
    pub target_levels: Option<Vec<f32>>,
    pub extrapolate: bool,
    pub fill_value: f32,
}

impl VerticalOptions {
    pub fn native(pressure: DirectField) -> Self {
        Self {
            pressure,
            target_levels: None,
            extrapolate: true,
            fill_value: DEFAULT_FILL_VALUE,
        }
    }

    pub fn isobaric(pressure: DirectField, target_levels: Vec<f32>, extrapolate: bool) -> Self {
        Self {
            pressure,
            target_levels: Some(target_levels),
            extrapolate,
            fill_value: DEFAULT_FILL_VALUE,
        }
    }
}

/// Everything [`merge_timestep`] needs besides the plan and the timestamp.
pub struct MergeContext<'a> {
    pub locator: &'a SourceLocator,
    pub reader: &'a dyn SourceReader,
    /// `None` means the output has no vertical axis of its own (e.g. surface-only output).
    pub vertical: Option<&'a VerticalOptions>,
}

/// Model-level pressure for one timestamp plus the interpolator, if interpolating.
struct VerticalState {
    pressure: ArrayD<f32>,
    targets: Option<Vec<f32>>,
    interpolator: VerticalInterpolator,
}

impl<'a> MergeContext<'a> {
    fn read_source(&self, path: &Path, varname: &str) -> error_stack::Result<Variable, StepError> {
        self.reader
            .read_variable(path, varname)
            .map_err(|e| read_to_step_error(e, path, varname))
    }
}

fn read_to_step_error(err: Report<ReadError>, path: &Path, varname: &str) -> Report<StepError> {
    let context = match err.current_context() {
        ReadError::MissingFile(_) => StepError::MissingSourceFile(path.to_path_buf()),
        _ => StepError::read_error(path, varname),
    };
    err.change_context(context)
}

fn container_to_step_error(err: ContainerError) -> Report<StepError> {
    let context = match &err {
        ContainerError::LengthMismatch {
            varname,
            dim,
            expected,
            actual,
        } => StepError::DimensionMismatch {
            dim: dim.clone(),
            expected: *expected,
            actual: *actual,
            varname: varname.clone(),
        },
        other => StepError::context(other.to_string()),
    };
    Report::new(err).change_context(context)
}

fn add_to_container(
    container: &mut OutputContainer,
    name: &str,
    var: Variable,
) -> error_stack::Result<(), StepError> {
    container
        .add_needed_dims(name, &var)
        .map_err(container_to_step_error)?;
    container
        .add_variable(name, var)
        .map_err(container_to_step_error)
}

/// Build the output container for `timestamp`.
///
/// Direct fields are copied or interpolated, directly derived fields are computed,
/// and indirectly derived fields are left for after the intermediate conversion.
/// Nothing is written to disk here.
///
/// # Errors
/// Any missing source file, unreadable variable, interpolation failure or
/// derivation failure aborts the whole timestamp.
#[instrument(skip_all, fields(time = %timestamp))]
pub fn merge_timestep(
    ctx: &MergeContext<'_>,
    plan: &MergePlan,
    timestamp: NaiveDateTime,
) -> error_stack::Result<OutputContainer, StepError> {
    let reference = plan
        .reference_field()
        .ok_or_else(|| StepError::context("the merge plan has no direct field to take the grid from"))?;
    let ref_path = ctx.locator.locate(reference, timestamp);
    debug!("Taking the output grid from {}", ref_path.display());

    let mut container = OutputContainer::new(timestamp);
    for coord in [LAT_VAR, LON_VAR, TIME_VAR] {
        let var = ctx.read_source(&ref_path, coord)?;
        add_to_container(&mut container, coord, var)?;
    }

    let vertical = match ctx.vertical {
        Some(opts) => Some(setup_vertical(ctx, opts, timestamp, &mut container)?),
        None => None,
    };

    for field in plan.direct_fields() {
        merge_direct_field(ctx, field, timestamp, vertical.as_ref(), &mut container)
            .attach_printable_lazy(|| format!("while merging field {}", field.name))?;
    }

    for field in plan.directly_derived_fields() {
        merge_derived_field(ctx, field, timestamp, &mut container)
            .attach_printable_lazy(|| format!("while deriving field {}", field.name))?;
    }

    for field in plan.indirectly_derived_fields() {
        debug!("{} will be computed after conversion to the intermediate format", field.name);
    }

    Ok(container)
}

fn setup_vertical(
    ctx: &MergeContext<'_>,
    opts: &VerticalOptions,
    timestamp: NaiveDateTime,
    container: &mut OutputContainer,
) -> error_stack::Result<VerticalState, StepError> {
    let path = ctx.locator.locate(&opts.pressure, timestamp);
    let pl_var = ctx.read_source(&path, &opts.pressure.source.native_name)?;
    let pressure = single_precision(&opts.pressure.name, &pl_var.data)
        .change_context_lazy(|| StepError::Interpolation(opts.pressure.name.clone()))?
        .clone();

    let mut attributes = pl_var.attributes.clone();
    attributes.insert("long_name".to_string(), "pressure".into());
    attributes.insert("units".to_string(), "Pa".into());

    let pressure_out = match &opts.target_levels {
        Some(targets) => {
            let mut lev_attrs = IndexMap::new();
            lev_attrs.insert("units".to_string(), AttrValue::from("Pa"));
            lev_attrs.insert("long_name".to_string(), AttrValue::from("pressure level"));
            let lev = Variable::new(
                vec![LEV_VAR.to_string()],
                VarArray::F32(ArrayD::from_shape_vec(IxDyn(&[targets.len()]), targets.clone())
                    .map_err(|e| StepError::context(e.to_string()))?),
            )
            .with_attributes(lev_attrs);
            add_to_container(container, LEV_VAR, lev)?;
            broadcast_levels(&pressure, targets)?
        }
        None => {
            let lev = ctx.read_source(&path, LEV_VAR)?;
            add_to_container(container, LEV_VAR, lev)?;
            pressure.clone()
        }
    };

    let var = Variable::new(pl_var.dims.clone(), VarArray::F32(pressure_out)).with_attributes(attributes);
    add_to_container(container, PRESSURE_OUTPUT_FIELD, var)?;

    Ok(VerticalState {
        pressure,
        targets: opts.target_levels.clone(),
        interpolator: VerticalInterpolator::new(opts.extrapolate, opts.fill_value),
    })
}

/// An array shaped like `pressure` but with `targets` along the vertical axis,
/// the same value across each level.
fn broadcast_levels(pressure: &ArrayD<f32>, targets: &[f32]) -> error_stack::Result<ArrayD<f32>, StepError> {
    let ndim = pressure.ndim();
    if ndim < 3 {
        return Err(StepError::Interpolation(format!(
            "pressure must have (lev, lat, lon) axes, got shape {:?}",
            pressure.shape()
        ))
        .into());
    }
    let mut shape = pressure.shape().to_vec();
    let lev_axis = ndim - 3;
    shape[lev_axis] = targets.len();
    let mut out = ArrayD::zeros(IxDyn(&shape));
    for (mut slab, &p) in out.axis_iter_mut(Axis(lev_axis)).zip(targets) {
        slab.fill(p);
    }
    Ok(out)
}

fn merge_direct_field(
    ctx: &MergeContext<'_>,
    field: &DirectField,
    timestamp: NaiveDateTime,
    vertical: Option<&VerticalState>,
    container: &mut OutputContainer,
) -> error_stack::Result<(), StepError> {
    let path = ctx.locator.locate(field, timestamp);
    let var = ctx.read_source(&path, &field.source.native_name)?;

    let var = match vertical {
        Some(VerticalState {
            pressure,
            targets: Some(targets),
            interpolator,
        }) if var.has_dim(LEV_VAR) => {
            debug!("Interpolating {} to {} pressure levels", field.name, targets.len());
            let values = single_precision(&field.name, &var.data)
                .change_context_lazy(|| StepError::Interpolation(field.name.clone()))?;
            let interpolated = interpolator
                .interp_to_levels(values, pressure, targets)
                .change_context_lazy(|| StepError::Interpolation(field.name.clone()))?;
            Variable::new(var.dims, VarArray::F32(interpolated)).with_attributes(var.attributes)
        }
        _ => {
            debug!("Copying {} from {}", field.name, path.display());
            if var.has_dim(LEV_VAR) && !container.contains_variable(LEV_VAR) {
                let lev = ctx.read_source(&path, LEV_VAR)?;
                add_to_container(container, LEV_VAR, lev)?;
            }
            var
        }
    };

    add_to_container(container, &field.name, var)
}

/// Source file paths of a derived field's dependencies at `timestamp`.
pub fn dependency_paths(
    locator: &SourceLocator,
    field: &DerivedField,
    timestamp: NaiveDateTime,
) -> IndexMap<String, (crate::fields::DirectSource, PathBuf)> {
    field
        .dependencies
        .iter()
        .map(|dep| {
            (
                dep.name.clone(),
                (dep.source.clone(), locator.locate(dep, timestamp)),
            )
        })
        .collect()
}

fn merge_derived_field(
    ctx: &MergeContext<'_>,
    field: &DerivedField,
    timestamp: NaiveDateTime,
    container: &mut OutputContainer,
) -> error_stack::Result<(), StepError> {
    let inputs = DerivationInputs {
        timestamp,
        sources: dependency_paths(ctx.locator, field, timestamp),
        reader: ctx.reader,
    };
    debug!(
        "Deriving {} from {} source file(s)",
        field.name,
        inputs.sources.len()
    );

    let derived = (field.derive)(&inputs).map_err(|e| {
        let context = match e.downcast_ref::<ReadError>() {
            Some(ReadError::MissingFile(p)) => StepError::MissingSourceFile(p.clone()),
            _ => StepError::Derivation(field.name.clone()),
        };
        e.change_context(context)
    })?;

    if derived.dims.len() != derived.data.ndim() {
        return Err(StepError::Derivation(field.name.clone())).attach_printable_lazy(|| {
            format!(
                "derivation returned {} dimension names for a {}-D array",
                derived.dims.len(),
                derived.data.ndim()
            )
        });
    }

    let mut attributes = IndexMap::new();
    attributes.insert("units".to_string(), AttrValue::from(derived.units));
    attributes.insert("long_name".to_string(), AttrValue::from(derived.description));
    attributes.extend(derived.extra_attributes);
    let var = Variable::new(derived.dims, VarArray::F32(derived.data)).with_attributes(attributes);
    add_to_container(container, &field.name, var)
}
