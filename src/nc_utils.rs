//! netCDF implementations of the [`SourceReader`] and [`ContainerWriter`] seams.
use std::path::Path;

use error_stack::ResultExt;
use itertools::Itertools;
use ndarray::ArrayD;
use netcdf::{
    types::{FloatType, IntType, NcVariableType},
    AttributeValue, Extents,
};
use tracing::debug;

use crate::{
    container::{AttrValue, OutputContainer, VarArray, Variable},
    error::{ReadError, WriteError},
    io::{ContainerWriter, SourceReader},
};

/// Compression level used for every variable with more than one dimension
const COMPRESSION_LEVEL: i32 = 9;

/// Reads source variables from netCDF files, opening the file on every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetcdfReader;

impl SourceReader for NetcdfReader {
    fn read_variable(
        &self,
        path: &Path,
        varname: &str,
    ) -> error_stack::Result<Variable, ReadError> {
        if !path.exists() {
            return Err(ReadError::MissingFile(path.to_path_buf()).into());
        }

        let ds = netcdf::open(path)
            .change_context_lazy(|| ReadError::custom(format!("could not open {}", path.display())))?;
        let var = ds
            .variable(varname)
            .ok_or_else(|| ReadError::MissingVariable(path.to_path_buf(), varname.to_string()))?;

        let dims = var.dimensions().iter().map(|d| d.name()).collect_vec();
        let data = get_array(&var)?;
        let mut attributes = indexmap::IndexMap::new();
        for att in var.attributes() {
            let value = att.value().change_context_lazy(|| {
                ReadError::custom(format!(
                    "could not read attribute '{}' of variable '{varname}' in {}",
                    att.name(),
                    path.display()
                ))
            })?;
            if let Some(value) = convert_attribute(value) {
                attributes.insert(att.name().to_string(), value);
            } else {
                debug!("Skipping attribute '{}' on '{varname}', its type is not carried over", att.name());
            }
        }

        Ok(Variable::new(dims, data).with_attributes(attributes))
    }
}

/// Read the whole of `var` into the matching [`VarArray`] variant. Unsigned
/// integers are widened to the next larger signed type.
fn get_array(var: &netcdf::Variable) -> error_stack::Result<VarArray, ReadError> {
    let name = var.name();
    let read_err = || ReadError::custom(format!("could not read data for variable '{name}'"));
    let arr = match var.vartype() {
        NcVariableType::Int(IntType::I8) => VarArray::I8(var.get::<i8, _>(Extents::All).change_context_lazy(read_err)?),
        NcVariableType::Int(IntType::I16) => VarArray::I16(var.get::<i16, _>(Extents::All).change_context_lazy(read_err)?),
        NcVariableType::Int(IntType::I32) => VarArray::I32(var.get::<i32, _>(Extents::All).change_context_lazy(read_err)?),
        NcVariableType::Int(IntType::I64) => VarArray::I64(var.get::<i64, _>(Extents::All).change_context_lazy(read_err)?),
        NcVariableType::Int(IntType::U8) => {
            let values: ArrayD<u8> = var.get::<u8, _>(Extents::All).change_context_lazy(read_err)?;
            VarArray::I16(values.mapv(i16::from))
        }
        NcVariableType::Int(IntType::U16) => {
            let values: ArrayD<u16> = var.get::<u16, _>(Extents::All).change_context_lazy(read_err)?;
            VarArray::I32(values.mapv(i32::from))
        }
        NcVariableType::Int(IntType::U32) => {
            let values: ArrayD<u32> = var.get::<u32, _>(Extents::All).change_context_lazy(read_err)?;
            VarArray::I64(values.mapv(i64::from))
        }
        NcVariableType::Float(FloatType::F32) => VarArray::F32(var.get::<f32, _>(Extents::All).change_context_lazy(read_err)?),
        NcVariableType::Float(FloatType::F64) => VarArray::F64(var.get::<f64, _>(Extents::All).change_context_lazy(read_err)?),
        NcVariableType::Char => VarArray::Char(var.get::<u8, _>(Extents::All).change_context_lazy(read_err)?),
        other => {
            return Err(ReadError::UnsupportedType(name.clone(), format!("{other:?}")).into());
        }
    };
    Ok(arr)
}

fn convert_attribute(value: AttributeValue) -> Option<AttrValue> {
    let v = match value {
        AttributeValue::Str(s) => AttrValue::Str(s),
        AttributeValue::Strs(s) => AttrValue::Strs(s),
        AttributeValue::Schar(v) => AttrValue::Short(vec![v.into()]),
        AttributeValue::Schars(v) => AttrValue::Short(v.into_iter().map(i16::from).collect()),
        AttributeValue::Uchar(v) => AttrValue::Short(vec![v.into()]),
        AttributeValue::Uchars(v) => AttrValue::Short(v.into_iter().map(i16::from).collect()),
        AttributeValue::Short(v) => AttrValue::Short(vec![v]),
        AttributeValue::Shorts(v) => AttrValue::Short(v),
        AttributeValue::Ushort(v) => AttrValue::Int(vec![v.into()]),
        AttributeValue::Ushorts(v) => AttrValue::Int(v.into_iter().map(i32::from).collect()),
        AttributeValue::Int(v) => AttrValue::Int(vec![v]),
        AttributeValue::Ints(v) => AttrValue::Int(v),
        AttributeValue::Uint(v) => AttrValue::Long(vec![v.into()]),
        AttributeValue::Uints(v) => AttrValue::Long(v.into_iter().map(i64::from).collect()),
        AttributeValue::Longlong(v) => AttrValue::Long(vec![v]),
        AttributeValue::Longlongs(v) => AttrValue::Long(v),
        AttributeValue::Float(v) => AttrValue::Float(vec![v]),
        AttributeValue::Floats(v) => AttrValue::Float(v),
        AttributeValue::Double(v) => AttrValue::Double(vec![v]),
        AttributeValue::Doubles(v) => AttrValue::Double(v),
        _ => return None,
    };
    Some(v)
}

fn to_nc_attribute(value: &AttrValue) -> AttributeValue {
    match value {
        AttrValue::Str(s) => AttributeValue::Str(s.clone()),
        AttrValue::Strs(s) => AttributeValue::Strs(s.clone()),
        AttrValue::Short(v) if v.len() == 1 => AttributeValue::Short(v[0]),
        AttrValue::Short(v) => AttributeValue::Shorts(v.clone()),
        AttrValue::Int(v) if v.len() == 1 => AttributeValue::Int(v[0]),
        AttrValue::Int(v) => AttributeValue::Ints(v.clone()),
        AttrValue::Long(v) if v.len() == 1 => AttributeValue::Longlong(v[0]),
        AttrValue::Long(v) => AttributeValue::Longlongs(v.clone()),
        AttrValue::Float(v) if v.len() == 1 => AttributeValue::Float(v[0]),
        AttrValue::Float(v) => AttributeValue::Floats(v.clone()),
        AttrValue::Double(v) if v.len() == 1 => AttributeValue::Double(v[0]),
        AttrValue::Double(v) => AttributeValue::Doubles(v.clone()),
    }
}

/// Writes merged containers as netCDF4 files.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetcdfWriter;

impl NetcdfWriter {
    fn put_variable(
        file: &mut netcdf::FileMut,
        path: &Path,
        name: &str,
        var: &Variable,
    ) -> error_stack::Result<(), WriteError> {
        let dims = var.dims.iter().map(|d| d.as_str()).collect_vec();
        let put_err = || WriteError::put(path, format!("variable '{name}'"));

        macro_rules! put_typed {
            ($t:ty, $arr:expr) => {{
                let mut nc_var = file.add_variable::<$t>(name, &dims).change_context_lazy(put_err)?;
                if dims.len() > 1 {
                    nc_var
                        .set_compression(COMPRESSION_LEVEL, true)
                        .change_context_lazy(put_err)?;
                }
                for (att_name, att_value) in var.attributes.iter() {
                    nc_var
                        .put_attribute(att_name, to_nc_attribute(att_value))
                        .change_context_lazy(|| {
                            WriteError::put(path, format!("attribute '{att_name}' of '{name}'"))
                        })?;
                }
                nc_var.put($arr.view(), Extents::All).change_context_lazy(put_err)?;
            }};
        }

        match &var.data {
            VarArray::I8(arr) => put_typed!(i8, arr),
            VarArray::I16(arr) => put_typed!(i16, arr),
            VarArray::I32(arr) => put_typed!(i32, arr),
            VarArray::I64(arr) => put_typed!(i64, arr),
            VarArray::F32(arr) => put_typed!(f32, arr),
            VarArray::F64(arr) => put_typed!(f64, arr),
            VarArray::Char(arr) => put_typed!(u8, arr),
        }
        Ok(())
    }
}

impl ContainerWriter for NetcdfWriter {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn write_container(
        &self,
        container: &OutputContainer,
        path: &Path,
    ) -> error_stack::Result<(), WriteError> {
        let mut file =
            netcdf::create(path).change_context_lazy(|| WriteError::Create(path.to_path_buf()))?;

        for (dim, &len) in container.dimensions() {
            file.add_dimension(dim, len)
                .change_context_lazy(|| WriteError::put(path, format!("dimension '{dim}'")))?;
        }

        for (name, var) in container.variables() {
            Self::put_variable(&mut file, path, name, var)?;
        }
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> error_stack::Result<(), WriteError> {
        std::fs::rename(from, to).change_context_lazy(|| WriteError::Rename {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        })
    }

    fn remove(&self, path: &Path) -> error_stack::Result<(), WriteError> {
        std::fs::remove_file(path).change_context_lazy(|| WriteError::Remove(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_conversion() {
        assert_eq!(
            convert_attribute(AttributeValue::Float(1.0e15)),
            Some(AttrValue::Float(vec![1.0e15]))
        );
        assert_eq!(
            convert_attribute(AttributeValue::Ushort(7)),
            Some(AttrValue::Int(vec![7]))
        );
        assert!(matches!(
            to_nc_attribute(&AttrValue::Double(vec![1.0, 2.0])),
            AttributeValue::Doubles(_)
        ));
        assert!(matches!(
            to_nc_attribute(&AttrValue::Int(vec![3])),
            AttributeValue::Int(3)
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = NetcdfReader
            .read_variable(Path::new("/nonexistent/g5nr/file.nc4"), "T")
            .unwrap_err();
        assert!(matches!(err.current_context(), ReadError::MissingFile(_)));
    }
}
