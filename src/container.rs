//! In-memory representation of one merged output file.
//!
//! An [`OutputContainer`] is created fresh for each timestamp, filled in one pass
//! by the merge engine, then handed to a [`crate::io::ContainerWriter`] to persist.
//! It enforces the two structural rules of the output: every dimension has a
//! single length, and every variable is written exactly once.
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use ndarray::ArrayD;

/// A type that can hold a variety of arrays that might be stored in a source
/// or output file. Source readers produce this, and the writers dispatch on it.
#[derive(Debug, Clone, PartialEq, strum::Display)]
pub enum VarArray {
    #[strum(to_string = "i8")]
    I8(ArrayD<i8>),
    #[strum(to_string = "i16")]
    I16(ArrayD<i16>),
    #[strum(to_string = "i32")]
    I32(ArrayD<i32>),
    #[strum(to_string = "i64")]
    I64(ArrayD<i64>),
    #[strum(to_string = "f32")]
    F32(ArrayD<f32>),
    #[strum(to_string = "f64")]
    F64(ArrayD<f64>),
    #[strum(to_string = "char")]
    Char(ArrayD<u8>),
}

impl VarArray {
    pub fn shape(&self) -> &[usize] {
        match self {
            VarArray::I8(arr) => arr.shape(),
            VarArray::I16(arr) => arr.shape(),
            VarArray::I32(arr) => arr.shape(),
            VarArray::I64(arr) => arr.shape(),
            VarArray::F32(arr) => arr.shape(),
            VarArray::F64(arr) => arr.shape(),
            VarArray::Char(arr) => arr.shape(),
        }
    }

    /// Borrow the data if it is single precision, without any conversion.
    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        if let VarArray::F32(arr) = self {
            Some(arr)
        } else {
            None
        }
    }

    /// Return a single precision copy of the data, casting from whatever type it is stored as.
    /// Double precision values outside the `f32` range become infinite.
    pub fn to_f32(&self) -> ArrayD<f32> {
        match self {
            VarArray::I8(arr) => arr.mapv(|v| v as f32),
            VarArray::I16(arr) => arr.mapv(|v| v as f32),
            VarArray::I32(arr) => arr.mapv(|v| v as f32),
            VarArray::I64(arr) => arr.mapv(|v| v as f32),
            VarArray::F32(arr) => arr.clone(),
            VarArray::F64(arr) => arr.mapv(|v| v as f32),
            VarArray::Char(arr) => arr.mapv(|v| v as f32),
        }
    }
}

/// Attribute values we carry between files. Numeric values are always stored as
/// vectors; a scalar attribute is a vector of length one.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(String),
    Strs(Vec<String>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<f32> for AttrValue {
    fn from(value: f32) -> Self {
        Self::Float(vec![value])
    }
}

/// One named variable: its dimension names, data, and attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub dims: Vec<String>,
    pub data: VarArray,
    pub attributes: IndexMap<String, AttrValue>,
}

impl Variable {
    pub fn new(dims: Vec<String>, data: VarArray) -> Self {
        Self {
            dims,
            data,
            attributes: IndexMap::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: IndexMap<String, AttrValue>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Get a string attribute, returning `None` if it is missing or not a string.
    pub fn attribute_str(&self, name: &str) -> Option<&str> {
        match self.attributes.get(name) {
            Some(AttrValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn has_dim(&self, dim: &str) -> bool {
        self.dims.iter().any(|d| d == dim)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("Dimension '{dim}' already exists with length {existing}, cannot redefine it with length {new}")]
    DimensionConflict {
        dim: String,
        existing: usize,
        new: usize,
    },
    #[error("Variable '{varname}' uses dimension '{dim}', which has not been defined")]
    UnknownDimension { varname: String, dim: String },
    #[error("Variable '{varname}' has {ndims} dimension names but its data has {ndata} axes")]
    RankMismatch {
        varname: String,
        ndims: usize,
        ndata: usize,
    },
    #[error("Variable '{varname}' has length {actual} along '{dim}', but the dimension has length {expected}")]
    LengthMismatch {
        varname: String,
        dim: String,
        expected: usize,
        actual: usize,
    },
    #[error("Variable '{0}' was already added to the output")]
    DuplicateVariable(String),
}

/// The merged contents for a single timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputContainer {
    timestamp: NaiveDateTime,
    dimensions: IndexMap<String, usize>,
    variables: IndexMap<String, Variable>,
}

impl OutputContainer {
    pub fn new(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            dimensions: IndexMap::new(),
            variables: IndexMap::new(),
        }
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn dimensions(&self) -> &IndexMap<String, usize> {
        &self.dimensions
    }

    pub fn dimension_len(&self, name: &str) -> Option<usize> {
        self.dimensions.get(name).copied()
    }

    /// Define a dimension. Defining an existing dimension again with the same length
    /// is a no-op, defining it with a different length is an error.
    pub fn add_dimension(&mut self, name: &str, len: usize) -> Result<(), ContainerError> {
        match self.dimensions.get(name) {
            Some(&existing) if existing != len => Err(ContainerError::DimensionConflict {
                dim: name.to_string(),
                existing,
                new: len,
            }),
            Some(_) => Ok(()),
            None => {
                self.dimensions.insert(name.to_string(), len);
                Ok(())
            }
        }
    }

    /// Define any dimensions `var` uses that are not yet present, taking their lengths
    /// from the variable's data. Dimensions that already exist must match.
    pub fn add_needed_dims(&mut self, varname: &str, var: &Variable) -> Result<(), ContainerError> {
        let shape = var.data.shape();
        if shape.len() != var.dims.len() {
            return Err(ContainerError::RankMismatch {
                varname: varname.to_string(),
                ndims: var.dims.len(),
                ndata: shape.len(),
            });
        }

        for (dim, &len) in var.dims.iter().zip(shape) {
            self.add_dimension(dim, len)?;
        }
        Ok(())
    }

    /// Add a variable. All of its dimensions must already be defined with lengths
    /// matching its data, and no variable with the same name may exist.
    pub fn add_variable(&mut self, name: &str, var: Variable) -> Result<(), ContainerError> {
        if self.variables.contains_key(name) {
            return Err(ContainerError::DuplicateVariable(name.to_string()));
        }

        let shape = var.data.shape();
        if shape.len() != var.dims.len() {
            return Err(ContainerError::RankMismatch {
                varname: name.to_string(),
                ndims: var.dims.len(),
                ndata: shape.len(),
            });
        }

        for (dim, &actual) in var.dims.iter().zip(shape) {
            let expected =
                self.dimension_len(dim)
                    .ok_or_else(|| ContainerError::UnknownDimension {
                        varname: name.to_string(),
                        dim: dim.to_string(),
                    })?;
            if expected != actual {
                return Err(ContainerError::LengthMismatch {
                    varname: name.to_string(),
                    dim: dim.to_string(),
                    expected,
                    actual,
                });
            }
        }

        self.variables.insert(name.to_string(), var);
        Ok(())
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, &Variable)> {
        self.variables.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn contains_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    fn test_time() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2006-09-04 00:00", "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn test_add_variable_checks_dims() {
        let mut cont = OutputContainer::new(test_time());
        cont.add_dimension("lat", 2).unwrap();
        cont.add_dimension("lon", 3).unwrap();

        let good = Variable::new(
            vec!["lat".into(), "lon".into()],
            VarArray::F32(ArrayD::zeros(IxDyn(&[2, 3]))),
        );
        cont.add_variable("PMSL", good.clone()).unwrap();

        let err = cont.add_variable("PMSL", good).unwrap_err();
        assert!(matches!(err, ContainerError::DuplicateVariable(_)));

        let transposed = Variable::new(
            vec!["lat".into(), "lon".into()],
            VarArray::F32(ArrayD::zeros(IxDyn(&[3, 2]))),
        );
        let err = cont.add_variable("SKINTEMP", transposed).unwrap_err();
        assert!(matches!(err, ContainerError::LengthMismatch { .. }));

        let unknown = Variable::new(
            vec!["lev".into()],
            VarArray::F32(ArrayD::zeros(IxDyn(&[3]))),
        );
        let err = cont.add_variable("lev", unknown).unwrap_err();
        assert!(matches!(err, ContainerError::UnknownDimension { .. }));
    }

    #[test]
    fn test_dimension_redefinition() {
        let mut cont = OutputContainer::new(test_time());
        cont.add_dimension("lev", 72).unwrap();
        cont.add_dimension("lev", 72).unwrap();
        let err = cont.add_dimension("lev", 47).unwrap_err();
        assert!(matches!(
            err,
            ContainerError::DimensionConflict {
                existing: 72,
                new: 47,
                ..
            }
        ));
    }

    #[test]
    fn test_to_f32_casts() {
        let arr = VarArray::F64(ArrayD::from_elem(IxDyn(&[2]), 1.5));
        assert!(arr.as_f32().is_none());
        assert_eq!(arr.to_f32(), ArrayD::from_elem(IxDyn(&[2]), 1.5f32));
        assert_eq!(arr.to_string(), "f64");
    }
}
