//! Field descriptors, both as declared in the registry and after resolution.
//!
//! A field is identified by its canonical name, i.e. the name the downstream
//! interpolation tool expects (e.g. "TT" for temperature). The registry declares
//! each field as a [`FieldSpec`]; the resolver turns it into a [`ResolvedField`]
//! whose dependencies are themselves resolved.
use std::{
    fmt::{Debug, Display},
    path::{Path, PathBuf},
};

use chrono::NaiveDateTime;
use error_stack::ResultExt;
use indexmap::IndexMap;
use ndarray::ArrayD;

use crate::{
    container::{AttrValue, Variable},
    error::DerivationError,
    io::SourceReader,
};

/// The family of source files a field comes from. Each group has its own
/// directory layout and its own intermediate-format output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum SourceGroup {
    /// The GEOS-5 nature run collections
    #[strum(to_string = "G5NR")]
    G5nr,
    /// Land surface model history files
    #[strum(to_string = "LIS")]
    Lis,
}

/// Where a direct field's values live: which group, which collection (dataset)
/// within that group, and the variable name inside the file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirectSource {
    pub group: SourceGroup,
    pub dataset: String,
    pub native_name: String,
}

impl DirectSource {
    pub fn g5nr<D: ToString, N: ToString>(dataset: D, native_name: N) -> Self {
        Self {
            group: SourceGroup::G5nr,
            dataset: dataset.to_string(),
            native_name: native_name.to_string(),
        }
    }

    pub fn lis<N: ToString>(native_name: N) -> Self {
        Self {
            group: SourceGroup::Lis,
            dataset: "LIS_HIST".to_string(),
            native_name: native_name.to_string(),
        }
    }
}

impl Display for DirectSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}/{}", self.group, self.dataset, self.native_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum FieldKind {
    Direct,
    DirectlyDerived,
    IndirectlyDerived,
}

/// Units and description for a field, as reported by an indirect derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMetadata {
    pub units: String,
    pub description: String,
}

/// The output of an in-process derivation. The data must already be on the
/// output grid; the merge engine writes it as-is.
#[derive(Debug, Clone)]
pub struct DerivedVariable {
    pub dims: Vec<String>,
    pub data: ArrayD<f32>,
    pub units: String,
    pub description: String,
    /// Additional attributes to attach to the output variable besides units and long name.
    pub extra_attributes: IndexMap<String, AttrValue>,
}

/// What an in-process derivation gets to work with: the file path of each of its
/// dependencies for the current timestamp, and a reader to open them with.
pub struct DerivationInputs<'a> {
    pub timestamp: NaiveDateTime,
    pub sources: IndexMap<String, (DirectSource, PathBuf)>,
    pub reader: &'a dyn SourceReader,
}

impl<'a> DerivationInputs<'a> {
    pub fn path(&self, field: &str) -> error_stack::Result<&Path, DerivationError> {
        self.sources
            .get(field)
            .map(|(_, p)| p.as_path())
            .ok_or_else(|| DerivationError::MissingInput(field.to_string()).into())
    }

    /// Read the source variable backing the dependency `field`.
    pub fn read(&self, field: &str) -> error_stack::Result<Variable, DerivationError> {
        let (source, path) = self
            .sources
            .get(field)
            .ok_or_else(|| DerivationError::MissingInput(field.to_string()))?;
        self.reader
            .read_variable(path, &source.native_name)
            .change_context_lazy(|| DerivationError::Read(field.to_string()))
    }
}

/// The keyword arguments an external (indirect) derivation receives. A fresh
/// record is built for every timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndirectArgs {
    pub in_prefix: String,
    pub out_dir: PathBuf,
    pub in_dir: PathBuf,
    pub timestamp: NaiveDateTime,
    pub utils_dir: Option<PathBuf>,
    pub cat_output: bool,
}

pub type InProcessFn =
    fn(&DerivationInputs<'_>) -> error_stack::Result<DerivedVariable, DerivationError>;
pub type ExternalFn = fn(&IndirectArgs) -> error_stack::Result<Option<FieldMetadata>, DerivationError>;

/// How a derived field is computed. An in-process derivation only needs source
/// files and makes the field directly derived; an external one needs other fields
/// already converted to the intermediate format and makes it indirectly derived.
#[derive(Clone, Copy)]
pub enum Derivation {
    InProcess(InProcessFn),
    External(ExternalFn),
}

impl Derivation {
    fn address(&self) -> usize {
        match self {
            Derivation::InProcess(f) => *f as usize,
            Derivation::External(f) => *f as usize,
        }
    }
}

impl Debug for Derivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Derivation::InProcess(_) => write!(f, "InProcess({:#x})", self.address()),
            Derivation::External(_) => write!(f, "External({:#x})", self.address()),
        }
    }
}

impl PartialEq for Derivation {
    fn eq(&self, other: &Self) -> bool {
        let same_variant = matches!(
            (self, other),
            (Derivation::InProcess(_), Derivation::InProcess(_))
                | (Derivation::External(_), Derivation::External(_))
        );
        same_variant && self.address() == other.address()
    }
}

/// How a field is declared in the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldDefinition {
    Direct(DirectSource),
    Derived {
        dependencies: Vec<String>,
        derivation: Derivation,
    },
}

/// A registry entry: a canonical name plus its definition.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub canonical_name: String,
    pub definition: FieldDefinition,
}

impl FieldSpec {
    pub fn kind(&self) -> FieldKind {
        match &self.definition {
            FieldDefinition::Direct(_) => FieldKind::Direct,
            FieldDefinition::Derived {
                derivation: Derivation::InProcess(_),
                ..
            } => FieldKind::DirectlyDerived,
            FieldDefinition::Derived {
                derivation: Derivation::External(_),
                ..
            } => FieldKind::IndirectlyDerived,
        }
    }

    pub fn dependencies(&self) -> &[String] {
        match &self.definition {
            FieldDefinition::Direct(_) => &[],
            FieldDefinition::Derived { dependencies, .. } => dependencies,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectField {
    pub name: String,
    pub source: DirectSource,
}

#[derive(Debug, Clone)]
pub struct DerivedField {
    pub name: String,
    /// Directly derived fields read their inputs from source files, so they may
    /// only depend on direct fields.
    pub dependencies: Vec<DirectField>,
    pub derive: InProcessFn,
}

#[derive(Debug, Clone)]
pub struct IndirectField {
    pub name: String,
    pub dependencies: Vec<ResolvedField>,
    pub derive: ExternalFn,
}

impl PartialEq for DerivedField {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.dependencies == other.dependencies
            && Derivation::InProcess(self.derive) == Derivation::InProcess(other.derive)
    }
}

impl PartialEq for IndirectField {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.dependencies == other.dependencies
            && Derivation::External(self.derive) == Derivation::External(other.derive)
    }
}

/// A field with its whole dependency tree resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedField {
    Direct(DirectField),
    DirectlyDerived(DerivedField),
    IndirectlyDerived(IndirectField),
}

impl ResolvedField {
    pub fn name(&self) -> &str {
        match self {
            ResolvedField::Direct(f) => &f.name,
            ResolvedField::DirectlyDerived(f) => &f.name,
            ResolvedField::IndirectlyDerived(f) => &f.name,
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            ResolvedField::Direct(_) => FieldKind::Direct,
            ResolvedField::DirectlyDerived(_) => FieldKind::DirectlyDerived,
            ResolvedField::IndirectlyDerived(_) => FieldKind::IndirectlyDerived,
        }
    }

    /// Names of the immediate dependencies (empty for direct fields).
    pub fn dependency_names(&self) -> Vec<&str> {
        match self {
            ResolvedField::Direct(_) => vec![],
            ResolvedField::DirectlyDerived(f) => {
                f.dependencies.iter().map(|d| d.name.as_str()).collect()
            }
            ResolvedField::IndirectlyDerived(f) => {
                f.dependencies.iter().map(|d| d.name()).collect()
            }
        }
    }
}
