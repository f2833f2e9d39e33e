//! Resolution of canonical field names into full dependency trees, and the
//! merge plan built from them.
use error_stack::{Report, ResultExt};
use indexmap::IndexMap;
use itertools::Itertools;
use tracing::debug;

use crate::{
    error::ConfigError,
    fields::{
        Derivation, DerivedField, DirectField, FieldDefinition, IndirectField, ResolvedField,
    },
    registry::FieldRegistry,
};

/// Resolves canonical field names against a [`FieldRegistry`].
///
/// Results are memoized, so resolving the same name twice returns an equal
/// [`ResolvedField`] without walking the registry again.
pub struct FieldResolver<'r> {
    registry: &'r FieldRegistry,
    cache: IndexMap<String, ResolvedField>,
}

impl<'r> FieldResolver<'r> {
    pub fn new(registry: &'r FieldRegistry) -> Self {
        Self {
            registry,
            cache: IndexMap::new(),
        }
    }

    /// Resolve `canonical_name` and, recursively, all of its dependencies.
    ///
    /// # Errors
    /// - [`ConfigError::UnmappedField`] if the field or any dependency is not in the registry,
    /// - [`ConfigError::CyclicDependency`] if the field depends on itself, directly or transitively,
    /// - [`ConfigError::InvalidDependency`] if a directly derived field depends on anything but
    ///   direct fields.
    pub fn resolve(&mut self, canonical_name: &str) -> error_stack::Result<ResolvedField, ConfigError> {
        let mut visiting = Vec::new();
        self.resolve_inner(canonical_name, &mut visiting)
    }

    /// Resolve each of `names`, in order.
    pub fn resolve_all<S: AsRef<str>>(
        &mut self,
        names: &[S],
    ) -> error_stack::Result<Vec<ResolvedField>, ConfigError> {
        names.iter().map(|n| self.resolve(n.as_ref())).collect()
    }

    fn resolve_inner(
        &mut self,
        name: &str,
        visiting: &mut Vec<String>,
    ) -> error_stack::Result<ResolvedField, ConfigError> {
        if let Some(field) = self.cache.get(name) {
            return Ok(field.clone());
        }

        if let Some(pos) = visiting.iter().position(|v| v == name) {
            let mut chain = visiting[pos..].to_vec();
            chain.push(name.to_string());
            return Err(Report::new(ConfigError::CyclicDependency(chain)));
        }

        let registry = self.registry;
        let spec = registry.lookup(name)?;
        let resolved = match &spec.definition {
            FieldDefinition::Direct(source) => {
                debug!("Field {name} comes directly from {source}");
                ResolvedField::Direct(DirectField {
                    name: name.to_string(),
                    source: source.clone(),
                })
            }
            FieldDefinition::Derived {
                dependencies,
                derivation,
            } => {
                visiting.push(name.to_string());
                let mut deps = Vec::with_capacity(dependencies.len());
                for dep in dependencies {
                    let resolved_dep = self
                        .resolve_inner(dep, visiting)
                        .attach_printable_lazy(|| format!("while resolving dependencies of {name}"))?;
                    deps.push(resolved_dep);
                }
                visiting.pop();

                debug!(
                    "Field {name} is derived from {}",
                    deps.iter().map(|d| d.name()).join(", ")
                );
                match derivation {
                    Derivation::InProcess(derive) => {
                        let direct_deps = deps
                            .into_iter()
                            .map(|d| match d {
                                ResolvedField::Direct(df) => Ok(df),
                                other => Err(Report::new(ConfigError::invalid_dependency(
                                    name,
                                    format!(
                                        "directly derived fields may only depend on direct fields, but {} is {}",
                                        other.name(),
                                        other.kind()
                                    ),
                                ))),
                            })
                            .collect::<Result<Vec<_>, _>>()?;
                        ResolvedField::DirectlyDerived(DerivedField {
                            name: name.to_string(),
                            dependencies: direct_deps,
                            derive: *derive,
                        })
                    }
                    Derivation::External(derive) => ResolvedField::IndirectlyDerived(IndirectField {
                        name: name.to_string(),
                        dependencies: deps,
                        derive: *derive,
                    }),
                }
            }
        };

        self.cache.insert(name.to_string(), resolved.clone());
        Ok(resolved)
    }
}

/// What to do with each requested field for one timestamp.
///
/// Direct fields are copied (or interpolated) into the output, directly derived
/// fields are computed in-process, and indirectly derived fields are deferred
/// until after the intermediate-format conversion. Dependencies of indirectly
/// derived fields are folded into the first two lists. Every list is free of
/// duplicates, so a field needed by several derived fields is merged once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePlan {
    direct: Vec<DirectField>,
    directly_derived: Vec<DerivedField>,
    indirectly_derived: Vec<IndirectField>,
    requested: Vec<ResolvedField>,
}

impl MergePlan {
    /// Build a plan from resolved fields, in request order.
    ///
    /// # Errors
    /// Returns [`ConfigError::AmbiguousField`] if two fields share a canonical name
    /// but not a source (or derivation).
    pub fn build(fields: &[ResolvedField]) -> error_stack::Result<Self, ConfigError> {
        let mut plan = Self::default();
        for field in fields {
            plan.add_field(field)?;
            plan.requested.push(field.clone());
        }
        Ok(plan)
    }

    fn add_field(&mut self, field: &ResolvedField) -> error_stack::Result<(), ConfigError> {
        match field {
            ResolvedField::Direct(f) => self.add_direct(f),
            ResolvedField::DirectlyDerived(f) => self.add_directly_derived(f),
            ResolvedField::IndirectlyDerived(f) => self.add_indirect(f),
        }
    }

    fn add_direct(&mut self, field: &DirectField) -> error_stack::Result<(), ConfigError> {
        if let Some(existing) = self.direct.iter().find(|f| f.name == field.name) {
            if existing.source != field.source {
                return Err(Report::new(ConfigError::AmbiguousField {
                    name: field.name.clone(),
                    first: existing.source.to_string(),
                    second: field.source.to_string(),
                }));
            }
            debug!("{} is already in the merge set", field.name);
            return Ok(());
        }
        self.direct.push(field.clone());
        Ok(())
    }

    fn add_directly_derived(&mut self, field: &DerivedField) -> error_stack::Result<(), ConfigError> {
        if let Some(existing) = self.directly_derived.iter().find(|f| f.name == field.name) {
            if existing != field {
                return Err(Report::new(ConfigError::AmbiguousField {
                    name: field.name.clone(),
                    first: "one derivation".to_string(),
                    second: "a different derivation".to_string(),
                }));
            }
            return Ok(());
        }
        self.directly_derived.push(field.clone());
        Ok(())
    }

    fn add_indirect(&mut self, field: &IndirectField) -> error_stack::Result<(), ConfigError> {
        // Dependencies first: an indirect field needing another indirect field must run after it.
        for dep in field.dependencies.iter() {
            self.add_field(dep)?;
        }

        if let Some(existing) = self.indirectly_derived.iter().find(|f| f.name == field.name) {
            if existing != field {
                return Err(Report::new(ConfigError::AmbiguousField {
                    name: field.name.clone(),
                    first: "one derivation".to_string(),
                    second: "a different derivation".to_string(),
                }));
            }
            return Ok(());
        }
        self.indirectly_derived.push(field.clone());
        Ok(())
    }

    pub fn direct_fields(&self) -> &[DirectField] {
        &self.direct
    }

    pub fn directly_derived_fields(&self) -> &[DerivedField] {
        &self.directly_derived
    }

    pub fn indirectly_derived_fields(&self) -> &[IndirectField] {
        &self.indirectly_derived
    }

    /// The field whose source file defines the horizontal grid and time of the output.
    pub fn reference_field(&self) -> Option<&DirectField> {
        self.direct.first()
    }

    /// Names of the fields to convert to the intermediate format, in request order.
    ///
    /// Fields named in `exclude` are left out. Indirectly derived fields are replaced
    /// by their dependencies, since the external derivation reads those back from
    /// the intermediate file.
    pub fn conversion_fields<S: AsRef<str>>(&self, exclude: &[S]) -> Vec<String> {
        fn expand(field: &ResolvedField, out: &mut Vec<String>) {
            match field {
                ResolvedField::Direct(f) => out.push(f.name.clone()),
                ResolvedField::DirectlyDerived(f) => out.push(f.name.clone()),
                ResolvedField::IndirectlyDerived(f) => {
                    for dep in f.dependencies.iter() {
                        expand(dep, out);
                    }
                }
            }
        }

        let mut names = Vec::new();
        for field in self.requested.iter() {
            if exclude.iter().any(|e| e.as_ref() == field.name()) {
                continue;
            }
            expand(field, &mut names);
        }
        names.into_iter().unique().collect()
    }
}
