//! Static mapping tables from canonical output field names to their sources.
//!
//! [`FieldRegistry::g5nr`] builds the standard tables for converting the GEOS-5
//! nature run (and optionally LIS soil output) to the fields the downstream
//! interpolation tool needs. Tests and other front ends can build their own
//! registries with [`FieldRegistry::add_direct`] and [`FieldRegistry::add_derived`].
use error_stack::Report;
use indexmap::IndexMap;

use crate::{
    derivations,
    error::ConfigError,
    fields::{Derivation, DirectSource, FieldDefinition, FieldSpec},
};

/// Prefix on every G5NR collection file name
pub const G5NR_FILE_PREFIX: &str = "c1440_NR.";

/// Canonical name of the mid-layer pressure field used as the vertical coordinate
pub const PRESSURE_SOURCE_FIELD: &str = "PL";

/// Name of the pressure variable written to each merged file
pub const PRESSURE_OUTPUT_FIELD: &str = "PRESSURE";

/// The GFS isobaric levels (hPa) that native model levels are interpolated to.
pub const GFS_LEVELS_HPA: [f32; 47] = [
    1., 2., 3., 5., 7., 10., 20., 30., 50., 70., 100., 125., 150., 175., 200., 225., 250., 275.,
    300., 325., 350., 375., 400., 425., 450., 475., 500., 525., 550., 575., 600., 625., 650.,
    675., 700., 725., 750., 775., 800., 825., 850., 875., 900., 925., 950., 975., 1000.,
];

/// The GFS isobaric levels in Pa, which is the unit of the native pressure field.
pub fn gfs_levels_pa() -> Vec<f32> {
    GFS_LEVELS_HPA.iter().map(|p| p * 100.0).collect()
}

/// (canonical name, G5NR variable, G5NR collection)
const G5NR_DIRECT_FIELDS: &[(&str, &str, &str)] = &[
    ("HGT", "H", "inst30mn_3d_H_Nv"),
    ("TT", "T", "inst30mn_3d_T_Nv"),
    ("UU", "U", "inst30mn_3d_U_Nv"),
    ("VV", "V", "inst30mn_3d_V_Nv"),
    ("PMSL", "SLP", "inst30mn_2d_met1_Nx"),
    ("PSFC", "PS", "inst30mn_3d_DELP_Nv"),
    ("QC", "QL", "inst30mn_3d_QL_Nv"),
    ("SPECHUMD", "QV", "inst30mn_3d_QV_Nv"),
    ("RH", "RH", "inst30mn_3d_RH_Nv"),
    ("SKINTEMP", "TS", "inst30mn_2d_met1_Nx"),
    ("SNOW", "SNOMAS", "tavg30mn_2d_met2_Nx"),
    ("SEAICE", "FRSEAICE", "tavg30mn_2d_met2_Nx"),
    ("DELP", "DELP", "inst30mn_3d_DELP_Nv"),
    ("PL", "PL", "inst30mn_3d_PL_Nv"),
    ("W", "W", "inst30mn_3d_W_Nv"),
    ("U10M", "U10M", "inst30mn_2d_met1_Nx"),
    ("V10M", "V10M", "inst30mn_2d_met1_Nx"),
    ("TQL", "TQL", "inst30mn_2d_met1_Nx"),
    ("PRECCON", "PRECCON", "tavg30mn_2d_met3_Nx"),
    ("PRECTOT", "PRECTOT", "tavg30mn_2d_met3_Nx"),
    ("PRECSNO", "PRECSNO", "inst30mn_2d_met1_Nx"),
    ("FRLAND", "FRLAND", "const_2d_asm_Nx"),
    ("FRLANDICE", "FRLANDICE", "const_2d_asm_Nx"),
    ("FROCEAN", "FROCEAN", "const_2d_asm_Nx"),
    ("FRLAKE", "FRLAKE", "const_2d_asm_Nx"),
    ("PHIS", "PHIS", "const_2d_asm_Nx"),
    ("SWLAND", "SWLAND", "tavg30mn_2d_met2_Nx"),
    ("TLML", "TLML", "inst30mn_2d_met1_Nx"),
    ("QLML", "QLML", "inst30mn_2d_met1_Nx"),
    ("HLML", "HLML", "inst30mn_2d_met1_Nx"),
    ("ULML", "ULML", "inst30mn_2d_met1_Nx"),
    ("VLML", "VLML", "inst30mn_2d_met1_Nx"),
    ("PS", "PS", "inst30mn_3d_DELP_Nv"),
    ("SWGDN", "SWGDN", "tavg30mn_2d_met3_Nx"),
    ("LWGAB", "LWGAB", "tavg30mn_2d_met3_Nx"),
    ("PARDR", "PARDR", "tavg30mn_2d_met3_Nx"),
    ("PARDF", "PARDF", "tavg30mn_2d_met3_Nx"),
];

/// (canonical prefix, LIS variable)
const LIS_DIRECT_FIELDS: &[(&str, &str)] = &[("SM", "SoilMoist_tavg"), ("ST", "SoilTemp_tavg")];

/// Met fields the downstream tool requires.
pub fn default_required_met() -> Vec<String> {
    [
        "HGT", "TT", "UU", "VV", "PMSL", "PSFC", "SPECHUMD", "RH", "SKINTEMP", "LANDSEA", "SNOW",
        "SOILHGT", "SEAICE",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Met fields that are merged for diagnostics but not converted to the intermediate format.
pub fn default_diagnostic_met() -> Vec<String> {
    ["U10M", "V10M", "PRECTOT", "PRECCON", "TQL"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Surface fields LIS needs as forcing.
pub fn default_lis_forcing() -> Vec<String> {
    [
        "SWLAND", "TLML", "QLML", "SWGDN", "LWGAB", "PS", "PRECTOT", "PRECSNO", "PRECCON", "HLML",
        "PARDR", "PARDF", "SPEEDLML",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// A lookup table from canonical field name to [`FieldSpec`].
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    fields: IndexMap<String, FieldSpec>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard G5NR and LIS tables.
    pub fn g5nr() -> Self {
        let mut reg = Self::new();
        for &(canonical, native, collection) in G5NR_DIRECT_FIELDS {
            reg.add_direct(canonical, DirectSource::g5nr(collection, native));
        }
        for &(canonical, native) in LIS_DIRECT_FIELDS {
            reg.add_direct(canonical, DirectSource::lis(native));
        }

        reg.insert_derived(
            "LANDSEA",
            &["FRLAND", "FRLANDICE"],
            Derivation::InProcess(derivations::create_landsea),
        );
        reg.insert_derived(
            "SOILHGT",
            &["PHIS"],
            Derivation::InProcess(derivations::create_soilhgt),
        );
        reg.insert_derived(
            "SPEEDLML",
            &["ULML", "VLML"],
            Derivation::InProcess(derivations::create_speedlml),
        );
        reg.insert_derived(
            "GHT",
            &["TT", "DELP", "SOILHGT", "SPECHUMD"],
            Derivation::External(derivations::create_ght),
        );
        reg
    }

    /// Add (or replace) a direct field.
    pub fn add_direct(&mut self, canonical_name: &str, source: DirectSource) {
        self.fields.insert(
            canonical_name.to_string(),
            FieldSpec {
                canonical_name: canonical_name.to_string(),
                definition: FieldDefinition::Direct(source),
            },
        );
    }

    /// Add (or replace) a derived field. A derived field must have at least one dependency.
    /// Whether the dependencies exist is checked when fields are resolved, so that entries
    /// may be added in any order.
    pub fn add_derived(
        &mut self,
        canonical_name: &str,
        dependencies: &[&str],
        derivation: Derivation,
    ) -> Result<(), ConfigError> {
        if dependencies.is_empty() {
            return Err(ConfigError::invalid_dependency(
                canonical_name,
                "a derived field must have at least one dependency",
            ));
        }
        self.insert_derived(canonical_name, dependencies, derivation);
        Ok(())
    }

    fn insert_derived(&mut self, canonical_name: &str, dependencies: &[&str], derivation: Derivation) {
        self.fields.insert(
            canonical_name.to_string(),
            FieldSpec {
                canonical_name: canonical_name.to_string(),
                definition: FieldDefinition::Derived {
                    dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
                    derivation,
                },
            },
        );
    }

    /// Look up a field by canonical name. An unknown name is a configuration error.
    pub fn lookup(&self, canonical_name: &str) -> error_stack::Result<&FieldSpec, ConfigError> {
        self.fields
            .get(canonical_name)
            .ok_or_else(|| Report::new(ConfigError::UnmappedField(canonical_name.to_string())))
    }

    pub fn contains(&self, canonical_name: &str) -> bool {
        self.fields.contains_key(canonical_name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{FieldKind, SourceGroup};

    #[test]
    fn test_g5nr_registry_contents() {
        let reg = FieldRegistry::g5nr();

        let tt = reg.lookup("TT").unwrap();
        assert_eq!(
            tt.definition,
            FieldDefinition::Direct(DirectSource::g5nr("inst30mn_3d_T_Nv", "T"))
        );

        let landsea = reg.lookup("LANDSEA").unwrap();
        assert_eq!(landsea.kind(), FieldKind::DirectlyDerived);
        assert_eq!(landsea.dependencies(), ["FRLAND", "FRLANDICE"]);

        let ght = reg.lookup("GHT").unwrap();
        assert_eq!(ght.kind(), FieldKind::IndirectlyDerived);

        let sm = reg.lookup("SM").unwrap();
        match &sm.definition {
            FieldDefinition::Direct(src) => assert_eq!(src.group, SourceGroup::Lis),
            _ => assert!(false, "SM should be a direct field"),
        }
    }

    #[test]
    fn test_every_dependency_is_registered() {
        let reg = FieldRegistry::g5nr();
        for name in reg.names() {
            for dep in reg.lookup(name).unwrap().dependencies() {
                assert!(reg.contains(dep), "{name} depends on unregistered field {dep}");
            }
        }
    }

    #[test]
    fn test_default_lists_are_registered() {
        let reg = FieldRegistry::g5nr();
        for name in default_required_met()
            .iter()
            .chain(default_diagnostic_met().iter())
            .chain(default_lis_forcing().iter())
        {
            assert!(reg.contains(name), "{name} is not in the registry");
        }
    }

    #[test]
    fn test_unmapped_field() {
        let reg = FieldRegistry::g5nr();
        let err = reg.lookup("NOT_A_FIELD").unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::UnmappedField(n) if n == "NOT_A_FIELD"));
    }

    #[test]
    fn test_derived_needs_dependencies() {
        let mut reg = FieldRegistry::new();
        let err = reg
            .add_derived("EMPTY", &[], Derivation::InProcess(derivations::create_soilhgt))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDependency { .. }));
    }

    #[test]
    fn test_gfs_levels() {
        let levels = gfs_levels_pa();
        assert_eq!(levels.len(), 47);
        assert_eq!(levels[0], 100.0);
        assert_eq!(levels[46], 100000.0);
        assert!(levels.windows(2).all(|w| w[0] < w[1]));
    }
}
