//! Run configuration.
//!
//! Settings are read from a TOML file and can be overridden by environment
//! variables prefixed with `G5NR_PREP_`; nested keys are separated by a double
//! underscore, e.g. `G5NR_PREP_WORKERS__NUM_WORKERS=8`. A minimal file:
//!
//! ```toml
//! experiment_id = "ernesto"
//!
//! [time]
//! start_date = "09-04-2006 00:00"
//! duration_hours = 24
//! frequency_hours = 3
//!
//! [paths]
//! output_directory = "/scratch/nps"
//! src_met_directory = "/data/g5nr"
//! ```
//!
//! Everything else has a default: the standard field lists, interpolation to the
//! GFS isobaric levels with extrapolation, and a single worker.
use std::path::{Path, PathBuf};

use chrono::{
    format::{Item, StrftimeItems},
    NaiveDateTime,
};
use error_stack::{Report, ResultExt};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer};

use crate::{
    distribute::TimeWindow,
    error::ConfigError,
    registry::{default_diagnostic_met, default_lis_forcing, default_required_met},
};

pub const ENV_PREFIX: &str = "G5NR_PREP_";

/// Formats accepted for `start_date`, tried in order
const START_DATE_FORMATS: &[&str] = &[
    "%m-%d-%Y %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Name of the experiment, used for the output subdirectory and the log files
    pub experiment_id: String,
    pub time: TimeSettings,
    pub paths: PathSettings,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub fields: FieldSettings,
    #[serde(default)]
    pub workers: WorkerSettings,
    #[serde(default)]
    pub lis_forcing: LisForcingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeSettings {
    #[serde(deserialize_with = "deserialize_start_date")]
    pub start_date: NaiveDateTime,
    pub duration_hours: f64,
    pub frequency_hours: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathSettings {
    pub output_directory: PathBuf,
    /// Root of the G5NR collections
    pub src_met_directory: PathBuf,
    /// Root of the LIS history output; only needed if land fields are requested
    #[serde(default)]
    pub src_lsm_directory: Option<PathBuf>,
    /// Directory containing the geos2wrf utilities; only needed for indirectly derived fields
    #[serde(default)]
    pub geos2wrf_utils: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSettings {
    /// strftime-style pattern for the merged file names
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,
    /// Interpolate 3-D fields to the GFS isobaric levels
    #[serde(default = "default_true")]
    pub make_isobaric: bool,
    #[serde(default = "default_true")]
    pub extrapolate: bool,
    #[serde(default)]
    pub separate_intermediate_files: bool,
    #[serde(default = "default_soil_layers")]
    pub soil_layer_depths_cm: Vec<u32>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            file_pattern: default_file_pattern(),
            make_isobaric: true,
            extrapolate: true,
            separate_intermediate_files: false,
            soil_layer_depths_cm: default_soil_layers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSettings {
    #[serde(default = "default_required_met")]
    pub required_met: Vec<String>,
    /// Merged into the output file but not converted to the intermediate format
    #[serde(default = "default_diagnostic_met")]
    pub diagnostic_met: Vec<String>,
    /// LIS soil fields
    #[serde(default)]
    pub land: Vec<String>,
}

impl Default for FieldSettings {
    fn default() -> Self {
        Self {
            required_met: default_required_met(),
            diagnostic_met: default_diagnostic_met(),
            land: vec![],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerSettings {
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
        }
    }
}

/// Settings for the LIS forcing combiner
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LisForcingSettings {
    #[serde(default = "default_lis_forcing")]
    pub fields: Vec<String>,
    #[serde(default = "default_lis_file_pattern")]
    pub file_pattern: String,
    /// Defaults to `<output_directory>/<experiment_id>/lis_forcing`
    #[serde(default)]
    pub output_directory: Option<PathBuf>,
}

impl Default for LisForcingSettings {
    fn default() -> Self {
        Self {
            fields: default_lis_forcing(),
            file_pattern: default_lis_file_pattern(),
            output_directory: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_num_workers() -> usize {
    1
}

fn default_file_pattern() -> String {
    "c1440_NR.nps_input.%Y%m%d_%H%Mz.nc4".to_string()
}

fn default_lis_file_pattern() -> String {
    "c1440_NR.combined.%Y%m%d_%H%Mz.nc4".to_string()
}

fn default_soil_layers() -> Vec<u32> {
    vec![0, 10, 40, 100, 200]
}

fn deserialize_start_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse_start_date(&s).map_err(serde::de::Error::custom)
}

/// Parse a start date given as `MM-DD-YYYY hh:mm` or an ISO 8601 date and time.
pub fn parse_start_date(s: &str) -> Result<NaiveDateTime, String> {
    let s = s.trim();
    START_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .ok_or_else(|| {
            format!("could not parse start date '{s}', expected 'MM-DD-YYYY hh:mm' or ISO 8601")
        })
}

/// Check that `pattern` is a usable strftime pattern.
pub fn validate_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() || StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(ConfigError::InvalidPattern(pattern.to_string()));
    }
    Ok(())
}

impl Settings {
    /// Load settings from the TOML file at `path`, applying any `G5NR_PREP_` environment overrides.
    pub fn load(path: &Path) -> error_stack::Result<Self, ConfigError> {
        if !path.exists() {
            return Err(Report::new(ConfigError::Settings(format!(
                "configuration file {} does not exist",
                path.display()
            ))));
        }
        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
            .attach_printable_lazy(|| format!("while loading {}", path.display()))
    }

    /// Parse settings directly from a TOML string, without environment overrides.
    pub fn from_toml_str(s: &str) -> error_stack::Result<Self, ConfigError> {
        let settings: Self =
            toml::from_str(s).map_err(|e| ConfigError::Settings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn from_figment(figment: Figment) -> error_stack::Result<Self, ConfigError> {
        let settings: Self = figment
            .extract()
            .map_err(|e| ConfigError::Settings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> error_stack::Result<(), ConfigError> {
        if self.experiment_id.trim().is_empty() {
            return Err(ConfigError::Settings("experiment_id must not be empty".to_string()).into());
        }
        if self.workers.num_workers == 0 {
            return Err(ConfigError::Settings("num_workers must be at least 1".to_string()).into());
        }
        if !self.fields.land.is_empty() && self.paths.src_lsm_directory.is_none() {
            return Err(ConfigError::Settings(
                "land fields were requested but paths.src_lsm_directory is not set".to_string(),
            )
            .into());
        }
        validate_pattern(&self.output.file_pattern)?;
        validate_pattern(&self.lis_forcing.file_pattern)?;
        self.time_window()?;
        Ok(())
    }

    pub fn time_window(&self) -> Result<TimeWindow, ConfigError> {
        TimeWindow::from_hours(
            self.time.start_date,
            self.time.duration_hours,
            self.time.frequency_hours,
        )
    }

    pub fn experiment_dir(&self) -> PathBuf {
        self.paths.output_directory.join(&self.experiment_id)
    }

    /// Where merged files go
    pub fn combined_nc_dir(&self) -> PathBuf {
        self.experiment_dir().join("combined_nc")
    }

    /// Where intermediate-format files go
    pub fn nps_int_dir(&self) -> PathBuf {
        self.experiment_dir().join("nps_int")
    }

    pub fn lis_forcing_dir(&self) -> PathBuf {
        self.lis_forcing
            .output_directory
            .clone()
            .unwrap_or_else(|| self.experiment_dir().join("lis_forcing"))
    }

    /// The LIS history root, which falls back to the G5NR root if not set.
    pub fn lsm_directory(&self) -> &Path {
        self.paths
            .src_lsm_directory
            .as_deref()
            .unwrap_or(&self.paths.src_met_directory)
    }
}
