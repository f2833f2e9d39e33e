//! Running the merge (and, for the main generator, the intermediate conversion)
//! over a range of timestamps.
//!
//! A [`RunConfig`] is built once per run from the settings and the registry, and
//! holds everything that does not change between timestamps. A [`Pipeline`] pairs
//! it with the source locator and the I/O implementations. Each timestamp is an
//! independent unit of work: it is either skipped (its output already exists),
//! written, or failed, and a failure never affects other timestamps.
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use error_stack::{Report, ResultExt};
use indicatif::{MultiProgress, ProgressBar};
use itertools::Itertools;
use rayon::prelude::*;
use tracing::{debug, error, info, info_span, warn};

use crate::{
    config::{validate_pattern, Settings},
    container::{OutputContainer, Variable},
    distribute::partition,
    error::{ConfigError, ReadError, StepError},
    fields::{DirectField, IndirectArgs, ResolvedField, SourceGroup},
    intermediate::{convert_container, remove_stale_files, ConversionOptions, DEFAULT_MAP_SOURCE},
    io::{temporary_path, ContainerWriter, SourceReader},
    locator::SourceLocator,
    merge::{merge_timestep, MergeContext, VerticalOptions, LAT_VAR, LON_VAR},
    progress::add_worker_pb,
    registry::{gfs_levels_pa, FieldRegistry, PRESSURE_OUTPUT_FIELD, PRESSURE_SOURCE_FIELD},
    resolver::{FieldResolver, MergePlan},
};

/// Prefix of the intermediate files holding G5NR fields
pub const G5NR_INT_PREFIX: &str = "G5NR";
/// Prefix of the intermediate files holding LIS fields
pub const LIS_INT_PREFIX: &str = "LIS";

/// What to do after a timestamp is merged, for the main generator.
#[derive(Debug, Clone)]
pub struct ConversionConfig {
    pub options: ConversionOptions,
    /// Met fields to write to the G5NR intermediate file
    pub met_fields: Vec<String>,
    /// LIS fields to write to the LIS intermediate file
    pub land_fields: Vec<DirectField>,
    pub utils_dir: Option<PathBuf>,
}

/// Everything about a run that is the same for every timestamp.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub plan: MergePlan,
    pub vertical: Option<VerticalOptions>,
    pub output_dir: PathBuf,
    pub file_pattern: String,
    pub conversion: Option<ConversionConfig>,
}

impl RunConfig {
    /// Path of the merged file for `timestamp`.
    pub fn output_path(&self, timestamp: NaiveDateTime) -> PathBuf {
        self.output_dir
            .join(timestamp.format(&self.file_pattern).to_string())
    }
}

/// Resolve `names` and build the merge plan for them.
///
/// # Errors
/// Any resolution error, an ambiguous field, or a plan with no direct field to
/// take the grid from.
pub fn build_plan<S: AsRef<str>>(
    registry: &FieldRegistry,
    names: &[S],
) -> error_stack::Result<MergePlan, ConfigError> {
    let mut resolver = FieldResolver::new(registry);
    let fields = resolver.resolve_all(names)?;
    let plan = MergePlan::build(&fields)?;
    if plan.reference_field().is_none() {
        return Err(Report::new(ConfigError::NoReferenceField));
    }
    Ok(plan)
}

fn resolve_direct(
    resolver: &mut FieldResolver<'_>,
    name: &str,
) -> error_stack::Result<DirectField, ConfigError> {
    match resolver.resolve(name)? {
        ResolvedField::Direct(f) => Ok(f),
        other => Err(Report::new(ConfigError::invalid_dependency(
            name,
            format!("must be a direct field, but is {}", other.kind()),
        ))),
    }
}

/// The run configuration for the main generator: required and diagnostic met
/// fields merged, then converted to the intermediate format with the indirectly
/// derived fields computed afterwards.
pub fn g5nr_run_config(
    settings: &Settings,
    registry: &FieldRegistry,
) -> error_stack::Result<RunConfig, ConfigError> {
    let all_met = settings
        .fields
        .required_met
        .iter()
        .chain(settings.fields.diagnostic_met.iter())
        .unique()
        .cloned()
        .collect_vec();
    let plan = build_plan(registry, &all_met)?;

    let mut resolver = FieldResolver::new(registry);
    let pressure = resolve_direct(&mut resolver, PRESSURE_SOURCE_FIELD)?;
    let (vertical, isobaric_levels) = if settings.output.make_isobaric {
        let levels = gfs_levels_pa();
        (
            VerticalOptions::isobaric(pressure, levels.clone(), settings.output.extrapolate),
            Some(levels),
        )
    } else {
        (VerticalOptions::native(pressure), None)
    };

    let mut met_fields = plan.conversion_fields(&settings.fields.diagnostic_met);
    met_fields.push(PRESSURE_OUTPUT_FIELD.to_string());

    let land_fields = settings
        .fields
        .land
        .iter()
        .map(|name| {
            let field = resolve_direct(&mut resolver, name)?;
            if field.source.group != SourceGroup::Lis {
                return Err(Report::new(ConfigError::invalid_dependency(
                    name,
                    format!("land fields must come from LIS output, not {}", field.source),
                )));
            }
            Ok(field)
        })
        .collect::<error_stack::Result<Vec<_>, ConfigError>>()?;

    let conversion = ConversionConfig {
        options: ConversionOptions {
            out_dir: settings.nps_int_dir(),
            separate_files: settings.output.separate_intermediate_files,
            soil_layer_depths_cm: settings.output.soil_layer_depths_cm.clone(),
            isobaric_levels,
            map_source: DEFAULT_MAP_SOURCE.to_string(),
        },
        met_fields,
        land_fields,
        utils_dir: settings.paths.geos2wrf_utils.clone(),
    };

    Ok(RunConfig {
        plan,
        vertical: Some(vertical),
        output_dir: settings.combined_nc_dir(),
        file_pattern: settings.output.file_pattern.clone(),
        conversion: Some(conversion),
    })
}

/// The run configuration for the LIS forcing combiner: surface fields only, no
/// vertical axis and no conversion.
pub fn lis_forcing_run_config(
    settings: &Settings,
    registry: &FieldRegistry,
) -> error_stack::Result<RunConfig, ConfigError> {
    let plan = build_plan(registry, &settings.lis_forcing.fields)?;
    if !plan.indirectly_derived_fields().is_empty() {
        let names = plan
            .indirectly_derived_fields()
            .iter()
            .map(|f| f.name.as_str())
            .join(", ");
        return Err(Report::new(ConfigError::Settings(format!(
            "the LIS forcing combiner cannot produce indirectly derived fields ({names})"
        ))));
    }
    Ok(RunConfig {
        plan,
        vertical: None,
        output_dir: settings.lis_forcing_dir(),
        file_pattern: settings.lis_forcing.file_pattern.clone(),
        conversion: None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum StepOutcome {
    Written,
    /// The output already existed
    Skipped,
}

/// What happened to each timestamp a worker (or set of workers) handled.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub written: Vec<NaiveDateTime>,
    pub skipped: Vec<NaiveDateTime>,
    pub failed: Vec<(NaiveDateTime, String)>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn num_processed(&self) -> usize {
        self.written.len() + self.skipped.len() + self.failed.len()
    }

    pub fn extend(&mut self, other: RunSummary) {
        self.written.extend(other.written);
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
    }
}

pub struct Pipeline<'a> {
    config: &'a RunConfig,
    locator: &'a SourceLocator,
    reader: &'a dyn SourceReader,
    writer: &'a dyn ContainerWriter,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a RunConfig,
        locator: &'a SourceLocator,
        reader: &'a dyn SourceReader,
        writer: &'a dyn ContainerWriter,
    ) -> Result<Self, ConfigError> {
        validate_pattern(&config.file_pattern)?;
        Ok(Self {
            config,
            locator,
            reader,
            writer,
        })
    }

    /// Merge, convert, and commit one timestamp.
    ///
    /// If the final output exists the timestamp is skipped without any writes. Otherwise
    /// the merged file is written to a temporary path and only renamed to its final path
    /// once the conversion and indirect derivations (if any) have succeeded. On failure
    /// the temporary file is removed.
    pub fn process_timestep(&self, timestamp: NaiveDateTime) -> error_stack::Result<StepOutcome, StepError> {
        let final_path = self.config.output_path(timestamp);
        if self.writer.exists(&final_path) {
            info!("{} exists, skipping", final_path.display());
            return Ok(StepOutcome::Skipped);
        }

        let ctx = MergeContext {
            locator: self.locator,
            reader: self.reader,
            vertical: self.config.vertical.as_ref(),
        };
        let container = merge_timestep(&ctx, &self.config.plan, timestamp)?;

        let tmp_path = temporary_path(&final_path);
        debug!("Writing {}", tmp_path.display());
        if let Err(e) = self.writer.write_container(&container, &tmp_path) {
            self.writer.discard(&tmp_path);
            return Err(e.change_context(StepError::Write(tmp_path)));
        }

        if let Some(conv) = &self.config.conversion {
            if let Err(e) = self.convert(&container, conv) {
                self.writer.discard(&tmp_path);
                return Err(e);
            }
        }

        debug!("Renaming '{}' => '{}'", tmp_path.display(), final_path.display());
        self.writer
            .rename(&tmp_path, &final_path)
            .change_context_lazy(|| StepError::Write(final_path.clone()))?;
        info!("Wrote {}", final_path.display());
        Ok(StepOutcome::Written)
    }

    fn convert(&self, container: &OutputContainer, conv: &ConversionConfig) -> error_stack::Result<(), StepError> {
        let timestamp = container.timestamp();
        let out_dir = &conv.options.out_dir;
        for prefix in [G5NR_INT_PREFIX, LIS_INT_PREFIX] {
            remove_stale_files(out_dir, prefix, timestamp)
                .change_context_lazy(|| StepError::Conversion(timestamp))?;
        }

        convert_container(container, &conv.met_fields, G5NR_INT_PREFIX, &conv.options)?;

        if !conv.land_fields.is_empty() {
            let land = self.read_land_fields(&conv.land_fields, timestamp)?;
            let names = conv.land_fields.iter().map(|f| f.name.as_str()).collect_vec();
            convert_container(&land, &names, LIS_INT_PREFIX, &conv.options)?;
        }

        for field in self.config.plan.indirectly_derived_fields() {
            // A fresh argument record for every field and timestamp
            let args = IndirectArgs {
                in_prefix: G5NR_INT_PREFIX.to_string(),
                out_dir: out_dir.clone(),
                in_dir: out_dir.clone(),
                timestamp,
                utils_dir: conv.utils_dir.clone(),
                cat_output: true,
            };
            info!("Computing {} from the intermediate file", field.name);
            let metadata = (field.derive)(&args)
                .change_context_lazy(|| StepError::Derivation(field.name.clone()))?;
            if let Some(m) = metadata {
                debug!("{} has units '{}' ({})", field.name, m.units, m.description);
            }
        }
        Ok(())
    }

    /// Read the LIS fields for `timestamp` into a container of their own; they are on
    /// the LIS grid, not the G5NR one.
    fn read_land_fields(
        &self,
        fields: &[DirectField],
        timestamp: NaiveDateTime,
    ) -> error_stack::Result<OutputContainer, StepError> {
        let mut container = OutputContainer::new(timestamp);
        let read = |path: &Path, varname: &str| {
            self.reader.read_variable(path, varname).map_err(|e| {
                let context = match e.current_context() {
                    ReadError::MissingFile(_) => StepError::MissingSourceFile(path.to_path_buf()),
                    _ => StepError::read_error(path, varname),
                };
                e.change_context(context)
            })
        };

        let add = |container: &mut OutputContainer, name: &str, var: Variable| {
            container
                .add_needed_dims(name, &var)
                .and_then(|_| container.add_variable(name, var))
                .map_err(|e| Report::new(e).change_context(StepError::context(format!("could not add LIS field {name}"))))
        };

        let first = fields
            .first()
            .ok_or_else(|| StepError::context("no land fields to read"))?;
        let first_path = self.locator.locate(first, timestamp);
        for coord in [LAT_VAR, LON_VAR] {
            let var = read(&first_path, coord)?;
            add(&mut container, coord, var)?;
        }
        for field in fields {
            let path = self.locator.locate(field, timestamp);
            let var = read(&path, &field.source.native_name)?;
            add(&mut container, &field.name, var)?;
        }
        Ok(container)
    }

    /// Process `timestamps` in order as worker `rank`, logging (rather than returning)
    /// per-timestamp failures.
    pub fn run_worker(&self, timestamps: &[NaiveDateTime], rank: usize, pb: Option<&ProgressBar>) -> RunSummary {
        let _worker = info_span!("worker", rank).entered();
        info!("Processing {} timestamp(s)", timestamps.len());
        let mut summary = RunSummary::default();
        for &t in timestamps {
            let _step = info_span!("timestep", time = %t).entered();
            if let Some(pb) = pb {
                pb.set_message(t.to_string());
            }
            match self.process_timestep(t) {
                Ok(StepOutcome::Written) => summary.written.push(t),
                Ok(StepOutcome::Skipped) => summary.skipped.push(t),
                Err(e) => {
                    error!("Processing {t} failed: {e:?}");
                    summary.failed.push((t, e.to_string()));
                }
            }
            if let Some(pb) = pb {
                pb.inc(1);
            }
        }
        if let Some(pb) = pb {
            pb.finish_with_message("done");
        }
        if !summary.failed.is_empty() {
            warn!("{} timestamp(s) failed", summary.failed.len());
        }
        summary
    }

    /// Run worker `rank` of `num_workers` over its share of `timestamps`.
    pub fn run_rank(
        &self,
        timestamps: &[NaiveDateTime],
        num_workers: usize,
        rank: usize,
        mpbar: Option<&MultiProgress>,
    ) -> Result<RunSummary, ConfigError> {
        let mine = partition(timestamps, num_workers, rank)?;
        let pb = mpbar.map(|m| add_worker_pb(m, rank, mine.len()));
        Ok(self.run_worker(mine, rank, pb.as_ref()))
    }

    /// Run all `num_workers` workers in this process, each on its own thread.
    pub fn run_all(
        &self,
        timestamps: &[NaiveDateTime],
        num_workers: usize,
        mpbar: Option<&MultiProgress>,
    ) -> Result<RunSummary, ConfigError> {
        if num_workers == 0 {
            return Err(ConfigError::InvalidPartition {
                rank: 0,
                worker_count: 0,
            });
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .build()
            .map_err(|e| ConfigError::Settings(format!("could not start worker threads: {e}")))?;

        let summaries = pool.install(|| {
            (0..num_workers)
                .into_par_iter()
                .map(|rank| self.run_rank(timestamps, num_workers, rank, mpbar))
                .collect::<Result<Vec<_>, _>>()
        })?;

        let mut total = RunSummary::default();
        for s in summaries {
            total.extend(s);
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Settings,
        distribute::TimeWindow,
        io::ContainerWriter,
        test_utils::{populate_sources, test_time, MemoryStore, TestGrid},
    };
    use chrono::Duration;
    use rstest::{fixture, rstest};

    const SETTINGS: &str = r#"
experiment_id = "test"

[time]
start_date = "2006-09-04T00:00:00"
duration_hours = 9
frequency_hours = 1

[paths]
output_directory = "/out"
src_met_directory = "/g5nr"

[fields]
required_met = ["TT", "PMSL", "LANDSEA", "SOILHGT"]
diagnostic_met = ["U10M"]
"#;

    struct Setup {
        settings: Settings,
        registry: FieldRegistry,
        locator: SourceLocator,
    }

    #[fixture]
    fn setup() -> Setup {
        Setup {
            settings: Settings::from_toml_str(SETTINGS).unwrap(),
            registry: FieldRegistry::g5nr(),
            locator: SourceLocator::new("/g5nr", "/lis"),
        }
    }

    fn merge_only(s: &Setup) -> RunConfig {
        let mut config = g5nr_run_config(&s.settings, &s.registry).unwrap();
        config.conversion = None;
        config
    }

    fn populated_store(s: &Setup, config: &RunConfig, times: &[NaiveDateTime]) -> MemoryStore {
        let store = MemoryStore::default();
        let mut fields = config.plan.direct_fields().to_vec();
        for f in config.plan.directly_derived_fields() {
            fields.extend(f.dependencies.iter().cloned());
        }
        if let Some(v) = &config.vertical {
            fields.push(v.pressure.clone());
        }
        populate_sources(&store, &s.locator, &fields, times, TestGrid::default());
        store
    }

    fn times(s: &Setup) -> Vec<NaiveDateTime> {
        s.settings.time_window().unwrap().timestamps()
    }

    #[rstest]
    fn test_g5nr_run_config(setup: Setup) {
        let config = g5nr_run_config(&setup.settings, &setup.registry).unwrap();
        let conv = config.conversion.as_ref().unwrap();
        assert_eq!(conv.met_fields, ["TT", "PMSL", "LANDSEA", "SOILHGT", "PRESSURE"]);
        assert_eq!(
            config.output_path(test_time()),
            PathBuf::from("/out/test/combined_nc/c1440_NR.nps_input.20060904_0000z.nc4")
        );
        assert_eq!(config.vertical.as_ref().unwrap().target_levels.as_ref().unwrap().len(), 47);
    }

    #[rstest]
    fn test_ght_replaced_by_dependencies_for_conversion(setup: Setup) {
        let mut settings = setup.settings.clone();
        settings.fields.required_met = vec!["GHT".to_string(), "TT".to_string()];
        let config = g5nr_run_config(&settings, &setup.registry).unwrap();
        let conv = config.conversion.unwrap();
        assert_eq!(conv.met_fields, ["TT", "DELP", "SOILHGT", "SPECHUMD", "PRESSURE"]);
        assert_eq!(config.plan.indirectly_derived_fields().len(), 1);
    }

    #[rstest]
    fn test_land_fields_must_be_lis(setup: Setup) {
        let mut settings = setup.settings.clone();
        settings.fields.land = vec!["TT".to_string()];
        settings.paths.src_lsm_directory = Some(PathBuf::from("/lis"));
        let err = g5nr_run_config(&settings, &setup.registry).unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::InvalidDependency { .. }));
    }

    #[rstest]
    fn test_unmapped_field_is_fatal(setup: Setup) {
        let mut settings = setup.settings.clone();
        settings.fields.required_met.push("NOPE".to_string());
        let err = g5nr_run_config(&settings, &setup.registry).unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::UnmappedField(_)));
    }

    #[rstest]
    fn test_no_reference_field() {
        let registry = FieldRegistry::g5nr();
        // GHT pulls in direct dependencies, so it does have a reference field
        assert!(build_plan(&registry, &["GHT"]).is_ok());
        let empty: [&str; 0] = [];
        let err = build_plan(&registry, &empty).unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::NoReferenceField));
    }

    #[rstest]
    fn test_partition_invariance(setup: Setup) {
        let config = merge_only(&setup);
        let times = times(&setup);

        let single = populated_store(&setup, &config, &times);
        let pipeline = Pipeline::new(&config, &setup.locator, &single, &single).unwrap();
        let summary = pipeline.run_all(&times, 1, None).unwrap();
        assert!(summary.is_success());
        assert_eq!(summary.written.len(), times.len());

        let multi = populated_store(&setup, &config, &times);
        let pipeline = Pipeline::new(&config, &setup.locator, &multi, &multi).unwrap();
        let summary = pipeline.run_all(&times, 4, None).unwrap();
        assert!(summary.is_success());
        assert_eq!(summary.num_processed(), times.len());

        assert_eq!(single.output_paths(), multi.output_paths());
        for path in single.output_paths() {
            assert_eq!(single.output(&path), multi.output(&path), "{} differs", path.display());
        }
    }

    #[rstest]
    fn test_rerun_writes_nothing(setup: Setup) {
        let config = merge_only(&setup);
        let times = times(&setup);
        let store = populated_store(&setup, &config, &times);
        let pipeline = Pipeline::new(&config, &setup.locator, &store, &store).unwrap();

        let first = pipeline.run_all(&times, 2, None).unwrap();
        assert_eq!(first.written.len(), times.len());
        let writes = store.write_count();
        assert_eq!(writes, times.len());

        let second = pipeline.run_all(&times, 2, None).unwrap();
        assert!(second.is_success());
        assert!(second.written.is_empty());
        assert_eq!(second.skipped.len(), times.len());
        assert_eq!(store.write_count(), writes);
    }

    #[rstest]
    fn test_failure_is_isolated(setup: Setup) {
        let config = merge_only(&setup);
        let times = times(&setup);
        let store = populated_store(&setup, &config, &times);
        let bad_time = times[3];
        let pmsl = config
            .plan
            .direct_fields()
            .iter()
            .find(|f| f.name == "PMSL")
            .unwrap()
            .clone();
        store.remove_source_file(&setup.locator.locate(&pmsl, bad_time));

        let pipeline = Pipeline::new(&config, &setup.locator, &store, &store).unwrap();
        let summary = pipeline.run_rank(&times, 1, 0, None).unwrap();
        assert!(!summary.is_success());
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, bad_time);
        assert_eq!(summary.written.len(), times.len() - 1);

        let bad_out = config.output_path(bad_time);
        assert!(!store.exists(&bad_out));
        assert!(!store.exists(&temporary_path(&bad_out)));
    }

    #[rstest]
    fn test_failed_conversion_leaves_no_output(setup: Setup) {
        let mut config = g5nr_run_config(&setup.settings, &setup.registry).unwrap();
        if let Some(conv) = config.conversion.as_mut() {
            conv.options.out_dir = PathBuf::from("/this/directory/does/not/exist");
        }
        let t = test_time();
        let store = populated_store(&setup, &config, &[t]);
        let pipeline = Pipeline::new(&config, &setup.locator, &store, &store).unwrap();
        let err = pipeline.process_timestep(t).unwrap_err();
        assert!(matches!(err.current_context(), StepError::Conversion(_)));
        assert!(store.output_paths().is_empty());
    }

    #[rstest]
    fn test_conversion_writes_intermediate_file(setup: Setup) {
        let out_dir = std::env::temp_dir().join(format!("g5nr_prep_conv_{}", std::process::id()));
        std::fs::create_dir_all(&out_dir).unwrap();

        let mut config = g5nr_run_config(&setup.settings, &setup.registry).unwrap();
        if let Some(conv) = config.conversion.as_mut() {
            conv.options.out_dir = out_dir.clone();
        }
        let t = test_time() + Duration::hours(1);
        let store = populated_store(&setup, &config, &[t]);
        let pipeline = Pipeline::new(&config, &setup.locator, &store, &store).unwrap();

        assert_eq!(pipeline.process_timestep(t).unwrap(), StepOutcome::Written);
        let int_file = out_dir.join("G5NR:2006-09-04_01");
        let first_len = std::fs::metadata(&int_file).unwrap().len();
        assert!(first_len > 0);

        // Reprocessing replaces the stale file rather than appending to it
        store.remove(&config.output_path(t)).unwrap();
        assert_eq!(pipeline.process_timestep(t).unwrap(), StepOutcome::Written);
        assert_eq!(std::fs::metadata(&int_file).unwrap().len(), first_len);

        std::fs::remove_dir_all(&out_dir).unwrap();
    }

    #[rstest]
    fn test_lis_forcing_config(setup: Setup) {
        let config = lis_forcing_run_config(&setup.settings, &setup.registry).unwrap();
        assert!(config.vertical.is_none());
        assert!(config.conversion.is_none());
        assert_eq!(
            config.output_path(test_time()),
            PathBuf::from("/out/test/lis_forcing/c1440_NR.combined.20060904_0000z.nc4")
        );
        let derived = config.plan.directly_derived_fields();
        assert_eq!(derived.len(), 1);
        assert_eq!(derived[0].name, "SPEEDLML");
    }

    #[rstest]
    fn test_lis_forcing_run(setup: Setup) {
        let config = lis_forcing_run_config(&setup.settings, &setup.registry).unwrap();
        let window = TimeWindow::from_hours(test_time(), 1.0, 0.5).unwrap();
        let times = window.timestamps();
        let store = populated_store(&setup, &config, &times);
        let pipeline = Pipeline::new(&config, &setup.locator, &store, &store).unwrap();
        let summary = pipeline.run_all(&times, 2, None).unwrap();
        assert!(summary.is_success(), "{:?}", summary.failed);

        let out = store.output(&config.output_path(times[1])).unwrap();
        assert!(out.contains_variable("SPEEDLML"));
        assert!(out.contains_variable("PRECTOT"));
        assert!(!out.contains_variable("ULML"));
        assert_eq!(out.dimension_len("lev"), None);
    }

    #[rstest]
    fn test_bad_rank(setup: Setup) {
        let config = merge_only(&setup);
        let store = MemoryStore::default();
        let pipeline = Pipeline::new(&config, &setup.locator, &store, &store).unwrap();
        let err = pipeline.run_rank(&times(&setup), 2, 2, None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPartition { .. }));
    }
}
