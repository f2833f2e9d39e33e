use std::{path::PathBuf, process::ExitCode, sync::Arc};

use clap::Parser;
use error_stack::ResultExt;
use g5nr_prep::{
    config::Settings,
    locator::SourceLocator,
    logging::{init_logging, log_file_name},
    nc_utils::{NetcdfReader, NetcdfWriter},
    pipeline::{lis_forcing_run_config, Pipeline},
    registry::FieldRegistry,
};
use indicatif::MultiProgress;
use tracing::{error, info};

fn main() -> ExitCode {
    let clargs = Cli::parse();
    let mpbar = Arc::new(MultiProgress::new());

    match driver(clargs, mpbar) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("\nlis_input_combiner did not complete successfully:\n\n{e:?}\n");
            ExitCode::FAILURE
        }
    }
}

/// Combine the G5NR surface fields needed to force LIS into one file per timestamp.
#[derive(Debug, clap::Parser)]
struct Cli {
    /// Path to the TOML configuration file. The [lis_forcing] table sets the
    /// fields and output file names.
    config: PathBuf,

    /// Override the number of workers set in the configuration.
    #[clap(long)]
    num_workers: Option<usize>,

    /// Only process this worker's share of the timestamps.
    #[clap(long)]
    rank: Option<usize>,

    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("Could not load the configuration")]
    ReadingConfig,
    #[error("Invalid worker setup: {0}")]
    Workers(String),
    #[error("Could not create the output directory {}", .0.display())]
    OutputDir(PathBuf),
    #[error("Could not set up logging")]
    Logging,
    #[error("The requested LIS forcing fields could not be resolved")]
    Fields,
    #[error("{0} timestamp(s) could not be combined, see the log for why")]
    StepsFailed(usize),
}

fn driver(clargs: Cli, mpbar: Arc<MultiProgress>) -> error_stack::Result<(), CliError> {
    let mut settings = Settings::load(&clargs.config).change_context(CliError::ReadingConfig)?;
    if let Some(n) = clargs.num_workers {
        settings.workers.num_workers = n;
    }
    let num_workers = settings.workers.num_workers;
    if num_workers == 0 {
        return Err(CliError::Workers("at least one worker is required".to_string()).into());
    }
    if let Some(rank) = clargs.rank.filter(|&r| r >= num_workers) {
        return Err(CliError::Workers(format!("rank {rank} with {num_workers} worker(s)")).into());
    }

    let out_dir = settings.lis_forcing_dir();
    std::fs::create_dir_all(&out_dir).change_context_lazy(|| CliError::OutputDir(out_dir.clone()))?;

    let log_path = out_dir.join(log_file_name(&settings.experiment_id, clargs.rank));
    init_logging(&log_path, clargs.verbosity.log_level_filter(), Arc::clone(&mpbar))
        .change_context(CliError::Logging)?;

    let registry = FieldRegistry::g5nr();
    let run_config = lis_forcing_run_config(&settings, &registry).change_context(CliError::Fields)?;
    let timestamps = settings
        .time_window()
        .change_context(CliError::ReadingConfig)?
        .timestamps();
    info!(
        "Combining {} field(s) for {} timestamp(s) into {}",
        run_config.plan.direct_fields().len() + run_config.plan.directly_derived_fields().len(),
        timestamps.len(),
        out_dir.display()
    );

    let locator = SourceLocator::new(&settings.paths.src_met_directory, settings.lsm_directory());
    let pipeline = Pipeline::new(&run_config, &locator, &NetcdfReader, &NetcdfWriter)
        .change_context(CliError::ReadingConfig)?;

    let summary = match clargs.rank {
        Some(rank) => pipeline.run_rank(&timestamps, num_workers, rank, Some(mpbar.as_ref())),
        None => pipeline.run_all(&timestamps, num_workers, Some(mpbar.as_ref())),
    }
    .map_err(|e| CliError::Workers(e.to_string()))?;

    info!(
        "{} written, {} skipped, {} failed",
        summary.written.len(),
        summary.skipped.len(),
        summary.failed.len()
    );
    if !summary.is_success() {
        return Err(CliError::StepsFailed(summary.failed.len()).into());
    }
    Ok(())
}
