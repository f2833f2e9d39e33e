use std::{path::PathBuf, process::ExitCode, sync::Arc};

use clap::Parser;
use error_stack::ResultExt;
use errors::CliError;
use g5nr_prep::{
    config::Settings,
    locator::SourceLocator,
    logging::{init_logging, log_file_name},
    nc_utils::{NetcdfReader, NetcdfWriter},
    pipeline::{g5nr_run_config, Pipeline},
    registry::FieldRegistry,
};
use indicatif::MultiProgress;
use tracing::{error, info};

mod errors;

fn main() -> ExitCode {
    let clargs = Cli::parse();
    let mpbar = Arc::new(MultiProgress::new());

    match driver(clargs, mpbar) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("\nnr_input_generator did not complete successfully:\n\n{e:?}\n");
            eprintln!("{}", e.current_context());
            ExitCode::FAILURE
        }
    }
}

/// Merge G5NR output into one file per timestamp and convert it to the WPS
/// intermediate format.
#[derive(Debug, clap::Parser)]
struct Cli {
    /// Path to the TOML configuration file.
    config: PathBuf,

    /// Override the number of workers set in the configuration.
    #[clap(long)]
    num_workers: Option<usize>,

    /// Only process this worker's share of the timestamps. Without this,
    /// all workers run in this process.
    #[clap(long)]
    rank: Option<usize>,

    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,
}

fn driver(clargs: Cli, mpbar: Arc<MultiProgress>) -> error_stack::Result<(), CliError> {
    let mut settings = Settings::load(&clargs.config)
        .change_context_lazy(|| CliError::config_error(format!("could not load {}", clargs.config.display())))?;
    if let Some(n) = clargs.num_workers {
        settings.workers.num_workers = n;
    }
    let num_workers = settings.workers.num_workers;
    if num_workers == 0 {
        return Err(CliError::usage_error("--num-workers must be at least 1").into());
    }
    if let Some(rank) = clargs.rank {
        if rank >= num_workers {
            return Err(CliError::usage_error(format!(
                "--rank {rank} is not valid with {num_workers} worker(s)"
            ))
            .into());
        }
    }

    for dir in [settings.combined_nc_dir(), settings.nps_int_dir()] {
        std::fs::create_dir_all(&dir).change_context_lazy(|| {
            CliError::runtime_error(format!("could not create output directory {}", dir.display()))
        })?;
    }

    let log_path = settings
        .experiment_dir()
        .join(log_file_name(&settings.experiment_id, clargs.rank));
    init_logging(&log_path, clargs.verbosity.log_level_filter(), Arc::clone(&mpbar))
        .change_context_lazy(|| CliError::runtime_error("could not set up logging"))?;
    info!("Logging initialized, writing log to {}", log_path.display());

    let registry = FieldRegistry::g5nr();
    let run_config = g5nr_run_config(&settings, &registry)
        .change_context_lazy(|| CliError::config_error("could not resolve the requested fields"))?;
    let timestamps = settings
        .time_window()
        .change_context_lazy(|| CliError::config_error("invalid time window"))?
        .timestamps();
    info!(
        "{} timestamp(s) from {} with {num_workers} worker(s)",
        timestamps.len(),
        settings.time.start_date
    );

    let locator = SourceLocator::new(&settings.paths.src_met_directory, settings.lsm_directory());
    let reader = NetcdfReader;
    let writer = NetcdfWriter;
    let pipeline = Pipeline::new(&run_config, &locator, &reader, &writer)
        .change_context_lazy(|| CliError::config_error("invalid output file pattern"))?;

    let summary = match clargs.rank {
        Some(rank) => pipeline.run_rank(&timestamps, num_workers, rank, Some(mpbar.as_ref())),
        None => pipeline.run_all(&timestamps, num_workers, Some(mpbar.as_ref())),
    }
    .change_context_lazy(|| CliError::usage_error("could not distribute the timestamps"))?;

    info!(
        "{} written, {} skipped, {} failed",
        summary.written.len(),
        summary.skipped.len(),
        summary.failed.len()
    );
    if !summary.is_success() {
        for (t, reason) in summary.failed.iter() {
            error!("{t}: {reason}");
        }
        return Err(CliError::StepsFailed(summary.failed.len()).into());
    }
    Ok(())
}
