use std::fmt::Display;

#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// The program was called incorrectly, e.g. a rank outside the worker count
    UsageError(String),

    /// Something is wrong with the configuration file or the fields it requests
    ConfigError(String),

    /// A problem with the system, e.g. an output directory that cannot be created
    RuntimeError(String),

    /// One or more timestamps could not be processed
    StepsFailed(usize),
}

impl CliError {
    pub(crate) fn usage_error<S: ToString>(msg: S) -> Self {
        Self::UsageError(msg.to_string())
    }

    pub(crate) fn config_error<S: ToString>(msg: S) -> Self {
        Self::ConfigError(msg.to_string())
    }

    pub(crate) fn runtime_error<S: ToString>(msg: S) -> Self {
        Self::RuntimeError(msg.to_string())
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (type_str, err_msg, fix_msg) = match self {
            CliError::UsageError(msg) => {
                let fix = "Please double check the command line arguments, in particular that --rank is less than the number of workers.";
                ("Usage error", msg.clone(), fix)
            }
            CliError::ConfigError(msg) => {
                let fix = "Please check the configuration file: every requested field must be known, the time window must be valid, and the output file patterns must be valid strftime patterns.";
                ("Configuration error", msg.clone(), fix)
            }
            CliError::RuntimeError(msg) => {
                let fix = "Check that the output directory is writable and that the source directories are mounted, then try again.";
                ("Runtime error", msg.clone(), fix)
            }
            CliError::StepsFailed(n) => {
                let fix = "The log file lists why each timestamp failed. Timestamps that succeeded will be skipped if you rerun, so fix the cause (usually a missing source file) and run again.";
                ("Processing error", format!("{n} timestamp(s) failed"), fix)
            }
        };

        writeln!(f, "{type_str}: {err_msg}\n\n{fix_msg}")
    }
}
