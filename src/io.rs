//! The two I/O seams of the merge pipeline.
//!
//! The core never opens a netCDF file itself: it reads source variables through a
//! [`SourceReader`] and persists merged output through a [`ContainerWriter`]. The
//! netCDF implementations live in [`crate::nc_utils`] (behind the `netcdf` feature);
//! tests use in-memory implementations.
use std::path::{Path, PathBuf};

use error_stack::ResultExt;
use tracing::{debug, warn};

use crate::{
    container::{OutputContainer, Variable},
    error::{ReadError, WriteError},
};

/// Something that can read one variable, with its dimension names and attributes,
/// from a source file.
pub trait SourceReader: Sync {
    /// Read variable `varname` from the file at `path`. If the file does not exist,
    /// implementations must return [`ReadError::MissingFile`] so that callers can
    /// distinguish missing inputs from unreadable ones.
    fn read_variable(&self, path: &Path, varname: &str)
        -> error_stack::Result<Variable, ReadError>;
}

/// Something that can persist an [`OutputContainer`] to a path.
pub trait ContainerWriter: Sync {
    fn exists(&self, path: &Path) -> bool;

    /// Write the full container to `path`, replacing anything already there.
    fn write_container(
        &self,
        container: &OutputContainer,
        path: &Path,
    ) -> error_stack::Result<(), WriteError>;

    fn rename(&self, from: &Path, to: &Path) -> error_stack::Result<(), WriteError>;

    fn remove(&self, path: &Path) -> error_stack::Result<(), WriteError>;

    /// Write `container` to the temporary path for `final_path`, then rename it
    /// into place. If the write fails, the temporary file is removed so that
    /// nothing half-written is left behind.
    fn persist(
        &self,
        container: &OutputContainer,
        final_path: &Path,
    ) -> error_stack::Result<(), WriteError> {
        let tmp_path = temporary_path(final_path);
        debug!("Writing {}", tmp_path.display());
        if let Err(e) = self.write_container(container, &tmp_path) {
            self.discard(&tmp_path);
            return Err(e);
        }
        debug!("Renaming '{}' => '{}'", tmp_path.display(), final_path.display());
        self.rename(&tmp_path, final_path)
            .attach_printable_lazy(|| format!("temporary file left at {}", tmp_path.display()))
    }

    /// Remove a temporary file if it exists, logging rather than failing if that does not work.
    fn discard(&self, tmp_path: &Path) {
        if self.exists(tmp_path) {
            if let Err(e) = self.remove(tmp_path) {
                warn!("Could not clean up {}: {e}", tmp_path.display());
            }
        }
    }
}

/// The path a file is written to before it is complete, i.e. `final_path` with
/// ".tmp" appended.
pub fn temporary_path(final_path: &Path) -> PathBuf {
    let mut s = final_path.as_os_str().to_os_string();
    s.push(".tmp");
    PathBuf::from(s)
}
