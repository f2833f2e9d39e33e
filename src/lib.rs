//! Preprocessing of GEOS-5 Nature Run (G5NR) output for regional model initialization.
//!
//! The pipeline resolves canonical field names to source variables ([`registry`],
//! [`resolver`]), finds the source file for each field and time ([`locator`]), merges
//! everything for one timestamp into a single container ([`merge`]), optionally
//! interpolates it to isobaric levels ([`interpolation`]) and converts it to the
//! WPS intermediate format ([`intermediate`]). [`pipeline`] ties these together and
//! [`distribute`] splits the timestamps among workers.
pub mod config;
pub mod container;
pub mod derivations;
pub mod distribute;
pub mod error;
pub mod fields;
pub mod intermediate;
pub mod interpolation;
pub mod io;
pub mod locator;
pub mod logging;
pub mod merge;
#[cfg(feature = "netcdf")]
pub mod nc_utils;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod resolver;

#[cfg(test)]
mod test_utils;
