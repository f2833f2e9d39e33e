//! The processing time range and its division among workers.
//!
//! Workers never talk to each other: each one gets a contiguous block of
//! timestamps from [`partition`] and writes only the output files for those
//! timestamps. How the workers are launched (separate processes, a job array,
//! or threads) is up to the caller.
use chrono::{Duration, NaiveDateTime};

use crate::error::ConfigError;

/// The inclusive set of timestamps `start + k * frequency` for all `k` with
/// `k * frequency <= duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: NaiveDateTime,
    duration: Duration,
    frequency: Duration,
}

impl TimeWindow {
    /// Create a time window. `frequency` must be positive and `duration` must not be negative.
    pub fn new(
        start: NaiveDateTime,
        duration: Duration,
        frequency: Duration,
    ) -> Result<Self, ConfigError> {
        if frequency <= Duration::zero() {
            return Err(ConfigError::InvalidTimeWindow(format!(
                "frequency must be positive, got {frequency}"
            )));
        }
        if duration < Duration::zero() {
            return Err(ConfigError::InvalidTimeWindow(format!(
                "duration must not be negative, got {duration}"
            )));
        }
        if start.checked_add_signed(duration).is_none() {
            return Err(ConfigError::InvalidTimeWindow(format!(
                "{start} plus {duration} is outside the representable date range"
            )));
        }
        Ok(Self {
            start,
            duration,
            frequency,
        })
    }

    /// Convenience constructor taking the duration and frequency in (possibly fractional) hours.
    pub fn from_hours(
        start: NaiveDateTime,
        duration_hours: f64,
        frequency_hours: f64,
    ) -> Result<Self, ConfigError> {
        let duration = hours_to_duration("duration", duration_hours)?;
        let frequency = hours_to_duration("frequency", frequency_hours)?;
        Self::new(start, duration, frequency)
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    /// All timestamps in the window, in order.
    pub fn timestamps(&self) -> Vec<NaiveDateTime> {
        let mut times = Vec::new();
        let mut offset = Duration::zero();
        while offset <= self.duration {
            let Some(t) = self.start.checked_add_signed(offset) else {
                break;
            };
            times.push(t);
            match offset.checked_add(&self.frequency) {
                Some(next) => offset = next,
                None => break,
            }
        }
        times
    }
}

fn hours_to_duration(what: &str, hours: f64) -> Result<Duration, ConfigError> {
    let millis = (hours * 3_600_000.0).round();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return Err(ConfigError::InvalidTimeWindow(format!(
            "{what} of {hours} hours is not a usable length of time"
        )));
    }
    Duration::try_milliseconds(millis as i64).ok_or_else(|| {
        ConfigError::InvalidTimeWindow(format!("{what} of {hours} hours is out of range"))
    })
}

/// Return the block of `items` that worker `rank` (0-based) of `worker_count` is responsible for.
///
/// The sequence is cut into `worker_count` contiguous chunks whose lengths differ by at
/// most one; the first `len % worker_count` workers get the longer chunks. Every item goes
/// to exactly one worker, and the result depends only on the inputs. Workers beyond the
/// number of items get an empty slice.
pub fn partition<T>(items: &[T], worker_count: usize, rank: usize) -> Result<&[T], ConfigError> {
    if worker_count == 0 || rank >= worker_count {
        return Err(ConfigError::InvalidPartition { rank, worker_count });
    }

    let base = items.len() / worker_count;
    let extra = items.len() % worker_count;
    let start = rank * base + rank.min(extra);
    let len = base + if rank < extra { 1 } else { 0 };
    Ok(&items[start..start + len])
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;
    use rstest::rstest;

    fn t0() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2006-09-04 00:00", "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn test_window_is_inclusive() {
        let win = TimeWindow::from_hours(t0(), 24.0, 6.0).unwrap();
        let times = win.timestamps();
        assert_eq!(times.len(), 5);
        assert_eq!(times[0], t0());
        assert_eq!(times[4], t0() + Duration::hours(24));
    }

    #[test]
    fn test_window_uneven_duration() {
        let win = TimeWindow::from_hours(t0(), 10.0, 3.0).unwrap();
        let times = win.timestamps();
        assert_eq!(times.len(), 4);
        assert_eq!(times[3], t0() + Duration::hours(9));
    }

    #[test]
    fn test_window_zero_duration() {
        let win = TimeWindow::from_hours(t0(), 0.0, 1.0).unwrap();
        assert_eq!(win.timestamps(), vec![t0()]);
    }

    #[test]
    fn test_window_half_hour_frequency() {
        let win = TimeWindow::from_hours(t0(), 1.0, 0.5).unwrap();
        let times = win.timestamps();
        assert_eq!(times[1], t0() + Duration::minutes(30));
    }

    #[test]
    fn test_window_rejects_bad_frequency() {
        let err = TimeWindow::from_hours(t0(), 24.0, 0.0).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTimeWindow(_)));
        let err = TimeWindow::from_hours(t0(), -1.0, 1.0).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTimeWindow(_)));
    }

    #[rstest]
    #[case(1e12, 1e11)]
    #[case(f64::INFINITY, 1.0)]
    #[case(24.0, f64::NAN)]
    #[case(-1e300, 1.0)]
    #[case(24.0, f64::NEG_INFINITY)]
    fn test_window_rejects_unrepresentable_hours(#[case] duration: f64, #[case] frequency: f64) {
        let err = TimeWindow::from_hours(t0(), duration, frequency).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTimeWindow(_)));
    }

    #[test]
    fn test_window_end_must_be_representable() {
        let start = NaiveDateTime::MAX - Duration::hours(1);
        let err = TimeWindow::new(start, Duration::hours(2), Duration::hours(1)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTimeWindow(_)));

        let win = TimeWindow::new(start, Duration::hours(1), Duration::hours(1)).unwrap();
        assert_eq!(win.timestamps(), vec![start, start + Duration::hours(1)]);
    }

    #[test]
    fn test_partition_covers_everything_once() {
        let items = (0..11).collect_vec();
        for nworkers in 1..=13 {
            let mut seen = Vec::new();
            let mut lengths = Vec::new();
            for rank in 0..nworkers {
                let chunk = partition(&items, nworkers, rank).unwrap();
                lengths.push(chunk.len());
                seen.extend_from_slice(chunk);
            }
            assert_eq!(seen, items, "partition with {nworkers} workers lost or reordered items");
            let min = lengths.iter().min().unwrap();
            let max = lengths.iter().max().unwrap();
            assert!(max - min <= 1, "chunk lengths too uneven: {lengths:?}");
        }
    }

    #[test]
    fn test_partition_extra_to_first_ranks() {
        let items = (0..10).collect_vec();
        assert_eq!(partition(&items, 4, 0).unwrap(), &[0, 1, 2]);
        assert_eq!(partition(&items, 4, 1).unwrap(), &[3, 4, 5]);
        assert_eq!(partition(&items, 4, 2).unwrap(), &[6, 7]);
        assert_eq!(partition(&items, 4, 3).unwrap(), &[8, 9]);
    }

    #[test]
    fn test_partition_bad_rank() {
        let items = [1, 2, 3];
        assert!(partition(&items, 0, 0).is_err());
        assert!(partition(&items, 2, 2).is_err());
    }
}
