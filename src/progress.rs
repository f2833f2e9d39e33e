//! Helper functions to set up consistent progress bars
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

const WORKER_TEMPLATE: &str = "{prefix} {wide_bar} [{pos}/{len}] {msg}";

/// Add a progress bar to `mpbar` for worker `rank`, with one step per timestamp.
///
/// The bar's message is meant to be the timestamp currently being processed.
pub fn add_worker_pb(mpbar: &MultiProgress, rank: usize, ntimes: usize) -> ProgressBar {
    let pb = mpbar.add(ProgressBar::new(ntimes as u64));
    setup_worker_pb(&pb, rank, ntimes);
    pb
}

/// Set up `pb` to count the `ntimes` timestamps handled by worker `rank`.
pub fn setup_worker_pb(pb: &ProgressBar, rank: usize, ntimes: usize) {
    pb.set_length(ntimes as u64);
    pb.set_position(0);
    // The template is a constant, so this only fails if it is edited into something invalid
    if let Ok(style) = ProgressStyle::with_template(WORKER_TEMPLATE) {
        pb.set_style(style);
    }
    pb.set_prefix(format!("Worker {rank}"));
    pb.set_message("");
    pb.tick(); // force a redraw
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_is_valid() {
        assert!(ProgressStyle::with_template(WORKER_TEMPLATE).is_ok());
    }

    #[test]
    fn test_worker_pb_length() {
        let mpbar = MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden());
        let pb = add_worker_pb(&mpbar, 2, 7);
        assert_eq!(pb.length(), Some(7));
        assert_eq!(pb.prefix(), "Worker 2");
    }
}
