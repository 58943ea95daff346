//! A console progress bar counting finished replicates.
//!
//! Replicates finish out of order on the worker pool, so the bar only counts them; it never
//! reports which replicate finished. Only one bar can be active at a time. Initializing a new
//! one replaces the old.

use std::sync::atomic::{AtomicUsize, Ordering};

use log::trace;
use progress_bar::{
    finalize_progress_bar, inc_progress_bar, init_progress_bar, set_progress_bar_action, Color,
    Style,
};

/// Replicates the active bar is waiting for. Zero when no bar is active.
static REMAINING: AtomicUsize = AtomicUsize::new(0);

/// Initializes a bar labelled "Replicates" that completes after `n_reps` increments.
pub fn init_replicate_progress_bar(n_reps: usize) {
    trace!("initializing replicate progress bar for {n_reps} replicates");
    REMAINING.store(n_reps, Ordering::SeqCst);
    init_progress_bar(n_reps);
    set_progress_bar_action("Replicates", Color::Blue, Style::Bold);
}

/// Counts one finished replicate, finalizing the bar with the last one.
pub fn increment_replicate_progress() {
    let previous = REMAINING
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .unwrap_or(0);
    if previous == 0 {
        return;
    }
    inc_progress_bar();
    if previous == 1 {
        finalize_progress_bar();
    }
}
