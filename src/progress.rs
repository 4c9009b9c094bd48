//! A terminal progress bar that follows the tick loop.
//!
//! The runner initializes it with `--progress-bar` once the maximum number of ticks is known.
//! `Context::execute` then advances it after every tick. Updating a bar that was never
//! initialized does nothing, so library users and tests that don't ask for one pay nothing.
//!
//! Only one bar exists per process. Initializing it again replaces the previous one.

use crate::log::trace;
use progress_bar::{
    finalize_progress_bar, init_progress_bar, set_progress_bar_action, set_progress_bar_progress,
    Color, Style,
};
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum tick of the active bar, or `0` when no bar is drawn.
static MAX_TICKS: AtomicU64 = AtomicU64::new(0);

/// Initializes the progress bar with the number of ticks the run may take at most.
pub fn init_tick_progress_bar(max_ticks: u64) {
    trace!("initializing tick progress bar with max ticks {max_ticks}");
    if max_ticks == 0 {
        return;
    }
    MAX_TICKS.store(max_ticks, Ordering::SeqCst);
    init_progress_bar(usize::try_from(max_ticks).unwrap_or(usize::MAX));
    set_progress_bar_action("Tick", Color::Blue, Style::Bold);
}

/// Whether a bar is currently drawn on the terminal.
pub(crate) fn tick_progress_active() -> bool {
    MAX_TICKS.load(Ordering::SeqCst) > 0
}

/// Moves the bar to `tick`, finalizing it once the maximum is reached.
pub(crate) fn update_tick_progress(tick: u64) {
    let max_ticks = MAX_TICKS.load(Ordering::SeqCst);
    if max_ticks == 0 {
        return;
    }
    let tick = tick.min(max_ticks);
    set_progress_bar_progress(usize::try_from(tick).unwrap_or(usize::MAX));
    if tick == max_ticks {
        finish_tick_progress();
    }
}

/// Finalizes the bar early, e.g. when the epidemic dies out before the last tick.
pub(crate) fn finish_tick_progress() {
    if MAX_TICKS.swap(0, Ordering::SeqCst) > 0 {
        finalize_progress_bar();
    }
}
