//! Interrupt handling for warm-up runs
//!
//! On the first SIGINT the worker pool is asked to stop; workers finish the
//! block they are loading and the run reports what it completed. A second
//! SIGINT exits immediately.

use std::process;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use blockcache_pool::StopHandle;
use tracing::warn;

/// Exit code for interrupted runs
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// What to do with a received signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: stop cooperatively
    Stop,
    /// Second signal: exit now
    ImmediateExit,
    /// Any later signal
    Ignore,
}

/// Signal handler state
#[derive(Debug, Default)]
pub struct SignalState {
    signal_count: AtomicU8,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a signal and decide what to do about it.
    pub fn handle_signal(&self) -> SignalAction {
        let previous = self
            .signal_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                Some(count.saturating_add(1))
            })
            .unwrap_or_else(|count| count);

        match previous {
            0 => SignalAction::Stop,
            1 => SignalAction::ImmediateExit,
            _ => SignalAction::Ignore,
        }
    }

    /// Get the number of signals received
    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Check if a stop has been requested
    pub fn is_stop_requested(&self) -> bool {
        self.signal_count() > 0
    }
}

/// Install the Ctrl-C handler for a run stopped through `stop`.
///
/// Must be called at most once per process.
pub fn install(stop: StopHandle) -> Result<Arc<SignalState>, ctrlc::Error> {
    let state = Arc::new(SignalState::new());
    let handler_state = Arc::clone(&state);

    ctrlc::set_handler(move || match handler_state.handle_signal() {
        SignalAction::Stop => {
            warn!("interrupt received, stopping workers");
            stop.stop();
        }
        SignalAction::ImmediateExit => {
            eprintln!("\nReceived second interrupt, exiting immediately...");
            process::exit(EXIT_CODE_INTERRUPTED);
        }
        SignalAction::Ignore => {}
    })?;

    Ok(state)
}
