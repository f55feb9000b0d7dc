//! User interrupt handling.
//!
//! A Ctrl-C ends the command cleanly: the interrupt is recorded in the log
//! file, the log location is printed and the process exits with code 0.
//! There is no cancellation mid-request.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::failure::ExitCode;
use crate::logging::LogFile;

/// What to do with a received signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First interrupt: log and exit
    Shutdown,
    /// Shutdown already in progress
    Ignore,
}

/// Interrupt counter shared with the handler thread
#[derive(Debug, Default)]
pub struct InterruptState {
    count: AtomicU8,
}

impl InterruptState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_signal(&self) -> SignalAction {
        if self.count.fetch_add(1, Ordering::SeqCst) == 0 {
            SignalAction::Shutdown
        } else {
            SignalAction::Ignore
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.count.load(Ordering::SeqCst) > 0
    }
}

/// Install the Ctrl-C handler for this process.
///
/// The handler runs on its own thread, outside the command's subscriber,
/// so it writes to the log file directly.
pub fn install(log: LogFile) -> Result<Arc<InterruptState>, ctrlc::Error> {
    let state = Arc::new(InterruptState::new());
    let handler_state = Arc::clone(&state);
    ctrlc::set_handler(move || {
        if handler_state.handle_signal() == SignalAction::Shutdown {
            let _ = log.append_line("Interrupted by user, exiting");
            eprintln!("\nInterrupted by user");
            eprintln!("Log file is {}", log.path().display());
            std::process::exit(ExitCode::Success.as_i32());
        }
    })?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_signal_shuts_down() {
        let state = InterruptState::new();
        assert!(!state.is_interrupted());
        assert_eq!(state.handle_signal(), SignalAction::Shutdown);
        assert!(state.is_interrupted());
        assert_eq!(state.handle_signal(), SignalAction::Ignore);
    }
}
