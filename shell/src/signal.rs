//! Ctrl-C handling.
//!
//! The handler only records the event; the interpreter polls the flag between
//! commands and loop iterations and while waiting for child processes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default)]
pub struct BreakSignal {
    raised: Arc<AtomicBool>,
}

impl BreakSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a signal raised by the process Ctrl-C handler.
    pub fn install() -> Result<Self, ctrlc::Error> {
        let signal = Self::new();
        let handler = signal.clone();
        ctrlc::set_handler(move || handler.raise())?;
        Ok(signal)
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }
}
