//! Accumulated error messages.
//!
//! An [`ErrorReport`] collects context the way errors bubble up: each added
//! message is prepended, so the rendered text reads outermost first,
//! `"could not connect - connection refused"`.

use std::fmt;

use parking_lot::Mutex;

/// Separator between messages.
pub const SEPARATOR: &str = " - ";

/// A chain of error messages, newest first.
#[derive(Debug, Default)]
pub struct ErrorReport {
    messages: Mutex<Vec<String>>,
}

impl ErrorReport {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend a message.
    pub fn add(&self, message: impl Into<String>) {
        self.messages.lock().insert(0, message.into());
    }

    /// Length in bytes of the rendered text.
    pub fn size(&self) -> usize {
        let messages = self.messages.lock();
        let text: usize = messages.iter().map(String::len).sum();
        text + SEPARATOR.len() * messages.len().saturating_sub(1)
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Whether no message was added.
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// An independent copy.
    pub fn duplicate(&self) -> Self {
        Self {
            messages: Mutex::new(self.messages.lock().clone()),
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.messages.lock().join(SEPARATOR))
    }
}
