//! Verbosity-aware logging handle.
//!
//! Engine components take a `Logger` value instead of reading a global
//! verbosity flag. Events still go through `tracing`, so whatever subscriber
//! the caller installed decides where they end up.

use std::fmt::Display;

#[derive(Debug, Clone, Copy, Default)]
pub struct Logger {
    verbose: bool,
}

impl Logger {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// A logger that only reports warnings.
    pub fn quiet() -> Self {
        Self::new(false)
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Per-entry detail, emitted at info level only when verbose.
    pub fn verbose(&self, message: impl Display) {
        if self.verbose {
            tracing::info!("{}", message);
        } else {
            tracing::trace!("{}", message);
        }
    }

    /// Always emitted.
    pub fn warning(&self, message: impl Display) {
        tracing::warn!("{}", message);
    }
}
