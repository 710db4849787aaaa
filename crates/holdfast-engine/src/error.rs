//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure that can abort startup so `main` can
//! propagate with `?`.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: holdfast_core::ConfigError,
    },

    /// Seeding the synthetic load failed.
    #[error("lookup error: {source}")]
    Lookup {
        /// The underlying lookup error.
        #[from]
        source: holdfast_core::LookupError,
    },

    /// The log filter directive could not be parsed.
    #[error("invalid log filter {directive:?}: {message}")]
    LogFilter {
        /// The rejected directive.
        directive: String,
        /// Why it was rejected.
        message: String,
    },
}
