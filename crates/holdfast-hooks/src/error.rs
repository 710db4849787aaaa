//! Error type returned by hook handlers.
//!
//! A handler error never propagates past the pipeline. It is logged and
//! turned into a [`Vote::Failed`](crate::Vote::Failed) for that handler.

/// Failure raised by a hook handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HookError {
    /// A context field or extension key the handler requires was absent.
    #[error("missing context key: {key}")]
    MissingContext {
        /// Name of the missing field or extension key.
        key: String,
    },

    /// The handler could not reach a decision.
    #[error("handler failed: {message}")]
    Failed {
        /// Description of the failure.
        message: String,
    },
}

impl HookError {
    /// Shorthand for [`HookError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Shorthand for [`HookError::MissingContext`].
    pub fn missing(key: impl Into<String>) -> Self {
        Self::MissingContext { key: key.into() }
    }
}
