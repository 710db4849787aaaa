//! Hook pipeline: the extensibility seam for territory mutations.
//!
//! Collaborators (claim-eligibility rules, reward granters, notification
//! senders) register handlers under a hook name. Before a mutation commits,
//! the lookup facade builds a [`HookContext`] and runs every handler for the
//! mutation's hook in registration order. The mutation proceeds only if all
//! of them allow it.
//!
//! # Modules
//!
//! - [`context`] -- [`HookContext`], typed fields plus open extension data
//! - [`pipeline`] -- [`HookPipeline`], registration and invocation
//! - [`error`] -- [`HookError`], returned by failing handlers

pub mod context;
pub mod error;
pub mod pipeline;

pub use context::{ContextValue, HookContext};
pub use error::HookError;
pub use pipeline::{
    FailurePolicy, HandlerOutcome, HookDecision, HookHandler, HookOwner, HookPipeline,
    HookStats, RegistrationId, RegistrationInfo, Verdict, Vote,
};
