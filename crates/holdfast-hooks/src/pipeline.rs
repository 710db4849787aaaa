//! Hook registration and synchronous invocation.
//!
//! # Contract
//!
//! - Handlers for a hook run in registration order, all on the caller's
//!   thread, all sharing one [`HookContext`].
//! - The invocation is allowed only if every handler votes to allow and no
//!   handler vetoed through the context. With no handlers it is allowed.
//! - A handler that returns an error or panics is logged and counts as a
//!   failed vote. Later handlers still run. Under the default
//!   [`FailurePolicy::FailClosed`] a failed vote denies; a hook configured
//!   [`FailurePolicy::FailOpen`] ignores failed votes.
//! - The registry lock is released before any handler runs, so handlers may
//!   register or unregister other handlers without deadlocking.
//!
//! # Latency budget
//!
//! The pipeline has no timeout. A handler stalls the action it gates, so
//! handlers should finish well under a millisecond: cheap in-memory checks
//! only, no blocking I/O, no waiting on other threads. Anything slower
//! belongs in a deferred save action or a background task.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::context::HookContext;
use crate::error::HookError;

/// A handler's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Let the action proceed.
    Allow,
    /// Refuse the action.
    Deny {
        /// Human-readable reason, surfaced to the requesting caller.
        reason: String,
    },
}

impl Verdict {
    /// Shorthand for [`Verdict::Deny`].
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
        }
    }
}

impl From<bool> for Verdict {
    fn from(allowed: bool) -> Self {
        if allowed {
            Self::Allow
        } else {
            Self::deny("denied by handler")
        }
    }
}

/// A registered extension.
///
/// Implemented for every `Fn(&mut HookContext) -> Result<Verdict, HookError>`
/// closure that is `Send + Sync`.
pub trait HookHandler: Send + Sync {
    /// Inspect (and optionally annotate) the context and vote.
    ///
    /// # Errors
    ///
    /// Returns [`HookError`] if the handler cannot decide. The pipeline
    /// treats that as a failed vote.
    fn handle(&self, ctx: &mut HookContext) -> Result<Verdict, HookError>;
}

impl<F> HookHandler for F
where
    F: Fn(&mut HookContext) -> Result<Verdict, HookError> + Send + Sync,
{
    fn handle(&self, ctx: &mut HookContext) -> Result<Verdict, HookError> {
        self(ctx)
    }
}

/// How failed votes count for a hook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// A failing handler denies the action.
    #[default]
    FailClosed,
    /// A failing handler is logged and otherwise ignored.
    FailOpen,
}

/// Identity of the extension that owns a registration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HookOwner(pub String);

impl From<&str> for HookOwner {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

impl From<String> for HookOwner {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl core::fmt::Display for HookOwner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle returned by [`HookPipeline::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegistrationId(u64);

/// Public view of one registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInfo {
    /// Registration handle.
    pub id: RegistrationId,
    /// Owning extension.
    pub owner: HookOwner,
}

/// How one handler voted in one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Vote {
    /// The handler allowed the action.
    Allowed,
    /// The handler denied the action.
    Denied {
        /// Reason given by the handler.
        reason: String,
    },
    /// The handler returned an error or panicked.
    Failed {
        /// Description of the failure.
        reason: String,
    },
}

/// One handler's contribution to a [`HookDecision`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOutcome {
    /// Which registration ran.
    pub registration: RegistrationId,
    /// Its owner.
    pub owner: HookOwner,
    /// Its vote.
    pub vote: Vote,
}

/// Aggregate result of [`HookPipeline::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookDecision {
    /// Hook that was invoked.
    pub hook: String,
    /// Whether the action may proceed.
    pub allowed: bool,
    /// Per-handler votes in invocation order.
    pub outcomes: Vec<HandlerOutcome>,
    /// Veto reason written into the context, if any.
    pub veto: Option<String>,
}

impl HookDecision {
    /// The reason the action was denied, or `None` if it was allowed.
    ///
    /// Prefers the first explicit denial, then a context veto, then the first
    /// counted failure.
    pub fn denial_reason(&self) -> Option<String> {
        if self.allowed {
            return None;
        }
        let denied = self.outcomes.iter().find_map(|o| match &o.vote {
            Vote::Denied { reason } => Some(reason.clone()),
            _ => None,
        });
        let failed = || {
            self.outcomes.iter().find_map(|o| match &o.vote {
                Vote::Failed { reason } => Some(format!("{} failed: {reason}", o.owner)),
                _ => None,
            })
        };
        denied
            .or_else(|| self.veto.clone())
            .or_else(failed)
            .or_else(|| Some(format!("{} denied", self.hook)))
    }
}

/// Counters describing a [`HookPipeline`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HookStats {
    /// Registered handlers across every hook.
    pub registered: usize,
    /// Invocations evaluated.
    pub invocations: u64,
    /// Invocations that ended denied.
    pub denials: u64,
    /// Handler calls that errored or panicked.
    pub handler_failures: u64,
}

struct Registration {
    id: RegistrationId,
    owner: HookOwner,
    handler: Arc<dyn HookHandler>,
}

/// Registry of hook handlers keyed by hook name.
pub struct HookPipeline {
    registry: RwLock<HashMap<String, Vec<Arc<Registration>>>>,
    policies: RwLock<HashMap<String, FailurePolicy>>,
    default_policy: FailurePolicy,
    next_id: AtomicU64,
    invocations: AtomicU64,
    denials: AtomicU64,
    handler_failures: AtomicU64,
}

impl HookPipeline {
    /// Create an empty pipeline where failed votes deny.
    pub fn new() -> Self {
        Self::with_default_policy(FailurePolicy::FailClosed)
    }

    /// Create an empty pipeline with the given policy for hooks that have
    /// no explicit policy.
    pub fn with_default_policy(default_policy: FailurePolicy) -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
            policies: RwLock::new(HashMap::new()),
            default_policy,
            next_id: AtomicU64::new(1),
            invocations: AtomicU64::new(0),
            denials: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
        }
    }

    /// Append `handler` to the list for `hook`.
    pub fn register<H>(
        &self,
        hook: impl Into<String>,
        owner: impl Into<HookOwner>,
        handler: H,
    ) -> RegistrationId
    where
        H: HookHandler + 'static,
    {
        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let hook = hook.into();
        let registration = Arc::new(Registration {
            id,
            owner: owner.into(),
            handler: Arc::new(handler),
        });
        tracing::debug!(hook = %hook, owner = %registration.owner, "hook handler registered");
        self.write_registry()
            .entry(hook)
            .or_default()
            .push(registration);
        id
    }

    /// Detach one handler. Returns whether it was registered.
    pub fn unregister(&self, id: RegistrationId) -> bool {
        let mut registry = self.write_registry();
        let mut removed = false;
        for handlers in registry.values_mut() {
            let before = handlers.len();
            handlers.retain(|r| r.id != id);
            removed |= handlers.len() != before;
        }
        registry.retain(|_, handlers| !handlers.is_empty());
        removed
    }

    /// Detach every handler owned by `owner`, across all hooks. Returns how
    /// many were removed.
    pub fn unregister_all(&self, owner: &HookOwner) -> usize {
        let mut registry = self.write_registry();
        let mut removed: usize = 0;
        for handlers in registry.values_mut() {
            let before = handlers.len();
            handlers.retain(|r| &r.owner != owner);
            removed = removed.saturating_add(before.saturating_sub(handlers.len()));
        }
        registry.retain(|_, handlers| !handlers.is_empty());
        if removed > 0 {
            tracing::info!(owner = %owner, removed, "hook owner detached");
        }
        removed
    }

    /// Registrations for `hook` in invocation order. Empty when none exist.
    pub fn list_handlers(&self, hook: &str) -> Vec<RegistrationInfo> {
        self.read_registry()
            .get(hook)
            .map(|handlers| {
                handlers
                    .iter()
                    .map(|r| RegistrationInfo {
                        id: r.id,
                        owner: r.owner.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Hook names that currently have at least one handler, sorted.
    pub fn hooks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_registry().keys().cloned().collect();
        names.sort();
        names
    }

    /// Set how failed votes count for `hook`.
    pub fn set_failure_policy(&self, hook: impl Into<String>, policy: FailurePolicy) {
        self.policies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(hook.into(), policy);
    }

    /// The policy in force for `hook`.
    pub fn failure_policy(&self, hook: &str) -> FailurePolicy {
        self.policies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hook)
            .copied()
            .unwrap_or(self.default_policy)
    }

    /// Run every handler for `hook` and report whether the action may proceed.
    pub fn invoke(&self, hook: &str, ctx: &mut HookContext) -> bool {
        self.evaluate(hook, ctx).allowed
    }

    /// Run every handler for `hook` and report each vote.
    pub fn evaluate(&self, hook: &str, ctx: &mut HookContext) -> HookDecision {
        // Snapshot, then release the lock before calling out.
        let handlers: Vec<Arc<Registration>> =
            self.read_registry().get(hook).cloned().unwrap_or_default();
        let policy = self.failure_policy(hook);
        self.invocations.fetch_add(1, Ordering::Relaxed);

        let mut allowed = true;
        let mut outcomes = Vec::with_capacity(handlers.len());
        for registration in &handlers {
            let vote = self.call(hook, registration, ctx);
            allowed &= match vote {
                Vote::Allowed => true,
                Vote::Denied { .. } => false,
                Vote::Failed { .. } => policy == FailurePolicy::FailOpen,
            };
            outcomes.push(HandlerOutcome {
                registration: registration.id,
                owner: registration.owner.clone(),
                vote,
            });
        }

        let veto = ctx.vetoed().map(str::to_owned);
        if veto.is_some() {
            allowed = false;
        }
        if !allowed {
            self.denials.fetch_add(1, Ordering::Relaxed);
        }

        HookDecision {
            hook: hook.to_owned(),
            allowed,
            outcomes,
            veto,
        }
    }

    /// Detach every handler and forget every per-hook policy.
    pub fn shutdown(&self) {
        let detached: usize = self.write_registry().drain().map(|(_, h)| h.len()).sum();
        self.policies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        tracing::info!(detached, "hook pipeline shut down");
    }

    /// Number of handlers registered for `hook`.
    pub fn handler_count(&self, hook: &str) -> usize {
        self.read_registry().get(hook).map_or(0, Vec::len)
    }

    /// Snapshot of the pipeline counters.
    pub fn stats(&self) -> HookStats {
        HookStats {
            registered: self.read_registry().values().map(Vec::len).sum(),
            invocations: self.invocations.load(Ordering::Relaxed),
            denials: self.denials.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }

    /// Call one handler, converting errors and panics into a failed vote.
    fn call(&self, hook: &str, registration: &Registration, ctx: &mut HookContext) -> Vote {
        let handler = Arc::clone(&registration.handler);
        let result = catch_unwind(AssertUnwindSafe(|| handler.handle(ctx)));
        let reason = match result {
            Ok(Ok(Verdict::Allow)) => return Vote::Allowed,
            Ok(Ok(Verdict::Deny { reason })) => return Vote::Denied { reason },
            Ok(Err(err)) => err.to_string(),
            Err(payload) => format!("handler panicked: {}", panic_message(payload.as_ref())),
        };
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
        warn!(
            hook = %hook,
            owner = %registration.owner,
            error = %reason,
            "hook handler failed"
        );
        Vote::Failed { reason }
    }

    fn read_registry(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<Arc<Registration>>>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<Arc<Registration>>>> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for HookPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for HookPipeline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HookPipeline")
            .field("default_policy", &self.default_policy)
            .field("hooks", &self.hooks())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    const HOOK: &str = "territory.claim";

    fn allow(_: &mut HookContext) -> Result<Verdict, HookError> {
        Ok(Verdict::Allow)
    }

    fn deny(_: &mut HookContext) -> Result<Verdict, HookError> {
        Ok(Verdict::deny("no"))
    }

    #[test]
    fn no_handlers_means_allowed() {
        let pipeline = HookPipeline::new();
        let mut ctx = HookContext::new(HOOK);
        assert!(pipeline.invoke(HOOK, &mut ctx));
        assert!(pipeline.list_handlers(HOOK).is_empty());
    }

    #[test]
    fn one_denial_denies_the_whole_invocation() {
        let pipeline = HookPipeline::new();
        pipeline.register(HOOK, "a", allow);
        pipeline.register(HOOK, "b", deny);
        pipeline.register(HOOK, "c", allow);

        let mut ctx = HookContext::new(HOOK);
        let decision = pipeline.evaluate(HOOK, &mut ctx);
        assert!(!decision.allowed);
        assert_eq!(decision.outcomes.len(), 3);
        assert_eq!(decision.denial_reason().as_deref(), Some("no"));
    }

    #[test]
    fn handlers_run_in_registration_order_with_shared_context() {
        let pipeline = HookPipeline::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            pipeline.register(HOOK, name, move |ctx: &mut HookContext| -> Result<Verdict, HookError> {
                let seen = ctx.get_int("count").unwrap_or(0);
                ctx.insert("count", crate::ContextValue::Int(seen + 1));
                order.lock().unwrap().push(name);
                Ok(Verdict::Allow)
            });
        }

        let mut ctx = HookContext::new(HOOK);
        assert!(pipeline.invoke(HOOK, &mut ctx));
        assert_eq!(ctx.get_int("count"), Some(3));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn erroring_handler_counts_as_deny_and_later_handlers_still_run() {
        let pipeline = HookPipeline::new();
        let ran_last = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran_last);
        pipeline.register(HOOK, "broken", |_: &mut HookContext| -> Result<Verdict, HookError> {
            Err(HookError::failed("database unavailable"))
        });
        pipeline.register(HOOK, "last", move |_: &mut HookContext| -> Result<Verdict, HookError> {
            *flag.lock().unwrap() = true;
            Ok(Verdict::Allow)
        });

        let mut ctx = HookContext::new(HOOK);
        let decision = pipeline.evaluate(HOOK, &mut ctx);
        assert!(!decision.allowed);
        assert!(*ran_last.lock().unwrap());
        assert!(matches!(
            decision.outcomes.first().map(|o| &o.vote),
            Some(Vote::Failed { .. })
        ));
        assert_eq!(pipeline.stats().handler_failures, 1);
    }

    #[test]
    #[allow(clippy::panic)]
    fn panicking_handler_is_contained() {
        let pipeline = HookPipeline::new();
        pipeline.register(HOOK, "explodes", |_: &mut HookContext| -> Result<Verdict, HookError> {
            panic!("boom")
        });
        pipeline.register(HOOK, "fine", allow);

        let mut ctx = HookContext::new(HOOK);
        let decision = pipeline.evaluate(HOOK, &mut ctx);
        assert!(!decision.allowed);
        assert_eq!(decision.outcomes.len(), 2);
        let reason = decision.denial_reason().unwrap();
        assert!(reason.contains("boom"), "unexpected reason: {reason}");
    }

    #[test]
    fn fail_open_ignores_failures_but_not_denials() {
        let pipeline = HookPipeline::new();
        pipeline.set_failure_policy(HOOK, FailurePolicy::FailOpen);
        pipeline.register(HOOK, "broken", |_: &mut HookContext| -> Result<Verdict, HookError> {
            Err(HookError::missing("record"))
        });
        let mut ctx = HookContext::new(HOOK);
        assert!(pipeline.invoke(HOOK, &mut ctx));

        pipeline.register(HOOK, "strict", deny);
        assert!(!pipeline.invoke(HOOK, &mut ctx));
        assert_eq!(pipeline.failure_policy("territory.unclaim"), FailurePolicy::FailClosed);
    }

    #[test]
    fn context_veto_denies() {
        let pipeline = HookPipeline::new();
        pipeline.register(HOOK, "vetoer", |ctx: &mut HookContext| -> Result<Verdict, HookError> {
            ctx.veto("protected region");
            Ok(Verdict::Allow)
        });
        let mut ctx = HookContext::new(HOOK);
        let decision = pipeline.evaluate(HOOK, &mut ctx);
        assert!(!decision.allowed);
        assert_eq!(decision.denial_reason().as_deref(), Some("protected region"));
    }

    #[test]
    fn hooks_are_independent() {
        let pipeline = HookPipeline::new();
        pipeline.register(HOOK, "a", deny);
        let mut ctx = HookContext::new("territory.unclaim");
        assert!(pipeline.invoke("territory.unclaim", &mut ctx));
    }

    #[test]
    fn unregister_all_removes_only_that_owner() {
        let pipeline = HookPipeline::new();
        pipeline.register(HOOK, "rules", deny);
        pipeline.register("entity.create", "rules", deny);
        pipeline.register(HOOK, "rewards", allow);

        assert_eq!(pipeline.unregister_all(&HookOwner::from("rules")), 2);
        let remaining = pipeline.list_handlers(HOOK);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining.first().map(|r| r.owner.0.as_str()), Some("rewards"));
        assert_eq!(pipeline.hooks(), vec![HOOK.to_owned()]);

        let mut ctx = HookContext::new(HOOK);
        assert!(pipeline.invoke(HOOK, &mut ctx));
    }

    #[test]
    fn unregister_single_registration() {
        let pipeline = HookPipeline::new();
        let id = pipeline.register(HOOK, "a", deny);
        pipeline.register(HOOK, "a", allow);
        assert!(pipeline.unregister(id));
        assert!(!pipeline.unregister(id));
        assert_eq!(pipeline.handler_count(HOOK), 1);
    }

    #[test]
    fn handler_may_register_during_invocation() {
        let pipeline = Arc::new(HookPipeline::new());
        let inner = Arc::clone(&pipeline);
        pipeline.register(HOOK, "bootstrap", move |_: &mut HookContext| -> Result<Verdict, HookError> {
            inner.register("entity.create", "late", allow);
            Ok(Verdict::Allow)
        });
        let mut ctx = HookContext::new(HOOK);
        assert!(pipeline.invoke(HOOK, &mut ctx));
        assert_eq!(pipeline.handler_count("entity.create"), 1);
    }

    #[test]
    fn shutdown_detaches_everything() {
        let pipeline = HookPipeline::new();
        pipeline.register(HOOK, "a", deny);
        pipeline.set_failure_policy(HOOK, FailurePolicy::FailOpen);
        pipeline.shutdown();
        assert_eq!(pipeline.stats().registered, 0);
        assert_eq!(pipeline.failure_policy(HOOK), FailurePolicy::FailClosed);
    }
}
