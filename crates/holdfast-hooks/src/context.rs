//! Per-invocation hook context.
//!
//! A [`HookContext`] is created fresh for every invocation and handed by
//! mutable reference to each handler in turn. The lookup facade fills the
//! typed fields from the mutation and the territory it targets; which fields
//! are set for each hook name is listed on the constants in
//! [`holdfast_types::hook_names`]. Third-party data that has no typed field
//! goes into the string-keyed extension map.
//!
//! Handlers can deny either by returning [`Verdict::Deny`] or by calling
//! [`HookContext::veto`]; a vetoed context denies the whole invocation.
//!
//! [`Verdict::Deny`]: crate::Verdict::Deny

use std::collections::BTreeMap;

use holdfast_types::{ActorId, CellId, Mutation, TerritoryId, TerritoryRecord};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A value stored in the extension map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ContextValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Free text.
    Text(String),
    /// Exact decimal amount.
    Decimal(Decimal),
    /// A cell.
    Cell(CellId),
    /// A territory.
    Territory(TerritoryId),
    /// An actor.
    Actor(ActorId),
}

/// Mutable state shared by every handler of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookContext {
    hook: String,
    /// Actor performing the action (leader for `entity.create`).
    pub actor: Option<ActorId>,
    /// Territory the action targets.
    pub territory: Option<TerritoryId>,
    /// Display name of the targeted territory.
    pub territory_name: Option<String>,
    /// Current authoritative record of the targeted territory, when it exists.
    pub record: Option<TerritoryRecord>,
    /// Cells being claimed or released.
    pub cells: Vec<CellId>,
    /// Balance delta for `entity.balance`.
    pub amount: Option<Decimal>,
    extras: BTreeMap<String, ContextValue>,
    veto: Option<String>,
}

impl HookContext {
    /// Create an empty context for `hook`.
    pub fn new(hook: impl Into<String>) -> Self {
        Self {
            hook: hook.into(),
            ..Self::default()
        }
    }

    /// Create a context for `mutation` with its typed fields filled in.
    pub fn for_mutation(mutation: &Mutation) -> Self {
        let mut ctx = Self::default();
        ctx.fill_from(mutation);
        ctx
    }

    /// Overwrite the hook name and every typed field from `mutation`, and
    /// clear any earlier veto. Extension entries already present are kept.
    pub fn fill_from(&mut self, mutation: &Mutation) {
        self.hook = mutation.kind().hook_name().to_owned();
        self.actor = mutation.actor();
        self.territory = Some(mutation.territory());
        self.cells = mutation.cells().to_vec();
        self.territory_name = None;
        self.record = None;
        self.amount = None;
        self.veto = None;
        match mutation {
            Mutation::Create { name, .. } => self.territory_name = Some(name.clone()),
            Mutation::AdjustBalance { delta, .. } => self.amount = Some(*delta),
            _ => {}
        }
    }

    /// Attach the targeted territory's current record and take its name.
    pub fn attach_record(&mut self, record: TerritoryRecord) {
        self.territory_name = Some(record.name.clone());
        self.record = Some(record);
    }

    /// The hook name this context was built for.
    pub fn hook(&self) -> &str {
        &self.hook
    }

    /// Store an extension value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: ContextValue) -> Option<ContextValue> {
        self.extras.insert(key.into(), value)
    }

    /// Read an extension value.
    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.extras.get(key)
    }

    /// Remove an extension value.
    pub fn remove(&mut self, key: &str) -> Option<ContextValue> {
        self.extras.remove(key)
    }

    /// Read a boolean extension value.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.extras.get(key) {
            Some(ContextValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Read an integer extension value.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.extras.get(key) {
            Some(ContextValue::Int(n)) => Some(*n),
            _ => None,
        }
    }

    /// Read a text extension value.
    pub fn get_text(&self, key: &str) -> Option<&str> {
        match self.extras.get(key) {
            Some(ContextValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Read a decimal extension value.
    pub fn get_decimal(&self, key: &str) -> Option<Decimal> {
        match self.extras.get(key) {
            Some(ContextValue::Decimal(d)) => Some(*d),
            _ => None,
        }
    }

    /// Iterate over extension entries in key order.
    pub fn extras(&self) -> impl Iterator<Item = (&str, &ContextValue)> {
        self.extras.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Deny the invocation. The first veto reason wins.
    pub fn veto(&mut self, reason: impl Into<String>) {
        if self.veto.is_none() {
            self.veto = Some(reason.into());
        }
    }

    /// The veto reason, if any handler vetoed.
    pub fn vetoed(&self) -> Option<&str> {
        self.veto.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_mutation_fills_claim_fields() {
        let territory = TerritoryId::new();
        let actor = ActorId::new();
        let cell = CellId::new("w", 10, -3);
        let ctx = HookContext::for_mutation(&Mutation::Claim {
            territory,
            actor,
            cells: vec![cell.clone()],
        });
        assert_eq!(ctx.hook(), "territory.claim");
        assert_eq!(ctx.actor, Some(actor));
        assert_eq!(ctx.territory, Some(territory));
        assert_eq!(ctx.cells, vec![cell]);
        assert!(ctx.amount.is_none());
    }

    #[test]
    fn fill_from_keeps_extensions() {
        let mut ctx = HookContext::new("custom");
        ctx.insert("reward.tier", ContextValue::Int(3));
        ctx.fill_from(&Mutation::AdjustBalance {
            territory: TerritoryId::new(),
            delta: Decimal::new(-250, 2),
        });
        assert_eq!(ctx.hook(), "entity.balance");
        assert_eq!(ctx.amount, Some(Decimal::new(-250, 2)));
        assert_eq!(ctx.get_int("reward.tier"), Some(3));
    }

    #[test]
    fn typed_getters_reject_wrong_type() {
        let mut ctx = HookContext::new("h");
        ctx.insert("flag", ContextValue::Bool(true));
        ctx.insert("note", ContextValue::Text("hi".to_owned()));
        assert_eq!(ctx.get_bool("flag"), Some(true));
        assert_eq!(ctx.get_int("flag"), None);
        assert_eq!(ctx.get_text("note"), Some("hi"));
        assert_eq!(ctx.get_decimal("note"), None);
        assert_eq!(ctx.extras().count(), 2);
    }

    #[test]
    fn first_veto_wins() {
        let mut ctx = HookContext::new("h");
        assert!(ctx.vetoed().is_none());
        ctx.veto("too close to spawn");
        ctx.veto("second reason");
        assert_eq!(ctx.vetoed(), Some("too close to spawn"));
    }

    #[test]
    fn fill_from_overwrites_caller_supplied_fields() {
        let leader = ActorId::new();
        let stale = TerritoryRecord::founded(TerritoryId::new(), "Impostor", leader);
        let mut ctx = HookContext::new("custom");
        ctx.territory_name = Some("Impostor".to_owned());
        ctx.record = Some(stale);
        ctx.amount = Some(Decimal::new(1_000, 0));
        ctx.veto("left over");
        ctx.insert("source", ContextValue::Text("plugin".to_owned()));

        ctx.fill_from(&Mutation::Claim {
            territory: TerritoryId::new(),
            actor: leader,
            cells: vec![CellId::new("w", 0, 0)],
        });

        assert_eq!(ctx.hook(), "territory.claim");
        assert!(ctx.territory_name.is_none());
        assert!(ctx.record.is_none());
        assert!(ctx.amount.is_none());
        assert!(ctx.vetoed().is_none());
        assert_eq!(ctx.get_text("source"), Some("plugin"));
    }

    #[test]
    fn attach_record_replaces_name() {
        let leader = ActorId::new();
        let record = TerritoryRecord::founded(TerritoryId::new(), "Keep", leader);
        let mut ctx = HookContext::new("h");
        ctx.territory_name = Some("Impostor".to_owned());
        ctx.attach_record(record.clone());
        assert_eq!(ctx.territory_name.as_deref(), Some("Keep"));
        assert_eq!(ctx.record, Some(record));
    }

    #[test]
    fn attach_record_sets_name() {
        let leader = ActorId::new();
        let record = TerritoryRecord::founded(TerritoryId::new(), "Keep", leader);
        let mut ctx = HookContext::new("h");
        ctx.attach_record(record.clone());
        assert_eq!(ctx.territory_name.as_deref(), Some("Keep"));
        assert_eq!(ctx.record, Some(record));
    }

    #[test]
    fn context_value_serializes_tagged() {
        let json = serde_json::to_string(&ContextValue::Int(5)).ok();
        assert_eq!(json.as_deref(), Some(r#"{"type":"int","value":5}"#));
    }
}
