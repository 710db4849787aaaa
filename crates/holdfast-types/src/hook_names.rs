//! Well-known hook names.
//!
//! Policy and reward collaborators register against these names. Each
//! constant documents the typed context fields the lookup facade fills in
//! before invoking the hook.

/// Claiming cells. Context: `actor`, `territory`, `cells`.
pub const TERRITORY_CLAIM: &str = "territory.claim";

/// Releasing cells. Context: `actor`, `territory`, `cells`.
pub const TERRITORY_UNCLAIM: &str = "territory.unclaim";

/// Founding a territory. Context: `actor` (leader), `territory`, `territory_name`.
pub const ENTITY_CREATE: &str = "entity.create";

/// Dissolving a territory. Context: `actor`, `territory`.
pub const ENTITY_DISBAND: &str = "entity.disband";

/// Adjusting a territory balance. Context: `territory`, `amount`.
pub const ENTITY_BALANCE: &str = "entity.balance";

/// An actor joining a territory. Context: `actor`, `territory`.
pub const MEMBERSHIP_JOIN: &str = "membership.join";

/// An actor leaving a territory. Context: `actor`, `territory`.
pub const MEMBERSHIP_LEAVE: &str = "membership.leave";

/// Every well-known hook name, in a stable order.
pub const ALL: [&str; 7] = [
    TERRITORY_CLAIM,
    TERRITORY_UNCLAIM,
    ENTITY_CREATE,
    ENTITY_DISBAND,
    ENTITY_BALANCE,
    MEMBERSHIP_JOIN,
    MEMBERSHIP_LEAVE,
];
