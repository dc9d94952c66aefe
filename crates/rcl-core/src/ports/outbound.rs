//! # Outbound Ports - Readiness Source
//!
//! The wait set owns slots and lifecycle; it does not know how readiness is
//! computed or how to block. Those belong to whatever owns the entities.

use crate::domain::{EntityId, EntityKind, RclResult, ShutdownToken, WaitOutcome, WaitTimeout};
use std::sync::Arc;

/// Owner of entity state able to block until any of a set of entities is ready.
///
/// # Contract
///
/// - `wait_any` checks the shutdown token before blocking and wakes promptly
///   when it fires (`Interrupted`).
/// - Readiness is level-triggered: an entity with undrained data is reported
///   on every call until drained.
/// - Ready entries are returned in the order of `slots` (kind, then slot).
/// - A slot referring to a destroyed entity fails the whole call with
///   `InvalidHandle`.
pub trait ReadinessSource: Send + Sync {
    /// Unique identity of this source, used to reject mixing sources.
    fn source_id(&self) -> u64;

    /// Fail with `InvalidHandle` unless `id` resolves to a live entity.
    fn check_live(&self, id: EntityId) -> RclResult<()>;

    /// Block until at least one listed entity is ready, the timeout elapses,
    /// or shutdown is requested.
    fn wait_any(
        &self,
        slots: &[(EntityKind, &[EntityId])],
        timeout: WaitTimeout,
        shutdown: &ShutdownToken,
    ) -> RclResult<WaitOutcome>;
}

/// An entity handle that can be registered in a wait set.
pub trait Waitable {
    /// Registry id of the entity.
    fn entity_id(&self) -> EntityId;

    /// Source that computes this entity's readiness.
    fn readiness_source(&self) -> Arc<dyn ReadinessSource>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both ports must stay object-safe
    fn _assert_object_safe(_: &dyn ReadinessSource, _: &dyn Waitable) {}
}
