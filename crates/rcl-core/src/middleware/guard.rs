//! Guard conditions: user-triggered wake-ups.
//!
//! A trigger stays pending until one wait reports it; that report consumes it.

use crate::domain::{EntityId, EntityKind, RclError, RclResult};
use crate::middleware::context::{Context, EntityHandle};
use crate::middleware::state::EntityBody;
use crate::ports::{ReadinessSource, Waitable};
use std::sync::Arc;
use tracing::trace;

pub struct GuardCondition {
    handle: EntityHandle,
}

impl GuardCondition {
    pub(crate) fn new(context: Context, id: EntityId) -> Self {
        Self {
            handle: EntityHandle::new(context, id),
        }
    }

    /// Mark the guard condition ready and wake every wait containing it.
    pub fn trigger(&self) -> RclResult<()> {
        let id = self.handle.id();
        self.handle.context().mutate(|state| match state.body_mut(id)? {
            EntityBody::GuardCondition(guard) => {
                guard.triggered = true;
                Ok(())
            }
            _ => Err(RclError::invalid_handle(
                EntityKind::GuardCondition,
                "not a guard condition",
            )),
        })?;
        trace!(guard = %id, "Guard condition triggered");
        Ok(())
    }

    pub fn destroy(mut self) -> RclResult<()> {
        self.handle.release()
    }
}

impl Waitable for GuardCondition {
    fn entity_id(&self) -> EntityId {
        self.handle.id()
    }

    fn readiness_source(&self) -> Arc<dyn ReadinessSource> {
        self.handle.context().readiness_source()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RclConfig;

    #[test]
    fn test_trigger_after_destroy_through_context() {
        let ctx = Context::init(RclConfig::default()).unwrap();
        let guard = ctx.create_guard_condition().unwrap();
        ctx.destroy(guard.entity_id()).unwrap();
        assert!(matches!(
            guard.trigger(),
            Err(RclError::InvalidHandle { .. })
        ));
    }
}
