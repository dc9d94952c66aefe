//! Matched events: attached to a publisher or subscription, ready while the
//! number of matched peers on its topic changed since the last take.

use crate::domain::{EntityId, EntityKind, MatchedStatus, RclError, RclResult, TakeStatus};
use crate::middleware::context::{Context, EntityHandle};
use crate::middleware::state::EntityBody;
use crate::ports::{ReadinessSource, Waitable};
use std::sync::Arc;

pub struct EventHandle {
    handle: EntityHandle,
}

impl EventHandle {
    pub(crate) fn new(context: Context, id: EntityId) -> Self {
        Self {
            handle: EntityHandle::new(context, id),
        }
    }

    /// Copy the current status into `status` and reset its change counters.
    ///
    /// Counts are always written; the result is `Taken` only if something
    /// changed since the previous take.
    pub fn take(&self, status: &mut MatchedStatus) -> RclResult<TakeStatus> {
        let id = self.handle.id();
        let mut state = self.handle.context().lock();
        let EntityBody::Event(event) = state.body_mut(id)? else {
            return Err(RclError::invalid_handle(EntityKind::Event, "not an event"));
        };
        *status = event.status;
        event.status.reset_changes();
        Ok(if status.has_changes() {
            TakeStatus::Taken
        } else {
            TakeStatus::NoDataAvailable
        })
    }

    pub fn destroy(mut self) -> RclResult<()> {
        self.handle.release()
    }
}

impl Waitable for EventHandle {
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
    fn test_publisher_event_tracks_subscriptions() {
        let ctx = Context::init(RclConfig::default()).unwrap();
        let node = ctx.create_node("n", "").unwrap();
        let publisher = node.create_publisher("chatter").unwrap();
        let event = publisher.create_matched_event().unwrap();

        let mut status = MatchedStatus::default();
        assert_eq!(event.take(&mut status).unwrap(), TakeStatus::NoDataAvailable);

        let subscription = node.create_subscription("chatter").unwrap();
        assert_eq!(event.take(&mut status).unwrap(), TakeStatus::Taken);
        assert_eq!(status.current_count, 1);
        assert_eq!(status.current_count_change, 1);

        subscription.destroy().unwrap();
        assert_eq!(event.take(&mut status).unwrap(), TakeStatus::Taken);
        assert_eq!(status.current_count, 0);
        assert_eq!(status.total_count, 1);
        assert_eq!(status.current_count_change, -1);
        assert_eq!(status.total_count_change, 0);
    }

    #[test]
    fn test_event_counts_existing_peers() {
        let ctx = Context::init(RclConfig::default()).unwrap();
        let node = ctx.create_node("n", "").unwrap();
        let _publisher = node.create_publisher("chatter").unwrap();
        let subscription = node.create_subscription("chatter").unwrap();
        let event = subscription.create_matched_event().unwrap();

        let mut status = MatchedStatus::default();
        assert_eq!(event.take(&mut status).unwrap(), TakeStatus::NoDataAvailable);
        assert_eq!(status.current_count, 1);
    }

    #[test]
    fn test_event_destroyed_with_its_source() {
        let ctx = Context::init(RclConfig::default()).unwrap();
        let node = ctx.create_node("n", "").unwrap();
        let publisher = node.create_publisher("chatter").unwrap();
        let event = publisher.create_matched_event().unwrap();
        publisher.destroy().unwrap();

        let mut status = MatchedStatus::default();
        assert!(matches!(
            event.take(&mut status),
            Err(RclError::InvalidHandle { .. })
        ));
    }
}
