//! Publishers deliver serialized messages to every subscription of the same
//! topic in the context.

use crate::domain::{EntityId, EntityKind, MatchedStatus, RclError, RclResult};
use crate::middleware::context::{Context, EntityHandle};
use crate::middleware::event::EventHandle;
use crate::middleware::state::{push_keep_last, EntityBody, EventRecord};
use serde::Serialize;
use tracing::{debug, trace};

pub struct Publisher {
    handle: EntityHandle,
    topic: String,
}

impl Publisher {
    pub(crate) fn new(context: Context, id: EntityId, topic: String) -> Self {
        Self {
            handle: EntityHandle::new(context, id),
            topic,
        }
    }

    /// Fully expanded topic name.
    #[must_use]
    pub fn topic_name(&self) -> &str {
        &self.topic
    }

    /// Serialize and publish `message`.
    ///
    /// # Errors
    /// - `Failed`: serialization failed
    /// - `InvalidHandle`: the publisher was destroyed
    pub fn publish<M: Serialize>(&self, message: &M) -> RclResult<()> {
        let bytes = bincode::serialize(message)?;
        self.publish_serialized(&bytes)
    }

    /// Publish pre-serialized bytes.
    pub fn publish_serialized(&self, bytes: &[u8]) -> RclResult<()> {
        let id = self.handle.id();
        let topic = self.topic.as_str();
        let delivered = self.handle.context().mutate(|state| {
            state.check_live(id)?;
            let mut delivered = 0usize;
            for (key, record) in state.iter_mut() {
                if let EntityBody::Subscription(subscription) = &mut record.body {
                    if subscription.topic != topic {
                        continue;
                    }
                    let depth = subscription.depth;
                    if push_keep_last(&mut subscription.queue, depth, bytes.to_vec()) {
                        debug!(subscription = %key, topic, depth, "Queue full, dropped oldest message");
                    }
                    delivered += 1;
                }
            }
            Ok::<_, RclError>(delivered)
        })?;
        trace!(topic, delivered, bytes = bytes.len(), "Published");
        Ok(())
    }

    /// Number of subscriptions currently matched on the topic.
    pub fn subscription_count(&self) -> RclResult<u64> {
        let state = self.handle.context().lock();
        state.check_live(self.handle.id())?;
        Ok(state.topic_peers(EntityKind::Subscription, &self.topic))
    }

    /// Event source raised when subscriptions on the topic come and go.
    pub fn create_matched_event(&self) -> RclResult<EventHandle> {
        let current = self.subscription_count()?;
        let id = self.handle.context().insert(
            Some(self.handle.id()),
            EntityBody::Event(EventRecord {
                status: MatchedStatus {
                    total_count: current,
                    current_count: current,
                    ..MatchedStatus::default()
                },
            }),
        )?;
        Ok(EventHandle::new(self.handle.context().clone(), id))
    }

    pub fn destroy(mut self) -> RclResult<()> {
        self.handle.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RclConfig;

    #[test]
    fn test_publish_after_destroy_through_node() {
        let ctx = Context::init(RclConfig::default()).unwrap();
        let node = ctx.create_node("n", "").unwrap();
        let publisher = node.create_publisher("chatter").unwrap();
        node.destroy().unwrap();
        assert!(matches!(
            publisher.publish(&1u32),
            Err(RclError::InvalidHandle { .. })
        ));
    }

    #[test]
    fn test_subscription_count() {
        let ctx = Context::init(RclConfig::default()).unwrap();
        let node = ctx.create_node("n", "").unwrap();
        let publisher = node.create_publisher("chatter").unwrap();
        assert_eq!(publisher.subscription_count().unwrap(), 0);
        let _a = node.create_subscription("chatter").unwrap();
        let _b = node.create_subscription("/other").unwrap();
        assert_eq!(publisher.subscription_count().unwrap(), 1);
    }
}
