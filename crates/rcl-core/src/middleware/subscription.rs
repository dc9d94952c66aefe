//! Subscriptions: keep-last queues of serialized messages drained by `take`.

use crate::domain::{
    EntityId, EntityKind, MatchedStatus, RclError, RclResult, TakeStatus,
};
use crate::middleware::context::{Context, EntityHandle};
use crate::middleware::event::EventHandle;
use crate::middleware::state::{EntityBody, EventRecord};
use crate::ports::{ReadinessSource, Waitable};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::trace;

pub struct Subscription {
    handle: EntityHandle,
    topic: String,
}

impl Subscription {
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

    /// Drain one message into `message`.
    ///
    /// A message that fails to deserialize is consumed and reported as `Failed`.
    pub fn take<M: DeserializeOwned>(&self, message: &mut M) -> RclResult<TakeStatus> {
        match self.take_raw(None)? {
            Some(bytes) => {
                *message = bincode::deserialize(&bytes)?;
                Ok(TakeStatus::Taken)
            }
            None => Ok(TakeStatus::NoDataAvailable),
        }
    }

    /// Drain one message as raw bytes, replacing the contents of `buffer`.
    pub fn take_serialized(&self, buffer: &mut Vec<u8>) -> RclResult<TakeStatus> {
        match self.take_raw(None)? {
            Some(bytes) => {
                *buffer = bytes;
                Ok(TakeStatus::Taken)
            }
            None => Ok(TakeStatus::NoDataAvailable),
        }
    }

    /// Pop the oldest message. With `limit`, a message longer than `limit`
    /// stays queued and the call fails with `InvalidArgument`.
    pub(crate) fn take_raw(&self, limit: Option<usize>) -> RclResult<Option<Vec<u8>>> {
        let id = self.handle.id();
        let mut state = self.handle.context().lock();
        let EntityBody::Subscription(subscription) = state.body_mut(id)? else {
            return Err(RclError::invalid_handle(EntityKind::Subscription, "not a subscription"));
        };
        match (subscription.queue.front().map(Vec::len), limit) {
            (None, _) => Ok(None),
            (Some(len), Some(limit)) if len > limit => Err(RclError::InvalidArgument(format!(
                "buffer of {} bytes too small for {}-byte message",
                limit, len
            ))),
            _ => {
                let bytes = subscription.queue.pop_front();
                trace!(topic = %self.topic, remaining = subscription.queue.len(), "Took message");
                Ok(bytes)
            }
        }
    }

    /// Number of publishers currently matched on the topic.
    pub fn publisher_count(&self) -> RclResult<u64> {
        let state = self.handle.context().lock();
        state.check_live(self.handle.id())?;
        Ok(state.topic_peers(EntityKind::Publisher, &self.topic))
    }

    /// Event source raised when publishers on the topic come and go.
    pub fn create_matched_event(&self) -> RclResult<EventHandle> {
        let current = self.publisher_count()?;
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

impl Waitable for Subscription {
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
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Chatter {
        data: String,
    }

    #[test]
    fn test_take_typed_and_empty() {
        let ctx = Context::init(RclConfig::default()).unwrap();
        let node = ctx.create_node("n", "").unwrap();
        let publisher = node.create_publisher("chatter").unwrap();
        let subscription = node.create_subscription("chatter").unwrap();

        publisher
            .publish(&Chatter {
                data: "hello".into(),
            })
            .unwrap();

        let mut message = Chatter::default();
        assert_eq!(subscription.take(&mut message).unwrap(), TakeStatus::Taken);
        assert_eq!(message.data, "hello");
        assert_eq!(
            subscription.take(&mut message).unwrap(),
            TakeStatus::NoDataAvailable
        );
    }

    #[test]
    fn test_undecodable_message_is_consumed() {
        let ctx = Context::init(RclConfig::default()).unwrap();
        let node = ctx.create_node("n", "").unwrap();
        let publisher = node.create_publisher("chatter").unwrap();
        let subscription = node.create_subscription("chatter").unwrap();

        publisher.publish_serialized(&[0xff]).unwrap();
        let mut message = Chatter::default();
        assert!(matches!(
            subscription.take(&mut message),
            Err(RclError::Failed(_))
        ));
        assert_eq!(
            subscription.take(&mut message).unwrap(),
            TakeStatus::NoDataAvailable
        );
    }

    #[test]
    fn test_bounded_take_keeps_message() {
        let ctx = Context::init(RclConfig::default()).unwrap();
        let node = ctx.create_node("n", "").unwrap();
        let publisher = node.create_publisher("chatter").unwrap();
        let subscription = node.create_subscription("chatter").unwrap();

        publisher.publish_serialized(&[1, 2, 3, 4]).unwrap();
        assert!(subscription.take_raw(Some(2)).is_err());
        assert_eq!(subscription.take_raw(Some(4)).unwrap(), Some(vec![1, 2, 3, 4]));
    }
}
