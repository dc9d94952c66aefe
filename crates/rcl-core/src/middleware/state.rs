//! # Middleware State
//!
//! Every entity of one context lives in a single generation-checked arena,
//! guarded by the context mutex. Handles and wait sets refer to records by
//! [`EntityId`] only.
//!
//! ## Readiness
//!
//! | Kind | Ready when | Cleared by |
//! |------|------------|------------|
//! | Subscription | message queue non-empty | `take` |
//! | Guard condition | triggered | the wait that reports it |
//! | Timer | not canceled and `now >= next_call` | `call` |
//! | Client | response queue non-empty | `take_response` |
//! | Service | request queue non-empty | `take_request` |
//! | Event | matched-status change pending | `take` |

use crate::domain::{
    Arena, ArenaKey, Clock, EntityId, EntityKind, MatchedStatus, ParameterStore, ReadyEntity,
    RclError, RclResult, RequestHeader, WriterGuid,
};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub(crate) struct NodeRecord {
    pub(crate) name: String,
    pub(crate) namespace: String,
    pub(crate) parameters: ParameterStore,
}

pub(crate) struct PublisherRecord {
    pub(crate) topic: String,
}

pub(crate) struct SubscriptionRecord {
    pub(crate) topic: String,
    pub(crate) depth: usize,
    pub(crate) queue: VecDeque<Vec<u8>>,
}

pub(crate) struct GuardRecord {
    pub(crate) triggered: bool,
}

pub(crate) struct TimerRecord {
    pub(crate) clock: Clock,
    pub(crate) period: i64,
    pub(crate) next_call: i64,
    pub(crate) canceled: bool,
}

impl TimerRecord {
    fn is_ready(&self) -> RclResult<bool> {
        if self.canceled {
            return Ok(false);
        }
        Ok(self.clock.now()?.nanoseconds >= self.next_call)
    }

    /// Instant at which the timer becomes due, if its clock advances on its own.
    fn wake_deadline(&self) -> RclResult<Option<Instant>> {
        if self.canceled || self.clock.is_frozen() {
            return Ok(None);
        }
        let remaining = self.next_call.saturating_sub(self.clock.now()?.nanoseconds);
        let remaining = Duration::from_nanos(u64::try_from(remaining).unwrap_or(0));
        Ok(Instant::now().checked_add(remaining))
    }
}

pub(crate) struct ClientRecord {
    pub(crate) service_name: String,
    pub(crate) guid: WriterGuid,
    pub(crate) next_sequence: i64,
    pub(crate) depth: usize,
    pub(crate) responses: VecDeque<(RequestHeader, Vec<u8>)>,
}

pub(crate) struct ServiceRecord {
    pub(crate) service_name: String,
    pub(crate) depth: usize,
    pub(crate) requests: VecDeque<(RequestHeader, Vec<u8>)>,
}

pub(crate) struct EventRecord {
    pub(crate) status: MatchedStatus,
}

pub(crate) enum EntityBody {
    Node(NodeRecord),
    Publisher(PublisherRecord),
    Subscription(SubscriptionRecord),
    GuardCondition(GuardRecord),
    Timer(TimerRecord),
    Client(ClientRecord),
    Service(ServiceRecord),
    Event(EventRecord),
}

impl EntityBody {
    pub(crate) fn kind(&self) -> EntityKind {
        match self {
            Self::Node(_) => EntityKind::Node,
            Self::Publisher(_) => EntityKind::Publisher,
            Self::Subscription(_) => EntityKind::Subscription,
            Self::GuardCondition(_) => EntityKind::GuardCondition,
            Self::Timer(_) => EntityKind::Timer,
            Self::Client(_) => EntityKind::Client,
            Self::Service(_) => EntityKind::Service,
            Self::Event(_) => EntityKind::Event,
        }
    }

    /// Topic this record publishes or subscribes to, if any.
    fn topic(&self) -> Option<&str> {
        match self {
            Self::Publisher(publisher) => Some(&publisher.topic),
            Self::Subscription(subscription) => Some(&subscription.topic),
            _ => None,
        }
    }
}

pub(crate) struct EntityRecord {
    /// Owning entity: the node for most kinds, the publisher or subscription
    /// for events, none for context-level guard conditions.
    pub(crate) parent: Option<ArenaKey>,
    pub(crate) body: EntityBody,
}

/// Result of one readiness scan.
pub(crate) struct Scan {
    pub(crate) ready: Vec<ReadyEntity>,
    pub(crate) next_deadline: Option<Instant>,
}

#[derive(Default)]
pub(crate) struct MiddlewareState {
    entities: Arena<EntityRecord>,
}

/// Push into a keep-last queue, dropping the oldest entry when full.
pub(crate) fn push_keep_last<T>(queue: &mut VecDeque<T>, depth: usize, item: T) -> bool {
    let dropped = if queue.len() >= depth {
        queue.pop_front();
        true
    } else {
        false
    };
    queue.push_back(item);
    dropped
}

impl MiddlewareState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Store a record and report the topic match it causes.
    pub(crate) fn insert(&mut self, parent: Option<ArenaKey>, body: EntityBody) -> EntityId {
        let kind = body.kind();
        let topic = body.topic().map(str::to_string);
        let key = self.entities.insert(EntityRecord { parent, body });
        let id = EntityId::new(key, kind);
        if let Some(topic) = topic {
            self.peer_changed(key, kind, &topic, true);
        }
        trace!(entity = %id, "Entity created");
        id
    }

    pub(crate) fn record(&self, id: EntityId) -> RclResult<&EntityRecord> {
        match self.entities.get(id.key()) {
            Some(record) if record.body.kind() == id.kind() => Ok(record),
            Some(_) => Err(RclError::invalid_handle(id.kind(), "kind mismatch")),
            None => Err(RclError::invalid_handle(
                id.kind(),
                format!("{} no longer exists", id),
            )),
        }
    }

    pub(crate) fn body_mut(&mut self, id: EntityId) -> RclResult<&mut EntityBody> {
        self.record(id)?;
        self.entities
            .get_mut(id.key())
            .map(|record| &mut record.body)
            .ok_or_else(|| RclError::invalid_handle(id.kind(), "no longer exists"))
    }

    pub(crate) fn check_live(&self, id: EntityId) -> RclResult<()> {
        self.record(id).map(|_| ())
    }

    /// Remove `id` and everything it owns. Returns the number of records removed.
    pub(crate) fn remove(&mut self, id: EntityId) -> RclResult<usize> {
        self.record(id)?;

        let mut doomed = vec![id.key()];
        let mut cursor = 0;
        while cursor < doomed.len() {
            let owner = doomed[cursor];
            doomed.extend(
                self.entities
                    .iter()
                    .filter(|(_, record)| record.parent == Some(owner))
                    .map(|(key, _)| key),
            );
            cursor += 1;
        }

        let mut removed = 0;
        for key in doomed {
            if let Some(record) = self.entities.remove(key) {
                if let Some(topic) = record.body.topic() {
                    self.peer_changed(key, record.body.kind(), topic, false);
                }
                removed += 1;
            }
        }
        debug!(entity = %id, removed, "Entity destroyed");
        Ok(removed)
    }

    /// Apply a publisher/subscription (un)match on `topic` to the matched
    /// events of the opposite side.
    fn peer_changed(&mut self, origin: ArenaKey, kind: EntityKind, topic: &str, matched: bool) {
        let peer_kind = match kind {
            EntityKind::Publisher => EntityKind::Subscription,
            EntityKind::Subscription => EntityKind::Publisher,
            _ => return,
        };
        let peers: Vec<ArenaKey> = self
            .entities
            .iter()
            .filter(|(key, record)| {
                *key != origin
                    && record.body.kind() == peer_kind
                    && record.body.topic() == Some(topic)
            })
            .map(|(key, _)| key)
            .collect();

        for (_, record) in self.entities.iter_mut() {
            let attached = record.parent.is_some_and(|parent| peers.contains(&parent));
            if let (true, EntityBody::Event(event)) = (attached, &mut record.body) {
                if matched {
                    event.status.peer_matched();
                } else {
                    event.status.peer_unmatched();
                }
            }
        }
    }

    /// Number of live records of `kind` on `topic`.
    pub(crate) fn topic_peers(&self, kind: EntityKind, topic: &str) -> u64 {
        self.entities
            .iter()
            .filter(|(_, record)| record.body.kind() == kind && record.body.topic() == Some(topic))
            .count() as u64
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (ArenaKey, &EntityRecord)> {
        self.entities.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (ArenaKey, &mut EntityRecord)> {
        self.entities.iter_mut()
    }

    pub(crate) fn len(&self) -> usize {
        self.entities.len()
    }

    /// Evaluate readiness of every listed slot.
    ///
    /// Every id is validated before any guard condition is consumed, so a
    /// failing scan leaves state untouched.
    pub(crate) fn scan(&mut self, slots: &[(EntityKind, &[EntityId])]) -> RclResult<Scan> {
        for (_, ids) in slots {
            for id in ids.iter() {
                self.check_live(*id)?;
            }
        }

        let mut ready = Vec::new();
        let mut next_deadline: Option<Instant> = None;
        for (kind, ids) in slots {
            for (slot, id) in ids.iter().enumerate() {
                let is_ready = match self.body_mut(*id)? {
                    EntityBody::Subscription(subscription) => !subscription.queue.is_empty(),
                    EntityBody::GuardCondition(guard) => guard.triggered,
                    EntityBody::Timer(timer) => {
                        if let Some(deadline) = timer.wake_deadline()? {
                            next_deadline = Some(next_deadline.map_or(deadline, |d| d.min(deadline)));
                        }
                        timer.is_ready()?
                    }
                    EntityBody::Client(client) => !client.responses.is_empty(),
                    EntityBody::Service(service) => !service.requests.is_empty(),
                    EntityBody::Event(event) => event.status.has_changes(),
                    EntityBody::Node(_) | EntityBody::Publisher(_) => false,
                };
                if is_ready {
                    ready.push(ReadyEntity {
                        kind: *kind,
                        slot,
                        id: *id,
                    });
                }
            }
        }

        if !ready.is_empty() {
            for entry in &ready {
                if let Ok(EntityBody::GuardCondition(guard)) = self.body_mut(entry.id) {
                    guard.triggered = false;
                }
            }
        }

        Ok(Scan {
            ready,
            next_deadline,
        })
    }
}
