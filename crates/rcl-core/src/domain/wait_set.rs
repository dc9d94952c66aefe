//! # Wait Set
//!
//! Fixed-capacity, kind-partitioned collection of entity ids plus the
//! blocking wait over them.
//!
//! ## Lifecycle
//!
//! ```text
//! [ZERO_INITIALIZED] ──initialize──→ [INITIALIZED] ──add_*──→ (populated)
//!         │                               │    ↑                  │
//!         │                               │    └──── clear ───────┤
//!         │                               │                       ↓
//!         └───────── destroy ─────────────┴──── destroy ←──── wait
//!                        ↓
//!                  [DESTROYED]  every call except destroy → UseAfterFree
//! ```
//!
//! | Invariant | Enforcement |
//! |-----------|-------------|
//! | Capacity fixed at initialize | `add()` checks `ids.len() == capacity` |
//! | No reallocation on clear | `Vec::clear` keeps the reserved buffer |
//! | One source per population | `add()` compares `source_id()` |
//! | Deterministic tie-break | slots passed to the source in kind-then-slot order |
//!
//! ## Concurrency
//!
//! `wait` takes `&mut self`: one thread owns populate, wait and drain for a
//! given wait set. Distinct wait sets wait concurrently.

use crate::domain::config::RclConfig;
use crate::domain::errors::{RclError, RclResult};
use crate::domain::handles::{EntityId, EntityKind};
use crate::domain::outcomes::{ReadyEntity, WaitOutcome, WaitTimeout};
use crate::domain::shutdown::ShutdownToken;
use crate::ports::{ReadinessSource, Waitable};
use std::sync::Arc;
use tracing::{debug, trace};

/// Per-kind capacities requested at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WaitSetCapacities {
    pub subscriptions: usize,
    pub guard_conditions: usize,
    pub timers: usize,
    pub clients: usize,
    pub services: usize,
    pub events: usize,
}

impl WaitSetCapacities {
    /// Build from signed counts as received at the foreign boundary.
    ///
    /// # Errors
    /// - `InvalidArgument`: any count is negative
    pub fn from_counts(
        subscriptions: i64,
        guard_conditions: i64,
        timers: i64,
        clients: i64,
        services: i64,
        events: i64,
    ) -> RclResult<Self> {
        let convert = |kind: EntityKind, count: i64| {
            usize::try_from(count).map_err(|_| {
                RclError::InvalidArgument(format!("negative {} capacity: {}", kind, count))
            })
        };
        Ok(Self {
            subscriptions: convert(EntityKind::Subscription, subscriptions)?,
            guard_conditions: convert(EntityKind::GuardCondition, guard_conditions)?,
            timers: convert(EntityKind::Timer, timers)?,
            clients: convert(EntityKind::Client, clients)?,
            services: convert(EntityKind::Service, services)?,
            events: convert(EntityKind::Event, events)?,
        })
    }

    /// Capacity for one kind. Non-waitable kinds have none.
    #[must_use]
    pub fn get(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Subscription => self.subscriptions,
            EntityKind::GuardCondition => self.guard_conditions,
            EntityKind::Timer => self.timers,
            EntityKind::Client => self.clients,
            EntityKind::Service => self.services,
            EntityKind::Event => self.events,
            EntityKind::Node | EntityKind::Publisher => 0,
        }
    }

    /// Sum over all kinds.
    #[must_use]
    pub fn total(&self) -> usize {
        EntityKind::WAITABLE.iter().map(|kind| self.get(*kind)).sum()
    }
}

struct KindSlots {
    kind: EntityKind,
    capacity: usize,
    ids: Vec<EntityId>,
    ready: Vec<bool>,
}

impl KindSlots {
    fn reserve(kind: EntityKind, capacity: usize) -> RclResult<Self> {
        let exhausted = |_| RclError::ResourceExhausted {
            kind,
            requested: capacity,
        };
        let mut ids = Vec::new();
        ids.try_reserve_exact(capacity).map_err(exhausted)?;
        let mut ready = Vec::new();
        ready.try_reserve_exact(capacity).map_err(exhausted)?;
        Ok(Self {
            kind,
            capacity,
            ids,
            ready,
        })
    }
}

struct Storage {
    slots: Vec<KindSlots>,
    source: Option<Arc<dyn ReadinessSource>>,
}

impl Storage {
    fn slots_for(&self, kind: EntityKind) -> RclResult<&KindSlots> {
        kind.wait_set_index()
            .map(|index| &self.slots[index])
            .ok_or_else(|| RclError::InvalidArgument(format!("{} is not waitable", kind)))
    }

    fn filled(&self) -> usize {
        self.slots.iter().map(|s| s.ids.len()).sum()
    }
}

enum Lifecycle {
    ZeroInitialized,
    Initialized(Storage),
    Destroyed,
}

/// A wait set. See the module docs for the lifecycle.
pub struct WaitSet {
    lifecycle: Lifecycle,
    max_capacity: usize,
}

impl WaitSet {
    /// Zero-initialized wait set with no storage.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_capacity(RclConfig::default().max_wait_set_capacity)
    }

    /// Zero-initialized wait set refusing per-kind capacities above `max_capacity`.
    #[must_use]
    pub fn with_max_capacity(max_capacity: usize) -> Self {
        Self {
            lifecycle: Lifecycle::ZeroInitialized,
            max_capacity,
        }
    }

    /// Reserve storage for the given capacities.
    ///
    /// # Errors
    /// - `ResourceExhausted`: a capacity is above the limit or cannot be allocated
    /// - `InvalidState`: already initialized
    /// - `UseAfterFree`: destroyed
    pub fn initialize(&mut self, capacities: WaitSetCapacities) -> RclResult<()> {
        match self.lifecycle {
            Lifecycle::Destroyed => return Err(RclError::UseAfterFree),
            Lifecycle::Initialized(_) => {
                return Err(RclError::InvalidState(
                    "wait set already initialized".to_string(),
                ))
            }
            Lifecycle::ZeroInitialized => {}
        }

        let mut slots = Vec::with_capacity(EntityKind::WAITABLE.len());
        for kind in EntityKind::WAITABLE {
            let requested = capacities.get(kind);
            if requested > self.max_capacity {
                return Err(RclError::ResourceExhausted { kind, requested });
            }
            slots.push(KindSlots::reserve(kind, requested)?);
        }

        self.lifecycle = Lifecycle::Initialized(Storage {
            slots,
            source: None,
        });
        debug!(
            subscriptions = capacities.subscriptions,
            guard_conditions = capacities.guard_conditions,
            timers = capacities.timers,
            clients = capacities.clients,
            services = capacities.services,
            events = capacities.events,
            "Wait set initialized"
        );
        Ok(())
    }

    /// Reset fill counts and readiness, keeping capacities and storage.
    pub fn clear(&mut self) -> RclResult<()> {
        let storage = self.storage_mut()?;
        for slots in &mut storage.slots {
            slots.ids.clear();
            slots.ready.clear();
        }
        storage.source = None;
        trace!("Wait set cleared");
        Ok(())
    }

    pub fn add_subscription(&mut self, subscription: &impl Waitable) -> RclResult<usize> {
        self.add(EntityKind::Subscription, subscription)
    }

    pub fn add_guard_condition(&mut self, guard_condition: &impl Waitable) -> RclResult<usize> {
        self.add(EntityKind::GuardCondition, guard_condition)
    }

    pub fn add_timer(&mut self, timer: &impl Waitable) -> RclResult<usize> {
        self.add(EntityKind::Timer, timer)
    }

    pub fn add_client(&mut self, client: &impl Waitable) -> RclResult<usize> {
        self.add(EntityKind::Client, client)
    }

    pub fn add_service(&mut self, service: &impl Waitable) -> RclResult<usize> {
        self.add(EntityKind::Service, service)
    }

    pub fn add_event(&mut self, event: &impl Waitable) -> RclResult<usize> {
        self.add(EntityKind::Event, event)
    }

    /// Append `entity` into the next free slot of `kind`; returns the slot index.
    ///
    /// # Errors
    /// - `CapacityExceeded`: all slots of `kind` are filled
    /// - `InvalidHandle`: the entity is destroyed or of another kind
    /// - `InvalidArgument`: the entity belongs to a different context
    pub fn add(&mut self, kind: EntityKind, entity: &(impl Waitable + ?Sized)) -> RclResult<usize> {
        let storage = self.storage_mut()?;
        let index = kind
            .wait_set_index()
            .ok_or_else(|| RclError::InvalidArgument(format!("{} is not waitable", kind)))?;

        let id = entity.entity_id();
        if id.kind() != kind {
            return Err(RclError::invalid_handle(
                kind,
                format!("expected a {}, got a {}", kind, id.kind()),
            ));
        }

        let source = entity.readiness_source();
        if let Some(bound) = &storage.source {
            if bound.source_id() != source.source_id() {
                return Err(RclError::InvalidArgument(
                    "entity belongs to a different context than this wait set".to_string(),
                ));
            }
        }
        source.check_live(id)?;

        let slots = &mut storage.slots[index];
        if slots.ids.len() == slots.capacity {
            return Err(RclError::CapacityExceeded {
                kind,
                capacity: slots.capacity,
            });
        }

        let slot = slots.ids.len();
        slots.ids.push(id);
        slots.ready.push(false);
        if storage.source.is_none() {
            storage.source = Some(source);
        }

        trace!(entity = %id, slot, "Added to wait set");
        Ok(slot)
    }

    /// Block until an added entity is ready, the timeout elapses, or
    /// `shutdown` fires.
    ///
    /// Readiness flags of every added slot are recomputed; flags of unfilled
    /// slots stay unset.
    ///
    /// # Errors
    /// - `InvalidArgument`: nothing was added
    /// - `InvalidHandle`: an added entity was destroyed since it was added
    /// - `InvalidState` / `UseAfterFree`: lifecycle violations
    pub fn wait(
        &mut self,
        timeout: WaitTimeout,
        shutdown: &ShutdownToken,
    ) -> RclResult<WaitOutcome> {
        let storage = self.storage_mut()?;
        let source = match (&storage.source, storage.filled()) {
            (Some(source), filled) if filled > 0 => Arc::clone(source),
            _ => {
                return Err(RclError::InvalidArgument(
                    "wait set is empty".to_string(),
                ))
            }
        };

        for slots in &mut storage.slots {
            slots.ready.iter_mut().for_each(|flag| *flag = false);
        }

        let outcome = {
            let request: Vec<(EntityKind, &[EntityId])> = storage
                .slots
                .iter()
                .map(|slots| (slots.kind, slots.ids.as_slice()))
                .collect();
            source.wait_any(&request, timeout, shutdown)?
        };

        for entry in outcome.ready() {
            if let Some(flag) = entry
                .kind
                .wait_set_index()
                .and_then(|index| storage.slots[index].ready.get_mut(entry.slot))
            {
                *flag = true;
            }
        }

        match &outcome {
            WaitOutcome::Ready(entries) => debug!(ready = entries.len(), "Wait returned ready"),
            WaitOutcome::Timeout => trace!("Wait timed out"),
            WaitOutcome::Interrupted => debug!("Wait interrupted by shutdown"),
        }
        Ok(outcome)
    }

    /// Whether `slot` of `kind` was reported ready by the last wait.
    pub fn is_ready(&self, kind: EntityKind, slot: usize) -> RclResult<bool> {
        let slots = self.storage()?.slots_for(kind)?;
        if slot >= slots.capacity {
            return Err(RclError::InvalidArgument(format!(
                "{} slot {} out of range (capacity {})",
                kind, slot, slots.capacity
            )));
        }
        Ok(slots.ready.get(slot).copied().unwrap_or(false))
    }

    /// Every slot flagged ready, in kind-then-slot order.
    pub fn ready_entities(&self) -> RclResult<Vec<ReadyEntity>> {
        let storage = self.storage()?;
        let mut entries = Vec::new();
        for slots in &storage.slots {
            for (slot, (id, ready)) in slots.ids.iter().zip(&slots.ready).enumerate() {
                if *ready {
                    entries.push(ReadyEntity {
                        kind: slots.kind,
                        slot,
                        id: *id,
                    });
                }
            }
        }
        Ok(entries)
    }

    /// Number of slots flagged ready by the last wait.
    pub fn ready_count(&self) -> RclResult<usize> {
        Ok(self
            .storage()?
            .slots
            .iter()
            .map(|slots| slots.ready.iter().filter(|ready| **ready).count())
            .sum())
    }

    /// Entity registered in `slot` of `kind`, if filled.
    pub fn entity_at(&self, kind: EntityKind, slot: usize) -> RclResult<Option<EntityId>> {
        Ok(self.storage()?.slots_for(kind)?.ids.get(slot).copied())
    }

    /// Current fill count of `kind`.
    pub fn size(&self, kind: EntityKind) -> RclResult<usize> {
        Ok(self.storage()?.slots_for(kind)?.ids.len())
    }

    /// Capacity of `kind` fixed at initialization.
    pub fn capacity(&self, kind: EntityKind) -> RclResult<usize> {
        Ok(self.storage()?.slots_for(kind)?.capacity)
    }

    /// Whether `initialize` succeeded and `destroy` was not called.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Initialized(_))
    }

    /// Whether `destroy` was called.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Destroyed)
    }

    /// Release all storage. Idempotent.
    pub fn destroy(&mut self) {
        if !self.is_destroyed() {
            trace!("Wait set destroyed");
        }
        self.lifecycle = Lifecycle::Destroyed;
    }

    fn storage(&self) -> RclResult<&Storage> {
        match &self.lifecycle {
            Lifecycle::Initialized(storage) => Ok(storage),
            Lifecycle::ZeroInitialized => Err(RclError::InvalidState(
                "wait set not initialized".to_string(),
            )),
            Lifecycle::Destroyed => Err(RclError::UseAfterFree),
        }
    }

    fn storage_mut(&mut self) -> RclResult<&mut Storage> {
        match &mut self.lifecycle {
            Lifecycle::Initialized(storage) => Ok(storage),
            Lifecycle::ZeroInitialized => Err(RclError::InvalidState(
                "wait set not initialized".to_string(),
            )),
            Lifecycle::Destroyed => Err(RclError::UseAfterFree),
        }
    }
}

impl Default for WaitSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::registry::Arena;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// In-memory source: readiness is whatever the test marks.
    struct FakeSource {
        id: u64,
        ready: Mutex<HashSet<EntityId>>,
        live: Mutex<HashSet<EntityId>>,
    }

    impl FakeSource {
        fn new(id: u64) -> Arc<Self> {
            Arc::new(Self {
                id,
                ready: Mutex::new(HashSet::new()),
                live: Mutex::new(HashSet::new()),
            })
        }
    }

    impl ReadinessSource for FakeSource {
        fn source_id(&self) -> u64 {
            self.id
        }

        fn check_live(&self, id: EntityId) -> RclResult<()> {
            if self.live.lock().contains(&id) {
                Ok(())
            } else {
                Err(RclError::invalid_handle(id.kind(), "destroyed"))
            }
        }

        fn wait_any(
            &self,
            slots: &[(EntityKind, &[EntityId])],
            _timeout: WaitTimeout,
            shutdown: &ShutdownToken,
        ) -> RclResult<WaitOutcome> {
            if shutdown.is_triggered() {
                return Ok(WaitOutcome::Interrupted);
            }
            let ready = self.ready.lock();
            let mut entries = Vec::new();
            for (kind, ids) in slots {
                for (slot, id) in ids.iter().enumerate() {
                    self.check_live(*id)?;
                    if ready.contains(id) {
                        entries.push(ReadyEntity {
                            kind: *kind,
                            slot,
                            id: *id,
                        });
                    }
                }
            }
            if entries.is_empty() {
                Ok(WaitOutcome::Timeout)
            } else {
                Ok(WaitOutcome::Ready(entries))
            }
        }
    }

    struct FakeEntity {
        id: EntityId,
        source: Arc<FakeSource>,
    }

    impl Waitable for FakeEntity {
        fn entity_id(&self) -> EntityId {
            self.id
        }

        fn readiness_source(&self) -> Arc<dyn ReadinessSource> {
            self.source.clone()
        }
    }

    fn spawn(arena: &mut Arena<()>, source: &Arc<FakeSource>, kind: EntityKind) -> FakeEntity {
        let id = EntityId::new(arena.insert(()), kind);
        source.live.lock().insert(id);
        FakeEntity {
            id,
            source: source.clone(),
        }
    }

    fn caps(n: usize) -> WaitSetCapacities {
        WaitSetCapacities {
            subscriptions: n,
            guard_conditions: n,
            timers: n,
            clients: n,
            services: n,
            events: n,
        }
    }

    #[test]
    fn test_negative_count_rejected() {
        let result = WaitSetCapacities::from_counts(1, 0, -1, 0, 0, 0);
        assert!(matches!(result, Err(RclError::InvalidArgument(_))));
    }

    #[test]
    fn test_operations_before_initialize() {
        let mut ws = WaitSet::new();
        assert!(matches!(ws.clear(), Err(RclError::InvalidState(_))));
        assert!(matches!(
            ws.wait(WaitTimeout::Poll, &ShutdownToken::new()),
            Err(RclError::InvalidState(_))
        ));
    }

    #[test]
    fn test_destroy_without_initialize() {
        let mut ws = WaitSet::new();
        ws.destroy();
        ws.destroy();
        assert!(ws.is_destroyed());
        assert_eq!(ws.clear(), Err(RclError::UseAfterFree));
    }

    #[test]
    fn test_double_initialize_rejected() {
        let mut ws = WaitSet::new();
        ws.initialize(caps(1)).unwrap();
        assert!(matches!(
            ws.initialize(caps(1)),
            Err(RclError::InvalidState(_))
        ));
    }

    #[test]
    fn test_capacity_above_limit_is_resource_exhausted() {
        let mut ws = WaitSet::with_max_capacity(8);
        let result = ws.initialize(WaitSetCapacities {
            timers: 9,
            ..WaitSetCapacities::default()
        });
        assert_eq!(
            result,
            Err(RclError::ResourceExhausted {
                kind: EntityKind::Timer,
                requested: 9
            })
        );
        assert!(!ws.is_initialized());
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut arena = Arena::new();
        let source = FakeSource::new(1);
        let mut ws = WaitSet::new();
        ws.initialize(caps(2)).unwrap();

        for expected in 0..2 {
            let sub = spawn(&mut arena, &source, EntityKind::Subscription);
            assert_eq!(ws.add_subscription(&sub).unwrap(), expected);
        }
        let extra = spawn(&mut arena, &source, EntityKind::Subscription);
        assert_eq!(
            ws.add_subscription(&extra),
            Err(RclError::CapacityExceeded {
                kind: EntityKind::Subscription,
                capacity: 2
            })
        );
        // Other kinds are independent
        let timer = spawn(&mut arena, &source, EntityKind::Timer);
        assert!(ws.add_timer(&timer).is_ok());
    }

    #[test]
    fn test_kind_mismatch_is_invalid_handle() {
        let mut arena = Arena::new();
        let source = FakeSource::new(1);
        let mut ws = WaitSet::new();
        ws.initialize(caps(1)).unwrap();

        let timer = spawn(&mut arena, &source, EntityKind::Timer);
        assert!(matches!(
            ws.add_subscription(&timer),
            Err(RclError::InvalidHandle { .. })
        ));
    }

    #[test]
    fn test_foreign_source_rejected() {
        let mut arena = Arena::new();
        let a = FakeSource::new(1);
        let b = FakeSource::new(2);
        let mut ws = WaitSet::new();
        ws.initialize(caps(2)).unwrap();

        ws.add_subscription(&spawn(&mut arena, &a, EntityKind::Subscription))
            .unwrap();
        let foreign = spawn(&mut arena, &b, EntityKind::Subscription);
        assert!(matches!(
            ws.add_subscription(&foreign),
            Err(RclError::InvalidArgument(_))
        ));

        // After clear the set can be repopulated from another source
        ws.clear().unwrap();
        assert!(ws.add_subscription(&foreign).is_ok());
    }

    #[test]
    fn test_stale_entity_rejected_on_add() {
        let mut arena = Arena::new();
        let source = FakeSource::new(1);
        let mut ws = WaitSet::new();
        ws.initialize(caps(1)).unwrap();

        let sub = spawn(&mut arena, &source, EntityKind::Subscription);
        source.live.lock().remove(&sub.id);
        assert!(matches!(
            ws.add_subscription(&sub),
            Err(RclError::InvalidHandle { .. })
        ));
    }

    #[test]
    fn test_empty_wait_rejected() {
        let mut ws = WaitSet::new();
        ws.initialize(caps(1)).unwrap();
        assert!(matches!(
            ws.wait(WaitTimeout::Poll, &ShutdownToken::new()),
            Err(RclError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_ready_flags_follow_last_wait() {
        let mut arena = Arena::new();
        let source = FakeSource::new(1);
        let mut ws = WaitSet::new();
        ws.initialize(caps(2)).unwrap();

        let sub = spawn(&mut arena, &source, EntityKind::Subscription);
        let client = spawn(&mut arena, &source, EntityKind::Client);
        ws.add_subscription(&sub).unwrap();
        ws.add_client(&client).unwrap();

        source.ready.lock().insert(client.id);
        let outcome = ws.wait(WaitTimeout::Poll, &ShutdownToken::new()).unwrap();
        assert_eq!(outcome.ready().len(), 1);
        assert_eq!(ws.ready_count().unwrap(), 1);
        assert!(ws.is_ready(EntityKind::Client, 0).unwrap());
        assert!(!ws.is_ready(EntityKind::Subscription, 0).unwrap());
        // Unfilled slot stays unset
        assert!(!ws.is_ready(EntityKind::Client, 1).unwrap());
        assert!(ws.is_ready(EntityKind::Client, 2).is_err());

        source.ready.lock().clear();
        let outcome = ws.wait(WaitTimeout::Poll, &ShutdownToken::new()).unwrap();
        assert_eq!(outcome, WaitOutcome::Timeout);
        assert!(!ws.is_ready(EntityKind::Client, 0).unwrap());
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut arena = Arena::new();
        let source = FakeSource::new(1);
        let mut ws = WaitSet::new();
        ws.initialize(caps(3)).unwrap();

        for _ in 0..5 {
            for _ in 0..3 {
                ws.add_service(&spawn(&mut arena, &source, EntityKind::Service))
                    .unwrap();
            }
            assert_eq!(ws.size(EntityKind::Service).unwrap(), 3);
            ws.clear().unwrap();
            assert_eq!(ws.size(EntityKind::Service).unwrap(), 0);
            assert_eq!(ws.capacity(EntityKind::Service).unwrap(), 3);
        }
    }

    #[test]
    fn test_interrupted_is_not_timeout() {
        let mut arena = Arena::new();
        let source = FakeSource::new(1);
        let mut ws = WaitSet::new();
        ws.initialize(caps(1)).unwrap();
        ws.add_guard_condition(&spawn(&mut arena, &source, EntityKind::GuardCondition))
            .unwrap();

        let token = ShutdownToken::new();
        token.trigger();
        assert_eq!(
            ws.wait(WaitTimeout::Infinite, &token).unwrap(),
            WaitOutcome::Interrupted
        );
    }

    #[test]
    fn test_every_operation_after_destroy() {
        let mut arena = Arena::new();
        let source = FakeSource::new(1);
        let sub = spawn(&mut arena, &source, EntityKind::Subscription);
        let mut ws = WaitSet::new();
        ws.initialize(caps(1)).unwrap();
        ws.add_subscription(&sub).unwrap();
        ws.destroy();

        assert_eq!(ws.initialize(caps(1)), Err(RclError::UseAfterFree));
        assert_eq!(ws.clear(), Err(RclError::UseAfterFree));
        assert_eq!(ws.add_subscription(&sub), Err(RclError::UseAfterFree));
        assert_eq!(
            ws.wait(WaitTimeout::Poll, &ShutdownToken::new()),
            Err(RclError::UseAfterFree)
        );
        assert_eq!(
            ws.is_ready(EntityKind::Subscription, 0),
            Err(RclError::UseAfterFree)
        );
        assert_eq!(ws.size(EntityKind::Subscription), Err(RclError::UseAfterFree));
        assert!(ws.ready_entities().is_err());
    }
}
