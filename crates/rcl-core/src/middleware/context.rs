//! # Context
//!
//! One context is one simulated middleware process: it owns every entity
//! created through it, routes messages between them and implements the
//! blocking wait.
//!
//! ```text
//!  publish / send_request / send_response / trigger / override / destroy
//!                              │
//!                              ↓
//!        ┌───────── Mutex<MiddlewareState> ─────────┐
//!        │  Arena<EntityRecord>                     │
//!        └──────────────────────────────────────────┘
//!                              │ notify_all
//!                              ↓
//!        Condvar ──→ wait_any (one per waiting wait set)
//!                              ↑
//!        ShutdownToken::trigger ┘ (registered listener)
//! ```
//!
//! Waits hold the state lock only while scanning; different wait sets on the
//! same context block concurrently on the same condvar.

use crate::domain::{
    Clock, ClockType, EntityId, EntityKind, ParameterStore, RclConfig, RclError, RclResult,
    ShutdownListener, ShutdownToken, TimeJumpObserver, WaitOutcome, WaitSet, WaitTimeout,
};
use crate::middleware::guard::GuardCondition;
use crate::middleware::names;
use crate::middleware::node::Node;
use crate::middleware::state::{EntityBody, GuardRecord, MiddlewareState, NodeRecord};
use crate::ports::ReadinessSource;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, info};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct ContextShared {
    id: u64,
    config: RclConfig,
    state: Mutex<MiddlewareState>,
    changed: Condvar,
    shutdown: ShutdownToken,
    ros_clock: Clock,
    self_ref: Weak<ContextShared>,
}

impl ContextShared {
    fn wake_all(&self) {
        // Taking the lock orders the wake after any waiter's last scan
        let _state = self.state.lock();
        self.changed.notify_all();
    }

    fn as_listener(&self) -> Option<Arc<dyn ShutdownListener>> {
        self.self_ref
            .upgrade()
            .map(|shared| shared as Arc<dyn ShutdownListener>)
    }
}

impl ShutdownListener for ContextShared {
    fn on_shutdown(&self) {
        self.wake_all();
    }
}

impl TimeJumpObserver for ContextShared {
    fn on_time_jump(&self) {
        self.wake_all();
    }
}

impl ReadinessSource for ContextShared {
    fn source_id(&self) -> u64 {
        self.id
    }

    fn check_live(&self, id: EntityId) -> RclResult<()> {
        self.state.lock().check_live(id)
    }

    fn wait_any(
        &self,
        slots: &[(EntityKind, &[EntityId])],
        timeout: WaitTimeout,
        shutdown: &ShutdownToken,
    ) -> RclResult<WaitOutcome> {
        if let Some(listener) = self.as_listener() {
            shutdown.register(&listener);
        }

        let started = Instant::now();
        let deadline = match timeout {
            WaitTimeout::Poll => Some(started),
            WaitTimeout::After(duration) => started.checked_add(duration),
            WaitTimeout::Infinite => None,
        };

        let mut state = self.state.lock();
        loop {
            if shutdown.is_triggered() || self.shutdown.is_triggered() {
                return Ok(WaitOutcome::Interrupted);
            }

            let scan = state.scan(slots)?;
            if !scan.ready.is_empty() {
                return Ok(WaitOutcome::Ready(scan.ready));
            }

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                return Ok(WaitOutcome::Timeout);
            }

            let wake_at = match (deadline, scan.next_deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            match wake_at {
                Some(at) => {
                    self.changed.wait_until(&mut state, at);
                }
                None => self.changed.wait(&mut state),
            }
        }
    }
}

/// Handle to a middleware context. Clones share the same context.
#[derive(Clone)]
pub struct Context {
    shared: Arc<ContextShared>,
}

impl Context {
    /// Create a context.
    ///
    /// # Errors
    /// - `InvalidArgument`: the configuration does not validate
    pub fn init(config: RclConfig) -> RclResult<Self> {
        config.validate()?;

        let shared = Arc::new_cyclic(|weak: &Weak<ContextShared>| {
            let observer: Weak<dyn TimeJumpObserver> = weak.clone();
            ContextShared {
                id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
                config,
                state: Mutex::new(MiddlewareState::new()),
                changed: Condvar::new(),
                shutdown: ShutdownToken::new(),
                ros_clock: Clock::with_observer(ClockType::RosTime, observer),
                self_ref: weak.clone(),
            }
        });
        let listener: Arc<dyn ShutdownListener> = shared.clone();
        shared.shutdown.register(&listener);

        info!(
            context = shared.id,
            rmw = %shared.config.rmw_identifier,
            domain_id = shared.config.domain_id,
            "Context initialized"
        );
        Ok(Self { shared })
    }

    /// Name of the middleware implementation.
    #[must_use]
    pub fn rmw_identifier(&self) -> &str {
        &self.shared.config.rmw_identifier
    }

    #[must_use]
    pub fn config(&self) -> &RclConfig {
        &self.shared.config
    }

    /// Whether the context has not been shut down.
    #[must_use]
    pub fn ok(&self) -> bool {
        !self.shared.shutdown.is_triggered()
    }

    /// Shut the context down, interrupting every wait on it.
    ///
    /// # Errors
    /// - `InvalidState`: already shut down
    pub fn shutdown(&self) -> RclResult<()> {
        if !self.ok() {
            return Err(RclError::InvalidState("context already shut down".into()));
        }
        self.shared.shutdown.trigger();
        info!(context = self.shared.id, "Context shut down");
        Ok(())
    }

    /// Token fired by [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shared.shutdown.clone()
    }

    /// ROS clock shared by every node of this context.
    #[must_use]
    pub fn clock(&self) -> Clock {
        self.shared.ros_clock.clone()
    }

    /// A fresh clock whose override changes wake waits on this context.
    #[must_use]
    pub fn create_clock(&self, clock_type: ClockType) -> Clock {
        let observer: Weak<dyn TimeJumpObserver> = self.shared.self_ref.clone();
        Clock::with_observer(clock_type, observer)
    }

    /// Empty wait set bounded by this context's capacity limit.
    #[must_use]
    pub fn create_wait_set(&self) -> WaitSet {
        WaitSet::with_max_capacity(self.shared.config.max_wait_set_capacity)
    }

    /// Create a node.
    ///
    /// # Errors
    /// - `InvalidArgument`: invalid name or namespace
    /// - `InvalidState`: the context is shut down
    pub fn create_node(&self, name: &str, namespace: &str) -> RclResult<Node> {
        names::validate_node_name(name)?;
        let namespace = names::normalize_namespace(namespace)?;
        let id = self.insert(
            None,
            EntityBody::Node(NodeRecord {
                name: name.to_string(),
                namespace: namespace.clone(),
                parameters: ParameterStore::new(),
            }),
        )?;
        info!(node = %names::fully_qualified(&namespace, name), "Node created");
        Ok(Node::new(self.clone(), id, name.to_string(), namespace))
    }

    /// Create a guard condition owned by the context.
    pub fn create_guard_condition(&self) -> RclResult<GuardCondition> {
        let id = self.insert(
            None,
            EntityBody::GuardCondition(GuardRecord { triggered: false }),
        )?;
        Ok(GuardCondition::new(self.clone(), id))
    }

    /// Number of live entities, nodes included.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.shared.state.lock().len()
    }

    pub(crate) fn id(&self) -> u64 {
        self.shared.id
    }

    pub(crate) fn readiness_source(&self) -> Arc<dyn ReadinessSource> {
        self.shared.clone()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, MiddlewareState> {
        self.shared.state.lock()
    }

    /// Run `f` under the state lock, then wake every waiter.
    pub(crate) fn mutate<R>(&self, f: impl FnOnce(&mut MiddlewareState) -> R) -> R {
        let result = f(&mut *self.shared.state.lock());
        self.shared.changed.notify_all();
        result
    }

    pub(crate) fn insert(
        &self,
        parent: Option<EntityId>,
        body: EntityBody,
    ) -> RclResult<EntityId> {
        if !self.ok() {
            return Err(RclError::InvalidState("context is shut down".into()));
        }
        self.mutate(|state| {
            if let Some(parent) = parent {
                state.check_live(parent)?;
            }
            Ok(state.insert(parent.map(|p| p.key()), body))
        })
    }

    pub(crate) fn destroy(&self, id: EntityId) -> RclResult<()> {
        self.mutate(|state| state.remove(id)).map(|_| ())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.shared.id)
            .field("rmw", &self.shared.config.rmw_identifier)
            .field("ok", &self.ok())
            .finish()
    }
}

/// Owning link from a handle to its registry record.
///
/// Dropping it destroys the record unless it was already released.
pub(crate) struct EntityHandle {
    context: Context,
    id: EntityId,
    released: bool,
}

impl EntityHandle {
    pub(crate) fn new(context: Context, id: EntityId) -> Self {
        Self {
            context,
            id,
            released: false,
        }
    }

    pub(crate) fn id(&self) -> EntityId {
        self.id
    }

    pub(crate) fn context(&self) -> &Context {
        &self.context
    }

    /// Destroy the record now.
    ///
    /// # Errors
    /// - `InvalidHandle`: the record was already destroyed (for example by
    ///   destroying its node)
    pub(crate) fn release(&mut self) -> RclResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.context.destroy(self.id)
    }
}

impl Drop for EntityHandle {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            debug!(entity = %self.id, error = %err, "Entity already gone at drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RclConfigBuilder;
    use crate::ports::Waitable;
    use std::thread;
    use std::time::Duration;

    fn context() -> Context {
        Context::init(RclConfig::default()).unwrap()
    }

    #[test]
    fn test_init_rejects_invalid_config() {
        let config = RclConfig {
            default_queue_depth: 0,
            ..RclConfig::default()
        };
        assert!(Context::init(config).is_err());
    }

    #[test]
    fn test_rmw_identifier() {
        let config = RclConfigBuilder::new()
            .rmw_identifier("rmw_test")
            .build()
            .unwrap();
        assert_eq!(Context::init(config).unwrap().rmw_identifier(), "rmw_test");
    }

    #[test]
    fn test_contexts_have_distinct_ids() {
        assert_ne!(context().id(), context().id());
    }

    #[test]
    fn test_shutdown_twice() {
        let ctx = context();
        assert!(ctx.ok());
        ctx.shutdown().unwrap();
        assert!(!ctx.ok());
        assert!(matches!(ctx.shutdown(), Err(RclError::InvalidState(_))));
    }

    #[test]
    fn test_create_after_shutdown() {
        let ctx = context();
        ctx.shutdown().unwrap();
        assert!(matches!(
            ctx.create_node("late", ""),
            Err(RclError::InvalidState(_))
        ));
        assert!(ctx.create_guard_condition().is_err());
    }

    #[test]
    fn test_handle_drop_destroys_record() {
        let ctx = context();
        {
            let _guard = ctx.create_guard_condition().unwrap();
            assert_eq!(ctx.entity_count(), 1);
        }
        assert_eq!(ctx.entity_count(), 0);
    }

    #[test]
    fn test_context_shutdown_wakes_wait() {
        let ctx = context();
        let guard = ctx.create_guard_condition().unwrap();
        let ids = [guard.entity_id()];
        let source = ctx.readiness_source();

        let remote = ctx.clone();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.shutdown().unwrap();
        });

        let outcome = source
            .wait_any(
                &[(EntityKind::GuardCondition, &ids[..])],
                WaitTimeout::Infinite,
                &ShutdownToken::new(),
            )
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Interrupted);
        waker.join().unwrap();
    }
}
