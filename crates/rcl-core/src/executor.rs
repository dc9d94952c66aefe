//! # Executor
//!
//! The populate → wait → drain loop with typed callbacks.
//!
//! ```text
//! spin_once:
//!   ┌─ wait set sized from registered entities (rebuilt when one is added)
//!   │  clear → add every entity → wait(timeout, shutdown)
//!   ↓
//!   Ready(entries) ──→ dispatch each entry to its handler
//!       subscription: take until empty → callback(message)
//!       timer:        call() == Taken → callback()
//!       guard:        callback()            (the wait consumed the trigger)
//!       service:      take_request → callback(request) → send_response
//!       client:       take_response → PendingRequests::complete → continuation
//! ```

use crate::correlation::{Correlated, PendingRequests};
use crate::domain::{
    EntityKind, RclError, RclResult, RequestHeader, ShutdownToken, TakeStatus, WaitOutcome,
    WaitSet, WaitSetCapacities, WaitTimeout,
};
use crate::middleware::{Client, Context, GuardCondition, Service, Subscription, Timer};
use crate::ports::Waitable;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long a call waits for its response before `remove_expired` drops it.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of one executor cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinOutcome {
    /// Number of callbacks run.
    Executed(usize),
    Timeout,
    Interrupted,
}

/// Registered entity plus what to do when it is ready.
trait Handler: Send {
    fn waitable(&self) -> &dyn Waitable;
    fn kind(&self) -> EntityKind;
    /// Drain the entity; returns the number of callbacks run.
    fn execute(&mut self) -> RclResult<usize>;
}

struct SubscriptionHandler<M, F> {
    subscription: Subscription,
    callback: F,
    _message: PhantomData<fn() -> M>,
}

impl<M, F> Handler for SubscriptionHandler<M, F>
where
    M: DeserializeOwned + Default,
    F: FnMut(M) + Send,
{
    fn waitable(&self) -> &dyn Waitable {
        &self.subscription
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Subscription
    }

    fn execute(&mut self) -> RclResult<usize> {
        let mut executed = 0;
        loop {
            let mut message = M::default();
            match self.subscription.take(&mut message) {
                Ok(TakeStatus::Taken) => {
                    (self.callback)(message);
                    executed += 1;
                }
                Ok(TakeStatus::NoDataAvailable) => return Ok(executed),
                Err(RclError::Failed(reason)) => {
                    warn!(topic = %self.subscription.topic_name(), %reason, "Dropped undecodable message");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

struct TimerHandler<F> {
    timer: Timer,
    callback: F,
}

impl<F: FnMut() + Send> Handler for TimerHandler<F> {
    fn waitable(&self) -> &dyn Waitable {
        &self.timer
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Timer
    }

    fn execute(&mut self) -> RclResult<usize> {
        match self.timer.call() {
            Ok(TakeStatus::Taken) => {
                (self.callback)();
                Ok(1)
            }
            // Canceled between the wait and the call
            Ok(TakeStatus::NoDataAvailable) | Err(RclError::InvalidState(_)) => Ok(0),
            Err(err) => Err(err),
        }
    }
}

struct GuardHandler<F> {
    guard: GuardCondition,
    callback: F,
}

impl<F: FnMut() + Send> Handler for GuardHandler<F> {
    fn waitable(&self) -> &dyn Waitable {
        &self.guard
    }

    fn kind(&self) -> EntityKind {
        EntityKind::GuardCondition
    }

    fn execute(&mut self) -> RclResult<usize> {
        (self.callback)();
        Ok(1)
    }
}

struct ServiceHandler<Req, Resp, F> {
    service: Service,
    callback: F,
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp, F> Handler for ServiceHandler<Req, Resp, F>
where
    Req: DeserializeOwned + Default,
    Resp: Serialize,
    F: FnMut(Req) -> Resp + Send,
{
    fn waitable(&self) -> &dyn Waitable {
        &self.service
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Service
    }

    fn execute(&mut self) -> RclResult<usize> {
        let mut executed = 0;
        loop {
            let mut header = RequestHeader::new();
            let mut request = Req::default();
            match self.service.take_request(&mut header, &mut request) {
                Ok(TakeStatus::Taken) => {
                    let response = (self.callback)(request);
                    executed += 1;
                    if let Err(err) = self.service.send_response(&header, &response) {
                        warn!(
                            service = %self.service.service_name(),
                            sequence = header.sequence_number(),
                            error = %err,
                            "Response not delivered"
                        );
                    }
                }
                Ok(TakeStatus::NoDataAvailable) => return Ok(executed),
                Err(RclError::Failed(reason)) => {
                    warn!(service = %self.service.service_name(), %reason, "Dropped undecodable request");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

type Continuation = Box<dyn FnOnce(&[u8]) -> RclResult<()> + Send>;

struct ClientHandler {
    client: Client,
    pending: PendingRequests<Continuation>,
}

impl Handler for ClientHandler {
    fn waitable(&self) -> &dyn Waitable {
        &self.client
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Client
    }

    fn execute(&mut self) -> RclResult<usize> {
        let mut executed = 0;
        let mut header = RequestHeader::new();
        let mut buffer = Vec::new();
        while self
            .client
            .take_response_serialized(&mut header, &mut buffer)?
            .is_taken()
        {
            match self.pending.complete(&header) {
                Correlated::Matched(continuation) => {
                    if let Err(err) = continuation(&buffer) {
                        warn!(
                            service = %self.client.service_name(),
                            sequence = header.sequence_number(),
                            error = %err,
                            "Response continuation failed"
                        );
                    }
                    executed += 1;
                }
                Correlated::Stale => {
                    warn!(
                        service = %self.client.service_name(),
                        sequence = header.sequence_number(),
                        "Dropped stale response"
                    );
                }
            }
        }
        for (sequence, _) in self.pending.remove_expired(Instant::now()) {
            debug!(service = %self.client.service_name(), sequence, "Call expired");
        }
        Ok(executed)
    }
}

/// Key of a client registered with [`Executor::add_client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientKey(usize);

/// Where a wait set slot dispatches to.
#[derive(Clone, Copy)]
enum Route {
    Handler(usize),
    Client(usize),
}

/// Single-threaded executor over one context.
pub struct Executor {
    context: Context,
    shutdown: ShutdownToken,
    handlers: Vec<Box<dyn Handler>>,
    clients: Vec<ClientHandler>,
    wait_set: Option<WaitSet>,
    routes: Vec<Vec<Route>>,
}

impl Executor {
    /// Executor interrupted by the context's shutdown.
    pub fn new(context: &Context) -> Self {
        Self::with_shutdown(context, context.shutdown_token())
    }

    /// Executor interrupted by `shutdown`.
    pub fn with_shutdown(context: &Context, shutdown: ShutdownToken) -> Self {
        Self {
            context: context.clone(),
            shutdown,
            handlers: Vec::new(),
            clients: Vec::new(),
            wait_set: None,
            routes: Vec::new(),
        }
    }

    fn push(&mut self, handler: Box<dyn Handler>) {
        self.handlers.push(handler);
        self.wait_set = None;
    }

    pub fn add_subscription<M, F>(&mut self, subscription: Subscription, callback: F)
    where
        M: DeserializeOwned + Default + 'static,
        F: FnMut(M) + Send + 'static,
    {
        self.push(Box::new(SubscriptionHandler {
            subscription,
            callback,
            _message: PhantomData,
        }));
    }

    pub fn add_timer<F>(&mut self, timer: Timer, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.push(Box::new(TimerHandler { timer, callback }));
    }

    pub fn add_guard_condition<F>(&mut self, guard: GuardCondition, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.push(Box::new(GuardHandler { guard, callback }));
    }

    pub fn add_service<Req, Resp, F>(&mut self, service: Service, callback: F)
    where
        Req: DeserializeOwned + Default + 'static,
        Resp: Serialize + 'static,
        F: FnMut(Req) -> Resp + Send + 'static,
    {
        self.push(Box::new(ServiceHandler {
            service,
            callback,
            _types: PhantomData,
        }));
    }

    /// Register a client; use the returned key with [`call`](Self::call).
    pub fn add_client(&mut self, client: Client) -> ClientKey {
        self.clients.push(ClientHandler {
            client,
            pending: PendingRequests::new(DEFAULT_CALL_TIMEOUT),
        });
        self.wait_set = None;
        ClientKey(self.clients.len() - 1)
    }

    /// Send `request` and run `on_response` when its response is drained.
    ///
    /// Returns the request's sequence number.
    pub fn call<Req, Resp, F>(&mut self, key: ClientKey, request: &Req, on_response: F) -> RclResult<i64>
    where
        Req: Serialize,
        Resp: DeserializeOwned + 'static,
        F: FnOnce(Resp) + Send + 'static,
    {
        let entry = self
            .clients
            .get_mut(key.0)
            .ok_or_else(|| RclError::InvalidArgument(format!("unknown client key {}", key.0)))?;

        let sequence = entry.client.send_request(request)?;
        let continuation: Continuation = Box::new(move |bytes: &[u8]| {
            let response: Resp = bincode::deserialize(bytes)?;
            on_response(response);
            Ok(())
        });
        entry.pending.register(sequence, entry.client.service_name(), continuation)?;
        Ok(sequence)
    }

    /// Calls sent through `key` still waiting for a response.
    pub fn pending_calls(&self, key: ClientKey) -> usize {
        self.clients
            .get(key.0)
            .map_or(0, |entry| entry.pending.pending_count())
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    fn capacities(&self) -> WaitSetCapacities {
        let count = |kind: EntityKind| self.handlers.iter().filter(|h| h.kind() == kind).count();
        WaitSetCapacities {
            subscriptions: count(EntityKind::Subscription),
            guard_conditions: count(EntityKind::GuardCondition),
            timers: count(EntityKind::Timer),
            clients: self.clients.len(),
            services: count(EntityKind::Service),
            events: 0,
        }
    }

    /// Wait once and drain everything reported ready.
    ///
    /// # Errors
    /// - `InvalidArgument`: nothing was registered
    /// - any error of the wait or of a take
    pub fn spin_once(&mut self, timeout: WaitTimeout) -> RclResult<SpinOutcome> {
        if self.wait_set.is_none() {
            let mut wait_set = self.context.create_wait_set();
            wait_set.initialize(self.capacities())?;
            self.wait_set = Some(wait_set);
        }
        let Some(wait_set) = self.wait_set.as_mut() else {
            return Err(RclError::InvalidState("executor wait set missing".into()));
        };

        wait_set.clear()?;
        self.routes = vec![Vec::new(); EntityKind::WAITABLE.len()];
        for (index, handler) in self.handlers.iter().enumerate() {
            let kind = handler.kind();
            wait_set.add(kind, handler.waitable())?;
            if let Some(slot) = kind.wait_set_index() {
                self.routes[slot].push(Route::Handler(index));
            }
        }
        for (index, entry) in self.clients.iter().enumerate() {
            wait_set.add_client(&entry.client)?;
            if let Some(slot) = EntityKind::Client.wait_set_index() {
                self.routes[slot].push(Route::Client(index));
            }
        }

        let ready = match wait_set.wait(timeout, &self.shutdown)? {
            WaitOutcome::Ready(ready) => ready,
            WaitOutcome::Timeout => return Ok(SpinOutcome::Timeout),
            WaitOutcome::Interrupted => return Ok(SpinOutcome::Interrupted),
        };

        let mut executed = 0;
        for entry in ready {
            let route = entry
                .kind
                .wait_set_index()
                .and_then(|index| self.routes[index].get(entry.slot))
                .copied();
            executed += match route {
                Some(Route::Handler(index)) => self.handlers[index].execute()?,
                Some(Route::Client(index)) => self.clients[index].execute()?,
                None => 0,
            };
        }
        Ok(SpinOutcome::Executed(executed))
    }

    /// Spin until shutdown.
    pub fn spin(&mut self) -> RclResult<()> {
        loop {
            if self.spin_once(WaitTimeout::Infinite)? == SpinOutcome::Interrupted {
                debug!("Executor interrupted, leaving spin");
                return Ok(());
            }
        }
    }

    /// Spin until `done` returns true or `timeout` elapses.
    ///
    /// Returns whether `done` became true.
    pub fn spin_until(&mut self, mut done: impl FnMut() -> bool, timeout: Duration) -> RclResult<bool> {
        // No representable deadline means no deadline
        let deadline = Instant::now().checked_add(timeout);
        while !done() {
            let wait = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(false);
                    }
                    WaitTimeout::After(remaining)
                }
                None => WaitTimeout::Infinite,
            };
            if self.spin_once(wait)? == SpinOutcome::Interrupted {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
