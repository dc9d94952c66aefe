//! Nodes: the owners of publishers, subscriptions, services, clients and
//! timers. Destroying a node destroys everything it created.

use crate::domain::{
    Clock, ClockType, EntityId, EntityKind, ParameterStore, ParameterValue, RclError, RclResult,
    WriterGuid,
};
use crate::middleware::client::Client;
use crate::middleware::context::{Context, EntityHandle};
use crate::middleware::names;
use crate::middleware::publisher::Publisher;
use crate::middleware::service::Service;
use crate::middleware::state::{
    ClientRecord, EntityBody, PublisherRecord, ServiceRecord, SubscriptionRecord, TimerRecord,
};
use crate::middleware::subscription::Subscription;
use crate::middleware::timer::Timer;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// A named participant in the middleware graph.
pub struct Node {
    handle: EntityHandle,
    name: String,
    namespace: String,
}

impl Node {
    pub(crate) fn new(context: Context, id: EntityId, name: String, namespace: String) -> Self {
        Self {
            handle: EntityHandle::new(context, id),
            name,
            namespace,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace, always absolute.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn fully_qualified_name(&self) -> String {
        names::fully_qualified(&self.namespace, &self.name)
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        self.handle.context()
    }

    /// The context's ROS clock.
    #[must_use]
    pub fn clock(&self) -> Clock {
        self.context().clock()
    }

    fn expand(&self, topic: &str) -> RclResult<String> {
        names::expand_topic_name(topic, &self.name, &self.namespace)
    }

    fn default_depth(&self) -> usize {
        self.context().config().default_queue_depth
    }

    fn create(&self, body: EntityBody) -> RclResult<EntityId> {
        self.context().insert(Some(self.handle.id()), body)
    }

    pub fn create_publisher(&self, topic: &str) -> RclResult<Publisher> {
        let topic = self.expand(topic)?;
        let id = self.create(EntityBody::Publisher(PublisherRecord {
            topic: topic.clone(),
        }))?;
        debug!(node = %self.name, topic = %topic, "Publisher created");
        Ok(Publisher::new(self.context().clone(), id, topic))
    }

    /// Subscription with the configured default queue depth.
    pub fn create_subscription(&self, topic: &str) -> RclResult<Subscription> {
        self.create_subscription_with_depth(topic, self.default_depth())
    }

    /// Subscription keeping at most `depth` undrained messages.
    pub fn create_subscription_with_depth(
        &self,
        topic: &str,
        depth: usize,
    ) -> RclResult<Subscription> {
        require_depth(depth)?;
        let topic = self.expand(topic)?;
        let id = self.create(EntityBody::Subscription(SubscriptionRecord {
            topic: topic.clone(),
            depth,
            queue: VecDeque::with_capacity(depth),
        }))?;
        debug!(node = %self.name, topic = %topic, depth, "Subscription created");
        Ok(Subscription::new(self.context().clone(), id, topic))
    }

    pub fn create_service(&self, service_name: &str) -> RclResult<Service> {
        let service_name = self.expand(service_name)?;
        let id = self.create(EntityBody::Service(ServiceRecord {
            service_name: service_name.clone(),
            depth: self.default_depth(),
            requests: VecDeque::new(),
        }))?;
        debug!(node = %self.name, service = %service_name, "Service created");
        Ok(Service::new(self.context().clone(), id, service_name))
    }

    pub fn create_client(&self, service_name: &str) -> RclResult<Client> {
        let service_name = self.expand(service_name)?;
        let guid = WriterGuid::generate();
        let id = self.create(EntityBody::Client(ClientRecord {
            service_name: service_name.clone(),
            guid,
            next_sequence: 1,
            depth: self.default_depth(),
            responses: VecDeque::new(),
        }))?;
        debug!(node = %self.name, service = %service_name, guid = %guid, "Client created");
        Ok(Client::new(self.context().clone(), id, service_name, guid))
    }

    /// Timer driven by the context's ROS clock.
    pub fn create_timer(&self, period: Duration) -> RclResult<Timer> {
        self.create_timer_with_clock(period, &self.clock())
    }

    /// Timer driven by `clock`.
    ///
    /// # Errors
    /// - `InvalidArgument`: zero period, or an uninitialized clock
    pub fn create_timer_with_clock(&self, period: Duration, clock: &Clock) -> RclResult<Timer> {
        if clock.clock_type() == ClockType::Uninitialized {
            return Err(RclError::InvalidArgument(
                "timer clock is uninitialized".into(),
            ));
        }
        let period = i64::try_from(period.as_nanos())
            .ok()
            .filter(|nanos| *nanos > 0)
            .ok_or_else(|| {
                RclError::InvalidArgument(format!("invalid timer period {:?}", period))
            })?;

        let now = clock.now()?.nanoseconds;
        let id = self.create(EntityBody::Timer(TimerRecord {
            clock: clock.clone(),
            period,
            next_call: now.saturating_add(period),
            canceled: false,
        }))?;
        debug!(node = %self.name, period_ns = period, clock = ?clock.clock_type(), "Timer created");
        Ok(Timer::new(self.context().clone(), id))
    }

    fn with_parameters<R>(&self, f: impl FnOnce(&mut ParameterStore) -> RclResult<R>) -> RclResult<R> {
        let id = self.handle.id();
        let mut state = self.context().lock();
        let EntityBody::Node(node) = state.body_mut(id)? else {
            return Err(RclError::invalid_handle(EntityKind::Node, "not a node"));
        };
        f(&mut node.parameters)
    }

    /// Declare a parameter with its initial value and return that value.
    ///
    /// # Errors
    /// - `InvalidArgument`: invalid name, or already declared
    pub fn declare_parameter(
        &self,
        name: &str,
        value: impl Into<ParameterValue>,
    ) -> RclResult<ParameterValue> {
        let value = self.with_parameters(|parameters| parameters.declare(name, value.into()))?;
        debug!(node = %self.name, parameter = name, kind = %value.parameter_type(), "Parameter declared");
        Ok(value)
    }

    /// # Errors
    /// - `InvalidArgument`: the parameter is not declared
    pub fn get_parameter(&self, name: &str) -> RclResult<ParameterValue> {
        self.with_parameters(|parameters| parameters.get(name))
    }

    /// # Errors
    /// - `InvalidArgument`: not declared, or the value changes the declared type
    pub fn set_parameter(&self, name: &str, value: impl Into<ParameterValue>) -> RclResult<()> {
        self.with_parameters(|parameters| parameters.set(name, value.into()))?;
        debug!(node = %self.name, parameter = name, "Parameter set");
        Ok(())
    }

    pub fn undeclare_parameter(&self, name: &str) -> RclResult<()> {
        self.with_parameters(|parameters| parameters.undeclare(name))
    }

    pub fn has_parameter(&self, name: &str) -> RclResult<bool> {
        self.with_parameters(|parameters| Ok(parameters.contains(name)))
    }

    pub fn parameter_names(&self) -> RclResult<Vec<String>> {
        self.with_parameters(|parameters| Ok(parameters.names()))
    }

    /// Destroy the node and everything it created.
    pub fn destroy(mut self) -> RclResult<()> {
        self.handle.release()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.fully_qualified_name())
            .field("id", &self.handle.id())
            .finish()
    }
}

fn require_depth(depth: usize) -> RclResult<()> {
    if depth == 0 {
        return Err(RclError::InvalidArgument("queue depth cannot be 0".into()));
    }
    Ok(())
}
