//! # Foreign Function Table
//!
//! Flat `extern "C"` surface for bindings in other languages.
//!
//! | Concern | Convention |
//! |---------|------------|
//! | Handles | opaque `u64` tokens, `0` is null; stale tokens never resolve |
//! | Results | `i32` codes from [`RclRet`] |
//! | Payloads | serialized bytes; takes write into `(ptr, capacity, *mut len)` |
//! | Small buffer | `INVALID_ARGUMENT`, the item stays queued |
//!
//! All handles live in one process-wide bridge. `native_rcl_wait` releases
//! the bridge before blocking, so other threads keep publishing, triggering
//! and shutting down while a wait is in progress. A wait set being waited on
//! rejects every other call on it with `WAIT_SET_INVALID`.

use crate::domain::{
    Arena, ArenaKey, Clock, ClockType, EntityKind, RclConfig, RclError, RclResult, RclRet,
    RequestHeader, TakeStatus, WaitOutcome, WaitSet, WaitSetCapacities, WaitTimeout,
};
use crate::middleware::{
    Client, Context, GuardCondition, Node, Publisher, Service, Subscription, Timer,
};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type SharedWaitSet = Arc<Mutex<WaitSet>>;

#[derive(Default)]
struct Bridge {
    context: Option<Context>,
    rmw_identifier: Option<CString>,
    nodes: Arena<Node>,
    publishers: Arena<Publisher>,
    subscriptions: Arena<Subscription>,
    services: Arena<Service>,
    clients: Arena<Client>,
    guard_conditions: Arena<GuardCondition>,
    clocks: Arena<Clock>,
    timers: Arena<Timer>,
    wait_sets: Arena<SharedWaitSet>,
    headers: Arena<RequestHeader>,
}

impl Bridge {
    fn context(&self) -> Result<&Context, RclRet> {
        self.context.as_ref().ok_or(RclRet::NotInit)
    }
}

lazy_static! {
    static ref BRIDGE: Mutex<Bridge> = Mutex::new(Bridge::default());
}

fn lookup<T>(arena: &Arena<T>, token: u64, invalid: RclRet) -> Result<&T, RclRet> {
    ArenaKey::from_bits(token)
        .and_then(|key| arena.get(key))
        .ok_or(invalid)
}

fn remove<T>(arena: &mut Arena<T>, token: u64, invalid: RclRet) -> Result<T, RclRet> {
    ArenaKey::from_bits(token)
        .and_then(|key| arena.remove(key))
        .ok_or(invalid)
}

fn fail(err: RclError) -> RclRet {
    let code = RclRet::from(&err);
    debug!(code = code.code(), error = %err, "Native call failed");
    code
}

fn status<T>(result: &RclResult<T>) -> RclRet {
    match result {
        Ok(_) => RclRet::Ok,
        Err(err) => fail(err.clone()),
    }
}

/// Run a call body, collapsing early returns into the result code.
fn guarded(body: impl FnOnce() -> Result<RclRet, RclRet>) -> i32 {
    match body() {
        Ok(code) | Err(code) => code.code(),
    }
}

fn take_code(status: TakeStatus, kind: EntityKind) -> RclRet {
    match status {
        TakeStatus::Taken => RclRet::Ok,
        TakeStatus::NoDataAvailable => RclRet::take_failed(kind),
    }
}

/// # Safety
/// `ptr` is null or a NUL-terminated string valid for the call.
unsafe fn read_str<'a>(ptr: *const c_char) -> Result<&'a str, RclRet> {
    if ptr.is_null() {
        return Err(RclRet::InvalidArgument);
    }
    // SAFETY: non-null and NUL-terminated per the caller contract
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| RclRet::InvalidArgument)
}

/// # Safety
/// `ptr` is null or valid for `len` bytes.
unsafe fn read_bytes<'a>(ptr: *const u8, len: usize) -> Result<&'a [u8], RclRet> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(RclRet::InvalidArgument);
    }
    // SAFETY: non-null and valid for `len` bytes per the caller contract
    Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
}

/// # Safety
/// `ptr` is null or valid for a write of `T`.
unsafe fn write_out<T>(ptr: *mut T, value: T) -> Result<(), RclRet> {
    if ptr.is_null() {
        return Err(RclRet::InvalidArgument);
    }
    // SAFETY: non-null and writable per the caller contract
    unsafe { ptr.write(value) };
    Ok(())
}

/// A caller-owned output region.
struct OutBuffer {
    ptr: *mut u8,
    capacity: usize,
    len: *mut usize,
}

impl OutBuffer {
    fn check(&self) -> Result<(), RclRet> {
        if self.len.is_null() || (self.ptr.is_null() && self.capacity > 0) {
            return Err(RclRet::InvalidArgument);
        }
        Ok(())
    }

    /// # Safety
    /// `ptr` is valid for `capacity` bytes and `len` for one write.
    unsafe fn fill(&self, bytes: &[u8]) -> Result<(), RclRet> {
        if bytes.len() > self.capacity {
            return Err(RclRet::InvalidArgument);
        }
        if !bytes.is_empty() {
            // SAFETY: `bytes.len() <= capacity` and the region is caller-owned
            unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr, bytes.len()) };
        }
        // SAFETY: checked non-null by `check`
        unsafe { write_out(self.len, bytes.len()) }
    }
}

// ============================================================================
// Context
// ============================================================================

/// Initialize the process-wide context from the environment.
#[no_mangle]
pub extern "C" fn native_rcl_init() -> i32 {
    let mut bridge = BRIDGE.lock();
    if bridge.context.as_ref().is_some_and(Context::ok) {
        return RclRet::AlreadyInit.code();
    }
    let config = RclConfig::from_env();
    match Context::init(config) {
        Ok(context) => {
            if bridge.rmw_identifier.is_none() {
                bridge.rmw_identifier = CString::new(context.rmw_identifier()).ok();
            }
            bridge.context = Some(context);
            RclRet::Ok.code()
        }
        Err(err) => {
            warn!(error = %err, "Native init failed");
            RclRet::from(&err).code()
        }
    }
}

/// Shut the context down, interrupting every blocked `native_rcl_wait`.
#[no_mangle]
pub extern "C" fn native_rcl_shutdown() -> i32 {
    let context = match BRIDGE.lock().context() {
        Ok(context) => context.clone(),
        Err(code) => return code.code(),
    };
    // Outside the bridge lock: shutdown wakes waiters
    match context.shutdown() {
        Ok(()) => RclRet::Ok.code(),
        Err(_) => RclRet::AlreadyShutdown.code(),
    }
}

/// Middleware identifier; an empty string before the first init.
///
/// The returned string stays valid for the life of the process.
#[no_mangle]
pub extern "C" fn native_rcl_get_rmw_identifier() -> *const c_char {
    static EMPTY: &[u8] = b"\0";
    match &BRIDGE.lock().rmw_identifier {
        Some(identifier) => identifier.as_ptr(),
        None => EMPTY.as_ptr().cast(),
    }
}

#[no_mangle]
pub extern "C" fn native_rcl_ok() -> bool {
    BRIDGE.lock().context.as_ref().is_some_and(Context::ok)
}

// ============================================================================
// Nodes and entities
// ============================================================================

/// # Safety
/// `node_out` is writable; `name` and `namespace` are NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn native_rcl_create_node_handle(
    node_out: *mut u64,
    name: *const c_char,
    namespace: *const c_char,
) -> i32 {
    guarded(|| {
        // SAFETY: forwarded caller contract
        let (name, namespace) = unsafe { (read_str(name)?, read_str(namespace)?) };
        let mut bridge = BRIDGE.lock();
        let node = bridge
            .context()?
            .create_node(name, namespace)
            .map_err(fail)?;
        let token = bridge.nodes.insert(node).to_bits();
        // SAFETY: forwarded caller contract
        unsafe { write_out(node_out, token)? };
        Ok(RclRet::Ok)
    })
}

#[no_mangle]
pub extern "C" fn native_rcl_destroy_node_handle(node: u64) -> i32 {
    guarded(|| {
        let node = remove(&mut BRIDGE.lock().nodes, node, RclRet::NodeInvalid)?;
        Ok(status(&node.destroy()))
    })
}

/// Create an entity on a node and store it in its bridge table.
///
/// # Safety
/// `name` is a NUL-terminated string; `out` is writable.
unsafe fn create_on_node<T>(
    node: u64,
    name: *const c_char,
    out: *mut u64,
    create: impl FnOnce(&Node, &str) -> RclResult<T>,
    table: impl FnOnce(&mut Bridge) -> &mut Arena<T>,
) -> Result<RclRet, RclRet> {
    // SAFETY: forwarded caller contract
    let name = unsafe { read_str(name)? };
    let mut bridge = BRIDGE.lock();
    let result = create(lookup(&bridge.nodes, node, RclRet::NodeInvalid)?, name);
    let entity = result.map_err(fail)?;
    let token = table(&mut *bridge).insert(entity).to_bits();
    // SAFETY: forwarded caller contract
    unsafe { write_out(out, token)? };
    Ok(RclRet::Ok)
}

/// # Safety
/// `publisher_out` is writable; `topic` is a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn native_rcl_create_publisher_handle(
    publisher_out: *mut u64,
    node: u64,
    topic: *const c_char,
) -> i32 {
    // SAFETY: forwarded caller contract
    guarded(|| unsafe {
        create_on_node(
            node,
            topic,
            publisher_out,
            Node::create_publisher,
            |bridge| &mut bridge.publishers,
        )
    })
}

#[no_mangle]
pub extern "C" fn native_rcl_destroy_publisher_handle(publisher: u64) -> i32 {
    guarded(|| {
        let publisher = remove(
            &mut BRIDGE.lock().publishers,
            publisher,
            RclRet::PublisherInvalid,
        )?;
        Ok(status(&publisher.destroy()))
    })
}

/// # Safety
/// `data` is valid for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn native_rcl_publish(publisher: u64, data: *const u8, len: usize) -> i32 {
    guarded(|| {
        // SAFETY: forwarded caller contract
        let bytes = unsafe { read_bytes(data, len)? };
        let bridge = BRIDGE.lock();
        let publisher = lookup(&bridge.publishers, publisher, RclRet::PublisherInvalid)?;
        Ok(status(&publisher.publish_serialized(bytes)))
    })
}

/// # Safety
/// `subscription_out` is writable; `topic` is a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn native_rcl_create_subscription_handle(
    subscription_out: *mut u64,
    node: u64,
    topic: *const c_char,
) -> i32 {
    // SAFETY: forwarded caller contract
    guarded(|| unsafe {
        create_on_node(
            node,
            topic,
            subscription_out,
            Node::create_subscription,
            |bridge| &mut bridge.subscriptions,
        )
    })
}

#[no_mangle]
pub extern "C" fn native_rcl_destroy_subscription_handle(subscription: u64) -> i32 {
    guarded(|| {
        let subscription = remove(
            &mut BRIDGE.lock().subscriptions,
            subscription,
            RclRet::SubscriptionInvalid,
        )?;
        Ok(status(&subscription.destroy()))
    })
}

/// # Safety
/// `service_out` is writable; `service_name` is a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn native_rcl_create_service_handle(
    service_out: *mut u64,
    node: u64,
    service_name: *const c_char,
) -> i32 {
    // SAFETY: forwarded caller contract
    guarded(|| unsafe {
        create_on_node(
            node,
            service_name,
            service_out,
            Node::create_service,
            |bridge| &mut bridge.services,
        )
    })
}

#[no_mangle]
pub extern "C" fn native_rcl_destroy_service_handle(service: u64) -> i32 {
    guarded(|| {
        let service = remove(&mut BRIDGE.lock().services, service, RclRet::ServiceInvalid)?;
        Ok(status(&service.destroy()))
    })
}

/// # Safety
/// `client_out` is writable; `service_name` is a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn native_rcl_create_client_handle(
    client_out: *mut u64,
    node: u64,
    service_name: *const c_char,
) -> i32 {
    // SAFETY: forwarded caller contract
    guarded(|| unsafe {
        create_on_node(
            node,
            service_name,
            client_out,
            Node::create_client,
            |bridge| &mut bridge.clients,
        )
    })
}

#[no_mangle]
pub extern "C" fn native_rcl_destroy_client_handle(client: u64) -> i32 {
    guarded(|| {
        let client = remove(&mut BRIDGE.lock().clients, client, RclRet::ClientInvalid)?;
        Ok(status(&client.destroy()))
    })
}

/// Send a serialized request; writes its sequence number to `sequence_out`.
///
/// # Safety
/// `data` is valid for `len` bytes; `sequence_out` is writable.
#[no_mangle]
pub unsafe extern "C" fn native_rcl_send_request(
    client: u64,
    data: *const u8,
    len: usize,
    sequence_out: *mut i64,
) -> i32 {
    guarded(|| {
        // SAFETY: forwarded caller contract
        let bytes = unsafe { read_bytes(data, len)? };
        let bridge = BRIDGE.lock();
        let client = lookup(&bridge.clients, client, RclRet::ClientInvalid)?;
        let sequence = client
            .send_request_serialized(bytes)
            .map_err(fail)?;
        // SAFETY: forwarded caller contract
        unsafe { write_out(sequence_out, sequence)? };
        Ok(RclRet::Ok)
    })
}

/// # Safety
/// `guard_condition_out` is writable.
#[no_mangle]
pub unsafe extern "C" fn native_rcl_create_guard_condition_handle(
    guard_condition_out: *mut u64,
) -> i32 {
    guarded(|| {
        let mut bridge = BRIDGE.lock();
        let result = bridge.context()?.create_guard_condition();
        let guard = result.map_err(fail)?;
        let token = bridge.guard_conditions.insert(guard).to_bits();
        // SAFETY: forwarded caller contract
        unsafe { write_out(guard_condition_out, token)? };
        Ok(RclRet::Ok)
    })
}

#[no_mangle]
pub extern "C" fn native_rcl_destroy_guard_condition_handle(guard_condition: u64) -> i32 {
    guarded(|| {
        let guard = remove(
            &mut BRIDGE.lock().guard_conditions,
            guard_condition,
            RclRet::InvalidArgument,
        )?;
        Ok(status(&guard.destroy()))
    })
}

#[no_mangle]
pub extern "C" fn native_rcl_trigger_guard_condition(guard_condition: u64) -> i32 {
    guarded(|| {
        let bridge = BRIDGE.lock();
        let guard = lookup(
            &bridge.guard_conditions,
            guard_condition,
            RclRet::InvalidArgument,
        )?;
        Ok(status(&guard.trigger()))
    })
}

// ============================================================================
// Clocks and timers
// ============================================================================

fn clock_type_from_code(code: i32) -> Result<ClockType, RclRet> {
    match code {
        0 => Ok(ClockType::Uninitialized),
        1 => Ok(ClockType::RosTime),
        2 => Ok(ClockType::SystemTime),
        3 => Ok(ClockType::SteadyTime),
        _ => Err(RclRet::InvalidArgument),
    }
}

/// Clock failures have no dedicated codes: an unusable clock is `ERROR`.
fn clock_fail(err: RclError) -> RclRet {
    match err {
        RclError::InvalidState(reason) => {
            debug!(reason = %reason, "Clock call failed");
            RclRet::Error
        }
        err => fail(err),
    }
}

/// A canceled timer reports `TIMER_CANCELED` rather than a wait set code.
fn timer_fail(err: RclError) -> RclRet {
    match err {
        RclError::InvalidState(reason) => {
            debug!(reason = %reason, "Timer call failed");
            RclRet::TimerCanceled
        }
        err => fail(err),
    }
}

/// Copy a clock out of the bridge so override changes run unlocked.
fn clock_of(clock: u64) -> Result<Clock, RclRet> {
    let bridge = BRIDGE.lock();
    lookup(&bridge.clocks, clock, RclRet::InvalidArgument).cloned()
}

/// Create a clock. `clock_type`: 0 uninitialized, 1 ROS, 2 system, 3 steady.
///
/// # Safety
/// `clock_out` is writable.
#[no_mangle]
pub unsafe extern "C" fn native_rcl_create_clock_handle(clock_out: *mut u64, clock_type: i32) -> i32 {
    guarded(|| {
        let clock_type = clock_type_from_code(clock_type)?;
        let mut bridge = BRIDGE.lock();
        let clock = bridge.context()?.create_clock(clock_type);
        let token = bridge.clocks.insert(clock).to_bits();
        // SAFETY: forwarded caller contract
        unsafe { write_out(clock_out, token)? };
        Ok(RclRet::Ok)
    })
}

/// Destroy a clock. Timers created from it keep their own copy.
#[no_mangle]
pub extern "C" fn native_rcl_destroy_clock_handle(clock: u64) -> i32 {
    guarded(|| {
        remove(&mut BRIDGE.lock().clocks, clock, RclRet::InvalidArgument)?;
        Ok(RclRet::Ok)
    })
}

/// # Safety
/// `time_point_out` is writable.
#[no_mangle]
pub unsafe extern "C" fn native_rcl_clock_get_now(clock: u64, time_point_out: *mut i64) -> i32 {
    guarded(|| {
        let now = clock_of(clock)?.now().map_err(clock_fail)?;
        // SAFETY: forwarded caller contract
        unsafe { write_out(time_point_out, now.nanoseconds)? };
        Ok(RclRet::Ok)
    })
}

#[no_mangle]
pub extern "C" fn native_rcl_enable_ros_time_override(clock: u64) -> i32 {
    guarded(|| {
        clock_of(clock)?
            .enable_ros_time_override()
            .map_err(clock_fail)?;
        Ok(RclRet::Ok)
    })
}

#[no_mangle]
pub extern "C" fn native_rcl_disable_ros_time_override(clock: u64) -> i32 {
    guarded(|| {
        clock_of(clock)?
            .disable_ros_time_override()
            .map_err(clock_fail)?;
        Ok(RclRet::Ok)
    })
}

#[no_mangle]
pub extern "C" fn native_rcl_set_ros_time_override(clock: u64, time_point_value: i64) -> i32 {
    guarded(|| {
        clock_of(clock)?
            .set_ros_time_override(time_point_value)
            .map_err(clock_fail)?;
        Ok(RclRet::Ok)
    })
}

/// Create a timer on `node` driven by `clock`, firing every `period_ns`.
///
/// # Safety
/// `timer_out` is writable.
#[no_mangle]
pub unsafe extern "C" fn native_rcl_create_timer_handle(
    timer_out: *mut u64,
    node: u64,
    clock: u64,
    period_ns: i64,
) -> i32 {
    guarded(|| {
        let period = u64::try_from(period_ns)
            .map(Duration::from_nanos)
            .map_err(|_| RclRet::InvalidArgument)?;
        let mut bridge = BRIDGE.lock();
        let clock = lookup(&bridge.clocks, clock, RclRet::InvalidArgument)?;
        let result = lookup(&bridge.nodes, node, RclRet::NodeInvalid)?
            .create_timer_with_clock(period, clock);
        let timer = result.map_err(fail)?;
        let token = bridge.timers.insert(timer).to_bits();
        // SAFETY: forwarded caller contract
        unsafe { write_out(timer_out, token)? };
        Ok(RclRet::Ok)
    })
}

#[no_mangle]
pub extern "C" fn native_rcl_destroy_timer_handle(timer: u64) -> i32 {
    guarded(|| {
        let timer = remove(&mut BRIDGE.lock().timers, timer, RclRet::TimerInvalid)?;
        Ok(status(&timer.destroy()))
    })
}

/// Consume one elapsed period. `called_out` is false when the period has not
/// elapsed yet.
///
/// # Safety
/// `called_out` is writable.
#[no_mangle]
pub unsafe extern "C" fn native_rcl_timer_call(timer: u64, called_out: *mut bool) -> i32 {
    guarded(|| {
        let bridge = BRIDGE.lock();
        let taken = lookup(&bridge.timers, timer, RclRet::TimerInvalid)?
            .call()
            .map_err(timer_fail)?;
        // SAFETY: forwarded caller contract
        unsafe { write_out(called_out, taken.is_taken())? };
        Ok(RclRet::Ok)
    })
}

/// # Safety
/// `ready_out` is writable.
#[no_mangle]
pub unsafe extern "C" fn native_rcl_timer_is_ready(timer: u64, ready_out: *mut bool) -> i32 {
    guarded(|| {
        let bridge = BRIDGE.lock();
        let ready = lookup(&bridge.timers, timer, RclRet::TimerInvalid)?
            .is_ready()
            .map_err(timer_fail)?;
        // SAFETY: forwarded caller contract
        unsafe { write_out(ready_out, ready)? };
        Ok(RclRet::Ok)
    })
}

/// # Safety
/// `time_until_out` is writable.
#[no_mangle]
pub unsafe extern "C" fn native_rcl_timer_get_time_until_next_call(
    timer: u64,
    time_until_out: *mut i64,
) -> i32 {
    guarded(|| {
        let bridge = BRIDGE.lock();
        let remaining = lookup(&bridge.timers, timer, RclRet::TimerInvalid)?
            .time_until_next_call()
            .map_err(timer_fail)?;
        // SAFETY: forwarded caller contract
        unsafe { write_out(time_until_out, remaining)? };
        Ok(RclRet::Ok)
    })
}

#[no_mangle]
pub extern "C" fn native_rcl_timer_cancel(timer: u64) -> i32 {
    guarded(|| {
        let bridge = BRIDGE.lock();
        let timer = lookup(&bridge.timers, timer, RclRet::TimerInvalid)?;
        timer.cancel().map_err(timer_fail)?;
        Ok(RclRet::Ok)
    })
}

#[no_mangle]
pub extern "C" fn native_rcl_timer_reset(timer: u64) -> i32 {
    guarded(|| {
        let bridge = BRIDGE.lock();
        let timer = lookup(&bridge.timers, timer, RclRet::TimerInvalid)?;
        timer.reset().map_err(timer_fail)?;
        Ok(RclRet::Ok)
    })
}

// ============================================================================
// Wait sets
// ============================================================================

/// A fresh zero-initialized wait set token.
#[no_mangle]
pub extern "C" fn native_rcl_get_zero_initialized_wait_set() -> u64 {
    let mut bridge = BRIDGE.lock();
    let wait_set = match &bridge.context {
        Some(context) => context.create_wait_set(),
        None => WaitSet::new(),
    };
    bridge
        .wait_sets
        .insert(Arc::new(Mutex::new(wait_set)))
        .to_bits()
}

/// Run `f` on an idle wait set.
fn with_wait_set<R>(
    bridge: &Bridge,
    wait_set: u64,
    f: impl FnOnce(&mut WaitSet) -> R,
) -> Result<R, RclRet> {
    let shared = lookup(&bridge.wait_sets, wait_set, RclRet::WaitSetInvalid)?;
    let mut guard = shared.try_lock().ok_or(RclRet::WaitSetInvalid)?;
    Ok(f(&mut guard))
}

#[no_mangle]
pub extern "C" fn native_rcl_wait_set_init(
    wait_set: u64,
    subscriptions: i64,
    guard_conditions: i64,
    timers: i64,
    clients: i64,
    services: i64,
    events: i64,
) -> i32 {
    guarded(|| {
        let capacities = WaitSetCapacities::from_counts(
            subscriptions,
            guard_conditions,
            timers,
            clients,
            services,
            events,
        );
        let capacities = capacities.map_err(fail)?;
        let bridge = BRIDGE.lock();
        with_wait_set(&bridge, wait_set, |ws| status(&ws.initialize(capacities)))
    })
}

#[no_mangle]
pub extern "C" fn native_rcl_wait_set_clear(wait_set: u64) -> i32 {
    guarded(|| {
        let bridge = BRIDGE.lock();
        with_wait_set(&bridge, wait_set, |ws| status(&ws.clear()))
    })
}

#[no_mangle]
pub extern "C" fn native_rcl_wait_set_add_subscription(wait_set: u64, subscription: u64) -> i32 {
    guarded(|| {
        let bridge = BRIDGE.lock();
        let entity = lookup(&bridge.subscriptions, subscription, RclRet::SubscriptionInvalid)?;
        with_wait_set(&bridge, wait_set, |ws| status(&ws.add_subscription(entity)))
    })
}

#[no_mangle]
pub extern "C" fn native_rcl_wait_set_add_guard_condition(
    wait_set: u64,
    guard_condition: u64,
) -> i32 {
    guarded(|| {
        let bridge = BRIDGE.lock();
        let entity = lookup(
            &bridge.guard_conditions,
            guard_condition,
            RclRet::InvalidArgument,
        )?;
        with_wait_set(&bridge, wait_set, |ws| status(&ws.add_guard_condition(entity)))
    })
}

#[no_mangle]
pub extern "C" fn native_rcl_wait_set_add_service(wait_set: u64, service: u64) -> i32 {
    guarded(|| {
        let bridge = BRIDGE.lock();
        let entity = lookup(&bridge.services, service, RclRet::ServiceInvalid)?;
        with_wait_set(&bridge, wait_set, |ws| status(&ws.add_service(entity)))
    })
}

#[no_mangle]
pub extern "C" fn native_rcl_wait_set_add_client(wait_set: u64, client: u64) -> i32 {
    guarded(|| {
        let bridge = BRIDGE.lock();
        let entity = lookup(&bridge.clients, client, RclRet::ClientInvalid)?;
        with_wait_set(&bridge, wait_set, |ws| status(&ws.add_client(entity)))
    })
}

#[no_mangle]
pub extern "C" fn native_rcl_wait_set_add_timer(wait_set: u64, timer: u64) -> i32 {
    guarded(|| {
        let bridge = BRIDGE.lock();
        let entity = lookup(&bridge.timers, timer, RclRet::TimerInvalid)?;
        with_wait_set(&bridge, wait_set, |ws| status(&ws.add_timer(entity)))
    })
}

fn slot_ready(wait_set: u64, kind: EntityKind, index: i64) -> bool {
    let Ok(slot) = usize::try_from(index) else {
        return false;
    };
    let bridge = BRIDGE.lock();
    with_wait_set(&bridge, wait_set, |ws| ws.is_ready(kind, slot).unwrap_or(false))
        .unwrap_or(false)
}

#[no_mangle]
pub extern "C" fn native_rcl_wait_set_subscription_ready(wait_set: u64, index: i64) -> bool {
    slot_ready(wait_set, EntityKind::Subscription, index)
}

#[no_mangle]
pub extern "C" fn native_rcl_wait_set_guard_condition_ready(wait_set: u64, index: i64) -> bool {
    slot_ready(wait_set, EntityKind::GuardCondition, index)
}

#[no_mangle]
pub extern "C" fn native_rcl_wait_set_timer_ready(wait_set: u64, index: i64) -> bool {
    slot_ready(wait_set, EntityKind::Timer, index)
}

#[no_mangle]
pub extern "C" fn native_rcl_wait_set_client_ready(wait_set: u64, index: i64) -> bool {
    slot_ready(wait_set, EntityKind::Client, index)
}

#[no_mangle]
pub extern "C" fn native_rcl_wait_set_service_ready(wait_set: u64, index: i64) -> bool {
    slot_ready(wait_set, EntityKind::Service, index)
}

/// Destroy a wait set. Unknown and already destroyed tokens are ignored.
#[no_mangle]
pub extern "C" fn native_rcl_destroy_wait_set(wait_set: u64) {
    let removed = {
        let mut bridge = BRIDGE.lock();
        remove(&mut bridge.wait_sets, wait_set, RclRet::WaitSetInvalid)
    };
    if let Ok(shared) = removed {
        // A wait in progress keeps its own reference and finishes normally
        if let Some(mut ws) = shared.try_lock() {
            ws.destroy();
        }
    }
}

/// Block until an added entity is ready.
///
/// `timeout_ns`: negative waits forever, zero polls once.
/// Returns `OK`, `TIMEOUT`, `ALREADY_SHUTDOWN` (interrupted) or an error code.
#[no_mangle]
pub extern "C" fn native_rcl_wait(wait_set: u64, timeout_ns: i64) -> i32 {
    guarded(|| {
        let (shared, shutdown) = {
            let bridge = BRIDGE.lock();
            let shared = lookup(&bridge.wait_sets, wait_set, RclRet::WaitSetInvalid)?;
            (Arc::clone(shared), bridge.context()?.shutdown_token())
        };

        let mut ws = shared.try_lock().ok_or(RclRet::WaitSetInvalid)?;
        let mut filled = 0;
        for kind in EntityKind::WAITABLE {
            filled += ws.size(kind).map_err(fail)?;
        }
        if filled == 0 {
            return Err(RclRet::WaitSetEmpty);
        }

        match ws.wait(WaitTimeout::from_nanos(timeout_ns), &shutdown) {
            Ok(WaitOutcome::Ready(_)) => Ok(RclRet::Ok),
            Ok(WaitOutcome::Timeout) => Ok(RclRet::Timeout),
            Ok(WaitOutcome::Interrupted) => Ok(RclRet::AlreadyShutdown),
            Err(err) => Err(fail(err)),
        }
    })
}

// ============================================================================
// Takes, request headers, responses
// ============================================================================

/// Drain one message into the caller's buffer.
///
/// # Safety
/// `buffer` is valid for `capacity` bytes; `len_out` is writable.
#[no_mangle]
pub unsafe extern "C" fn native_rcl_take(
    subscription: u64,
    buffer: *mut u8,
    capacity: usize,
    len_out: *mut usize,
) -> i32 {
    let out = OutBuffer {
        ptr: buffer,
        capacity,
        len: len_out,
    };
    guarded(|| {
        out.check()?;
        let bridge = BRIDGE.lock();
        let subscription = lookup(&bridge.subscriptions, subscription, RclRet::SubscriptionInvalid)?;
        match subscription
            .take_raw(Some(capacity))
            .map_err(fail)?
        {
            Some(bytes) => {
                // SAFETY: forwarded caller contract
                unsafe { out.fill(&bytes)? };
                Ok(RclRet::Ok)
            }
            None => Ok(take_code(TakeStatus::NoDataAvailable, EntityKind::Subscription)),
        }
    })
}

/// A fresh, unpopulated request header token.
#[no_mangle]
pub extern "C" fn native_rcl_create_request_header_handle() -> u64 {
    BRIDGE.lock().headers.insert(RequestHeader::new()).to_bits()
}

/// Destroy a request header. Unknown and already destroyed tokens are ignored.
#[no_mangle]
pub extern "C" fn native_rcl_destroy_request_header_handle(header: u64) {
    let _ = remove(&mut BRIDGE.lock().headers, header, RclRet::InvalidArgument);
}

/// Sequence number of a populated header; `0` otherwise.
#[no_mangle]
pub extern "C" fn native_rcl_request_header_get_sequence_number(header: u64) -> i64 {
    let bridge = BRIDGE.lock();
    lookup(&bridge.headers, header, RclRet::InvalidArgument)
        .map_or(0, RequestHeader::sequence_number)
}

fn store_header(bridge: &mut Bridge, token: u64, header: RequestHeader) -> Result<(), RclRet> {
    let key = ArenaKey::from_bits(token).ok_or(RclRet::InvalidArgument)?;
    let slot = bridge.headers.get_mut(key).ok_or(RclRet::InvalidArgument)?;
    *slot = header;
    Ok(())
}

/// Drain one request, populating `header`.
///
/// # Safety
/// `buffer` is valid for `capacity` bytes; `len_out` is writable.
#[no_mangle]
pub unsafe extern "C" fn native_rcl_take_request(
    service: u64,
    header: u64,
    buffer: *mut u8,
    capacity: usize,
    len_out: *mut usize,
) -> i32 {
    let out = OutBuffer {
        ptr: buffer,
        capacity,
        len: len_out,
    };
    guarded(|| {
        out.check()?;
        let mut bridge = BRIDGE.lock();
        lookup(&bridge.headers, header, RclRet::InvalidArgument)?;
        let taken = lookup(&bridge.services, service, RclRet::ServiceInvalid)?
            .take_raw(Some(capacity))
            .map_err(fail)?;
        match taken {
            Some((request_header, bytes)) => {
                // SAFETY: forwarded caller contract
                unsafe { out.fill(&bytes)? };
                store_header(&mut *bridge, header, request_header)?;
                Ok(RclRet::Ok)
            }
            None => Ok(take_code(TakeStatus::NoDataAvailable, EntityKind::Service)),
        }
    })
}

/// Send a serialized response to the client named by `header`.
///
/// # Safety
/// `data` is valid for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn native_rcl_send_response(
    service: u64,
    header: u64,
    data: *const u8,
    len: usize,
) -> i32 {
    guarded(|| {
        // SAFETY: forwarded caller contract
        let bytes = unsafe { read_bytes(data, len)? };
        let bridge = BRIDGE.lock();
        let request_header = lookup(&bridge.headers, header, RclRet::InvalidArgument)?;
        let service = lookup(&bridge.services, service, RclRet::ServiceInvalid)?;
        Ok(status(&service.send_response_serialized(request_header, bytes)))
    })
}

/// Drain one response, populating `header`.
///
/// # Safety
/// `buffer` is valid for `capacity` bytes; `len_out` is writable.
#[no_mangle]
pub unsafe extern "C" fn native_rcl_take_response(
    client: u64,
    header: u64,
    buffer: *mut u8,
    capacity: usize,
    len_out: *mut usize,
) -> i32 {
    let out = OutBuffer {
        ptr: buffer,
        capacity,
        len: len_out,
    };
    guarded(|| {
        out.check()?;
        let mut bridge = BRIDGE.lock();
        lookup(&bridge.headers, header, RclRet::InvalidArgument)?;
        let taken = lookup(&bridge.clients, client, RclRet::ClientInvalid)?
            .take_raw(Some(capacity))
            .map_err(fail)?;
        match taken {
            Some((response_header, bytes)) => {
                // SAFETY: forwarded caller contract
                unsafe { out.fill(&bytes)? };
                store_header(&mut *bridge, header, response_header)?;
                Ok(RclRet::Ok)
            }
            None => Ok(take_code(TakeStatus::NoDataAvailable, EntityKind::Client)),
        }
    })
}
