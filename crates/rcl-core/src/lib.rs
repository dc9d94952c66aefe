//! # RCL Core - Wait Sets and Request/Response Correlation
//!
//! Client-library core for a publish/subscribe + RPC middleware: entity
//! handles, a wait set that blocks until any member is ready, take/send
//! operations and the header that correlates a response with its request.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                         Foreign binding                           │
//! │                  (ffi.rs: flat extern "C" table)                  │
//! └───────────────────────────────┬───────────────────────────────────┘
//!                                 │ u64 handles
//! ┌───────────────────────────────┴───────────────────────────────────┐
//! │  Executor            PendingRequests           WaitSet            │
//! │  (spin, dispatch)    (sequence → callback)     (domain/)          │
//! └───────────────────────────────┬───────────────────────────────────┘
//!                                 │ ReadinessSource (ports/)
//! ┌───────────────────────────────┴───────────────────────────────────┐
//! │  Context ── Node ── Publisher / Subscription / Service / Client   │
//! │             Timer / GuardCondition / EventHandle  (middleware/)   │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wait cycle
//!
//! | Step | Call                      | Effect                                  |
//! |------|---------------------------|-----------------------------------------|
//! | 1    | `WaitSet::initialize`     | reserve per-kind slots                  |
//! | 2    | `add_*`                   | fill slots, bind to one context         |
//! | 3    | `wait`                    | block until ready, timeout or shutdown  |
//! | 4    | `is_ready` / `take_*`     | drain ready entities                    |
//! | 5    | `clear`                   | back to step 2                          |
//!
//! ## Usage
//!
//! ```ignore
//! use rcl_core::{Context, RclConfig, WaitSet, WaitSetCapacities, WaitTimeout};
//!
//! let context = Context::init(RclConfig::default())?;
//! let node = context.create_node("listener", "/demo")?;
//! let subscription = node.create_subscription("chatter")?;
//!
//! let mut wait_set = context.create_wait_set();
//! wait_set.initialize(WaitSetCapacities { subscriptions: 1, ..Default::default() })?;
//! wait_set.add_subscription(&subscription)?;
//! wait_set.wait(WaitTimeout::Infinite, &context.shutdown_token())?;
//!
//! let mut message = String::new();
//! if subscription.take(&mut message)?.is_taken() {
//!     println!("heard: {}", message);
//! }
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod correlation;
pub mod domain;
pub mod executor;
pub mod ffi;
pub mod middleware;
pub mod ports;

// Re-export main types
pub use correlation::{Correlated, PendingRequests, PendingStats};
pub use domain::{
    Clock, ClockType, EntityId, EntityKind, MatchedStatus, ParameterType, ParameterValue, RclConfig,
    RclError, RclResult, RclRet, ReadyEntity, RequestHeader, ShutdownToken, TakeStatus, Time,
    TimePoint, WaitOutcome, WaitSet, WaitSetCapacities, WaitTimeout, WriterGuid,
};
pub use executor::{ClientKey, Executor, SpinOutcome};
pub use middleware::{
    Client, Context, EventHandle, GuardCondition, Node, Publisher, Service, Subscription, Timer,
};
pub use ports::{ReadinessSource, Waitable};
