//! Domain types for the client library.
//!
//! Entity identity, wait set lifecycle, clocks, correlation headers, node
//! parameters, errors and configuration. Entity state and blocking live in the middleware layer
//! behind [`ReadinessSource`](crate::ports::ReadinessSource).

pub mod clock;
pub mod config;
pub mod errors;
pub mod handles;
pub mod outcomes;
pub mod parameters;
pub mod registry;
pub mod request_header;
pub mod shutdown;
pub mod wait_set;

// Re-exports for convenience
pub use clock::{Clock, ClockType, Time, TimeJumpObserver, TimePoint};
pub use config::{RclConfig, RclConfigBuilder, DEFAULT_RMW_IDENTIFIER, MAX_DOMAIN_ID};
pub use errors::{RclError, RclResult, RclRet};
pub use handles::{EntityId, EntityKind};
pub use outcomes::{MatchedStatus, ReadyEntity, TakeStatus, WaitOutcome, WaitTimeout};
pub use parameters::{ParameterStore, ParameterType, ParameterValue};
pub use registry::{Arena, ArenaKey};
pub use request_header::{RequestHeader, WriterGuid};
pub use shutdown::{ShutdownListener, ShutdownToken};
pub use wait_set::{WaitSet, WaitSetCapacities};
