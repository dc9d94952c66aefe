//! # Error Types
//!
//! Failure categories for every core operation, plus the integer result codes
//! used at the foreign-function boundary.
//!
//! Non-error outcomes (`Timeout`, `Interrupted`, `NoDataAvailable`) are NOT
//! errors here. They live in [`WaitOutcome`](crate::domain::WaitOutcome) and
//! [`TakeStatus`](crate::domain::TakeStatus) so that callers never have to
//! tell "no data" and "failure" apart by inspecting one sentinel.

use crate::domain::handles::EntityKind;
use thiserror::Error;

/// Errors returned by the core.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RclError {
    /// Malformed call parameters (negative capacity, bad name, foreign handle).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Storage could not be reserved.
    #[error("Resource exhausted: cannot reserve {requested} {kind} slots")]
    ResourceExhausted { kind: EntityKind, requested: usize },

    /// Add-to-wait-set beyond the capacity declared at initialization.
    #[error("Capacity exceeded: all {capacity} {kind} slots are in use")]
    CapacityExceeded { kind: EntityKind, capacity: usize },

    /// Stale, destroyed or misrouted handle.
    #[error("Invalid {kind} handle: {reason}")]
    InvalidHandle { kind: EntityKind, reason: String },

    /// Operation on a destroyed wait set.
    #[error("Wait set used after destroy")]
    UseAfterFree,

    /// Operation not valid in the current lifecycle state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Transport or serialization failure.
    #[error("Operation failed: {0}")]
    Failed(String),
}

impl RclError {
    pub(crate) fn invalid_handle(kind: EntityKind, reason: impl Into<String>) -> Self {
        Self::InvalidHandle {
            kind,
            reason: reason.into(),
        }
    }
}

impl From<bincode::Error> for RclError {
    fn from(err: bincode::Error) -> Self {
        Self::Failed(format!("serialization: {}", err))
    }
}

/// Convenience alias used throughout the crate.
pub type RclResult<T> = Result<T, RclError>;

/// Integer result codes crossing the foreign-function boundary.
///
/// Values follow the numbering used by the C client library so bindings can
/// share their error tables.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RclRet {
    Ok = 0,
    Error = 1,
    Timeout = 2,
    BadAlloc = 10,
    InvalidArgument = 11,
    AlreadyInit = 100,
    NotInit = 101,
    AlreadyShutdown = 106,
    NodeInvalid = 200,
    PublisherInvalid = 300,
    SubscriptionInvalid = 400,
    SubscriptionTakeFailed = 401,
    ClientInvalid = 500,
    ClientTakeFailed = 501,
    ServiceInvalid = 600,
    ServiceTakeFailed = 601,
    TimerInvalid = 800,
    TimerCanceled = 801,
    WaitSetInvalid = 900,
    WaitSetEmpty = 901,
    WaitSetFull = 902,
    EventInvalid = 2000,
    EventTakeFailed = 2001,
}

impl RclRet {
    /// Raw code for the boundary.
    #[must_use]
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Code reported when a take on `kind` found nothing to drain.
    #[must_use]
    pub fn take_failed(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Client => Self::ClientTakeFailed,
            EntityKind::Service => Self::ServiceTakeFailed,
            EntityKind::Event => Self::EventTakeFailed,
            _ => Self::SubscriptionTakeFailed,
        }
    }

    fn invalid_handle(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Node => Self::NodeInvalid,
            EntityKind::Publisher => Self::PublisherInvalid,
            EntityKind::Subscription => Self::SubscriptionInvalid,
            EntityKind::Client => Self::ClientInvalid,
            EntityKind::Service => Self::ServiceInvalid,
            EntityKind::Timer => Self::TimerInvalid,
            EntityKind::Event => Self::EventInvalid,
            EntityKind::GuardCondition => Self::InvalidArgument,
        }
    }
}

impl From<&RclError> for RclRet {
    fn from(err: &RclError) -> Self {
        match err {
            RclError::InvalidArgument(_) => Self::InvalidArgument,
            RclError::ResourceExhausted { .. } => Self::BadAlloc,
            RclError::CapacityExceeded { .. } => Self::WaitSetFull,
            RclError::InvalidHandle { kind, .. } => Self::invalid_handle(*kind),
            RclError::UseAfterFree | RclError::InvalidState(_) => Self::WaitSetInvalid,
            RclError::Failed(_) => Self::Error,
        }
    }
}

impl<T> From<&RclResult<T>> for RclRet {
    fn from(result: &RclResult<T>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RclError::CapacityExceeded {
            kind: EntityKind::Subscription,
            capacity: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("4"));
        assert!(msg.contains("subscription"));
    }

    #[test]
    fn test_codes_are_distinct_for_no_data_and_failure() {
        let failed = RclRet::from(&RclError::Failed("boom".into()));
        let no_data = RclRet::take_failed(EntityKind::Subscription);
        assert_ne!(failed, no_data);
        assert_eq!(no_data.code(), 401);
    }

    #[test]
    fn test_invalid_handle_maps_per_kind() {
        let err = RclError::invalid_handle(EntityKind::Client, "stale");
        assert_eq!(RclRet::from(&err), RclRet::ClientInvalid);

        let err = RclError::invalid_handle(EntityKind::Timer, "stale");
        assert_eq!(RclRet::from(&err).code(), 800);
    }

    #[test]
    fn test_wait_set_state_errors() {
        assert_eq!(RclRet::from(&RclError::UseAfterFree), RclRet::WaitSetInvalid);
        assert_eq!(
            RclRet::from(&RclError::InvalidState("not initialized".into())),
            RclRet::WaitSetInvalid
        );
    }

    #[test]
    fn test_result_mapping() {
        let ok: RclResult<()> = Ok(());
        assert_eq!(RclRet::from(&ok), RclRet::Ok);
    }
}
