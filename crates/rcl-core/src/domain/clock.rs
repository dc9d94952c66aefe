//! # Clock
//!
//! Time sources used by timers and by callers stamping messages.
//!
//! | Type | Source |
//! |------|--------|
//! | `SystemTime` | Wall clock, nanoseconds since the Unix epoch |
//! | `SteadyTime` | Monotonic clock, nanoseconds since process start |
//! | `RosTime` | Override value when enabled, otherwise `SystemTime` |
//!
//! While a ROS time override is active the clock is frozen: it only moves
//! when `set_ros_time_override` is called. Every change is reported to the
//! clock's [`TimeJumpObserver`] so blocked waits re-evaluate their timers.

use crate::domain::errors::{RclError, RclResult};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

const NANOS_PER_SEC: i64 = 1_000_000_000;

lazy_static! {
    static ref STEADY_EPOCH: Instant = Instant::now();
}

/// Source of a time measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClockType {
    Uninitialized,
    RosTime,
    SystemTime,
    SteadyTime,
}

/// Seconds/nanoseconds pair as carried inside messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Time {
    pub sec: i32,
    pub nanosec: u32,
}

/// A point in time in nanoseconds on some clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimePoint {
    pub nanoseconds: i64,
}

impl TimePoint {
    /// Create from raw nanoseconds.
    #[must_use]
    pub fn from_nanos(nanoseconds: i64) -> Self {
        Self { nanoseconds }
    }

    /// Split into the message representation.
    ///
    /// `nanosec` is always in `0..1e9`; negative points borrow from `sec`.
    #[must_use]
    pub fn to_msg(self) -> Time {
        let sec = self.nanoseconds.div_euclid(NANOS_PER_SEC);
        let nanosec = self.nanoseconds.rem_euclid(NANOS_PER_SEC);
        Time {
            sec: sec as i32,
            nanosec: nanosec as u32,
        }
    }

    /// Rebuild from the message representation.
    #[must_use]
    pub fn from_msg(message: Time) -> Self {
        Self {
            nanoseconds: i64::from(message.sec) * NANOS_PER_SEC + i64::from(message.nanosec),
        }
    }
}

/// Notified when a clock's notion of "now" jumps.
pub trait TimeJumpObserver: Send + Sync {
    fn on_time_jump(&self);
}

#[derive(Debug, Default)]
struct RosTimeOverride {
    enabled: bool,
    value: i64,
}

/// A clock handle. Clones share override state.
#[derive(Clone)]
pub struct Clock {
    clock_type: ClockType,
    ros_override: Arc<Mutex<RosTimeOverride>>,
    observer: Option<Weak<dyn TimeJumpObserver>>,
}

impl Clock {
    /// Create a detached clock of the given type.
    #[must_use]
    pub fn new(clock_type: ClockType) -> Self {
        Self {
            clock_type,
            ros_override: Arc::new(Mutex::new(RosTimeOverride::default())),
            observer: None,
        }
    }

    /// Create a clock that reports override changes to `observer`.
    #[must_use]
    pub fn with_observer(clock_type: ClockType, observer: Weak<dyn TimeJumpObserver>) -> Self {
        Self {
            observer: Some(observer),
            ..Self::new(clock_type)
        }
    }

    /// Type of this clock.
    #[must_use]
    pub fn clock_type(&self) -> ClockType {
        self.clock_type
    }

    /// Current time on this clock.
    pub fn now(&self) -> RclResult<TimePoint> {
        let nanoseconds = match self.clock_type {
            ClockType::Uninitialized => {
                return Err(RclError::InvalidState("clock is uninitialized".into()))
            }
            ClockType::SteadyTime => steady_nanos(),
            ClockType::SystemTime => system_nanos(),
            ClockType::RosTime => {
                let state = self.ros_override.lock();
                if state.enabled {
                    state.value
                } else {
                    system_nanos()
                }
            }
        };
        Ok(TimePoint::from_nanos(nanoseconds))
    }

    /// Whether time only advances through `set_ros_time_override`.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.clock_type == ClockType::RosTime && self.ros_override.lock().enabled
    }

    /// Whether a ROS time override is currently active.
    pub fn is_ros_time_override_enabled(&self) -> RclResult<bool> {
        self.require_ros_time()?;
        Ok(self.ros_override.lock().enabled)
    }

    /// Start reporting the override value instead of the system time.
    pub fn enable_ros_time_override(&self) -> RclResult<()> {
        self.require_ros_time()?;
        self.ros_override.lock().enabled = true;
        debug!("ROS time override enabled");
        self.notify_jump();
        Ok(())
    }

    /// Go back to reporting the system time.
    pub fn disable_ros_time_override(&self) -> RclResult<()> {
        self.require_ros_time()?;
        self.ros_override.lock().enabled = false;
        debug!("ROS time override disabled");
        self.notify_jump();
        Ok(())
    }

    /// Set the override value. Takes effect only while the override is enabled.
    pub fn set_ros_time_override(&self, nanoseconds: i64) -> RclResult<()> {
        self.require_ros_time()?;
        self.ros_override.lock().value = nanoseconds;
        debug!(nanoseconds, "ROS time override set");
        self.notify_jump();
        Ok(())
    }

    fn require_ros_time(&self) -> RclResult<()> {
        if self.clock_type != ClockType::RosTime {
            return Err(RclError::InvalidArgument(format!(
                "time override requires a RosTime clock, got {:?}",
                self.clock_type
            )));
        }
        Ok(())
    }

    fn notify_jump(&self) {
        if let Some(observer) = self.observer.as_ref().and_then(Weak::upgrade) {
            observer.on_time_jump();
        }
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock")
            .field("clock_type", &self.clock_type)
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

fn steady_nanos() -> i64 {
    i64::try_from(STEADY_EPOCH.elapsed().as_nanos()).unwrap_or(i64::MAX)
}

fn system_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
