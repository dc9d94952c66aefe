//! Periodic timers. Readiness is derived from the timer's clock: a timer is
//! ready once `now >= next_call` and stays ready until `call` advances it.

use crate::domain::{Clock, EntityId, EntityKind, RclError, RclResult, TakeStatus};
use crate::middleware::context::{Context, EntityHandle};
use crate::middleware::state::{EntityBody, MiddlewareState, TimerRecord};
use crate::ports::{ReadinessSource, Waitable};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

pub struct Timer {
    handle: EntityHandle,
}

fn record(state: &mut MiddlewareState, id: EntityId) -> RclResult<&mut TimerRecord> {
    match state.body_mut(id)? {
        EntityBody::Timer(timer) => Ok(timer),
        _ => Err(RclError::invalid_handle(EntityKind::Timer, "not a timer")),
    }
}

impl Timer {
    pub(crate) fn new(context: Context, id: EntityId) -> Self {
        Self {
            handle: EntityHandle::new(context, id),
        }
    }

    fn with_record<R>(&self, f: impl FnOnce(&mut TimerRecord) -> RclResult<R>) -> RclResult<R> {
        let id = self.handle.id();
        self.handle.context().mutate(|state| f(record(state, id)?))
    }

    /// Consume one period if it has elapsed.
    ///
    /// Missed periods are skipped: the next call time lands on the first
    /// period boundary after now.
    ///
    /// # Errors
    /// - `InvalidState`: the timer is canceled
    pub fn call(&self) -> RclResult<TakeStatus> {
        self.with_record(|timer| {
            if timer.canceled {
                return Err(RclError::InvalidState("timer is canceled".into()));
            }
            let now = timer.clock.now()?.nanoseconds;
            if now < timer.next_call {
                return Ok(TakeStatus::NoDataAvailable);
            }
            // A jump wider than i64 restarts the period from now
            let (missed, next_call) = match now.checked_sub(timer.next_call) {
                Some(late) => {
                    let missed = late / timer.period;
                    let advance = timer.period.saturating_mul(missed.saturating_add(1));
                    (missed, timer.next_call.saturating_add(advance))
                }
                None => (i64::MAX, now.saturating_add(timer.period)),
            };
            timer.next_call = next_call;
            trace!(missed, next_call, "Timer called");
            Ok(TakeStatus::Taken)
        })
    }

    /// Stop the timer from becoming ready until `reset`.
    pub fn cancel(&self) -> RclResult<()> {
        self.with_record(|timer| {
            timer.canceled = true;
            Ok(())
        })
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.with_record(|timer| Ok(timer.canceled)).unwrap_or(true)
    }

    /// Uncancel and restart the period from now.
    pub fn reset(&self) -> RclResult<()> {
        self.with_record(|timer| {
            timer.canceled = false;
            timer.next_call = timer.clock.now()?.nanoseconds.saturating_add(timer.period);
            Ok(())
        })
    }

    /// Whether the period has elapsed and the timer is not canceled.
    pub fn is_ready(&self) -> RclResult<bool> {
        self.with_record(|timer| {
            Ok(!timer.canceled && timer.clock.now()?.nanoseconds >= timer.next_call)
        })
    }

    /// Nanoseconds until the next call; zero or negative when overdue.
    ///
    /// # Errors
    /// - `InvalidState`: the timer is canceled
    pub fn time_until_next_call(&self) -> RclResult<i64> {
        self.with_record(|timer| {
            if timer.canceled {
                return Err(RclError::InvalidState("timer is canceled".into()));
            }
            Ok(timer.next_call.saturating_sub(timer.clock.now()?.nanoseconds))
        })
    }

    pub fn period(&self) -> RclResult<Duration> {
        self.with_record(|timer| Ok(Duration::from_nanos(timer.period.unsigned_abs())))
    }

    pub fn clock(&self) -> RclResult<Clock> {
        self.with_record(|timer| Ok(timer.clock.clone()))
    }

    pub fn destroy(mut self) -> RclResult<()> {
        self.handle.release()
    }
}

impl Waitable for Timer {
    fn entity_id(&self) -> EntityId {
        self.handle.id()
    }

    fn readiness_source(&self) -> Arc<dyn ReadinessSource> {
        self.handle.context().readiness_source()
    }
}
