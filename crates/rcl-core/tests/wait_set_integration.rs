//! # Wait Set Integration Tests
//!
//! Drive the full populate → wait → drain cycle through the public API.
//!
//! ## Test Categories
//!
//! 1. **Lifecycle** - capacities, clear/repopulate, destroy
//! 2. **Blocking** - zero timeout, infinite wait, shutdown interrupt
//! 3. **Readiness** - subscriptions, guards, timers, events
//! 4. **Concurrency** - independent wait sets on separate threads

use proptest::prelude::*;
use rcl_core::{
    ClockType, Context, EntityKind, MatchedStatus, RclConfig, RclError, ShutdownToken, TakeStatus,
    WaitOutcome, WaitSet, WaitSetCapacities, WaitTimeout,
};
use std::thread;
use std::time::{Duration, Instant};

// =============================================================================
// TEST HELPERS
// =============================================================================

fn context() -> Context {
    Context::init(RclConfig::default()).unwrap()
}

fn subscriptions(count: usize) -> WaitSetCapacities {
    WaitSetCapacities {
        subscriptions: count,
        ..Default::default()
    }
}

fn ready_kinds(outcome: &WaitOutcome) -> Vec<(EntityKind, usize)> {
    outcome.ready().iter().map(|entry| (entry.kind, entry.slot)).collect()
}

// =============================================================================
// LIFECYCLE
// =============================================================================

proptest! {
    #[test]
    fn test_capacity_is_exact(capacity in 1usize..16) {
        let ctx = context();
        let node = ctx.create_node("capacity", "").unwrap();
        let subs: Vec<_> = (0..=capacity)
            .map(|_| node.create_subscription("chatter").unwrap())
            .collect();

        let mut wait_set = ctx.create_wait_set();
        wait_set.initialize(subscriptions(capacity)).unwrap();
        for (slot, sub) in subs.iter().take(capacity).enumerate() {
            prop_assert_eq!(wait_set.add_subscription(sub).unwrap(), slot);
        }
        let overflow = wait_set.add_subscription(&subs[capacity]);
        let is_capacity_exceeded = matches!(overflow, Err(RclError::CapacityExceeded { .. }));
        prop_assert!(is_capacity_exceeded);
        prop_assert_eq!(wait_set.size(EntityKind::Subscription).unwrap(), capacity);
    }
}

#[test]
fn test_clear_and_repopulate_cycles() {
    let ctx = context();
    let node = ctx.create_node("cycles", "").unwrap();
    let publisher = node.create_publisher("chatter").unwrap();
    let first = node.create_subscription("chatter").unwrap();
    let second = node.create_subscription("other").unwrap();

    let mut wait_set = ctx.create_wait_set();
    wait_set.initialize(subscriptions(1)).unwrap();
    let shutdown = ShutdownToken::new();

    for round in 0..5 {
        wait_set.clear().unwrap();
        let target = if round % 2 == 0 { &first } else { &second };
        wait_set.add_subscription(target).unwrap();

        publisher.publish(&format!("round {}", round)).unwrap();
        let outcome = wait_set.wait(WaitTimeout::Poll, &shutdown).unwrap();

        // Only `first` listens on chatter
        assert_eq!(outcome.is_ready(), round % 2 == 0, "round {}", round);
        let mut message = String::new();
        while first.take(&mut message).unwrap().is_taken() {}
    }
}

#[test]
fn test_use_after_destroy() {
    let ctx = context();
    let node = ctx.create_node("destroyed", "").unwrap();
    let sub = node.create_subscription("chatter").unwrap();

    let mut wait_set = ctx.create_wait_set();
    wait_set.initialize(subscriptions(1)).unwrap();
    wait_set.destroy();
    wait_set.destroy();

    assert_eq!(wait_set.add_subscription(&sub), Err(RclError::UseAfterFree));
    assert_eq!(wait_set.clear(), Err(RclError::UseAfterFree));
    assert_eq!(
        wait_set.wait(WaitTimeout::Poll, &ShutdownToken::new()),
        Err(RclError::UseAfterFree)
    );
    assert_eq!(
        wait_set.initialize(subscriptions(1)),
        Err(RclError::UseAfterFree)
    );
}

#[test]
fn test_uninitialized_wait_set_rejected() {
    let ctx = context();
    let guard = ctx.create_guard_condition().unwrap();
    let mut wait_set = WaitSet::new();

    assert!(matches!(
        wait_set.add_guard_condition(&guard),
        Err(RclError::InvalidState(_))
    ));
    assert!(matches!(
        wait_set.is_ready(EntityKind::GuardCondition, 0),
        Err(RclError::InvalidState(_))
    ));
}

#[test]
fn test_entity_from_other_context_rejected() {
    let first = context();
    let second = context();
    let guard_a = first.create_guard_condition().unwrap();
    let guard_b = second.create_guard_condition().unwrap();

    let mut wait_set = first.create_wait_set();
    wait_set
        .initialize(WaitSetCapacities {
            guard_conditions: 2,
            ..Default::default()
        })
        .unwrap();
    wait_set.add_guard_condition(&guard_a).unwrap();
    assert!(matches!(
        wait_set.add_guard_condition(&guard_b),
        Err(RclError::InvalidArgument(_))
    ));
}

// =============================================================================
// BLOCKING
// =============================================================================

#[test]
fn test_zero_timeout_returns_immediately() {
    let ctx = context();
    let node = ctx.create_node("poller", "").unwrap();
    let sub = node.create_subscription("quiet").unwrap();

    let mut wait_set = ctx.create_wait_set();
    wait_set.initialize(subscriptions(1)).unwrap();
    wait_set.add_subscription(&sub).unwrap();

    let started = Instant::now();
    let outcome = wait_set
        .wait(WaitTimeout::from_nanos(0), &ctx.shutdown_token())
        .unwrap();
    assert_eq!(outcome, WaitOutcome::Timeout);
    assert!(started.elapsed() < Duration::from_millis(50));
    assert!(!wait_set.is_ready(EntityKind::Subscription, 0).unwrap());
}

#[test]
fn test_bounded_timeout_elapses() {
    let ctx = context();
    let guard = ctx.create_guard_condition().unwrap();
    let mut wait_set = ctx.create_wait_set();
    wait_set
        .initialize(WaitSetCapacities {
            guard_conditions: 1,
            ..Default::default()
        })
        .unwrap();
    wait_set.add_guard_condition(&guard).unwrap();

    let started = Instant::now();
    let outcome = wait_set
        .wait(
            WaitTimeout::After(Duration::from_millis(30)),
            &ctx.shutdown_token(),
        )
        .unwrap();
    assert_eq!(outcome, WaitOutcome::Timeout);
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[test]
fn test_infinite_wait_woken_by_publish() {
    let ctx = context();
    let node = ctx.create_node("listener", "").unwrap();
    let sub = node.create_subscription("chatter").unwrap();
    let publisher = node.create_publisher("chatter").unwrap();

    let mut wait_set = ctx.create_wait_set();
    wait_set.initialize(subscriptions(1)).unwrap();
    wait_set.add_subscription(&sub).unwrap();

    let talker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        publisher.publish(&"hello".to_string()).unwrap();
        publisher
    });

    let started = Instant::now();
    let outcome = wait_set
        .wait(WaitTimeout::from_nanos(-1), &ctx.shutdown_token())
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(ready_kinds(&outcome), vec![(EntityKind::Subscription, 0)]);
    assert!(wait_set.is_ready(EntityKind::Subscription, 0).unwrap());

    let mut message = String::new();
    assert_eq!(sub.take(&mut message).unwrap(), TakeStatus::Taken);
    assert_eq!(message, "hello");
    drop(talker.join().unwrap());
}

#[test]
fn test_shutdown_interrupts_wait() {
    let ctx = context();
    let guard = ctx.create_guard_condition().unwrap();
    let mut wait_set = ctx.create_wait_set();
    wait_set
        .initialize(WaitSetCapacities {
            guard_conditions: 1,
            ..Default::default()
        })
        .unwrap();
    wait_set.add_guard_condition(&guard).unwrap();

    let token = ShutdownToken::new();
    let trigger = token.clone();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        trigger.trigger();
    });

    let outcome = wait_set.wait(WaitTimeout::Infinite, &token).unwrap();
    assert_eq!(outcome, WaitOutcome::Interrupted);
    stopper.join().unwrap();

    // The context itself is still running
    assert!(ctx.ok());
}

#[test]
fn test_context_shutdown_interrupts_wait() {
    let ctx = context();
    let guard = ctx.create_guard_condition().unwrap();
    let mut wait_set = ctx.create_wait_set();
    wait_set
        .initialize(WaitSetCapacities {
            guard_conditions: 1,
            ..Default::default()
        })
        .unwrap();
    wait_set.add_guard_condition(&guard).unwrap();

    let remote = ctx.clone();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        remote.shutdown().unwrap();
    });

    let outcome = wait_set
        .wait(WaitTimeout::Infinite, &ShutdownToken::new())
        .unwrap();
    assert_eq!(outcome, WaitOutcome::Interrupted);
    stopper.join().unwrap();
    assert!(!ctx.ok());
}

#[test]
fn test_destroyed_member_fails_wait() {
    let ctx = context();
    let node = ctx.create_node("stale", "").unwrap();
    let sub = node.create_subscription("chatter").unwrap();
    let mut wait_set = ctx.create_wait_set();
    wait_set.initialize(subscriptions(1)).unwrap();
    wait_set.add_subscription(&sub).unwrap();

    sub.destroy().unwrap();
    assert!(matches!(
        wait_set.wait(WaitTimeout::Poll, &ctx.shutdown_token()),
        Err(RclError::InvalidHandle {
            kind: EntityKind::Subscription,
            ..
        })
    ));
}

#[test]
fn test_empty_wait_set_rejected() {
    let ctx = context();
    let mut wait_set = ctx.create_wait_set();
    wait_set.initialize(subscriptions(2)).unwrap();
    assert!(matches!(
        wait_set.wait(WaitTimeout::Poll, &ctx.shutdown_token()),
        Err(RclError::InvalidArgument(_))
    ));
}

// =============================================================================
// READINESS
// =============================================================================

#[test]
fn test_drained_subscription_not_reported_again() {
    let ctx = context();
    let node = ctx.create_node("drain", "").unwrap();
    let publisher = node.create_publisher("chatter").unwrap();
    let sub = node.create_subscription("chatter").unwrap();

    let mut wait_set = ctx.create_wait_set();
    wait_set.initialize(subscriptions(1)).unwrap();
    let shutdown = ctx.shutdown_token();

    publisher.publish(&1u32).unwrap();
    publisher.publish(&2u32).unwrap();

    wait_set.add_subscription(&sub).unwrap();
    assert!(wait_set.wait(WaitTimeout::Poll, &shutdown).unwrap().is_ready());

    let mut value = 0u32;
    assert!(sub.take(&mut value).unwrap().is_taken());
    assert!(sub.take(&mut value).unwrap().is_taken());
    assert_eq!(value, 2);
    assert_eq!(sub.take(&mut value).unwrap(), TakeStatus::NoDataAvailable);

    wait_set.clear().unwrap();
    wait_set.add_subscription(&sub).unwrap();
    assert_eq!(
        wait_set.wait(WaitTimeout::Poll, &shutdown).unwrap(),
        WaitOutcome::Timeout
    );
    assert!(!wait_set.is_ready(EntityKind::Subscription, 0).unwrap());
}

#[test]
fn test_ready_entities_listed_in_slot_order() {
    let ctx = context();
    let node = ctx.create_node("order", "").unwrap();
    let publisher = node.create_publisher("chatter").unwrap();
    let quiet = node.create_subscription("quiet").unwrap();
    let loud_a = node.create_subscription("chatter").unwrap();
    let loud_b = node.create_subscription("chatter").unwrap();
    let guard = ctx.create_guard_condition().unwrap();

    let mut wait_set = ctx.create_wait_set();
    wait_set
        .initialize(WaitSetCapacities {
            subscriptions: 3,
            guard_conditions: 1,
            ..Default::default()
        })
        .unwrap();
    wait_set.add_subscription(&quiet).unwrap();
    wait_set.add_subscription(&loud_a).unwrap();
    wait_set.add_subscription(&loud_b).unwrap();
    wait_set.add_guard_condition(&guard).unwrap();

    publisher.publish(&"x".to_string()).unwrap();
    guard.trigger().unwrap();

    let outcome = wait_set
        .wait(WaitTimeout::Poll, &ctx.shutdown_token())
        .unwrap();
    assert_eq!(
        ready_kinds(&outcome),
        vec![
            (EntityKind::Subscription, 1),
            (EntityKind::Subscription, 2),
            (EntityKind::GuardCondition, 0),
        ]
    );
    assert_eq!(wait_set.ready_count().unwrap(), 3);
    assert!(!wait_set.is_ready(EntityKind::Subscription, 0).unwrap());
    assert!(matches!(
        wait_set.is_ready(EntityKind::Subscription, 3),
        Err(RclError::InvalidArgument(_))
    ));
}

#[test]
fn test_guard_trigger_consumed_by_wait() {
    let ctx = context();
    let guard = ctx.create_guard_condition().unwrap();
    let mut wait_set = ctx.create_wait_set();
    wait_set
        .initialize(WaitSetCapacities {
            guard_conditions: 1,
            ..Default::default()
        })
        .unwrap();
    wait_set.add_guard_condition(&guard).unwrap();
    let shutdown = ctx.shutdown_token();

    guard.trigger().unwrap();
    guard.trigger().unwrap();
    assert!(wait_set.wait(WaitTimeout::Poll, &shutdown).unwrap().is_ready());
    assert_eq!(
        wait_set.wait(WaitTimeout::Poll, &shutdown).unwrap(),
        WaitOutcome::Timeout
    );
}

#[test]
fn test_guard_wakes_blocked_wait() {
    let ctx = context();
    let guard = ctx.create_guard_condition().unwrap();
    let mut wait_set = ctx.create_wait_set();
    wait_set
        .initialize(WaitSetCapacities {
            guard_conditions: 1,
            ..Default::default()
        })
        .unwrap();
    wait_set.add_guard_condition(&guard).unwrap();

    let waker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        guard.trigger().unwrap();
        guard
    });

    let outcome = wait_set
        .wait(WaitTimeout::After(Duration::from_secs(5)), &ctx.shutdown_token())
        .unwrap();
    assert_eq!(ready_kinds(&outcome), vec![(EntityKind::GuardCondition, 0)]);
    drop(waker.join().unwrap());
}

#[test]
fn test_steady_timer_wakes_wait() {
    let ctx = context();
    let node = ctx.create_node("ticker", "").unwrap();
    let clock = ctx.create_clock(ClockType::SteadyTime);
    let timer = node
        .create_timer_with_clock(Duration::from_millis(15), &clock)
        .unwrap();

    let mut wait_set = ctx.create_wait_set();
    wait_set
        .initialize(WaitSetCapacities {
            timers: 1,
            ..Default::default()
        })
        .unwrap();
    wait_set.add_timer(&timer).unwrap();

    let started = Instant::now();
    let outcome = wait_set
        .wait(WaitTimeout::After(Duration::from_secs(5)), &ctx.shutdown_token())
        .unwrap();
    assert_eq!(ready_kinds(&outcome), vec![(EntityKind::Timer, 0)]);
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(timer.call().unwrap(), TakeStatus::Taken);
    assert_eq!(timer.call().unwrap(), TakeStatus::NoDataAvailable);
}

#[test]
fn test_ros_time_override_drives_timer() {
    let ctx = context();
    let node = ctx.create_node("sim", "").unwrap();
    let clock = ctx.clock();
    clock.enable_ros_time_override().unwrap();
    clock.set_ros_time_override(0).unwrap();

    let timer = node.create_timer(Duration::from_secs(1)).unwrap();
    let mut wait_set = ctx.create_wait_set();
    wait_set
        .initialize(WaitSetCapacities {
            timers: 1,
            ..Default::default()
        })
        .unwrap();
    wait_set.add_timer(&timer).unwrap();

    assert_eq!(
        wait_set
            .wait(WaitTimeout::Poll, &ctx.shutdown_token())
            .unwrap(),
        WaitOutcome::Timeout
    );

    let sim_clock = clock.clone();
    let driver = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        sim_clock.set_ros_time_override(1_500_000_000).unwrap();
    });

    let outcome = wait_set
        .wait(WaitTimeout::Infinite, &ctx.shutdown_token())
        .unwrap();
    assert_eq!(ready_kinds(&outcome), vec![(EntityKind::Timer, 0)]);
    driver.join().unwrap();

    assert_eq!(timer.call().unwrap(), TakeStatus::Taken);
    assert_eq!(timer.time_until_next_call().unwrap(), 500_000_000);
}

#[test]
fn test_canceled_timer_never_ready() {
    let ctx = context();
    let node = ctx.create_node("cancel", "").unwrap();
    let clock = ctx.clock();
    clock.enable_ros_time_override().unwrap();
    clock.set_ros_time_override(0).unwrap();
    let timer = node.create_timer(Duration::from_millis(1)).unwrap();
    timer.cancel().unwrap();
    clock.set_ros_time_override(1_000_000_000).unwrap();

    let mut wait_set = ctx.create_wait_set();
    wait_set
        .initialize(WaitSetCapacities {
            timers: 1,
            ..Default::default()
        })
        .unwrap();
    wait_set.add_timer(&timer).unwrap();
    assert_eq!(
        wait_set
            .wait(WaitTimeout::Poll, &ctx.shutdown_token())
            .unwrap(),
        WaitOutcome::Timeout
    );
}

#[test]
fn test_matched_event_ready_on_peer_change() {
    let ctx = context();
    let node = ctx.create_node("matcher", "").unwrap();
    let publisher = node.create_publisher("chatter").unwrap();
    let event = publisher.create_matched_event().unwrap();

    let mut wait_set = ctx.create_wait_set();
    wait_set
        .initialize(WaitSetCapacities {
            events: 1,
            ..Default::default()
        })
        .unwrap();
    wait_set.add_event(&event).unwrap();
    let shutdown = ctx.shutdown_token();
    assert_eq!(
        wait_set.wait(WaitTimeout::Poll, &shutdown).unwrap(),
        WaitOutcome::Timeout
    );

    let _sub = node.create_subscription("chatter").unwrap();
    let outcome = wait_set.wait(WaitTimeout::Poll, &shutdown).unwrap();
    assert_eq!(ready_kinds(&outcome), vec![(EntityKind::Event, 0)]);

    let mut status = MatchedStatus::default();
    assert_eq!(event.take(&mut status).unwrap(), TakeStatus::Taken);
    assert_eq!(status.current_count, 1);
    assert_eq!(
        wait_set.wait(WaitTimeout::Poll, &shutdown).unwrap(),
        WaitOutcome::Timeout
    );
}

#[test]
fn test_keep_last_drops_oldest() {
    let ctx = context();
    let node = ctx.create_node("depth", "").unwrap();
    let publisher = node.create_publisher("burst").unwrap();
    let sub = node.create_subscription_with_depth("burst", 3).unwrap();

    for value in 0u32..10 {
        publisher.publish(&value).unwrap();
    }

    let mut received = Vec::new();
    let mut value = 0u32;
    while sub.take(&mut value).unwrap().is_taken() {
        received.push(value);
    }
    assert_eq!(received, vec![7, 8, 9]);
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[test]
fn test_independent_wait_sets_on_threads() {
    let ctx = context();
    let node = ctx.create_node("fanout", "").unwrap();
    let topics = ["alpha", "beta", "gamma", "delta"];

    let workers: Vec<_> = topics
        .iter()
        .map(|topic| {
            let sub = node.create_subscription(topic).unwrap();
            let ctx = ctx.clone();
            thread::spawn(move || {
                let mut wait_set = ctx.create_wait_set();
                wait_set.initialize(subscriptions(1)).unwrap();
                wait_set.add_subscription(&sub).unwrap();
                let outcome = wait_set
                    .wait(WaitTimeout::After(Duration::from_secs(5)), &ctx.shutdown_token())
                    .unwrap();
                assert!(outcome.is_ready());

                let mut message = String::new();
                assert!(sub.take(&mut message).unwrap().is_taken());
                message
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(20));
    for topic in topics {
        let publisher = node.create_publisher(topic).unwrap();
        publisher.publish(&topic.to_string()).unwrap();
    }

    let mut heard: Vec<String> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    heard.sort();
    assert_eq!(heard, vec!["alpha", "beta", "delta", "gamma"]);
}
