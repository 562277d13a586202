//! Timeout/completion race and execution guard tests

use std::collections::HashSet;
use std::sync::atomic::Ordering;

use checkd::clock::Clock;
use checkd::{Availability, CheckSpec, ModuleKind, State};
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_timeout_resolves_a_silent_probe() {
    let (clock, engine) = setup();
    let module = scripted(&engine, &clock, "ping", Behaviour::Hold);

    let id = engine
        .schedule(
            CheckSpec::new("10.0.0.1", "ping")
                .with_period(ms(1000))
                .with_timeout(ms(500)),
        )
        .unwrap();
    engine.start().await.unwrap();

    let t0 = clock.now();
    clock.run_due();
    clock.advance(ms(500));

    let check = engine.lookup(id).unwrap();
    let current = check.current_stats();
    assert_eq!(current.available, Availability::Unavailable);
    assert_eq!(current.state, State::Bad);
    assert_eq!(current.status.as_deref(), Some("timeout"));
    assert!(!check.is_running());
    assert_eq!(check.next_fire_time(), Some(at(t0, 1000)));

    // The module answering afterwards changes nothing
    assert_eq!(module.release_held(), vec![false]);
    assert_eq!(check.current_stats().status.as_deref(), Some("timeout"));

    let stats = engine.stats();
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.discarded, 1);
}

#[tokio::test]
async fn test_completion_and_timeout_at_the_same_instant() {
    let (clock, engine) = setup();
    let module = scripted(&engine, &clock, "ping", Behaviour::CompleteAfter(ms(500)));

    let id = engine
        .schedule(
            CheckSpec::new("10.0.0.1", "ping")
                .with_period(ms(0))
                .with_timeout(ms(500)),
        )
        .unwrap();
    engine.start().await.unwrap();
    clock.advance(ms(500));

    // Exactly one side committed
    assert_eq!(engine.stats().completed, 1);
    let won_by_completion = module.completions.lock().iter().filter(|won| **won).count();
    assert_eq!(won_by_completion as u64 + engine.stats().timeouts, 1);
    assert!(!engine.lookup(id).unwrap().is_running());
}

#[test]
fn test_exactly_one_outcome_under_thread_races() {
    let (clock, engine) = setup();
    let module = scripted(&engine, &clock, "ping", Behaviour::Hold);

    let id = engine
        .schedule(
            CheckSpec::new("10.0.0.1", "ping")
                .with_period(ms(0))
                .with_timeout(ms(100)),
        )
        .unwrap();

    let rounds = 200;
    let mut completed_first = 0;
    for _ in 0..rounds {
        assert_eq!(engine.run_now(id), Ok(true));
        let probe = module.held.lock().pop().unwrap();

        let completer = std::thread::spawn(move || probe.complete());
        let ticker = {
            let clock = clock.clone();
            std::thread::spawn(move || clock.advance(ms(100)))
        };

        if completer.join().unwrap() {
            completed_first += 1;
        }
        ticker.join().unwrap();
    }

    let stats = engine.stats();
    assert_eq!(stats.completed, rounds);
    assert_eq!(stats.timeouts + completed_first, rounds);
    assert!(!engine.lookup(id).unwrap().is_running());
}

#[tokio::test]
async fn test_busy_check_skips_instead_of_queueing() {
    let (clock, engine) = setup();
    let module = scripted(&engine, &clock, "ping", Behaviour::Hold);

    let id = engine
        .schedule(CheckSpec::new("10.0.0.1", "ping").with_period(ms(1000)))
        .unwrap();
    engine.start().await.unwrap();
    clock.run_due();

    assert_eq!(engine.run_now(id), Ok(false));
    assert_eq!(engine.run_now(id), Ok(false));
    assert_eq!(module.start_count(), 1);
    assert_eq!(engine.stats().skipped, 2);

    // Nothing was queued behind the running firing
    module.release_held();
    assert_eq!(module.start_count(), 1);
}

#[tokio::test]
async fn test_at_most_one_probe_in_flight() {
    let (clock, engine) = setup();
    let module = scripted(&engine, &clock, "ping", Behaviour::CompleteAfter(ms(400)));

    engine
        .schedule(
            CheckSpec::new("10.0.0.1", "ping")
                .with_period(ms(500))
                .with_timeout(ms(450)),
        )
        .unwrap();
    engine.start().await.unwrap();

    for _ in 0..20 {
        clock.advance(ms(100));
        engine.for_each(|check| {
            let _ = engine.run_now(check.id());
        });
    }

    assert_eq!(module.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(engine.stats().skipped > 0);
}

#[tokio::test]
async fn test_guard_leak_is_counted() {
    let (clock, engine) = setup();
    // Passive firings have no timeout, so a probe that never completes keeps the guard
    let module = scripted_with_kind(&engine, &clock, "feed", ModuleKind::Passive, Behaviour::Hold);

    engine
        .schedule(CheckSpec::new("10.0.0.1", "feed").with_period(ms(1000)))
        .unwrap();
    engine.start().await.unwrap();
    clock.run_due();
    clock.advance(ms(3000));

    let stats = engine.stats();
    assert_eq!(module.start_count(), 1);
    assert_eq!(stats.skipped, 3);
    assert_eq!(stats.guard_leaks, 1);
}

#[test]
fn test_deschedule_racing_finish_destroys_once() {
    let (clock, engine) = setup();
    let module = scripted(&engine, &clock, "ping", Behaviour::Hold);

    let rounds = 200;
    let mut ids = Vec::new();
    for round in 0..rounds {
        let id = engine
            .schedule(
                CheckSpec::new("10.0.0.1", "ping")
                    .with_name(format!("ping-{round}"))
                    .with_period(ms(0)),
            )
            .unwrap();
        assert_eq!(engine.run_now(id), Ok(true));
        let check = engine.lookup(id).unwrap();
        let held = module.held.lock().pop().unwrap();

        let completer = std::thread::spawn(move || held.complete());
        let descheduler = {
            let engine = engine.clone();
            std::thread::spawn(move || engine.deschedule(id))
        };

        completer.join().unwrap();
        assert_eq!(descheduler.join().unwrap(), Ok(()));

        assert!(engine.lookup(id).is_none());
        assert!(!check.is_running());
        ids.push(id);
    }

    let cleaned = module.cleaned.lock().clone();
    assert_eq!(cleaned.len(), rounds);
    let unique: HashSet<_> = cleaned.iter().collect();
    assert_eq!(unique.len(), rounds);
    assert!(ids.iter().all(|id| unique.contains(id)));
    assert_eq!(clock.pending(), 0);
}

#[tokio::test]
async fn test_kill_during_recurrence_leaves_nothing_armed() {
    let (clock, engine) = setup();
    let module = scripted(&engine, &clock, "ping", Behaviour::CompleteNow);
    engine.start().await.unwrap();

    let rounds = 200;
    for round in 0..rounds {
        let id = engine
            .schedule(
                CheckSpec::new("10.0.0.1", "ping")
                    .with_name(format!("ping-{round}"))
                    .with_period(ms(1000)),
            )
            .unwrap();
        let check = engine.lookup(id).unwrap();

        let ticker = {
            let clock = clock.clone();
            std::thread::spawn(move || clock.run_due())
        };
        let descheduler = {
            let engine = engine.clone();
            std::thread::spawn(move || engine.deschedule(id))
        };

        ticker.join().unwrap();
        assert_eq!(descheduler.join().unwrap(), Ok(()));

        assert!(engine.lookup(id).is_none());
        assert!(!check.is_running());
        assert!(check.is_killed());
        assert_eq!(clock.pending(), 0, "round {round} left a timer armed");
    }

    assert_eq!(module.cleaned.lock().len(), rounds);
    assert_eq!(engine.stats().skipped, 0);
}

#[tokio::test]
async fn test_disable_toggling_keeps_a_single_recurrence() {
    let (clock, engine) = setup();
    let module = scripted(&engine, &clock, "ping", Behaviour::CompleteNow);

    let id = engine
        .schedule(CheckSpec::new("10.0.0.1", "ping").with_period(ms(10)))
        .unwrap();
    engine.start().await.unwrap();

    let ticker = {
        let clock = clock.clone();
        std::thread::spawn(move || {
            for _ in 0..500 {
                clock.advance(ms(10));
            }
        })
    };
    let toggler = {
        let engine = engine.clone();
        std::thread::spawn(move || {
            for round in 0..500 {
                engine.set_disabled(id, round % 2 == 0).unwrap();
            }
        })
    };
    ticker.join().unwrap();
    toggler.join().unwrap();

    engine.set_disabled(id, false).unwrap();
    clock.run_due();
    assert_eq!(clock.pending(), 1);

    // One chain: one firing per period from here on
    let before = module.start_count();
    clock.advance(ms(100));
    assert_eq!(module.start_count() - before, 10);
    assert_eq!(clock.pending(), 1);
}
