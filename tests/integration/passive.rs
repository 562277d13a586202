//! Passive (pushed telemetry) checks

use checkd::monitors::{self, TrapModule};
use checkd::{Availability, CheckSpec, MetricValue, State};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::helpers::*;

#[tokio::test]
async fn test_pushed_metrics_committed_at_the_tick() {
    let (clock, engine) = setup();
    monitors::register_builtin(&engine).unwrap();

    let id = engine
        .schedule(CheckSpec::new("10.0.0.1", "trap").with_period(ms(1000)))
        .unwrap();
    engine.start().await.unwrap();
    clock.run_due();

    let check = engine.lookup(id).unwrap();
    assert_eq!(check.current_stats().status.as_deref(), Some("no data"));

    TrapModule::push_for_target(&engine, "10.0.0.1", &json!({ "load": 0.25 })).unwrap();
    TrapModule::push_for_target(&engine, "10.0.0.1", &json!({ "users": 4 })).unwrap();
    TrapModule::push_for_check(&engine, id, &json!({ "release": "2.1" })).unwrap();

    // Nothing is committed before the tick
    assert_eq!(check.current_stats().metrics.len(), 0);

    clock.advance(ms(1000));

    let current = check.current_stats();
    assert_eq!(current.available, Availability::Available);
    assert_eq!(current.state, State::Good);
    assert_eq!(current.status.as_deref(), Some("3 metrics"));
    assert_eq!(current.metric("load"), Some(&MetricValue::Double(0.25)));
    assert_eq!(current.metric("users"), Some(&MetricValue::I64(4)));
    assert_eq!(
        current.metric("release"),
        Some(&MetricValue::Text("2.1".to_string()))
    );

    // The next interval starts empty
    assert!(check.pending_stats().metrics.is_empty());
}

#[tokio::test]
async fn test_passive_firing_arms_no_timeout() {
    let (clock, engine) = setup();
    monitors::register_builtin(&engine).unwrap();

    engine
        .schedule(CheckSpec::new("10.0.0.1", "trap").with_period(ms(1000)))
        .unwrap();
    engine.start().await.unwrap();
    clock.run_due();

    // Only the next recurrence is armed
    assert_eq!(clock.pending(), 1);
}

#[tokio::test]
async fn test_push_only_reaches_trap_checks_on_the_target() {
    let (_clock, engine) = setup();
    monitors::register_builtin(&engine).unwrap();

    let trap = engine
        .schedule(CheckSpec::new("10.0.0.1", "trap"))
        .unwrap();
    let tcp = engine
        .schedule(CheckSpec::new("10.0.0.1", "tcp").with_config("port", "22"))
        .unwrap();
    engine
        .schedule(CheckSpec::new("10.0.0.2", "trap"))
        .unwrap();

    let fed = TrapModule::push_for_target(&engine, "10.0.0.1", &json!({ "up": true })).unwrap();
    assert_eq!(fed, 1);

    assert_eq!(engine.lookup(trap).unwrap().pending_stats().metrics.len(), 1);
    assert!(engine.lookup(tcp).unwrap().pending_stats().metrics.is_empty());
    assert!(
        engine
            .lookup_by_target_name("10.0.0.2", "trap")
            .unwrap()
            .pending_stats()
            .metrics
            .is_empty()
    );

    assert!(TrapModule::push_for_check(&engine, tcp, &json!({ "up": true })).is_err());
    assert!(TrapModule::push_for_target(&engine, "10.0.0.1", &json!([1])).is_err());
}

#[tokio::test]
async fn test_commit_outside_a_firing() {
    let (_clock, engine) = setup();
    monitors::register_builtin(&engine).unwrap();

    let id = engine
        .schedule(CheckSpec::new("10.0.0.1", "trap"))
        .unwrap();
    let check = engine.lookup(id).unwrap();

    check.set_metric("temperature", 41.5);
    check.set_availability(Availability::Available);
    check.set_state(State::Good);
    engine.commit(&check);

    let current = check.current_stats();
    assert_eq!(current.state, State::Good);
    assert!(current.whence.is_some());
    assert_eq!(check.previous_stats().state, State::Unknown);
}
