//! Checks triggered by the completion of another check

use checkd::clock::Clock;
use checkd::{CheckSpec, State};
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_dependent_fires_after_cause_commits() {
    let (clock, engine) = setup();
    let ping = scripted(&engine, &clock, "ping", Behaviour::CompleteAfter(ms(100)));
    let probe = scripted(&engine, &clock, "probe", Behaviour::Fail("refused"));

    let cause = engine
        .schedule(CheckSpec::new("10.0.0.1", "ping").with_period(ms(1000)))
        .unwrap();
    let dependent = engine
        .schedule(CheckSpec::new("10.0.0.1", "probe").caused_by(cause))
        .unwrap();
    engine.start().await.unwrap();

    let t0 = clock.now();
    clock.run_due();
    assert_eq!(probe.start_count(), 0, "dependents have no recurrence of their own");

    clock.advance(ms(100));

    let starts = probe.starts.lock().clone();
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].check, dependent);
    assert_eq!(starts[0].at, at(t0, 100));
    assert!(starts[0].once);
    assert_eq!(starts[0].cause, Some(cause));

    let result = engine.lookup(dependent).unwrap().current_stats();
    assert_eq!(result.state, State::Bad);
    assert_eq!(result.status.as_deref(), Some("refused"));

    clock.advance(ms(1000));
    assert_eq!(ping.start_count(), 2);
    assert_eq!(probe.start_count(), 2);
}

#[tokio::test]
async fn test_chain_of_three() {
    let (clock, engine) = setup();
    let module = scripted(&engine, &clock, "ping", Behaviour::CompleteNow);

    let a = engine
        .schedule(CheckSpec::new("10.0.0.1", "ping").with_name("a").with_period(ms(1000)))
        .unwrap();
    let b = engine
        .schedule(CheckSpec::new("10.0.0.1", "ping").with_name("b").caused_by(a))
        .unwrap();
    let c = engine
        .schedule(CheckSpec::new("10.0.0.1", "ping").with_name("c").caused_by(b))
        .unwrap();
    engine.start().await.unwrap();
    clock.run_due();

    let order: Vec<_> = module.starts.lock().iter().map(|start| start.check).collect();
    assert_eq!(order, vec![a, b, c]);
}

#[tokio::test]
async fn test_disabled_dependent_is_not_fired() {
    let (clock, engine) = setup();
    scripted(&engine, &clock, "ping", Behaviour::CompleteNow);
    let probe = scripted(&engine, &clock, "probe", Behaviour::CompleteNow);

    let cause = engine
        .schedule(CheckSpec::new("10.0.0.1", "ping").with_period(ms(1000)))
        .unwrap();
    engine
        .schedule(CheckSpec::new("10.0.0.1", "probe").caused_by(cause).disabled())
        .unwrap();
    engine.start().await.unwrap();
    clock.advance(ms(3000));

    assert_eq!(probe.start_count(), 0);
}

#[tokio::test]
async fn test_deschedule_unlinks_dependent() {
    let (clock, engine) = setup();
    scripted(&engine, &clock, "ping", Behaviour::CompleteNow);
    let probe = scripted(&engine, &clock, "probe", Behaviour::CompleteNow);

    let cause = engine
        .schedule(CheckSpec::new("10.0.0.1", "ping").with_period(ms(1000)))
        .unwrap();
    let dependent = engine
        .schedule(CheckSpec::new("10.0.0.1", "probe").caused_by(cause))
        .unwrap();
    assert_eq!(engine.lookup(cause).unwrap().dependents(), vec![dependent]);

    engine.deschedule(dependent).unwrap();
    assert!(engine.lookup(cause).unwrap().dependents().is_empty());

    engine.start().await.unwrap();
    clock.advance(ms(2000));
    assert_eq!(probe.start_count(), 0);
}

#[tokio::test]
async fn test_abandoned_cause_fires_dependent_in_same_module() {
    let (clock, engine) = setup();
    let module = scripted(&engine, &clock, "ping", Behaviour::Hold);

    let a = engine
        .schedule(CheckSpec::new("10.0.0.1", "ping").with_name("a").with_period(ms(1000)))
        .unwrap();
    let b = engine
        .schedule(CheckSpec::new("10.0.0.1", "ping").with_name("b").caused_by(a))
        .unwrap();
    engine.start().await.unwrap();
    clock.run_due();

    assert_eq!(module.drop_held(), 1);

    let order: Vec<_> = module.starts.lock().iter().map(|start| start.check).collect();
    assert_eq!(order, vec![a, b]);
    assert_eq!(
        engine.lookup(a).unwrap().current_stats().status.as_deref(),
        Some("probe abandoned")
    );
    assert!(engine.lookup(b).unwrap().is_running());
    assert_eq!(module.held.lock().len(), 1);
}
