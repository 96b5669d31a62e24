//! Integration tests for the transactional service registry.

use svctxn_core::{MutationOutcome, Severity, TxnError};
use svctxn_registry::ServiceRegistry;
use svctxn_testkit::prelude::*;

#[test]
fn removed_registry_refuses_new_names() {
    let env = TestEnv::new();

    let txn = env.update();
    env.registry
        .get_or_create_registration(&txn, &service_name("A"))
        .unwrap();
    env.registry.remove(&txn).unwrap();
    commit(&env.controller, &txn);

    let txn2 = env.update();
    let err = env
        .registry
        .get_or_create_registration(&txn2, &service_name("B"))
        .unwrap_err();
    assert!(matches!(err, TxnError::ResourceRemoved { .. }));
    assert!(!txn2.is_modified());
    env.controller.abort(&txn2).unwrap();

    let a = env.registry.get_required_registration(&service_name("A")).unwrap();
    assert!(a.is_removed());
    assert!(env.registry.get_registration(&service_name("B")).is_none());
}

#[test]
fn registration_under_disabled_registry_waits_for_enable() {
    let env = TestEnv::new();
    let observer = RecordingObserver::new();
    let name = service_name("late.arrival");

    let registration = env.in_update(|txn| {
        assert_eq!(env.registry.disable(txn).unwrap(), MutationOutcome::Applied);
        let reg = env.registry.get_or_create_registration(txn, &name).unwrap();
        reg.set_observer(txn, observer.clone()).unwrap();
        reg
    });
    assert!(!registration.is_registry_enabled());
    assert_eq!(observer.count(), 0);

    env.in_update(|txn| {
        assert_eq!(env.registry.enable(txn).unwrap(), MutationOutcome::Applied);
    });
    assert!(registration.is_registry_enabled());
    assert_eq!(observer.events(), vec![ObservedEvent::Enabled(name)]);
}

#[test]
fn remove_cascades_once() {
    let env = TestEnv::new();
    let observers: Vec<_> = ["svc.a", "svc.b", "svc.c"]
        .iter()
        .map(|n| {
            let observer = RecordingObserver::new();
            env.in_update(|txn| {
                let reg = env
                    .registry
                    .get_or_create_registration(txn, &service_name(n))
                    .unwrap();
                reg.set_observer(txn, observer.clone()).unwrap();
            });
            observer
        })
        .collect();

    env.in_update(|txn| {
        assert_eq!(env.registry.remove(txn).unwrap(), MutationOutcome::Applied);
        assert_eq!(env.registry.remove(txn).unwrap(), MutationOutcome::NoOp);
    });
    env.in_update(|txn| {
        assert_eq!(env.registry.remove(txn).unwrap(), MutationOutcome::NoOp);
    });

    for observer in &observers {
        assert_eq!(observer.count(), 1);
        assert!(matches!(observer.events()[0], ObservedEvent::Removed(_)));
    }
}

#[test]
fn failed_cascade_blocks_commit() {
    let env = TestEnv::new();
    let name = service_name("stubborn");
    env.in_update(|txn| {
        let reg = env.registry.get_or_create_registration(txn, &name).unwrap();
        reg.set_observer(txn, RecordingObserver::failing_disable())
            .unwrap();
    });

    let txn = env.update();
    assert_eq!(env.registry.disable(&txn).unwrap(), MutationOutcome::Applied);
    let problems = txn.report().problems();
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].severity, Severity::Error);
    assert_eq!(problems[0].subject.as_deref(), Some("stubborn"));

    env.controller.prepare(&txn).unwrap();
    assert!(!env.controller.can_commit(&txn).unwrap());
    assert!(env.controller.commit(&txn).is_err());
    env.controller.abort(&txn).unwrap();

    assert!(env.registry.is_enabled());
    let reg = env.registry.get_required_registration(&name).unwrap();
    assert!(reg.is_registry_enabled());
}

#[test]
fn restart_reverts_registry_changes() {
    let env = TestEnv::new();
    let txn = env.update();
    env.registry
        .get_or_create_registration(&txn, &service_name("first.try"))
        .unwrap();
    env.controller.prepare(&txn).unwrap();
    env.controller.restart(&txn).unwrap();
    assert!(env.registry.is_empty());

    env.registry
        .get_or_create_registration(&txn, &service_name("second.try"))
        .unwrap();
    commit(&env.controller, &txn);
    assert_eq!(env.registry.names(), vec![service_name("second.try")]);
}

#[test]
fn lookups_do_not_need_a_writer() {
    let env = TestEnv::new();
    let name = service_name("visible");
    env.in_update(|txn| {
        env.registry.get_or_create_registration(txn, &name).unwrap();
    });

    let writer = env.update();
    env.registry.disable(&writer).unwrap();
    // Reads never block on the registry's write lock.
    assert!(env.registry.get_registration(&name).is_some());
    assert!(!env.registry.is_enabled());
    env.controller.abort(&writer).unwrap();
    assert!(env.registry.is_enabled());
}

#[test]
fn registries_are_bound_to_their_controller() {
    let env = TestEnv::new();
    let other = TestEnv::new();
    let foreign = ServiceRegistry::new(&other.controller);

    let txn = env.update();
    assert_eq!(foreign.enable(&txn).unwrap_err(), TxnError::OwnershipMismatch);
    assert_eq!(
        foreign
            .get_or_create_registration(&txn, &service_name("x"))
            .unwrap_err(),
        TxnError::OwnershipMismatch
    );
    env.controller.abort(&txn).unwrap();
}
