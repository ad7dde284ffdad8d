//! FSM unit tests

use fleetward::deploy::fsm::{HostEvent, HostFsm, HostState};

#[test]
fn test_fsm_initial_state() {
    let fsm = HostFsm::new();
    assert_eq!(fsm.state(), HostState::Pending);
    assert!(fsm.error().is_none());
    assert!(!fsm.state().is_terminal());
}

#[test]
fn test_fsm_success_flow() {
    let mut fsm = HostFsm::new();

    for expected in [
        HostState::Validating,
        HostState::Preparing,
        HostState::Stopping,
        HostState::Updating,
        HostState::Starting,
        HostState::Verifying,
        HostState::Succeeded,
    ] {
        fsm.process(HostEvent::Advance).unwrap();
        assert_eq!(fsm.state(), expected);
    }
}

#[test]
fn test_fsm_failure_from_any_active_state() {
    for advances in 1..=6 {
        let mut fsm = HostFsm::new();
        for _ in 0..advances {
            fsm.process(HostEvent::Advance).unwrap();
        }
        fsm.process(HostEvent::Fail("boom".to_string())).unwrap();
        assert_eq!(fsm.state(), HostState::Failed);
        assert_eq!(fsm.error(), Some("boom"));
    }
}

#[test]
fn test_fsm_rollback_only_from_failed() {
    let mut fsm = HostFsm::new();
    assert!(fsm.process(HostEvent::Rollback).is_err());

    fsm.process(HostEvent::Advance).unwrap();
    fsm.process(HostEvent::Fail("boom".to_string())).unwrap();
    fsm.process(HostEvent::Rollback).unwrap();
    assert_eq!(fsm.state(), HostState::RolledBack);

    // RolledBack is terminal
    assert!(fsm.process(HostEvent::Advance).is_err());
}

#[test]
fn test_fsm_pending_cannot_fail() {
    let mut fsm = HostFsm::new();
    assert!(fsm.process(HostEvent::Fail("early".to_string())).is_err());
    assert_eq!(fsm.state(), HostState::Pending);
}
