mod common;

use audit::enforcement::{
    complies_min_free, violates_min_free, REASON_HOST_REQUIREMENTS, REASON_MISSING_REPORTS,
    REASON_PEER_PORTS, REASON_SIGNATURE_FAILURE,
};
use audit::types::{HostReport, PortState, StorageChallengeObservation};
use audit::{AuditError, Params, SuperNodeState};
use common::{all_open, ctx, short_epoch_params, Fixture};

const NODES: [u8; 4] = [1, 2, 3, 4];

fn fixture(params: Params) -> Fixture {
    let fx = Fixture::with_params(params);
    for tag in NODES {
        fx.add_supernode(tag, SuperNodeState::Active);
    }
    fx
}

fn healthy(_: u8) -> HostReport {
    HostReport::default()
}

fn open(_: u8, _: &str) -> Vec<PortState> {
    all_open(3)
}

/// Reporters 2 and 3 see node 1's first port closed; everyone else sees it open.
fn two_of_three_closed(fx: &Fixture) -> impl Fn(u8, &str) -> Vec<PortState> + '_ {
    move |reporter: u8, target: &str| {
        if target == fx.account(1) && (reporter == 2 || reporter == 3) {
            vec![PortState::Closed, PortState::Open, PortState::Open]
        } else {
            all_open(3)
        }
    }
}

#[test]
fn min_free_edges() {
    assert!(!violates_min_free(0.0, 30));
    assert!(complies_min_free(0.0, 30));
    assert!(!violates_min_free(95.0, 0));
    assert!(violates_min_free(75.0, 30));
    assert!(!complies_min_free(75.0, 30));
    assert!(!violates_min_free(70.0, 30));
    assert!(complies_min_free(70.0, 30));
    assert!(violates_min_free(100.5, 30));
    assert!(violates_min_free(-1.0, 30));
}

#[test]
fn unanimous_threshold_tolerates_one_dissenting_peer() {
    let fx = fixture(short_epoch_params());
    fx.run_epoch(0, &NODES, healthy, two_of_three_closed(&fx));

    assert_eq!(fx.state_of(1).0, SuperNodeState::Active);
    let status = fx.keeper.query_audit_status(&fx.validator(1)).unwrap();
    assert!(status.compliant);
    assert_eq!(
        status.required_ports_state,
        vec![PortState::Unknown, PortState::Open, PortState::Open]
    );
    assert_eq!(status.last_evaluated_epoch_id, 0);
}

#[test]
fn lower_threshold_postpones_on_peer_majority() {
    let fx = fixture(Params {
        peer_port_postpone_threshold_percent: 66,
        ..short_epoch_params()
    });
    fx.run_epoch(0, &NODES, healthy, two_of_three_closed(&fx));

    assert_eq!(
        fx.state_of(1),
        (SuperNodeState::Postponed, REASON_PEER_PORTS.to_string())
    );
    for tag in 2..=4 {
        assert_eq!(fx.state_of(tag).0, SuperNodeState::Active);
    }
    let status = fx.keeper.query_audit_status(&fx.validator(1)).unwrap();
    assert!(!status.compliant);
    assert_eq!(status.reasons, vec![REASON_PEER_PORTS.to_string()]);
    assert_eq!(status.required_ports_state[0], PortState::Closed);
}

#[test]
fn unreported_usage_never_postpones() {
    let fx = fixture(Params {
        min_cpu_free_percent: 50,
        min_mem_free_percent: 50,
        min_disk_free_percent: 50,
        ..short_epoch_params()
    });
    for epoch in 0..10 {
        fx.run_epoch(epoch, &NODES, healthy, open);
    }
    for tag in NODES {
        assert_eq!(fx.state_of(tag).0, SuperNodeState::Active);
    }
}

#[test]
fn host_requirements_postpone() {
    let fx = fixture(Params {
        min_disk_free_percent: 30,
        ..short_epoch_params()
    });
    let host = |tag: u8| HostReport {
        disk_usage_percent: if tag == 1 { 80.0 } else { 40.0 },
        ..HostReport::default()
    };
    fx.run_epoch(0, &NODES, host, open);

    assert_eq!(
        fx.state_of(1),
        (SuperNodeState::Postponed, REASON_HOST_REQUIREMENTS.to_string())
    );
    assert_eq!(fx.state_of(2).0, SuperNodeState::Active);
}

#[test]
fn missing_report_postpones_then_peers_recover_it() {
    let fx = fixture(short_epoch_params());
    fx.run_epoch(0, &[2, 3, 4], healthy, open);
    assert_eq!(
        fx.state_of(1),
        (SuperNodeState::Postponed, REASON_MISSING_REPORTS.to_string())
    );

    // Epoch 1: node 1 is only a target now.
    fx.begin(11);
    fx.end(11);
    fx.begin(12);
    let node1 = fx.account(1);
    let (targets, is_prober) = fx.assigned(12, &node1);
    assert!(!is_prober && targets.is_empty());

    let mut with_obs = fx.host_only(12, &node1);
    with_obs.storage_challenge_observations = vec![StorageChallengeObservation {
        target_supernode_account: fx.account(2),
        port_states: all_open(3),
    }];
    assert!(matches!(
        fx.keeper.submit_epoch_report(&ctx(12), with_obs),
        Err(AuditError::InvalidReporterState(_))
    ));
    fx.keeper
        .submit_epoch_report(&ctx(12), fx.host_only(12, &node1))
        .unwrap();
    for tag in [2, 3, 4] {
        let msg = fx.full_report(12, &fx.account(tag), HostReport::default(), |_| all_open(3));
        assert!(msg
            .storage_challenge_observations
            .iter()
            .any(|obs| obs.target_supernode_account == node1));
        fx.keeper.submit_epoch_report(&ctx(12), msg).unwrap();
    }
    fx.end(12);
    fx.run_blocks(13, 20);

    assert_eq!(fx.state_of(1).0, SuperNodeState::Active);
    assert!(fx.keeper.query_audit_status(&fx.validator(1)).unwrap().compliant);
}

#[test]
fn postponed_node_without_open_peer_view_stays_postponed() {
    let fx = fixture(short_epoch_params());
    fx.run_epoch(0, &[2, 3, 4], healthy, open);
    let closed = |_: u8, target: &str| {
        if target == fx.account(1) {
            vec![PortState::Open, PortState::Closed, PortState::Open]
        } else {
            all_open(3)
        }
    };
    fx.run_epoch(1, &NODES, healthy, closed);
    assert_eq!(
        fx.state_of(1),
        (SuperNodeState::Postponed, REASON_MISSING_REPORTS.to_string())
    );
    let status = fx.keeper.query_audit_status(&fx.validator(1)).unwrap();
    assert_eq!(status.reasons, vec![REASON_MISSING_REPORTS.to_string()]);
}

#[test]
fn missing_report_streak_needs_history() {
    let fx = fixture(Params {
        consecutive_epochs_to_postpone: 2,
        ..short_epoch_params()
    });
    fx.run_epoch(0, &[2, 3, 4], healthy, open);
    assert_eq!(fx.state_of(1).0, SuperNodeState::Active);

    fx.run_epoch(1, &[2, 3, 4], healthy, open);
    assert_eq!(
        fx.state_of(1),
        (SuperNodeState::Postponed, REASON_MISSING_REPORTS.to_string())
    );
}

fn record_signature_failure(fx: &Fixture, height: u64, action: &str) {
    fx.keeper
        .record_finalization_signature_failure(
            &ctx(height),
            &fx.account(0xee),
            action,
            &fx.account(1),
            "bad signature",
        )
        .unwrap();
}

#[test]
fn evidence_postpones_and_recovers_after_clean_window() {
    let fx = fixture(short_epoch_params());
    fx.begin(1);
    record_signature_failure(&fx, 1, "action-1");
    fx.end(1);
    fx.begin(2);
    for tag in NODES {
        let msg = fx.full_report(2, &fx.account(tag), HostReport::default(), |_| all_open(3));
        fx.keeper.submit_epoch_report(&ctx(2), msg).unwrap();
    }
    fx.end(2);
    fx.run_blocks(3, 10);

    assert_eq!(
        fx.state_of(1),
        (SuperNodeState::Postponed, REASON_SIGNATURE_FAILURE.to_string())
    );

    // Another failure inside the recovery window keeps it postponed.
    fx.begin(11);
    record_signature_failure(&fx, 11, "action-2");
    fx.end(11);
    fx.run_blocks(12, 20);
    assert_eq!(fx.state_of(1).0, SuperNodeState::Postponed);

    // A clean epoch recovers it without any report of its own.
    fx.run_blocks(21, 30);
    assert_eq!(fx.state_of(1).0, SuperNodeState::Active);
}

/// Reporters 2 and 3 see node 1's first port closed; reporter 4 sends `fourth` for node 1.
fn closed_with_fourth_view(
    fx: &Fixture,
    fourth: Vec<PortState>,
) -> impl Fn(u8, &str) -> Vec<PortState> + '_ {
    move |reporter: u8, target: &str| {
        if target != fx.account(1) {
            return all_open(3);
        }
        match reporter {
            2 | 3 => vec![PortState::Closed, PortState::Open, PortState::Open],
            _ => fourth.clone(),
        }
    }
}

#[test]
fn empty_port_states_count_like_unknown() {
    for fourth in [Vec::new(), vec![PortState::Unknown; 3]] {
        let fx = fixture(Params {
            peer_port_postpone_threshold_percent: 66,
            ..short_epoch_params()
        });
        fx.run_epoch(0, &NODES, healthy, closed_with_fourth_view(&fx, fourth.clone()));

        assert_eq!(
            fx.state_of(1),
            (SuperNodeState::Postponed, REASON_PEER_PORTS.to_string()),
            "fourth view {fourth:?}"
        );
        let node1 = fx.account(1);
        let keeper = &fx.keeper;
        assert!(keeper
            .peers_port_state_meets_threshold(&node1, 0, 0, PortState::Closed, 66)
            .unwrap());
        assert!(!keeper
            .peers_port_state_meets_threshold(&node1, 0, 0, PortState::Closed, 100)
            .unwrap());
        assert!(keeper
            .peers_port_state_meets_threshold(&node1, 0, 1, PortState::Open, 66)
            .unwrap());
        assert!(!keeper
            .peers_port_state_meets_threshold(&node1, 0, 1, PortState::Open, 100)
            .unwrap());
    }
}

#[test]
fn empty_port_states_keep_unanimous_threshold_unmet() {
    let fx = fixture(short_epoch_params());
    fx.run_epoch(0, &NODES, healthy, |reporter: u8, target: &str| {
        if target == fx.account(1) && reporter == 4 {
            Vec::new()
        } else {
            vec![PortState::Closed; 3]
        }
    });

    assert_eq!(fx.state_of(1).0, SuperNodeState::Active);
    for tag in 2..=4 {
        assert_eq!(
            fx.state_of(tag),
            (SuperNodeState::Postponed, REASON_PEER_PORTS.to_string())
        );
    }
}

#[test]
fn empty_peer_view_does_not_recover() {
    let fx = fixture(short_epoch_params());
    fx.run_epoch(0, &[2, 3, 4], healthy, open);
    assert_eq!(fx.state_of(1).0, SuperNodeState::Postponed);

    fx.run_epoch(1, &NODES, healthy, |_: u8, target: &str| {
        if target == fx.account(1) {
            Vec::new()
        } else {
            all_open(3)
        }
    });

    let node1 = fx.account(1);
    let observers = fx.keeper.peer_reporters_for_target(&node1, 1).unwrap();
    assert!(!observers.is_empty());
    assert_eq!(
        fx.state_of(1),
        (SuperNodeState::Postponed, REASON_MISSING_REPORTS.to_string())
    );
    let status = fx.keeper.query_audit_status(&fx.validator(1)).unwrap();
    assert!(!status.compliant);
    assert_eq!(status.required_ports_state, vec![PortState::Unknown; 3]);
}
