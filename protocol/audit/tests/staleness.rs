mod common;

use audit::staleness::{REASON_METRICS_OVERDUE, REASON_NO_METRICS};
use audit::{
    RegistryParams, SuperNode, SuperNodeState, SuperNodeStateRecord, SupernodeRegistry,
};
use common::{ctx, Fixture};

fn fixture() -> Fixture {
    let fx = Fixture::new();
    fx.registry
        .set_params(RegistryParams {
            metrics_update_interval_blocks: 10,
            metrics_grace_period_blocks: 5,
        })
        .unwrap();
    fx
}

fn sweep(fx: &Fixture, height: u64) {
    fx.keeper.handle_metrics_staleness(&ctx(height)).unwrap();
}

#[test]
fn never_reported_metrics_postpone_after_threshold() {
    let fx = fixture();
    fx.add_supernode(1, SuperNodeState::Active);

    sweep(&fx, 16);
    assert_eq!(fx.state_of(1).0, SuperNodeState::Active);

    sweep(&fx, 17);
    assert_eq!(
        fx.state_of(1),
        (SuperNodeState::Postponed, REASON_NO_METRICS.to_string())
    );
}

#[test]
fn overdue_metrics_measure_from_last_report() {
    let fx = fixture();
    fx.add_supernode(2, SuperNodeState::Active);
    fx.registry.report_metrics(20, &fx.validator(2)).unwrap();

    sweep(&fx, 35);
    assert_eq!(fx.state_of(2).0, SuperNodeState::Active);

    sweep(&fx, 36);
    assert_eq!(
        fx.state_of(2),
        (SuperNodeState::Postponed, REASON_METRICS_OVERDUE.to_string())
    );
}

#[test]
fn fresh_metrics_recover_only_staleness_postponements() {
    let fx = fixture();
    fx.add_supernode(1, SuperNodeState::Active);
    fx.add_supernode(2, SuperNodeState::Active);

    sweep(&fx, 40);
    assert_eq!(fx.state_of(1).0, SuperNodeState::Postponed);
    fx.registry.report_metrics(41, &fx.validator(1)).unwrap();
    assert_eq!(fx.state_of(1).0, SuperNodeState::Active);

    fx.registry.report_metrics(41, &fx.validator(2)).unwrap();
    fx.registry
        .set_supernode_postponed(42, &fx.validator(2), "audit_host_requirements")
        .unwrap();
    fx.registry.report_metrics(43, &fx.validator(2)).unwrap();
    assert_eq!(
        fx.state_of(2),
        (
            SuperNodeState::Postponed,
            "audit_host_requirements".to_string()
        )
    );
}

#[test]
fn sweep_skips_inactive_and_malformed_supernodes() {
    let fx = fixture();
    fx.add_supernode(1, SuperNodeState::Disabled);
    fx.add_supernode(2, SuperNodeState::Active);
    fx.registry
        .put_supernode(&SuperNode {
            validator_address: "not-a-validator".into(),
            supernode_account: fx.account(3),
            states: vec![SuperNodeStateRecord {
                state: SuperNodeState::Active,
                height: 1,
                reason: String::new(),
            }],
        })
        .unwrap();
    fx.registry
        .put_supernode(&SuperNode {
            validator_address: fx.validator(4),
            supernode_account: fx.account(4),
            states: vec![SuperNodeStateRecord {
                state: SuperNodeState::Active,
                height: 0,
                reason: String::new(),
            }],
        })
        .unwrap();

    sweep(&fx, 1_000);

    assert_eq!(fx.state_of(1).0, SuperNodeState::Disabled);
    assert_eq!(fx.state_of(2).0, SuperNodeState::Postponed);
    let malformed = fx
        .registry
        .get_supernode("not-a-validator")
        .unwrap()
        .unwrap();
    assert_eq!(malformed.current_state(), Some(SuperNodeState::Active));
    // No registration height and no metrics: nothing to measure from.
    assert_eq!(fx.state_of(4).0, SuperNodeState::Active);
}

#[test]
fn staleness_runs_every_block_through_end_block() {
    let fx = fixture();
    let account = fx.add_supernode(1, SuperNodeState::Active);
    fx.run_blocks(1, 1);
    fx.begin(2);
    fx.keeper
        .submit_epoch_report(&ctx(2), fx.host_only(2, &account))
        .unwrap();
    fx.end(2);
    fx.run_blocks(3, 16);
    assert_eq!(fx.state_of(1).0, SuperNodeState::Active);
    fx.begin(17);
    fx.end(17);
    assert_eq!(fx.state_of(1).1, REASON_NO_METRICS);
}
