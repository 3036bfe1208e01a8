mod common;

use audit::types::{HostReport, PortState, StorageChallengeObservation};
use audit::{AuditError, MsgSubmitEpochReport, PageRequest, SuperNodeState};
use common::{all_open, ctx, Fixture};

/// Four ACTIVE probers and one POSTPONED target; epoch 0 anchored at height 1.
fn setup() -> Fixture {
    let fx = Fixture::new();
    for tag in 1..=4 {
        fx.add_supernode(tag, SuperNodeState::Active);
    }
    fx.add_supernode(5, SuperNodeState::Postponed);
    fx.begin(1);
    fx
}

fn report(fx: &Fixture, tag: u8) -> MsgSubmitEpochReport {
    fx.full_report(2, &fx.account(tag), HostReport::default(), |_| all_open(3))
}

fn submit(fx: &Fixture, msg: MsgSubmitEpochReport) -> Result<(), AuditError> {
    fx.keeper.submit_epoch_report(&ctx(2), msg)
}

#[test]
fn accepted_report_is_indexed_three_ways() {
    let fx = setup();
    let reporter = fx.account(1);
    let msg = report(&fx, 1);
    assert_eq!(msg.storage_challenge_observations.len(), 4);
    submit(&fx, msg.clone()).unwrap();

    let stored = fx.keeper.query_epoch_report(0, &reporter).unwrap();
    assert_eq!(stored.report_height, 2);
    assert_eq!(
        stored.storage_challenge_observations,
        msg.storage_challenge_observations
    );

    let by_reporter = fx
        .keeper
        .query_reports_by_reporter(&reporter, &PageRequest::default())
        .unwrap();
    assert_eq!(by_reporter.items, vec![stored.clone()]);

    let selfs = fx
        .keeper
        .query_self_reports(&reporter, &PageRequest::default())
        .unwrap();
    assert_eq!(selfs.items.len(), 1);
    assert_eq!(selfs.items[0].report_height, 2);

    let target = fx.account(5);
    let by_target = fx
        .keeper
        .query_reports_by_target(&target, Some(0), &PageRequest::default())
        .unwrap();
    assert_eq!(by_target.items.len(), 1);
    assert_eq!(by_target.items[0].reporter_supernode_account, reporter);
    assert_eq!(by_target.items[0].port_states, all_open(3));
}

#[test]
fn target_query_paginates_by_key() {
    let fx = setup();
    for tag in 1..=4 {
        submit(&fx, report(&fx, tag)).unwrap();
    }
    let target = fx.account(5);

    let first = fx
        .keeper
        .query_reports_by_target(
            &target,
            None,
            &PageRequest {
                limit: 3,
                count_total: true,
                ..PageRequest::default()
            },
        )
        .unwrap();
    assert_eq!(first.items.len(), 3);
    assert_eq!(first.pagination.total, 4);
    let next_key = first.pagination.next_key.clone().unwrap();

    let rest = fx
        .keeper
        .query_reports_by_target(
            &target,
            None,
            &PageRequest {
                key: Some(next_key),
                ..PageRequest::default()
            },
        )
        .unwrap();
    assert_eq!(rest.items.len(), 1);
    assert_eq!(rest.pagination.next_key, None);

    let mut seen: Vec<String> = first
        .items
        .iter()
        .chain(rest.items.iter())
        .map(|r| r.reporter_supernode_account.clone())
        .collect();
    let mut sorted = seen.clone();
    sorted.sort();
    assert_eq!(seen, sorted);
    seen.dedup();
    assert_eq!(seen.len(), 4);
}

#[test]
fn target_query_walks_single_entry_pages() {
    let fx = setup();
    for tag in 1..=4 {
        submit(&fx, report(&fx, tag)).unwrap();
    }
    let target = fx.account(5);
    let query = |page: PageRequest| {
        fx.keeper
            .query_reports_by_target(&target, Some(0), &page)
            .unwrap()
    };

    let mut reporters = Vec::new();
    let mut key = None;
    loop {
        let page = query(PageRequest {
            key: key.take(),
            limit: 1,
            ..PageRequest::default()
        });
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.pagination.total, 0);
        reporters.push(page.items[0].reporter_supernode_account.clone());
        match page.pagination.next_key {
            Some(next) => key = Some(next),
            None => break,
        }
    }
    assert_eq!(reporters.len(), 4);

    let tail = query(PageRequest {
        offset: 3,
        count_total: true,
        ..PageRequest::default()
    });
    assert_eq!(tail.items.len(), 1);
    assert_eq!(tail.items[0].reporter_supernode_account, reporters[3]);
    assert_eq!(tail.pagination, audit::PageResponse { next_key: None, total: 4 });

    let past_end = query(PageRequest {
        offset: 9,
        ..PageRequest::default()
    });
    assert!(past_end.items.is_empty());
    assert_eq!(past_end.pagination.next_key, None);

    assert!(matches!(
        fx.keeper.query_reports_by_target(
            &target,
            Some(0),
            &PageRequest {
                key: Some("zz".into()),
                ..PageRequest::default()
            }
        ),
        Err(audit::QueryError::InvalidArgument(_))
    ));
}

#[test]
fn rejects_missing_creator_and_wrong_epoch() {
    let fx = setup();

    let mut msg = report(&fx, 1);
    msg.creator.clear();
    assert!(matches!(submit(&fx, msg), Err(AuditError::InvalidSigner(_))));

    let mut msg = report(&fx, 1);
    msg.epoch_id = 1;
    assert!(matches!(submit(&fx, msg), Err(AuditError::InvalidEpochId(_))));
}

#[test]
fn rejects_unknown_reporter() {
    let fx = setup();
    let msg = fx.host_only(2, &fx.account(9));
    assert!(matches!(
        submit(&fx, msg),
        Err(AuditError::ReporterNotFound(_))
    ));
}

#[test]
fn rejects_epoch_without_anchor() {
    let fx = Fixture::new();
    fx.add_supernode(1, SuperNodeState::Active);
    let msg = fx.host_only(5, &fx.account(1));
    assert!(matches!(
        fx.keeper.submit_epoch_report(&ctx(5), msg),
        Err(AuditError::EpochAnchorNotFound(0))
    ));
}

#[test]
fn second_report_in_epoch_is_a_duplicate() {
    let fx = setup();
    submit(&fx, report(&fx, 1)).unwrap();
    assert!(matches!(
        submit(&fx, report(&fx, 1)),
        Err(AuditError::DuplicateReport(_))
    ));
}

#[test]
fn duplicate_check_sits_between_anchor_and_gating() {
    let fx = setup();
    submit(&fx, report(&fx, 1)).unwrap();

    let mut malformed = report(&fx, 1);
    malformed.host_report.inbound_port_states = vec![PortState::Open; 2];
    malformed.storage_challenge_observations.clear();
    assert!(matches!(
        submit(&fx, malformed),
        Err(AuditError::DuplicateReport(_))
    ));

    let mut wrong_epoch = report(&fx, 1);
    wrong_epoch.epoch_id = 1;
    assert!(matches!(
        submit(&fx, wrong_epoch),
        Err(AuditError::InvalidEpochId(_))
    ));

    let mut no_creator = report(&fx, 1);
    no_creator.creator.clear();
    assert!(matches!(
        submit(&fx, no_creator),
        Err(AuditError::InvalidSigner(_))
    ));
}

#[test]
fn host_port_states_must_be_empty_or_full() {
    let fx = setup();
    let mut msg = report(&fx, 1);
    msg.host_report.inbound_port_states = vec![PortState::Open; 2];
    assert!(matches!(
        submit(&fx, msg),
        Err(AuditError::InvalidPortStatesLength(_))
    ));

    let mut msg = report(&fx, 1);
    msg.host_report.inbound_port_states = all_open(3);
    submit(&fx, msg).unwrap();
}

#[test]
fn prober_must_cover_exactly_its_targets() {
    let fx = setup();

    let mut missing = report(&fx, 1);
    missing.storage_challenge_observations.pop();
    assert!(matches!(
        submit(&fx, missing),
        Err(AuditError::InvalidPeerObservations(_))
    ));

    let mut empty_target = report(&fx, 1);
    empty_target.storage_challenge_observations[0]
        .target_supernode_account
        .clear();
    assert!(matches!(
        submit(&fx, empty_target),
        Err(AuditError::InvalidPeerObservations(_))
    ));

    let mut self_target = report(&fx, 1);
    self_target.storage_challenge_observations[0].target_supernode_account = fx.account(1);
    assert!(matches!(
        submit(&fx, self_target),
        Err(AuditError::InvalidPeerObservations(msg)) if msg.contains("self")
    ));

    let mut stranger = report(&fx, 1);
    stranger.storage_challenge_observations[0].target_supernode_account = fx.account(9);
    assert!(matches!(
        submit(&fx, stranger),
        Err(AuditError::InvalidPeerObservations(msg)) if msg.contains("not assigned")
    ));

    let mut twice = report(&fx, 1);
    let first = twice.storage_challenge_observations[0].clone();
    twice.storage_challenge_observations[1] = first;
    assert!(matches!(
        submit(&fx, twice),
        Err(AuditError::InvalidPeerObservations(msg)) if msg.contains("duplicate")
    ));

    assert!(!fx.keeper.has_report(0, &fx.account(1)));
}

#[test]
fn observation_port_states_must_be_empty_or_full() {
    let fx = setup();

    let mut short = report(&fx, 1);
    short.storage_challenge_observations[2].port_states = vec![PortState::Closed];
    assert!(matches!(
        submit(&fx, short),
        Err(AuditError::InvalidPortStatesLength(_))
    ));

    let mut blank = report(&fx, 1);
    blank.storage_challenge_observations[2].port_states.clear();
    submit(&fx, blank).unwrap();
}

#[test]
fn non_prober_may_only_send_host_report() {
    let fx = setup();
    let postponed = fx.account(5);
    let (targets, is_prober) = fx.assigned(2, &postponed);
    assert!(!is_prober);
    assert!(targets.is_empty());

    let mut msg = fx.host_only(2, &postponed);
    msg.storage_challenge_observations = vec![StorageChallengeObservation {
        target_supernode_account: fx.account(1),
        port_states: all_open(3),
    }];
    assert!(matches!(
        submit(&fx, msg),
        Err(AuditError::InvalidReporterState(_))
    ));

    submit(&fx, fx.host_only(2, &postponed)).unwrap();
    assert!(fx.keeper.has_report(0, &postponed));
}

#[test]
fn report_queries_reject_empty_arguments() {
    let fx = setup();
    assert!(matches!(
        fx.keeper.query_epoch_report(0, ""),
        Err(audit::QueryError::InvalidArgument(_))
    ));
    assert!(matches!(
        fx.keeper.query_epoch_report(0, &fx.account(1)),
        Err(audit::QueryError::NotFound(_))
    ));
}
