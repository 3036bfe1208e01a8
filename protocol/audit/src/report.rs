use std::collections::BTreeSet;

use state::KvStore;
use tracing::info;

use crate::assignment::ring_walk;
use crate::epoch::derive_epoch_at_height;
use crate::error::{AuditError, AuditResult};
use crate::keeper::{BlockContext, Keeper};
use crate::keys;
use crate::msg::MsgSubmitEpochReport;
use crate::types::EpochReport;

const INDEX_MARKER: &[u8] = &[1];

impl<S: KvStore> Keeper<S> {
    pub fn has_report(&self, epoch_id: u64, reporter: &str) -> bool {
        self.store().has(&keys::report_key(epoch_id, reporter))
    }

    pub fn get_report(&self, epoch_id: u64, reporter: &str) -> AuditResult<Option<EpochReport>> {
        self.read(&keys::report_key(epoch_id, reporter))
    }

    pub fn peer_reporters_for_target(
        &self,
        target: &str,
        epoch_id: u64,
    ) -> AuditResult<Vec<String>> {
        let prefix = keys::supernode_report_index_epoch_prefix(target, epoch_id);
        let mut reporters = Vec::new();
        for (key, _) in self.store().prefix(&prefix) {
            let reporter = &key[prefix.len()..];
            if reporter.is_empty() {
                return Err(AuditError::CorruptState(
                    "empty reporter in supernode report index".into(),
                ));
            }
            let reporter = std::str::from_utf8(reporter).map_err(|_| {
                AuditError::CorruptState("non-utf8 reporter in supernode report index".into())
            })?;
            reporters.push(reporter.to_string());
        }
        Ok(reporters)
    }

    fn store_report(&self, report: &EpochReport) -> AuditResult<()> {
        let epoch_id = report.epoch_id;
        let reporter = report.supernode_account.as_str();
        self.write(&keys::report_key(epoch_id, reporter), report)?;
        self.store()
            .set(&keys::report_index_key(reporter, epoch_id), INDEX_MARKER);
        self.store()
            .set(&keys::self_report_index_key(reporter, epoch_id), INDEX_MARKER);

        let mut indexed = BTreeSet::new();
        for obs in &report.storage_challenge_observations {
            let target = obs.target_supernode_account.as_str();
            if target.is_empty() || !indexed.insert(target) {
                continue;
            }
            self.store().set(
                &keys::supernode_report_index_key(target, epoch_id, reporter),
                INDEX_MARKER,
            );
        }
        Ok(())
    }

    /// Accepts one report per (epoch, reporter), gated against the epoch anchor
    /// and the params frozen at epoch start.
    pub fn submit_epoch_report(
        &self,
        ctx: &BlockContext,
        msg: MsgSubmitEpochReport,
    ) -> AuditResult<()> {
        if msg.creator.is_empty() {
            return Err(AuditError::InvalidSigner("creator is required".into()));
        }

        let params = self.get_params()?;
        let epoch = derive_epoch_at_height(ctx.height, &params)?;
        if msg.epoch_id != epoch.epoch_id {
            return Err(AuditError::InvalidEpochId(format!(
                "epoch_id {} not accepted at height {}",
                msg.epoch_id, ctx.height
            )));
        }
        if !epoch.contains(ctx.height) {
            return Err(AuditError::InvalidEpochId(format!(
                "epoch_id not accepted at height {}",
                ctx.height
            )));
        }

        if self
            .registry()
            .get_supernode_by_account(&msg.creator)?
            .is_none()
        {
            return Err(AuditError::ReporterNotFound(msg.creator));
        }

        let anchor = self
            .get_epoch_anchor(msg.epoch_id)?
            .ok_or(AuditError::EpochAnchorNotFound(msg.epoch_id))?;

        if self.has_report(msg.epoch_id, &msg.creator) {
            return Err(AuditError::DuplicateReport(format!(
                "{} already reported for epoch {}",
                msg.creator, msg.epoch_id
            )));
        }

        let gating = self.params_for_epoch(msg.epoch_id)?;
        let (assigned, is_prober) = ring_walk::targets_for_reporter(
            &gating,
            &anchor.active_supernode_accounts,
            &anchor.target_supernode_accounts,
            &anchor.seed,
            &msg.creator,
        )?;
        let assigned: BTreeSet<&str> = assigned.iter().map(String::as_str).collect();
        let ports_len = gating.required_open_ports.len();

        let host_ports = msg.host_report.inbound_port_states.len();
        if host_ports != 0 && host_ports != ports_len {
            return Err(AuditError::InvalidPortStatesLength(format!(
                "inbound_port_states length {host_ports} must be 0 or {ports_len}"
            )));
        }

        if !is_prober {
            if !msg.storage_challenge_observations.is_empty() {
                return Err(AuditError::InvalidReporterState(
                    "reporter not eligible for storage challenge observations in this epoch".into(),
                ));
            }
        } else {
            let observations = &msg.storage_challenge_observations;
            if observations.len() != assigned.len() {
                return Err(AuditError::InvalidPeerObservations(format!(
                    "expected storage challenge observations for {} assigned targets; got {}",
                    assigned.len(),
                    observations.len()
                )));
            }
            let mut seen = BTreeSet::new();
            for obs in observations {
                let target = obs.target_supernode_account.as_str();
                if target.is_empty() {
                    return Err(AuditError::InvalidPeerObservations(
                        "empty target_supernode_account".into(),
                    ));
                }
                if target == msg.creator {
                    return Err(AuditError::InvalidPeerObservations(
                        "self-targeting is not allowed".into(),
                    ));
                }
                if !assigned.contains(target) {
                    return Err(AuditError::InvalidPeerObservations(format!(
                        "target {target:?} is not assigned to reporter in this epoch"
                    )));
                }
                if !seen.insert(target) {
                    return Err(AuditError::InvalidPeerObservations(format!(
                        "duplicate storage challenge observation for target {target:?}"
                    )));
                }
                let obs_ports = obs.port_states.len();
                if obs_ports != 0 && obs_ports != ports_len {
                    return Err(AuditError::InvalidPortStatesLength(format!(
                        "port_states length {obs_ports} must be 0 or {ports_len}"
                    )));
                }
            }
            if seen != assigned {
                return Err(AuditError::InvalidPeerObservations(
                    "peer observations do not cover all assigned targets".into(),
                ));
            }
        }

        let report = EpochReport {
            supernode_account: msg.creator,
            epoch_id: msg.epoch_id,
            report_height: ctx.height,
            host_report: msg.host_report,
            storage_challenge_observations: msg.storage_challenge_observations,
        };
        self.store_report(&report)?;
        info!(
            epoch_id = report.epoch_id,
            reporter = %report.supernode_account,
            observations = report.storage_challenge_observations.len(),
            "accepted epoch report"
        );
        Ok(())
    }
}
