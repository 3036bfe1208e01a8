use state::KvStore;
use tracing::{debug, info};

use crate::error::{AuditError, AuditResult};
use crate::keeper::{BlockContext, Keeper};
use crate::keys;
use crate::params::Params;
use crate::registry::{SuperNode, SuperNodeState};
use crate::types::{AuditStatus, EvidenceType, HostReport, PortState};

pub const REASON_SIGNATURE_FAILURE: &str = "audit_action_finalization_signature_failure";
pub const REASON_NOT_IN_TOP_10: &str = "audit_action_finalization_not_in_top_10";
pub const REASON_MISSING_REPORTS: &str = "audit_missing_reports";
pub const REASON_HOST_REQUIREMENTS: &str = "audit_host_requirements";
pub const REASON_PEER_PORTS: &str = "audit_peer_ports";

/// Usage of exactly 0 is "not reported" and never violates.
pub fn violates_min_free(usage_percent: f64, min_free_percent: u32) -> bool {
    if min_free_percent == 0 || usage_percent == 0.0 {
        return false;
    }
    if !(0.0..=100.0).contains(&usage_percent) {
        return true;
    }
    100.0 - usage_percent < f64::from(min_free_percent)
}

pub fn complies_min_free(usage_percent: f64, min_free_percent: u32) -> bool {
    if min_free_percent == 0 || usage_percent == 0.0 {
        return true;
    }
    if !(0.0..=100.0).contains(&usage_percent) {
        return false;
    }
    100.0 - usage_percent >= f64::from(min_free_percent)
}

fn host_violates(host: &HostReport, params: &Params) -> bool {
    violates_min_free(host.cpu_usage_percent, params.min_cpu_free_percent)
        || violates_min_free(host.mem_usage_percent, params.min_mem_free_percent)
        || violates_min_free(host.disk_usage_percent, params.min_disk_free_percent)
}

fn host_complies(host: &HostReport, params: &Params) -> bool {
    complies_min_free(host.cpu_usage_percent, params.min_cpu_free_percent)
        && complies_min_free(host.mem_usage_percent, params.min_mem_free_percent)
        && complies_min_free(host.disk_usage_percent, params.min_disk_free_percent)
}

// Whether an N-epoch streak ending at `epoch_id` fits in the chain's history.
fn has_history(consecutive: u64, epoch_id: u64) -> bool {
    consecutive <= epoch_id.saturating_add(1)
}

impl<S: KvStore> Keeper<S> {
    pub fn enforce_epoch_end(
        &self,
        ctx: &BlockContext,
        epoch_id: u64,
        params: &Params,
    ) -> AuditResult<()> {
        let params = params.clone().with_defaults();
        let active = self
            .registry()
            .get_all_supernodes(&[SuperNodeState::Active])?;
        let postponed = self
            .registry()
            .get_all_supernodes(&[SuperNodeState::Postponed])?;

        let mut postponed_count = 0usize;
        for sn in &active {
            if sn.supernode_account.is_empty() {
                continue;
            }
            self.store()
                .delete(&keys::postponed_for_evidence_key(&sn.supernode_account));

            let reason = self.postponement_reason(&sn.supernode_account, epoch_id, &params)?;
            if let Some(reason) = reason {
                if reason == REASON_SIGNATURE_FAILURE || reason == REASON_NOT_IN_TOP_10 {
                    self.write_u64(
                        &keys::postponed_for_evidence_key(&sn.supernode_account),
                        epoch_id,
                    );
                }
                self.postpone(ctx, sn, reason)?;
                postponed_count += 1;
            }
            let reasons = reason.map(|r| vec![r.to_string()]).unwrap_or_default();
            self.refresh_audit_status(sn, epoch_id, &params, reasons)?;
        }

        let mut recovered_count = 0usize;
        for sn in &postponed {
            if sn.supernode_account.is_empty() {
                continue;
            }
            let recovered = self.should_recover(&sn.supernode_account, epoch_id, &params)?;
            if recovered {
                self.recover(ctx, sn)?;
                self.store()
                    .delete(&keys::postponed_for_evidence_key(&sn.supernode_account));
                recovered_count += 1;
            }
            let reasons = match sn.states.last() {
                Some(record) if !recovered && !record.reason.is_empty() => {
                    vec![record.reason.clone()]
                }
                _ => Vec::new(),
            };
            self.refresh_audit_status(sn, epoch_id, &params, reasons)?;
        }

        info!(
            epoch_id,
            evaluated = active.len() + postponed.len(),
            postponed = postponed_count,
            recovered = recovered_count,
            "enforced epoch end"
        );
        Ok(())
    }

    /// First failing rule in priority order: evidence, missing reports, host
    /// metrics, peer-observed ports.
    pub fn postponement_reason(
        &self,
        account: &str,
        epoch_id: u64,
        params: &Params,
    ) -> AuditResult<Option<&'static str>> {
        if self.evidence_streak(
            account,
            epoch_id,
            EvidenceType::ActionFinalizationSignatureFailure,
            params.action_finalization_signature_failure_evidences_per_epoch,
            params.action_finalization_signature_failure_consecutive_epochs,
        )? {
            return Ok(Some(REASON_SIGNATURE_FAILURE));
        }
        if self.evidence_streak(
            account,
            epoch_id,
            EvidenceType::ActionFinalizationNotInTop10,
            params.action_finalization_not_in_top_10_evidences_per_epoch,
            params.action_finalization_not_in_top_10_consecutive_epochs,
        )? {
            return Ok(Some(REASON_NOT_IN_TOP_10));
        }

        let consecutive = u64::from(params.consecutive_epochs_to_postpone.max(1));
        if self.missing_reports_for_consecutive_epochs(account, epoch_id, consecutive) {
            return Ok(Some(REASON_MISSING_REPORTS));
        }

        if let Some(report) = self.get_report(epoch_id, account)? {
            if host_violates(&report.host_report, params) {
                return Ok(Some(REASON_HOST_REQUIREMENTS));
            }
        }

        if has_history(consecutive, epoch_id) {
            for port_index in 0..params.required_open_ports.len() {
                let mut streak = 0u64;
                for offset in 0..consecutive {
                    let closed = self.peers_port_state_meets_threshold(
                        account,
                        epoch_id - offset,
                        port_index,
                        PortState::Closed,
                        params.peer_port_postpone_threshold_percent,
                    )?;
                    if !closed {
                        break;
                    }
                    streak += 1;
                }
                if streak == consecutive {
                    return Ok(Some(REASON_PEER_PORTS));
                }
            }
        }
        Ok(None)
    }

    fn evidence_streak(
        &self,
        account: &str,
        epoch_id: u64,
        evidence_type: EvidenceType,
        min_per_epoch: u32,
        consecutive: u32,
    ) -> AuditResult<bool> {
        let consecutive = u64::from(consecutive.max(1));
        if !has_history(consecutive, epoch_id) {
            return Ok(false);
        }
        for offset in 0..consecutive {
            let count = self.evidence_epoch_count(epoch_id - offset, account, evidence_type)?;
            if count < u64::from(min_per_epoch) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn missing_reports_for_consecutive_epochs(
        &self,
        account: &str,
        epoch_id: u64,
        consecutive: u64,
    ) -> bool {
        if !has_history(consecutive, epoch_id) {
            return false;
        }
        (0..consecutive).all(|offset| !self.has_report(epoch_id - offset, account))
    }

    /// Share of this epoch's peer reporters that saw `port_index` in `desired`
    /// state, compared against `threshold_percent`. A peer whose observation
    /// lacks that port counts as a non-matching vote, like `Unknown`.
    pub fn peers_port_state_meets_threshold(
        &self,
        target: &str,
        epoch_id: u64,
        port_index: usize,
        desired: PortState,
        threshold_percent: u32,
    ) -> AuditResult<bool> {
        let peers = self.peer_reporters_for_target(target, epoch_id)?;
        if peers.is_empty() {
            return Ok(false);
        }
        let mut matches = 0u64;
        for reporter in &peers {
            let observed = self
                .get_report(epoch_id, reporter)?
                .and_then(|report| {
                    report
                        .observation_for(target)
                        .and_then(|obs| obs.port_states.get(port_index).copied())
                });
            if observed == Some(desired) {
                matches += 1;
            }
        }
        let total = peers.len() as u64;
        Ok(matches * 100 >= u64::from(threshold_percent) * total)
    }

    fn should_recover(&self, account: &str, epoch_id: u64, params: &Params) -> AuditResult<bool> {
        if let Some(start) = self.read_u64(&keys::postponed_for_evidence_key(account))? {
            return self.evidence_recovery_ready(account, epoch_id, start, params);
        }

        let Some(report) = self.get_report(epoch_id, account)? else {
            return Ok(false);
        };
        if !host_complies(&report.host_report, params) {
            return Ok(false);
        }

        let ports_len = params.required_open_ports.len();
        if ports_len == 0 {
            return Ok(true);
        }
        for reporter in self.peer_reporters_for_target(account, epoch_id)? {
            let Some(peer_report) = self.get_report(epoch_id, &reporter)? else {
                continue;
            };
            let Some(obs) = peer_report.observation_for(account) else {
                continue;
            };
            if obs.port_states.len() == ports_len
                && obs.port_states.iter().all(|s| *s == PortState::Open)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn evidence_recovery_ready(
        &self,
        account: &str,
        epoch_id: u64,
        postponed_at: u64,
        params: &Params,
    ) -> AuditResult<bool> {
        let window = u64::from(params.action_finalization_recovery_epochs.max(1));
        if epoch_id < postponed_at.saturating_add(window) {
            return Ok(false);
        }
        let mut total = 0u64;
        for epoch in (epoch_id + 1 - window)..=epoch_id {
            for evidence_type in [
                EvidenceType::ActionFinalizationSignatureFailure,
                EvidenceType::ActionFinalizationNotInTop10,
            ] {
                total += self.evidence_epoch_count(epoch, account, evidence_type)?;
            }
        }
        debug!(account, epoch_id, total, "evaluated evidence recovery window");
        Ok(total < u64::from(params.action_finalization_recovery_max_total_bad_evidences))
    }

    fn require_validator(&self, sn: &SuperNode) -> AuditResult<()> {
        if sn.validator_address.is_empty() {
            return Err(AuditError::Registry(anyhow::anyhow!(
                "missing validator address for supernode {:?}",
                sn.supernode_account
            )));
        }
        self.codec()
            .parse_validator(&sn.validator_address)
            .map(|_| ())
            .map_err(|e| AuditError::Registry(e.context(format!("validator {}", sn.validator_address))))
    }

    fn postpone(&self, ctx: &BlockContext, sn: &SuperNode, reason: &str) -> AuditResult<()> {
        self.require_validator(sn)?;
        self.registry()
            .set_supernode_postponed(ctx.height, &sn.validator_address, reason)?;
        info!(
            validator = %sn.validator_address,
            account = %sn.supernode_account,
            reason,
            "postponed supernode"
        );
        Ok(())
    }

    fn recover(&self, ctx: &BlockContext, sn: &SuperNode) -> AuditResult<()> {
        self.require_validator(sn)?;
        self.registry()
            .recover_supernode_from_postponed(ctx.height, &sn.validator_address)?;
        info!(
            validator = %sn.validator_address,
            account = %sn.supernode_account,
            "recovered supernode"
        );
        Ok(())
    }

    fn refresh_audit_status(
        &self,
        sn: &SuperNode,
        epoch_id: u64,
        params: &Params,
        reasons: Vec<String>,
    ) -> AuditResult<()> {
        let mut ports = Vec::with_capacity(params.required_open_ports.len());
        for port_index in 0..params.required_open_ports.len() {
            let threshold = params.peer_port_postpone_threshold_percent;
            let state = if self.peers_port_state_meets_threshold(
                &sn.supernode_account,
                epoch_id,
                port_index,
                PortState::Closed,
                threshold,
            )? {
                PortState::Closed
            } else if self.peers_port_state_meets_threshold(
                &sn.supernode_account,
                epoch_id,
                port_index,
                PortState::Open,
                threshold,
            )? {
                PortState::Open
            } else {
                PortState::Unknown
            };
            ports.push(state);
        }
        let status = AuditStatus {
            validator_address: sn.validator_address.clone(),
            supernode_account: sn.supernode_account.clone(),
            compliant: reasons.is_empty(),
            reasons,
            required_ports_state: ports,
            last_evaluated_epoch_id: epoch_id,
        };
        self.write(&keys::audit_status_key(&status.validator_address), &status)
    }

    pub fn get_audit_status(&self, validator_address: &str) -> AuditResult<Option<AuditStatus>> {
        self.read(&keys::audit_status_key(validator_address))
    }
}
