use serde::{Deserialize, Serialize};
use state::KvStore;
use tracing::info;

use crate::error::{AuditError, AuditResult};
use crate::keeper::{BlockContext, Keeper};
use crate::params::Params;
use crate::types::{EvidenceType, HostReport, StorageChallengeObservation};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsgSubmitEpochReport {
    pub creator: String,
    pub epoch_id: u64,
    #[serde(default)]
    pub host_report: HostReport,
    #[serde(default)]
    pub storage_challenge_observations: Vec<StorageChallengeObservation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgSubmitEvidence {
    pub creator: String,
    pub subject_address: String,
    pub evidence_type: EvidenceType,
    #[serde(default)]
    pub action_id: String,
    /// JSON document matching the schema of `evidence_type`.
    pub metadata: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgUpdateParams {
    pub authority: String,
    pub params: Params,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditMsg {
    SubmitEpochReport(MsgSubmitEpochReport),
    SubmitEvidence(MsgSubmitEvidence),
    UpdateParams(MsgUpdateParams),
}

impl AuditMsg {
    pub fn signer(&self) -> &str {
        match self {
            AuditMsg::SubmitEpochReport(msg) => &msg.creator,
            AuditMsg::SubmitEvidence(msg) => &msg.creator,
            AuditMsg::UpdateParams(msg) => &msg.authority,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AuditMsg::SubmitEpochReport(_) => "submit_epoch_report",
            AuditMsg::SubmitEvidence(_) => "submit_evidence",
            AuditMsg::UpdateParams(_) => "update_params",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MsgResponse {
    SubmitEpochReport,
    SubmitEvidence { evidence_id: u64 },
    UpdateParams,
}

impl<S: KvStore> Keeper<S> {
    /// Governance-only. A changed `reporting_window_blocks` takes effect at the
    /// next window boundary.
    pub fn update_params(&self, ctx: &BlockContext, msg: MsgUpdateParams) -> AuditResult<()> {
        if msg.authority != self.authority() {
            return Err(AuditError::InvalidSigner(format!(
                "invalid authority; expected {}, got {}",
                self.authority(),
                msg.authority
            )));
        }
        let params = msg.params.with_defaults();
        params.validate()?;

        let current = self.get_params()?;
        self.schedule_window_resize(ctx, &current, params.reporting_window_blocks)?;
        self.set_params(&params)?;
        info!(height = ctx.height, "updated audit params");
        Ok(())
    }

    pub fn deliver(&self, ctx: &BlockContext, msg: AuditMsg) -> AuditResult<MsgResponse> {
        match msg {
            AuditMsg::SubmitEpochReport(msg) => {
                self.submit_epoch_report(ctx, msg)?;
                Ok(MsgResponse::SubmitEpochReport)
            }
            AuditMsg::SubmitEvidence(msg) => {
                let evidence_id = self.submit_evidence(ctx, msg)?;
                Ok(MsgResponse::SubmitEvidence { evidence_id })
            }
            AuditMsg::UpdateParams(msg) => {
                self.update_params(ctx, msg)?;
                Ok(MsgResponse::UpdateParams)
            }
        }
    }
}
