use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::params::Params;

/// Frozen inputs of one epoch, written once at its start height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochAnchor {
    pub epoch_id: u64,
    pub epoch_start_height: u64,
    pub epoch_end_height: u64,
    pub epoch_length_blocks: u64,
    pub seed: Vec<u8>,
    /// Probers: ACTIVE supernodes, sorted and deduplicated.
    pub active_supernode_accounts: Vec<String>,
    /// Targets: ACTIVE ∪ POSTPONED, sorted and deduplicated.
    pub target_supernode_accounts: Vec<String>,
    pub params_commitment: Vec<u8>,
    pub active_set_commitment: Vec<u8>,
    pub targets_set_commitment: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochParamsSnapshot {
    pub epoch_id: u64,
    pub params: Params,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortState {
    #[default]
    Unknown,
    Open,
    Closed,
}

/// Self-reported host metrics. A usage of exactly `0.0` means "not reported".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostReport {
    pub cpu_usage_percent: f64,
    pub mem_usage_percent: f64,
    pub disk_usage_percent: f64,
    pub inbound_port_states: Vec<PortState>,
    pub failed_actions_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageChallengeObservation {
    pub target_supernode_account: String,
    /// Indexed like `Params::required_open_ports`.
    #[serde(default)]
    pub port_states: Vec<PortState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    pub supernode_account: String,
    pub epoch_id: u64,
    pub report_height: u64,
    pub host_report: HostReport,
    pub storage_challenge_observations: Vec<StorageChallengeObservation>,
}

impl EpochReport {
    pub fn observation_for(&self, target: &str) -> Option<&StorageChallengeObservation> {
        self.storage_challenge_observations
            .iter()
            .find(|obs| obs.target_supernode_account == target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceType {
    Unspecified,
    ActionExpired,
    ActionFinalizationSignatureFailure,
    ActionFinalizationNotInTop10,
    CascadeClientFailure,
    StorageChallengeFailure,
}

impl EvidenceType {
    pub const ALL: [EvidenceType; 6] = [
        EvidenceType::Unspecified,
        EvidenceType::ActionExpired,
        EvidenceType::ActionFinalizationSignatureFailure,
        EvidenceType::ActionFinalizationNotInTop10,
        EvidenceType::CascadeClientFailure,
        EvidenceType::StorageChallengeFailure,
    ];

    pub fn code(self) -> u8 {
        match self {
            EvidenceType::Unspecified => 0,
            EvidenceType::ActionExpired => 1,
            EvidenceType::ActionFinalizationSignatureFailure => 2,
            EvidenceType::ActionFinalizationNotInTop10 => 3,
            EvidenceType::CascadeClientFailure => 4,
            EvidenceType::StorageChallengeFailure => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EvidenceType::Unspecified => "EVIDENCE_TYPE_UNSPECIFIED",
            EvidenceType::ActionExpired => "EVIDENCE_TYPE_ACTION_EXPIRED",
            EvidenceType::ActionFinalizationSignatureFailure => {
                "EVIDENCE_TYPE_ACTION_FINALIZATION_SIGNATURE_FAILURE"
            }
            EvidenceType::ActionFinalizationNotInTop10 => {
                "EVIDENCE_TYPE_ACTION_FINALIZATION_NOT_IN_TOP_10"
            }
            EvidenceType::CascadeClientFailure => "EVIDENCE_TYPE_CASCADE_CLIENT_FAILURE",
            EvidenceType::StorageChallengeFailure => "EVIDENCE_TYPE_STORAGE_CHALLENGE_FAILURE",
        }
    }

    pub fn requires_action_id(self) -> bool {
        matches!(
            self,
            EvidenceType::ActionExpired
                | EvidenceType::ActionFinalizationSignatureFailure
                | EvidenceType::ActionFinalizationNotInTop10
        )
    }

    /// Recorded only by the action module, never through `SubmitEvidence`.
    pub fn is_reserved(self) -> bool {
        self.requires_action_id()
    }
}

impl fmt::Display for EvidenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub evidence_id: u64,
    pub subject_address: String,
    pub reporter_address: String,
    #[serde(default)]
    pub action_id: String,
    pub evidence_type: EvidenceType,
    /// Canonical JSON of the type-specific metadata.
    pub metadata: Vec<u8>,
    pub reported_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpirationEvidenceMetadata {
    #[serde(default)]
    pub top_10_validator_addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FinalizationEvidenceMetadata {
    #[serde(default)]
    pub attempted_finalizer_address: String,
    #[serde(default)]
    pub expected_finalizer_addresses: Vec<String>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CascadeClientFailureEvidenceMetadata {
    #[serde(default)]
    pub reporter_component: String,
    #[serde(default)]
    pub target_supernode_accounts: Vec<String>,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageChallengeFailureEvidenceMetadata {
    #[serde(default)]
    pub epoch_id: u64,
    #[serde(default)]
    pub challenger_supernode_account: String,
    #[serde(default)]
    pub challenged_supernode_account: String,
    #[serde(default)]
    pub challenge_id: String,
    #[serde(default)]
    pub file_key: String,
    #[serde(default)]
    pub failure_type: String,
    #[serde(default)]
    pub transcript_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStatus {
    pub validator_address: String,
    pub supernode_account: String,
    pub compliant: bool,
    pub reasons: Vec<String>,
    pub required_ports_state: Vec<PortState>,
    pub last_evaluated_epoch_id: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisState {
    pub params: Params,
    pub evidence: Vec<Evidence>,
    /// 0 means "derive from the highest evidence id".
    pub next_evidence_id: u64,
}
