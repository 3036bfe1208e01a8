use serde::de::DeserializeOwned;
use serde::Serialize;
use state::KvStore;
use tracing::info;

use crate::assignment::xor_distance;
use crate::epoch::derive_epoch_at_height;
use crate::error::{AuditError, AuditResult};
use crate::keeper::{BlockContext, Keeper};
use crate::keys;
use crate::msg::MsgSubmitEvidence;
use crate::params::Params;
use crate::types::{
    CascadeClientFailureEvidenceMetadata, Evidence, EvidenceType, ExpirationEvidenceMetadata,
    FinalizationEvidenceMetadata, StorageChallengeFailureEvidenceMetadata,
};

const INDEX_MARKER: &[u8] = &[1];

fn parse_metadata<T: DeserializeOwned + Serialize>(raw: &str) -> AuditResult<(T, Vec<u8>)> {
    let typed: T = serde_json::from_str(raw)
        .map_err(|e| AuditError::InvalidMetadata(format!("{e}")))?;
    let canonical =
        serde_json::to_vec(&typed).map_err(|e| AuditError::InvalidMetadata(format!("{e}")))?;
    Ok((typed, canonical))
}

impl<S: KvStore> Keeper<S> {
    /// Next id to assign. A zero or malformed stored counter is rebuilt from
    /// the highest stored evidence id so ids are never reused.
    pub fn next_evidence_id(&self) -> u64 {
        match self.read_u64(keys::NEXT_EVIDENCE_ID_KEY) {
            Ok(None) => 1,
            Ok(Some(id)) if id > 0 => id,
            _ => self.derive_next_evidence_id(),
        }
    }

    fn derive_next_evidence_id(&self) -> u64 {
        self.store()
            .prefix(keys::EVIDENCE_PREFIX)
            .iter()
            .filter_map(|(key, _)| keys::decode_evidence_key(key))
            .max()
            .unwrap_or(0)
            + 1
    }

    pub fn set_next_evidence_id(&self, next_id: u64) {
        self.write_u64(keys::NEXT_EVIDENCE_ID_KEY, next_id);
    }

    pub fn get_evidence(&self, evidence_id: u64) -> AuditResult<Option<Evidence>> {
        self.read(&keys::evidence_key(evidence_id))
    }

    pub(crate) fn put_evidence(&self, ev: &Evidence) -> AuditResult<()> {
        self.write(&keys::evidence_key(ev.evidence_id), ev)?;
        self.store().set(
            &keys::evidence_by_subject_key(&ev.subject_address, ev.evidence_id),
            INDEX_MARKER,
        );
        if !ev.action_id.is_empty() {
            self.store().set(
                &keys::evidence_by_action_key(&ev.action_id, ev.evidence_id),
                INDEX_MARKER,
            );
        }
        Ok(())
    }

    pub fn all_evidence(&self) -> AuditResult<Vec<Evidence>> {
        self.store()
            .prefix(keys::EVIDENCE_PREFIX)
            .into_iter()
            .map(|(_, bz)| bincode::deserialize(&bz).map_err(AuditError::from))
            .collect()
    }

    pub fn evidence_epoch_count(
        &self,
        epoch_id: u64,
        subject: &str,
        evidence_type: EvidenceType,
    ) -> AuditResult<u64> {
        let key = keys::evidence_epoch_count_key(epoch_id, subject, evidence_type.code());
        Ok(self.read_u64(&key)?.unwrap_or(0))
    }

    pub fn evidence_window_count(
        &self,
        window_id: u64,
        subject: &str,
        evidence_type: EvidenceType,
    ) -> AuditResult<u64> {
        let key = keys::evidence_window_count_key(window_id, subject, evidence_type.code());
        Ok(self.read_u64(&key)?.unwrap_or(0))
    }

    fn bump_counter(&self, key: &[u8]) -> AuditResult<()> {
        let count = self.read_u64(key)?.unwrap_or(0);
        self.write_u64(key, count.saturating_add(1));
        Ok(())
    }

    fn validate_metadata(
        &self,
        params: &Params,
        reporter: &str,
        subject: &str,
        evidence_type: EvidenceType,
        raw: &str,
    ) -> AuditResult<Vec<u8>> {
        match evidence_type {
            EvidenceType::Unspecified => Err(AuditError::InvalidEvidenceType(
                evidence_type.to_string(),
            )),
            EvidenceType::ActionExpired => {
                let (meta, canonical) = parse_metadata::<ExpirationEvidenceMetadata>(raw)?;
                for addr in &meta.top_10_validator_addresses {
                    self.codec().parse_validator(addr).map_err(|e| {
                        AuditError::InvalidMetadata(format!("top_10_validator_addresses {addr}: {e}"))
                    })?;
                }
                Ok(canonical)
            }
            EvidenceType::ActionFinalizationSignatureFailure
            | EvidenceType::ActionFinalizationNotInTop10 => {
                let (meta, canonical) = parse_metadata::<FinalizationEvidenceMetadata>(raw)?;
                let attempted = meta.attempted_finalizer_address.trim();
                if attempted.is_empty() {
                    return Err(AuditError::InvalidMetadata(
                        "attempted_finalizer_address is required".into(),
                    ));
                }
                self.codec().parse_account(attempted).map_err(|e| {
                    AuditError::InvalidMetadata(format!("attempted_finalizer_address: {e}"))
                })?;
                Ok(canonical)
            }
            EvidenceType::CascadeClientFailure => {
                let (_, canonical) = parse_metadata::<CascadeClientFailureEvidenceMetadata>(raw)?;
                Ok(canonical)
            }
            EvidenceType::StorageChallengeFailure => {
                let (meta, canonical) =
                    parse_metadata::<StorageChallengeFailureEvidenceMetadata>(raw)?;
                self.check_storage_challenger(params, reporter, subject, &meta)?;
                Ok(canonical)
            }
        }
    }

    fn check_storage_challenger(
        &self,
        params: &Params,
        reporter: &str,
        subject: &str,
        meta: &StorageChallengeFailureEvidenceMetadata,
    ) -> AuditResult<()> {
        if !params.sc_enabled {
            return Err(AuditError::StorageChallengeDisabled);
        }
        if meta.challenger_supernode_account != reporter {
            return Err(AuditError::InvalidMetadata(
                "challenger_supernode_account must equal the reporter".into(),
            ));
        }
        if meta.challenged_supernode_account != subject {
            return Err(AuditError::InvalidMetadata(
                "challenged_supernode_account must equal the subject".into(),
            ));
        }
        let anchor = self
            .get_epoch_anchor(meta.epoch_id)?
            .ok_or(AuditError::EpochAnchorNotFound(meta.epoch_id))?;
        let epoch_params = self.params_for_epoch(meta.epoch_id)?;
        let challengers = xor_distance::challengers(
            &epoch_params,
            &anchor.active_supernode_accounts,
            &anchor.seed,
            meta.epoch_id,
        )?;
        if !challengers.iter().any(|c| c == reporter) {
            return Err(AuditError::NotAChallenger(
                reporter.to_string(),
                meta.epoch_id,
            ));
        }
        Ok(())
    }

    pub fn create_evidence(
        &self,
        ctx: &BlockContext,
        reporter: &str,
        subject: &str,
        action_id: &str,
        evidence_type: EvidenceType,
        metadata_json: &str,
    ) -> AuditResult<u64> {
        self.codec().require_reporter(reporter)?;
        self.codec().require_subject(subject)?;
        if evidence_type == EvidenceType::Unspecified {
            return Err(AuditError::InvalidEvidenceType(
                evidence_type.to_string(),
            ));
        }
        let metadata_json = metadata_json.trim();
        if metadata_json.is_empty() {
            return Err(AuditError::InvalidMetadata("metadata is required".into()));
        }
        if action_id.is_empty() && evidence_type.requires_action_id() {
            return Err(AuditError::InvalidActionId(evidence_type.to_string()));
        }

        let params = self.get_params()?;
        let metadata =
            self.validate_metadata(&params, reporter, subject, evidence_type, metadata_json)?;

        let evidence_id = self.next_evidence_id();
        let ev = Evidence {
            evidence_id,
            subject_address: subject.to_string(),
            reporter_address: reporter.to_string(),
            action_id: action_id.to_string(),
            evidence_type,
            metadata,
            reported_height: ctx.height,
        };
        self.put_evidence(&ev)?;
        self.set_next_evidence_id(evidence_id + 1);

        let epoch = derive_epoch_at_height(ctx.height, &params)?;
        self.bump_counter(&keys::evidence_epoch_count_key(
            epoch.epoch_id,
            subject,
            evidence_type.code(),
        ))?;
        if let Some(window) = self.window_state()? {
            self.bump_counter(&keys::evidence_window_count_key(
                window.window_id,
                subject,
                evidence_type.code(),
            ))?;
        }

        info!(
            evidence_id,
            %evidence_type,
            subject,
            reporter,
            epoch_id = epoch.epoch_id,
            "recorded evidence"
        );
        Ok(evidence_id)
    }

    /// User-facing path: reserved evidence types are refused.
    pub fn submit_evidence(&self, ctx: &BlockContext, msg: MsgSubmitEvidence) -> AuditResult<u64> {
        if msg.creator.is_empty() {
            return Err(AuditError::InvalidSigner("creator is required".into()));
        }
        if msg.evidence_type.is_reserved() {
            return Err(AuditError::ReservedEvidenceType(
                msg.evidence_type.to_string(),
            ));
        }
        self.create_evidence(
            ctx,
            &msg.creator,
            &msg.subject_address,
            &msg.action_id,
            msg.evidence_type,
            &msg.metadata,
        )
    }

    pub fn record_action_expired(
        &self,
        ctx: &BlockContext,
        module_reporter: &str,
        subject: &str,
        action_id: &str,
        top_10_validator_addresses: Vec<String>,
    ) -> AuditResult<u64> {
        let meta = serde_json::to_string(&ExpirationEvidenceMetadata {
            top_10_validator_addresses,
        })
        .map_err(|e| AuditError::InvalidMetadata(e.to_string()))?;
        self.create_evidence(
            ctx,
            module_reporter,
            subject,
            action_id,
            EvidenceType::ActionExpired,
            &meta,
        )
    }

    fn record_finalization(
        &self,
        ctx: &BlockContext,
        module_reporter: &str,
        action_id: &str,
        evidence_type: EvidenceType,
        meta: FinalizationEvidenceMetadata,
    ) -> AuditResult<u64> {
        let subject = meta.attempted_finalizer_address.clone();
        let raw = serde_json::to_string(&meta)
            .map_err(|e| AuditError::InvalidMetadata(e.to_string()))?;
        self.create_evidence(ctx, module_reporter, &subject, action_id, evidence_type, &raw)
    }

    /// Privileged path: the attempted finalizer is the subject.
    pub fn record_finalization_signature_failure(
        &self,
        ctx: &BlockContext,
        module_reporter: &str,
        action_id: &str,
        attempted_finalizer_address: &str,
        reason: &str,
    ) -> AuditResult<u64> {
        self.record_finalization(
            ctx,
            module_reporter,
            action_id,
            EvidenceType::ActionFinalizationSignatureFailure,
            FinalizationEvidenceMetadata {
                attempted_finalizer_address: attempted_finalizer_address.to_string(),
                expected_finalizer_addresses: Vec::new(),
                reason: reason.to_string(),
            },
        )
    }

    pub fn record_finalization_not_in_top_10(
        &self,
        ctx: &BlockContext,
        module_reporter: &str,
        action_id: &str,
        attempted_finalizer_address: &str,
        expected_finalizer_addresses: Vec<String>,
        reason: &str,
    ) -> AuditResult<u64> {
        self.record_finalization(
            ctx,
            module_reporter,
            action_id,
            EvidenceType::ActionFinalizationNotInTop10,
            FinalizationEvidenceMetadata {
                attempted_finalizer_address: attempted_finalizer_address.to_string(),
                expected_finalizer_addresses,
                reason: reason.to_string(),
            },
        )
    }
}
