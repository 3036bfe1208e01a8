use std::collections::BTreeSet;

use state::KvStore;
use tracing::info;

use crate::epoch::EpochInfo;
use crate::error::{AuditError, AuditResult};
use crate::keeper::{BlockContext, Keeper};
use crate::keys;
use crate::params::Params;
use crate::registry::{SuperNode, SuperNodeState};
use crate::types::{EpochAnchor, EpochParamsSnapshot};

const EPOCH_SEED_DOMAIN: &[u8] = b"lumera:epoch-seed";

/// `blake3(domain || header_hash || be(epoch_id))`; an empty header hash is
/// replaced by `be(start_height)`.
pub fn derive_epoch_seed(header_hash: &[u8], epoch_id: u64, start_height: u64) -> Vec<u8> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(EPOCH_SEED_DOMAIN);
    if header_hash.is_empty() {
        hasher.update(&start_height.to_be_bytes());
    } else {
        hasher.update(header_hash);
    }
    hasher.update(&epoch_id.to_be_bytes());
    hasher.finalize().as_bytes().to_vec()
}

pub fn commit_string_list(list: &[String]) -> Vec<u8> {
    let mut hasher = blake3::Hasher::new();
    for s in list {
        hasher.update(s.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().as_bytes().to_vec()
}

pub fn commit_params(params: &Params) -> AuditResult<Vec<u8>> {
    let bz = bincode::serialize(&params.clone().with_defaults())?;
    Ok(blake3::hash(&bz).as_bytes().to_vec())
}

fn sorted_accounts(set: &[SuperNode]) -> AuditResult<Vec<String>> {
    let mut out = BTreeSet::new();
    for sn in set {
        if sn.supernode_account.is_empty() {
            return Err(AuditError::Registry(anyhow::anyhow!(
                "supernode {:?} has empty supernode_account",
                sn.validator_address
            )));
        }
        out.insert(sn.supernode_account.clone());
    }
    Ok(out.into_iter().collect())
}

impl<S: KvStore> Keeper<S> {
    pub fn get_epoch_anchor(&self, epoch_id: u64) -> AuditResult<Option<EpochAnchor>> {
        self.read(&keys::epoch_anchor_key(epoch_id))
    }

    pub fn has_epoch_anchor(&self, epoch_id: u64) -> bool {
        self.store().has(&keys::epoch_anchor_key(epoch_id))
    }

    pub fn get_epoch_params_snapshot(&self, epoch_id: u64) -> AuditResult<Option<Params>> {
        Ok(self
            .read::<EpochParamsSnapshot>(&keys::epoch_params_snapshot_key(epoch_id))?
            .map(|snap| snap.params))
    }

    /// Params frozen for `epoch_id`, falling back to live params for epochs
    /// anchored before snapshots existed.
    pub fn params_for_epoch(&self, epoch_id: u64) -> AuditResult<Params> {
        match self.get_epoch_params_snapshot(epoch_id)? {
            Some(params) => Ok(params.with_defaults()),
            None => self.get_params(),
        }
    }

    pub fn create_epoch_params_snapshot_if_needed(
        &self,
        epoch_id: u64,
        params: &Params,
    ) -> AuditResult<()> {
        let key = keys::epoch_params_snapshot_key(epoch_id);
        if self.store().has(&key) {
            return Ok(());
        }
        self.write(
            &key,
            &EpochParamsSnapshot {
                epoch_id,
                params: params.clone().with_defaults(),
            },
        )
    }

    /// Freezes seed, prober set and target set for `epoch`. Idempotent; must run
    /// exactly at the epoch start height.
    pub fn create_epoch_anchor_if_needed(
        &self,
        ctx: &BlockContext,
        epoch: &EpochInfo,
        params: &Params,
    ) -> AuditResult<()> {
        if self.has_epoch_anchor(epoch.epoch_id) {
            return Ok(());
        }
        if ctx.height != epoch.start_height {
            return Err(AuditError::AnchorHeightMismatch {
                want: epoch.start_height,
                got: ctx.height,
            });
        }

        let active = self
            .registry()
            .get_all_supernodes(&[SuperNodeState::Active])?;
        let targets = self
            .registry()
            .get_all_supernodes(&[SuperNodeState::Active, SuperNodeState::Postponed])?;
        let active_accounts = sorted_accounts(&active)?;
        let target_accounts = sorted_accounts(&targets)?;

        let params = params.clone().with_defaults();
        let anchor = EpochAnchor {
            epoch_id: epoch.epoch_id,
            epoch_start_height: epoch.start_height,
            epoch_end_height: epoch.end_height,
            epoch_length_blocks: params.epoch_length_blocks,
            seed: derive_epoch_seed(&ctx.header_hash, epoch.epoch_id, epoch.start_height),
            params_commitment: commit_params(&params)?,
            active_set_commitment: commit_string_list(&active_accounts),
            targets_set_commitment: commit_string_list(&target_accounts),
            active_supernode_accounts: active_accounts,
            target_supernode_accounts: target_accounts,
        };
        self.write(&keys::epoch_anchor_key(epoch.epoch_id), &anchor)?;
        info!(
            epoch_id = anchor.epoch_id,
            start = anchor.epoch_start_height,
            end = anchor.epoch_end_height,
            active = anchor.active_supernode_accounts.len(),
            targets = anchor.target_supernode_accounts.len(),
            "created epoch anchor"
        );
        Ok(())
    }
}
