use state::KvStore;
use tracing::info;

use crate::error::AuditResult;
use crate::keeper::Keeper;
use crate::keys;
use crate::params::Params;

/// Oldest id kept when `keep_last` ids up to and including `current` survive.
pub fn min_keep_id(current: u64, keep_last: u64) -> u64 {
    (current + 1).saturating_sub(keep_last)
}

impl<S: KvStore> Keeper<S> {
    // Keys are `<prefix><u64be id>...`, so everything below the cutoff is one range.
    fn prune_leading_id(&self, prefix: &[u8], min_keep: u64) -> usize {
        let end = [prefix, &keys::encode_id(min_keep)[..]].concat();
        let stale = self.store().range(prefix, Some(&end));
        for (key, _) in &stale {
            self.store().delete(key);
        }
        stale.len()
    }

    fn prune_matching(
        &self,
        prefix: &[u8],
        min_keep: u64,
        id_of: impl Fn(&[u8]) -> Option<u64>,
    ) -> usize {
        let mut removed = 0;
        for (key, _) in self.store().prefix(prefix) {
            if id_of(&key).is_some_and(|id| id < min_keep) {
                self.store().delete(&key);
                removed += 1;
            }
        }
        removed
    }

    pub fn prune_old_epochs(&self, current_epoch_id: u64, params: &Params) -> AuditResult<()> {
        let min_keep = min_keep_id(current_epoch_id, params.keep_last_epoch_entries);
        if min_keep == 0 {
            return Ok(());
        }

        let mut removed = 0;
        for prefix in [
            keys::EPOCH_ANCHOR_PREFIX,
            keys::EPOCH_PARAMS_SNAPSHOT_PREFIX,
            keys::REPORT_PREFIX,
            keys::EVIDENCE_EPOCH_COUNT_PREFIX,
        ] {
            removed += self.prune_leading_id(prefix, min_keep);
        }
        for prefix in [keys::REPORT_INDEX_PREFIX, keys::SELF_REPORT_INDEX_PREFIX] {
            removed += self.prune_matching(prefix, min_keep, |key| {
                keys::decode_reporter_index_key(key).map(|(_, id)| id)
            });
        }
        removed += self.prune_matching(keys::SUPERNODE_REPORT_INDEX_PREFIX, min_keep, |key| {
            keys::decode_supernode_report_index_key(key).map(|(_, id, _)| id)
        });

        if removed > 0 {
            info!(current_epoch_id, min_keep, removed, "pruned epoch state");
        }
        Ok(())
    }

    pub fn prune_old_windows(&self, current_window_id: u64, params: &Params) -> AuditResult<()> {
        let min_keep = min_keep_id(current_window_id, params.keep_last_epoch_entries);
        if min_keep == 0 {
            return Ok(());
        }
        let removed = self.prune_leading_id(keys::EVIDENCE_WINDOW_COUNT_PREFIX, min_keep);
        if removed > 0 {
            info!(current_window_id, min_keep, removed, "pruned window counters");
        }
        Ok(())
    }
}
