//! Deterministic target selection.
//!
//! Two independent strategies:
//! [`ring_walk`] spreads peer-port probes uniformly over the target ring, and
//! [`xor_distance`] picks storage-challenge challengers nearest to a seed-derived
//! point. Both are pure: identical sorted inputs and seed give identical output.

use crate::error::{AuditError, AuditResult};
use crate::params::Params;

pub const MIN_SEED_LEN: usize = 32;

fn check_seed(seed: &[u8]) -> AuditResult<()> {
    if seed.len() < MIN_SEED_LEN {
        return Err(AuditError::InvalidSeed(format!(
            "seed must be at least {MIN_SEED_LEN} bytes, got {}",
            seed.len()
        )));
    }
    Ok(())
}

pub mod ring_walk {
    use std::collections::{BTreeMap, BTreeSet};

    use super::*;

    /// Per-prober fan-out so that `senders * k >= quorum * receivers`, clamped to the
    /// probe-target bounds and capped at `receivers - 1`.
    pub fn compute_k(params: &Params, senders: usize, receivers: usize) -> u32 {
        if senders == 0 || receivers <= 1 {
            return 0;
        }
        let a = senders as u64;
        let n = receivers as u64;
        let q = u64::from(params.peer_quorum_reports);

        let needed = (q * n)
            .div_ceil(a)
            .max(u64::from(params.min_probe_targets_per_epoch))
            .min(u64::from(params.max_probe_targets_per_epoch))
            .min(n - 1);
        needed as u32
    }

    fn ring_offset(seed: &[u8], n: usize) -> usize {
        let mut head = [0u8; 8];
        head.copy_from_slice(&seed[..8]);
        (u64::from_be_bytes(head) % n as u64) as usize
    }

    // Targets of the sender at `sender_index`. Stops early if the ring runs out of
    // eligible candidates.
    fn walk(
        sender_index: usize,
        sender: &str,
        receivers: &[String],
        k: u32,
        offset: usize,
    ) -> Vec<String> {
        let n = receivers.len();
        let k = k as usize;
        let mut seen = BTreeSet::new();
        let mut out = Vec::with_capacity(k);

        for j in 0..k {
            let slot = sender_index * k + j;
            let mut candidate = (offset + slot) % n;
            let mut tries = 0;
            while tries < n {
                if receivers[candidate] != sender && !seen.contains(&candidate) {
                    break;
                }
                candidate = (candidate + 1) % n;
                tries += 1;
            }
            if tries >= n {
                break;
            }
            seen.insert(candidate);
            out.push(receivers[candidate].clone());
        }
        out
    }

    pub fn assign(
        seed: &[u8],
        senders: &[String],
        receivers: &[String],
        k: u32,
    ) -> AuditResult<BTreeMap<String, Vec<String>>> {
        check_seed(seed)?;
        let mut out = BTreeMap::new();
        if k == 0 || receivers.is_empty() {
            for sender in senders {
                out.insert(sender.clone(), Vec::new());
            }
            return Ok(out);
        }
        let offset = ring_offset(seed, receivers.len());
        for (index, sender) in senders.iter().enumerate() {
            out.insert(sender.clone(), walk(index, sender, receivers, k, offset));
        }
        Ok(out)
    }

    /// Targets one reporter must observe, and whether it is a prober at all.
    /// A reporter outside `senders` gets `(vec![], false)`.
    pub fn targets_for_reporter(
        params: &Params,
        senders: &[String],
        receivers: &[String],
        seed: &[u8],
        reporter: &str,
    ) -> AuditResult<(Vec<String>, bool)> {
        check_seed(seed)?;
        let Ok(index) = senders.binary_search_by(|s| s.as_str().cmp(reporter)) else {
            return Ok((Vec::new(), false));
        };
        let k = compute_k(params, senders.len(), receivers.len());
        if k == 0 || receivers.is_empty() {
            return Ok((Vec::new(), true));
        }
        let offset = ring_offset(seed, receivers.len());
        Ok((walk(index, reporter, receivers, k, offset), true))
    }
}

pub mod xor_distance {
    use super::*;

    pub fn comparison_target(seed: &[u8], epoch_id: u64) -> String {
        format!("sc:challengers:{}:{}", hex::encode(seed), epoch_id)
    }

    pub fn challenger_count(active: usize, requested: u32) -> usize {
        if active == 0 {
            return 0;
        }
        if requested == 0 {
            return active.div_ceil(3).max(1);
        }
        (requested as usize).min(active)
    }

    fn hashed_target(target: &[u8]) -> [u8; 32] {
        match <[u8; 32]>::try_from(target) {
            Ok(raw) => raw,
            Err(_) => *blake3::hash(target).as_bytes(),
        }
    }

    /// The `k` ids whose hash is closest to `target` by XOR distance; ties break on id.
    pub fn select_top(ids: &[String], target: &str, k: usize) -> Vec<String> {
        if k == 0 || ids.is_empty() {
            return Vec::new();
        }
        let target = hashed_target(target.as_bytes());
        let mut ranked: Vec<([u8; 32], &String)> = ids
            .iter()
            .map(|id| {
                let mut dist = *blake3::hash(id.as_bytes()).as_bytes();
                for (d, t) in dist.iter_mut().zip(target.iter()) {
                    *d ^= t;
                }
                (dist, id)
            })
            .collect();
        ranked.sort();
        ranked.into_iter().take(k).map(|(_, id)| id.clone()).collect()
    }

    pub fn challengers(
        params: &Params,
        active: &[String],
        seed: &[u8],
        epoch_id: u64,
    ) -> AuditResult<Vec<String>> {
        check_seed(seed)?;
        let k = challenger_count(active.len(), params.sc_challengers_per_epoch);
        Ok(select_top(active, &comparison_target(seed, epoch_id), k))
    }
}
