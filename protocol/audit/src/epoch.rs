use serde::{Deserialize, Serialize};

use crate::error::{AuditError, AuditResult};
use crate::params::Params;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochInfo {
    pub epoch_id: u64,
    pub start_height: u64,
    pub end_height: u64,
}

impl EpochInfo {
    pub fn contains(&self, height: u64) -> bool {
        height >= self.start_height && height <= self.end_height
    }
}

fn check(params: &Params) -> AuditResult<(u64, u64)> {
    if params.epoch_length_blocks == 0 {
        return Err(AuditError::InvalidParams(
            "epoch_length_blocks must be > 0".into(),
        ));
    }
    if params.epoch_zero_height == 0 {
        return Err(AuditError::InvalidParams(
            "epoch_zero_height must be > 0".into(),
        ));
    }
    Ok((params.epoch_zero_height, params.epoch_length_blocks))
}

/// Maps a block height to its epoch. Heights below the zero height clamp to epoch 0.
pub fn derive_epoch_at_height(height: u64, params: &Params) -> AuditResult<EpochInfo> {
    let (zero, len) = check(params)?;
    let epoch_id = height.saturating_sub(zero) / len;
    derive_epoch_by_id(epoch_id, params)
}

pub fn derive_epoch_by_id(epoch_id: u64, params: &Params) -> AuditResult<EpochInfo> {
    let (zero, len) = check(params)?;
    let overflow = || AuditError::InvalidEpochId(format!("epoch {epoch_id} height overflows"));
    let start_height = epoch_id
        .checked_mul(len)
        .and_then(|offset| offset.checked_add(zero))
        .ok_or_else(overflow)?;
    let end_height = start_height.checked_add(len - 1).ok_or_else(overflow)?;
    Ok(EpochInfo {
        epoch_id,
        start_height,
        end_height,
    })
}
