use serde::{Deserialize, Serialize};

use crate::error::{AuditError, AuditResult};

pub const DEFAULT_EPOCH_LENGTH_BLOCKS: u64 = 400;
/// Placeholder for genesis-based initialization; activation on a running chain sets
/// the zero height to the activation block instead.
pub const DEFAULT_EPOCH_ZERO_HEIGHT: u64 = 1;
pub const DEFAULT_PEER_QUORUM_REPORTS: u32 = 3;
pub const DEFAULT_MIN_PROBE_TARGETS_PER_EPOCH: u32 = 3;
pub const DEFAULT_MAX_PROBE_TARGETS_PER_EPOCH: u32 = 5;
pub const DEFAULT_REQUIRED_OPEN_PORTS: [u32; 3] = [4444, 4445, 8002];
pub const DEFAULT_CONSECUTIVE_EPOCHS_TO_POSTPONE: u32 = 1;
pub const DEFAULT_KEEP_LAST_EPOCH_ENTRIES: u64 = 200;
pub const DEFAULT_PEER_PORT_POSTPONE_THRESHOLD_PERCENT: u32 = 100;
pub const DEFAULT_ACTION_FINALIZATION_EVIDENCES_PER_EPOCH: u32 = 1;
pub const DEFAULT_ACTION_FINALIZATION_CONSECUTIVE_EPOCHS: u32 = 1;
pub const DEFAULT_ACTION_FINALIZATION_RECOVERY_EPOCHS: u32 = 1;
pub const DEFAULT_ACTION_FINALIZATION_RECOVERY_MAX_TOTAL_BAD_EVIDENCES: u32 = 1;
pub const DEFAULT_SC_ENABLED: bool = true;

/// Chain-wide audit parameters. Zero values mean "use the default" (see [`Params::with_defaults`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    pub epoch_length_blocks: u64,
    pub epoch_zero_height: u64,
    /// Legacy reporting window length. Changes take effect at the next window boundary.
    pub reporting_window_blocks: u64,
    pub peer_quorum_reports: u32,
    pub min_probe_targets_per_epoch: u32,
    pub max_probe_targets_per_epoch: u32,
    /// Ordered; the index of a port here is its position in every port-state array.
    pub required_open_ports: Vec<u32>,
    /// Minimum free capacity (100 - usage) required from self reports. 0 disables the check.
    pub min_cpu_free_percent: u32,
    pub min_mem_free_percent: u32,
    pub min_disk_free_percent: u32,
    pub consecutive_epochs_to_postpone: u32,
    pub keep_last_epoch_entries: u64,
    /// Share of peer reporters that must see a port CLOSED. 100 means unanimous.
    pub peer_port_postpone_threshold_percent: u32,

    pub action_finalization_signature_failure_evidences_per_epoch: u32,
    pub action_finalization_signature_failure_consecutive_epochs: u32,
    pub action_finalization_not_in_top_10_evidences_per_epoch: u32,
    pub action_finalization_not_in_top_10_consecutive_epochs: u32,
    pub action_finalization_recovery_epochs: u32,
    pub action_finalization_recovery_max_total_bad_evidences: u32,

    pub sc_enabled: bool,
    /// 0 means auto: ceil(active / 3), at least one.
    pub sc_challengers_per_epoch: u32,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            epoch_length_blocks: DEFAULT_EPOCH_LENGTH_BLOCKS,
            epoch_zero_height: DEFAULT_EPOCH_ZERO_HEIGHT,
            reporting_window_blocks: DEFAULT_EPOCH_LENGTH_BLOCKS,
            peer_quorum_reports: DEFAULT_PEER_QUORUM_REPORTS,
            min_probe_targets_per_epoch: DEFAULT_MIN_PROBE_TARGETS_PER_EPOCH,
            max_probe_targets_per_epoch: DEFAULT_MAX_PROBE_TARGETS_PER_EPOCH,
            required_open_ports: DEFAULT_REQUIRED_OPEN_PORTS.to_vec(),
            min_cpu_free_percent: 0,
            min_mem_free_percent: 0,
            min_disk_free_percent: 0,
            consecutive_epochs_to_postpone: DEFAULT_CONSECUTIVE_EPOCHS_TO_POSTPONE,
            keep_last_epoch_entries: DEFAULT_KEEP_LAST_EPOCH_ENTRIES,
            peer_port_postpone_threshold_percent: DEFAULT_PEER_PORT_POSTPONE_THRESHOLD_PERCENT,
            action_finalization_signature_failure_evidences_per_epoch:
                DEFAULT_ACTION_FINALIZATION_EVIDENCES_PER_EPOCH,
            action_finalization_signature_failure_consecutive_epochs:
                DEFAULT_ACTION_FINALIZATION_CONSECUTIVE_EPOCHS,
            action_finalization_not_in_top_10_evidences_per_epoch:
                DEFAULT_ACTION_FINALIZATION_EVIDENCES_PER_EPOCH,
            action_finalization_not_in_top_10_consecutive_epochs:
                DEFAULT_ACTION_FINALIZATION_CONSECUTIVE_EPOCHS,
            action_finalization_recovery_epochs: DEFAULT_ACTION_FINALIZATION_RECOVERY_EPOCHS,
            action_finalization_recovery_max_total_bad_evidences:
                DEFAULT_ACTION_FINALIZATION_RECOVERY_MAX_TOTAL_BAD_EVIDENCES,
            sc_enabled: DEFAULT_SC_ENABLED,
            sc_challengers_per_epoch: 0,
        }
    }
}

fn default_if_zero<T: PartialEq + Default>(value: &mut T, default: T) {
    if *value == T::default() {
        *value = default;
    }
}

impl Params {
    pub fn with_defaults(mut self) -> Self {
        default_if_zero(&mut self.epoch_length_blocks, DEFAULT_EPOCH_LENGTH_BLOCKS);
        default_if_zero(&mut self.epoch_zero_height, DEFAULT_EPOCH_ZERO_HEIGHT);
        let epoch_len = self.epoch_length_blocks;
        default_if_zero(&mut self.reporting_window_blocks, epoch_len);
        default_if_zero(&mut self.peer_quorum_reports, DEFAULT_PEER_QUORUM_REPORTS);
        default_if_zero(
            &mut self.min_probe_targets_per_epoch,
            DEFAULT_MIN_PROBE_TARGETS_PER_EPOCH,
        );
        default_if_zero(
            &mut self.max_probe_targets_per_epoch,
            DEFAULT_MAX_PROBE_TARGETS_PER_EPOCH,
        );
        if self.required_open_ports.is_empty() {
            self.required_open_ports = DEFAULT_REQUIRED_OPEN_PORTS.to_vec();
        }
        default_if_zero(
            &mut self.consecutive_epochs_to_postpone,
            DEFAULT_CONSECUTIVE_EPOCHS_TO_POSTPONE,
        );
        default_if_zero(
            &mut self.keep_last_epoch_entries,
            DEFAULT_KEEP_LAST_EPOCH_ENTRIES,
        );
        default_if_zero(
            &mut self.peer_port_postpone_threshold_percent,
            DEFAULT_PEER_PORT_POSTPONE_THRESHOLD_PERCENT,
        );
        default_if_zero(
            &mut self.action_finalization_signature_failure_evidences_per_epoch,
            DEFAULT_ACTION_FINALIZATION_EVIDENCES_PER_EPOCH,
        );
        default_if_zero(
            &mut self.action_finalization_signature_failure_consecutive_epochs,
            DEFAULT_ACTION_FINALIZATION_CONSECUTIVE_EPOCHS,
        );
        default_if_zero(
            &mut self.action_finalization_not_in_top_10_evidences_per_epoch,
            DEFAULT_ACTION_FINALIZATION_EVIDENCES_PER_EPOCH,
        );
        default_if_zero(
            &mut self.action_finalization_not_in_top_10_consecutive_epochs,
            DEFAULT_ACTION_FINALIZATION_CONSECUTIVE_EPOCHS,
        );
        default_if_zero(
            &mut self.action_finalization_recovery_epochs,
            DEFAULT_ACTION_FINALIZATION_RECOVERY_EPOCHS,
        );
        default_if_zero(
            &mut self.action_finalization_recovery_max_total_bad_evidences,
            DEFAULT_ACTION_FINALIZATION_RECOVERY_MAX_TOTAL_BAD_EVIDENCES,
        );
        self
    }

    pub fn required_history(&self) -> u64 {
        [
            self.consecutive_epochs_to_postpone,
            self.action_finalization_signature_failure_consecutive_epochs,
            self.action_finalization_not_in_top_10_consecutive_epochs,
            self.action_finalization_recovery_epochs,
        ]
        .into_iter()
        .map(u64::from)
        .max()
        .unwrap_or(0)
    }

    pub fn validate(&self) -> AuditResult<()> {
        let p = self.clone().with_defaults();
        let invalid = |msg: &str| Err(AuditError::InvalidParams(msg.to_string()));

        if p.epoch_length_blocks == 0 {
            return invalid("epoch_length_blocks must be > 0");
        }
        if p.epoch_zero_height == 0 {
            return invalid("epoch_zero_height must be > 0");
        }
        if p.epoch_length_blocks > i64::MAX as u64 || p.epoch_zero_height > i64::MAX as u64 {
            return invalid("epoch_length_blocks and epoch_zero_height must fit in i64");
        }
        if p.reporting_window_blocks == 0 {
            return invalid("reporting_window_blocks must be > 0");
        }
        if p.peer_quorum_reports == 0 {
            return invalid("peer_quorum_reports must be > 0");
        }
        if p.min_probe_targets_per_epoch > p.max_probe_targets_per_epoch {
            return invalid("min_probe_targets_per_epoch must be <= max_probe_targets_per_epoch");
        }
        if p.required_open_ports.is_empty() {
            return invalid("required_open_ports must not be empty");
        }
        for (name, value) in [
            ("min_cpu_free_percent", p.min_cpu_free_percent),
            ("min_mem_free_percent", p.min_mem_free_percent),
            ("min_disk_free_percent", p.min_disk_free_percent),
        ] {
            if value > 100 {
                return Err(AuditError::InvalidParams(format!("{name} must be <= 100")));
            }
        }
        if p.consecutive_epochs_to_postpone == 0 {
            return invalid("consecutive_epochs_to_postpone must be > 0");
        }
        if p.keep_last_epoch_entries == 0 {
            return invalid("keep_last_epoch_entries must be > 0");
        }
        let required = p.required_history();
        if p.keep_last_epoch_entries < required {
            return Err(AuditError::InvalidParams(format!(
                "keep_last_epoch_entries must be >= max epoch lookback windows (need >= {required})"
            )));
        }
        if p.peer_port_postpone_threshold_percent == 0
            || p.peer_port_postpone_threshold_percent > 100
        {
            return invalid("peer_port_postpone_threshold_percent must be within 1..100");
        }

        let mut ports = p.required_open_ports.clone();
        ports.sort_unstable();
        if ports.windows(2).any(|w| w[0] == w[1]) {
            return invalid("required_open_ports must be unique");
        }
        Ok(())
    }
}
