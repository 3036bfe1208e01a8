use state::KvStore;
use tracing::{error, info};

use crate::error::AuditResult;
use crate::keeper::{BlockContext, Keeper};
use crate::registry::SuperNodeState;

pub const REASON_NO_METRICS: &str = "no metrics reported";
pub const REASON_METRICS_OVERDUE: &str = "metrics overdue";

pub fn is_staleness_reason(reason: &str) -> bool {
    reason == REASON_NO_METRICS || reason == REASON_METRICS_OVERDUE
}

impl<S: KvStore> Keeper<S> {
    /// Postpones ACTIVE supernodes whose metrics are older than
    /// `interval + grace` blocks.
    pub fn handle_metrics_staleness(&self, ctx: &BlockContext) -> AuditResult<()> {
        let params = self.registry().params()?;
        let threshold = params
            .metrics_update_interval_blocks
            .saturating_add(params.metrics_grace_period_blocks);

        for sn in self.registry().get_all_supernodes(&[])? {
            if sn.current_state() != Some(SuperNodeState::Active) {
                continue;
            }
            if self.codec().parse_validator(&sn.validator_address).is_err() {
                continue;
            }

            let last = match self.registry().metrics_state(&sn.validator_address) {
                Ok(last) => last.unwrap_or(0),
                Err(err) => {
                    error!(validator = %sn.validator_address, %err, "failed to read metrics state");
                    continue;
                }
            };

            let (baseline, reason) = if last == 0 {
                match sn.registered_at() {
                    Some(h) if h > 0 => (h, REASON_NO_METRICS),
                    _ => continue,
                }
            } else {
                (last, REASON_METRICS_OVERDUE)
            };
            if ctx.height.saturating_sub(baseline) <= threshold {
                continue;
            }

            match self
                .registry()
                .set_supernode_postponed(ctx.height, &sn.validator_address, reason)
            {
                Ok(()) => info!(validator = %sn.validator_address, reason, "postponed stale supernode"),
                Err(err) => error!(
                    validator = %sn.validator_address,
                    %err,
                    "failed to mark supernode postponed for stale metrics"
                ),
            }
        }
        Ok(())
    }
}
