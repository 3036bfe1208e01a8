use state::KvStore;
use tracing::debug;

use crate::epoch::derive_epoch_at_height;
use crate::error::AuditResult;
use crate::keeper::{BlockContext, Keeper};

impl<S: KvStore> Keeper<S> {
    /// Advances the reporting window and, at an epoch's start height, freezes
    /// its anchor and params. Safe to call every block.
    pub fn begin_block(&self, ctx: &BlockContext) -> AuditResult<()> {
        let params = self.get_params()?;
        self.current_window_state(ctx, &params)?;

        let epoch = derive_epoch_at_height(ctx.height, &params)?;
        if ctx.height != epoch.start_height {
            return Ok(());
        }
        self.create_epoch_anchor_if_needed(ctx, &epoch, &params)?;
        self.create_epoch_params_snapshot_if_needed(epoch.epoch_id, &params)
    }

    pub fn end_block(&self, ctx: &BlockContext) -> AuditResult<()> {
        self.handle_metrics_staleness(ctx)?;

        let params = self.get_params()?;
        let epoch = derive_epoch_at_height(ctx.height, &params)?;
        if ctx.height != epoch.end_height {
            return Ok(());
        }
        if !self.has_epoch_anchor(epoch.epoch_id) {
            // Chain activated mid-epoch: nothing was frozen for this epoch.
            debug!(epoch_id = epoch.epoch_id, "skipping enforcement without anchor");
        } else {
            let epoch_params = self.params_for_epoch(epoch.epoch_id)?;
            self.enforce_epoch_end(ctx, epoch.epoch_id, &epoch_params)?;
        }

        self.prune_old_epochs(epoch.epoch_id, &params)?;
        if let Some(window) = self.window_state()? {
            self.prune_old_windows(window.window_id, &params)?;
        }
        Ok(())
    }
}
