use serde::{Deserialize, Serialize};
use state::KvStore;
use tracing::{debug, info};

use crate::error::{AuditError, AuditResult};
use crate::keeper::{BlockContext, Keeper};
use crate::keys;
use crate::params::Params;

const WINDOW_STATE_LEN: usize = 32;

/// Legacy reporting window. Unlike epochs, its length can change at runtime,
/// so the current window is persisted instead of derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowState {
    pub window_id: u64,
    pub start_height: u64,
    pub end_height: u64,
    pub window_blocks: u64,
}

impl WindowState {
    pub fn starting_at(window_id: u64, start_height: u64, window_blocks: u64) -> AuditResult<Self> {
        let end_height = start_height
            .checked_add(window_blocks.saturating_sub(1))
            .ok_or_else(|| AuditError::CorruptState("window end height overflows".into()))?;
        let ws = Self {
            window_id,
            start_height,
            end_height,
            window_blocks,
        };
        ws.validate()?;
        Ok(ws)
    }

    pub fn validate(&self) -> AuditResult<()> {
        if self.window_blocks == 0 {
            return Err(AuditError::CorruptState("window_blocks must be > 0".into()));
        }
        if self.end_height < self.start_height {
            return Err(AuditError::CorruptState(
                "window_end_height must be >= window_start_height".into(),
            ));
        }
        if self.end_height - self.start_height + 1 != self.window_blocks {
            return Err(AuditError::CorruptState(format!(
                "window length mismatch: blocks={} start={} end={}",
                self.window_blocks, self.start_height, self.end_height
            )));
        }
        Ok(())
    }

    fn encode(&self) -> [u8; WINDOW_STATE_LEN] {
        let mut out = [0u8; WINDOW_STATE_LEN];
        out[0..8].copy_from_slice(&self.window_id.to_be_bytes());
        out[8..16].copy_from_slice(&self.start_height.to_be_bytes());
        out[16..24].copy_from_slice(&self.end_height.to_be_bytes());
        out[24..32].copy_from_slice(&self.window_blocks.to_be_bytes());
        out
    }

    fn decode(bz: &[u8]) -> AuditResult<Self> {
        if bz.len() != WINDOW_STATE_LEN {
            return Err(AuditError::CorruptState(format!(
                "invalid current window state length: {}",
                bz.len()
            )));
        }
        let field = |i: usize| keys::decode_id(&bz[i * 8..(i + 1) * 8]).unwrap_or_default();
        let ws = Self {
            window_id: field(0),
            start_height: field(1),
            end_height: field(2),
            window_blocks: field(3),
        };
        ws.validate()?;
        Ok(ws)
    }
}

impl<S: KvStore> Keeper<S> {
    pub fn window_state(&self) -> AuditResult<Option<WindowState>> {
        self.store()
            .get(keys::WINDOW_STATE_KEY)
            .map(|bz| WindowState::decode(&bz))
            .transpose()
    }

    fn set_window_state(&self, ws: &WindowState) -> AuditResult<()> {
        ws.validate()?;
        self.store().set(keys::WINDOW_STATE_KEY, &ws.encode());
        Ok(())
    }

    pub fn pending_window_blocks(&self) -> AuditResult<Option<u64>> {
        match self.read_u64(keys::NEXT_WINDOW_BLOCKS_KEY)? {
            Some(0) => Err(AuditError::CorruptState("invalid next window blocks: 0".into())),
            other => Ok(other),
        }
    }

    /// Returns the window containing `ctx.height`, creating the first one at the
    /// current height and stepping across every boundary crossed since.
    pub fn current_window_state(
        &self,
        ctx: &BlockContext,
        params: &Params,
    ) -> AuditResult<WindowState> {
        let ws = match self.window_state()? {
            Some(ws) => ws,
            None => {
                let ws = WindowState::starting_at(0, ctx.height, params.reporting_window_blocks)?;
                self.set_window_state(&ws)?;
                info!(
                    start = ws.start_height,
                    blocks = ws.window_blocks,
                    "initialised reporting window"
                );
                ws
            }
        };
        self.advance_window(ctx, params, ws)
    }

    fn advance_window(
        &self,
        ctx: &BlockContext,
        params: &Params,
        mut ws: WindowState,
    ) -> AuditResult<WindowState> {
        while ctx.height > ws.end_height {
            let mut blocks = ws.window_blocks;
            if let Some(next) = self.pending_window_blocks()? {
                self.store().delete(keys::NEXT_WINDOW_BLOCKS_KEY);
                blocks = next;
            }
            if blocks == 0 {
                blocks = params.reporting_window_blocks;
            }
            let start = ws.end_height + 1;
            ws = WindowState::starting_at(ws.window_id + 1, start, blocks)?;
            self.set_window_state(&ws)?;
            debug!(
                window_id = ws.window_id,
                start = ws.start_height,
                end = ws.end_height,
                "advanced reporting window"
            );
        }
        Ok(ws)
    }

    /// Last write before the boundary wins. Scheduling the length already in
    /// effect cancels any pending change.
    pub fn schedule_window_resize(
        &self,
        ctx: &BlockContext,
        params: &Params,
        new_window_blocks: u64,
    ) -> AuditResult<()> {
        if new_window_blocks == 0 {
            return Err(AuditError::InvalidParams(
                "reporting_window_blocks must be > 0".into(),
            ));
        }
        let ws = self.current_window_state(ctx, params)?;
        if ws.window_blocks == new_window_blocks {
            self.store().delete(keys::NEXT_WINDOW_BLOCKS_KEY);
            return Ok(());
        }
        self.write_u64(keys::NEXT_WINDOW_BLOCKS_KEY, new_window_blocks);
        info!(
            window_id = ws.window_id,
            new_window_blocks,
            effective_height = ws.end_height + 1,
            "scheduled reporting window resize"
        );
        Ok(())
    }
}
