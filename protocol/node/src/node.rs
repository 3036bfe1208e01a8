use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use runtime::{apply_block, Block, BlockApplyResult, BlockHeader, ExecutionContext, Hash, Tx};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::{error, info, warn};

use crate::config::NodeConfig;

pub struct Chain {
    pub ctx: ExecutionContext,
    pub blocks: Vec<BlockApplyResult>,
}

impl Chain {
    pub fn height(&self) -> u64 {
        self.blocks.last().map(|b| b.height).unwrap_or(0)
    }

    pub fn head_hash(&self) -> Hash {
        self.blocks.last().map(|b| b.block_hash).unwrap_or([0u8; 32])
    }

    pub fn block(&self, height: u64) -> Option<&BlockApplyResult> {
        let idx = usize::try_from(height.checked_sub(1)?).ok()?;
        self.blocks.get(idx)
    }
}

#[derive(Clone)]
pub struct Node {
    pub chain: Arc<RwLock<Chain>>,
    pub mempool: Arc<Mutex<Vec<(Hash, Tx)>>>,
    pub config: Arc<NodeConfig>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("invalid chain id: expected {expected}, got {got}")]
    ChainId { expected: String, got: String },
    #[error("tx already pending")]
    Duplicate,
    #[error("mempool full")]
    Full,
    #[error("tx encoding failed: {0}")]
    Encoding(String),
}

pub fn tx_hash(tx: &Tx) -> bincode::Result<Hash> {
    let bytes = bincode::serialize(tx)?;
    Ok(*blake3::hash(&bytes).as_bytes())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl Node {
    pub fn new(ctx: ExecutionContext, config: NodeConfig) -> Self {
        Self {
            chain: Arc::new(RwLock::new(Chain {
                ctx,
                blocks: Vec::new(),
            })),
            mempool: Arc::new(Mutex::new(Vec::new())),
            config: Arc::new(config),
        }
    }

    /// Admits a tx into the mempool. Execution-level checks run at block time.
    pub async fn enqueue_tx(&self, tx: Tx) -> Result<Hash, EnqueueError> {
        {
            let chain = self.chain.read().await;
            if tx.chain_id != chain.ctx.chain_id {
                return Err(EnqueueError::ChainId {
                    expected: chain.ctx.chain_id.clone(),
                    got: tx.chain_id,
                });
            }
        }
        let hash = tx_hash(&tx).map_err(|err| EnqueueError::Encoding(err.to_string()))?;
        let mut mempool = self.mempool.lock().await;
        if mempool.iter().any(|(existing, _)| *existing == hash) {
            return Err(EnqueueError::Duplicate);
        }
        if mempool.len() >= self.config.mempool_limit {
            warn!("mempool full, dropping tx");
            return Err(EnqueueError::Full);
        }
        mempool.push((hash, tx));
        Ok(hash)
    }

    /// Drains the mempool into the next block and executes it. A failed block
    /// is rolled back so the committed state stays at the previous height.
    pub async fn produce_block(&self) -> anyhow::Result<BlockApplyResult> {
        let transactions = {
            let mut mempool = self.mempool.lock().await;
            let take = mempool.len().min(self.config.max_txs_per_block);
            mempool.drain(..take).map(|(_, tx)| tx).collect::<Vec<_>>()
        };

        let mut chain = self.chain.write().await;
        let block = Block {
            header: BlockHeader {
                parent_hash: chain.head_hash(),
                height: chain.height() + 1,
                timestamp: now_millis(),
            },
            transactions,
        };

        let checkpoint = chain.ctx.store.checkpoint();
        match apply_block(&chain.ctx, &block) {
            Ok(result) => {
                chain.ctx.store.release(checkpoint);
                let rejected = result.tx_results.iter().filter(|r| !r.is_ok()).count();
                info!(
                    height = result.height,
                    txs = result.tx_results.len(),
                    rejected,
                    state_root = %hex::encode(result.state_root),
                    "committed block"
                );
                chain.blocks.push(result.clone());
                Ok(result)
            }
            Err(err) => {
                chain.ctx.store.revert(checkpoint);
                Err(err.context(format!("block {} aborted", block.header.height)))
            }
        }
    }
}

/// Produces one block per tick. An aborted block means an invariant was
/// violated, so production stops instead of building on top of it.
pub fn spawn_block_production(node: Node) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_millis(node.config.block_time_ms));
        loop {
            interval.tick().await;
            if let Err(err) = node.produce_block().await {
                error!("halting block production: {err:#}");
                return;
            }
        }
    })
}
