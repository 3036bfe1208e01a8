use anyhow::Context;
use audit::{
    AddressCodec, AuditError, AuditMsg, GenesisState, Keeper, MsgResponse, RegistryParams,
    StoreRegistry, SuperNode, SuperNodeState, SuperNodeStateRecord, SupernodeRegistry,
};
use serde::{Deserialize, Serialize};
use state::InMemoryStateStore;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub use audit::BlockContext;

pub type Hash = [u8; 32];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxPayload {
    Audit { msg: AuditMsg },
    ReportMetrics { validator_address: String },
}

/// A transaction whose `signer` was authenticated before it reached the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tx {
    pub chain_id: String,
    pub signer: String,
    pub payload: TxPayload,
}

impl Tx {
    pub fn audit(chain_id: impl Into<String>, msg: AuditMsg) -> Self {
        Self {
            chain_id: chain_id.into(),
            signer: msg.signer().to_string(),
            payload: TxPayload::Audit { msg },
        }
    }

    pub fn name(&self) -> &'static str {
        match &self.payload {
            TxPayload::Audit { msg } => msg.name(),
            TxPayload::ReportMetrics { .. } => "report_metrics",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub parent_hash: Hash,
    pub height: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Tx>,
}

#[derive(Debug, Error)]
pub enum TxError {
    #[error("invalid chain id: expected {expected}, got {got}")]
    ChainId { expected: String, got: String },
    #[error("tx signer {signer:?} does not match message signer {expected:?}")]
    SignerMismatch { signer: String, expected: String },
    #[error("unknown supernode {0}")]
    UnknownSupernode(String),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error(transparent)]
    Registry(#[from] anyhow::Error),
}

impl TxError {
    /// Errors that must abort the whole block instead of reverting one tx.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TxError::Audit(err) if err.is_invariant_violation())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxOutcome {
    Audit(MsgResponse),
    MetricsReported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    pub name: String,
    pub signer: String,
    pub outcome: Option<TxOutcome>,
    pub error: Option<String>,
}

impl TxResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockApplyResult {
    pub height: u64,
    pub block_hash: Hash,
    pub state_root: Hash,
    pub tx_results: Vec<TxResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisSupernode {
    pub validator_address: String,
    pub supernode_account: String,
    #[serde(default = "active")]
    pub state: SuperNodeState,
    #[serde(default = "first_height")]
    pub registered_height: u64,
}

fn active() -> SuperNodeState {
    SuperNodeState::Active
}

fn first_height() -> u64 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub chain_id: String,
    pub hrp: String,
    /// Governance account allowed to update audit params.
    pub authority: String,
    #[serde(default)]
    pub registry: RegistryParams,
    #[serde(default)]
    pub supernodes: Vec<GenesisSupernode>,
    #[serde(default)]
    pub audit: GenesisState,
}

impl GenesisConfig {
    /// Single-operator devnet: no supernodes, default params, authority derived
    /// from a fixed payload.
    pub fn devnet() -> anyhow::Result<Self> {
        let codec = AddressCodec::new("lumera");
        Ok(Self {
            chain_id: "lumera-devnet".into(),
            authority: codec.account_address(&[0u8; 20])?,
            hrp: codec.hrp().to_string(),
            registry: RegistryParams::default(),
            supernodes: Vec::new(),
            audit: GenesisState::default(),
        })
    }
}

pub struct ExecutionContext {
    pub store: InMemoryStateStore,
    pub registry: Arc<StoreRegistry<InMemoryStateStore>>,
    pub keeper: Keeper<InMemoryStateStore>,
    pub chain_id: String,
}

impl ExecutionContext {
    pub fn new(
        store: InMemoryStateStore,
        codec: AddressCodec,
        chain_id: String,
        authority: String,
    ) -> Self {
        let registry = Arc::new(StoreRegistry::new(store.clone()));
        let keeper = Keeper::new(store.clone(), codec, registry.clone(), authority);
        Self {
            store,
            registry,
            keeper,
            chain_id,
        }
    }

    pub fn state_root(&self) -> Hash {
        self.store.commit()
    }

    pub fn export_genesis(&self) -> anyhow::Result<GenesisConfig> {
        let supernodes = self
            .registry
            .get_all_supernodes(&[])?
            .into_iter()
            .filter_map(|sn| {
                Some(GenesisSupernode {
                    state: sn.current_state()?,
                    registered_height: sn.registered_at()?,
                    validator_address: sn.validator_address,
                    supernode_account: sn.supernode_account,
                })
            })
            .collect();
        Ok(GenesisConfig {
            chain_id: self.chain_id.clone(),
            hrp: self.keeper.codec().hrp().to_string(),
            authority: self.keeper.authority().to_string(),
            registry: self.registry.params()?,
            supernodes,
            audit: self.keeper.export_genesis()?,
        })
    }
}

pub fn from_genesis(genesis: GenesisConfig) -> anyhow::Result<ExecutionContext> {
    let codec = AddressCodec::new(genesis.hrp.clone());
    codec
        .parse_account(&genesis.authority)
        .map_err(|e| e.context("invalid genesis authority"))?;

    let ctx = ExecutionContext::new(
        InMemoryStateStore::new(),
        codec.clone(),
        genesis.chain_id,
        genesis.authority,
    );
    ctx.registry.set_params(genesis.registry)?;
    for sn in genesis.supernodes {
        codec
            .parse_validator(&sn.validator_address)
            .map_err(|e| e.context(format!("genesis supernode {}", sn.validator_address)))?;
        codec
            .parse_account(&sn.supernode_account)
            .map_err(|e| e.context(format!("genesis supernode {}", sn.supernode_account)))?;
        ctx.registry.put_supernode(&SuperNode {
            validator_address: sn.validator_address,
            supernode_account: sn.supernode_account,
            states: vec![SuperNodeStateRecord {
                state: sn.state,
                height: sn.registered_height,
                reason: String::new(),
            }],
        })?;
    }
    ctx.keeper.init_genesis(&genesis.audit)?;
    Ok(ctx)
}

pub fn load_genesis_from_file(path: impl AsRef<Path>) -> anyhow::Result<ExecutionContext> {
    let contents = fs::read_to_string(path)?;
    let genesis: GenesisConfig = serde_json::from_str(&contents)?;
    from_genesis(genesis)
}

pub fn hash_header(header: &BlockHeader) -> anyhow::Result<Hash> {
    let bytes = bincode::serialize(header).context("encode block header")?;
    Ok(*blake3::hash(&bytes).as_bytes())
}

pub fn apply_tx(
    ctx: &ExecutionContext,
    block: &BlockContext,
    tx: &Tx,
) -> Result<TxOutcome, TxError> {
    if tx.chain_id != ctx.chain_id {
        return Err(TxError::ChainId {
            expected: ctx.chain_id.clone(),
            got: tx.chain_id.clone(),
        });
    }

    match &tx.payload {
        TxPayload::Audit { msg } => {
            if msg.signer() != tx.signer {
                return Err(TxError::SignerMismatch {
                    signer: tx.signer.clone(),
                    expected: msg.signer().to_string(),
                });
            }
            let response = ctx.keeper.deliver(block, msg.clone())?;
            Ok(TxOutcome::Audit(response))
        }
        TxPayload::ReportMetrics { validator_address } => {
            let sn = ctx
                .registry
                .get_supernode(validator_address)?
                .ok_or_else(|| TxError::UnknownSupernode(validator_address.clone()))?;
            if sn.supernode_account != tx.signer {
                return Err(TxError::SignerMismatch {
                    signer: tx.signer.clone(),
                    expected: sn.supernode_account,
                });
            }
            ctx.registry.report_metrics(block.height, validator_address)?;
            Ok(TxOutcome::MetricsReported)
        }
    }
}

/// BeginBlock, every tx against its own checkpoint, EndBlock, commit. A
/// rejected tx is reverted and recorded; an invariant violation aborts the block.
pub fn apply_block(ctx: &ExecutionContext, block: &Block) -> anyhow::Result<BlockApplyResult> {
    let block_hash = hash_header(&block.header)?;
    let bctx = BlockContext::new(block.header.height, block_hash.to_vec());

    ctx.keeper.begin_block(&bctx)?;

    let mut tx_results = Vec::with_capacity(block.transactions.len());
    for tx in &block.transactions {
        let checkpoint = ctx.store.checkpoint();
        let (outcome, error) = match apply_tx(ctx, &bctx, tx) {
            Ok(outcome) => {
                ctx.store.release(checkpoint);
                (Some(outcome), None)
            }
            Err(err) if err.is_fatal() => {
                ctx.store.release(checkpoint);
                return Err(err.into());
            }
            Err(err) => {
                ctx.store.revert(checkpoint);
                warn!(height = bctx.height, tx = tx.name(), signer = %tx.signer, %err, "tx rejected");
                (None, Some(err.to_string()))
            }
        };
        tx_results.push(TxResult {
            name: tx.name().to_string(),
            signer: tx.signer.clone(),
            outcome,
            error,
        });
    }

    ctx.keeper.end_block(&bctx)?;
    let state_root = ctx.store.commit();
    debug!(
        height = bctx.height,
        txs = tx_results.len(),
        state_root = %hex::encode(state_root),
        "applied block"
    );
    Ok(BlockApplyResult {
        height: bctx.height,
        block_hash,
        state_root,
        tx_results,
    })
}
