#![allow(dead_code)]

use std::sync::Arc;

use audit::types::{HostReport, PortState, StorageChallengeObservation};
use audit::{
    AddressCodec, BlockContext, Keeper, MsgSubmitEpochReport, Params, StoreRegistry, SuperNode,
    SuperNodeState, SuperNodeStateRecord, SupernodeRegistry,
};
use state::InMemoryStateStore;

pub const HRP: &str = "lumera";

pub struct Fixture {
    pub store: InMemoryStateStore,
    pub registry: Arc<StoreRegistry<InMemoryStateStore>>,
    pub keeper: Keeper<InMemoryStateStore>,
    pub codec: AddressCodec,
}

/// Epochs of 10 blocks starting at height 1, so epoch `e` spans `[10e+1, 10e+10]`.
pub fn short_epoch_params() -> Params {
    Params {
        epoch_length_blocks: 10,
        epoch_zero_height: 1,
        ..Params::default()
    }
}

pub fn header_hash(height: u64) -> Vec<u8> {
    blake3::hash(&height.to_be_bytes()).as_bytes().to_vec()
}

pub fn ctx(height: u64) -> BlockContext {
    BlockContext::new(height, header_hash(height))
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_params(short_epoch_params())
    }

    pub fn with_params(params: Params) -> Self {
        let store = InMemoryStateStore::new();
        let registry = Arc::new(StoreRegistry::new(store.clone()));
        let codec = AddressCodec::new(HRP);
        let authority = codec.account_address(&[0xaa; 20]).unwrap();
        let keeper = Keeper::new(store.clone(), codec.clone(), registry.clone(), authority);
        keeper.set_params(&params).unwrap();
        Self {
            store,
            registry,
            keeper,
            codec,
        }
    }

    pub fn account(&self, tag: u8) -> String {
        self.codec.account_address(&[tag; 20]).unwrap()
    }

    pub fn validator(&self, tag: u8) -> String {
        self.codec.validator_address(&[tag; 20]).unwrap()
    }

    pub fn authority(&self) -> String {
        self.keeper.authority().to_string()
    }

    /// Registers a supernode at height 1 and returns its account.
    pub fn add_supernode(&self, tag: u8, state: SuperNodeState) -> String {
        let account = self.account(tag);
        self.registry
            .put_supernode(&SuperNode {
                validator_address: self.validator(tag),
                supernode_account: account.clone(),
                states: vec![SuperNodeStateRecord {
                    state,
                    height: 1,
                    reason: String::new(),
                }],
            })
            .unwrap();
        account
    }

    pub fn state_of(&self, tag: u8) -> (SuperNodeState, String) {
        let sn = self
            .registry
            .get_supernode_by_account(&self.account(tag))
            .unwrap()
            .unwrap();
        let last = sn.states.last().unwrap().clone();
        (last.state, last.reason)
    }

    pub fn begin(&self, height: u64) -> BlockContext {
        let ctx = ctx(height);
        self.keeper.begin_block(&ctx).unwrap();
        ctx
    }

    pub fn end(&self, height: u64) {
        self.keeper.end_block(&ctx(height)).unwrap();
    }

    /// Runs empty blocks `from..=to`.
    pub fn run_blocks(&self, from: u64, to: u64) {
        for h in from..=to {
            self.begin(h);
            self.end(h);
        }
    }

    /// Runs all ten blocks of `epoch_id`; every tag in `reporters` files a full
    /// report at the epoch's second block.
    pub fn run_epoch(
        &self,
        epoch_id: u64,
        reporters: &[u8],
        host: impl Fn(u8) -> HostReport,
        ports: impl Fn(u8, &str) -> Vec<PortState>,
    ) {
        let start = epoch_id * 10 + 1;
        for h in start..start + 10 {
            self.begin(h);
            if h == start + 1 {
                for &tag in reporters {
                    let msg = self.full_report(h, &self.account(tag), host(tag), |t| ports(tag, t));
                    self.keeper.submit_epoch_report(&ctx(h), msg).unwrap();
                }
            }
            self.end(h);
        }
    }

    pub fn assigned(&self, height: u64, prober: &str) -> (Vec<String>, bool) {
        let got = self
            .keeper
            .query_assigned_targets(height, prober, None)
            .unwrap();
        (got.target_supernode_accounts, got.is_prober)
    }

    /// A report covering exactly the assigned targets, with port states chosen per target.
    pub fn full_report(
        &self,
        height: u64,
        reporter: &str,
        host: HostReport,
        ports_for: impl Fn(&str) -> Vec<PortState>,
    ) -> MsgSubmitEpochReport {
        let epoch = self.keeper.query_current_epoch(height).unwrap();
        let (targets, _) = self.assigned(height, reporter);
        MsgSubmitEpochReport {
            creator: reporter.to_string(),
            epoch_id: epoch.epoch_id,
            host_report: host,
            storage_challenge_observations: targets
                .iter()
                .map(|t| StorageChallengeObservation {
                    target_supernode_account: t.clone(),
                    port_states: ports_for(t),
                })
                .collect(),
        }
    }

    pub fn host_only(&self, height: u64, reporter: &str) -> MsgSubmitEpochReport {
        let epoch = self.keeper.query_current_epoch(height).unwrap();
        MsgSubmitEpochReport {
            creator: reporter.to_string(),
            epoch_id: epoch.epoch_id,
            host_report: HostReport::default(),
            storage_challenge_observations: Vec::new(),
        }
    }
}

pub fn all_open(n: usize) -> Vec<PortState> {
    vec![PortState::Open; n]
}
