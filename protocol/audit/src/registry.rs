use serde::{Deserialize, Serialize};
use state::KvStore;

use crate::staleness;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SuperNodeState {
    Active,
    Postponed,
    Disabled,
    Stopped,
    Penalized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperNodeStateRecord {
    pub state: SuperNodeState,
    pub height: u64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperNode {
    pub validator_address: String,
    pub supernode_account: String,
    /// Lifecycle history, oldest first. The last record is the current state.
    pub states: Vec<SuperNodeStateRecord>,
}

impl SuperNode {
    pub fn current_state(&self) -> Option<SuperNodeState> {
        self.states.last().map(|r| r.state)
    }

    pub fn registered_at(&self) -> Option<u64> {
        self.states.first().map(|r| r.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryParams {
    pub metrics_update_interval_blocks: u64,
    pub metrics_grace_period_blocks: u64,
}

impl Default for RegistryParams {
    fn default() -> Self {
        Self {
            metrics_update_interval_blocks: 400,
            metrics_grace_period_blocks: 100,
        }
    }
}

/// Narrow view of the supernode module. Lifecycle transitions go through
/// [`set_supernode_postponed`](Self::set_supernode_postponed) and
/// [`recover_supernode_from_postponed`](Self::recover_supernode_from_postponed) only.
pub trait SupernodeRegistry: Send + Sync {
    /// Supernodes whose current state is one of `states`, ordered by validator address.
    /// An empty filter returns every supernode.
    fn get_all_supernodes(&self, states: &[SuperNodeState]) -> anyhow::Result<Vec<SuperNode>>;
    fn get_supernode_by_account(&self, account: &str) -> anyhow::Result<Option<SuperNode>>;
    fn set_supernode_postponed(
        &self,
        height: u64,
        validator_address: &str,
        reason: &str,
    ) -> anyhow::Result<()>;
    fn recover_supernode_from_postponed(
        &self,
        height: u64,
        validator_address: &str,
    ) -> anyhow::Result<()>;
    fn params(&self) -> anyhow::Result<RegistryParams>;
    fn metrics_state(&self, validator_address: &str) -> anyhow::Result<Option<u64>>;
}

const SUPERNODE_PREFIX: &[u8] = b"sn/";
const METRICS_PREFIX: &[u8] = b"snm/";
const PARAMS_KEY: &[u8] = b"snp";

#[derive(Clone)]
pub struct StoreRegistry<S: KvStore> {
    store: S,
}

impl<S: KvStore> StoreRegistry<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn supernode_key(validator_address: &str) -> Vec<u8> {
        [SUPERNODE_PREFIX, validator_address.as_bytes()].concat()
    }

    fn metrics_key(validator_address: &str) -> Vec<u8> {
        [METRICS_PREFIX, validator_address.as_bytes()].concat()
    }

    pub fn set_params(&self, params: RegistryParams) -> anyhow::Result<()> {
        self.store.set(PARAMS_KEY, &bincode::serialize(&params)?);
        Ok(())
    }

    pub fn put_supernode(&self, supernode: &SuperNode) -> anyhow::Result<()> {
        if supernode.validator_address.is_empty() {
            anyhow::bail!("supernode has empty validator address");
        }
        self.store.set(
            &Self::supernode_key(&supernode.validator_address),
            &bincode::serialize(supernode)?,
        );
        Ok(())
    }

    pub fn get_supernode(&self, validator_address: &str) -> anyhow::Result<Option<SuperNode>> {
        self.store
            .get(&Self::supernode_key(validator_address))
            .map(|bz| bincode::deserialize(&bz))
            .transpose()
            .map_err(Into::into)
    }

    fn transition(
        &self,
        validator_address: &str,
        height: u64,
        from: SuperNodeState,
        to: SuperNodeState,
        reason: &str,
    ) -> anyhow::Result<()> {
        let mut sn = self
            .get_supernode(validator_address)?
            .ok_or_else(|| anyhow::anyhow!("supernode {validator_address} not found"))?;
        if sn.current_state() != Some(from) {
            anyhow::bail!(
                "supernode {validator_address} is {:?}, expected {from:?}",
                sn.current_state()
            );
        }
        sn.states.push(SuperNodeStateRecord {
            state: to,
            height,
            reason: reason.to_string(),
        });
        self.put_supernode(&sn)
    }

    /// Stores a metrics report height. A supernode postponed for stale metrics
    /// recovers as soon as fresh metrics arrive.
    pub fn report_metrics(&self, height: u64, validator_address: &str) -> anyhow::Result<()> {
        let sn = self
            .get_supernode(validator_address)?
            .ok_or_else(|| anyhow::anyhow!("supernode {validator_address} not found"))?;
        self.store
            .set(&Self::metrics_key(validator_address), &height.to_be_bytes());

        let stale = sn.states.last().is_some_and(|r| {
            r.state == SuperNodeState::Postponed && staleness::is_staleness_reason(&r.reason)
        });
        if stale {
            self.recover_supernode_from_postponed(height, validator_address)?;
        }
        Ok(())
    }
}

impl<S: KvStore> SupernodeRegistry for StoreRegistry<S> {
    fn get_all_supernodes(&self, states: &[SuperNodeState]) -> anyhow::Result<Vec<SuperNode>> {
        let mut out = Vec::new();
        for (_, bz) in self.store.prefix(SUPERNODE_PREFIX) {
            let sn: SuperNode = bincode::deserialize(&bz)?;
            let keep = states.is_empty()
                || sn
                    .current_state()
                    .is_some_and(|state| states.contains(&state));
            if keep {
                out.push(sn);
            }
        }
        Ok(out)
    }

    fn get_supernode_by_account(&self, account: &str) -> anyhow::Result<Option<SuperNode>> {
        Ok(self
            .get_all_supernodes(&[])?
            .into_iter()
            .find(|sn| sn.supernode_account == account))
    }

    fn set_supernode_postponed(
        &self,
        height: u64,
        validator_address: &str,
        reason: &str,
    ) -> anyhow::Result<()> {
        self.transition(
            validator_address,
            height,
            SuperNodeState::Active,
            SuperNodeState::Postponed,
            reason,
        )
    }

    fn recover_supernode_from_postponed(
        &self,
        height: u64,
        validator_address: &str,
    ) -> anyhow::Result<()> {
        self.transition(
            validator_address,
            height,
            SuperNodeState::Postponed,
            SuperNodeState::Active,
            "",
        )
    }

    fn params(&self) -> anyhow::Result<RegistryParams> {
        match self.store.get(PARAMS_KEY) {
            Some(bz) => Ok(bincode::deserialize(&bz)?),
            None => Ok(RegistryParams::default()),
        }
    }

    fn metrics_state(&self, validator_address: &str) -> anyhow::Result<Option<u64>> {
        let Some(bz) = self.store.get(&Self::metrics_key(validator_address)) else {
            return Ok(None);
        };
        let raw: [u8; 8] = bz
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("invalid metrics state length: {}", bz.len()))?;
        Ok(Some(u64::from_be_bytes(raw)))
    }
}
