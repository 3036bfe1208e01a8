use state::KvStore;
use tracing::info;

use crate::error::AuditResult;
use crate::keeper::Keeper;
use crate::types::GenesisState;

impl<S: KvStore> Keeper<S> {
    pub fn init_genesis(&self, genesis: &GenesisState) -> AuditResult<()> {
        self.set_params(&genesis.params)?;

        let mut max_id = 0;
        for ev in &genesis.evidence {
            self.put_evidence(ev)?;
            max_id = max_id.max(ev.evidence_id);
        }
        let next_id = match genesis.next_evidence_id {
            0 if !genesis.evidence.is_empty() => max_id + 1,
            id => id,
        };
        // An empty store already yields 1.
        if next_id > 1 || !genesis.evidence.is_empty() {
            self.set_next_evidence_id(next_id);
        }
        info!(
            evidence = genesis.evidence.len(),
            next_evidence_id = self.next_evidence_id(),
            "initialised audit genesis"
        );
        Ok(())
    }

    pub fn export_genesis(&self) -> AuditResult<GenesisState> {
        Ok(GenesisState {
            params: self.get_params()?,
            evidence: self.all_evidence()?,
            next_evidence_id: self.next_evidence_id(),
        })
    }
}
