use serde::{Deserialize, Serialize};
use state::{prefix_end_bytes, KvStore};

use crate::assignment::{ring_walk, xor_distance};
use crate::epoch::{derive_epoch_at_height, derive_epoch_by_id, EpochInfo};
use crate::error::{QueryError, QueryResult};
use crate::keeper::Keeper;
use crate::keys;
use crate::params::Params;
use crate::types::{AuditStatus, EpochAnchor, EpochReport, Evidence, HostReport, PortState};

pub const DEFAULT_PAGE_LIMIT: u64 = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageRequest {
    /// Hex-encoded continuation key from a previous [`PageResponse`]. Takes
    /// precedence over `offset`.
    pub key: Option<String>,
    pub offset: u64,
    /// 0 means [`DEFAULT_PAGE_LIMIT`].
    pub limit: u64,
    pub count_total: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageResponse {
    pub next_key: Option<String>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: PageResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfReportEntry {
    pub epoch_id: u64,
    pub report_height: u64,
    pub host_report: HostReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetReportEntry {
    pub epoch_id: u64,
    pub reporter_supernode_account: String,
    pub port_states: Vec<PortState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedTargets {
    pub epoch_id: u64,
    pub epoch_start_height: u64,
    pub prober_supernode_account: String,
    pub is_prober: bool,
    pub target_supernode_accounts: Vec<String>,
    pub required_open_ports: Vec<u32>,
}

fn require_arg(name: &str, value: &str) -> QueryResult<()> {
    if value.trim().is_empty() {
        return Err(QueryError::InvalidArgument(format!("{name} is required")));
    }
    Ok(())
}

// Reads one page of `prefix` starting at the continuation key (or offset),
// fetching a single entry past `limit` to produce `next_key`.
fn paginate<S: KvStore>(
    store: &S,
    prefix: &[u8],
    page: &PageRequest,
) -> QueryResult<(Vec<(Vec<u8>, Vec<u8>)>, PageResponse)> {
    let limit = if page.limit == 0 {
        DEFAULT_PAGE_LIMIT
    } else {
        page.limit
    };
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    let end = prefix_end_bytes(prefix);

    let (start, skip) = match &page.key {
        Some(key) => {
            let suffix = hex::decode(key)
                .map_err(|e| QueryError::InvalidArgument(format!("invalid page key: {e}")))?;
            ([prefix, &suffix[..]].concat(), 0)
        }
        None => (
            prefix.to_vec(),
            usize::try_from(page.offset).unwrap_or(usize::MAX),
        ),
    };
    let mut items = store.range_page(&start, end.as_deref(), skip, limit.saturating_add(1));
    let next_key = if items.len() > limit {
        items
            .pop()
            .map(|(k, _)| hex::encode(&k[prefix.len()..]))
    } else {
        None
    };
    let total = if page.count_total {
        store.count_range(prefix, end.as_deref()) as u64
    } else {
        0
    };
    Ok((items, PageResponse { next_key, total }))
}

impl<S: KvStore> Keeper<S> {
    pub fn query_params(&self) -> QueryResult<Params> {
        Ok(self.get_params()?)
    }

    pub fn query_current_epoch(&self, height: u64) -> QueryResult<EpochInfo> {
        Ok(derive_epoch_at_height(height, &self.get_params()?)?)
    }

    pub fn query_epoch_by_id(&self, epoch_id: u64) -> QueryResult<EpochInfo> {
        derive_epoch_by_id(epoch_id, &self.get_params()?)
            .map_err(|e| QueryError::InvalidArgument(e.to_string()))
    }

    pub fn query_epoch_anchor(&self, epoch_id: u64) -> QueryResult<EpochAnchor> {
        self.get_epoch_anchor(epoch_id)?
            .ok_or_else(|| QueryError::NotFound(format!("epoch anchor {epoch_id}")))
    }

    pub fn query_current_epoch_anchor(&self, height: u64) -> QueryResult<EpochAnchor> {
        let epoch = self.query_current_epoch(height)?;
        self.query_epoch_anchor(epoch.epoch_id)
    }

    pub fn query_epoch_report(&self, epoch_id: u64, reporter: &str) -> QueryResult<EpochReport> {
        require_arg("supernode_account", reporter)?;
        self.get_report(epoch_id, reporter)?.ok_or_else(|| {
            QueryError::NotFound(format!("report for {reporter} in epoch {epoch_id}"))
        })
    }

    fn report_from_index(&self, key: &[u8]) -> QueryResult<EpochReport> {
        let (reporter, epoch_id) = keys::decode_reporter_index_key(key)
            .ok_or_else(|| QueryError::Internal("malformed report index key".into()))?;
        self.get_report(epoch_id, &reporter)?.ok_or_else(|| {
            QueryError::Internal(format!("dangling report index for {reporter}/{epoch_id}"))
        })
    }

    pub fn query_reports_by_reporter(
        &self,
        reporter: &str,
        page: &PageRequest,
    ) -> QueryResult<Page<EpochReport>> {
        require_arg("supernode_account", reporter)?;
        let (entries, pagination) =
            paginate(self.store(), &keys::report_index_prefix(reporter), page)?;
        let items = entries
            .iter()
            .map(|(key, _)| self.report_from_index(key))
            .collect::<QueryResult<_>>()?;
        Ok(Page { items, pagination })
    }

    pub fn query_self_reports(
        &self,
        reporter: &str,
        page: &PageRequest,
    ) -> QueryResult<Page<SelfReportEntry>> {
        require_arg("supernode_account", reporter)?;
        let (entries, pagination) =
            paginate(self.store(), &keys::self_report_index_prefix(reporter), page)?;
        let mut items = Vec::with_capacity(entries.len());
        for (key, _) in &entries {
            let report = self.report_from_index(key)?;
            items.push(SelfReportEntry {
                epoch_id: report.epoch_id,
                report_height: report.report_height,
                host_report: report.host_report,
            });
        }
        Ok(Page { items, pagination })
    }

    pub fn query_reports_by_target(
        &self,
        target: &str,
        epoch_id: Option<u64>,
        page: &PageRequest,
    ) -> QueryResult<Page<TargetReportEntry>> {
        require_arg("supernode_account", target)?;
        let prefix = match epoch_id {
            Some(epoch_id) => keys::supernode_report_index_epoch_prefix(target, epoch_id),
            None => keys::supernode_report_index_prefix(target),
        };
        let (entries, pagination) = paginate(self.store(), &prefix, page)?;
        let mut items = Vec::with_capacity(entries.len());
        for (key, _) in &entries {
            let (_, epoch_id, reporter) = keys::decode_supernode_report_index_key(key)
                .ok_or_else(|| QueryError::Internal("malformed supernode report index".into()))?;
            let report = self.get_report(epoch_id, &reporter)?.ok_or_else(|| {
                QueryError::Internal(format!("dangling target index {reporter}/{epoch_id}"))
            })?;
            let port_states = report
                .observation_for(target)
                .map(|obs| obs.port_states.clone())
                .unwrap_or_default();
            items.push(TargetReportEntry {
                epoch_id,
                reporter_supernode_account: reporter,
                port_states,
            });
        }
        Ok(Page { items, pagination })
    }

    pub fn query_assigned_targets(
        &self,
        height: u64,
        prober: &str,
        epoch_id: Option<u64>,
    ) -> QueryResult<AssignedTargets> {
        require_arg("supernode_account", prober)?;
        let epoch_id = match epoch_id {
            Some(id) => id,
            None => self.query_current_epoch(height)?.epoch_id,
        };
        let anchor = self.query_epoch_anchor(epoch_id)?;
        let params = self.params_for_epoch(epoch_id)?;
        let (targets, is_prober) = ring_walk::targets_for_reporter(
            &params,
            &anchor.active_supernode_accounts,
            &anchor.target_supernode_accounts,
            &anchor.seed,
            prober,
        )?;
        Ok(AssignedTargets {
            epoch_id,
            epoch_start_height: anchor.epoch_start_height,
            prober_supernode_account: prober.to_string(),
            is_prober,
            target_supernode_accounts: targets,
            required_open_ports: params.required_open_ports,
        })
    }

    pub fn query_storage_challengers(&self, epoch_id: u64) -> QueryResult<Vec<String>> {
        let anchor = self.query_epoch_anchor(epoch_id)?;
        let params = self.params_for_epoch(epoch_id)?;
        Ok(xor_distance::challengers(
            &params,
            &anchor.active_supernode_accounts,
            &anchor.seed,
            epoch_id,
        )?)
    }

    pub fn query_evidence(&self, evidence_id: u64) -> QueryResult<Evidence> {
        self.get_evidence(evidence_id)?
            .ok_or_else(|| QueryError::NotFound(format!("evidence {evidence_id}")))
    }

    fn evidence_from_index(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> QueryResult<Vec<Evidence>> {
        entries
            .iter()
            .map(|(key, _)| {
                let (_, id) = keys::decode_evidence_index_key(key)
                    .ok_or_else(|| QueryError::Internal("malformed evidence index".into()))?;
                self.get_evidence(id)?
                    .ok_or_else(|| QueryError::Internal(format!("dangling evidence index {id}")))
            })
            .collect()
    }

    pub fn query_evidence_by_subject(
        &self,
        subject: &str,
        page: &PageRequest,
    ) -> QueryResult<Page<Evidence>> {
        require_arg("subject_address", subject)?;
        let (entries, pagination) =
            paginate(self.store(), &keys::evidence_by_subject_prefix(subject), page)?;
        Ok(Page {
            items: self.evidence_from_index(&entries)?,
            pagination,
        })
    }

    pub fn query_evidence_by_action(
        &self,
        action_id: &str,
        page: &PageRequest,
    ) -> QueryResult<Page<Evidence>> {
        require_arg("action_id", action_id)?;
        let (entries, pagination) =
            paginate(self.store(), &keys::evidence_by_action_prefix(action_id), page)?;
        Ok(Page {
            items: self.evidence_from_index(&entries)?,
            pagination,
        })
    }

    pub fn query_audit_status(&self, validator_address: &str) -> QueryResult<AuditStatus> {
        require_arg("validator_address", validator_address)?;
        self.get_audit_status(validator_address)?
            .ok_or_else(|| QueryError::NotFound(format!("audit status for {validator_address}")))
    }
}
