use audit::{
    AssignedTargets, AuditStatus, EpochAnchor, EpochInfo, EpochReport, Evidence, Page,
    PageRequest, Params, QueryError, QueryResult, SelfReportEntry, TargetReportEntry,
};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use runtime::{BlockApplyResult, GenesisConfig, Tx};
use serde::{Deserialize, Serialize};

use crate::node::{EnqueueError, Node};

type ApiError = (StatusCode, String);
type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Status {
    pub chain_id: String,
    pub height: u64,
    pub block_hash: String,
    pub state_root: String,
    pub mempool_len: usize,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SubmitTxResponse {
    pub hash: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct EpochFilter {
    pub epoch_id: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TargetQuery {
    pub epoch_id: Option<u64>,
    pub key: Option<String>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub count_total: bool,
}

fn query_status(err: QueryError) -> ApiError {
    let code = match err {
        QueryError::NotFound(_) => StatusCode::NOT_FOUND,
        QueryError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        QueryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, err.to_string())
}

fn respond<T>(res: QueryResult<T>) -> ApiResult<T> {
    res.map(Json).map_err(query_status)
}

pub fn router(node: Node) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(status))
        .route("/send_raw_tx", post(send_raw_tx))
        .route("/block/:height", get(block))
        .route("/genesis", get(export_genesis))
        .route("/audit/params", get(params))
        .route("/audit/epoch/current", get(current_epoch))
        .route("/audit/epoch/:epoch_id", get(epoch_by_id))
        .route("/audit/anchor/current", get(current_anchor))
        .route("/audit/anchor/:epoch_id", get(anchor))
        .route("/audit/report/:epoch_id/:account", get(report))
        .route("/audit/reports/reporter/:account", get(reports_by_reporter))
        .route("/audit/reports/self/:account", get(self_reports))
        .route("/audit/reports/target/:account", get(reports_by_target))
        .route("/audit/assigned/:account", get(assigned_targets))
        .route("/audit/challengers/:epoch_id", get(storage_challengers))
        .route("/audit/evidence/:evidence_id", get(evidence))
        .route("/audit/evidence_by_subject/:subject", get(evidence_by_subject))
        .route("/audit/evidence_by_action/:action_id", get(evidence_by_action))
        .route("/audit/status/:validator", get(audit_status))
        .with_state(node)
}

pub async fn status(State(node): State<Node>) -> Json<Status> {
    let mempool_len = node.mempool.lock().await.len();
    let chain = node.chain.read().await;
    let state_root = chain
        .blocks
        .last()
        .map(|b| b.state_root)
        .unwrap_or_else(|| chain.ctx.state_root());
    Json(Status {
        chain_id: chain.ctx.chain_id.clone(),
        height: chain.height(),
        block_hash: hex::encode(chain.head_hash()),
        state_root: hex::encode(state_root),
        mempool_len,
    })
}

pub async fn send_raw_tx(
    State(node): State<Node>,
    Json(tx): Json<Tx>,
) -> ApiResult<SubmitTxResponse> {
    let hash = node.enqueue_tx(tx).await.map_err(|err| {
        let code = match err {
            EnqueueError::ChainId { .. } | EnqueueError::Encoding(_) => StatusCode::BAD_REQUEST,
            EnqueueError::Duplicate => StatusCode::CONFLICT,
            EnqueueError::Full => StatusCode::SERVICE_UNAVAILABLE,
        };
        (code, err.to_string())
    })?;
    Ok(Json(SubmitTxResponse {
        hash: hex::encode(hash),
    }))
}

pub async fn block(State(node): State<Node>, Path(height): Path<u64>) -> ApiResult<BlockApplyResult> {
    let chain = node.chain.read().await;
    chain
        .block(height)
        .cloned()
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("block {height} not found")))
}

pub async fn export_genesis(State(node): State<Node>) -> ApiResult<GenesisConfig> {
    let chain = node.chain.read().await;
    chain
        .ctx
        .export_genesis()
        .map(Json)
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")))
}

pub async fn params(State(node): State<Node>) -> ApiResult<Params> {
    let chain = node.chain.read().await;
    respond(chain.ctx.keeper.query_params())
}

pub async fn current_epoch(State(node): State<Node>) -> ApiResult<EpochInfo> {
    let chain = node.chain.read().await;
    respond(chain.ctx.keeper.query_current_epoch(chain.height()))
}

pub async fn epoch_by_id(
    State(node): State<Node>,
    Path(epoch_id): Path<u64>,
) -> ApiResult<EpochInfo> {
    let chain = node.chain.read().await;
    respond(chain.ctx.keeper.query_epoch_by_id(epoch_id))
}

pub async fn current_anchor(State(node): State<Node>) -> ApiResult<EpochAnchor> {
    let chain = node.chain.read().await;
    respond(chain.ctx.keeper.query_current_epoch_anchor(chain.height()))
}

pub async fn anchor(State(node): State<Node>, Path(epoch_id): Path<u64>) -> ApiResult<EpochAnchor> {
    let chain = node.chain.read().await;
    respond(chain.ctx.keeper.query_epoch_anchor(epoch_id))
}

pub async fn report(
    State(node): State<Node>,
    Path((epoch_id, account)): Path<(u64, String)>,
) -> ApiResult<EpochReport> {
    let chain = node.chain.read().await;
    respond(chain.ctx.keeper.query_epoch_report(epoch_id, &account))
}

pub async fn reports_by_reporter(
    State(node): State<Node>,
    Path(account): Path<String>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Page<EpochReport>> {
    let chain = node.chain.read().await;
    respond(chain.ctx.keeper.query_reports_by_reporter(&account, &page))
}

pub async fn self_reports(
    State(node): State<Node>,
    Path(account): Path<String>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Page<SelfReportEntry>> {
    let chain = node.chain.read().await;
    respond(chain.ctx.keeper.query_self_reports(&account, &page))
}

pub async fn reports_by_target(
    State(node): State<Node>,
    Path(account): Path<String>,
    Query(query): Query<TargetQuery>,
) -> ApiResult<Page<TargetReportEntry>> {
    let page = PageRequest {
        key: query.key,
        offset: query.offset,
        limit: query.limit,
        count_total: query.count_total,
    };
    let chain = node.chain.read().await;
    respond(
        chain
            .ctx
            .keeper
            .query_reports_by_target(&account, query.epoch_id, &page),
    )
}

pub async fn assigned_targets(
    State(node): State<Node>,
    Path(account): Path<String>,
    Query(filter): Query<EpochFilter>,
) -> ApiResult<AssignedTargets> {
    let chain = node.chain.read().await;
    respond(
        chain
            .ctx
            .keeper
            .query_assigned_targets(chain.height(), &account, filter.epoch_id),
    )
}

pub async fn storage_challengers(
    State(node): State<Node>,
    Path(epoch_id): Path<u64>,
) -> ApiResult<Vec<String>> {
    let chain = node.chain.read().await;
    respond(chain.ctx.keeper.query_storage_challengers(epoch_id))
}

pub async fn evidence(State(node): State<Node>, Path(evidence_id): Path<u64>) -> ApiResult<Evidence> {
    let chain = node.chain.read().await;
    respond(chain.ctx.keeper.query_evidence(evidence_id))
}

pub async fn evidence_by_subject(
    State(node): State<Node>,
    Path(subject): Path<String>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Page<Evidence>> {
    let chain = node.chain.read().await;
    respond(chain.ctx.keeper.query_evidence_by_subject(&subject, &page))
}

pub async fn evidence_by_action(
    State(node): State<Node>,
    Path(action_id): Path<String>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Page<Evidence>> {
    let chain = node.chain.read().await;
    respond(chain.ctx.keeper.query_evidence_by_action(&action_id, &page))
}

pub async fn audit_status(
    State(node): State<Node>,
    Path(validator): Path<String>,
) -> ApiResult<AuditStatus> {
    let chain = node.chain.read().await;
    respond(chain.ctx.keeper.query_audit_status(&validator))
}
