//! Audit module: epoch-scoped peer probing of supernodes, report gating,
//! evidence accounting and postpone/recover enforcement. All logic is
//! deterministic and runs inside block execution.

pub mod abci;
pub mod address;
pub mod anchor;
pub mod assignment;
pub mod enforcement;
pub mod epoch;
pub mod error;
pub mod evidence;
pub mod genesis;
pub mod keeper;
pub mod keys;
pub mod msg;
pub mod params;
pub mod prune;
pub mod query;
pub mod registry;
pub mod report;
pub mod staleness;
pub mod types;
pub mod window;

pub use address::AddressCodec;
pub use epoch::{derive_epoch_at_height, derive_epoch_by_id, EpochInfo};
pub use error::{AuditError, AuditResult, QueryError, QueryResult};
pub use keeper::{BlockContext, Keeper};
pub use msg::{AuditMsg, MsgResponse, MsgSubmitEpochReport, MsgSubmitEvidence, MsgUpdateParams};
pub use params::Params;
pub use query::{
    AssignedTargets, Page, PageRequest, PageResponse, SelfReportEntry, TargetReportEntry,
};
pub use registry::{
    RegistryParams, StoreRegistry, SuperNode, SuperNodeState, SuperNodeStateRecord,
    SupernodeRegistry,
};
pub use types::*;
pub use window::WindowState;
