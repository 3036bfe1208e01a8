use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    // Rejected at ingress.
    #[error("invalid signer: {0}")]
    InvalidSigner(String),
    #[error("invalid reporter address: {0}")]
    InvalidReporter(String),
    #[error("invalid subject address: {0}")]
    InvalidSubject(String),
    #[error("invalid evidence type: {0}")]
    InvalidEvidenceType(String),
    #[error("invalid evidence metadata: {0}")]
    InvalidMetadata(String),
    #[error("action id is required for evidence type {0}")]
    InvalidActionId(String),
    #[error("evidence type {0} cannot be submitted through SubmitEvidence")]
    ReservedEvidenceType(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),

    // Gating violations.
    #[error("invalid epoch id: {0}")]
    InvalidEpochId(String),
    #[error("reporter not found: {0}")]
    ReporterNotFound(String),
    #[error("epoch anchor not found for epoch_id {0}")]
    EpochAnchorNotFound(u64),
    #[error("invalid reporter state: {0}")]
    InvalidReporterState(String),
    #[error("invalid peer observations: {0}")]
    InvalidPeerObservations(String),
    #[error("invalid port states length: {0}")]
    InvalidPortStatesLength(String),
    #[error("duplicate report: {0}")]
    DuplicateReport(String),
    #[error("storage challenge evidence is disabled")]
    StorageChallengeDisabled,
    #[error("reporter {0} is not a storage challenger for epoch {1}")]
    NotAChallenger(String, u64),

    // Invariant violations: a bug or store corruption, never user error.
    #[error("epoch anchor must be created at epoch start height: want={want} got={got}")]
    AnchorHeightMismatch { want: u64, got: u64 },
    #[error("corrupt state: {0}")]
    CorruptState(String),
    #[error("invalid seed: {0}")]
    InvalidSeed(String),

    #[error(transparent)]
    Registry(#[from] anyhow::Error),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

impl AuditError {
    /// True for errors that indicate a bug or corrupted state rather than a bad request.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            AuditError::AnchorHeightMismatch { .. }
                | AuditError::CorruptState(_)
                | AuditError::InvalidSeed(_)
                | AuditError::Codec(_)
        )
    }
}

pub type AuditResult<T> = Result<T, AuditError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl From<AuditError> for QueryError {
    fn from(err: AuditError) -> Self {
        QueryError::Internal(err.to_string())
    }
}

pub type QueryResult<T> = Result<T, QueryError>;
