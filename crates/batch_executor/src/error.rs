use thiserror::Error;

use crate::trace::TransactionTrace;

/// Error taxonomy for the executor. Expected partial failures (pre/post/inline,
/// contract-not-found) are absorbed into a [`TransactionTrace`] and never surface
/// here; this enum is reserved for the conditions spec.md §7 says propagate to the
/// batch layer and, from there, to the caller.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// `From` or `To` is missing on the incoming transaction. Raised from the
    /// single-transaction preamble, before a trace exists.
    #[error("malformed transaction {0:?}: both `from` and `to` are required")]
    MalformedTransaction(crate::transaction::TransactionId),

    /// The VM raised during `apply`, inline execution, or post-plugin execution.
    /// Carries the partially-built trace so the batch layer can still log it
    /// before aborting (source note §9c: the trace's error is always logged,
    /// even on an aborting path).
    #[error("VM execution error on transaction {0:?}: {1}")]
    VmExecutionError(crate::transaction::TransactionId, String, Box<TransactionTrace>),

    #[error(transparent)]
    ResultStoreError(#[from] ResultStoreError),

    #[error("internal executor error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
#[error("transaction result store error: {0}")]
pub struct ResultStoreError(pub String);

pub type ExecutorResult<T> = Result<T, ExecutorError>;
