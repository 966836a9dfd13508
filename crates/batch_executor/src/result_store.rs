//! Transaction result store collaborator (spec.md §6): `addTransactionResults`.

use async_trait::async_trait;
#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::chain_context::BlockHeader;
use crate::error::ResultStoreError;
use crate::result::ExecutionResult;

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait TransactionResultStore: Send + Sync {
    async fn add_transaction_results(
        &self,
        results: &[ExecutionResult],
        block_header: &BlockHeader,
    ) -> Result<(), ResultStoreError>;
}

/// Default used in tests, or by a host that persists results out-of-band.
pub struct NoopResultStore;

#[async_trait]
impl TransactionResultStore for NoopResultStore {
    async fn add_transaction_results(
        &self,
        _results: &[ExecutionResult],
        _block_header: &BlockHeader,
    ) -> Result<(), ResultStoreError> {
        Ok(())
    }
}
