//! The VM/executive collaborator contract (spec.md §6). The smart-contract VM
//! itself is out of scope; this module only pins down the boundary this crate
//! calls across.

use async_trait::async_trait;

use crate::chain_context::ChainContext;
use crate::transaction::TransactionContext;

/// Opaque ABI description for a contract, handed to pre/post plugins so they
/// can decide which synthetic transactions to emit (spec.md §4.8).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutiveDescriptors(pub Vec<u8>);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    #[error("registration not found for contract address")]
    RegistrationNotFound,
    #[error("VM execution error: {0}")]
    ExecutionFailed(String),
}

/// A VM instance bound to a specific contract address (spec.md glossary).
#[async_trait]
pub trait Executive: Send {
    /// Runs this transaction. Reads, writes, and deletes all go through
    /// `ctx.state_cache`; the executor harvests that cache's own layer into
    /// `ctx.trace.state_set` once `apply` returns. Before returning `Ok`, an
    /// implementation populates `ctx.trace`'s return value, bloom, logs,
    /// inline transactions, and preliminary `execution_status` (typically
    /// `Executed`).
    async fn apply(&mut self, ctx: &mut TransactionContext) -> Result<(), VmError>;

    fn descriptors(&self) -> &ExecutiveDescriptors;
}

/// `getExecutive` / `putExecutive` (spec.md §6): a pool of VM instances keyed by
/// contract address. Acquire/release discipline is the only cross-boundary
/// resource this crate depends on (spec.md §5).
///
/// Not `mockall`-automocked like the collaborators in [`crate::result_store`]
/// and [`crate::event_sink`]: `automock` requires every argument to implement
/// `Debug`, and `ChainContext`/`TransactionContext` deliberately don't (they
/// carry a `TieredStateCache`, whose whole point is cheap `Arc` sharing rather
/// than a printable snapshot). Hosts mock this boundary with a hand-written
/// test double instead, the way this crate's own tests do (see
/// `single_tx_executor`'s and `batch_executor`'s `ScriptedVm`).
#[async_trait]
pub trait VirtualMachine: Send + Sync {
    async fn get_executive(
        &self,
        chain_context: &ChainContext,
        contract_address: &[u8],
    ) -> Result<Box<dyn Executive>, VmError>;

    async fn put_executive(&self, contract_address: &[u8], executive: Box<dyn Executive>);
}
