//! Transaction and per-execution context (spec.md §3, §4.3).

use sha3::{Digest, Keccak256};

use crate::chain_context::ChainContext;
use crate::state_cache::TieredStateCache;
use crate::trace::TransactionTrace;

/// Content-addressed transaction identifier. `Copy`-able so it can be used
/// freely as a map/log key, the way the teacher treats `TransactionHash`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub [u8; 32]);

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Opaque to the executor except for `from`/`to`/`method_name`/`payload`
/// (spec.md §3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub from: Vec<u8>,
    pub to: Vec<u8>,
    pub method_name: String,
    pub payload: Vec<u8>,
}

impl Transaction {
    /// `From` and `To` must both be present; the caller is expected to check
    /// this before computing a hash or building a trace (spec.md §3, §7).
    pub fn is_well_formed(&self) -> bool {
        !self.from.is_empty() && !self.to.is_empty()
    }

    pub fn transaction_id(&self) -> TransactionId {
        let mut hasher = Keccak256::new();
        hasher.update(&self.from);
        hasher.update(&self.to);
        hasher.update(self.method_name.as_bytes());
        hasher.update(&self.payload);
        let digest = hasher.finalize();
        let mut id = [0u8; 32];
        id.copy_from_slice(&digest);
        TransactionId(id)
    }
}

/// The address inline transactions inherit. A distinct newtype from `from` so
/// "inherited, not rewritten" (spec.md §4.8.c, §8 invariant 7) is a type-level
/// fact rather than a convention callers can accidentally violate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Origin(pub Vec<u8>);

impl From<&Transaction> for Origin {
    fn from(tx: &Transaction) -> Self {
        Origin(tx.from.clone())
    }
}

/// Per-transaction mutable record threaded into the VM and plugins (spec.md
/// §4.3). `state_cache` here is always the *internal* tiered cache built in
/// single-transaction-executor step 3 — a child layer isolating this
/// execution's reads/writes from its caller until explicitly promoted.
pub struct TransactionContext {
    pub previous_block_hash: Vec<u8>,
    pub block_height: i64,
    pub current_block_time: u64,
    pub call_depth: u32,
    pub state_cache: TieredStateCache,
    pub origin: Origin,
    pub trace: TransactionTrace,
}

impl TransactionContext {
    pub fn new(
        chain_context: &ChainContext,
        internal_state_cache: TieredStateCache,
        transaction: &Transaction,
        current_block_time: u64,
        call_depth: u32,
        origin: Origin,
    ) -> Self {
        Self {
            previous_block_hash: chain_context.previous_block_hash.clone(),
            block_height: chain_context.previous_block_height + 1,
            current_block_time,
            call_depth,
            state_cache: internal_state_cache,
            origin,
            trace: TransactionTrace::new(transaction.transaction_id()),
        }
    }
}
