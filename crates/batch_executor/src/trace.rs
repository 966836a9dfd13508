//! Transaction trace tree (spec.md §3) and the state-set flattening rules used
//! both for group-cache promotion (§4.5) and return-set synthesis (§4.7).

use crate::state_cache::StateSet;
use crate::transaction::{Transaction, TransactionId};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutionStatus {
    #[default]
    Undefined,
    Prefailed,
    Executed,
    Postfailed,
    Canceled,
    ContractError,
    SystemError,
}

/// The fee-charging pre-plugin's decoded return value (spec.md §3, §4.8.a).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionFee {
    pub amount: u128,
    pub is_failed_to_charge: bool,
}

/// The resource-token post-plugin's decoded return value (spec.md §3, §4.8.b).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsumedResourceTokens {
    pub tokens: indexmap::IndexMap<String, u128>,
}

/// The complete record of what happened when one transaction executed,
/// including pre/inline/post sub-activity (spec.md §3). A tree of owned
/// children, no back-references (spec.md §9).
#[derive(Clone, Debug, Default)]
pub struct TransactionTrace {
    pub transaction_id: Option<TransactionId>,
    pub execution_status: ExecutionStatus,
    pub return_value: Vec<u8>,
    pub bloom: Vec<u8>,
    pub logs: Vec<Vec<u8>>,
    /// Accumulative: later appends are concatenated, never overwrite.
    pub error: String,
    pub state_set: StateSet,

    pub pre_transactions: Vec<Transaction>,
    pub pre_traces: Vec<TransactionTrace>,
    pub inline_transactions: Vec<Transaction>,
    pub inline_traces: Vec<TransactionTrace>,
    pub post_transactions: Vec<Transaction>,
    pub post_traces: Vec<TransactionTrace>,

    pub transaction_fee: Option<TransactionFee>,
    pub consumed_resource_tokens: Option<ConsumedResourceTokens>,
}

impl TransactionFee {
    /// Encodes this fee as the crate's wire representation for the otherwise
    /// opaque `returnValue` blob (spec.md §3: "opaque message blobs").
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(17);
        out.extend_from_slice(&self.amount.to_be_bytes());
        out.push(u8::from(self.is_failed_to_charge));
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 17 {
            return None;
        }
        let mut amount_bytes = [0u8; 16];
        amount_bytes.copy_from_slice(&bytes[0..16]);
        Some(Self { amount: u128::from_be_bytes(amount_bytes), is_failed_to_charge: bytes[16] != 0 })
    }
}

impl ConsumedResourceTokens {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.tokens.len() as u32).to_be_bytes());
        for (name, amount) in &self.tokens {
            out.extend_from_slice(&(name.len() as u16).to_be_bytes());
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(&amount.to_be_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 {
            return None;
        }
        let count = u32::from_be_bytes(bytes[0..4].try_into().ok()?);
        let mut offset = 4usize;
        let mut tokens = indexmap::IndexMap::new();
        for _ in 0..count {
            if bytes.len() < offset + 2 {
                return None;
            }
            let name_len = u16::from_be_bytes(bytes[offset..offset + 2].try_into().ok()?) as usize;
            offset += 2;
            if bytes.len() < offset + name_len {
                return None;
            }
            let name = String::from_utf8(bytes[offset..offset + name_len].to_vec()).ok()?;
            offset += name_len;
            if bytes.len() < offset + 16 {
                return None;
            }
            let amount = u128::from_be_bytes(bytes[offset..offset + 16].try_into().ok()?);
            offset += 16;
            tokens.insert(name, amount);
        }
        Some(Self { tokens })
    }
}

impl TransactionTrace {
    pub fn new(transaction_id: TransactionId) -> Self {
        Self { transaction_id: Some(transaction_id), ..Default::default() }
    }

    pub fn push_error(&mut self, message: impl AsRef<str>) {
        self.error.push_str(message.as_ref());
    }

    /// `IsSuccessful`: the VM reported `Executed` for this node *and* every
    /// inline child also succeeded — a failed inline child makes the parent
    /// unsuccessful without changing the parent's own `execution_status`
    /// (spec.md §4.8.c step 4).
    pub fn is_successful(&self) -> bool {
        self.execution_status == ExecutionStatus::Executed
            && self.inline_traces.iter().all(TransactionTrace::is_successful)
    }

    pub fn is_canceled(&self) -> bool {
        self.execution_status == ExecutionStatus::Canceled
            || self.pre_traces.iter().any(TransactionTrace::is_canceled)
            || self.inline_traces.iter().any(TransactionTrace::is_canceled)
            || self.post_traces.iter().any(TransactionTrace::is_canceled)
    }

    /// Deepest non-empty error message in the tree, used by `surface_up_error`
    /// (spec.md §4.5) to lift a sub-trace's explanation onto the top level.
    fn deepest_nonempty_error(&self) -> Option<String> {
        for child in self.pre_traces.iter().chain(self.inline_traces.iter()).chain(self.post_traces.iter()) {
            if let Some(found) = child.deepest_nonempty_error() {
                return Some(found);
            }
        }
        if !self.error.is_empty() {
            Some(self.error.clone())
        } else {
            None
        }
    }

    /// Lifts the deepest non-empty error message in the tree onto this node's
    /// own `error` field, if this node doesn't already carry one.
    pub fn surface_up_error(&mut self) {
        if self.error.is_empty() {
            if let Some(found) = self.deepest_nonempty_error() {
                self.error = found;
            }
        }
    }

    /// Ordered list of every `StateSet` in the tree, regardless of success —
    /// used when a node (and everything below it) is known to be fully
    /// successful, so nothing needs to be filtered out.
    pub fn flatten_all(&self) -> Vec<StateSet> {
        let mut out = Vec::new();
        for pre in &self.pre_traces {
            out.extend(pre.flatten_all());
        }
        out.push(self.state_set.clone());
        for inline in &self.inline_traces {
            out.extend(inline.flatten_all());
        }
        for post in &self.post_traces {
            out.extend(post.flatten_all());
        }
        out
    }

    /// The subset of the tree promotable when the transaction as a whole is
    /// *not* successful (spec.md §4.5, §4.7): only successful pre-traces and
    /// successful post-traces contribute; the VM body's own `state_set` and
    /// any inline writes are discarded.
    pub fn flatten_promotable_on_failure(&self) -> Vec<StateSet> {
        let mut out = Vec::new();
        for pre in &self.pre_traces {
            if pre.is_successful() {
                out.extend(pre.flatten_all());
            }
        }
        for post in &self.post_traces {
            if post.is_successful() {
                out.extend(post.flatten_all());
            }
        }
        out
    }

    /// All reads anywhere in the tree, for `StateAccesses` — surfaced even for
    /// the discarded (failed) part of the tree, per spec.md §4.7: "Still record
    /// reads from the full flattened trace."
    pub fn flatten_all_reads(&self) -> indexmap::IndexMap<Vec<u8>, crate::state_cache::CacheValue> {
        let mut out = indexmap::IndexMap::new();
        for state_set in self.flatten_all() {
            for (key, value) in state_set.reads {
                out.insert(key, value);
            }
        }
        out
    }
}
