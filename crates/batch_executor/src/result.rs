//! Result & ReturnSet synthesis (spec.md §4.7).

use indexmap::{IndexMap, IndexSet};

use crate::state_cache::{CacheValue, Key, Value};
use crate::trace::{ConsumedResourceTokens, ExecutionStatus, TransactionFee, TransactionTrace};
use crate::transaction::TransactionId;

/// The first-matching classification of a terminal trace (spec.md §4.7).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionResult {
    /// `status == Undefined`: no receipt body.
    Unexecutable { transaction_id: TransactionId },
    /// `status == Prefailed`.
    PreFailed { transaction_id: TransactionId, error: String },
    Mined {
        transaction_id: TransactionId,
        return_value: Vec<u8>,
        bloom: Vec<u8>,
        logs: Vec<Vec<u8>>,
        transaction_fee: Option<TransactionFee>,
        consumed_resource_tokens: Option<ConsumedResourceTokens>,
    },
    Failed { transaction_id: TransactionId, error: String },
}

impl ExecutionResult {
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            ExecutionResult::Unexecutable { transaction_id }
            | ExecutionResult::PreFailed { transaction_id, .. }
            | ExecutionResult::Mined { transaction_id, .. }
            | ExecutionResult::Failed { transaction_id, .. } => *transaction_id,
        }
    }

    pub fn status_tag(&self) -> &'static str {
        match self {
            ExecutionResult::Unexecutable { .. } => "Unexecutable",
            ExecutionResult::PreFailed { .. } => "PreFailed",
            ExecutionResult::Mined { .. } => "Mined",
            ExecutionResult::Failed { .. } => "Failed",
        }
    }
}

/// The observable outcome of one transaction (spec.md §3, §4.7). `state_changes`
/// and `state_deletes` are disjoint by invariant (§8 invariant 1).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionReturnSet {
    pub transaction_id: Option<TransactionId>,
    pub status: &'static str,
    pub bloom: Vec<u8>,
    pub return_value: Vec<u8>,
    pub state_changes: IndexMap<Key, Value>,
    pub state_deletes: IndexSet<Key>,
    pub state_accesses: IndexMap<Key, CacheValue>,
}

/// Classifies a terminal trace into a result (spec.md §4.7, first match wins).
pub fn classify(trace: &TransactionTrace) -> ExecutionResult {
    let transaction_id = trace.transaction_id.expect("trace must carry a transaction id");
    match trace.execution_status {
        ExecutionStatus::Undefined => ExecutionResult::Unexecutable { transaction_id },
        ExecutionStatus::Prefailed => {
            ExecutionResult::PreFailed { transaction_id, error: trace.error.clone() }
        }
        _ if trace.is_successful() => ExecutionResult::Mined {
            transaction_id,
            return_value: trace.return_value.clone(),
            bloom: trace.bloom.clone(),
            logs: trace.logs.clone(),
            transaction_fee: trace.transaction_fee.clone(),
            consumed_resource_tokens: trace.consumed_resource_tokens.clone(),
        },
        _ => ExecutionResult::Failed { transaction_id, error: trace.error.clone() },
    }
}

/// Builds the observable return-set for a trace + its classification
/// (spec.md §4.7). On success, folds every `StateSet` in the tree; on failure,
/// folds only the promotable subset (successful pre/post traces), discarding
/// the failed VM body's writes — but reads are always taken from the full tree.
pub fn build_return_set(trace: &TransactionTrace, result: &ExecutionResult) -> ExecutionReturnSet {
    let mut return_set = ExecutionReturnSet {
        transaction_id: trace.transaction_id,
        status: result.status_tag(),
        bloom: trace.bloom.clone(),
        ..Default::default()
    };

    let successful = trace.is_successful();
    let state_sets =
        if successful { trace.flatten_all() } else { trace.flatten_promotable_on_failure() };

    for state_set in state_sets {
        for (key, value) in state_set.writes {
            return_set.state_deletes.shift_remove(&key);
            return_set.state_changes.insert(key, value);
        }
        for key in state_set.deletes {
            return_set.state_changes.shift_remove(&key);
            return_set.state_deletes.insert(key);
        }
    }

    for (key, value) in trace.flatten_all_reads() {
        return_set.state_accesses.insert(key, value);
    }

    if let ExecutionResult::Mined { return_value, .. } = result {
        return_set.return_value = return_value.clone();
    }

    debug_assert!(
        return_set.state_changes.keys().all(|k| !return_set.state_deletes.contains(k)),
        "state_changes and state_deletes must be disjoint"
    );

    return_set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_cache::StateSet;

    fn tx_id() -> TransactionId {
        TransactionId([7u8; 32])
    }

    #[test]
    fn disjointness_holds_after_write_then_delete_across_state_sets() {
        let mut trace = TransactionTrace::new(tx_id());
        trace.execution_status = ExecutionStatus::Executed;
        let mut first = StateSet::default();
        first.record_write(b"k".to_vec(), b"v".to_vec());
        let mut second = StateSet::default();
        second.record_delete(b"k".to_vec());
        trace.state_set = first;
        trace.inline_traces = vec![{
            let mut inline = TransactionTrace::new(tx_id());
            inline.execution_status = ExecutionStatus::Executed;
            inline.state_set = second;
            inline
        }];
        let result = classify(&trace);
        let return_set = build_return_set(&trace, &result);
        assert!(!return_set.state_changes.contains_key(b"k".as_slice()));
        assert!(return_set.state_deletes.contains(b"k".as_slice()));
    }

    #[test]
    fn undefined_status_is_unexecutable() {
        let trace = TransactionTrace::new(tx_id());
        assert!(matches!(classify(&trace), ExecutionResult::Unexecutable { .. }));
    }
}
