//! Observability counters, registered through the `metrics` facade the way the
//! teacher's `apollo_batcher::metrics` registers through `apollo_metrics` (itself
//! a thin wrapper over the same `metrics` crate). We talk to the facade directly
//! since the wrapper macro is specific to the teacher's node runtime.

use metrics::{counter, gauge};

const TRANSACTIONS_EXECUTED: &str = "batch_executor_transactions_executed";
const TRANSACTIONS_CANCELED: &str = "batch_executor_transactions_canceled";
const TRANSACTIONS_PROMOTED: &str = "batch_executor_transactions_promoted";
const TRANSACTIONS_DISCARDED: &str = "batch_executor_transactions_discarded";
const PLUGIN_INVOCATIONS: &str = "batch_executor_plugin_invocations";
const INLINE_TRANSACTIONS_EXECUTED: &str = "batch_executor_inline_transactions_executed";
const LAST_BATCH_SIZE: &str = "batch_executor_last_batch_size";

/// Registers the metrics this crate emits. The host process calls this once at
/// startup, the same way `apollo_batcher::metrics::register_metrics` is called
/// from the node's bootstrap path.
pub fn register_metrics() {
    metrics::describe_counter!(TRANSACTIONS_EXECUTED, "Count of single-transaction executions.");
    metrics::describe_counter!(TRANSACTIONS_CANCELED, "Count of transactions observed as canceled.");
    metrics::describe_counter!(TRANSACTIONS_PROMOTED, "Count of transactions promoted into the group cache.");
    metrics::describe_counter!(TRANSACTIONS_DISCARDED, "Count of transactions excluded from packaging.");
    metrics::describe_counter!(PLUGIN_INVOCATIONS, "Count of deduplicated pre/post plugin invocations.");
    metrics::describe_counter!(
        INLINE_TRANSACTIONS_EXECUTED,
        "Count of inline transactions executed during VM apply."
    );
    metrics::describe_gauge!(LAST_BATCH_SIZE, "Number of transactions in the most recently executed batch.");
}

pub(crate) fn record_transaction_executed() {
    counter!(TRANSACTIONS_EXECUTED).increment(1);
}

pub(crate) fn record_transaction_canceled() {
    counter!(TRANSACTIONS_CANCELED).increment(1);
}

pub(crate) fn record_transaction_promoted() {
    counter!(TRANSACTIONS_PROMOTED).increment(1);
}

pub(crate) fn record_transaction_discarded() {
    counter!(TRANSACTIONS_DISCARDED).increment(1);
}

pub(crate) fn record_plugin_invocation() {
    counter!(PLUGIN_INVOCATIONS).increment(1);
}

pub(crate) fn record_inline_transaction_executed() {
    counter!(INLINE_TRANSACTIONS_EXECUTED).increment(1);
}

pub(crate) fn record_batch_size(size: usize) {
    gauge!(LAST_BATCH_SIZE).set(size as f64);
}

#[cfg(test)]
mod tests {
    use metrics::set_default_local_recorder;
    use metrics_exporter_prometheus::PrometheusBuilder;

    use super::*;

    /// Mirrors the teacher's `only_metrics_counters_for_local_server` style: a
    /// local Prometheus recorder, rendered and grepped for the expected value,
    /// rather than asserting against the `metrics` facade directly (it has no
    /// query API of its own).
    #[test]
    fn counters_increment_exactly_once_per_call() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let _guard = set_default_local_recorder(&recorder);

        record_transaction_executed();
        record_transaction_executed();
        record_transaction_canceled();
        record_transaction_promoted();
        record_transaction_discarded();
        record_plugin_invocation();
        record_inline_transaction_executed();
        record_batch_size(3);

        let rendered = recorder.handle().render();
        assert!(rendered.contains(&format!("{TRANSACTIONS_EXECUTED} 2")));
        assert!(rendered.contains(&format!("{TRANSACTIONS_CANCELED} 1")));
        assert!(rendered.contains(&format!("{TRANSACTIONS_PROMOTED} 1")));
        assert!(rendered.contains(&format!("{TRANSACTIONS_DISCARDED} 1")));
        assert!(rendered.contains(&format!("{PLUGIN_INVOCATIONS} 1")));
        assert!(rendered.contains(&format!("{INLINE_TRANSACTIONS_EXECUTED} 1")));
        assert!(rendered.contains(&format!("{LAST_BATCH_SIZE} 3")));
    }
}
