//! Batch executor entry point (spec.md §4.4) and group-cache promotion —
//! `tryPromote` (spec.md §4.5).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::chain_context::{BlockHeader, ChainContext};
use crate::config::BatchExecutorConfig;
use crate::error::ExecutorResult;
use crate::event_sink::EventSink;
use crate::metrics;
use crate::plugin::{PostPlugin, PrePlugin};
use crate::result::{build_return_set, classify, ExecutionReturnSet};
use crate::result_store::TransactionResultStore;
use crate::single_tx_executor::{SingleTxExecutingDto, SingleTxExecutor};
use crate::state_cache::{Key, TieredStateCache, Value};
use crate::trace::TransactionTrace;
use crate::transaction::Transaction;
use crate::vm::VirtualMachine;

/// One batch of transactions to execute against a common block (spec.md §4.4, §6).
#[derive(Clone)]
pub struct BatchRequest {
    pub block_header: BlockHeader,
    pub partial_block_state_set: Option<indexmap::IndexMap<Key, Value>>,
    pub transactions: Vec<Transaction>,
}

/// Drives one batch at a time (spec.md §5: "a single logical executor drives
/// one batch at a time"). Transactions within the batch run strictly
/// sequentially; nothing here is shared across concurrent `execute` calls.
#[derive(Clone)]
pub struct BatchExecutor {
    single_tx_executor: SingleTxExecutor,
    result_store: Arc<dyn TransactionResultStore>,
}

impl BatchExecutor {
    pub fn new(
        vm: Arc<dyn VirtualMachine>,
        pre_plugins: Vec<Arc<dyn PrePlugin>>,
        post_plugins: Vec<Arc<dyn PostPlugin>>,
        event_sink: Arc<dyn EventSink>,
        result_store: Arc<dyn TransactionResultStore>,
        config: BatchExecutorConfig,
    ) -> Self {
        Self {
            single_tx_executor: SingleTxExecutor::new(vm, pre_plugins, post_plugins, event_sink, config),
            result_store,
        }
    }

    #[instrument(skip_all, fields(transactions = request.transactions.len()))]
    pub async fn execute(
        &self,
        request: BatchRequest,
        cancellation: CancellationToken,
        throw_exception: bool,
    ) -> ExecutorResult<Vec<ExecutionReturnSet>> {
        let group_cache = TieredStateCache::new(request.partial_block_state_set.clone().unwrap_or_default());
        let group_chain_context = ChainContext::new(
            request.block_header.previous_block_hash.clone(),
            request.block_header.height - 1,
            group_cache.clone(),
        );

        metrics::record_batch_size(request.transactions.len());

        let mut results = Vec::with_capacity(request.transactions.len());
        let mut return_sets = Vec::with_capacity(request.transactions.len());

        for transaction in request.transactions {
            if cancellation.is_cancelled() {
                info!("batch cancellation observed; stopping before remaining transactions");
                break;
            }

            let dto = SingleTxExecutingDto::top_level(
                group_chain_context.clone(),
                transaction,
                request.block_header.time,
            );

            let mut trace = match self.single_tx_executor.execute(dto, &cancellation).await {
                Ok(trace) => trace,
                Err(err) => {
                    error!(error = %err, "transaction execution raised; aborting batch");
                    return Err(err);
                }
            };

            if !try_promote(&group_cache, &mut trace, throw_exception) {
                metrics::record_transaction_discarded();
                info!(
                    transaction_id = %trace.transaction_id.expect("trace carries an id"),
                    "transaction canceled mid-execution; excluded from packaging, stopping batch"
                );
                break;
            }

            metrics::record_transaction_promoted();
            let result = classify(&trace);
            let return_set = build_return_set(&trace, &result);
            results.push(result);
            return_sets.push(return_set);
        }

        self.result_store.add_transaction_results(&results, &request.block_header).await?;

        Ok(return_sets)
    }
}

/// `tryPromote` (spec.md §4.5): decides whether, and how much of, a completed
/// trace's state is folded into the batch's group cache. Returns `false` only
/// when the trace was canceled somewhere in its tree — the transaction is then
/// excluded from packaging entirely and the batch stops (spec.md §8 invariant 4).
fn try_promote(group_cache: &TieredStateCache, trace: &mut TransactionTrace, throw_exception: bool) -> bool {
    if trace.is_canceled() {
        return false;
    }

    if trace.is_successful() {
        group_cache.update(&trace.flatten_all());
    } else {
        group_cache.update(&trace.flatten_promotable_on_failure());
        trace.surface_up_error();
    }

    // Logged unconditionally, even on the successful branch, matching a
    // diagnostic quirk worth preserving (spec.md §9c).
    if !trace.error.is_empty() {
        if throw_exception {
            error!(error = %trace.error, "transaction trace carries an error");
        } else {
            debug!(error = %trace.error, "transaction trace carries an error");
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::event_sink::NoopEventSink;
    use crate::plugin::{PrePlugin, CHARGE_TRANSACTION_FEES_METHOD};
    use crate::result_store::{MockTransactionResultStore, NoopResultStore};
    use crate::state_cache::StateSet;
    use crate::trace::{ExecutionStatus, TransactionFee};
    use crate::transaction::TransactionContext;
    use crate::vm::{Executive, ExecutiveDescriptors, VirtualMachine, VmError};

    /// Scripted behavior for one contract address, keyed by `Transaction::to`.
    #[derive(Clone, Default)]
    struct ContractScript {
        write: Option<(Vec<u8>, Vec<u8>)>,
        read: Option<Vec<u8>>,
        fail: bool,
        sleep_ms: Option<u64>,
        inline: Vec<Transaction>,
        return_value: Vec<u8>,
    }

    struct ScriptedExecutive {
        script: ContractScript,
        descriptors: ExecutiveDescriptors,
    }

    #[async_trait]
    impl Executive for ScriptedExecutive {
        async fn apply(&mut self, ctx: &mut TransactionContext) -> Result<(), VmError> {
            if let Some(ms) = self.script.sleep_ms {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            if self.script.fail {
                // A business-logic failure (e.g. a revert): the VM still returns
                // normally, it just never reaches `Executed`. Distinct from a
                // `VmError`, which models an unexpected crash that aborts the batch.
                ctx.trace.execution_status = ExecutionStatus::ContractError;
                ctx.trace.push_error("scripted contract failure\n");
                return Ok(());
            }
            if let Some((key, value)) = &self.script.write {
                let mut state_set = StateSet::default();
                state_set.record_write(key.clone(), value.clone());
                ctx.state_cache.update(&[state_set]);
            }
            if let Some(key) = &self.script.read {
                let observed = ctx.state_cache.get(key);
                if let Some(value) = observed.as_option() {
                    ctx.trace.return_value = value.clone();
                }
            } else {
                ctx.trace.return_value = self.script.return_value.clone();
            }
            ctx.trace.execution_status = ExecutionStatus::Executed;
            ctx.trace.inline_transactions = self.script.inline.clone();
            Ok(())
        }

        fn descriptors(&self) -> &ExecutiveDescriptors {
            &self.descriptors
        }
    }

    struct ScriptedVm {
        scripts: HashMap<Vec<u8>, ContractScript>,
    }

    #[async_trait]
    impl VirtualMachine for ScriptedVm {
        async fn get_executive(
            &self,
            _chain_context: &ChainContext,
            contract_address: &[u8],
        ) -> Result<Box<dyn Executive>, VmError> {
            let script = self.scripts.get(contract_address).cloned().unwrap_or_default();
            Ok(Box::new(ScriptedExecutive { script, descriptors: ExecutiveDescriptors::default() }))
        }

        async fn put_executive(&self, _contract_address: &[u8], _executive: Box<dyn Executive>) {}
    }

    fn tx(from: &str, to: &str, method: &str) -> Transaction {
        Transaction {
            from: from.as_bytes().to_vec(),
            to: to.as_bytes().to_vec(),
            method_name: method.into(),
            payload: vec![],
        }
    }

    fn header() -> BlockHeader {
        BlockHeader { previous_block_hash: vec![0; 32], height: 1, time: 1000 }
    }

    fn executor(scripts: HashMap<Vec<u8>, ContractScript>) -> BatchExecutor {
        BatchExecutor::new(
            Arc::new(ScriptedVm { scripts }),
            vec![],
            vec![],
            Arc::new(NoopEventSink),
            Arc::new(NoopResultStore),
            BatchExecutorConfig::default(),
        )
    }

    /// S1 — happy path, plus invariant 2 (sequential visibility): a second
    /// transaction observes the first transaction's write through the group cache.
    #[tokio::test]
    async fn s1_happy_path_and_sequential_visibility() {
        let mut scripts = HashMap::new();
        scripts.insert(b"writer".to_vec(), ContractScript {
            write: Some((b"k1".to_vec(), b"v1".to_vec())),
            ..Default::default()
        });
        scripts.insert(b"reader".to_vec(), ContractScript { read: Some(b"k1".to_vec()), ..Default::default() });

        let exec = executor(scripts);
        let request = BatchRequest {
            block_header: header(),
            partial_block_state_set: None,
            transactions: vec![tx("a", "writer", "write"), tx("a", "reader", "read")],
        };
        let return_sets = exec.execute(request, CancellationToken::new(), false).await.unwrap();

        assert_eq!(return_sets.len(), 2);
        assert_eq!(return_sets[0].status, "Mined");
        assert_eq!(return_sets[0].state_changes.get(b"k1".as_slice()), Some(&b"v1".to_vec()));
        assert_eq!(return_sets[1].status, "Mined");
        assert_eq!(return_sets[1].return_value, b"v1".to_vec());
    }

    struct FeePlugin {
        fee: TransactionFee,
    }

    #[async_trait]
    impl PrePlugin for FeePlugin {
        fn plugin_type(&self) -> &'static str {
            "fee"
        }

        async fn get_pre_transactions(
            &self,
            _descriptors: &ExecutiveDescriptors,
            tx_context: &TransactionContext,
        ) -> Vec<Transaction> {
            vec![Transaction {
                from: tx_context.origin.0.clone(),
                to: b"fee-collector".to_vec(),
                method_name: CHARGE_TRANSACTION_FEES_METHOD.into(),
                payload: vec![],
            }]
        }
    }

    fn fee_collector_script(fee: &TransactionFee) -> ContractScript {
        ContractScript {
            write: if fee.is_failed_to_charge {
                None
            } else {
                Some((b"fee".to_vec(), fee.amount.to_be_bytes().to_vec()))
            },
            return_value: fee.encode(),
            ..Default::default()
        }
    }

    /// S2 — fee charged despite body failure: the VM body fails, but the
    /// pre-plugin's fee write is still promoted.
    #[tokio::test]
    async fn s2_fee_charged_despite_body_failure() {
        let fee = TransactionFee { amount: 10, is_failed_to_charge: false };
        let mut scripts = HashMap::new();
        scripts.insert(b"fee-collector".to_vec(), fee_collector_script(&fee));
        scripts.insert(b"body".to_vec(), ContractScript { fail: true, ..Default::default() });

        let exec = BatchExecutor::new(
            Arc::new(ScriptedVm { scripts }),
            vec![Arc::new(FeePlugin { fee: fee.clone() })],
            vec![],
            Arc::new(NoopEventSink),
            Arc::new(NoopResultStore),
            BatchExecutorConfig::default(),
        );
        let request = BatchRequest {
            block_header: header(),
            partial_block_state_set: None,
            transactions: vec![tx("alice", "body", "do")],
        };
        let return_sets = exec.execute(request, CancellationToken::new(), false).await.unwrap();

        assert_eq!(return_sets.len(), 1);
        assert_eq!(return_sets[0].status, "Failed");
        assert_eq!(return_sets[0].state_changes.len(), 1);
        assert_eq!(return_sets[0].state_changes.get(b"fee".as_slice()), Some(&10u128.to_be_bytes().to_vec()));
    }

    /// S3 — fee charge fails: the transaction never reaches the VM body.
    #[tokio::test]
    async fn s3_fee_charge_failure_prevents_body_execution() {
        let fee = TransactionFee { amount: 0, is_failed_to_charge: true };
        let mut scripts = HashMap::new();
        scripts.insert(b"fee-collector".to_vec(), fee_collector_script(&fee));
        scripts.insert(b"body".to_vec(), ContractScript {
            write: Some((b"should-not-appear".to_vec(), b"x".to_vec())),
            ..Default::default()
        });

        let exec = BatchExecutor::new(
            Arc::new(ScriptedVm { scripts }),
            vec![Arc::new(FeePlugin { fee })],
            vec![],
            Arc::new(NoopEventSink),
            Arc::new(NoopResultStore),
            BatchExecutorConfig::default(),
        );
        let request = BatchRequest {
            block_header: header(),
            partial_block_state_set: None,
            transactions: vec![tx("alice", "body", "do")],
        };
        let return_sets = exec.execute(request, CancellationToken::new(), false).await.unwrap();

        assert_eq!(return_sets.len(), 1);
        assert_eq!(return_sets[0].status, "PreFailed");
        assert!(!return_sets[0].state_changes.contains_key(b"should-not-appear".as_slice()));
    }

    /// S5 — cancellation mid-batch: t1 is promoted, t2 is excluded, t3 never runs.
    #[tokio::test(start_paused = true)]
    async fn s5_cancellation_mid_batch_stops_remaining_transactions() {
        let mut scripts = HashMap::new();
        scripts.insert(b"t1".to_vec(), ContractScript {
            write: Some((b"k1".to_vec(), b"v1".to_vec())),
            ..Default::default()
        });
        scripts.insert(b"t2".to_vec(), ContractScript { sleep_ms: Some(100), ..Default::default() });
        scripts.insert(b"t3".to_vec(), ContractScript {
            write: Some((b"k3".to_vec(), b"v3".to_vec())),
            ..Default::default()
        });

        let exec = executor(scripts);
        let cancellation = CancellationToken::new();
        let cancel_after_t1 = cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(25)).await;
            cancel_after_t1.cancel();
        });

        let request = BatchRequest {
            block_header: header(),
            partial_block_state_set: None,
            transactions: vec![tx("a", "t1", "m"), tx("a", "t2", "m"), tx("a", "t3", "m")],
        };
        let return_sets = exec.execute(request, cancellation, false).await.unwrap();

        assert_eq!(return_sets.len(), 1, "only t1 should have been promoted");
        assert_eq!(return_sets[0].state_changes.get(b"k1".as_slice()), Some(&b"v1".to_vec()));
    }

    struct LoggingPlugin {
        plugin_type: &'static str,
        log: Arc<StdMutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl PrePlugin for LoggingPlugin {
        fn plugin_type(&self) -> &'static str {
            self.plugin_type
        }

        async fn get_pre_transactions(
            &self,
            _descriptors: &ExecutiveDescriptors,
            _tx_context: &TransactionContext,
        ) -> Vec<Transaction> {
            self.log.lock().unwrap().push(self.plugin_type);
            Vec::new()
        }
    }

    /// S6 — duplicate plugin types: only the first-seen instance of each type runs.
    #[tokio::test]
    async fn s6_duplicate_plugin_types_invoke_first_seen_only() {
        let log: Arc<StdMutex<Vec<&'static str>>> = Arc::new(StdMutex::new(Vec::new()));
        let pre_plugins: Vec<Arc<dyn PrePlugin>> = vec![
            Arc::new(LoggingPlugin { plugin_type: "x", log: log.clone() }),
            Arc::new(LoggingPlugin { plugin_type: "y", log: log.clone() }),
            Arc::new(LoggingPlugin { plugin_type: "x", log: log.clone() }),
        ];
        let mut scripts = HashMap::new();
        scripts.insert(b"body".to_vec(), ContractScript {
            write: Some((b"k".to_vec(), b"v".to_vec())),
            ..Default::default()
        });

        let exec = BatchExecutor::new(
            Arc::new(ScriptedVm { scripts }),
            pre_plugins,
            vec![],
            Arc::new(NoopEventSink),
            Arc::new(NoopResultStore),
            BatchExecutorConfig::default(),
        );
        let request = BatchRequest {
            block_header: header(),
            partial_block_state_set: None,
            transactions: vec![tx("a", "body", "m")],
        };
        let return_sets = exec.execute(request, CancellationToken::new(), false).await.unwrap();

        assert_eq!(return_sets.len(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["x", "y"]);
    }

    /// Confirms `add_transaction_results` is called exactly once, with the
    /// persisted results and the batch's own block header.
    #[tokio::test]
    async fn results_are_persisted_to_the_result_store_once() {
        let mut scripts = HashMap::new();
        scripts.insert(b"body".to_vec(), ContractScript {
            write: Some((b"k".to_vec(), b"v".to_vec())),
            ..Default::default()
        });

        let mut mock_store = MockTransactionResultStore::new();
        mock_store
            .expect_add_transaction_results()
            .withf(|results, block_header| results.len() == 1 && block_header.height == 1)
            .times(1)
            .returning(|_, _| Ok(()));

        let exec = BatchExecutor::new(
            Arc::new(ScriptedVm { scripts }),
            vec![],
            vec![],
            Arc::new(NoopEventSink),
            Arc::new(mock_store),
            BatchExecutorConfig::default(),
        );
        let request = BatchRequest {
            block_header: header(),
            partial_block_state_set: None,
            transactions: vec![tx("a", "body", "m")],
        };
        let return_sets = exec.execute(request, CancellationToken::new(), false).await.unwrap();
        assert_eq!(return_sets.len(), 1);
    }
}
