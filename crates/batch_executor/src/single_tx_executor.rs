//! The single-transaction executor (spec.md §4.6, §4.8): the recursive unit
//! that runs one transaction's pre-plugins, VM body, inline children, and
//! post-plugins, isolated behind its own tiered cache layer until promoted.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::chain_context::ChainContext;
use crate::config::BatchExecutorConfig;
use crate::error::{ExecutorError, ExecutorResult};
use crate::event_sink::{EventSink, TransactionExecutedEvent};
use crate::metrics;
use crate::plugin::{
    dedup_post_plugins, dedup_pre_plugins, PostPlugin, PrePlugin, CHARGE_RESOURCE_TOKEN_METHOD,
    CHARGE_TRANSACTION_FEES_METHOD,
};
use crate::state_cache::TieredStateCache;
use crate::trace::{ConsumedResourceTokens, ExecutionStatus, TransactionFee, TransactionTrace};
use crate::transaction::{Origin, Transaction, TransactionContext};
use crate::vm::{Executive, ExecutiveDescriptors, VirtualMachine, VmError};

/// The parameters threaded through one (possibly recursive) execution.
///
/// `run_plugins` exists to break what would otherwise be unbounded recursion:
/// a naive reading of the pre/post stages ("execute as a single tx at depth
/// 0") would have a fee-charging pre-transaction itself trigger its own
/// round of pre/post plugin orchestration. Only the batch-invoked top-level
/// transaction carries `run_plugins = true`; plugin-synthesized and inline
/// sub-transactions always carry `false`. See DESIGN.md.
#[derive(Clone)]
pub struct SingleTxExecutingDto {
    pub depth: u32,
    pub chain_context: ChainContext,
    pub transaction: Transaction,
    pub current_block_time: u64,
    pub origin: Option<Origin>,
    pub is_cancellable: bool,
    pub run_plugins: bool,
}

impl SingleTxExecutingDto {
    pub fn top_level(chain_context: ChainContext, transaction: Transaction, current_block_time: u64) -> Self {
        Self {
            depth: 0,
            chain_context,
            transaction,
            current_block_time,
            origin: None,
            is_cancellable: true,
            run_plugins: true,
        }
    }
}

/// Recursively executes one transaction and everything it spawns (spec.md
/// §4.6, §4.8). Cheap to clone: every field is an `Arc` or plain config data.
#[derive(Clone)]
pub struct SingleTxExecutor {
    vm: Arc<dyn VirtualMachine>,
    pre_plugins: Vec<Arc<dyn PrePlugin>>,
    post_plugins: Vec<Arc<dyn PostPlugin>>,
    event_sink: Arc<dyn EventSink>,
    config: BatchExecutorConfig,
}

impl SingleTxExecutor {
    pub fn new(
        vm: Arc<dyn VirtualMachine>,
        pre_plugins: Vec<Arc<dyn PrePlugin>>,
        post_plugins: Vec<Arc<dyn PostPlugin>>,
        event_sink: Arc<dyn EventSink>,
        config: BatchExecutorConfig,
    ) -> Self {
        Self {
            vm,
            pre_plugins: dedup_pre_plugins(pre_plugins),
            post_plugins: dedup_post_plugins(post_plugins),
            event_sink,
            config,
        }
    }

    /// Boxed because an `async fn` cannot call itself: pre/inline/post
    /// sub-transactions are each executed through a recursive call to this
    /// same method (spec.md §4.8).
    pub fn execute<'a>(
        &'a self,
        dto: SingleTxExecutingDto,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, ExecutorResult<TransactionTrace>> {
        async move { self.execute_inner(dto, cancellation).await }.boxed()
    }

    async fn execute_inner(
        &self,
        dto: SingleTxExecutingDto,
        cancellation: &CancellationToken,
    ) -> ExecutorResult<TransactionTrace> {
        if !dto.transaction.is_well_formed() {
            return Err(ExecutorError::MalformedTransaction(dto.transaction.transaction_id()));
        }

        if dto.is_cancellable && cancellation.is_cancelled() {
            let mut trace = TransactionTrace::new(dto.transaction.transaction_id());
            trace.execution_status = ExecutionStatus::Canceled;
            metrics::record_transaction_canceled();
            return Ok(trace);
        }

        if dto.depth as usize >= self.config.max_inline_depth {
            let mut trace = TransactionTrace::new(dto.transaction.transaction_id());
            trace.execution_status = ExecutionStatus::ContractError;
            trace.push_error("maximum inline recursion depth exceeded\n");
            return Ok(trace);
        }

        let mut internal_tsc = dto.chain_context.state_cache.child();
        let mut internal_chain_context = dto.chain_context.with_state_cache(internal_tsc.clone());
        let origin = dto.origin.clone().unwrap_or_else(|| Origin::from(&dto.transaction));

        let mut tx_context = TransactionContext::new(
            &internal_chain_context,
            internal_tsc.clone(),
            &dto.transaction,
            dto.current_block_time,
            dto.depth,
            origin,
        );

        let mut executive = match self.vm.get_executive(&internal_chain_context, &dto.transaction.to).await {
            Ok(executive) => executive,
            Err(VmError::RegistrationNotFound) => {
                tx_context.trace.execution_status = ExecutionStatus::ContractError;
                tx_context.trace.push_error("no contract registered at the destination address\n");
                return Ok(tx_context.trace);
            }
            Err(other) => {
                tx_context.trace.execution_status = ExecutionStatus::ContractError;
                tx_context.trace.push_error(format!("{other}\n"));
                return Ok(tx_context.trace);
            }
        };

        let body_result = self
            .run_body(
                &dto,
                executive.as_mut(),
                &mut internal_chain_context,
                &mut internal_tsc,
                &mut tx_context,
                cancellation,
            )
            .await;

        self.vm.put_executive(&dto.transaction.to, executive).await;
        body_result?;

        tx_context.trace.surface_up_error();

        if self.config.publish_debug_events {
            self.event_sink.publish(TransactionExecutedEvent { trace: tx_context.trace.clone() }).await;
        }

        Ok(tx_context.trace)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_body(
        &self,
        dto: &SingleTxExecutingDto,
        executive: &mut dyn Executive,
        internal_chain_context: &mut ChainContext,
        internal_tsc: &mut TieredStateCache,
        tx_context: &mut TransactionContext,
        cancellation: &CancellationToken,
    ) -> ExecutorResult<()> {
        let descriptors = executive.descriptors().clone();
        let run_pre_post = dto.run_plugins && dto.depth == 0;

        if run_pre_post {
            let pre_ok = self
                .run_pre_stage(
                    &descriptors,
                    &*internal_chain_context,
                    &*internal_tsc,
                    &dto.chain_context.state_cache,
                    tx_context,
                    cancellation,
                )
                .await?;
            if !pre_ok {
                tx_context.trace.execution_status = ExecutionStatus::Prefailed;
                return Ok(());
            }
        }

        metrics::record_transaction_executed();
        let apply_outcome = if dto.is_cancellable {
            tokio::select! {
                biased;
                () = cancellation.cancelled() => None,
                result = executive.apply(tx_context) => Some(result),
            }
        } else {
            Some(executive.apply(tx_context).await)
        };

        match apply_outcome {
            None => {
                tx_context.trace.execution_status = ExecutionStatus::Canceled;
                metrics::record_transaction_canceled();
                return Ok(());
            }
            Some(Err(vm_error)) => {
                tx_context.trace.execution_status = ExecutionStatus::ContractError;
                tx_context.trace.push_error(format!("{vm_error}\n"));
                error!(
                    transaction_id = %tx_context.trace.transaction_id.expect("trace carries an id"),
                    %vm_error,
                    "VM execution fault; aborting batch"
                );
                return Err(ExecutorError::VmExecutionError(
                    tx_context.trace.transaction_id.expect("trace carries an id"),
                    vm_error.to_string(),
                    Box::new(tx_context.trace.clone()),
                ));
            }
            Some(Ok(())) => {}
        }

        tx_context.trace.state_set = tx_context.state_cache.materialize();

        if tx_context.trace.is_successful() {
            self.run_inline_transactions(dto, &*internal_tsc, tx_context, cancellation).await?;
        }

        if run_pre_post {
            let post_ok = self
                .run_post_stage(dto, &descriptors, internal_chain_context, internal_tsc, tx_context, cancellation)
                .await?;
            if !post_ok {
                tx_context.trace.execution_status = ExecutionStatus::Postfailed;
            }
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_pre_stage(
        &self,
        descriptors: &ExecutiveDescriptors,
        internal_chain_context: &ChainContext,
        internal_tsc: &TieredStateCache,
        caller_tsc: &TieredStateCache,
        tx_context: &mut TransactionContext,
        cancellation: &CancellationToken,
    ) -> ExecutorResult<bool> {
        for plugin in &self.pre_plugins {
            metrics::record_plugin_invocation();
            let pre_transactions = plugin.get_pre_transactions(descriptors, tx_context).await;
            for pre_tx in pre_transactions {
                let method_name = pre_tx.method_name.clone();
                let pre_dto = SingleTxExecutingDto {
                    depth: 0,
                    chain_context: internal_chain_context.clone(),
                    transaction: pre_tx.clone(),
                    current_block_time: tx_context.current_block_time,
                    origin: Some(tx_context.origin.clone()),
                    is_cancellable: true,
                    run_plugins: false,
                };
                let pre_trace = self.execute(pre_dto, cancellation).await?;
                let pre_succeeded = pre_trace.is_successful();

                if method_name == CHARGE_TRANSACTION_FEES_METHOD {
                    if let Some(fee) = TransactionFee::decode(&pre_trace.return_value) {
                        tx_context.trace.transaction_fee = Some(fee);
                    }
                }

                tx_context.trace.pre_transactions.push(pre_tx);
                tx_context.trace.pre_traces.push(pre_trace);

                if !pre_succeeded {
                    return Ok(false);
                }
                let last_trace = tx_context.trace.pre_traces.last().expect("just pushed");
                internal_tsc.update(&last_trace.flatten_all());
                if caller_tsc.has_parent() {
                    caller_tsc.update(&last_trace.flatten_all());
                }

                if matches!(&tx_context.trace.transaction_fee, Some(fee) if fee.is_failed_to_charge) {
                    // It did run; only the overall pre-stage is considered failed.
                    tx_context.trace.pre_traces.last_mut().expect("just pushed").execution_status =
                        ExecutionStatus::Executed;
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn run_inline_transactions(
        &self,
        dto: &SingleTxExecutingDto,
        internal_tsc: &TieredStateCache,
        tx_context: &mut TransactionContext,
        cancellation: &CancellationToken,
    ) -> ExecutorResult<()> {
        let inline_transactions = tx_context.trace.inline_transactions.clone();

        for inline_tx in inline_transactions {
            let inline_dto = SingleTxExecutingDto {
                depth: dto.depth + 1,
                chain_context: dto.chain_context.with_state_cache(internal_tsc.clone()),
                transaction: inline_tx.clone(),
                current_block_time: tx_context.current_block_time,
                origin: Some(tx_context.origin.clone()),
                is_cancellable: true,
                run_plugins: false,
            };
            let inline_trace = self.execute(inline_dto, cancellation).await?;
            metrics::record_inline_transaction_executed();
            let succeeded = inline_trace.is_successful();

            if !succeeded {
                warn!(
                    method = %inline_tx.method_name,
                    error = %inline_trace.error,
                    "inline transaction failed; halting remaining inline execution"
                );
                tx_context.trace.inline_traces.push(inline_trace);
                break;
            }

            internal_tsc.update(&inline_trace.flatten_all());
            tx_context.trace.inline_traces.push(inline_trace);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_post_stage(
        &self,
        dto: &SingleTxExecutingDto,
        descriptors: &ExecutiveDescriptors,
        internal_chain_context: &mut ChainContext,
        internal_tsc: &mut TieredStateCache,
        tx_context: &mut TransactionContext,
        cancellation: &CancellationToken,
    ) -> ExecutorResult<bool> {
        // On a failed body, roll the internal cache back to the caller's base
        // and re-layer only the successful pre-traces, so post-plugins (and
        // their emitted transactions) never observe the failed body's writes
        // or any inline writes (spec.md §4.8.b).
        if !tx_context.trace.is_successful() {
            let rebuilt = dto.chain_context.state_cache.child();
            for pre_trace in &tx_context.trace.pre_traces {
                if pre_trace.is_successful() {
                    rebuilt.update(&pre_trace.flatten_all());
                }
            }
            *internal_tsc = rebuilt.clone();
            *internal_chain_context = dto.chain_context.with_state_cache(rebuilt.clone());
            tx_context.state_cache = rebuilt;
        }

        for plugin in &self.post_plugins {
            metrics::record_plugin_invocation();
            let post_transactions = plugin.get_post_transactions(descriptors, tx_context).await;
            for post_tx in post_transactions {
                let method_name = post_tx.method_name.clone();
                let post_dto = SingleTxExecutingDto {
                    depth: 0,
                    chain_context: internal_chain_context.clone(),
                    transaction: post_tx.clone(),
                    current_block_time: tx_context.current_block_time,
                    origin: Some(tx_context.origin.clone()),
                    is_cancellable: true,
                    run_plugins: false,
                };
                let post_trace = self.execute(post_dto, cancellation).await?;
                let post_succeeded = post_trace.is_successful();

                if method_name == CHARGE_RESOURCE_TOKEN_METHOD {
                    if let Some(tokens) = ConsumedResourceTokens::decode(&post_trace.return_value) {
                        tx_context.trace.consumed_resource_tokens = Some(tokens);
                    }
                }

                tx_context.trace.post_transactions.push(post_tx);
                tx_context.trace.post_traces.push(post_trace);

                if !post_succeeded {
                    return Ok(false);
                }
                let last_trace = tx_context.trace.post_traces.last().expect("just pushed");
                internal_tsc.update(&last_trace.flatten_all());
            }
        }
        Ok(true)
    }
}
