//! Optional, debug-only event bus collaborator (spec.md §6).

use async_trait::async_trait;
#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::trace::TransactionTrace;

#[derive(Debug)]
pub struct TransactionExecutedEvent {
    pub trace: TransactionTrace,
}

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: TransactionExecutedEvent);
}

/// Default used when the host process doesn't wire up an event bus.
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn publish(&self, _event: TransactionExecutedEvent) {}
}
