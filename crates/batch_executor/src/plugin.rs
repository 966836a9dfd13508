//! Pre/post plugin collaborator contract and the deduplication rule
//! (spec.md §4.8, §8 invariant 5).

use async_trait::async_trait;

use crate::transaction::{Transaction, TransactionContext};
use crate::vm::ExecutiveDescriptors;

/// Method name special-cased by the pre-stage to decode a [`crate::trace::TransactionFee`]
/// off its return value (spec.md §4.8.a step 3).
pub const CHARGE_TRANSACTION_FEES_METHOD: &str = "ChargeTransactionFees";
/// Method name special-cased by the post-stage to decode a
/// [`crate::trace::ConsumedResourceTokens`] off its return value (spec.md §4.8.b step 2).
pub const CHARGE_RESOURCE_TOKEN_METHOD: &str = "ChargeResourceToken";

/// Not `mockall`-automocked for the same reason as [`crate::vm::VirtualMachine`]:
/// `TransactionContext` isn't `Debug`. Test doubles implement this trait by hand.
#[async_trait]
pub trait PrePlugin: Send + Sync {
    /// Identifies this plugin's *type* for the dedup rule — exactly one
    /// instance per distinct plugin type is ever invoked (spec.md §4.8,
    /// first-seen-in-input-order wins).
    fn plugin_type(&self) -> &'static str;

    async fn get_pre_transactions(
        &self,
        descriptors: &ExecutiveDescriptors,
        tx_context: &TransactionContext,
    ) -> Vec<Transaction>;
}

#[async_trait]
pub trait PostPlugin: Send + Sync {
    fn plugin_type(&self) -> &'static str;

    async fn get_post_transactions(
        &self,
        descriptors: &ExecutiveDescriptors,
        tx_context: &TransactionContext,
    ) -> Vec<Transaction>;
}

/// Keeps the first-seen instance of each distinct plugin type, preserving
/// input order (spec.md §4.8, §8 invariant 5).
pub fn dedup_pre_plugins(plugins: Vec<std::sync::Arc<dyn PrePlugin>>) -> Vec<std::sync::Arc<dyn PrePlugin>> {
    let mut seen = std::collections::HashSet::new();
    plugins.into_iter().filter(|p| seen.insert(p.plugin_type())).collect()
}

pub fn dedup_post_plugins(plugins: Vec<std::sync::Arc<dyn PostPlugin>>) -> Vec<std::sync::Arc<dyn PostPlugin>> {
    let mut seen = std::collections::HashSet::new();
    plugins.into_iter().filter(|p| seen.insert(p.plugin_type())).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;

    struct Dummy(&'static str);

    #[async_trait]
    impl PrePlugin for Dummy {
        fn plugin_type(&self) -> &'static str {
            self.0
        }

        async fn get_pre_transactions(
            &self,
            _descriptors: &ExecutiveDescriptors,
            _tx_context: &TransactionContext,
        ) -> Vec<Transaction> {
            Vec::new()
        }
    }

    #[test]
    fn dedup_keeps_first_seen_in_order() {
        let plugins: Vec<Arc<dyn PrePlugin>> =
            vec![Arc::new(Dummy("x")), Arc::new(Dummy("y")), Arc::new(Dummy("x"))];
        let deduped = dedup_pre_plugins(plugins);
        let types: Vec<_> = deduped.iter().map(|p| p.plugin_type()).collect();
        assert_eq!(types, vec!["x", "y"]);
    }
}
