use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Configuration owned by this crate (SPEC_FULL.md §4.9). Loading/merging config
/// files is a collaborator concern (spec.md §1 out-of-scope); this struct is the
/// schema the host process deserializes into.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, PartialEq, Eq)]
#[validate(schema(function = "validate_batch_executor_config"))]
pub struct BatchExecutorConfig {
    /// Whether to publish a `TransactionExecuted` event after each single-transaction
    /// execution (spec.md §4.6 step 10: "In debug builds, publish a
    /// TransactionExecuted event"). Modeled as a runtime toggle rather than a
    /// compile-time `cfg` so a library consumer can turn it on without a rebuild.
    pub publish_debug_events: bool,
    /// Upper bound on inline-transaction recursion depth. Not named in spec.md;
    /// an unbounded recursive executor is not a complete implementation. See
    /// DESIGN.md for the rationale.
    pub max_inline_depth: usize,
}

impl Default for BatchExecutorConfig {
    fn default() -> Self {
        Self { publish_debug_events: false, max_inline_depth: 64 }
    }
}

fn validate_batch_executor_config(config: &BatchExecutorConfig) -> Result<(), ValidationError> {
    if config.max_inline_depth == 0 {
        return Err(ValidationError::new("max_inline_depth must be at least 1"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use validator::Validate;

    use super::*;

    #[test]
    fn default_config_is_valid() {
        BatchExecutorConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_inline_depth_is_rejected() {
        let config = BatchExecutorConfig { max_inline_depth: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }
}
