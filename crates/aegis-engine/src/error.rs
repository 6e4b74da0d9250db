use aegis_core::errors::GatewayError;
use aegis_store::StoreError;

/// Failures that end an audit session abnormally. Everything else is fed
/// back to the reasoner as text.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("step budget exhausted after {steps} steps")]
    BudgetExhausted { steps: u32 },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Session ended without a verdict and may be retried on a later run.
    pub fn leaves_pending(&self) -> bool {
        matches!(self, Self::Gateway(_) | Self::BudgetExhausted { .. })
    }
}
