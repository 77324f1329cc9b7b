use dec_core::errors::GatewayError;

/// Turn-level failure. Per-command and per-document problems never surface
/// here; they are reported as data inside the turn output.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("turn aborted")]
    Aborted,

    #[error("{0}")]
    Internal(String),
}
