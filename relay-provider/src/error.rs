use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("timed out after {elapsed_ms}ms waiting for a completion")]
    Timeout { elapsed_ms: u64 },

    #[error("chat surface error: {0}")]
    Surface(String),

    #[error("chat surface produced an empty completion")]
    EmptyCompletion,
}
