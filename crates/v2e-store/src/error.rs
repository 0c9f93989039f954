#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store open timed out")]
    OpenTimeout,
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("failed to encode/decode record: {0}")]
    Encode(String),
    #[error("checkpoint urn is invalid: {0}")]
    InvalidUrn(String),
}
