use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    #[error("Unsupported charset: {0}")]
    UnsupportedCharset(String),
    #[error("pop_string called without a matching push_buffer")]
    UnbalancedBuffer,
}
