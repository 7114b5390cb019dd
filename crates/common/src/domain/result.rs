use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Channel already registered: {0}")]
    DuplicateChannel(String),

    #[error("Unknown invocation: {0}")]
    UnknownInvocation(String),

    #[error("Invocation already registered: {0}")]
    DuplicateInvocation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transport error: {0}")]
    TransportError(#[from] anyhow::Error),
}

impl DomainError {
    /// True for malformed inbound payloads, which callers drop rather than retry
    pub fn is_decode_error(&self) -> bool {
        matches!(self, DomainError::DecodeError(_))
    }
}
