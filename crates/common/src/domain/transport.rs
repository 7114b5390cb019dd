use crate::domain::result::DomainResult;
use async_trait::async_trait;

/// Cloud twin operations the module needs from the connection layer
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TwinClient: Send + Sync {
    /// Fetch the desired properties currently held by the twin
    async fn current_desired_properties(&self) -> DomainResult<serde_json::Value>;

    /// Push a single reported property to the twin
    async fn push_reported_properties(
        &self,
        key: String,
        value: serde_json::Value,
    ) -> DomainResult<()>;
}

/// Outbound message routing provided by the connection layer
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DownstreamSender: Send + Sync {
    /// Send a message on a named output route
    async fn send_downstream(&self, route: String, payload: bytes::Bytes) -> DomainResult<()>;
}
