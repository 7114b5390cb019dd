use crate::domain::EnvelopeProcessor;
use common::domain::{
    DomainError, DomainResult, InvocationRequest, InvocationResponse, STATUS_BAD_REQUEST,
    STATUS_INTERNAL_ERROR,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// Maps remote invocation names to the processors that handle them
#[derive(Default)]
pub struct InvocationDispatcher {
    handlers: HashMap<String, Arc<dyn EnvelopeProcessor>>,
}

impl InvocationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn EnvelopeProcessor>,
    ) -> DomainResult<()> {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(DomainError::DuplicateInvocation(name));
        }
        debug!(invocation = %name, "registered invocation handler");
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Run the handler for `request.name` and build the acknowledgement
    ///
    /// Handler failures become error responses (decode errors 400, anything
    /// else 500). Only an unregistered name is returned as `Err`.
    #[instrument(skip(self, request), fields(invocation = %request.name, payload_size = request.payload.len()))]
    pub async fn dispatch(&self, request: &InvocationRequest) -> DomainResult<InvocationResponse> {
        let handler = self
            .handlers
            .get(&request.name)
            .ok_or_else(|| DomainError::UnknownInvocation(request.name.clone()))?;

        match handler.process(&request.payload).await {
            Ok(()) => {
                debug!("invocation executed");
                Ok(InvocationResponse::executed(&request.name))
            }
            Err(e) if e.is_decode_error() => {
                warn!(error = %e, "invocation payload rejected");
                Ok(InvocationResponse::error(STATUS_BAD_REQUEST, e.to_string()))
            }
            Err(e) => {
                error!(error = %e, "invocation handler failed");
                Ok(InvocationResponse::error(STATUS_INTERNAL_ERROR, e.to_string()))
            }
        }
    }
}
