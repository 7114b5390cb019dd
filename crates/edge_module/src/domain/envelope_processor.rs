use crate::domain::{StalenessFilter, TwinReconciler};
use async_trait::async_trait;
use common::domain::{parse_envelope, DesiredPropertiesEnvelope, DomainResult, PayloadKind};
use std::sync::Arc;
use tracing::debug;

/// Decodes an inbound payload and routes it into the module state
///
/// Input routes and invocation handlers share processors, so a channel
/// message and a direct method for the same channel take the same path.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EnvelopeProcessor: Send + Sync {
    async fn process(&self, payload: &[u8]) -> DomainResult<()>;
}

/// Feeds decoded sensor events into one staleness filter channel
pub struct ChannelEnvelopeProcessor {
    kind: PayloadKind,
    channel_id: String,
    filter: Arc<StalenessFilter>,
}

impl ChannelEnvelopeProcessor {
    pub fn new(kind: PayloadKind, channel_id: impl Into<String>, filter: Arc<StalenessFilter>) -> Self {
        Self {
            kind,
            channel_id: channel_id.into(),
            filter,
        }
    }
}

#[async_trait]
impl EnvelopeProcessor for ChannelEnvelopeProcessor {
    async fn process(&self, payload: &[u8]) -> DomainResult<()> {
        let event = parse_envelope(self.kind, payload)?;

        match event.origin_event_utc {
            Some(at) => debug!(
                channel = %self.channel_id,
                original_event_utc = %at.to_rfc3339(),
                "processing {} message", self.kind.field_name()
            ),
            None => debug!(
                channel = %self.channel_id,
                "message has no time, using current time"
            ),
        }

        // A stale event is a normal outcome, not a failure
        let accepted = self.filter.accept(&self.channel_id, &event)?;
        debug!(channel = %self.channel_id, accepted, "staleness check complete");

        Ok(())
    }
}

/// Feeds desired-properties patches into the twin reconciler
pub struct DesiredPropertiesProcessor {
    reconciler: Arc<TwinReconciler>,
}

impl DesiredPropertiesProcessor {
    pub fn new(reconciler: Arc<TwinReconciler>) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl EnvelopeProcessor for DesiredPropertiesProcessor {
    async fn process(&self, payload: &[u8]) -> DomainResult<()> {
        let patch = DesiredPropertiesEnvelope::from_slice(payload)?;
        let outcome = self.reconciler.apply_desired(patch).await?;
        debug!(changed = outcome.changed, "desired properties processed");
        Ok(())
    }
}
