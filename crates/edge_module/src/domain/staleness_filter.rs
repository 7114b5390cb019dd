use chrono::{DateTime, Utc};
use common::domain::{DomainError, DomainResult, EventPayload, TimestampedEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Receives payloads accepted on a channel
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait EventSubscriber: Send + Sync {
    /// Called with the channel lock held; must not block indefinitely
    fn on_event(&self, channel_id: &str, payload: &EventPayload);
}

/// Ordering state of a single channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelState {
    pub last_accepted_utc: DateTime<Utc>,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            last_accepted_utc: DateTime::<Utc>::MIN_UTC,
        }
    }
}

struct Channel {
    state: Mutex<ChannelState>,
    subscribers: Vec<Arc<dyn EventSubscriber>>,
}

impl Channel {
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        // ChannelState is a single Copy value, so a poisoned guard is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drops events that are older than the last accepted event of their channel
///
/// Each channel has its own lock and watermark, so unrelated channels never
/// serialize each other. An event is accepted when its origin time is greater
/// than or equal to the channel watermark; events without an origin time are
/// stamped with the time they are processed.
pub struct StalenessFilter {
    channels: HashMap<String, Channel>,
}

impl StalenessFilter {
    pub fn builder() -> StalenessFilterBuilder {
        StalenessFilterBuilder::default()
    }

    /// Run the staleness check for `event` on `channel_id`
    ///
    /// Returns `Ok(true)` when the event was accepted and fanned out to the
    /// channel subscribers, `Ok(false)` when it was stale and dropped.
    pub fn accept(&self, channel_id: &str, event: &TimestampedEvent) -> DomainResult<bool> {
        let channel = self
            .channels
            .get(channel_id)
            .ok_or_else(|| DomainError::UnknownChannel(channel_id.to_string()))?;

        let mut state = channel.lock();
        let event_utc = event.event_time_or(Utc::now());

        if event_utc < state.last_accepted_utc {
            info!(
                channel = %channel_id,
                original_event_utc = %event_utc.to_rfc3339(),
                last_accepted_utc = %state.last_accepted_utc.to_rfc3339(),
                "ignoring stale event"
            );
            return Ok(false);
        }

        debug!(
            channel = %channel_id,
            original_event_utc = %event_utc.to_rfc3339(),
            previous_utc = %state.last_accepted_utc.to_rfc3339(),
            subscriber_count = channel.subscribers.len(),
            "accepting event"
        );

        state.last_accepted_utc = event_utc;
        for subscriber in &channel.subscribers {
            subscriber.on_event(channel_id, &event.payload);
        }

        Ok(true)
    }

    /// Current watermark of a channel
    pub fn last_accepted(&self, channel_id: &str) -> DomainResult<DateTime<Utc>> {
        self.channels
            .get(channel_id)
            .map(|channel| channel.lock().last_accepted_utc)
            .ok_or_else(|| DomainError::UnknownChannel(channel_id.to_string()))
    }
}

/// Declares channels and their subscribers before the filter goes live
#[derive(Default)]
pub struct StalenessFilterBuilder {
    channels: HashMap<String, Vec<Arc<dyn EventSubscriber>>>,
}

impl StalenessFilterBuilder {
    pub fn declare_channel(&mut self, channel_id: impl Into<String>) -> DomainResult<()> {
        let channel_id = channel_id.into();
        if self.channels.contains_key(&channel_id) {
            return Err(DomainError::DuplicateChannel(channel_id));
        }
        self.channels.insert(channel_id, Vec::new());
        Ok(())
    }

    /// Add a subscriber to a declared channel; subscribers run in the order added
    pub fn subscribe(
        &mut self,
        channel_id: &str,
        subscriber: Arc<dyn EventSubscriber>,
    ) -> DomainResult<()> {
        self.channels
            .get_mut(channel_id)
            .ok_or_else(|| DomainError::UnknownChannel(channel_id.to_string()))?
            .push(subscriber);
        Ok(())
    }

    pub fn build(self) -> StalenessFilter {
        let channels = self
            .channels
            .into_iter()
            .map(|(channel_id, subscribers)| {
                (
                    channel_id,
                    Channel {
                        state: Mutex::new(ChannelState::default()),
                        subscribers,
                    },
                )
            })
            .collect();

        StalenessFilter { channels }
    }
}
