use common::domain::{ConfigurationDocument, EventPayload, OrientationState};
use edge_module::domain::{ConfigurationSubscriber, EventSubscriber};
use std::sync::{Mutex, PoisonError};
use tracing::info;

/// What the display currently shows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayState {
    pub fruit: Option<String>,
    pub orientation: Option<OrientationState>,
    pub configuration: ConfigurationDocument,
}

/// Display stand-in that renders accepted events and configuration to the log
#[derive(Default)]
pub struct LoggingDisplay {
    state: Mutex<DisplayState>,
}

impl LoggingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> DisplayState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSubscriber for LoggingDisplay {
    fn on_event(&self, channel_id: &str, payload: &EventPayload) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match payload {
            EventPayload::FruitSeen(fruit) => state.fruit = Some(fruit.clone()),
            EventPayload::Orientation(orientation) => state.orientation = Some(*orientation),
        }
        info!(
            channel = %channel_id,
            fruit = state.fruit.as_deref().unwrap_or("-"),
            orientation = %state.orientation.map(|o| o.as_str()).unwrap_or("-"),
            "display updated"
        );
    }
}

impl ConfigurationSubscriber for LoggingDisplay {
    fn on_configuration_changed(&self, configuration: &ConfigurationDocument) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.configuration = configuration.clone();
        info!(configuration = %configuration, "display configuration applied");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_tracks_latest_values() {
        let display = LoggingDisplay::new();

        display.on_event("fruit", &EventPayload::FruitSeen("apple".to_string()));
        display.on_event("orientation", &EventPayload::Orientation(OrientationState::RightSideUp));
        display.on_event("fruit", &EventPayload::FruitSeen("pear".to_string()));

        let state = display.snapshot();
        assert_eq!(state.fruit.as_deref(), Some("pear"));
        assert_eq!(state.orientation, Some(OrientationState::RightSideUp));
    }

    #[test]
    fn test_display_applies_configuration() {
        let display = LoggingDisplay::new();
        let configuration = ConfigurationDocument::from_value(json!({"backlight": true})).unwrap();

        display.on_configuration_changed(&configuration);

        assert_eq!(display.snapshot().configuration, configuration);
    }
}
