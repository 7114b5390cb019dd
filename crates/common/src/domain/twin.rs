use crate::domain::result::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Twin property key holding the device configuration
pub const CONFIGURATION_KEY: &str = "Configuration";

/// Device configuration as held in the twin
///
/// The fields are defined by the deployment, so the document is kept as an
/// opaque JSON object and compared by value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigurationDocument(serde_json::Map<String, serde_json::Value>);

impl ConfigurationDocument {
    /// Build a document from a JSON value, which must be an object
    pub fn from_value(value: serde_json::Value) -> DomainResult<Self> {
        match value {
            serde_json::Value::Object(fields) => Ok(Self(fields)),
            other => Err(DomainError::DecodeError(format!(
                "{} must be a JSON object, got {}",
                CONFIGURATION_KEY, other
            ))),
        }
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.0.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json_string(&self) -> DomainResult<String> {
        serde_json::to_string(&self.0)
            .map_err(|e| DomainError::DecodeError(format!("failed to encode configuration: {}", e)))
    }
}

impl fmt::Display for ConfigurationDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", serde_json::Value::Object(self.0.clone()))
    }
}

/// Desired properties decoded from a cloud twin patch
///
/// `configuration` is `None` when the patch does not carry a configuration,
/// which means there is nothing to reconcile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredPropertiesEnvelope {
    pub configuration: Option<ConfigurationDocument>,
}

impl DesiredPropertiesEnvelope {
    pub fn with_configuration(configuration: ConfigurationDocument) -> Self {
        Self {
            configuration: Some(configuration),
        }
    }

    /// Decode a desired-properties patch
    ///
    /// Other top-level keys (versions, metadata) are ignored. A `null`
    /// configuration is a merge-patch deletion and carries nothing to reconcile.
    pub fn from_patch(patch: &serde_json::Value) -> DomainResult<Self> {
        let properties = patch.as_object().ok_or_else(|| {
            DomainError::DecodeError(format!(
                "desired properties patch must be a JSON object, got {}",
                patch
            ))
        })?;

        let configuration = properties
            .get(CONFIGURATION_KEY)
            .filter(|value| !value.is_null())
            .cloned()
            .map(ConfigurationDocument::from_value)
            .transpose()?;

        Ok(Self { configuration })
    }

    /// Decode a desired-properties patch from raw JSON bytes
    pub fn from_slice(bytes: &[u8]) -> DomainResult<Self> {
        let patch: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| {
            DomainError::DecodeError(format!("invalid desired properties patch: {}", e))
        })?;
        Self::from_patch(&patch)
    }
}

/// Result of reconciling a desired-properties patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileOutcome {
    /// The held configuration was replaced
    pub changed: bool,
    /// Reported properties were pushed to the cloud twin during this call
    pub reported: bool,
}

impl ReconcileOutcome {
    pub fn unchanged() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_patch_with_configuration() {
        let patch = json!({
            "Configuration": { "displayMode": "fruit", "brightness": 80 },
            "$version": 4
        });

        let envelope = DesiredPropertiesEnvelope::from_patch(&patch).unwrap();

        let configuration = envelope.configuration.unwrap();
        assert_eq!(configuration.get("brightness"), Some(&json!(80)));
        assert_eq!(configuration.get("displayMode"), Some(&json!("fruit")));
    }

    #[test]
    fn test_from_patch_without_configuration() {
        let envelope = DesiredPropertiesEnvelope::from_patch(&json!({ "$version": 5 })).unwrap();
        assert!(envelope.configuration.is_none());
    }

    #[test]
    fn test_from_patch_null_configuration() {
        let envelope =
            DesiredPropertiesEnvelope::from_patch(&json!({ "Configuration": null, "$version": 6 }))
                .unwrap();
        assert!(envelope.configuration.is_none());
    }

    #[test]
    fn test_from_patch_configuration_not_object() {
        let result = DesiredPropertiesEnvelope::from_patch(&json!({ "Configuration": "on" }));
        assert!(matches!(result, Err(DomainError::DecodeError(_))));
    }

    #[test]
    fn test_from_patch_not_object() {
        let result = DesiredPropertiesEnvelope::from_patch(&json!([1, 2, 3]));
        assert!(matches!(result, Err(DomainError::DecodeError(_))));
    }

    #[test]
    fn test_from_slice_invalid_json() {
        let result = DesiredPropertiesEnvelope::from_slice(b"{\"Configuration\":");
        assert!(matches!(result, Err(DomainError::DecodeError(_))));
    }

    #[test]
    fn test_documents_compare_by_value() {
        let a = ConfigurationDocument::from_value(json!({ "a": 1, "b": [1, 2] })).unwrap();
        let b = ConfigurationDocument::from_value(json!({ "b": [1, 2], "a": 1 })).unwrap();
        let c = ConfigurationDocument::from_value(json!({ "a": 2, "b": [1, 2] })).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_to_json_string() {
        let doc = ConfigurationDocument::from_value(json!({ "mode": "lcd" })).unwrap();
        assert_eq!(doc.to_json_string().unwrap(), r#"{"mode":"lcd"}"#);
    }

    #[test]
    fn test_default_document_is_empty() {
        assert!(ConfigurationDocument::default().is_empty());
    }
}
