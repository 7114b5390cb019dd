use common::domain::{
    ConfigurationDocument, DesiredPropertiesEnvelope, DomainResult, ReconcileOutcome, TwinClient,
    CONFIGURATION_KEY,
};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

/// Receives the new configuration after it replaced the held document
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait ConfigurationSubscriber: Send + Sync {
    fn on_configuration_changed(&self, configuration: &ConfigurationDocument);
}

/// Whether the cloud twin has seen the held document
struct ReportState {
    in_sync: bool,
}

/// Reconciles desired twin configuration with the locally applied one
///
/// Flow for a patch carrying a configuration:
/// 1. Compare with the held document by value
/// 2. On change, swap the held document
/// 3. Notify local subscribers
/// 4. Push the new document to the twin as reported properties
///
/// Calls are serialized; a second patch waits until the first has finished
/// pushing. A failed push leaves the local document applied and is retried by
/// the next patch.
pub struct TwinReconciler {
    current: RwLock<Arc<ConfigurationDocument>>,
    report_state: Mutex<ReportState>,
    subscribers: Vec<Arc<dyn ConfigurationSubscriber>>,
    twin_client: Arc<dyn TwinClient>,
}

impl TwinReconciler {
    pub fn new(
        twin_client: Arc<dyn TwinClient>,
        subscribers: Vec<Arc<dyn ConfigurationSubscriber>>,
    ) -> Self {
        Self {
            current: RwLock::new(Arc::new(ConfigurationDocument::default())),
            report_state: Mutex::new(ReportState { in_sync: true }),
            subscribers,
            twin_client,
        }
    }

    /// Snapshot of the applied configuration
    pub fn current(&self) -> Arc<ConfigurationDocument> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    #[instrument(skip_all)]
    pub async fn apply_desired(
        &self,
        patch: DesiredPropertiesEnvelope,
    ) -> DomainResult<ReconcileOutcome> {
        let mut report_state = self.report_state.lock().await;
        self.reconcile(&mut report_state, patch).await
    }

    /// Read the twin's desired properties and reconcile them
    ///
    /// The read happens under the reconcile lock, so a patch applied meanwhile
    /// cannot be overwritten by an older snapshot.
    #[instrument(skip_all)]
    pub async fn sync_from_twin(&self) -> DomainResult<ReconcileOutcome> {
        let mut report_state = self.report_state.lock().await;
        let desired = self.twin_client.current_desired_properties().await?;
        let patch = DesiredPropertiesEnvelope::from_patch(&desired)?;
        self.reconcile(&mut report_state, patch).await
    }

    async fn reconcile(
        &self,
        report_state: &mut ReportState,
        patch: DesiredPropertiesEnvelope,
    ) -> DomainResult<ReconcileOutcome> {
        let Some(configuration) = patch.configuration else {
            debug!("desired properties contain no configuration, skipping");
            return Ok(ReconcileOutcome::unchanged());
        };

        let current = self.current();

        if *current == configuration {
            debug!(configuration = %current, "desired configuration unchanged");
            if report_state.in_sync {
                return Ok(ReconcileOutcome::unchanged());
            }
            info!("retrying reported properties push for unchanged configuration");
            let reported = self.push_reported(&current).await?;
            report_state.in_sync = reported;
            return Ok(ReconcileOutcome {
                changed: false,
                reported,
            });
        }

        info!(
            previous = %current,
            next = %configuration,
            "desired configuration differs from current, applying"
        );

        let configuration = Arc::new(configuration);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&configuration);
        report_state.in_sync = false;

        for subscriber in &self.subscribers {
            subscriber.on_configuration_changed(&configuration);
        }
        debug!("local notification complete, updating reported properties");

        let reported = self.push_reported(&configuration).await?;
        report_state.in_sync = reported;

        Ok(ReconcileOutcome {
            changed: true,
            reported,
        })
    }

    /// Push the document as reported properties; `Ok(false)` when the push failed
    async fn push_reported(&self, configuration: &ConfigurationDocument) -> DomainResult<bool> {
        let value = serde_json::Value::String(configuration.to_json_string()?);

        match self
            .twin_client
            .push_reported_properties(CONFIGURATION_KEY.to_string(), value)
            .await
        {
            Ok(()) => {
                info!("reported properties updated");
                Ok(true)
            }
            Err(e) => {
                error!(error = %e, "failed to push reported properties");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{DomainError, MockTwinClient};
    use serde_json::json;

    fn document(value: serde_json::Value) -> ConfigurationDocument {
        ConfigurationDocument::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_apply_same_configuration_twice_notifies_and_pushes_once() {
        // Arrange
        let mut mock_twin = MockTwinClient::new();
        mock_twin
            .expect_push_reported_properties()
            .withf(|key: &String, value: &serde_json::Value| {
                key == "Configuration" && value == &json!(r#"{"mode":"fruit"}"#)
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let mut mock_subscriber = MockConfigurationSubscriber::new();
        mock_subscriber
            .expect_on_configuration_changed()
            .withf(|doc: &ConfigurationDocument| doc.get("mode") == Some(&json!("fruit")))
            .times(1)
            .return_const(());

        let reconciler = TwinReconciler::new(Arc::new(mock_twin), vec![Arc::new(mock_subscriber)]);
        let patch = DesiredPropertiesEnvelope::with_configuration(document(json!({"mode": "fruit"})));

        // Act
        let first = reconciler.apply_desired(patch.clone()).await.unwrap();
        let second = reconciler.apply_desired(patch).await.unwrap();

        // Assert
        assert_eq!(
            first,
            ReconcileOutcome {
                changed: true,
                reported: true
            }
        );
        assert_eq!(second, ReconcileOutcome::unchanged());
        assert_eq!(reconciler.current().get("mode"), Some(&json!("fruit")));
    }

    #[tokio::test]
    async fn test_patch_without_configuration_is_noop() {
        let mut mock_twin = MockTwinClient::new();
        mock_twin.expect_push_reported_properties().times(0);
        let mut mock_subscriber = MockConfigurationSubscriber::new();
        mock_subscriber.expect_on_configuration_changed().times(0);

        let reconciler = TwinReconciler::new(Arc::new(mock_twin), vec![Arc::new(mock_subscriber)]);

        let outcome = reconciler
            .apply_desired(DesiredPropertiesEnvelope::default())
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::unchanged());
        assert!(reconciler.current().is_empty());
    }

    #[tokio::test]
    async fn test_empty_configuration_matches_initial_document() {
        let mut mock_twin = MockTwinClient::new();
        mock_twin.expect_push_reported_properties().times(0);

        let reconciler = TwinReconciler::new(Arc::new(mock_twin), Vec::new());

        let outcome = reconciler
            .apply_desired(DesiredPropertiesEnvelope::with_configuration(
                ConfigurationDocument::default(),
            ))
            .await
            .unwrap();

        assert!(!outcome.changed);
    }

    #[tokio::test]
    async fn test_notification_happens_before_push() {
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut mock_twin = MockTwinClient::new();
        let push_events = Arc::clone(&events);
        mock_twin
            .expect_push_reported_properties()
            .times(1)
            .returning(move |_, _| {
                push_events.lock().unwrap().push("push");
                Ok(())
            });

        let mut mock_subscriber = MockConfigurationSubscriber::new();
        let notify_events = Arc::clone(&events);
        mock_subscriber
            .expect_on_configuration_changed()
            .times(1)
            .returning(move |_| notify_events.lock().unwrap().push("notify"));

        let reconciler = TwinReconciler::new(Arc::new(mock_twin), vec![Arc::new(mock_subscriber)]);

        reconciler
            .apply_desired(DesiredPropertiesEnvelope::with_configuration(document(
                json!({"brightness": 10}),
            )))
            .await
            .unwrap();

        assert_eq!(*events.lock().unwrap(), vec!["notify", "push"]);
    }

    #[tokio::test]
    async fn test_failed_push_keeps_document_and_retries_on_next_patch() {
        // Arrange
        let mut mock_twin = MockTwinClient::new();
        let mut seq = mockall::Sequence::new();
        mock_twin
            .expect_push_reported_properties()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Err(DomainError::TransportError(anyhow::anyhow!(
                    "broker unavailable"
                )))
            });
        mock_twin
            .expect_push_reported_properties()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let mut mock_subscriber = MockConfigurationSubscriber::new();
        mock_subscriber
            .expect_on_configuration_changed()
            .times(1)
            .return_const(());

        let reconciler = TwinReconciler::new(Arc::new(mock_twin), vec![Arc::new(mock_subscriber)]);
        let patch = DesiredPropertiesEnvelope::with_configuration(document(json!({"mode": "lcd"})));

        // Act
        let first = reconciler.apply_desired(patch.clone()).await.unwrap();
        let second = reconciler.apply_desired(patch.clone()).await.unwrap();
        let third = reconciler.apply_desired(patch).await.unwrap();

        // Assert
        assert_eq!(
            first,
            ReconcileOutcome {
                changed: true,
                reported: false
            }
        );
        assert_eq!(
            second,
            ReconcileOutcome {
                changed: false,
                reported: true
            }
        );
        assert_eq!(third, ReconcileOutcome::unchanged());
        assert_eq!(reconciler.current().get("mode"), Some(&json!("lcd")));
    }

    #[tokio::test]
    async fn test_changed_configuration_replaces_document() {
        let mut mock_twin = MockTwinClient::new();
        mock_twin
            .expect_push_reported_properties()
            .times(2)
            .returning(|_, _| Ok(()));

        let reconciler = TwinReconciler::new(Arc::new(mock_twin), Vec::new());
        let before = reconciler.current();

        reconciler
            .apply_desired(DesiredPropertiesEnvelope::with_configuration(document(
                json!({"mode": "a"}),
            )))
            .await
            .unwrap();
        let outcome = reconciler
            .apply_desired(DesiredPropertiesEnvelope::with_configuration(document(
                json!({"mode": "b"}),
            )))
            .await
            .unwrap();

        assert!(outcome.changed);
        assert!(before.is_empty());
        assert_eq!(reconciler.current().get("mode"), Some(&json!("b")));
    }

    #[tokio::test]
    async fn test_concurrent_patches_are_serialized() {
        let mut mock_twin = MockTwinClient::new();
        mock_twin
            .expect_push_reported_properties()
            .times(1)
            .returning(|_, _| Ok(()));
        let mut mock_subscriber = MockConfigurationSubscriber::new();
        mock_subscriber
            .expect_on_configuration_changed()
            .times(1)
            .return_const(());

        let reconciler = Arc::new(TwinReconciler::new(
            Arc::new(mock_twin),
            vec![Arc::new(mock_subscriber)],
        ));
        let patch = DesiredPropertiesEnvelope::with_configuration(document(json!({"mode": "x"})));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let reconciler = Arc::clone(&reconciler);
                let patch = patch.clone();
                tokio::spawn(async move { reconciler.apply_desired(patch).await.unwrap() })
            })
            .collect();

        let mut changed = 0;
        for task in tasks {
            if task.await.unwrap().changed {
                changed += 1;
            }
        }

        assert_eq!(changed, 1);
    }

    #[tokio::test]
    async fn test_sync_from_twin_applies_desired_configuration() {
        // Arrange
        let mut mock_twin = MockTwinClient::new();
        mock_twin
            .expect_current_desired_properties()
            .times(1)
            .returning(|| Ok(json!({"Configuration": {"mode": "boot"}, "$version": 1})));
        mock_twin
            .expect_push_reported_properties()
            .times(1)
            .returning(|_, _| Ok(()));

        let reconciler = TwinReconciler::new(Arc::new(mock_twin), Vec::new());

        // Act
        let outcome = reconciler.sync_from_twin().await.unwrap();

        // Assert
        assert!(outcome.changed);
        assert_eq!(reconciler.current().get("mode"), Some(&json!("boot")));
    }

    #[tokio::test]
    async fn test_sync_from_twin_after_newer_patch_keeps_it() {
        let mut mock_twin = MockTwinClient::new();
        mock_twin
            .expect_current_desired_properties()
            .times(1)
            .returning(|| Ok(json!({"Configuration": {"mode": "new"}})));
        mock_twin
            .expect_push_reported_properties()
            .times(1)
            .returning(|_, _| Ok(()));

        let reconciler = TwinReconciler::new(Arc::new(mock_twin), Vec::new());
        reconciler
            .apply_desired(DesiredPropertiesEnvelope::with_configuration(document(
                json!({"mode": "new"}),
            )))
            .await
            .unwrap();

        let outcome = reconciler.sync_from_twin().await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::unchanged());
        assert_eq!(reconciler.current().get("mode"), Some(&json!("new")));
    }

    #[tokio::test]
    async fn test_sync_from_twin_read_failure() {
        let mut mock_twin = MockTwinClient::new();
        mock_twin
            .expect_current_desired_properties()
            .times(1)
            .returning(|| Err(DomainError::TransportError(anyhow::anyhow!("twin unavailable"))));
        mock_twin.expect_push_reported_properties().times(0);

        let reconciler = TwinReconciler::new(Arc::new(mock_twin), Vec::new());

        let result = reconciler.sync_from_twin().await;

        assert!(matches!(result, Err(DomainError::TransportError(_))));
        assert!(reconciler.current().is_empty());
    }
}
