use crate::domain::{
    ChannelEnvelopeProcessor, ConfigurationSubscriber, DesiredPropertiesProcessor,
    EdgeModuleConfig, EnvelopeProcessor, EventSubscriber, InvocationDispatcher, StalenessFilter,
    TwinReconciler, FRUIT_CHANNEL, ORIENTATION_CHANNEL,
};
use chrono::{DateTime, Utc};
use common::domain::{
    ConfigurationDocument, DesiredPropertiesEnvelope, DomainError, DomainResult,
    DownstreamSender, InvocationRequest, InvocationResponse, PayloadKind, ReconcileOutcome,
    TwinClient, STATUS_INTERNAL_ERROR, STATUS_NOT_FOUND,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Collects subscribers and collaborators for an [`EdgeModule`]
pub struct EdgeModuleBuilder {
    config: EdgeModuleConfig,
    twin_client: Arc<dyn TwinClient>,
    downstream: Arc<dyn DownstreamSender>,
    fruit_subscribers: Vec<Arc<dyn EventSubscriber>>,
    orientation_subscribers: Vec<Arc<dyn EventSubscriber>>,
    configuration_subscribers: Vec<Arc<dyn ConfigurationSubscriber>>,
}

impl EdgeModuleBuilder {
    pub fn new(
        config: EdgeModuleConfig,
        twin_client: Arc<dyn TwinClient>,
        downstream: Arc<dyn DownstreamSender>,
    ) -> Self {
        Self {
            config,
            twin_client,
            downstream,
            fruit_subscribers: Vec::new(),
            orientation_subscribers: Vec::new(),
            configuration_subscribers: Vec::new(),
        }
    }

    pub fn with_fruit_subscriber(mut self, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.fruit_subscribers.push(subscriber);
        self
    }

    pub fn with_orientation_subscriber(mut self, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.orientation_subscribers.push(subscriber);
        self
    }

    pub fn with_configuration_subscriber(
        mut self,
        subscriber: Arc<dyn ConfigurationSubscriber>,
    ) -> Self {
        self.configuration_subscribers.push(subscriber);
        self
    }

    /// Declare channels, register input routes and invocation handlers
    ///
    /// The returned module is not ready until [`EdgeModule::start`] completes.
    pub fn build(self) -> DomainResult<EdgeModule> {
        let mut filter_builder = StalenessFilter::builder();
        filter_builder.declare_channel(FRUIT_CHANNEL)?;
        filter_builder.declare_channel(ORIENTATION_CHANNEL)?;
        for subscriber in self.fruit_subscribers {
            filter_builder.subscribe(FRUIT_CHANNEL, subscriber)?;
        }
        for subscriber in self.orientation_subscribers {
            filter_builder.subscribe(ORIENTATION_CHANNEL, subscriber)?;
        }
        let filter = Arc::new(filter_builder.build());

        let reconciler = Arc::new(TwinReconciler::new(
            self.twin_client,
            self.configuration_subscribers,
        ));

        let fruit: Arc<dyn EnvelopeProcessor> = Arc::new(ChannelEnvelopeProcessor::new(
            PayloadKind::FruitSeen,
            FRUIT_CHANNEL,
            Arc::clone(&filter),
        ));
        let orientation: Arc<dyn EnvelopeProcessor> = Arc::new(ChannelEnvelopeProcessor::new(
            PayloadKind::Orientation,
            ORIENTATION_CHANNEL,
            Arc::clone(&filter),
        ));

        let mut inputs: HashMap<String, Arc<dyn EnvelopeProcessor>> = HashMap::new();
        for (route, processor) in [
            (&self.config.fruit_input_route, &fruit),
            (&self.config.orientation_input_route, &orientation),
        ] {
            if inputs.insert(route.clone(), Arc::clone(processor)).is_some() {
                return Err(DomainError::InvalidConfig(format!(
                    "input route '{}' is assigned to more than one channel",
                    route
                )));
            }
        }

        let mut dispatcher = InvocationDispatcher::new();
        dispatcher.register(self.config.set_fruit_method.clone(), fruit)?;
        dispatcher.register(self.config.set_orientation_method.clone(), orientation)?;

        debug!(
            module_id = %self.config.module_id,
            input_routes = ?inputs.keys().collect::<Vec<_>>(),
            "edge module built"
        );

        Ok(EdgeModule {
            desired_processor: DesiredPropertiesProcessor::new(Arc::clone(&reconciler)),
            config: self.config,
            filter,
            reconciler,
            dispatcher,
            inputs,
            downstream: self.downstream,
            ready: AtomicBool::new(false),
        })
    }
}

/// Composition root wiring the staleness filter, twin reconciler and
/// invocation dispatcher to the external connection
///
/// All entry points take `&self` and may be called concurrently.
pub struct EdgeModule {
    config: EdgeModuleConfig,
    filter: Arc<StalenessFilter>,
    reconciler: Arc<TwinReconciler>,
    dispatcher: InvocationDispatcher,
    inputs: HashMap<String, Arc<dyn EnvelopeProcessor>>,
    desired_processor: DesiredPropertiesProcessor,
    downstream: Arc<dyn DownstreamSender>,
    ready: AtomicBool,
}

impl EdgeModule {
    pub fn builder(
        config: EdgeModuleConfig,
        twin_client: Arc<dyn TwinClient>,
        downstream: Arc<dyn DownstreamSender>,
    ) -> EdgeModuleBuilder {
        EdgeModuleBuilder::new(config, twin_client, downstream)
    }

    pub fn config(&self) -> &EdgeModuleConfig {
        &self.config
    }

    /// Sync with the twin, announce the module and mark it ready
    #[instrument(skip(self), fields(module_id = %self.config.module_id))]
    pub async fn start(&self) -> DomainResult<()> {
        let outcome = self.reconciler.sync_from_twin().await?;
        info!(changed = outcome.changed, "initial twin sync complete");

        self.announce_loaded().await;

        self.ready.store(true, Ordering::SeqCst);
        info!("edge module ready");
        Ok(())
    }

    /// Send the module-loaded message on every configured route
    async fn announce_loaded(&self) {
        let message = serde_json::json!({ "ModuleName": self.config.module_id }).to_string();
        let payload = bytes::Bytes::from(message);

        let sends = self.config.module_loaded_routes.iter().map(|route| {
            let payload = payload.clone();
            async move {
                (
                    route,
                    self.downstream.send_downstream(route.clone(), payload).await,
                )
            }
        });

        for (route, result) in futures::future::join_all(sends).await {
            match result {
                Ok(()) => debug!(route = %route, "module loaded message sent"),
                Err(e) => error!(route = %route, error = %e, "failed to send module loaded message"),
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Process a message delivered on an input route
    #[instrument(skip(self, payload), fields(payload_size = payload.len()))]
    pub async fn handle_input(&self, route: &str, payload: &[u8]) -> DomainResult<()> {
        let processor = self
            .inputs
            .get(route)
            .ok_or_else(|| DomainError::UnknownChannel(route.to_string()))?;
        processor.process(payload).await
    }

    /// Dispatch a remote invocation; never fails past this boundary
    pub async fn handle_invocation(&self, request: &InvocationRequest) -> InvocationResponse {
        match self.dispatcher.dispatch(request).await {
            Ok(response) => response,
            Err(e @ DomainError::UnknownInvocation(_)) => {
                error!(invocation = %request.name, error = %e, "no handler registered for invocation");
                InvocationResponse::error(STATUS_NOT_FOUND, e.to_string())
            }
            Err(e) => {
                error!(invocation = %request.name, error = %e, "invocation dispatch failed");
                InvocationResponse::error(STATUS_INTERNAL_ERROR, e.to_string())
            }
        }
    }

    /// Reconcile a desired-properties patch from the twin
    pub async fn handle_desired_properties(
        &self,
        patch: &serde_json::Value,
    ) -> DomainResult<ReconcileOutcome> {
        self.reconciler
            .apply_desired(DesiredPropertiesEnvelope::from_patch(patch)?)
            .await
    }

    /// Reconcile a desired-properties patch received as raw JSON
    pub async fn handle_desired_properties_bytes(&self, payload: &[u8]) -> DomainResult<()> {
        self.desired_processor.process(payload).await
    }

    pub fn current_configuration(&self) -> Arc<ConfigurationDocument> {
        self.reconciler.current()
    }

    pub fn last_accepted(&self, channel_id: &str) -> DomainResult<DateTime<Utc>> {
        self.filter.last_accepted(channel_id)
    }
}
