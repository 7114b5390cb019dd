use crate::mqtt::mqtt_client::{MqttTransportConfig, MqttTwinClient};
use crate::mqtt::topic::{parse_topic, InboundTopic};
use crate::EdgeModule;
use async_trait::async_trait;
use common::domain::{DomainError, DomainResult, InvocationRequest, InvocationResponse};
use rumqttc::{Event, EventLoop, Packet, Publish};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument, Span};

/// Connection-side effects of handling an inbound message
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MqttResponder: Send + Sync {
    /// Publish the acknowledgement of a method request
    async fn respond_to_method(
        &self,
        request_id: String,
        response: InvocationResponse,
    ) -> DomainResult<()>;

    /// Fold a desired-properties patch into the cached twin document
    fn record_desired(&self, patch: &serde_json::Value);
}

/// Routes inbound publishes to their handlers
///
/// Desired-properties patches go through a single worker in delivery order;
/// inputs and method requests each run on their own task.
struct MessageRouter {
    module: Arc<EdgeModule>,
    responder: Arc<dyn MqttResponder>,
    topic_prefix: String,
    desired_tx: mpsc::UnboundedSender<Publish>,
    desired_worker: JoinHandle<()>,
}

impl MessageRouter {
    fn new(module: Arc<EdgeModule>, responder: Arc<dyn MqttResponder>, topic_prefix: String) -> Self {
        let (desired_tx, mut desired_rx) = mpsc::unbounded_channel::<Publish>();

        let worker_module = Arc::clone(&module);
        let worker_responder = Arc::clone(&responder);
        let worker_prefix = topic_prefix.clone();
        let desired_worker = tokio::spawn(async move {
            while let Some(publish) = desired_rx.recv().await {
                handle_mqtt_message(
                    &worker_module,
                    worker_responder.as_ref(),
                    &worker_prefix,
                    &publish.topic,
                    &publish.payload,
                )
                .await;
            }
        });

        Self {
            module,
            responder,
            topic_prefix,
            desired_tx,
            desired_worker,
        }
    }

    fn route(&self, publish: Publish) {
        if let Ok(InboundTopic::DesiredProperties) = parse_topic(&self.topic_prefix, &publish.topic)
        {
            if let Err(e) = self.desired_tx.send(publish) {
                error!(error = %e, "desired properties worker stopped, dropping patch");
            }
            return;
        }

        let module = Arc::clone(&self.module);
        let responder = Arc::clone(&self.responder);
        let prefix = self.topic_prefix.clone();
        tokio::spawn(async move {
            handle_mqtt_message(
                &module,
                responder.as_ref(),
                &prefix,
                &publish.topic,
                &publish.payload,
            )
            .await;
        });
    }

    /// Let queued patches finish within `grace`, then stop the worker
    async fn shutdown(self, grace: Duration) {
        drop(self.desired_tx);
        let mut worker = self.desired_worker;
        if tokio::time::timeout(grace, &mut worker).await.is_err() {
            warn!("desired properties worker did not finish in time, aborting");
            worker.abort();
        }
    }
}

/// Queue subscriptions after a ConnAck; a failure waits for the next ConnAck
fn subscribe_on_connect(client: &MqttTwinClient) -> bool {
    match client.subscribe_all() {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "failed to queue MQTT subscriptions, retrying on next connection");
            false
        }
    }
}

/// Drive the MQTT connection for an edge module until cancelled
///
/// Subscribes after every ConnAck and starts the module after the first one.
/// Consecutive connection errors are retried with a delay; the function fails
/// once `max_retry_attempts` is reached.
#[instrument(
    name = "mqtt_module",
    skip_all,
    fields(
        module_id = %module.config().module_id,
        topic_prefix = %config.topic_prefix,
    )
)]
pub async fn run_mqtt_module(
    module: Arc<EdgeModule>,
    client: Arc<MqttTwinClient>,
    mut eventloop: EventLoop,
    config: MqttTransportConfig,
    shutdown_token: CancellationToken,
) -> DomainResult<()> {
    info!(broker_url = %config.broker_url, "starting MQTT module connection");

    let responder: Arc<dyn MqttResponder> = client.clone();
    let router = MessageRouter::new(Arc::clone(&module), responder, config.topic_prefix.clone());
    let mut retry_count = 0;
    let mut started = false;

    let result = loop {
        tokio::select! {
            _ = shutdown_token.cancelled() => {
                debug!("shutdown signal received");
                client.disconnect().await;
                break Ok(());
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        router.route(publish);
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("connected to MQTT broker");
                        retry_count = 0;
                        subscribe_on_connect(&client);

                        if !started {
                            started = true;
                            let module = Arc::clone(&module);
                            tokio::spawn(async move {
                                if let Err(e) = module.start().await {
                                    error!(error = %e, "failed to start edge module");
                                }
                            });
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        debug!("subscription acknowledged");
                    }
                    Ok(Event::Incoming(Packet::PingResp)) => {
                        // Ping response - connection is healthy
                    }
                    Ok(_) => {
                        // Other events (outgoing, etc.)
                    }
                    Err(e) => {
                        error!(error = %e, "MQTT connection error");

                        retry_count += 1;
                        if retry_count >= config.max_retry_attempts {
                            error!(
                                max_retries = config.max_retry_attempts,
                                "max retry attempts reached, stopping MQTT module connection"
                            );
                            break Err(DomainError::TransportError(anyhow::anyhow!(
                                "MQTT connection failed after {} attempts: {}",
                                retry_count,
                                e
                            )));
                        }

                        warn!(
                            attempt = retry_count,
                            max_attempts = config.max_retry_attempts,
                            "retrying MQTT connection"
                        );

                        // Wait before retry with cancellation check
                        tokio::select! {
                            _ = shutdown_token.cancelled() => break Ok(()),
                            _ = tokio::time::sleep(config.retry_delay()) => {}
                        }
                    }
                }
            }
        }
    };

    router.shutdown(config.retry_delay()).await;
    info!("MQTT module connection stopped");
    result
}

/// Handle an incoming MQTT message
///
/// Creates a new independent trace for each message (not nested under the connection trace).
pub(crate) async fn handle_mqtt_message(
    module: &EdgeModule,
    responder: &dyn MqttResponder,
    topic_prefix: &str,
    topic: &str,
    payload: &[u8],
) {
    let span = info_span!(
        parent: Span::none(),
        "mqtt_message",
        topic = %topic,
        payload_size = payload.len(),
        kind = tracing::field::Empty,
    );

    async {
        let parsed = match parse_topic(topic_prefix, topic) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to parse MQTT topic, skipping message");
                return;
            }
        };

        match parsed {
            InboundTopic::Input { route } => {
                Span::current().record("kind", "input");
                match module.handle_input(&route, payload).await {
                    Ok(()) => debug!(route = %route, "input processed"),
                    Err(e) if e.is_decode_error() => {
                        warn!(route = %route, error = %e, "dropping malformed input message")
                    }
                    Err(e) => error!(route = %route, error = %e, "failed to process input message"),
                }
            }
            InboundTopic::Method { name, request_id } => {
                Span::current().record("kind", "method");
                let request = InvocationRequest::new(name, payload.to_vec());
                let response = module.handle_invocation(&request).await;
                debug!(
                    invocation = %request.name,
                    request_id = %request_id,
                    status_code = response.status_code,
                    "invocation handled"
                );
                if let Err(e) = responder.respond_to_method(request_id, response).await {
                    error!(error = %e, "failed to publish method response");
                }
            }
            InboundTopic::DesiredProperties => {
                Span::current().record("kind", "desired_properties");
                let patch: serde_json::Value = match serde_json::from_slice(payload) {
                    Ok(patch) => patch,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed desired properties patch");
                        return;
                    }
                };
                responder.record_desired(&patch);
                match module.handle_desired_properties_bytes(payload).await {
                    Ok(()) => debug!("desired properties handled"),
                    Err(e) if e.is_decode_error() => {
                        warn!(error = %e, "dropping undecodable desired properties patch")
                    }
                    Err(e) => error!(error = %e, "failed to reconcile desired properties"),
                }
            }
        }
    }
    .instrument(span)
    .await
}
