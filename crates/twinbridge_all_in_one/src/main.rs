mod config;
mod display;

use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig, TelemetryProviders};
use config::ServiceConfig;
use display::LoggingDisplay;
use edge_module::mqtt::{create_mqtt_client, run_mqtt_module};
use edge_module::EdgeModule;
use std::sync::Arc;
use tracing::{debug, error, info};
use twinbridge_runner::Runner;

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize telemetry (tracing + OpenTelemetry for traces and logs)
    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
        json_logs: config.json_logs,
    }) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        broker_url = %config.mqtt_broker_url,
        module_id = %config.module_id,
        "Starting twinbridge edge module"
    );
    debug!("Configuration: {:?}", config);

    let mqtt_config = config.mqtt_transport_config();
    let (mqtt_client, eventloop) = match create_mqtt_client(&mqtt_config) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create MQTT client: {}", e);
            std::process::exit(1);
        }
    };

    let display = Arc::new(LoggingDisplay::new());
    let module = match EdgeModule::builder(
        config.edge_module_config(),
        mqtt_client.clone(),
        mqtt_client.clone(),
    )
    .with_fruit_subscriber(display.clone())
    .with_orientation_subscriber(display.clone())
    .with_configuration_subscriber(display)
    .build()
    {
        Ok(module) => Arc::new(module),
        Err(e) => {
            error!("Failed to build edge module: {}", e);
            std::process::exit(1);
        }
    };

    let runner = Runner::new()
        .with_named_process("mqtt_module", move |ctx| async move {
            run_mqtt_module(module, mqtt_client, eventloop, mqtt_config, ctx)
                .await
                .map_err(anyhow::Error::from)
        })
        .with_closer(move || async move {
            info!("Running cleanup tasks...");
            // Shutdown telemetry and flush pending traces and logs
            shutdown_telemetry(telemetry_providers);
            info!("Cleanup complete");
            Ok(())
        })
        .with_closer_timeout(config.shutdown_timeout());

    if runner.run().await.is_err() {
        std::process::exit(1);
    }
}
