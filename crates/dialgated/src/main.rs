//! dialgated - dialgate daemon
//!
//! Serves provider webhooks and the call placement API.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dialgate_core::{
    telemetry, CallOrchestrator, EventPublisher, OrchestratorConfig, TracingCompletionLog,
    WebhookIngest,
};
use dialgate_queue::{BrokerConfig, BrokerConnection};
use dialgated::config::Args;
use dialgated::{router, AppState};
use tracing::{info, warn};
use twilio_voice::TwilioClient;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; the environment may already be populated.
    dotenvy::dotenv().ok();
    let args = Args::parse();
    telemetry::init_tracing(args.json, args.log_level());

    let broker_config = BrokerConfig::from_env();
    let connection = Arc::new(
        BrokerConnection::from_config(&broker_config)
            .await
            .with_context(|| format!("failed to connect to broker at {}", broker_config.url))?,
    );
    let telephony = Arc::new(TwilioClient::from_env().context("Twilio is not configured")?);

    let orchestrator_config = OrchestratorConfig::from_env();
    info!(
        race_timeout_secs = orchestrator_config.race_timeout.as_secs(),
        "orchestrator configured"
    );
    let orchestrator = CallOrchestrator::new(
        telephony,
        connection.clone(),
        Arc::new(TracingCompletionLog),
        orchestrator_config,
    );
    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        ingest: WebhookIngest::new(EventPublisher::new(connection.clone())),
    };

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    info!(listen = %args.listen, "dialgated listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Err(e) = connection.close().await {
        warn!(error = %e, "broker close failed");
    }
    info!("dialgated stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
