//! Webhook HTTP server: one endpoint per provider plus the internal pre-normalized entry.

use crate::ai::{OllamaClient, OllamaConversationEngine};
use crate::channels::{
    self, AdapterRegistry, DeviceCredentials, InboundMessage, Provider, RejectReason, WahaSender,
    WablasSender, WhacenterSender,
};
use crate::command::CommandInterceptor;
use crate::compose::ResponseComposer;
use crate::config::{self, Config};
use crate::dispatch::Dispatcher;
use crate::engine::{spawn_workers, Engine, SubmitError, WorkQueue};
use crate::gateway::protocol::{Ack, AckStatus};
use crate::guard::{ExecutionLock, InMemoryExecutionLockStore, InMemorySessionLockStore, SessionLock};
use crate::services::{BuiltinDeviceCommands, InMemoryConversationRepository, NoFlows};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared state for the webhook handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub queue: WorkQueue,
}

/// Assemble the pipeline with the in-process collaborators and the provider adapters, and
/// register every configured device.
pub async fn build_engine(config: &Config) -> Engine {
    let registry = Arc::new(AdapterRegistry::new());
    registry.register(Arc::new(WablasSender::new())).await;
    registry.register(Arc::new(WhacenterSender::new())).await;
    registry.register(Arc::new(WahaSender::new())).await;
    for device in &config.devices {
        registry.register_device(DeviceCredentials::from(device)).await;
        log::info!("gateway: device {} via {}", device.id, device.provider);
    }

    let conversations = Arc::new(InMemoryConversationRepository::new());
    let ai = OllamaConversationEngine::new(
        OllamaClient::new(config::resolve_ollama_url(config)),
        config.agents.default_model.clone(),
        config.agents.system_prompt.clone(),
    );
    let dispatcher = Dispatcher::new(
        Arc::new(NoFlows),
        Arc::new(ai),
        conversations.clone(),
        Arc::new(BuiltinDeviceCommands::new(conversations.clone())),
        SessionLock::new(Arc::new(InMemorySessionLockStore::new())),
    );
    Engine::new(
        CommandInterceptor::new(conversations),
        ExecutionLock::new(Arc::new(InMemoryExecutionLockStore::new())),
        dispatcher,
        ResponseComposer::new(registry, config.dispatch.send_delay()),
    )
}

/// Routes for the given state. Exposed so callers can serve them with their own engine.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/webhook/wablas/:device_id", post(wablas_webhook))
        .route("/webhook/whacenter/:device_id", post(whacenter_webhook))
        .route("/webhook/waha/:device_id", post(waha_webhook))
        .route("/webhook/internal/:provider/:device_id", post(internal_webhook))
        .with_state(state)
}

pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    log::info!("gateway: using config {}", config_path.display());
    let engine = Arc::new(build_engine(&config).await);
    let (queue, workers) = spawn_workers(
        engine,
        config.dispatch.queue_capacity,
        config.dispatch.workers,
    );

    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let state = GatewayState {
        config: Arc::new(config),
        queue,
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;

    // The router (and with it the last queue sender) is gone; let workers drain what is queued.
    for h in workers {
        let _ = h.await;
    }
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining work queue");
}

type AckResponse = (StatusCode, Json<Ack>);

fn reject(provider: Provider, device_id: &str, reason: RejectReason) -> AckResponse {
    match &reason {
        RejectReason::Malformed(e) => {
            log::warn!("webhook: malformed {} payload for {}: {}", provider, device_id, e)
        }
        other => log::debug!("webhook: {} message for {} ignored: {}", provider, device_id, other),
    }
    (StatusCode::OK, Json(Ack::ignored(reason.to_string())))
}

/// Hand a normalized message to the workers and build the acknowledgment.
fn submit(state: &GatewayState, msg: InboundMessage, accepted: AckStatus) -> AckResponse {
    let key = msg.key();
    match state.queue.submit(msg) {
        Ok(()) => {
            log::debug!("webhook: queued message for {}", key);
            (StatusCode::OK, Json(Ack::new(accepted)))
        }
        Err(SubmitError::Full) => {
            log::warn!("webhook: work queue full, asking gateway to retry {}", key);
            (StatusCode::SERVICE_UNAVAILABLE, Json(Ack::new(AckStatus::Busy)))
        }
        Err(SubmitError::Closed) => {
            log::warn!("webhook: shutting down, dropping message for {}", key);
            (StatusCode::SERVICE_UNAVAILABLE, Json(Ack::new(AckStatus::Busy)))
        }
    }
}

fn provider_webhook(
    state: &GatewayState,
    provider: Provider,
    device_id: &str,
    body: &[u8],
    accepted: AckStatus,
) -> AckResponse {
    match channels::normalize(provider, device_id, body) {
        Ok(msg) => submit(state, msg, accepted),
        Err(reason) => reject(provider, device_id, reason),
    }
}

/// POST /webhook/wablas/:device_id
async fn wablas_webhook(
    State(state): State<GatewayState>,
    Path(device_id): Path<String>,
    body: Bytes,
) -> AckResponse {
    provider_webhook(&state, Provider::Wablas, &device_id, &body, AckStatus::Received)
}

/// POST /webhook/whacenter/:device_id
async fn whacenter_webhook(
    State(state): State<GatewayState>,
    Path(device_id): Path<String>,
    body: Bytes,
) -> AckResponse {
    provider_webhook(&state, Provider::Whacenter, &device_id, &body, AckStatus::Received)
}

/// POST /webhook/waha/:device_id
async fn waha_webhook(
    State(state): State<GatewayState>,
    Path(device_id): Path<String>,
    body: Bytes,
) -> AckResponse {
    provider_webhook(&state, Provider::Waha, &device_id, &body, AckStatus::Success)
}

/// POST /webhook/internal/:provider/:device_id with an already-normalized field map.
async fn internal_webhook(
    State(state): State<GatewayState>,
    Path((provider, device_id)): Path<(String, String)>,
    body: Bytes,
) -> AckResponse {
    let Some(provider) = Provider::parse(&provider) else {
        log::debug!("webhook: unknown provider {:?} on internal entry", provider);
        return (
            StatusCode::OK,
            Json(Ack::ignored(format!("unknown provider: {}", provider))),
        );
    };
    let fields: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return reject(provider, &device_id, RejectReason::Malformed(e.to_string())),
    };
    match channels::from_normalized(provider, &device_id, fields) {
        Ok(msg) => submit(&state, msg, AckStatus::Received),
        Err(reason) => reject(provider, &device_id, reason),
    }
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
        "devices": state.config.devices.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
    }))
}
