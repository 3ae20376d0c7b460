//! Process wiring: config -> storage -> channel -> provider ->
//! dispatcher -> webhook server. Also the `doctor` and `broadcast`
//! one-shot commands.

use crate::broadcast::run_broadcast;
use crate::config::RelayConfig;
use crate::dispatcher::Dispatcher;
use crate::ingress::Ingress;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json, Router};
use relay_channels::{
    ChannelAdapter, OutboundMessage, WhatsAppCloudAdapter, parse_webhook_payload, verify_webhook,
};
use relay_provider::{CommandSurface, SurfaceProvider};
use relay_store::{SenderKey, Storage};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Egress over a channel adapter. The sanitized sender key doubles as
/// the platform recipient id: WhatsApp ids are digit strings, which
/// sanitization leaves untouched.
struct ChannelEgress {
    channel: Arc<dyn ChannelAdapter>,
}

#[async_trait]
impl crate::dispatcher::Egress for ChannelEgress {
    async fn deliver(&self, sender: &SenderKey, text: &str) -> Result<()> {
        self.channel
            .send(
                sender.as_str(),
                OutboundMessage {
                    content: text.to_string(),
                },
            )
            .await
    }
}

struct AppState {
    ingress: Ingress,
    verify_token: String,
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = RelayConfig::load(config_path).await?;

    // Storage failures here are configuration errors: fatal, no
    // recovery.
    let storage = Arc::new(
        Storage::open(&cfg.storage.base_dir)
            .with_context(|| format!("open storage at {}", cfg.storage.base_dir.display()))?,
    );

    let whatsapp: Arc<dyn ChannelAdapter> = Arc::new(WhatsAppCloudAdapter::new(
        &cfg.whatsapp.access_token,
        &cfg.whatsapp.phone_number_id,
    )?);

    let surface = CommandSurface::new(
        cfg.provider.submit_command.clone(),
        cfg.provider.observe_command.clone(),
    )
    .context("provider.submit_command and provider.observe_command are required to serve")?;
    let provider = SurfaceProvider::new(surface, cfg.provider.response_policy())?;

    let dispatcher = Arc::new(Dispatcher::new(
        storage.clone(),
        Arc::new(provider),
        Arc::new(ChannelEgress {
            channel: whatsapp.clone(),
        }),
        cfg.general.system_prompt.clone(),
        cfg.provider.idle_delay(),
    ));
    let dispatch_handle = dispatcher.spawn();
    let ingress = Ingress::new(storage.clone(), dispatch_handle);

    let state = Arc::new(AppState {
        ingress,
        verify_token: cfg.whatsapp.verify_token.clone(),
    });
    let app = Router::new()
        .route("/webhook", get(webhook_verify).post(webhook_receive))
        .layer(Extension(state));

    let addr = format!("0.0.0.0:{}", cfg.whatsapp.webhook_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind webhook listener on {addr}"))?;
    tracing::info!(%addr, base_dir = %cfg.storage.base_dir.display(), "relaybot serving");
    axum::serve(listener, app).await.context("webhook server")?;
    Ok(())
}

#[tracing::instrument(level = "info", skip_all)]
async fn webhook_verify(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let challenge = verify_webhook(
        params.get("hub.mode").map(String::as_str),
        params.get("hub.verify_token").map(String::as_str),
        params.get("hub.challenge").map(String::as_str),
        &state.verify_token,
    );
    match challenge {
        Some(challenge) => (StatusCode::OK, challenge),
        None => {
            tracing::warn!("webhook verification rejected");
            (StatusCode::FORBIDDEN, "verification failed".to_string())
        }
    }
}

#[tracing::instrument(level = "info", skip_all)]
async fn webhook_receive(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> StatusCode {
    for inbound in parse_webhook_payload(&payload) {
        if let Err(error) = state.ingress.on_inbound(&inbound) {
            // 200 regardless: the platform retries whole deliveries,
            // and a durable-write failure is logged, not re-ingested.
            tracing::error!(%error, sender = %inbound.sender_id, "failed to queue inbound message");
        }
    }
    StatusCode::OK
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = RelayConfig::load(config_path).await?;
    let storage = Storage::open(&cfg.storage.base_dir)
        .with_context(|| format!("open storage at {}", cfg.storage.base_dir.display()))?;
    let pending = storage.queue.pending()?;

    println!("config: ok");
    println!("storage: {}", cfg.storage.base_dir.display());
    println!("pending queue records: {pending}");
    println!(
        "provider harness: submit={:?} observe={:?}",
        cfg.provider.submit_command, cfg.provider.observe_command
    );
    println!("broadcast recipients: {}", cfg.broadcast.recipients.len());
    Ok(())
}

pub async fn broadcast(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = RelayConfig::load(config_path).await?;
    if cfg.broadcast.recipients.is_empty() {
        println!("broadcast: no recipients configured");
        return Ok(());
    }
    let storage = Storage::open(&cfg.storage.base_dir)
        .with_context(|| format!("open storage at {}", cfg.storage.base_dir.display()))?;
    let whatsapp =
        WhatsAppCloudAdapter::new(&cfg.whatsapp.access_token, &cfg.whatsapp.phone_number_id)?;

    let report = run_broadcast(
        &storage,
        &whatsapp,
        &cfg.broadcast.recipients,
        &cfg.broadcast.message,
    )
    .await;
    println!(
        "broadcast: sent={} skipped={} failed={}",
        report.sent, report.skipped, report.failed
    );
    Ok(())
}
