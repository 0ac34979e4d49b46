//! Bot run loop: wire the manager invoker, dispatcher and Telegram channel together,
//! receive updates by long-poll or webhook, and shut down cleanly on SIGINT/SIGTERM.

use crate::channels::{ChannelError, ChannelHandle, InboundMessage, TelegramChannel, TelegramUpdate};
use crate::commands::Dispatcher;
use crate::config::{Settings, Transport};
use crate::exec::ManagerCli;
use crate::routing::ConversationRouter;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Header Telegram uses to echo the webhook secret.
pub const SECRET_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";

const INBOUND_QUEUE: usize = 64;

#[derive(Clone)]
struct WebhookState {
    inbound_tx: mpsc::Sender<InboundMessage>,
    secret: Option<String>,
}

/// HTTP app for webhook mode: `POST /telegram/webhook` and `GET /` health.
pub fn webhook_app(inbound_tx: mpsc::Sender<InboundMessage>, secret: Option<String>) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/telegram/webhook", post(telegram_webhook))
        .with_state(WebhookState { inbound_tx, secret })
}

/// Run the bot until a shutdown signal arrives.
pub async fn run_bot(settings: Settings) -> Result<()> {
    log::info!(
        "starting manager bot: {} admin(s), manager binary {}",
        settings.allow_list.len(),
        settings.manager_binary.display()
    );
    let telegram = Arc::new(TelegramChannel::new(settings.bot_token.clone()));
    let username = telegram
        .get_me()
        .await
        .context("checking bot token with getMe")?;
    log::info!("authorized as @{}", username);

    let runner = Arc::new(ManagerCli::new(&settings.manager_binary));
    let dispatcher = Arc::new(
        Dispatcher::new(settings.allow_list.clone(), runner, settings.timeouts)
            .with_bot_username(username),
    );
    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(INBOUND_QUEUE);

    let router = ConversationRouter::new(dispatcher, telegram.clone());
    let router_task = tokio::spawn(router.run(inbound_rx));

    let outcome: Result<(), ChannelError> = match settings.transport {
        Transport::LongPoll => {
            // getUpdates is refused while a webhook is registered.
            if let Err(e) = telegram.delete_webhook().await {
                log::warn!("telegram deleteWebhook before polling failed: {}", e);
            }
            let mut poll_task = telegram.clone().start_inbound(inbound_tx);
            let finished = tokio::select! {
                _ = shutdown_signal() => None,
                polled = &mut poll_task => Some(polled),
            };
            let polled = match finished {
                Some(polled) => polled,
                None => {
                    telegram.stop();
                    poll_task.await
                }
            };
            match polled {
                Ok(result) => result,
                Err(e) => {
                    log::warn!("telegram poll task failed: {}", e);
                    Ok(())
                }
            }
        }
        Transport::Webhook {
            url,
            secret,
            bind,
            port,
        } => {
            telegram
                .set_webhook(&url, secret.as_deref())
                .await
                .context("registering telegram webhook")?;
            log::info!("telegram webhook registered: {}", url);

            let app = webhook_app(inbound_tx, secret);
            let bind_addr = format!("{}:{}", bind, port);
            let listener = tokio::net::TcpListener::bind(&bind_addr)
                .await
                .with_context(|| format!("binding to {}", bind_addr))?;
            log::info!("webhook listener on {}", bind_addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("webhook server exited")?;
            if let Err(e) = telegram.delete_webhook().await {
                log::debug!("telegram deleteWebhook on shutdown: {}", e);
            }
            Ok(())
        }
    };

    log::info!("waiting for in-flight commands");
    let _ = router_task.await;
    outcome.context("telegram polling stopped")?;
    log::info!("manager bot stopped");
    Ok(())
}

/// Completes on SIGINT or SIGTERM.
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
    log::info!("shutdown signal received");
}

/// POST /telegram/webhook: verify the optional secret and queue the message.
async fn telegram_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(ref expected) = state.secret {
        let provided = headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != expected.as_str() {
            log::warn!("webhook request with wrong secret rejected");
            return StatusCode::FORBIDDEN;
        }
    }
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(_) => return StatusCode::BAD_REQUEST,
    };
    let Some(inbound) = update.to_inbound() else {
        return StatusCode::OK;
    };
    if state.inbound_tx.send(inbound).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// GET / returns a simple health JSON (for probes).
async fn health_http() -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "transport": "webhook",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
