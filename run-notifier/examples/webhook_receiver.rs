//! Minimal receiver for generic webhook notifications.
//!
//! Run:
//!   cargo run -p run-notifier --example webhook_receiver
//!
//! Point a `generic` notification configuration at
//! `http://127.0.0.1:12333/webhook`. When the configuration carries a token,
//! start the receiver with the same value in `WEBHOOK_TOKEN`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use run_notifier::notification::{GenericPayload, PAYLOAD_VERSION};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Debug, Clone)]
struct ReceiverState {
    token: Option<String>,
}

impl ReceiverState {
    fn from_env() -> Self {
        let token = std::env::var("WEBHOOK_TOKEN")
            .ok()
            .and_then(|s| (!s.trim().is_empty()).then_some(s));
        Self { token }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .init();

    let addr: SocketAddr = std::env::var("WEBHOOK_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:12333".to_string())
        .parse()?;

    let state = Arc::new(ReceiverState::from_env());

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/webhook", post(webhook))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    info!(%addr, "webhook receiver listening");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

async fn webhook(
    State(state): State<Arc<ReceiverState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    if let Some(expected) = state.token.as_deref() {
        let provided = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if provided != Some(expected) {
            warn!("rejected notification: missing or invalid bearer token");
            return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
        }
    }

    let payload: GenericPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(%err, "rejected notification: not a generic payload");
            return (StatusCode::BAD_REQUEST, "invalid payload").into_response();
        }
    };

    if payload.payload_version != PAYLOAD_VERSION {
        warn!(
            version = payload.payload_version,
            "received unknown payload version"
        );
    }

    for notification in &payload.notifications {
        info!(
            config_id = %payload.notification_configuration_id,
            run_id = %payload.run_id,
            workspace = %format!("{}/{}", payload.organization_name, payload.workspace_name),
            trigger = %notification.trigger,
            status = %notification.run_status,
            url = %payload.run_url,
            "{}",
            notification.message.as_deref().unwrap_or("notification")
        );
    }

    StatusCode::NO_CONTENT.into_response()
}
