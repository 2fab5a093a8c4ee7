//! HTTP/WebSocket surface (§4.I): `/ws` upgrade, `/pubkey`, `/health`,
//! `/metrics`, fronted by permissive CORS and a per-IP rate limit.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use relay_crypto::KeyFormat;
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::server::AppState;
use crate::session;

/// Build the full axum router over `state`.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/pubkey", get(pubkey))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_guard))
        .layer(cors)
        .with_state(state)
}

async fn rate_limit_guard(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let allowed = state.rate_limiter.lock().await.check(addr.ip());
    if allowed {
        next.run(request).await
    } else {
        (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response()
    }
}

async fn ws_upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| session::handle_connection(state, socket))
}

#[derive(Serialize)]
struct PubkeyResponse {
    pem: String,
    base64: String,
    #[serde(rename = "keyType")]
    key_type: &'static str,
}

async fn pubkey(State(state): State<Arc<AppState>>) -> Response {
    let pem = state.keypair.serialize_public_key(KeyFormat::Pem);
    let base64 = state.keypair.serialize_public_key(KeyFormat::SpkiBase64);
    match (pem, base64) {
        (Ok(pem), Ok(base64)) => Json(PubkeyResponse { pem, base64, key_type: "RSA" }).into_response(),
        (pem, base64) => {
            let error = pem.err().or(base64.err()).unwrap();
            tracing::error!(%error, "failed to serialize public key");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": error.to_string()}))).into_response()
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    let accepting = state.accepting.load(std::sync::atomic::Ordering::SeqCst);
    let status = if accepting { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(json!({
            "status": if accepting { "ok" } else { "draining" },
            "connections": state.connections.len(),
        })),
    )
        .into_response()
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    (StatusCode::OK, state.metrics.render()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pubkey_response_uses_documented_field_names() {
        let body = PubkeyResponse { pem: "pem-bytes".into(), base64: "b64-bytes".into(), key_type: "RSA" };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["pem"], "pem-bytes");
        assert_eq!(value["base64"], "b64-bytes");
        assert_eq!(value["keyType"], "RSA");
    }
}
