//! Process lifecycle (§4.J): ordered startup, shared state, graceful shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use relay_core::{envelope, ConnectionRegistry, KeyRegistry, RoomCoordinator, Store};
use relay_crypto::RsaKeyPair;
use tokio::sync::Mutex;

use crate::config::RelayConfig;
use crate::http;
use crate::metrics::Metrics;
use crate::rate_limit::RateLimiter;

/// RSA key size generated at startup (§4.F).
const RSA_KEY_BITS: usize = 2048;

/// Grace period allowed for in-flight sessions to drain on shutdown.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

/// Shared state reachable from every HTTP/WebSocket handler and the
/// pub/sub fan-out task.
pub struct AppState {
    pub config: RelayConfig,
    pub keypair: Arc<RsaKeyPair>,
    pub store: Arc<Store>,
    pub connections: Arc<ConnectionRegistry>,
    pub keys: Arc<KeyRegistry>,
    pub rooms: Arc<RoomCoordinator>,
    pub rate_limiter: Mutex<RateLimiter>,
    pub metrics: Metrics,
    pub accepting: AtomicBool,
}

/// Bring up every dependency in order and serve until a shutdown signal
/// arrives, then drain in-flight sessions for up to [`SHUTDOWN_DRAIN`].
pub async fn run(config: RelayConfig) -> anyhow::Result<()> {
    relay_crypto::init()?;
    tracing::info!("generating process RSA keypair ({RSA_KEY_BITS} bits)");
    let keypair = Arc::new(RsaKeyPair::generate(RSA_KEY_BITS)?);

    tracing::info!(url = %config.store_url, "connecting to shared store");
    let store = Arc::new(Store::connect(&config.store_url, Duration::from_secs(config.store_timeout_secs)).await?);

    let connections = Arc::new(ConnectionRegistry::new());
    let keys = Arc::new(KeyRegistry::new());
    let rooms = Arc::new(RoomCoordinator::new(
        store.clone(),
        connections.clone(),
        keys.clone(),
        config.room_key_prefix.clone(),
        Duration::from_secs(config.room_ttl_secs),
        config.default_room_limit,
    ));

    let state = Arc::new(AppState {
        rate_limiter: Mutex::new(RateLimiter::new(config.rate_limit_per_sec)),
        metrics: Metrics::new(),
        accepting: AtomicBool::new(true),
        config,
        keypair,
        store,
        connections,
        keys,
        rooms,
    });

    let pubsub_task = tokio::spawn(run_pubsub(state.clone()));

    let addr: std::net::SocketAddr = state.config.bind_addr.parse()?;
    let app = http::router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.accepting.store(false, Ordering::SeqCst);
    tracing::info!("shutting down, draining in-flight sessions for up to {:?}", SHUTDOWN_DRAIN);
    tokio::time::sleep(SHUTDOWN_DRAIN).await;
    pubsub_task.abort();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Subscribe once at startup and fan published signal envelopes out to
/// whichever local clients hold a key for that room (§4.G).
async fn run_pubsub(state: Arc<AppState>) {
    let mut stream = match state.store.subscribe(&state.config.pubsub_channel).await {
        Ok(stream) => Box::pin(stream),
        Err(error) => {
            tracing::error!(%error, "failed to subscribe to pub/sub channel, fan-out disabled");
            return;
        }
    };

    while let Some(raw) = stream.next().await {
        if let Err(error) = handle_pubsub_frame(&state, &raw).await {
            tracing::warn!(%error, "dropping unprocessable pub/sub frame");
        }
    }
}

async fn handle_pubsub_frame(state: &AppState, raw: &[u8]) -> anyhow::Result<()> {
    let (envelope, ciphertext) = envelope::decode_pubsub_envelope(raw)?;

    // The instance that originated this frame already delivered the raw
    // ciphertext to its own local members via the direct broadcast in
    // `RoomCoordinator::fanout`. Every instance (including that one)
    // subscribes to the same channel, so skip re-delivery whenever the
    // sender is one of our own connections.
    if state.connections.get(&envelope.data.sender).is_some() {
        return Ok(());
    }

    for client_id in state.keys.clients_in_room(&envelope.room) {
        let Some(key) = state.keys.get(&envelope.room, &client_id) else {
            continue;
        };
        match envelope::decrypt_signal(&ciphertext, &key) {
            Ok(msg) => match serde_json::to_vec(&msg) {
                Ok(payload) => {
                    if !state.rooms.send_to(&client_id, &relay_core::OutboundFrame::Text(payload)).await? {
                        tracing::debug!(client_id = %client_id, "recipient not locally connected");
                    }
                }
                Err(error) => tracing::warn!(%error, "failed to re-serialize decrypted pub/sub frame"),
            },
            Err(error) => tracing::warn!(%error, client_id = %client_id, "failed to decrypt pub/sub frame for recipient"),
        }
    }
    Ok(())
}
