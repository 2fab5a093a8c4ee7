//! Per-connection signaling session (§4.F): init handshake, dispatch
//! loop, and disconnect cleanup.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::{SinkExt, StreamExt};
use relay_core::{
    envelope, registry::OUTBOUND_CHANNEL_CAPACITY, InitMessage, OutboundFrame, OutgoingFrame, SignalMessage,
    SignalType,
};
use relay_crypto::rsa;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

use crate::server::AppState;

/// How long a fresh connection has to send its init frame.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Drive one WebSocket connection end to end.
pub async fn handle_connection(state: Arc<AppState>, socket: WebSocket) {
    let (ws_sink, mut ws_stream) = socket.split();
    let (out_tx, out_rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_CHANNEL_CAPACITY);
    let writer = tokio::spawn(run_writer(ws_sink, out_rx));

    if let Err(error) = run_session(state, &mut ws_stream, out_tx).await {
        tracing::warn!(%error, "session ended");
    }

    let _ = writer.await;
}

/// Dedicated writer task: the sole place that writes to this socket, so
/// the broadcaster, the session's own replies, and the pub/sub router
/// never race each other on the same connection (§9 Open Question #4).
async fn run_writer(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<OutboundFrame>,
) {
    while let Some(frame) = rx.recv().await {
        let message = match frame {
            OutboundFrame::Text(bytes) => Message::Text(String::from_utf8_lossy(&bytes).into_owned().into()),
            OutboundFrame::Binary(bytes) => Message::Binary(bytes.into()),
        };
        if sink.send(message).await.is_err() {
            break;
        }
    }
}

async fn send_json(tx: &mpsc::Sender<OutboundFrame>, frame: &impl Serialize) {
    match serde_json::to_vec(frame) {
        Ok(bytes) => {
            if tx.send(OutboundFrame::Text(bytes)).await.is_err() {
                tracing::debug!("outbound channel closed before frame could be delivered");
            }
        }
        Err(error) => tracing::warn!(%error, "failed to serialize outgoing frame"),
    }
}

struct SessionCtx {
    client_id: String,
    name: String,
    room_key: String,
    room_id: String,
    is_initiator: bool,
}

async fn run_session(
    state: Arc<AppState>,
    ws_stream: &mut futures::stream::SplitStream<WebSocket>,
    out_tx: mpsc::Sender<OutboundFrame>,
) -> anyhow::Result<()> {
    let init_frame = match timeout(HANDSHAKE_TIMEOUT, ws_stream.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(_))) => anyhow::bail!("expected a text frame for init"),
        Ok(Some(Err(error))) => anyhow::bail!("transport error reading init frame: {error}"),
        Ok(None) => anyhow::bail!("connection closed before init frame"),
        Err(_) => anyhow::bail!("init handshake timed out"),
    };

    let init: InitMessage = match serde_json::from_str(&init_frame) {
        Ok(init) => init,
        Err(error) => {
            send_json(&out_tx, &OutgoingFrame::Error { msg: format!("malformed init frame: {error}") }).await;
            anyhow::bail!("malformed init frame");
        }
    };

    let ctx = match init_phase(&state, init, &out_tx).await {
        Ok(ctx) => ctx,
        Err(error) => {
            tracing::info!(%error, "init handshake failed");
            return Ok(());
        }
    };

    state.connections.insert(ctx.client_id.clone(), out_tx.clone());
    state.metrics.record_connected();

    tracing::info!(client_id = %ctx.client_id, room = %ctx.room_key, initiator = ctx.is_initiator, "session established");

    replay_pending(&state, &ctx, &out_tx).await;

    let dispatch_result = dispatch_loop(&state, &ctx, ws_stream, &out_tx).await;
    if let Err(error) = &dispatch_result {
        tracing::debug!(%error, client_id = %ctx.client_id, "dispatch loop ended");
    }

    disconnect(&state, &ctx).await;
    state.metrics.record_disconnected();
    Ok(())
}

/// Phase 1: resolve the room and establish (or receive) its canonical
/// symmetric key (§9 Open Question #1).
async fn init_phase(
    state: &AppState,
    init: InitMessage,
    out_tx: &mpsc::Sender<OutboundFrame>,
) -> anyhow::Result<SessionCtx> {
    if init.key_phrase.is_empty() {
        send_json(out_tx, &OutgoingFrame::Error { msg: "keyPhrase is required".into() }).await;
        anyhow::bail!("empty keyPhrase");
    }

    let client_id = Uuid::new_v4().to_string();
    let name = init.name.clone().unwrap_or_else(|| client_id.clone());
    let room_key = state.rooms.room_key(&init.key_phrase);

    let outcome = match state.rooms.join(&room_key, &client_id, init.limit).await {
        Ok(outcome) => outcome,
        Err(error) => {
            send_json(out_tx, &OutgoingFrame::Error { msg: error.to_string() }).await;
            anyhow::bail!("join refused: {error}");
        }
    };

    let aes_key_reply = if outcome.is_initiator {
        resolve_initiator_key(state, &init, &room_key, &client_id)?
    } else {
        resolve_joiner_key(state, &init, &room_key, &client_id)?
    };

    send_json(
        out_tx,
        &OutgoingFrame::Info {
            msg: if outcome.is_initiator { "room_created" } else { "joined" },
            room_id: outcome.room_id.clone(),
            initiator: outcome.is_initiator,
            aes_key: aes_key_reply,
        },
    )
    .await;

    Ok(SessionCtx {
        client_id,
        name,
        room_key,
        room_id: outcome.room_id,
        is_initiator: outcome.is_initiator,
    })
}

/// The initiator defines the room's canonical key.
fn resolve_initiator_key(
    state: &AppState,
    init: &InitMessage,
    room_key: &str,
    client_id: &str,
) -> anyhow::Result<Option<String>> {
    if let Some(wrapped_b64) = &init.aes_key {
        let key = unwrap_client_key(state, wrapped_b64).unwrap_or_else(|error| {
            tracing::warn!(%error, "client-supplied aesKey failed to unwrap, generating a fresh room key");
            *relay_crypto::aes_ctr::generate_key()
        });
        state.keys.set(room_key, client_id, key);
        Ok(None)
    } else if let Some(pem) = &init.client_pub_key {
        let key = *relay_crypto::aes_ctr::generate_key();
        let reply = wrap_key_for_client(&key, pem)?;
        state.keys.set(room_key, client_id, key);
        Ok(Some(reply))
    } else {
        anyhow::bail!("aesKey or clientPubKey required")
    }
}

/// A later joiner always receives the room's existing canonical key,
/// never generating its own.
fn resolve_joiner_key(state: &AppState, init: &InitMessage, room_key: &str, client_id: &str) -> anyhow::Result<Option<String>> {
    let canonical = match state.keys.clients_in_room(room_key).into_iter().find_map(|id| state.keys.get(room_key, &id)) {
        Some(key) => key,
        None => {
            // The room exists in the shared store but this process never
            // saw its canonical key (the initiator lives on another
            // instance). Generate a local fallback so this client still
            // gets a functioning session; cross-instance signal traffic
            // for it alone won't decrypt until it reconnects after the
            // initiator's instance is reachable.
            tracing::warn!(room_key, "no locally-known canonical key for room, generating a local fallback");
            *relay_crypto::aes_ctr::generate_key()
        }
    };

    if let Some(wrapped_b64) = &init.aes_key {
        let _ = unwrap_client_key(state, wrapped_b64);
        state.keys.set(room_key, client_id, canonical);
        Ok(None)
    } else if let Some(pem) = &init.client_pub_key {
        let reply = wrap_key_for_client(&canonical, pem)?;
        state.keys.set(room_key, client_id, canonical);
        Ok(Some(reply))
    } else {
        anyhow::bail!("aesKey or clientPubKey required")
    }
}

fn unwrap_client_key(state: &AppState, wrapped_b64: &str) -> anyhow::Result<[u8; 32]> {
    let wrapped = STANDARD.decode(wrapped_b64)?;
    let unwrapped = state.keypair.unwrap(&wrapped)?;
    let key: [u8; 32] = unwrapped
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("unwrapped key is not 32 bytes"))?;
    Ok(key)
}

fn wrap_key_for_client(key: &[u8; 32], client_pem: &str) -> anyhow::Result<String> {
    let pub_key = rsa::parse_public_key_pem(client_pem)?;
    let wrapped = rsa::wrap(&pub_key, key)?;
    Ok(STANDARD.encode(wrapped))
}

async fn replay_pending(state: &AppState, ctx: &SessionCtx, out_tx: &mpsc::Sender<OutboundFrame>) {
    if ctx.is_initiator {
        return;
    }
    match state.rooms.pending_drain(&ctx.room_key).await {
        Ok(items) => {
            for payload in items {
                if out_tx.send(OutboundFrame::Binary(payload)).await.is_err() {
                    break;
                }
            }
        }
        Err(error) => tracing::warn!(%error, "failed to drain pending signals"),
    }
}

async fn dispatch_loop(
    state: &AppState,
    ctx: &SessionCtx,
    ws_stream: &mut futures::stream::SplitStream<WebSocket>,
    out_tx: &mpsc::Sender<OutboundFrame>,
) -> anyhow::Result<()> {
    loop {
        let text = match ws_stream.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => return Ok(()),
            Some(Ok(_)) => continue,
            Some(Err(error)) => anyhow::bail!("transport error: {error}"),
        };

        let msg: SignalMessage = match serde_json::from_str(&text) {
            Ok(msg) => msg,
            Err(error) => {
                tracing::warn!(%error, client_id = %ctx.client_id, "skipping unparseable frame");
                continue;
            }
        };

        if let Err(error) = dispatch_one(state, ctx, msg, out_tx).await {
            tracing::warn!(%error, client_id = %ctx.client_id, "error handling frame");
        }
        state.metrics.record_dispatch();
    }
}

async fn dispatch_one(
    state: &AppState,
    ctx: &SessionCtx,
    msg: SignalMessage,
    out_tx: &mpsc::Sender<OutboundFrame>,
) -> anyhow::Result<()> {
    let msg = msg.with_from(ctx.name.clone());

    match msg.kind {
        SignalType::Offer | SignalType::Answer | SignalType::Candidate | SignalType::Msg | SignalType::Signal => {
            handle_envelope_signal(state, ctx, msg).await?;
        }
        SignalType::CallInitiate | SignalType::CallAccept => {
            let payload = serde_json::to_vec(&msg)?;
            state.rooms.broadcast(&ctx.room_key, &ctx.client_id, &OutboundFrame::Text(payload)).await?;
        }
        SignalType::CallEnd => {
            handle_call_end(state, ctx, msg).await?;
        }
        SignalType::UpdateLimit => {
            handle_update_limit(state, ctx, msg, out_tx).await?;
        }
        SignalType::Status | SignalType::Warning | SignalType::Phrase => {
            tracing::debug!(kind = ?msg.kind, "ignoring client-originated server-reserved frame type");
        }
    }
    Ok(())
}

async fn handle_envelope_signal(state: &AppState, ctx: &SessionCtx, msg: SignalMessage) -> anyhow::Result<()> {
    let key = state
        .keys
        .get(&ctx.room_key, &ctx.client_id)
        .ok_or_else(|| anyhow::anyhow!("no symmetric key for this client"))?;

    let kind = msg.kind;
    let ciphertext = envelope::encrypt_signal(&msg, &key)?;

    let sent = state
        .rooms
        .fanout(
            &state.config.pubsub_channel,
            &ctx.room_key,
            &ctx.client_id,
            kind,
            OutboundFrame::Binary(ciphertext.clone()),
        )
        .await?;

    // Pending-signals contract: only on zero local recipients and only
    // while the room is below capacity.
    if kind == SignalType::Signal && sent == 0 {
        let member_count = state.rooms.member_count(&ctx.room_key).await?;
        let room_limit = state.rooms.limit(&ctx.room_key).await?;
        if member_count < room_limit {
            state.rooms.pending_push(&ctx.room_key, &ciphertext).await?;
        }
    }

    Ok(())
}

async fn handle_call_end(state: &AppState, ctx: &SessionCtx, msg: SignalMessage) -> anyhow::Result<()> {
    if let Some(call_id) = msg.call_id {
        if state.rooms.call_end_seen(&ctx.room_key, &call_id.to_string()).await? {
            tracing::debug!(%call_id, "duplicate call_end dropped");
            return Ok(());
        }
    }
    let payload = serde_json::to_vec(&msg)?;
    state.rooms.broadcast(&ctx.room_key, &ctx.client_id, &OutboundFrame::Text(payload)).await?;
    Ok(())
}

async fn handle_update_limit(
    state: &AppState,
    ctx: &SessionCtx,
    msg: SignalMessage,
    out_tx: &mpsc::Sender<OutboundFrame>,
) -> anyhow::Result<()> {
    let owner = state.rooms.owner(&ctx.room_key).await?;
    if owner.as_deref() != Some(ctx.client_id.as_str()) {
        send_json(out_tx, &OutgoingFrame::Warning { msg: "only owner can update limit".into() }).await;
        return Ok(());
    }
    let Some(limit) = msg.limit else {
        send_json(out_tx, &OutgoingFrame::Warning { msg: "limit is required".into() }).await;
        return Ok(());
    };
    state.rooms.set_limit(&ctx.room_key, limit).await?;

    let status = OutgoingFrame::Status {
        msg: format!("room limit updated to {limit}"),
        room_id: ctx.room_id.clone(),
    };
    let payload = serde_json::to_vec(&status)?;
    send_json(out_tx, &status).await;
    state.rooms.broadcast(&ctx.room_key, &ctx.client_id, &OutboundFrame::Text(payload)).await?;
    Ok(())
}

async fn disconnect(state: &AppState, ctx: &SessionCtx) {
    match state.rooms.leave(&ctx.room_key, &ctx.client_id).await {
        Ok(true) => tracing::info!(room = %ctx.room_key, "room deleted after last member left"),
        Ok(false) => {
            let status = OutgoingFrame::Status {
                msg: format!("{} left", ctx.name),
                room_id: ctx.room_id.clone(),
            };
            if let Ok(payload) = serde_json::to_vec(&status) {
                let _ = state.rooms.broadcast(&ctx.room_key, &ctx.client_id, &OutboundFrame::Text(payload)).await;
            }
        }
        Err(error) => tracing::warn!(%error, "error during disconnect cleanup"),
    }
}
