//! WebSocket endpoints for the agent and team channels.
//!
//! Each connection authenticates once at upgrade, then runs a sequential
//! read loop. Outbound frames go through a bounded queue drained by a
//! dedicated writer task.

use crate::agent::AgentEngine;
use crate::auth::{AuthOutcome, ConnectionContext, AGENT_CHANNEL, PEER_CHANNEL};
use crate::events::OutboundFrame;
use crate::outbound::{spawn_writer, OutboundSender, OUTBOUND_BUFFER};
use crate::peer::PeerEngine;
use crate::routes::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::stream::{SplitStream, StreamExt};
use serde::Deserialize;
use tokio::task::JoinHandle;

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// `GET /ws/agent`
pub async fn agent_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
) -> Response {
    let ctx = ConnectionContext::from_request(&headers, query.token);
    ws.on_upgrade(move |socket| handle_agent_ws(socket, state, ctx))
}

/// `GET /ws/team`
pub async fn team_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
) -> Response {
    let ctx = ConnectionContext::from_request(&headers, query.token);
    ws.on_upgrade(move |socket| handle_team_ws(socket, state, ctx))
}

async fn handle_agent_ws(socket: WebSocket, state: AppState, ctx: ConnectionContext) {
    let (sink, mut stream) = socket.split();
    let (out, rx) = OutboundSender::channel(OUTBOUND_BUFFER);
    let writer = spawn_writer(sink, rx);

    let outcome = state.auth.authenticate(&ctx, AGENT_CHANNEL);
    let Some(user_id) = outcome.owner() else {
        reject(out, writer, outcome).await;
        return;
    };

    tracing::info!(user_id, "Agent connection established");
    let engine = AgentEngine::new(state.agent.clone(), user_id, out);

    while let Some(text) = next_text(&mut stream).await {
        engine.handle_text(&text).await;
    }

    drop(engine);
    writer.abort();
    tracing::info!(user_id, "Agent connection closed");
}

async fn handle_team_ws(socket: WebSocket, state: AppState, ctx: ConnectionContext) {
    let (sink, mut stream) = socket.split();
    let (out, rx) = OutboundSender::channel(OUTBOUND_BUFFER);
    let writer = spawn_writer(sink, rx);

    let outcome = state.auth.authenticate(&ctx, PEER_CHANNEL);
    let AuthOutcome::Authenticated { user_id } = outcome else {
        reject(out, writer, outcome).await;
        return;
    };

    let connection_id = state.hub.register(user_id, out.clone()).await;
    tracing::info!(user_id, %connection_id, "Team connection established");
    let engine = PeerEngine::new(state.peer_messages.clone(), state.hub.clone(), user_id, out);

    while let Some(text) = next_text(&mut stream).await {
        engine.handle_text(&text).await;
    }

    state.hub.release(user_id, connection_id).await;
    drop(engine);
    writer.abort();
    tracing::info!(user_id, %connection_id, "Team connection closed");
}

/// Next text frame, or `None` once the client is gone.
async fn next_text(stream: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => return Some(text),
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "WebSocket read failed");
                return None;
            }
        }
    }
    None
}

/// Send the single auth error frame and let the writer close the socket.
async fn reject(out: OutboundSender, writer: JoinHandle<()>, outcome: AuthOutcome) {
    let reason = match outcome {
        AuthOutcome::Rejected { reason } => reason,
        _ => "invalid token".to_string(),
    };
    tracing::warn!(reason = %reason, "WebSocket connection rejected");

    out.send(OutboundFrame::auth_error(&reason)).await;
    drop(out);
    let _ = writer.await;
}
