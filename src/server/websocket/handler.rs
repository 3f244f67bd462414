//! WebSocket route handler.
//!
//! Owns the socket session: relays progress-bus events for joined
//! queues to the client and services client-initiated requests.

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::messages::{msg_types, ClientMessage, ServerMessage};
use crate::server::metrics::WEBSOCKET_CONNECTIONS;
use crate::server::state::ServerState;

const OUTGOING_CHANNEL_SIZE: usize = 64;

/// WebSocket upgrade handler for `GET /api/ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

struct WsSession {
    state: ServerState,
    outgoing: mpsc::Sender<ServerMessage>,
    /// queue_id -> relay task forwarding bus events to this socket.
    joined: HashMap<String, JoinHandle<()>>,
}

async fn handle_socket(socket: WebSocket, state: ServerState) {
    WEBSOCKET_CONNECTIONS.inc();
    debug!("WebSocket connected");

    let (ws_sink, ws_stream) = socket.split();
    let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_CHANNEL_SIZE);

    let connected = ServerMessage::new(
        msg_types::CONNECTED,
        json!({ "message": "WebSocket connection established" }),
    );
    let outgoing_handle = tokio::spawn(forward_outgoing(ws_sink, outgoing_rx, connected));

    let mut session = WsSession {
        state,
        outgoing: outgoing_tx,
        joined: HashMap::new(),
    };
    process_incoming(ws_stream, &mut session).await;

    for (_, relay) in session.joined.drain() {
        relay.abort();
    }
    outgoing_handle.abort();
    WEBSOCKET_CONNECTIONS.dec();
    debug!("WebSocket disconnected");
}

/// Forward messages from the outgoing channel to the WebSocket.
async fn forward_outgoing(
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut outgoing_rx: mpsc::Receiver<ServerMessage>,
    initial_msg: ServerMessage,
) {
    if let Ok(json) = serde_json::to_string(&initial_msg) {
        if ws_sink.send(Message::Text(json.into())).await.is_err() {
            return;
        }
    }

    while let Some(msg) = outgoing_rx.recv().await {
        match serde_json::to_string(&msg) {
            Ok(json) => {
                if ws_sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                error!("Failed to serialize WebSocket message: {}", e);
            }
        }
    }
}

async fn process_incoming(
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    session: &mut WsSession,
) {
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => handle_client_message(msg, session).await,
                Err(e) => {
                    debug!("Failed to parse client message: {}", e);
                    let _ = session
                        .outgoing
                        .send(ServerMessage::error(
                            "parse_error",
                            format!("Invalid message format: {}", e),
                        ))
                        .await;
                }
            },
            Ok(Message::Binary(_)) => {
                debug!("Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!("Received close frame");
                break;
            }
            Err(e) => {
                debug!("WebSocket error: {}", e);
                break;
            }
        }
    }
}

async fn handle_client_message(msg: ClientMessage, session: &mut WsSession) {
    match msg.msg_type.as_str() {
        msg_types::PING => {
            let _ = session
                .outgoing
                .send(ServerMessage::new(msg_types::PONG, json!({})))
                .await;
        }
        msg_types::JOIN_QUEUE => match msg.queue_id() {
            Some(queue_id) => join_queue(queue_id, session).await,
            None => send_missing_queue_id(session).await,
        },
        msg_types::LEAVE_QUEUE => match msg.queue_id() {
            Some(queue_id) => {
                if let Some(relay) = session.joined.remove(queue_id) {
                    relay.abort();
                }
                let _ = session
                    .outgoing
                    .send(ServerMessage::new(
                        msg_types::LEFT_QUEUE,
                        json!({ "queue_id": queue_id, "message": format!("Left queue {}", queue_id) }),
                    ))
                    .await;
            }
            None => send_missing_queue_id(session).await,
        },
        msg_types::REQUEST_PROGRESS => match msg.queue_id() {
            Some(queue_id) => {
                match session.state.scheduler.progress(queue_id) {
                    Ok(snapshot) => {
                        let _ = session
                            .outgoing
                            .send(ServerMessage::new(msg_types::BATCH_PROGRESS, snapshot))
                            .await;
                    }
                    Err(e) => send_core_error(session, &e).await,
                };
            }
            None => send_missing_queue_id(session).await,
        },
        msg_types::CANCEL_BATCH => match msg.queue_id() {
            Some(queue_id) => {
                // The room broadcasts batch_cancelled exactly once; the
                // requester gets an updated status as its direct reply.
                match session.state.scheduler.cancel(queue_id) {
                    Ok(_prior) => send_queue_status(session, queue_id).await,
                    Err(e) => send_core_error(session, &e).await,
                }
            }
            None => send_missing_queue_id(session).await,
        },
        msg_types::GET_QUEUE_STATUS => match msg.queue_id() {
            Some(queue_id) => send_queue_status(session, queue_id).await,
            None => send_missing_queue_id(session).await,
        },
        msg_types::GET_ACTIVE_QUEUES => {
            let queues = session.state.scheduler.list_active();
            let _ = session
                .outgoing
                .send(ServerMessage::new(
                    msg_types::ACTIVE_QUEUES,
                    json!({ "queues": queues, "count": queues.len() }),
                ))
                .await;
        }
        other => {
            debug!("Unknown message type: {}", other);
            let _ = session
                .outgoing
                .send(ServerMessage::error(
                    "unknown_type",
                    format!("Unknown message type: {}", other),
                ))
                .await;
        }
    }
}

/// Subscribe to a job's room and spawn a relay task that forwards bus
/// events to this socket until the terminal event lands.
async fn join_queue(queue_id: &str, session: &mut WsSession) {
    let snapshot = match session.state.scheduler.progress(queue_id) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            send_core_error(session, &e).await;
            return;
        }
    };

    if let Some(previous) = session.joined.remove(queue_id) {
        previous.abort();
    }

    let subscription = session.state.bus.subscribe(queue_id);
    let outgoing = session.outgoing.clone();
    let relay = tokio::spawn(async move {
        loop {
            let (event, events_lost) = subscription.recv().await;
            let terminal = event.is_terminal();
            let mut payload = serde_json::to_value(&event).unwrap_or(serde_json::Value::Null);
            if events_lost {
                if let Some(obj) = payload.as_object_mut() {
                    obj.insert("events_lost".to_string(), json!(true));
                }
            }
            if outgoing
                .send(ServerMessage::new(event.event_name(), payload))
                .await
                .is_err()
            {
                break;
            }
            if terminal {
                break;
            }
        }
    });
    session.joined.insert(queue_id.to_string(), relay);

    let _ = session
        .outgoing
        .send(ServerMessage::new(
            msg_types::JOINED_QUEUE,
            json!({ "queue_id": queue_id, "message": format!("Joined queue {}", queue_id) }),
        ))
        .await;
    // Catch-up snapshot so late subscribers see current (possibly
    // terminal) state without waiting for the next published event.
    let _ = session
        .outgoing
        .send(ServerMessage::new(msg_types::BATCH_PROGRESS, snapshot))
        .await;
}

async fn send_queue_status(session: &WsSession, queue_id: &str) {
    match session.state.scheduler.registry().summary(queue_id) {
        Ok(summary) => {
            let _ = session
                .outgoing
                .send(ServerMessage::new(msg_types::QUEUE_STATUS, summary))
                .await;
        }
        Err(e) => send_core_error(session, &e).await,
    }
}

async fn send_core_error(session: &WsSession, error: &crate::error::ConvertError) {
    let _ = session
        .outgoing
        .send(ServerMessage::error(error.kind.as_str(), &error.message))
        .await;
}

async fn send_missing_queue_id(session: &WsSession) {
    let _ = session
        .outgoing
        .send(ServerMessage::error(
            "INPUT_INVALID",
            "queue_id is required",
        ))
        .await;
}
