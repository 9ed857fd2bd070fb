//! The live-connection layer.
//!
//! Each accepted connection is subscribed to its queue's topic set and split
//! into two tasks: a writer that serializes bus events and heartbeat pings
//! through the single send path, and a reader that enforces the read
//! deadline. Either side failing tears the whole connection down, which
//! drops the subscription and rolls presence back.
//!
//! The ping is an application-level `{"e":"PING"}` JSON frame rather than a
//! protocol ping so browser clients can observe it.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde_json::json;

use ohq_domain::{ApiError, Envelope, EventKind, SessionIdentity, Tid};

use crate::AppState;
use crate::bus::{admin_topic, email_topic, generic_topic, nonpriv_topic};
use crate::middleware::session::MaybeIdentity;
use crate::presence::PresenceDelta;

const PING_INTERVAL: Duration = Duration::from_secs(10);
/// Ping interval plus slack for the frame to make the round trip.
const READ_DEADLINE: Duration = Duration::from_secs(12);

/// `GET /queues/{id}/ws`
pub async fn queue_ws(
    State(state): State<Arc<AppState>>,
    Path(queue_id): Path<Tid>,
    MaybeIdentity(viewer): MaybeIdentity,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let mut tx = state.service.begin().await?;
    let queue = state.service.queues.get_queue(tx.as_mut(), queue_id).await?;
    let is_admin = match &viewer {
        Some(viewer) => {
            state
                .service
                .is_course_admin(tx.as_mut(), queue.course, viewer)
                .await?
        }
        None => false,
    };
    drop(tx);

    Ok(ws.on_upgrade(move |socket| handle_socket(state, socket, queue_id, viewer, is_admin)))
}

async fn handle_socket(
    state: Arc<AppState>,
    socket: WebSocket,
    queue_id: Tid,
    viewer: Option<SessionIdentity>,
    is_admin: bool,
) {
    let email = viewer
        .map(|v| v.email)
        .filter(|email| !email.is_empty());

    let mut topics = vec![generic_topic(queue_id)];
    topics.push(if is_admin {
        admin_topic(queue_id)
    } else {
        nonpriv_topic(queue_id)
    });
    if let Some(email) = &email {
        topics.push(email_topic(queue_id, email));
    }
    let mut subscription = state.bus.subscribe(topics);

    let delta = state.presence.connect(queue_id, email.as_deref());
    publish_presence(&state, queue_id, delta);
    tracing::debug!(queue = %queue_id, email = email.as_deref().unwrap_or("-"), "connection opened");

    let (mut sink, mut stream) = socket.split();

    // Single writer: bus events and pings share one send path, and the
    // subscription dies with this task.
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval_at(
            tokio::time::Instant::now() + PING_INTERVAL,
            PING_INTERVAL,
        );
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                event = subscription.recv() => {
                    // None: the bus dropped us as a slow subscriber.
                    let Some(event) = event else { break };
                    let Ok(text) = serde_json::to_string(&event) else { continue };
                    if sink.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    let Ok(text) = serde_json::to_string(&Envelope::signal(EventKind::Ping)) else {
                        continue;
                    };
                    if sink.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Reader: any frame (PONG or otherwise) resets the deadline.
    loop {
        match tokio::time::timeout(READ_DEADLINE, stream.next()).await {
            Ok(Some(Ok(WsMessage::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => break,
            Ok(Some(Ok(_frame))) => continue,
            Err(_) => {
                tracing::debug!(queue = %queue_id, "closing connection after missed heartbeat");
                break;
            }
        }
    }

    writer.abort();
    let delta = state.presence.disconnect(queue_id, email.as_deref());
    publish_presence(&state, queue_id, delta);
    tracing::debug!(queue = %queue_id, email = email.as_deref().unwrap_or("-"), "connection closed");
}

/// Publish presence changes to the admin topic. The counter snapshot was
/// captured under the presence lock; publishing happens out here.
fn publish_presence(state: &AppState, queue_id: Tid, delta: PresenceDelta) {
    if let Some((email, online)) = delta.transition {
        state.bus.publish(
            &admin_topic(queue_id),
            &Envelope::new(
                EventKind::UserStatusUpdate,
                json!({
                    "email": email,
                    "status": if online { "online" } else { "offline" },
                }),
            ),
        );
    }
    state.bus.publish(
        &admin_topic(queue_id),
        &Envelope::new(EventKind::QueueConnectionsUpdate, delta.connections),
    );
}
