//! Per-connection session state machine:
//! `Connecting → Authenticated → Live → Disconnected`.
//!
//! The ordering on the way to `Live` is load-bearing: the session subscribes
//! to the recipient's fanout topic *before* fetching the backlog, so nothing
//! can fall into the gap between "was offline" and "now online". A live
//! event that races the backlog fetch is suppressed exactly once by id.

use anyhow::Result;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::Extension,
    response::Response,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tracing;
use uuid::Uuid;

use crate::auth;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::server::ApiState;

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Extension(state): Extension<ApiState>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = handle_socket(socket, state).await {
            tracing::debug!("websocket session ended: {}", e);
        }
    })
}

async fn handle_socket(socket: WebSocket, state: ApiState) -> Result<()> {
    let (mut sender, mut receiver) = socket.split();

    // Connecting: the first frame must be `connect`, within the handshake
    // window.
    let handshake = Duration::from_secs(state.ctx.config.server.handshake_timeout_secs);
    let first = match tokio::time::timeout(handshake, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str::<ClientMessage>(&text).ok(),
        Ok(_) => None,
        Err(_) => {
            tracing::debug!("websocket handshake timed out");
            return Ok(());
        }
    };

    let (auth_token, device_id) = match first {
        Some(ClientMessage::Connect {
            auth_token,
            device_id,
        }) => (auth_token, device_id),
        _ => {
            send_message(
                &mut sender,
                &ServerMessage::Error {
                    code: "CONNECT_REQUIRED".to_string(),
                    message: "first message must be connect".to_string(),
                },
            )
            .await?;
            return Ok(());
        }
    };

    // Authenticated: the token resolves to a recipient identity (issuance
    // is the identity service's problem, not ours).
    let recipient_id =
        match auth::verify_token(&auth_token, &state.ctx.config.server.jwt_secret) {
            Ok(recipient_id) => recipient_id,
            Err(_) => {
                send_message(
                    &mut sender,
                    &ServerMessage::Error {
                        code: "UNAUTHORIZED".to_string(),
                        message: "invalid auth token".to_string(),
                    },
                )
                .await?;
                return Ok(());
            }
        };

    let session = Session {
        state,
        recipient_id,
        device_id,
    };
    session.run(sender, receiver).await
}

struct Session {
    state: ApiState,
    recipient_id: String,
    device_id: String,
}

impl Session {
    async fn run(
        self,
        mut sender: SplitSink<WebSocket, Message>,
        mut receiver: SplitStream<WebSocket>,
    ) -> Result<()> {
        let ctx = &self.state.ctx;

        // Subscribe first, then register and flush: a notification accepted
        // from here on either lands in the backlog or on this receiver.
        let mut fanout_rx = ctx.fanout.subscribe(&self.recipient_id);
        ctx.registry
            .register(&self.recipient_id, &self.device_id, &ctx.instance_id);
        ctx.queue.wake(&self.recipient_id);

        let backlog = self.state.notify.backlog(&self.recipient_id).await?;
        let mut seen: HashSet<Uuid> = backlog.iter().map(|n| n.id).collect();

        send_message(&mut sender, &ServerMessage::Connected { backlog }).await?;
        self.push_unread(&mut sender).await?;

        tracing::info!(
            recipient_id = %self.recipient_id,
            device_id = %self.device_id,
            "session live"
        );

        // Live.
        let ttl = Duration::from_secs(ctx.config.registry.heartbeat_ttl_secs);
        let mut heartbeat = tokio::time::interval((ttl / 3).max(Duration::from_secs(1)));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await; // first tick fires immediately
        let mut last_activity = Instant::now();

        let result = loop {
            tokio::select! {
                event = fanout_rx.recv() => match event {
                    Ok(notification) => {
                        // The backlog already carried this id; swallow the
                        // raced live copy once.
                        if seen.remove(&notification.id) {
                            continue;
                        }
                        send_message(
                            &mut sender,
                            &ServerMessage::Notification {
                                notification: (*notification).clone(),
                            },
                        )
                        .await?;
                        self.push_unread(&mut sender).await?;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Redelivery via the queue covers whatever was missed.
                        tracing::warn!(
                            recipient_id = %self.recipient_id,
                            skipped,
                            "session lagged behind fanout"
                        );
                    }
                    Err(RecvError::Closed) => break Ok(()),
                },

                frame = receiver.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        self.handle_client_message(&mut sender, &text).await?;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        last_activity = Instant::now();
                        ctx.registry.heartbeat(&self.recipient_id, &self.device_id);
                        sender.send(Message::Pong(payload)).await?;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_activity = Instant::now();
                        ctx.registry.heartbeat(&self.recipient_id, &self.device_id);
                    }
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(anyhow::anyhow!(e)),
                },

                _ = heartbeat.tick() => {
                    if last_activity.elapsed() > ttl {
                        tracing::info!(
                            recipient_id = %self.recipient_id,
                            device_id = %self.device_id,
                            "session heartbeat expired"
                        );
                        break Ok(());
                    }
                    ctx.registry.heartbeat(&self.recipient_id, &self.device_id);
                    let _ = sender.send(Message::Ping(Vec::new())).await;
                }
            }
        };

        // Disconnected: pending-ack records simply stay pending and are
        // picked up again on the next reconnect or sweep.
        ctx.registry
            .unregister(&self.recipient_id, &self.device_id);

        tracing::info!(
            recipient_id = %self.recipient_id,
            device_id = %self.device_id,
            "session closed"
        );

        result
    }

    async fn handle_client_message(
        &self,
        sender: &mut SplitSink<WebSocket, Message>,
        text: &str,
    ) -> Result<()> {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                send_message(
                    sender,
                    &ServerMessage::Error {
                        code: "INVALID_MESSAGE".to_string(),
                        message: format!("failed to parse message: {}", e),
                    },
                )
                .await?;
                return Ok(());
            }
        };

        match message {
            ClientMessage::Ack { notification_id } => {
                // Fire-and-forget on the wire; stale acks are no-ops.
                self.state
                    .notify
                    .ack(&self.recipient_id, notification_id)
                    .await?;
            }
            ClientMessage::MarkRead { notification_id } => {
                self.state
                    .notify
                    .mark_read(&self.recipient_id, notification_id)
                    .await?;
                self.push_unread(sender).await?;
            }
            ClientMessage::MarkAllRead => {
                self.state.notify.mark_all_read(&self.recipient_id).await?;
                self.push_unread(sender).await?;
            }
            ClientMessage::Delete { notification_id } => {
                self.state
                    .notify
                    .delete(&self.recipient_id, notification_id)
                    .await?;
                self.push_unread(sender).await?;
            }
            ClientMessage::ClearAll => {
                self.state.notify.clear_all(&self.recipient_id).await?;
                self.push_unread(sender).await?;
            }
            ClientMessage::Connect { .. } => {
                send_message(
                    sender,
                    &ServerMessage::Error {
                        code: "ALREADY_CONNECTED".to_string(),
                        message: "session is already live".to_string(),
                    },
                )
                .await?;
            }
        }

        Ok(())
    }

    async fn push_unread(&self, sender: &mut SplitSink<WebSocket, Message>) -> Result<()> {
        let count = self.state.notify.unread_count(&self.recipient_id).await?;
        send_message(sender, &ServerMessage::UnreadCount { count }).await
    }
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<()> {
    let text = serde_json::to_string(message)?;
    sender.send(Message::Text(text)).await?;
    Ok(())
}
