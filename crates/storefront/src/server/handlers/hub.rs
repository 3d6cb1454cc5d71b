//! `GET /hubs/notifications`: WebSocket access to the notification hub.
//!
//! Browsers cannot set headers on a WebSocket handshake, so the access token
//! may travel in the `access_token` query parameter. A bearer header works
//! too.

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header::AUTHORIZATION, HeaderMap},
    response::Response,
};
use common::protocol::{HubCommand, HubMessage, Notification};
use serde::Deserialize;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::notify::{can_join, default_groups, NotificationHub};
use crate::server::extract::{AuthUser, ValidQuery};
use crate::server::state::AppState;

/// Frames buffered per connection between the group forwarders and the socket.
const OUTBOUND_BUFFER: usize = 32;

#[derive(Debug, Deserialize)]
pub struct HubQuery {
    access_token: Option<String>,
}

pub async fn connect(
    State(state): State<AppState>,
    ValidQuery(query): ValidQuery<HubQuery>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> AppResult<Response> {
    let header_token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned);
    let token = query
        .access_token
        .or(header_token)
        .ok_or_else(|| AppError::unauthorized("missing access token"))?;
    let user = AuthUser::from_token(&state, &token)?;
    let ws = ws.ok_or_else(|| AppError::validation("websocket upgrade required"))?;

    info!(user_id = %user.id, role = %user.role, "hub connection accepted");
    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| run(socket, hub, user)))
}

async fn run(mut socket: WebSocket, hub: NotificationHub, user: AuthUser) {
    let (out_tx, mut out_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let mut subs = Subscriptions::new(hub.clone(), user.clone(), out_tx);
    for group in default_groups(user.id, user.role) {
        subs.join(&group).await;
    }

    loop {
        tokio::select! {
            Some(frame) = out_rx.recv() => {
                let Ok(text) = serde_json::to_string(&frame) else { continue };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = subs.handle_text(&text).await;
                    let Ok(text) = serde_json::to_string(&reply) else { continue };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(user_id = %user.id, error = %e, "hub socket error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    subs.leave_all().await;
    hub.prune().await;
    info!(user_id = %user.id, "hub connection closed");
}

/// Group memberships of one connection. Each joined group has a task that
/// forwards the group's broadcasts into the connection's outbound queue.
struct Subscriptions {
    hub: NotificationHub,
    user: AuthUser,
    out: mpsc::Sender<HubMessage>,
    tasks: HashMap<String, JoinHandle<()>>,
}

impl Subscriptions {
    fn new(hub: NotificationHub, user: AuthUser, out: mpsc::Sender<HubMessage>) -> Self {
        Self {
            hub,
            user,
            out,
            tasks: HashMap::new(),
        }
    }

    async fn handle_text(&mut self, text: &str) -> HubMessage {
        match serde_json::from_str::<HubCommand>(text) {
            Ok(HubCommand::Join { group }) => self.join(&group).await,
            Ok(HubCommand::Leave { group }) => self.leave(&group).await,
            Err(e) => HubMessage::Error {
                message: format!("unrecognised command: {e}"),
            },
        }
    }

    async fn join(&mut self, group: &str) -> HubMessage {
        if !can_join(self.user.id, self.user.role, group) {
            warn!(user_id = %self.user.id, group, "hub join refused");
            return HubMessage::Error {
                message: format!("not allowed to join {group}"),
            };
        }
        if !self.tasks.contains_key(group) {
            let rx = self.hub.subscribe(group).await;
            let task = forward(group.to_owned(), rx, self.out.clone(), self.user.id.to_string());
            self.tasks.insert(group.to_owned(), task);
            debug!(user_id = %self.user.id, group, "hub group joined");
        }
        HubMessage::Joined {
            group: group.to_owned(),
        }
    }

    async fn leave(&mut self, group: &str) -> HubMessage {
        if let Some(task) = self.tasks.remove(group) {
            stop(task).await;
            self.hub.prune().await;
        }
        HubMessage::Left {
            group: group.to_owned(),
        }
    }

    async fn leave_all(&mut self) {
        for (_, task) in self.tasks.drain() {
            stop(task).await;
        }
    }
}

/// Abort a forwarder and wait until it has dropped its receiver, so the
/// group's receiver count is accurate for pruning.
async fn stop(task: JoinHandle<()>) {
    task.abort();
    if let Err(e) = task.await {
        if !e.is_cancelled() {
            warn!(error = %e, "hub forwarder failed");
        }
    }
}

fn forward(
    group: String,
    mut rx: broadcast::Receiver<Notification>,
    out: mpsc::Sender<HubMessage>,
    user_id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(notification) => {
                    let frame = HubMessage::Notification {
                        group: group.clone(),
                        notification,
                    };
                    if out.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%user_id, %group, skipped, "hub subscriber lagging; notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
