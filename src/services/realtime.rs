use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::notification::PushEvent;

/// 推送通道
pub trait Notifier: Send + Sync {
    /// Non-blocking, best effort. Never fails the caller.
    fn notify(&self, user_id: &str, event: PushEvent);
}

/// Discards every event. Used when nothing listens.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _user_id: &str, _event: PushEvent) {}
}

struct Connection {
    id: Uuid,
    tx: mpsc::Sender<PushEvent>,
}

/// 按用户 id 保存在线连接的 WebSocket 推送中心
pub struct PushHub {
    connections: DashMap<String, Vec<Connection>>,
    buffer_size: usize,
}

impl PushHub {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            connections: DashMap::new(),
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn register(&self, user_id: &str) -> (Uuid, mpsc::Receiver<PushEvent>) {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        let id = Uuid::new_v4();
        self.connections
            .entry(user_id.to_string())
            .or_default()
            .push(Connection { id, tx });
        debug!("Registered push connection {} for user {}", id, user_id);
        (id, rx)
    }

    pub fn unregister(&self, user_id: &str, connection_id: Uuid) {
        if let Some(mut conns) = self.connections.get_mut(user_id) {
            conns.retain(|c| c.id != connection_id);
        }
        self.connections.remove_if(user_id, |_, conns| conns.is_empty());
    }

    pub fn connection_count(&self, user_id: &str) -> usize {
        self.connections.get(user_id).map(|c| c.len()).unwrap_or(0)
    }

    /// Drives one socket until the client goes away.
    pub async fn serve(&self, socket: WebSocket, user_id: String) {
        let (connection_id, mut rx) = self.register(&user_id);
        info!("WebSocket connection {} opened for user {}", connection_id, user_id);

        let (mut ws_tx, mut ws_rx) = socket.split();

        let send_task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(text) => {
                        if let Err(e) = ws_tx.send(Message::Text(text)).await {
                            debug!("Push send failed, closing: {}", e);
                            break;
                        }
                    }
                    Err(e) => error!("Failed to serialize push event: {}", e),
                }
            }
        });

        while let Some(message) = ws_rx.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }

        self.unregister(&user_id, connection_id);
        send_task.abort();
        info!("WebSocket connection {} closed for user {}", connection_id, user_id);
    }
}

impl Notifier for PushHub {
    fn notify(&self, user_id: &str, event: PushEvent) {
        let mut closed = Vec::new();

        if let Some(conns) = self.connections.get(user_id) {
            for conn in conns.iter() {
                match conn.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!("Push buffer full for user {}, dropping event", user_id);
                    }
                    Err(TrySendError::Closed(_)) => closed.push(conn.id),
                }
            }
        }

        for id in closed {
            self.unregister(user_id, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_every_connection_of_the_user() {
        let hub = PushHub::new(4);
        let (_, mut a) = hub.register("u1");
        let (_, mut b) = hub.register("u1");
        let (_, mut other) = hub.register("u2");

        hub.notify("u1", PushEvent::UnreadCountUpdate { count: 1 });

        assert_eq!(a.recv().await, Some(PushEvent::UnreadCountUpdate { count: 1 }));
        assert_eq!(b.recv().await, Some(PushEvent::UnreadCountUpdate { count: 1 }));
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_buffer_drops_without_blocking() {
        let hub = PushHub::new(1);
        let (_, mut rx) = hub.register("u1");

        hub.notify("u1", PushEvent::UnreadCountUpdate { count: 1 });
        hub.notify("u1", PushEvent::UnreadCountUpdate { count: 2 });

        assert_eq!(rx.recv().await, Some(PushEvent::UnreadCountUpdate { count: 1 }));
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.connection_count("u1"), 1);
    }

    #[tokio::test]
    async fn closed_receivers_are_pruned() {
        let hub = PushHub::new(4);
        let (_, rx) = hub.register("u1");
        drop(rx);

        hub.notify("u1", PushEvent::UnreadCountUpdate { count: 1 });
        assert_eq!(hub.connection_count("u1"), 0);
    }
}
