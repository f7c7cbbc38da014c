//! Sockets owned by this process.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use counsel_core::ConnectionId;
use counsel_realtime::{ConnectionPoster, PostError};
use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use super::connection::{ClientConnection, SendError};
use crate::auth::Claims;

/// In-process connection table and push API.
pub struct LocalGateway {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
    send_buffer: usize,
}

impl LocalGateway {
    /// Empty gateway. Each connection gets an outbound buffer of `send_buffer` frames.
    pub fn new(send_buffer: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            send_buffer: send_buffer.max(1),
        }
    }

    /// Register a new socket. Returns the connection and the receiving end of
    /// its outbound buffer.
    pub async fn open(&self, claims: Option<Claims>) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(self.send_buffer);
        let connection = Arc::new(ClientConnection::new(ConnectionId::new(), claims, tx));
        let _ = self
            .connections
            .write()
            .await
            .insert(connection.id.clone(), connection.clone());
        (connection, rx)
    }

    /// Forget a socket.
    pub async fn remove(&self, connection_id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.write().await.remove(connection_id)
    }

    /// Look up a socket.
    pub async fn get(&self, connection_id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.read().await.get(connection_id).cloned()
    }

    /// Close a socket. Returns whether it was known.
    pub async fn disconnect(&self, connection_id: &ConnectionId) -> bool {
        match self.remove(connection_id).await {
            Some(connection) => {
                connection.close();
                true
            }
            None => false,
        }
    }

    /// Number of open sockets.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[async_trait]
impl ConnectionPoster for LocalGateway {
    async fn post(&self, connection_id: &ConnectionId, frame: &Value) -> Result<(), PostError> {
        let Some(connection) = self.get(connection_id).await else {
            debug!(%connection_id, "post to unknown connection");
            return Err(PostError::Gone);
        };
        match connection.send_json(frame) {
            Ok(()) => Ok(()),
            Err(SendError::Closed) => Err(PostError::Gone),
            Err(SendError::Full) => Err(PostError::Other("outbound buffer full".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[tokio::test]
    async fn post_reaches_open_connection() {
        let gateway = LocalGateway::new(4);
        let (conn, mut rx) = gateway.open(None).await;
        gateway.post(&conn.id, &json!({"event": "incomingMessage"})).await.unwrap();
        assert_eq!(&*rx.recv().await.unwrap(), r#"{"event":"incomingMessage"}"#);
        assert_eq!(gateway.connection_count().await, 1);
    }

    #[tokio::test]
    async fn unknown_or_closed_connection_is_gone() {
        let gateway = LocalGateway::new(4);
        assert_eq!(gateway.post(&ConnectionId::from("nope"), &json!({})).await, Err(PostError::Gone));

        let (conn, rx) = gateway.open(None).await;
        drop(rx);
        assert_eq!(gateway.post(&conn.id, &json!({})).await, Err(PostError::Gone));
    }

    #[tokio::test]
    async fn full_buffer_is_not_gone() {
        let gateway = LocalGateway::new(1);
        let (conn, _rx) = gateway.open(None).await;
        gateway.post(&conn.id, &json!({})).await.unwrap();
        assert_matches!(gateway.post(&conn.id, &json!({})).await, Err(PostError::Other(_)));
    }

    #[tokio::test]
    async fn disconnect_closes_and_forgets() {
        let gateway = LocalGateway::new(4);
        let (conn, _rx) = gateway.open(None).await;
        assert!(gateway.disconnect(&conn.id).await);
        assert!(conn.is_closed());
        assert!(!gateway.disconnect(&conn.id).await);
        assert_eq!(gateway.connection_count().await, 0);
    }
}
