use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::broadcast::ConnectionId;

/// Simple WebSocket abstraction - all we care about is send/receive
#[async_trait]
pub trait SocketWrapper: Send {
    /// Send a text message to the client
    async fn send_message(&mut self, message: String) -> Result<(), SocketError>;

    /// Receive the next text message from the client (None if connection closed)
    async fn receive_message(&mut self) -> Result<Option<String>, SocketError>;

    /// Close the connection
    async fn close(&mut self) -> Result<(), SocketError>;
}

#[derive(Debug)]
pub enum SocketError {
    SendFailed(String),
    ReceiveFailed(String),
}

/// Direct implementation on axum's WebSocket
#[async_trait]
impl SocketWrapper for WebSocket {
    async fn send_message(&mut self, message: String) -> Result<(), SocketError> {
        self.send(Message::Text(message))
            .await
            .map_err(|e| SocketError::SendFailed(e.to_string()))
    }

    async fn receive_message(&mut self) -> Result<Option<String>, SocketError> {
        loop {
            match self.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // Binary, ping and pong frames carry nothing for us
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(SocketError::ReceiveFailed(e.to_string())),
            }
        }
    }

    async fn close(&mut self) -> Result<(), SocketError> {
        self.send(Message::Close(None))
            .await
            .map_err(|e| SocketError::SendFailed(e.to_string()))
    }
}

/// One viewer's socket inside an auction room
///
/// Pushes every message the broadcaster routes to `outbound_receiver` to the
/// client. Client frames are logged and otherwise ignored.
pub struct Connection {
    pub id: ConnectionId,
    pub room_id: String,
    pub user_id: String,
    socket: Box<dyn SocketWrapper>,
    outbound_receiver: mpsc::UnboundedReceiver<String>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        room_id: String,
        user_id: String,
        socket: Box<dyn SocketWrapper>,
        outbound_receiver: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            id,
            room_id,
            user_id,
            socket,
            outbound_receiver,
        }
    }

    /// Run the connection - handles both sending and receiving until disconnect
    pub async fn run(mut self) -> Result<(), SocketError> {
        loop {
            tokio::select! {
                msg = self.outbound_receiver.recv() => {
                    match msg {
                        Some(message) => self.socket.send_message(message).await?,
                        None => break, // Broadcaster dropped us
                    }
                }

                msg = self.socket.receive_message() => {
                    match msg {
                        Ok(Some(message)) => {
                            debug!(
                                connection_id = %self.id,
                                room_id = %self.room_id,
                                user_id = %self.user_id,
                                message = %message,
                                "Ignoring client message"
                            );
                        }
                        Ok(None) => break, // Client disconnected
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        let _ = self.socket.close().await;
        Ok(())
    }
}
