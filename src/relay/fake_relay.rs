//! Scriptable stand-in for the relay server side of the wire protocol.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use crate::protocol::{
    decode_envelope, Envelope, EventPayload, MessageType, ResponsePayload, StartPayload,
};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct FakeRelay {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    connections: mpsc::UnboundedReceiver<WebSocketStream<TcpStream>>,
}

pub struct FakeConnection {
    ws: WebSocketStream<TcpStream>,
}

impl FakeRelay {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let (tx, connections) = mpsc::unbounded_channel();

        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = accept_async(stream).await {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if tx.send(ws).is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            accepted,
            connections,
        }
    }

    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub async fn next_connection(&mut self) -> FakeConnection {
        let ws = tokio::time::timeout(STEP_TIMEOUT, self.connections.recv())
            .await
            .expect("client never connected")
            .expect("listener stopped");
        FakeConnection { ws }
    }
}

impl FakeConnection {
    /// Read the client's start message and return its token.
    pub async fn expect_start(&mut self) -> String {
        let text = self.next_text(STEP_TIMEOUT).await.expect("no start message");
        let envelope = decode_envelope(text.as_bytes()).unwrap();
        assert_eq!(envelope.kind, MessageType::Start);
        assert_eq!(envelope.version, 1);

        let start: StartPayload = serde_json::from_str(envelope.data.get()).unwrap();
        start.token
    }

    pub async fn accept(&mut self, receive_id: &str) {
        let ack = serde_json::json!({
            "type": "start",
            "version": 1,
            "data": { "token": receive_id },
        });
        self.send_text(&ack.to_string()).await;
    }

    /// Refuse the session the way the relay does for a bad or busy token.
    pub async fn reject(&mut self) {
        self.ws
            .close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "invalid token".into(),
            }))
            .await
            .unwrap();
    }

    pub async fn send_event(&mut self, event: &EventPayload) {
        let json = Envelope::new(MessageType::Event, event).to_json().unwrap();
        self.send_text(&json).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    pub async fn next_response(&mut self) -> Option<ResponsePayload> {
        self.next_response_within(STEP_TIMEOUT).await
    }

    pub async fn next_response_within(&mut self, wait: Duration) -> Option<ResponsePayload> {
        let text = self.next_text(wait).await?;
        let envelope = decode_envelope(text.as_bytes()).unwrap();
        assert_eq!(envelope.kind, MessageType::Event);
        Some(serde_json::from_str(envelope.data.get()).unwrap())
    }

    /// Drop the connection without a close handshake.
    pub fn abort(self) {
        drop(self.ws);
    }

    /// Next text frame, answering pings along the way
    async fn next_text(&mut self, wait: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let message = tokio::time::timeout_at(deadline, self.ws.next())
                .await
                .ok()??
                .ok()?;
            match message {
                Message::Text(text) => return Some(text),
                Message::Close(_) => return None,
                _ => continue,
            }
        }
    }
}
