//! One relay connection: dial, handshake, then two I/O loops.
//!
//! A connection moves through `connect` (dial + start handshake) into
//! [`Handshaken`], which [`Handshaken::activate`] turns into a running
//! [`Session`]. The recv loop owns the read half of the socket and the
//! send loop owns the write half, so the socket only ever has one writer.
//! [`Session::shutdown`] stops both loops and waits for them before the
//! socket is dropped.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::forwarder::LocalForwarder;
use super::{output, Timings, OUTBOUND_CAPACITY};
use crate::error::RelayError;
use crate::protocol::{encode_response, encode_start, IncomingMessage, ReceiveId, ResponsePayload};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A socket whose start handshake succeeded
pub struct Handshaken {
    stream: WsStream,
    pub receive_id: ReceiveId,
}

/// Running recv/send loops for one connection generation
pub struct Session {
    stop: CancellationToken,
    errors: mpsc::Receiver<RelayError>,
    recv: JoinHandle<()>,
    send: JoinHandle<Option<ResponsePayload>>,
}

/// Dial the relay and exchange the start handshake.
///
/// A policy-violation close in answer to the start message means the
/// token is invalid or in use elsewhere and maps to the fatal
/// [`RelayError::TokenRejected`].
pub async fn connect(url: &str, token: &str, timings: &Timings) -> Result<Handshaken, RelayError> {
    debug!(url, "dialing relay");

    let (mut stream, _) = timeout(timings.handshake, connect_async(url))
        .await
        .map_err(|_| RelayError::DialTimeout)?
        .map_err(RelayError::Dial)?;

    stream.send(Message::Text(encode_start(token)?)).await?;

    let receive_id = timeout(timings.handshake, read_start_ack(&mut stream))
        .await
        .map_err(|_| RelayError::Handshake("timed out waiting for start acknowledgement".to_string()))??;

    debug!(%receive_id, "handshake complete");
    Ok(Handshaken { stream, receive_id })
}

async fn read_start_ack<S>(stream: &mut S) -> Result<ReceiveId, RelayError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let message = match stream.next().await {
            Some(message) => message?,
            None => return Err(RelayError::Closed),
        };

        let frame = match message {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(data) => data,
            Message::Close(Some(frame)) if frame.code == CloseCode::Policy => {
                return Err(RelayError::TokenRejected)
            }
            Message::Close(_) => return Err(RelayError::Closed),
            _ => continue,
        };

        return match IncomingMessage::decode(&frame) {
            Ok(IncomingMessage::Start(ack)) => Ok(ack.token),
            Ok(other) => Err(RelayError::Handshake(format!(
                "expected start acknowledgement, got {:?}",
                other
            ))),
            Err(e) => Err(RelayError::Handshake(e.to_string())),
        };
    }
}

impl Handshaken {
    /// Start the recv and send loops.
    ///
    /// `unsent` is a response whose write failed on the previous
    /// connection; it is written before anything else. The session stops
    /// on its own when `parent` is cancelled.
    pub fn activate(
        self,
        forwarder: LocalForwarder,
        unsent: Option<ResponsePayload>,
        timings: Timings,
        parent: &CancellationToken,
    ) -> Session {
        let (sink, stream) = self.stream.split();
        let stop = parent.child_token();

        // Fresh per generation, so stale forwarding tasks can't reach a new socket
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel(2);

        let recv = tokio::spawn(recv_loop(
            stream,
            forwarder,
            outbound_tx,
            errors_tx.clone(),
            stop.clone(),
            timings.pong_wait,
        ));
        let send = tokio::spawn(send_loop(
            sink,
            outbound_rx,
            unsent,
            errors_tx,
            stop.clone(),
            timings,
        ));

        Session {
            stop,
            errors: errors_rx,
            recv,
            send,
        }
    }
}

impl Session {
    /// Wait for the first loop failure of this connection
    pub async fn failed(&mut self) -> RelayError {
        self.errors.recv().await.unwrap_or(RelayError::Closed)
    }

    /// Stop both loops and wait for them to return.
    ///
    /// Returns the response whose write failed, if any, so the next
    /// connection can send it.
    pub async fn shutdown(self) -> Option<ResponsePayload> {
        self.stop.cancel();

        if let Err(e) = self.recv.await {
            warn!(error = %e, "recv loop did not exit cleanly");
        }

        match self.send.await {
            Ok(unsent) => unsent,
            Err(e) => {
                warn!(error = %e, "send loop did not exit cleanly");
                None
            }
        }
    }
}

/// Report a loop failure unless the loop was asked to stop.
fn report(errors: &mpsc::Sender<RelayError>, stop: &CancellationToken, error: RelayError) {
    if stop.is_cancelled() {
        debug!(%error, "ignoring error after stop");
        return;
    }
    let _ = errors.try_send(error);
}

async fn recv_loop<S>(
    mut stream: S,
    forwarder: LocalForwarder,
    outbound: mpsc::Sender<ResponsePayload>,
    errors: mpsc::Sender<RelayError>,
    stop: CancellationToken,
    pong_wait: Duration,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut deadline = Instant::now() + pong_wait;

    let error = loop {
        let next = tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            next = timeout_at(deadline, stream.next()) => next,
        };

        match next {
            Err(_) => break RelayError::KeepaliveTimeout(pong_wait),
            Ok(None) => break RelayError::Closed,
            Ok(Some(Err(e))) => break RelayError::WebSocket(e),
            Ok(Some(Ok(message))) => match message {
                Message::Pong(_) => deadline = Instant::now() + pong_wait,
                Message::Text(text) => dispatch(text.into_bytes(), &forwarder, &outbound),
                Message::Binary(data) => dispatch(data, &forwarder, &outbound),
                Message::Close(frame) => {
                    debug!(?frame, "relay closed the connection");
                    break RelayError::Closed;
                }
                _ => {}
            },
        }
    };

    report(&errors, &stop, error);
}

/// Handle a frame on its own task so a slow local target never stalls reads.
fn dispatch(frame: Vec<u8>, forwarder: &LocalForwarder, outbound: &mpsc::Sender<ResponsePayload>) {
    let forwarder = forwarder.clone();
    let outbound = outbound.clone();
    tokio::spawn(handle_frame(frame, forwarder, outbound));
}

async fn handle_frame(
    frame: Vec<u8>,
    forwarder: LocalForwarder,
    outbound: mpsc::Sender<ResponsePayload>,
) {
    let event = match IncomingMessage::decode(&frame) {
        Ok(IncomingMessage::Event(event)) => event,
        Ok(IncomingMessage::Start(_)) => {
            debug!("ignoring start acknowledgement outside the handshake");
            return;
        }
        Err(error) => {
            warn!(%error, "dropping undecodable frame");
            output::invalid_message();
            return;
        }
    };

    let event_id = event.id.clone();
    match forwarder.forward(event).await {
        Ok(response) => {
            // Blocks while the queue is full
            if outbound.send(response).await.is_err() {
                debug!(%event_id, "connection gone before response was queued, dropping");
            }
        }
        Err(error) => {
            warn!(%event_id, %error, "failed to forward event");
            output::local_request_failed(&error);
        }
    }
}

async fn send_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<ResponsePayload>,
    unsent: Option<ResponsePayload>,
    errors: mpsc::Sender<RelayError>,
    stop: CancellationToken,
    timings: Timings,
) -> Option<ResponsePayload>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    if let Some(response) = unsent {
        debug!(event_id = %response.id, "resending response from previous connection");
        if let Err(error) = write_response(&mut sink, &response, timings.write_wait).await {
            report(&errors, &stop, error);
            return Some(response);
        }
    }

    let mut ping = tokio::time::interval_at(Instant::now() + timings.ping_period, timings.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => {
                let _ = write(&mut sink, Message::Close(None), timings.write_wait).await;
                return None;
            }
            response = outbound.recv() => {
                let Some(response) = response else {
                    // Every producer is gone, so the recv loop has ended
                    stop.cancelled().await;
                    return None;
                };
                if let Err(error) = write_response(&mut sink, &response, timings.write_wait).await {
                    report(&errors, &stop, error);
                    return Some(response);
                }
            }
            _ = ping.tick() => {
                if let Err(error) = write(&mut sink, Message::Ping(Vec::new()), timings.write_wait).await {
                    report(&errors, &stop, error);
                    return None;
                }
            }
        }
    }
}

async fn write_response<S>(
    sink: &mut S,
    response: &ResponsePayload,
    write_wait: Duration,
) -> Result<(), RelayError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = match encode_response(response) {
        Ok(text) => text,
        Err(e) => {
            warn!(event_id = %response.id, error = %e, "failed to encode response, dropping");
            return Ok(());
        }
    };
    write(sink, Message::Text(text), write_wait).await
}

async fn write<S>(sink: &mut S, message: Message, write_wait: Duration) -> Result<(), RelayError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    match timeout(write_wait, sink.send(message)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(RelayError::WriteTimeout),
    }
}
