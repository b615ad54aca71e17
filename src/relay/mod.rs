//! Webhook relay client.
//!
//! This module provides the listen functionality:
//! - [`RelayClient`] - Reconnecting supervisor around one relay session at a time
//! - Session transport (handshake, keepalive, recv/send loops)
//! - Local forwarder replaying webhook deliveries against the local URL

mod backoff;
mod forwarder;
mod output;
mod session;
pub mod token;

#[cfg(test)]
mod fake_relay;

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::error::{RelayError, SetupError};
use crate::protocol::{ReceiveId, ResponsePayload};

pub use backoff::{Backoff, DEFAULT_STEPS};
pub use forwarder::LocalForwarder;

const DEFAULT_RELAY_HOST: &str = "api.relay.svix.com";
const API_PREFIX: &str = "api/v1";
const RECEIVE_URL_BASE: &str = "https://play.svix.com/in";
const VIEW_URL_BASE: &str = "https://play.svix.com/view";
/// Asks the relay to keep a viewable history of the session
const LOGGING_TOKEN_PREFIX: &str = "c_";

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const PONG_WAIT: Duration = Duration::from_secs(10);
pub const PING_PERIOD: Duration = Duration::from_secs(2);
pub const WRITE_WAIT: Duration = Duration::from_secs(10);
pub const LOCAL_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Bound on queued responses; a full queue throttles forwarding tasks.
pub const OUTBOUND_CAPACITY: usize = 10;

/// Socket timing for one connection
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub handshake: Duration,
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub write_wait: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            handshake: HANDSHAKE_TIMEOUT,
            pong_wait: PONG_WAIT,
            ping_period: PING_PERIOD,
            write_wait: WRITE_WAIT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListenOptions {
    /// Use `ws://` instead of `wss://`
    pub disable_security: bool,
    /// Alternate relay host, for testing against a non-production relay
    pub relay_host: Option<String>,
    /// Let the relay keep a viewable history of this session
    pub logging: bool,
    pub timings: Timings,
    pub backoff: Vec<Duration>,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            disable_security: false,
            relay_host: None,
            logging: true,
            timings: Timings::default(),
            backoff: DEFAULT_STEPS.to_vec(),
        }
    }
}

pub struct RelayClient {
    token: String,
    websocket_url: String,
    view_url: Option<String>,
    forwarder: LocalForwarder,
    timings: Timings,
    backoff: Vec<Duration>,
}

impl RelayClient {
    pub fn new(token: &str, local_url: Url, options: ListenOptions) -> Result<Self, SetupError> {
        if options.timings.ping_period.is_zero() {
            return Err(SetupError::ZeroDuration("ping period"));
        }

        let scheme = if options.disable_security { "ws" } else { "wss" };
        let host = options.relay_host.as_deref().unwrap_or(DEFAULT_RELAY_HOST);

        let (token, view_url) = if options.logging {
            let token = format!("{}{}", LOGGING_TOKEN_PREFIX, token);
            let view_url = format!("{}/{}/", VIEW_URL_BASE, token);
            (token, Some(view_url))
        } else {
            (token.to_string(), None)
        };

        Ok(Self {
            token,
            websocket_url: format!("{}://{}/{}/listen/", scheme, host, API_PREFIX),
            view_url,
            forwarder: LocalForwarder::new(local_url)?,
            timings: options.timings,
            backoff: options.backoff,
        })
    }

    #[cfg(test)]
    pub fn websocket_url(&self) -> &str {
        &self.websocket_url
    }

    /// Run until `cancel` fires or the relay rejects the token.
    ///
    /// Transient failures reconnect with backoff forever. Cancellation is a
    /// normal shutdown and returns `Ok`; only a rejected token returns an
    /// error.
    pub async fn listen(&self, cancel: CancellationToken) -> Result<(), RelayError> {
        let mut backoff = Backoff::new(&self.backoff);
        let mut unsent: Option<ResponsePayload> = None;

        loop {
            let attempt = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                attempt = session::connect(&self.websocket_url, &self.token, &self.timings) => attempt,
            };

            match attempt {
                Ok(handshaken) => {
                    backoff.reset();
                    self.announce(&handshaken.receive_id);

                    let mut session = handshaken.activate(
                        self.forwarder.clone(),
                        unsent.take(),
                        self.timings,
                        &cancel,
                    );

                    let failure = tokio::select! {
                        _ = cancel.cancelled() => None,
                        error = session.failed() => Some(error),
                    };
                    unsent = session.shutdown().await;

                    let Some(error) = failure else {
                        info!("relay listener stopped");
                        return Ok(());
                    };
                    warn!(%error, "relay connection lost");
                    output::connection_lost(&error);
                }
                Err(error) if error.is_fatal() => {
                    warn!(%error, "relay rejected the session, not retrying");
                    return Err(error);
                }
                Err(error) => {
                    warn!(%error, url = %self.websocket_url, "failed to connect to relay");
                    output::connection_failed(&error);
                }
            }

            let delay = backoff.next_delay();
            output::retrying(delay);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn announce(&self, receive_id: &ReceiveId) {
        let receive_url = receive_url(receive_id);
        let local_url = self.forwarder.target().as_str();

        info!(%receive_url, local_url, "relay session active");
        output::listening(&receive_url, local_url, self.view_url.as_deref());
    }
}

/// Public URL webhook senders post to for this session
pub fn receive_url(receive_id: &ReceiveId) -> String {
    format!("{}/{}/", RECEIVE_URL_BASE, receive_id)
}
