use http::header::{HeaderMap, HeaderName, HeaderValue, HOST, USER_AGENT};
use reqwest::{Client, Method};
use std::str::FromStr;
use std::time::Instant;
use tracing::debug;
use url::Url;

use super::{output, LOCAL_REQUEST_TIMEOUT};
use crate::error::ForwardError;
use crate::protocol::{EventPayload, Headers, ResponsePayload};

/// User agent our own HTTP client sends when the event carries none
pub const CLIENT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// A local HTTP request built from an event, before it is sent
#[derive(Debug)]
pub struct LocalRequest {
    pub method: Method,
    pub url: Url,
    /// Value for the request's Host, taken from the event's `Host` header
    pub authority: Option<String>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Replays relay events against the local target URL.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct LocalForwarder {
    client: Client,
    target: Url,
}

impl LocalForwarder {
    pub fn new(target: Url) -> Result<Self, ForwardError> {
        if !matches!(target.scheme(), "http" | "https") {
            return Err(ForwardError::UnsupportedScheme(target.scheme().to_string()));
        }

        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(LOCAL_REQUEST_TIMEOUT)
            .user_agent(CLIENT_USER_AGENT)
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self { client, target })
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Send one event to the local target and capture its response.
    ///
    /// Any error means the event goes unanswered.
    pub async fn forward(&self, event: EventPayload) -> Result<ResponsePayload, ForwardError> {
        let request = build_local_request(&self.target, &event)?;

        output::forwarding(self.target.as_str());
        let start = Instant::now();

        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(authority) = request.authority {
            builder = builder.header(HOST, authority);
        }

        let response = builder.body(request.body).send().await?;
        let status = response.status();
        let headers = response_headers(response.headers());
        let body = response.bytes().await?;

        debug!(
            event_id = %event.id,
            status = status.as_u16(),
            bytes = body.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "local target responded"
        );
        output::response_received(status);

        Ok(ResponsePayload::new(event.id, status.as_u16(), headers, &body))
    }
}

/// Build the local request for `event`: method, headers and body come from
/// the event, the destination from `target`.
pub fn build_local_request(target: &Url, event: &EventPayload) -> Result<LocalRequest, ForwardError> {
    let body = event.decode_body()?;
    let method = Method::from_bytes(event.method.as_bytes())?;

    let mut authority = None;
    let mut headers = HeaderMap::with_capacity(event.headers.len());
    for (name, value) in &event.headers {
        let name_lower = name.to_lowercase();

        if name_lower == "host" {
            authority = Some(value.clone());
            continue;
        }

        // Recomputed by the local client for the new connection
        if is_hop_by_hop(&name_lower) || name_lower == "content-length" {
            continue;
        }

        match (
            HeaderName::from_str(name),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            (Ok(header_name), Ok(header_value)) => {
                headers.append(header_name, header_value);
            }
            _ => debug!(header = %name, "skipping invalid header"),
        }
    }

    Ok(LocalRequest {
        method,
        url: target.clone(),
        authority,
        headers,
        body,
    })
}

fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name,
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn response_headers(headers: &HeaderMap) -> Headers {
    let mut out = Headers::new();

    for (name, value) in headers {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }

        // Our client's own default agent says nothing about the local server
        if name == USER_AGENT && (value.is_empty() || value == CLIENT_USER_AGENT) {
            continue;
        }

        out.entry(name.as_str().to_string())
            .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
    }

    out
}
