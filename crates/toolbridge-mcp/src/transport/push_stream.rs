//! Push-stream transport: server-sent events in, HTTP POST out.
//!
//! The client opens a long-lived `GET` on the configured URL. The server's
//! first `endpoint` event names the URL that outgoing messages are POSTed
//! to; every later `message` event carries one JSON-RPC message.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::Url;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use toolbridge_core::{BridgeError, Secret};

use super::{FrameError, FrameSink, FrameSource, TransportLimits};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POST_TIMEOUT: Duration = Duration::from_secs(30);

const ENDPOINT_EVENT: &str = "endpoint";
const MESSAGE_EVENT: &str = "message";

/// Open the event stream and wait for the POST endpoint.
pub(super) async fn connect(
    url: &str,
    credentials: &BTreeMap<String, Secret>,
    limits: TransportLimits,
) -> Result<(PostSink, SseSource), BridgeError> {
    let base = Url::parse(url)
        .map_err(|e| BridgeError::validation(format!("invalid endpoint URL: {e}")))?;

    let client = reqwest::Client::builder()
        .default_headers(credential_headers(credentials)?)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| BridgeError::connection(format!("HTTP client setup failed: {}", e.without_url())))?;

    let response = client
        .get(base.clone())
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|e| BridgeError::connection(format!("event stream request failed: {}", e.without_url())))?;

    let status = response.status();
    if !status.is_success() {
        return Err(BridgeError::connection(format!(
            "event stream rejected with HTTP {status}"
        )));
    }

    let mut source = SseSource {
        stream: response.bytes_stream().boxed(),
        parser: SseParser::new(limits.max_message_bytes),
        ready: VecDeque::new(),
    };

    let post_url = loop {
        match source.next_event().await {
            None => {
                return Err(BridgeError::connection(
                    "event stream closed before announcing an endpoint",
                ));
            }
            Some(Err(FrameError::Oversized)) => {
                return Err(BridgeError::validation("endpoint event exceeds size limit"));
            }
            Some(Err(FrameError::Io(reason))) => return Err(BridgeError::connection(reason)),
            Some(Ok(event)) if event.event.as_deref() == Some(ENDPOINT_EVENT) => {
                break resolve_post_url(&base, &event.data)?;
            }
            Some(Ok(_)) => {
                tracing::debug!("Ignoring event received before endpoint announcement");
            }
        }
    };

    tracing::debug!(path = post_url.path(), "Push-stream endpoint announced");

    Ok((
        PostSink {
            client,
            url: post_url,
        },
        source,
    ))
}

/// Resolve the announced endpoint against the stream URL.
///
/// Credentials ride on every POST, so the endpoint must stay on the
/// stream's origin.
fn resolve_post_url(base: &Url, data: &[u8]) -> Result<Url, BridgeError> {
    let announced = std::str::from_utf8(data)
        .map_err(|_| BridgeError::validation("endpoint event is not valid UTF-8"))?
        .trim();
    let url = base
        .join(announced)
        .map_err(|e| BridgeError::validation(format!("invalid announced endpoint: {e}")))?;
    if url.origin() != base.origin() {
        return Err(BridgeError::validation(
            "announced endpoint is on a different origin",
        ));
    }
    Ok(url)
}

fn credential_headers(credentials: &BTreeMap<String, Secret>) -> Result<HeaderMap, BridgeError> {
    let mut headers = HeaderMap::new();
    for (key, secret) in credentials {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| BridgeError::validation(format!("invalid credential header name '{key}'")))?;
        let mut value = HeaderValue::from_str(secret.expose())
            .map_err(|_| BridgeError::validation(format!("invalid value for credential '{key}'")))?;
        value.set_sensitive(true);
        headers.insert(name, value);
    }
    Ok(headers)
}

// ===== Outbound =====

pub(super) struct PostSink {
    client: reqwest::Client,
    url: Url,
}

#[async_trait]
impl FrameSink for PostSink {
    async fn send_frame(&mut self, frame: Bytes) -> Result<(), BridgeError> {
        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .timeout(POST_TIMEOUT)
            .body(frame)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BridgeError::Timeout(POST_TIMEOUT)
                } else {
                    BridgeError::connection(format!("POST failed: {}", e.without_url()))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(BridgeError::connection(format!(
                "POST rejected with HTTP {status}"
            )))
        }
    }

    async fn close(&mut self) -> Result<(), BridgeError> {
        Ok(())
    }
}

// ===== Inbound =====

pub(super) struct SseSource {
    stream: BoxStream<'static, reqwest::Result<Bytes>>,
    parser: SseParser,
    ready: VecDeque<SseEvent>,
}

impl SseSource {
    async fn next_event(&mut self) -> Option<Result<SseEvent, FrameError>> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Some(Ok(event));
            }
            let chunk = match self.stream.next().await? {
                Ok(chunk) => chunk,
                Err(e) => {
                    return Some(Err(FrameError::Io(format!(
                        "event stream failed: {}",
                        e.without_url()
                    ))));
                }
            };
            match self.parser.feed(&chunk) {
                Ok(events) => self.ready.extend(events),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[async_trait]
impl FrameSource for SseSource {
    async fn next_frame(&mut self) -> Option<Result<Bytes, FrameError>> {
        loop {
            let event = match self.next_event().await? {
                Ok(event) => event,
                Err(e) => return Some(Err(e)),
            };
            match event.event.as_deref() {
                None | Some(MESSAGE_EVENT) => return Some(Ok(Bytes::from(event.data))),
                Some(ENDPOINT_EVENT) => {
                    tracing::debug!("Ignoring repeated endpoint announcement");
                }
                Some(other) => {
                    tracing::trace!(event = other, "Ignoring unknown event type");
                }
            }
        }
    }
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SseEvent {
    event: Option<String>,
    data: Vec<u8>,
}

/// Incremental `text/event-stream` parser.
///
/// Chunks may split lines and events anywhere. Both a pending line and the
/// accumulated data of the current event are bounded by `max_bytes`.
struct SseParser {
    max_bytes: usize,
    line: Vec<u8>,
    event: Option<String>,
    data: Vec<u8>,
    has_data: bool,
}

impl SseParser {
    const fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            line: Vec::new(),
            event: None,
            data: Vec::new(),
            has_data: false,
        }
    }

    fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, FrameError> {
        let mut events = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.line.extend_from_slice(&rest[..pos]);
            rest = &rest[pos + 1..];

            let mut line = std::mem::take(&mut self.line);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(event) = self.process_line(&line)? {
                events.push(event);
            }
        }

        self.line.extend_from_slice(rest);
        if self.line.len() > self.max_bytes {
            return Err(FrameError::Oversized);
        }
        Ok(events)
    }

    fn process_line(&mut self, line: &[u8]) -> Result<Option<SseEvent>, FrameError> {
        if line.is_empty() {
            return Ok(self.dispatch());
        }
        if line[0] == b':' {
            return Ok(None);
        }

        let (field, value) = match line.iter().position(|&b| b == b':') {
            Some(colon) => {
                let value = &line[colon + 1..];
                (&line[..colon], value.strip_prefix(b" ").unwrap_or(value))
            }
            None => (line, &[][..]),
        };

        match field {
            b"event" => {
                self.event = Some(String::from_utf8_lossy(value).into_owned());
            }
            b"data" => {
                let separator = usize::from(self.has_data);
                if self.data.len() + separator + value.len() > self.max_bytes {
                    return Err(FrameError::Oversized);
                }
                if self.has_data {
                    self.data.push(b'\n');
                }
                self.data.extend_from_slice(value);
                self.has_data = true;
            }
            // `id`, `retry` and unknown fields carry nothing we use.
            _ => {}
        }
        Ok(None)
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if !std::mem::take(&mut self.has_data) {
            return None;
        }
        Some(SseEvent {
            event,
            data: std::mem::take(&mut self.data),
        })
    }
}
