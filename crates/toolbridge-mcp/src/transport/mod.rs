//! Framed message transport.
//!
//! A [`Transport`] moves [`WireMessage`]s over one of three wire styles:
//!
//! | Style | Framing | Constructor |
//! |-------|---------|-------------|
//! | pipe | one JSON object per line | [`Transport::pipe`], [`Transport::line_delimited`] |
//! | socket | 4-byte big-endian length prefix | [`Transport::connect_socket`], [`Transport::length_delimited`] |
//! | push-stream | server-sent events in, HTTP POST out | [`Transport::connect_push_stream`] |
//!
//! Receiving enforces the message size limit before a frame is buffered in
//! full. Malformed messages are logged and skipped until too many arrive in
//! a row. An oversized frame, an I/O failure, or end of stream closes the
//! receiver for good.

mod framed;
mod push_stream;

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use toolbridge_core::{BridgeError, Secret};

use crate::protocol::WireMessage;

/// Consecutive malformed messages tolerated before the receiver closes.
pub const MAX_CONSECUTIVE_MALFORMED: u32 = 8;

/// Size and error limits applied by every transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportLimits {
    pub max_message_bytes: usize,
    pub max_consecutive_malformed: u32,
}

impl TransportLimits {
    pub const fn new(max_message_bytes: usize) -> Self {
        Self {
            max_message_bytes,
            max_consecutive_malformed: MAX_CONSECUTIVE_MALFORMED,
        }
    }
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self::new(toolbridge_core::settings::DEFAULT_MAX_MESSAGE_BYTES)
    }
}

/// Why a frame could not be read.
#[derive(Debug)]
pub(crate) enum FrameError {
    /// The frame is larger than the configured limit.
    Oversized,
    /// The underlying channel failed.
    Io(String),
}

/// Writes whole frames.
#[async_trait]
pub(crate) trait FrameSink: Send {
    async fn send_frame(&mut self, frame: Bytes) -> Result<(), BridgeError>;

    /// Flush and close the outbound direction (EOF for pipes).
    async fn close(&mut self) -> Result<(), BridgeError>;
}

/// Reads whole frames. `None` means the peer closed the channel.
#[async_trait]
pub(crate) trait FrameSource: Send {
    async fn next_frame(&mut self) -> Option<Result<Bytes, FrameError>>;
}

/// Outbound half of a transport.
pub struct TransportSender {
    sink: Box<dyn FrameSink>,
    limits: TransportLimits,
    closed: bool,
}

impl TransportSender {
    /// Serialize and write one message as a single frame.
    pub async fn send(&mut self, message: &WireMessage) -> Result<(), BridgeError> {
        if self.closed {
            return Err(BridgeError::connection("transport is closed"));
        }
        let frame = message.to_bytes()?;
        if frame.len() > self.limits.max_message_bytes {
            return Err(BridgeError::validation(format!(
                "outgoing message exceeds {} bytes",
                self.limits.max_message_bytes
            )));
        }
        self.sink.send_frame(Bytes::from(frame)).await
    }

    /// Close the outbound direction. Later sends fail with a connection error.
    pub async fn close(&mut self) -> Result<(), BridgeError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink.close().await
    }
}

/// Inbound half of a transport.
pub struct TransportReceiver {
    source: Box<dyn FrameSource>,
    limits: TransportLimits,
    malformed_streak: u32,
    closed: bool,
}

impl TransportReceiver {
    /// Read the next valid message.
    ///
    /// # Errors
    ///
    /// - `Validation` when a frame exceeds the size limit; the receiver is
    ///   closed afterwards.
    /// - `Connection` on end of stream, I/O failure, too many consecutive
    ///   malformed messages, or any read after the receiver closed.
    pub async fn receive(&mut self) -> Result<WireMessage, BridgeError> {
        loop {
            if self.closed {
                return Err(BridgeError::connection("transport is closed"));
            }

            let frame = match self.source.next_frame().await {
                None => {
                    self.closed = true;
                    return Err(BridgeError::connection("peer closed the stream"));
                }
                Some(Err(FrameError::Oversized)) => {
                    self.closed = true;
                    return Err(BridgeError::validation(format!(
                        "incoming message exceeds {} bytes",
                        self.limits.max_message_bytes
                    )));
                }
                Some(Err(FrameError::Io(reason))) => {
                    self.closed = true;
                    return Err(BridgeError::connection(reason));
                }
                Some(Ok(frame)) => frame,
            };

            if frame.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match WireMessage::parse(&frame) {
                Ok(message) => {
                    self.malformed_streak = 0;
                    return Ok(message);
                }
                Err(e) => {
                    self.malformed_streak += 1;
                    tracing::warn!(
                        error = %e,
                        streak = self.malformed_streak,
                        "Skipping malformed message"
                    );
                    if self.malformed_streak > self.limits.max_consecutive_malformed {
                        self.closed = true;
                        return Err(BridgeError::connection(
                            "too many consecutive malformed messages",
                        ));
                    }
                }
            }
        }
    }

    pub const fn is_closed(&self) -> bool {
        self.closed
    }
}

/// A bidirectional message channel.
pub struct Transport {
    sender: TransportSender,
    receiver: TransportReceiver,
}

impl Transport {
    fn from_parts(
        sink: Box<dyn FrameSink>,
        source: Box<dyn FrameSource>,
        limits: TransportLimits,
    ) -> Self {
        Self {
            sender: TransportSender {
                sink,
                limits,
                closed: false,
            },
            receiver: TransportReceiver {
                source,
                limits,
                malformed_streak: 0,
                closed: false,
            },
        }
    }

    /// Newline-delimited JSON over any byte stream pair.
    pub fn line_delimited<R, W>(reader: R, writer: W, limits: TransportLimits) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::from_parts(
            Box::new(framed::LineSink::new(writer)),
            Box::new(framed::LineSource::new(reader, limits.max_message_bytes)),
            limits,
        )
    }

    /// Length-prefixed JSON over any byte stream pair.
    pub fn length_delimited<R, W>(reader: R, writer: W, limits: TransportLimits) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::from_parts(
            Box::new(framed::LengthSink::new(writer, limits.max_message_bytes)),
            Box::new(framed::LengthSource::new(reader, limits.max_message_bytes)),
            limits,
        )
    }

    /// Pipe transport over a child's stdout and stdin.
    pub fn pipe(
        stdout: tokio::process::ChildStdout,
        stdin: tokio::process::ChildStdin,
        limits: TransportLimits,
    ) -> Self {
        Self::line_delimited(stdout, stdin, limits)
    }

    /// Connect a socket transport to `host:port` or `unix:/path`.
    pub async fn connect_socket(endpoint: &str, limits: TransportLimits) -> Result<Self, BridgeError> {
        #[cfg(unix)]
        {
            if let Some(path) = endpoint.strip_prefix("unix:") {
                let stream = tokio::net::UnixStream::connect(path).await.map_err(|e| {
                    BridgeError::connection(format!("socket connect failed: {}", e.kind()))
                })?;
                let (reader, writer) = stream.into_split();
                return Ok(Self::length_delimited(reader, writer, limits));
            }
        }

        let stream = tokio::net::TcpStream::connect(endpoint)
            .await
            .map_err(|e| BridgeError::connection(format!("socket connect failed: {}", e.kind())))?;
        stream
            .set_nodelay(true)
            .map_err(|e| BridgeError::connection(format!("socket setup failed: {}", e.kind())))?;
        let (reader, writer) = stream.into_split();
        Ok(Self::length_delimited(reader, writer, limits))
    }

    /// Open a push-stream (server-sent events) transport.
    ///
    /// Waits for the server's `endpoint` event, which names the URL that
    /// outgoing messages are POSTed to. Credentials are sent as headers on
    /// every request.
    pub async fn connect_push_stream(
        url: &str,
        credentials: &BTreeMap<String, Secret>,
        limits: TransportLimits,
    ) -> Result<Self, BridgeError> {
        let (sink, source) = push_stream::connect(url, credentials, limits).await?;
        Ok(Self::from_parts(Box::new(sink), Box::new(source), limits))
    }

    pub async fn send(&mut self, message: &WireMessage) -> Result<(), BridgeError> {
        self.sender.send(message).await
    }

    pub async fn receive(&mut self) -> Result<WireMessage, BridgeError> {
        self.receiver.receive().await
    }

    /// Split into halves that can be used from different tasks.
    pub fn into_split(self) -> (TransportSender, TransportReceiver) {
        (self.sender, self.receiver)
    }
}
