//! Byte-stream framing for pipe and socket transports.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{
    AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead, FramedWrite, LengthDelimitedCodec,
    LengthDelimitedCodecError,
};
use toolbridge_core::BridgeError;

use super::{FrameError, FrameSink, FrameSource};

fn write_error(e: &std::io::Error) -> BridgeError {
    BridgeError::connection(format!("write failed: {}", e.kind()))
}

// ===== Newline-delimited =====

/// Reads newline-terminated frames, bounded by `max_message_bytes`.
///
/// Frames are raw bytes; invalid UTF-8 is left for the JSON parser to
/// reject as a malformed message.
pub(super) struct LineSource<R> {
    inner: FramedRead<R, AnyDelimiterCodec>,
}

impl<R: AsyncRead + Unpin> LineSource<R> {
    pub(super) fn new(reader: R, max_message_bytes: usize) -> Self {
        let codec =
            AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), b"\n".to_vec(), max_message_bytes);
        Self {
            inner: FramedRead::new(reader, codec),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Send + Unpin> FrameSource for LineSource<R> {
    async fn next_frame(&mut self) -> Option<Result<Bytes, FrameError>> {
        Some(match self.inner.next().await? {
            Ok(frame) => Ok(frame),
            Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => Err(FrameError::Oversized),
            Err(AnyDelimiterCodecError::Io(e)) => {
                Err(FrameError::Io(format!("read failed: {}", e.kind())))
            }
        })
    }
}

pub(super) struct LineSink<W> {
    writer: W,
}

impl<W> LineSink<W> {
    pub(super) const fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W: AsyncWrite + Send + Unpin> FrameSink for LineSink<W> {
    async fn send_frame(&mut self, frame: Bytes) -> Result<(), BridgeError> {
        // Serialized JSON never contains a raw newline.
        self.writer.write_all(&frame).await.map_err(|e| write_error(&e))?;
        self.writer.write_all(b"\n").await.map_err(|e| write_error(&e))?;
        self.writer.flush().await.map_err(|e| write_error(&e))
    }

    async fn close(&mut self) -> Result<(), BridgeError> {
        self.writer.shutdown().await.map_err(|e| write_error(&e))
    }
}

// ===== Length-prefixed =====

fn length_codec(max_message_bytes: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(max_message_bytes)
        .new_codec()
}

/// Reads frames prefixed by a 4-byte big-endian length.
///
/// The header is checked against the limit before the body is buffered.
pub(super) struct LengthSource<R> {
    inner: FramedRead<R, LengthDelimitedCodec>,
}

impl<R: AsyncRead + Unpin> LengthSource<R> {
    pub(super) fn new(reader: R, max_message_bytes: usize) -> Self {
        Self {
            inner: FramedRead::new(reader, length_codec(max_message_bytes)),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Send + Unpin> FrameSource for LengthSource<R> {
    async fn next_frame(&mut self) -> Option<Result<Bytes, FrameError>> {
        Some(match self.inner.next().await? {
            Ok(frame) => Ok(frame.freeze()),
            Err(e)
                if e
                    .get_ref()
                    .is_some_and(|inner| inner.is::<LengthDelimitedCodecError>()) =>
            {
                Err(FrameError::Oversized)
            }
            Err(e) => Err(FrameError::Io(format!("read failed: {}", e.kind()))),
        })
    }
}

pub(super) struct LengthSink<W> {
    inner: FramedWrite<W, LengthDelimitedCodec>,
}

impl<W: AsyncWrite> LengthSink<W> {
    pub(super) fn new(writer: W, max_message_bytes: usize) -> Self {
        Self {
            inner: FramedWrite::new(writer, length_codec(max_message_bytes)),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Send + Unpin> FrameSink for LengthSink<W> {
    async fn send_frame(&mut self, frame: Bytes) -> Result<(), BridgeError> {
        self.inner.send(frame).await.map_err(|e| write_error(&e))
    }

    async fn close(&mut self) -> Result<(), BridgeError> {
        SinkExt::<Bytes>::close(&mut self.inner)
            .await
            .map_err(|e| write_error(&e))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[tokio::test]
    async fn test_line_source_splits_on_newline() {
        let (mut tx, rx) = tokio::io::duplex(1024);
        let mut source = LineSource::new(rx, 64);

        tx.write_all(b"{\"a\":1}\n{\"b\":2}\n").await.unwrap();
        drop(tx);

        assert_eq!(&source.next_frame().await.unwrap().unwrap()[..], b"{\"a\":1}");
        assert_eq!(&source.next_frame().await.unwrap().unwrap()[..], b"{\"b\":2}");
        assert!(source.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_line_source_flags_oversize() {
        let (mut tx, rx) = tokio::io::duplex(1024);
        let mut source = LineSource::new(rx, 8);

        tx.write_all(b"0123456789abcdef\n").await.unwrap();

        assert!(matches!(
            source.next_frame().await,
            Some(Err(FrameError::Oversized))
        ));
    }

    #[tokio::test]
    async fn test_length_sink_writes_big_endian_header() {
        let (tx, mut rx) = tokio::io::duplex(1024);
        let mut sink = LengthSink::new(tx, 64);

        sink.send_frame(Bytes::from_static(b"{}")).await.unwrap();

        let mut buf = [0u8; 6];
        tokio::io::AsyncReadExt::read_exact(&mut rx, &mut buf)
            .await
            .unwrap();
        assert_eq!(buf, [0, 0, 0, 2, b'{', b'}']);
    }
}
