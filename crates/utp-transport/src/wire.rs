//! Wire format: length-prefixed bincode v2 frames.
//!
//! Each message on the wire is:
//!   [4 bytes big-endian length][bincode v2 payload]
//!
//! [`FrameWriter`] and [`FrameReader`] form the encoder/decoder pair that is
//! attached to every uTP (or TLS-over-uTP) byte stream.

use bincode::{Decode, Encode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::trace;

use crate::error::TransportError;

/// Default maximum frame payload size (16 MiB). Prevents allocation bombs.
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Encode a message to a length-prefixed byte vector.
pub fn encode_message<T: Encode>(msg: &T, max_size: u32) -> Result<Vec<u8>, TransportError> {
    let config = bincode::config::standard();
    let payload = bincode::encode_to_vec(msg, config)
        .map_err(|e| TransportError::Serialization(e.to_string()))?;

    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= max_size)
        .ok_or(TransportError::MessageTooLarge {
            size: payload.len(),
            max: max_size,
        })?;

    let mut buf = Vec::with_capacity(LEN_PREFIX + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode a message from a bincode v2 payload (without the length prefix).
pub fn decode_message<T: Decode<()>>(payload: &[u8]) -> Result<T, TransportError> {
    let config = bincode::config::standard();
    let (msg, _) = bincode::decode_from_slice(payload, config)
        .map_err(|e| TransportError::Deserialization(e.to_string()))?;
    Ok(msg)
}

/// Buffered frame encoder over any async writer.
pub struct FrameWriter<W> {
    inner: BufWriter<W>,
    max_size: u32,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W, max_size: u32) -> Self {
        Self {
            inner: BufWriter::new(writer),
            max_size,
        }
    }

    /// Encode one message and flush it to the underlying writer.
    pub async fn write<T: Encode>(&mut self, msg: &T) -> Result<(), TransportError> {
        let frame = encode_message(msg, self.max_size)?;
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        trace!(len = frame.len() - LEN_PREFIX, "sent frame");
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), TransportError> {
        self.inner.flush().await?;
        Ok(())
    }

    /// Flush pending bytes and shut the write side down.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.flush().await?;
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Frame decoder over any async reader.
///
/// A partially read frame is kept across calls, so a `read` dropped by a
/// timeout resumes where it stopped.
pub struct FrameReader<R> {
    inner: R,
    max_size: u32,
    prefix: [u8; LEN_PREFIX],
    prefix_filled: usize,
    payload: Option<Vec<u8>>,
    payload_filled: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, max_size: u32) -> Self {
        Self {
            inner: reader,
            max_size,
            prefix: [0u8; LEN_PREFIX],
            prefix_filled: 0,
            payload: None,
            payload_filled: 0,
        }
    }

    /// Read and decode one message.
    ///
    /// Returns `None` if the stream ended cleanly on a frame boundary.
    /// Cancel-safe.
    pub async fn read<T: Decode<()>>(&mut self) -> Result<Option<T>, TransportError> {
        if self.payload.is_none() {
            let Some(len) = self.read_prefix().await? else {
                return Ok(None);
            };
            self.payload = Some(vec![0u8; len]);
            self.payload_filled = 0;
        }

        let payload = self.payload.get_or_insert_with(Vec::new);
        while self.payload_filled < payload.len() {
            let n = self.inner.read(&mut payload[self.payload_filled..]).await?;
            if n == 0 {
                return Err(TransportError::Deserialization(format!(
                    "stream ended inside a {}-byte frame",
                    payload.len()
                )));
            }
            self.payload_filled += n;
        }

        let payload = self.payload.take().unwrap_or_default();
        self.payload_filled = 0;
        let msg = decode_message(&payload)?;
        trace!(len = payload.len(), "received frame");
        Ok(Some(msg))
    }

    /// Fill the length prefix. `None` on a clean end of stream.
    async fn read_prefix(&mut self) -> Result<Option<usize>, TransportError> {
        while self.prefix_filled < LEN_PREFIX {
            let n = self.inner.read(&mut self.prefix[self.prefix_filled..]).await?;
            if n == 0 {
                if self.prefix_filled == 0 {
                    return Ok(None);
                }
                return Err(TransportError::Deserialization(
                    "stream ended inside a length prefix".to_string(),
                ));
            }
            self.prefix_filled += n;
        }
        self.prefix_filled = 0;

        let len = u32::from_be_bytes(self.prefix);
        if len > self.max_size {
            return Err(TransportError::MessageTooLarge {
                size: len as usize,
                max: self.max_size,
            });
        }
        Ok(Some(len as usize))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::message::Message;

    #[test]
    fn encoded_length_prefix_matches_payload() {
        let msg = Message::new("hello").with_header("Micro-Id", "42");
        let bytes = encode_message(&msg, DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        let len = u32::from_be_bytes(bytes[..4].try_into().unwrap());
        assert_eq!(len as usize, bytes.len() - 4);

        let decoded: Message = decode_message(&bytes[4..]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let msg = Message::new(vec![0u8; 128]);
        let err = encode_message(&msg, 64).unwrap_err();
        assert!(matches!(err, TransportError::MessageTooLarge { max: 64, .. }));
    }

    #[tokio::test]
    async fn frames_cross_a_duplex_pipe_in_order() {
        let (client, server) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(client, DEFAULT_MAX_MESSAGE_SIZE);
        let mut reader = FrameReader::new(server, DEFAULT_MAX_MESSAGE_SIZE);

        let sent: Vec<Message> = (0u8..3)
            .map(|i| Message::new(vec![i; 100]).with_header("seq", i.to_string()))
            .collect();

        let to_send = sent.clone();
        let write_task = tokio::spawn(async move {
            for msg in &to_send {
                writer.write(msg).await.unwrap();
            }
            writer.shutdown().await.unwrap();
        });

        for expected in &sent {
            let got: Message = reader.read().await.unwrap().unwrap();
            assert_eq!(&got, expected);
        }
        let end: Option<Message> = reader.read().await.unwrap();
        assert!(end.is_none());
        write_task.await.unwrap();
    }

    #[tokio::test]
    async fn eof_inside_frame_is_an_error() {
        let frame = encode_message(&Message::new("truncated"), DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        let cut = &frame[..frame.len() - 2];
        let mut reader = FrameReader::new(cut, DEFAULT_MAX_MESSAGE_SIZE);
        let err = reader.read::<Message>().await.unwrap_err();
        assert!(matches!(err, TransportError::Deserialization(_)));
    }

    #[tokio::test]
    async fn eof_inside_length_prefix_is_an_error() {
        let mut reader = FrameReader::new(&[0u8, 0][..], DEFAULT_MAX_MESSAGE_SIZE);
        let err = reader.read::<Message>().await.unwrap_err();
        assert!(matches!(err, TransportError::Deserialization(_)));
    }

    #[tokio::test]
    async fn reader_rejects_frame_above_limit() {
        let frame = encode_message(&Message::new(vec![7u8; 256]), DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        let mut reader = FrameReader::new(&frame[..], 16);
        let err = reader.read::<Message>().await.unwrap_err();
        assert!(matches!(err, TransportError::MessageTooLarge { max: 16, .. }));
    }

    #[tokio::test]
    async fn interrupted_read_resumes_mid_frame() {
        let (mut raw, server) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(server, DEFAULT_MAX_MESSAGE_SIZE);
        let first = encode_message(&Message::new("first"), DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        let second = encode_message(&Message::new("second"), DEFAULT_MAX_MESSAGE_SIZE).unwrap();

        // Stop once inside the prefix and once inside the payload.
        raw.write_all(&first[..2]).await.unwrap();
        let stalled = tokio::time::timeout(Duration::from_millis(20), reader.read::<Message>());
        assert!(stalled.await.is_err());
        raw.write_all(&first[2..6]).await.unwrap();
        let stalled = tokio::time::timeout(Duration::from_millis(20), reader.read::<Message>());
        assert!(stalled.await.is_err());

        raw.write_all(&first[6..]).await.unwrap();
        raw.write_all(&second).await.unwrap();
        let got: Message = reader.read().await.unwrap().unwrap();
        assert_eq!(got.body, b"first");
        let got: Message = reader.read().await.unwrap().unwrap();
        assert_eq!(got.body, b"second");
    }
}
