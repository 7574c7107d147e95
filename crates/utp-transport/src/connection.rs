//! A framed, optionally encrypted, uTP byte stream.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::message::Message;
use crate::wire::{FrameReader, FrameWriter};

/// How long `close` waits for the shutdown handshake (TLS `close_notify`,
/// uTP FIN) before dropping the stream.
const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// Any byte stream a connection can run over: a raw uTP stream or a TLS
/// session on top of one.
pub(crate) trait AsyncIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncIo for T {}

pub(crate) type BoxedIo = Box<dyn AsyncIo>;

/// One established connection with its encoder/decoder pair attached.
///
/// Each direction is guarded by its own lock, so one task may send while
/// another receives. Both halves are dropped on close, which releases the
/// underlying stream.
pub(crate) struct Connection {
    reader: Mutex<Option<FrameReader<ReadHalf<BoxedIo>>>>,
    writer: Mutex<Option<FrameWriter<WriteHalf<BoxedIo>>>>,
    local: SocketAddr,
    remote: SocketAddr,
    timeout: Option<Duration>,
    closed: AtomicBool,
    // wakes a pending recv when the connection is closed
    closing: CancellationToken,
}

impl Connection {
    pub(crate) fn new(
        io: BoxedIo,
        local: SocketAddr,
        remote: SocketAddr,
        timeout: Option<Duration>,
        max_message_size: u32,
    ) -> Self {
        let (read, write) = tokio::io::split(io);
        Self {
            reader: Mutex::new(Some(FrameReader::new(read, max_message_size))),
            writer: Mutex::new(Some(FrameWriter::new(write, max_message_size))),
            local,
            remote,
            timeout,
            closed: AtomicBool::new(false),
            closing: CancellationToken::new(),
        }
    }

    pub(crate) fn local(&self) -> SocketAddr {
        self.local
    }

    pub(crate) fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Send one message. A concurrent `close` aborts a send stalled on a
    /// peer that is not reading.
    pub(crate) async fn send(&self, msg: &Message) -> Result<(), TransportError> {
        self.ensure_open()?;
        let write = async {
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(TransportError::Closed)?;
            with_timeout(self.timeout, writer.write(msg)).await
        };
        tokio::select! {
            () = self.closing.cancelled() => Err(TransportError::Closed),
            result = write => result,
        }
    }

    /// Receive one message. A timed-out receive leaves any partial frame
    /// buffered, so the next call picks it up.
    pub(crate) async fn recv(&self) -> Result<Option<Message>, TransportError> {
        self.ensure_open()?;
        let read = async {
            let mut guard = self.reader.lock().await;
            let reader = guard.as_mut().ok_or(TransportError::Closed)?;
            with_timeout(self.timeout, reader.read::<Message>()).await
        };
        let msg = tokio::select! {
            () = self.closing.cancelled() => return Err(TransportError::Closed),
            msg = read => msg?,
        };
        if msg.is_none() {
            trace!(remote = %self.remote, "peer closed stream");
        }
        Ok(msg)
    }

    /// Flush pending writes, start the shutdown handshake, and release the
    /// stream. Later calls are no-ops.
    ///
    /// Returns `true` if this call performed the close.
    pub(crate) async fn close(&self) -> Result<bool, TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        self.closing.cancel();

        let writer = self.writer.lock().await.take();
        let reader = self.reader.lock().await.take();

        let flushed = match writer {
            Some(mut writer) => {
                // an aborted send may have left bytes the peer never reads
                let limit = self.timeout.unwrap_or(CLOSE_GRACE);
                let flushed = with_timeout(Some(limit), writer.flush()).await;
                if tokio::time::timeout(CLOSE_GRACE, writer.shutdown())
                    .await
                    .is_err()
                {
                    trace!(remote = %self.remote, "shutdown still pending, dropping stream");
                }
                flushed
            }
            None => Ok(()),
        };
        drop(reader);

        debug!(local = %self.local, remote = %self.remote, "connection closed");
        flushed.map(|()| true)
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Await `fut`, bounded by `timeout` when one is set.
pub(crate) async fn with_timeout<T, F>(
    timeout: Option<Duration>,
    fut: F,
) -> Result<T, TransportError>
where
    F: std::future::Future<Output = Result<T, TransportError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| TransportError::Timeout(limit))?,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::wire::encode_message;

    fn pair(timeout: Option<Duration>) -> (Connection, Connection) {
        let (a, b) = tokio::io::duplex(1024);
        let a_addr: SocketAddr = "127.0.0.1:1001".parse().unwrap();
        let b_addr: SocketAddr = "127.0.0.1:1002".parse().unwrap();
        (
            Connection::new(Box::new(a), a_addr, b_addr, timeout, 4096),
            Connection::new(Box::new(b), b_addr, a_addr, timeout, 4096),
        )
    }

    #[tokio::test]
    async fn messages_flow_both_ways() {
        let (a, b) = pair(None);
        a.send(&Message::new("ping").with_header("id", "1"))
            .await
            .unwrap();
        let got = b.recv().await.unwrap().unwrap();
        assert_eq!(got.body, b"ping");
        assert_eq!(got.header("id"), Some("1"));

        b.send(&Message::new("pong")).await.unwrap();
        assert_eq!(a.recv().await.unwrap().unwrap().body, b"pong");
        assert_eq!(a.remote(), b.local());
    }

    #[tokio::test]
    async fn close_signals_end_of_stream_to_peer() {
        let (a, b) = pair(None);
        assert!(a.close().await.unwrap());
        assert!(b.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_further_io() {
        let (a, _b) = pair(None);
        assert!(a.close().await.unwrap());
        assert!(!a.close().await.unwrap());
        assert!(matches!(
            a.send(&Message::default()).await,
            Err(TransportError::Closed)
        ));
        assert!(matches!(a.recv().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn close_wakes_pending_recv() {
        let (a, _b) = pair(None);
        let a = Arc::new(a);
        let receiver = {
            let a = Arc::clone(&a);
            tokio::spawn(async move { a.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        a.close().await.unwrap();
        let result = receiver.await.unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn recv_times_out_when_peer_is_silent() {
        let (a, _b) = pair(Some(Duration::from_millis(50)));
        let err = a.recv().await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(d) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn oversized_send_is_rejected_before_writing() {
        let (a, b) = pair(Some(Duration::from_millis(50)));
        let err = a.send(&Message::new(vec![0u8; 8192])).await.unwrap_err();
        assert!(matches!(err, TransportError::MessageTooLarge { max: 4096, .. }));
        // nothing reached the peer
        assert!(matches!(b.recv().await, Err(TransportError::Timeout(_))));
    }

    #[tokio::test]
    async fn recv_timeout_mid_frame_keeps_the_stream_aligned() {
        let (io, mut raw) = tokio::io::duplex(1024);
        let addr: SocketAddr = "127.0.0.1:1001".parse().unwrap();
        let conn = Connection::new(
            Box::new(io),
            addr,
            addr,
            Some(Duration::from_millis(50)),
            4096,
        );
        let first = encode_message(&Message::new("first"), 4096).unwrap();
        let second = encode_message(&Message::new("second"), 4096).unwrap();

        raw.write_all(&first[..6]).await.unwrap();
        assert!(matches!(conn.recv().await, Err(TransportError::Timeout(_))));

        raw.write_all(&first[6..]).await.unwrap();
        raw.write_all(&second).await.unwrap();
        assert_eq!(conn.recv().await.unwrap().unwrap().body, b"first");
        assert_eq!(conn.recv().await.unwrap().unwrap().body, b"second");
    }

    #[tokio::test]
    async fn close_aborts_send_stalled_on_silent_peer() {
        let (io, _raw) = tokio::io::duplex(64);
        let addr: SocketAddr = "127.0.0.1:1001".parse().unwrap();
        let conn = Arc::new(Connection::new(Box::new(io), addr, addr, None, 1 << 20));

        let sender = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.send(&Message::new(vec![1u8; 100_000])).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sender.is_finished());

        let closed = tokio::time::timeout(Duration::from_secs(2), conn.close()).await;
        assert!(closed.is_ok(), "close did not finish");
        let result = sender.await.unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
