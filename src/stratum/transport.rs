//! Line transport: one socket, one reader task, one writer task.
//!
//! The reader task owns the read half, splits it into lines, decodes each
//! line into a [`Frame`](super::frame::Frame) and hands it to the
//! [`FrameBus`] on the spot, so every consumer observes frames in socket
//! order. The writer task owns the write half and drains an ordered queue,
//! which is the only way anything (calls, the keepalive) reaches the socket.
//!
//! # Shutdown
//!
//! [`Transport::close`] raises the `closing` flag before anything is torn
//! down, so a read error caused by our own shutdown is reported as a clean
//! exit rather than a connection failure.

// Rust guideline compliant 2026-02

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

use super::bus::FrameBus;
use super::frame::Frame;
use crate::error::{Result, StratumError};

/// Longest line accepted from the server (1 MiB).
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// One queued outgoing line plus the channel that reports how the write went.
struct WriteRequest {
    line: String,
    done: oneshot::Sender<Result<()>>,
}

/// How the reader task ended.
#[derive(Debug, Clone)]
pub enum ReaderExit {
    /// Stopped because the client closed it.
    Closed,
    /// Stopped on a fatal error, which was also published to the bus.
    Failed(StratumError),
}

/// Owns the reader and writer tasks of one connection.
pub struct Transport {
    write_tx: Mutex<Option<mpsc::UnboundedSender<WriteRequest>>>,
    closing: Arc<AtomicBool>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    read_handle: Mutex<Option<JoinHandle<ReaderExit>>>,
    write_handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("closing", &self.closing.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        // The writer stops on its own once the queue sender is gone.
        self.closing.store(true, Ordering::SeqCst);
        if let Some(shutdown_tx) = lock(&self.shutdown_tx).take() {
            let _ = shutdown_tx.send(());
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Transport {
    /// Split `stream` and start the reader and writer tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<S>(stream: S, bus: Arc<FrameBus>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (write_tx, write_rx) = mpsc::unbounded_channel::<WriteRequest>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let closing = Arc::new(AtomicBool::new(false));

        let lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let read_handle = tokio::spawn(Self::read_loop(
            lines,
            bus,
            Arc::clone(&closing),
            shutdown_rx,
        ));

        let sink = FramedWrite::new(write_half, LinesCodec::new());
        let write_handle = tokio::spawn(Self::write_loop(sink, write_rx));

        Self {
            write_tx: Mutex::new(Some(write_tx)),
            closing,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            read_handle: Mutex::new(Some(read_handle)),
            write_handle: Mutex::new(Some(write_handle)),
        }
    }

    /// Queue one line for the writer task and wait until it is flushed.
    ///
    /// # Errors
    ///
    /// Returns [`StratumError::Write`] if the socket write failed, or
    /// [`StratumError::Closed`] if the transport is shut down.
    pub async fn send(&self, line: String) -> Result<()> {
        let (done, outcome) = oneshot::channel();
        {
            let guard = lock(&self.write_tx);
            let Some(write_tx) = guard.as_ref() else {
                return Err(StratumError::Closed);
            };
            if write_tx.send(WriteRequest { line, done }).is_err() {
                return Err(StratumError::Closed);
            }
        }
        outcome.await.unwrap_or(Err(StratumError::Closed))
    }

    /// Whether [`Self::close`] has been requested.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Shut the connection down and report how the reader ended.
    ///
    /// Safe to call more than once; later calls report [`ReaderExit::Closed`].
    pub async fn close(&self) -> ReaderExit {
        self.closing.store(true, Ordering::SeqCst);

        if let Some(shutdown_tx) = lock(&self.shutdown_tx).take() {
            let _ = shutdown_tx.send(());
        }

        // Dropping the queue sender lets the writer drain and shut down.
        drop(lock(&self.write_tx).take());
        let write_handle = lock(&self.write_handle).take();
        if let Some(handle) = write_handle {
            if let Err(e) = handle.await {
                log::warn!("[Stratum] Writer task ended abnormally: {}", e);
            }
        }

        let read_handle = lock(&self.read_handle).take();
        match read_handle {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                log::warn!("[Stratum] Reader task ended abnormally: {}", e);
                ReaderExit::Closed
            }),
            None => ReaderExit::Closed,
        }
    }

    /// Read loop: lines from the socket, decoded and dispatched in order.
    async fn read_loop<R>(
        mut lines: FramedRead<R, LinesCodec>,
        bus: Arc<FrameBus>,
        closing: Arc<AtomicBool>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> ReaderExit
    where
        R: AsyncRead + Unpin,
    {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    log::debug!("[Stratum] Reader stopping on close");
                    return ReaderExit::Closed;
                }
                next = lines.next() => {
                    let err = match next {
                        Some(Ok(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            log::trace!("[Stratum] <- {}", line);
                            match Frame::decode(&line) {
                                Ok(frame) => {
                                    bus.dispatch(frame);
                                    continue;
                                }
                                Err(e) => e,
                            }
                        }
                        Some(Err(LinesCodecError::MaxLineLengthExceeded)) => StratumError::decode(
                            "<oversized line>",
                            format!("line exceeds {MAX_LINE_LENGTH} bytes"),
                        ),
                        Some(Err(LinesCodecError::Io(e))) if e.kind() == io::ErrorKind::InvalidData => {
                            StratumError::decode("<invalid utf-8>", e.to_string())
                        }
                        Some(Err(LinesCodecError::Io(e))) => {
                            if closing.load(Ordering::SeqCst) {
                                log::debug!("[Stratum] Read error during close ignored: {}", e);
                                return ReaderExit::Closed;
                            }
                            StratumError::Read(Arc::new(e))
                        }
                        None => {
                            if closing.load(Ordering::SeqCst) {
                                return ReaderExit::Closed;
                            }
                            log::info!("[Stratum] Server closed the connection");
                            StratumError::Disconnected
                        }
                    };
                    bus.fail(err.clone());
                    return ReaderExit::Failed(err);
                }
            }
        }
    }

    /// Write loop: the single writer of the socket.
    async fn write_loop<W>(
        mut sink: FramedWrite<W, LinesCodec>,
        mut write_rx: mpsc::UnboundedReceiver<WriteRequest>,
    ) where
        W: AsyncWrite + Unpin,
    {
        while let Some(request) = write_rx.recv().await {
            log::trace!("[Stratum] -> {}", request.line);
            let outcome = sink
                .send(request.line)
                .await
                .map_err(|e| StratumError::Write(Arc::new(codec_error_to_io(e))));
            if let Err(e) = &outcome {
                log::error!("[Stratum] Write error: {}", e);
            }
            let _ = request.done.send(outcome);
        }

        if let Err(e) = SinkExt::<String>::close(&mut sink).await {
            log::debug!("[Stratum] Error shutting down write half: {}", e);
        }
    }
}

fn codec_error_to_io(err: LinesCodecError) -> io::Error {
    match err {
        LinesCodecError::Io(e) => e,
        LinesCodecError::MaxLineLengthExceeded => {
            io::Error::new(io::ErrorKind::InvalidData, "line too long")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stratum::bus::TopicFilter;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn test_send_writes_newline_terminated_lines() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let transport = Transport::spawn(client_end, FrameBus::new(8));

        transport.send(r#"{"id":0}"#.to_string()).await.unwrap();
        transport.send(r#"{"id":1}"#.to_string()).await.unwrap();

        let mut lines = BufReader::new(server_end).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), r#"{"id":0}"#);
        assert_eq!(lines.next_line().await.unwrap().unwrap(), r#"{"id":1}"#);
    }

    #[tokio::test]
    async fn test_concurrent_sends_do_not_interleave() {
        let (client_end, server_end) = tokio::io::duplex(1 << 20);
        let transport = Arc::new(Transport::spawn(client_end, FrameBus::new(8)));

        let mut tasks = Vec::new();
        for worker in 0..8 {
            let transport = Arc::clone(&transport);
            tasks.push(tokio::spawn(async move {
                for n in 0..25 {
                    let line = format!("{{\"worker\":{worker},\"n\":{n},\"pad\":\"{}\"}}", "x".repeat(200));
                    transport.send(line).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut lines = BufReader::new(server_end).lines();
        for _ in 0..200 {
            let line = lines.next_line().await.unwrap().unwrap();
            let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
            assert_eq!(parsed["pad"].as_str().unwrap().len(), 200);
        }
    }

    #[tokio::test]
    async fn test_incoming_lines_reach_the_bus() {
        let (client_end, mut server_end) = tokio::io::duplex(4096);
        let bus = FrameBus::new(8);
        let _transport = Transport::spawn(client_end, Arc::clone(&bus));
        let mut heights = bus.subscribe("blockchain.numblocks.subscribe", TopicFilter::All);

        server_end
            .write_all(b"\n{\"method\":\"blockchain.numblocks.subscribe\",\"params\":[9]}\n")
            .await
            .unwrap();

        let got = heights.recv().await.unwrap().unwrap();
        assert_eq!(got.params, serde_json::json!([9]));
    }

    #[tokio::test]
    async fn test_close_reports_clean_exit() {
        let (client_end, _server_end) = tokio::io::duplex(4096);
        let bus = FrameBus::new(8);
        let transport = Transport::spawn(client_end, Arc::clone(&bus));

        assert!(matches!(transport.close().await, ReaderExit::Closed));
        assert!(transport.is_closing());
        assert!(bus.terminal_error().is_none());
        assert!(matches!(
            transport.send("{}".to_string()).await,
            Err(StratumError::Closed)
        ));
        // A second close is harmless.
        assert!(matches!(transport.close().await, ReaderExit::Closed));
    }

    #[tokio::test]
    async fn test_peer_hangup_fails_the_bus() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let bus = FrameBus::new(8);
        let transport = Transport::spawn(client_end, Arc::clone(&bus));
        let waiter = bus.register_call(0).unwrap();

        drop(server_end);

        assert!(matches!(waiter.await.unwrap(), Err(StratumError::Disconnected)));
        assert!(matches!(
            transport.close().await,
            ReaderExit::Failed(StratumError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_a_decode_error() {
        let (client_end, mut server_end) = tokio::io::duplex(4096);
        let bus = FrameBus::new(8);
        let transport = Transport::spawn(client_end, Arc::clone(&bus));
        let waiter = bus.register_call(0).unwrap();

        server_end.write_all(b"{\"id\":0,\"result\":\"\xff\xfe\"}\n").await.unwrap();

        assert!(matches!(waiter.await.unwrap(), Err(StratumError::Decode { .. })));
        assert!(matches!(
            transport.close().await,
            ReaderExit::Failed(StratumError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_line_fails_the_bus() {
        let (client_end, mut server_end) = tokio::io::duplex(4096);
        let bus = FrameBus::new(8);
        let transport = Transport::spawn(client_end, Arc::clone(&bus));
        let waiter = bus.register_call(0).unwrap();

        server_end.write_all(b"this is not json\n").await.unwrap();

        assert!(matches!(waiter.await.unwrap(), Err(StratumError::Decode { .. })));
        assert!(matches!(
            transport.close().await,
            ReaderExit::Failed(StratumError::Decode { .. })
        ));
    }
}
