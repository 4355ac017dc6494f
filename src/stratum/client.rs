//! Stratum client: call correlation and subscription routing over one
//! connection.
//!
//! # Calls
//!
//! Every call gets the next id from the client's [`IdSequence`]. For awaited
//! calls the waiter is registered on the [`FrameBus`] *before* the request
//! is written, so a response cannot slip past it:
//!
//! ```text
//! call_and_await("blockchain.address.get_balance", ["1abc"])
//!     │  id = ids.next_id()                   (7)
//!     │  bus.register_call(7)   ──► waiter
//!     │  transport.send({"id":7,...})
//!     ▼
//!   waiter resolves with the `result` of {"id":7,...}
//! ```
//!
//! Fire-and-forget calls ([`StratumClient::call`]) register nothing; their
//! responses land in the bus's bounded replay buffer, where
//! [`StratumClient::response_for`] can still claim them later.

// Rust guideline compliant 2026-02

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::bus::{CallResult, FrameBus, Subscription, TopicFilter};
use super::frame::Request;
use super::transport::{ReaderExit, Transport};
use super::{keepalive, methods};
use crate::error::{Result, StratumError};

/// Tunables for one client connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Period of the `server.version` keepalive.
    pub keepalive_interval: Duration,
    /// Client name sent in `server.version`.
    pub client_name: String,
    /// Protocol version sent in `server.version`.
    pub protocol_version: String,
    /// Give up on awaited calls after this long. `None` waits forever.
    pub call_timeout: Option<Duration>,
    /// How many unclaimed responses to keep for late waiters.
    pub replay_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(60),
            client_name: "2.9.2".to_string(),
            protocol_version: "0.10".to_string(),
            call_timeout: None,
            replay_capacity: 64,
        }
    }
}

/// Monotonically increasing correlation ids, never reused for the life of
/// a connection.
#[derive(Debug, Default)]
pub struct IdSequence(AtomicU64);

impl IdSequence {
    /// Take the next id. The first id is 0.
    pub fn next_id(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// State shared by every clone of a [`StratumClient`].
pub(super) struct ClientInner {
    transport: Transport,
    bus: Arc<FrameBus>,
    ids: IdSequence,
    config: ClientConfig,
    keepalive: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(handle) = self
            .keepalive
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// Handle to one persistent connection to an Electrum server.
///
/// Cheap to clone; all clones share the same socket, id sequence and
/// routing tables. The connection stays up until [`Self::close`] is called
/// or the last clone is dropped.
#[derive(Clone)]
pub struct StratumClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for StratumClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StratumClient")
            .field("bus", &self.inner.bus)
            .field("transport", &self.inner.transport)
            .finish_non_exhaustive()
    }
}

/// Non-owning handle used by background tasks such as the keepalive.
#[derive(Debug, Clone)]
pub(super) struct WeakClient(Weak<ClientInner>);

impl WeakClient {
    pub(super) fn upgrade(&self) -> Option<StratumClient> {
        self.0.upgrade().map(|inner| StratumClient { inner })
    }
}

/// Releases a registered waiter if the caller stops waiting early.
struct WaiterGuard<'a> {
    bus: &'a FrameBus,
    id: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.bus.release_call(self.id);
    }
}

impl StratumClient {
    /// Open a TCP connection to `host:port` and start the client.
    ///
    /// # Errors
    ///
    /// Returns [`StratumError::Connect`] if the connection cannot be made.
    pub async fn connect(host: &str, port: u16, config: ClientConfig) -> Result<Self> {
        let addr = format!("{host}:{port}");
        log::info!("[Stratum] Connecting to {}", addr);

        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| StratumError::Connect {
                addr: addr.clone(),
                source: Arc::new(e),
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("[Stratum] Could not set TCP_NODELAY: {}", e);
        }

        log::info!("[Stratum] Connected to {}", addr);
        Ok(Self::from_stream(stream, config))
    }

    /// Start a client over an already-open stream.
    ///
    /// Spawns the reader, writer and keepalive tasks, so it must be called
    /// from within a Tokio runtime.
    pub fn from_stream<S>(stream: S, config: ClientConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let bus = FrameBus::new(config.replay_capacity);
        let transport = Transport::spawn(stream, Arc::clone(&bus));

        let inner = Arc::new(ClientInner {
            transport,
            bus,
            ids: IdSequence::default(),
            config,
            keepalive: Mutex::new(None),
        });

        let handle = keepalive::spawn(
            WeakClient(Arc::downgrade(&inner)),
            inner.config.keepalive_interval,
            vec![
                Value::from(inner.config.client_name.clone()),
                Value::from(inner.config.protocol_version.clone()),
            ],
        );
        *inner.keepalive.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Self { inner }
    }

    /// Settings this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // ── Call correlator ─────────────────────────────────────────────────────

    /// Fire-and-forget call. Returns the id once the request is written.
    ///
    /// # Errors
    ///
    /// Returns [`StratumError::Write`] or [`StratumError::Closed`] if the
    /// request could not be written.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<u64> {
        let id = self.inner.ids.next_id();
        log::debug!("[Stratum] Call #{} {}", id, method);
        self.inner
            .transport
            .send(Request::new(id, method, params).encode())
            .await?;
        Ok(id)
    }

    /// Wait for the response to an earlier [`Self::call`].
    ///
    /// Resolves immediately if the response already arrived and is still in
    /// the replay buffer.
    ///
    /// # Errors
    ///
    /// Returns the server's error, a connection failure, or a timeout if one
    /// is configured.
    pub async fn response_for(&self, id: u64) -> Result<Value> {
        let waiter = self.inner.bus.register_call(id)?;
        let _guard = WaiterGuard {
            bus: &self.inner.bus,
            id,
        };
        self.await_waiter(id, "response", waiter).await
    }

    /// Call `method` and wait for its raw `result`.
    ///
    /// # Errors
    ///
    /// Returns a write error if the request could not be sent, the server's
    /// error object, a connection failure, or a timeout if one is configured.
    pub async fn call_and_await(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let id = self.inner.ids.next_id();
        let waiter = self.inner.bus.register_call(id)?;
        let _guard = WaiterGuard {
            bus: &self.inner.bus,
            id,
        };

        log::debug!("[Stratum] Call #{} {} (awaiting)", id, method);
        self.inner
            .transport
            .send(Request::new(id, method, params).encode())
            .await?;

        self.await_waiter(id, method, waiter).await
    }

    /// Call `method` and deserialize its `result` into `T`.
    ///
    /// # Errors
    ///
    /// Everything [`Self::call_and_await`] returns, plus
    /// [`StratumError::UnexpectedResult`] if the result does not fit `T`.
    pub async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        let value = self.call_and_await(method, params).await?;
        serde_json::from_value(value).map_err(|e| StratumError::UnexpectedResult {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }

    async fn await_waiter(
        &self,
        id: u64,
        method: &str,
        waiter: oneshot::Receiver<CallResult>,
    ) -> Result<Value> {
        let outcome = match self.inner.config.call_timeout {
            None => waiter.await,
            Some(after) => match tokio::time::timeout(after, waiter).await {
                Ok(outcome) => outcome,
                Err(_elapsed) => {
                    log::warn!("[Stratum] Call #{} {} timed out after {:?}", id, method, after);
                    return Err(StratumError::Timeout {
                        id,
                        method: method.to_string(),
                        after,
                    });
                }
            },
        };
        // A dropped sender means the bus went away with the connection.
        outcome.unwrap_or(Err(StratumError::Closed))
    }

    /// Number of awaited calls still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.bus.pending_calls()
    }

    // ── Subscription router ─────────────────────────────────────────────────

    /// Independent stream of every notification pushed for `method`.
    pub fn notifications_for(&self, method: &str) -> Subscription {
        self.inner.bus.subscribe(method, TopicFilter::All)
    }

    /// Address-change notifications whose params contain `address`.
    pub fn address_changes_for(&self, address: &str) -> Subscription {
        self.inner.bus.subscribe(
            methods::ADDRESS_SUBSCRIBE,
            TopicFilter::ParamsContain(address.to_string()),
        )
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Close the connection.
    ///
    /// Stops the keepalive, marks the transport as closing, stops the reader
    /// and writer, then resolves every pending call with
    /// [`StratumError::Closed`] and ends every subscription.
    ///
    /// # Errors
    ///
    /// Returns the fatal error if the connection had already failed before
    /// the close (for example the server hung up mid-read). A normal close
    /// returns `Ok(())`.
    pub async fn close(&self) -> Result<()> {
        log::info!("[Stratum] Closing connection");

        let keepalive = self
            .inner
            .keepalive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = keepalive {
            handle.abort();
        }

        let exit = self.inner.transport.close().await;
        self.inner.bus.close();

        match exit {
            ReaderExit::Closed => {
                log::info!("[Stratum] Connection closed");
                Ok(())
            }
            ReaderExit::Failed(err) => Err(err),
        }
    }

    /// Whether the connection is closed or has failed.
    pub fn is_closed(&self) -> bool {
        self.inner.transport.is_closing() || self.inner.bus.terminal_error().is_some()
    }

    /// The fatal error that ended the connection, if any.
    pub fn failure(&self) -> Option<StratumError> {
        match self.inner.bus.terminal_error() {
            Some(StratumError::Closed) | None => None,
            Some(err) => Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, WriteHalf};

    type ServerLines = Lines<BufReader<tokio::io::ReadHalf<DuplexStream>>>;

    fn client_pair(config: ClientConfig) -> (StratumClient, ServerLines, WriteHalf<DuplexStream>) {
        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        let client = StratumClient::from_stream(client_end, config);
        let (read, write) = tokio::io::split(server_end);
        (client, BufReader::new(read).lines(), write)
    }

    async fn next_request(lines: &mut ServerLines) -> Value {
        let line = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[test]
    fn test_id_sequence_is_monotonic_from_zero() {
        let ids = IdSequence::default();
        assert_eq!(ids.next_id(), 0);
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
    }

    #[test]
    fn test_default_config_matches_keepalive_contract() {
        let config = ClientConfig::default();
        assert_eq!(config.keepalive_interval, Duration::from_secs(60));
        assert!(config.call_timeout.is_none());
    }

    #[tokio::test]
    async fn test_call_and_await_resolves_with_result() {
        let (client, mut lines, mut server) = client_pair(ClientConfig::default());

        let call = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .call_and_await("blockchain.address.get_balance", vec![json!("1abc")])
                    .await
            }
        });

        let request = next_request(&mut lines).await;
        assert_eq!(request["method"], "blockchain.address.get_balance");
        assert_eq!(request["params"], json!(["1abc"]));
        let id = request["id"].as_u64().unwrap();

        server
            .write_all(format!("{{\"id\":{id},\"result\":{{\"confirmed\":500000,\"unconfirmed\":0}}}}\n").as_bytes())
            .await
            .unwrap();

        let result = call.await.unwrap().unwrap();
        assert_eq!(result, json!({"confirmed": 500000, "unconfirmed": 0}));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_fire_and_forget_then_late_waiter() {
        let (client, mut lines, mut server) = client_pair(ClientConfig::default());

        let id = client.call("server.version", vec![json!("2.9.2"), json!("0.10")]).await.unwrap();
        let request = next_request(&mut lines).await;
        assert_eq!(request["id"].as_u64(), Some(id));

        server
            .write_all(format!("{{\"id\":{id},\"result\":[\"ElectrumX 1.8\",\"1.4\"]}}\n").as_bytes())
            .await
            .unwrap();
        // Let the reader publish before anybody waits.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let result = client.response_for(id).await.unwrap();
        assert_eq!(result, json!(["ElectrumX 1.8", "1.4"]));
    }

    #[tokio::test]
    async fn test_call_timeout_releases_waiter() {
        let config = ClientConfig {
            call_timeout: Some(Duration::from_millis(50)),
            ..ClientConfig::default()
        };
        let (client, _lines, _server) = client_pair(config);

        let err = client
            .call_and_await("blockchain.numblocks.subscribe", Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StratumError::Timeout { id: 0, .. }));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_typed_call_reports_shape_mismatch() {
        let (client, mut lines, mut server) = client_pair(ClientConfig::default());

        let call = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .call_as::<u64>("blockchain.numblocks.subscribe", Vec::new())
                    .await
            }
        });
        let request = next_request(&mut lines).await;
        let id = request["id"].as_u64().unwrap();
        server
            .write_all(format!("{{\"id\":{id},\"result\":\"not a number\"}}\n").as_bytes())
            .await
            .unwrap();

        assert!(matches!(
            call.await.unwrap(),
            Err(StratumError::UnexpectedResult { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_is_clean_and_final() {
        let (client, _lines, _server) = client_pair(ClientConfig::default());

        client.close().await.unwrap();

        assert!(client.is_closed());
        assert!(client.failure().is_none());
        assert!(matches!(
            client.call("server.version", Vec::new()).await,
            Err(StratumError::Closed)
        ));
        assert!(matches!(
            client.call_and_await("server.version", Vec::new()).await,
            Err(StratumError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_close_resolves_pending_calls_with_closed() {
        let (client, mut lines, _server) = client_pair(ClientConfig::default());

        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call_and_await("blockchain.numblocks.subscribe", Vec::new()).await }
        });
        let _ = next_request(&mut lines).await;

        client.close().await.unwrap();
        assert!(matches!(call.await.unwrap(), Err(StratumError::Closed)));
    }
}
