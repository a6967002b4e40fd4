//! BrokerClient - connection, handshake, dispatch and the receive loop

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{oneshot, Mutex};

use crate::pending::{CorrelationKey, PendingCalls};
use crate::protocol::{self, CatalogEntry, Reply};
use crate::proxy::RemoteService;
use crate::transport::{Transport, ZmqTransport};
use crate::{Error, Result};

/// Default wall-clock spacing between heartbeats sent to the broker.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default bound on one receive-loop poll of the socket.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration recognized at client creation.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker endpoint address, e.g. `tcp://localhost:5555`.
    pub endpoint: String,
    /// Client identity announced to the broker; defaults to the local host
    /// name when unset (falling back to a process-unique name).
    pub identity: Option<String>,
    /// Spacing between heartbeat control frames.
    pub heartbeat_interval: Duration,
    /// Bound on one socket poll inside the receive loop.
    pub poll_interval: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            identity: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the client identity.
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Set the heartbeat spacing.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the receive-loop poll bound.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn resolved_identity(&self) -> String {
        if let Some(identity) = &self.identity {
            return identity.clone();
        }
        std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| format!("client-{}", std::process::id()))
    }
}

/// State shared between the client, its proxies and the receive loop.
///
/// The core is the exclusive owner of the socket, the pending-call registry
/// and the message-id counter; proxies hold an `Arc` to it purely to reach
/// the send path.
pub(crate) struct ClientCore {
    identity: String,
    transport: Box<dyn Transport>,
    pending: PendingCalls,
    next_id: Mutex<u8>,
    running: AtomicBool,
    heartbeat_interval: Duration,
    poll_interval: Duration,
}

impl ClientCore {
    fn new(transport: Box<dyn Transport>, identity: String, config: &ClientConfig) -> Self {
        Self {
            identity,
            transport,
            pending: PendingCalls::new(),
            next_id: Mutex::new(0),
            running: AtomicBool::new(false),
            heartbeat_interval: config.heartbeat_interval,
            poll_interval: config.poll_interval,
        }
    }

    /// Next message id, wrapping to 0 after 255. The first id handed out is 1.
    async fn next_message_id(&self) -> u8 {
        let mut id = self.next_id.lock().await;
        *id = id.wrapping_add(1);
        *id
    }

    /// Synchronous round trip: send one framed request, then block on the
    /// socket until the matching reply arrives.
    ///
    /// Refused while the receive loop is running; the loop owns socket
    /// receive then and all calls go through [`dispatch_async`].
    pub(crate) async fn dispatch_sync(
        &self,
        service: &str,
        method: &str,
        args: Vec<u8>,
    ) -> Result<Bytes> {
        if self.running.load(Ordering::SeqCst) {
            return Err(Error::LoopRunning);
        }
        let id = self.next_message_id().await;
        tracing::debug!(id, service, method, "dispatching synchronous call");
        self.transport
            .send(protocol::request(id, service, method, args))
            .await?;

        loop {
            let frames = self.transport.recv().await?;
            match Reply::parse(&frames) {
                Ok(Reply::Success {
                    id: reply_id,
                    service: reply_service,
                    payload,
                }) => {
                    if reply_id == id && reply_service == service {
                        return Ok(payload);
                    }
                    // Stale reply for an earlier async call; route it.
                    self.pending
                        .resolve(&CorrelationKey::new(reply_id, reply_service), payload)
                        .await;
                }
                Ok(Reply::Failure {
                    id: reply_id,
                    service: reply_service,
                    message,
                }) => {
                    if reply_id == id && reply_service == service {
                        return Err(Error::remote(reply_service, message));
                    }
                    let error = Error::remote(&reply_service, message);
                    self.pending
                        .reject(&CorrelationKey::new(reply_id, reply_service), error)
                        .await;
                }
                Ok(Reply::Heartbeat) => {
                    tracing::debug!("broker heartbeat received");
                }
                Ok(other) => {
                    tracing::warn!(kind = other.kind(), "unexpected reply during sync call");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed inbound message");
                }
            }
        }
    }

    /// Asynchronous dispatch: register a pending entry, send the framed
    /// request, and hand back the receiver the receive loop will resolve.
    pub(crate) async fn dispatch_async(
        &self,
        service: &str,
        method: &str,
        args: Vec<u8>,
    ) -> Result<oneshot::Receiver<Result<Bytes>>> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(Error::LoopNotRunning);
        }
        let id = self.next_message_id().await;
        let key = CorrelationKey::new(id, service);
        // Register before sending so the loop can never observe the reply
        // ahead of the registry entry.
        let rx = self.pending.register(key.clone()).await;
        tracing::debug!(id, service, method, "dispatching asynchronous call");
        if let Err(e) = self
            .transport
            .send(protocol::request(id, service, method, args))
            .await
        {
            self.pending.discard(&key).await;
            return Err(e);
        }
        Ok(rx)
    }

    /// Fire-and-forget dispatch: send the framed request without registering
    /// a pending entry, so any eventual reply is dropped as a correlation
    /// miss.
    pub(crate) async fn dispatch_notify(
        &self,
        service: &str,
        method: &str,
        args: Vec<u8>,
    ) -> Result<()> {
        let id = self.next_message_id().await;
        tracing::debug!(id, service, method, "dispatching fire-and-forget call");
        self.transport
            .send(protocol::request(id, service, method, args))
            .await
    }

    /// Receive loop: poll the socket with a bounded timeout, route replies
    /// into the pending registry, and interleave heartbeats.
    async fn run_loop(self: Arc<Self>) {
        tracing::info!(identity = %self.identity, "receive loop started");
        let mut last_heartbeat = tokio::time::Instant::now();

        while self.running.load(Ordering::SeqCst) {
            match tokio::time::timeout(self.poll_interval, self.transport.recv()).await {
                Ok(Ok(frames)) => self.route_reply(&frames).await,
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "transport receive failed; stopping loop");
                    break;
                }
                // Poll timeout; fall through to the heartbeat check.
                Err(_) => {}
            }

            if last_heartbeat.elapsed() >= self.heartbeat_interval {
                if let Err(e) = self
                    .transport
                    .send(protocol::heartbeat(self.identity.as_bytes()))
                    .await
                {
                    tracing::error!(error = %e, "heartbeat send failed; stopping loop");
                    break;
                }
                tracing::debug!(identity = %self.identity, "heartbeat sent");
                last_heartbeat = tokio::time::Instant::now();
            }
        }

        self.running.store(false, Ordering::SeqCst);
        // No silent abandonment: anyone still awaiting gets an error.
        self.pending.fail_all(|| Error::Shutdown).await;
        tracing::info!(identity = %self.identity, "receive loop stopped");
    }

    /// Route one inbound message. Framing errors are isolated to the single
    /// message being processed and never take down the loop.
    async fn route_reply(&self, frames: &[Bytes]) {
        match Reply::parse(frames) {
            Ok(Reply::Success {
                id,
                service,
                payload,
            }) => {
                self.pending
                    .resolve(&CorrelationKey::new(id, service), payload)
                    .await;
            }
            Ok(Reply::Failure {
                id,
                service,
                message,
            }) => {
                let error = Error::remote(&service, message);
                self.pending
                    .reject(&CorrelationKey::new(id, service), error)
                    .await;
            }
            Ok(Reply::Heartbeat) => {
                tracing::debug!("broker heartbeat received");
            }
            Ok(other) => {
                tracing::warn!(kind = other.kind(), "unexpected reply outside handshake");
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed inbound message");
            }
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Asynchronous request/reply client for a Majordomo-style broker.
///
/// Connecting performs the service-discovery handshake and builds one
/// [`RemoteService`] proxy per announced service. Calls are synchronous
/// round trips ([`RemoteService::call`]) until the receive loop is started
/// with [`start`], after which calls go through [`RemoteService::call_async`]
/// and resolve as the loop observes matching replies.
///
/// One client instance owns one DEALER connection; it is not meant to be
/// driven from multiple tasks beyond the documented call patterns.
///
/// [`start`]: BrokerClient::start
pub struct BrokerClient {
    config: ClientConfig,
    core: Arc<ClientCore>,
    services: HashMap<String, RemoteService>,
    loop_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl BrokerClient {
    /// Connect to the broker and perform the service-discovery handshake.
    ///
    /// Transport-level connect failures propagate untouched and are fatal to
    /// this attempt. A `READY|FAIL` handshake reply surfaces as
    /// [`Error::Handshake`] carrying the broker's failure text.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let transport = ZmqTransport::connect(&config.endpoint).await?;
        Self::with_transport(Box::new(transport), config).await
    }

    /// Build a client over an already-established transport.
    pub(crate) async fn with_transport(
        transport: Box<dyn Transport>,
        config: ClientConfig,
    ) -> Result<Self> {
        let identity = config.resolved_identity();
        let catalog = handshake(transport.as_ref(), &identity).await?;
        let core = Arc::new(ClientCore::new(transport, identity, &config));
        let services = build_services(catalog, &core);
        tracing::info!(
            identity = %core.identity,
            services = services.len(),
            "handshake complete"
        );
        Ok(Self {
            config,
            core,
            services,
            loop_handle: Mutex::new(None),
        })
    }

    /// Tear down the current connection and re-handshake with the broker.
    ///
    /// All in-flight calls are rejected, the old proxy set is discarded, and
    /// a fresh catalog is fetched; afterwards the client is in the
    /// freshly-connected, loop-stopped state. Safe to call repeatedly.
    pub async fn reconnect(&mut self) -> Result<()> {
        let transport = ZmqTransport::connect(&self.config.endpoint).await?;
        self.reconnect_with(Box::new(transport)).await
    }

    /// Reconnect over an already-established transport.
    pub(crate) async fn reconnect_with(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        self.stop().await?;
        self.core.pending.fail_all(|| Error::Shutdown).await;
        self.core.transport.close().await?;

        let identity = self.config.resolved_identity();
        let catalog = handshake(transport.as_ref(), &identity).await?;
        let core = Arc::new(ClientCore::new(transport, identity, &self.config));
        self.services = build_services(catalog, &core);
        self.core = core;
        tracing::info!(
            identity = %self.core.identity,
            services = self.services.len(),
            "reconnected"
        );
        Ok(())
    }

    /// Start the receive loop on the ambient tokio runtime. Idempotent.
    pub async fn start(&self) {
        self.start_on(&tokio::runtime::Handle::current()).await;
    }

    /// Start the receive loop on an externally supplied runtime handle.
    pub async fn start_on(&self, handle: &tokio::runtime::Handle) {
        if self.core.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let core = self.core.clone();
        let join = handle.spawn(core.run_loop());
        *self.loop_handle.lock().await = Some(join);
    }

    /// Stop the receive loop and reject all in-flight calls. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        self.core.running.store(false, Ordering::SeqCst);
        if let Some(join) = self.loop_handle.lock().await.take() {
            join.await
                .map_err(|e| Error::ChannelClosed {
                    context: format!("receive loop join failed: {e}"),
                })?;
        }
        // The loop rejects pending calls on exit; cover the case where it
        // already died on a transport error before stop was called.
        self.core.pending.fail_all(|| Error::Shutdown).await;
        Ok(())
    }

    /// Whether the receive loop is currently running.
    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    /// Look up one discovered service by name.
    pub fn service(&self, name: &str) -> Option<&RemoteService> {
        self.services.get(name)
    }

    /// Look up one discovered service, erroring when absent.
    pub fn require_service(&self, name: &str) -> Result<&RemoteService> {
        self.service(name)
            .ok_or_else(|| Error::service_not_found(name))
    }

    /// All discovered services.
    pub fn services(&self) -> impl Iterator<Item = &RemoteService> {
        self.services.values()
    }

    /// Number of discovered services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// The identity announced to the broker.
    pub fn identity(&self) -> &str {
        &self.core.identity
    }

    /// The broker endpoint this client was configured with.
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}

impl fmt::Display for BrokerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BrokerClient '{}' @ {}: ",
            self.core.identity, self.config.endpoint
        )?;
        let mut names: Vec<_> = self.services.values().collect();
        names.sort_by(|a, b| a.name().cmp(b.name()));
        for (i, service) in names.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{service}")?;
        }
        Ok(())
    }
}

/// Send the ready announcement and block for the broker's service catalog.
async fn handshake(transport: &dyn Transport, identity: &str) -> Result<Vec<CatalogEntry>> {
    transport.send(protocol::ready(identity.as_bytes())).await?;
    let frames = transport.recv().await?;
    match Reply::parse(&frames)? {
        Reply::HandshakeOk { catalog } => Ok(catalog),
        Reply::HandshakeErr { message } => Err(Error::handshake(message)),
        other => Err(Error::protocol(
            "unexpected reply during handshake",
            Some("handshake reply".to_string()),
            Some(other.kind().to_string()),
        )),
    }
}

fn build_services(
    catalog: Vec<CatalogEntry>,
    core: &Arc<ClientCore>,
) -> HashMap<String, RemoteService> {
    catalog
        .into_iter()
        .map(|entry| {
            let service = RemoteService::from_catalog(entry, core.clone());
            (service.name().to_string(), service)
        })
        .collect()
}
