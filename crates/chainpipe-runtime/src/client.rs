//! `NodeClient` — the connection supervisor and the caller-facing API.
//!
//! Owns connect/reconnect/destroy, the capability handshake, and the
//! lifecycle of the four loop kinds. All per-connection state lives behind
//! one `RuntimeShared` instance owned here; nothing is process-wide, so
//! multiple clients coexist in one process.

use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time;

use chainpipe_core::capability;
use chainpipe_core::frame::op;
use chainpipe_core::{
    CapabilitySet, ChainEvent, ClientError, CorrelationId, Frame, FrameTransport, Lookup,
    RuntimeConfig, StatusRecord,
};

use crate::dispatch::{self, Outbound};
use crate::heartbeat;
use crate::listener;
use crate::processor::ResponseProcessor;
use crate::shared::RuntimeShared;
use crate::worker::{self, PendingRequest};

/// Point-in-time connection snapshot, for health surfaces and operator
/// tooling.
#[derive(Debug, Clone)]
pub struct ConnState {
    pub connected: bool,
    /// Requests not yet in a terminal state.
    pub in_flight: usize,
    /// Topics with a registered event queue.
    pub subscribed_topics: usize,
    /// Granted capability names, sorted.
    pub capabilities: Vec<String>,
}

/// Per-connect parameters.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Endpoint this connection targets. Must be non-empty.
    pub url: String,
    /// Replace an existing connection (orderly destroy + settle delay)
    /// instead of failing with `AlreadyConnected`.
    pub reconnect: bool,
    /// Requested worker count; clamped to half of hardware parallelism
    /// (minimum 1) and the configured ceiling.
    pub workers: usize,
    /// Handshake timeout: how long to wait for the capability grant push.
    pub timeout: Duration,
    /// Credentials sent in the hello frame, when the node requires them.
    pub auth_key: Option<String>,
}

impl ConnectOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: false,
            workers: 4,
            timeout: Duration::from_secs(10),
            auth_key: None,
        }
    }
}

struct Runtime {
    shared: Arc<RuntimeShared>,
    cmd_tx: mpsc::Sender<Outbound>,
    queue_tx: mpsc::Sender<PendingRequest>,
    oob_tx: mpsc::Sender<Frame>,
    handles: Vec<JoinHandle<()>>,
}

/// Cloned handles for one operation; never held across a destroy.
struct Active {
    shared: Arc<RuntimeShared>,
    cmd_tx: mpsc::Sender<Outbound>,
    queue_tx: mpsc::Sender<PendingRequest>,
}

/// Client runtime for one persistent node connection.
pub struct NodeClient {
    config: RuntimeConfig,
    runtime: Mutex<Option<Runtime>>,
}

impl Default for NodeClient {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl NodeClient {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            runtime: Mutex::new(None),
        }
    }

    /// Establish the runtime over an already-dialed transport: spawn the
    /// dispatch proxy, worker pool, heartbeat monitor and callback listener,
    /// then perform the capability handshake. Fails without touching the
    /// previous connection unless `reconnect` is set.
    pub async fn connect<T: FrameTransport>(
        &self,
        transport: T,
        opts: ConnectOptions,
    ) -> Result<(), ClientError> {
        let ConnectOptions {
            url,
            reconnect,
            workers,
            timeout,
            auth_key,
        } = opts;
        if url.trim().is_empty() {
            return Err(ClientError::EmptyUrl);
        }

        let existing = {
            let mut guard = self.runtime.lock().unwrap();
            if guard.is_some() && !reconnect {
                return Err(ClientError::AlreadyConnected);
            }
            guard.take()
        };
        if let Some(runtime) = existing {
            tracing::info!(url = %url, "replacing existing connection");
            teardown(runtime).await;
            time::sleep(self.config.settle_delay).await;
        }

        let workers = clamp_workers(workers, self.config.worker_ceiling);
        let shared = Arc::new(RuntimeShared::new(self.config.clone()));
        let processor = ResponseProcessor::new(Arc::clone(&shared));

        let (cmd_tx, cmd_rx) = mpsc::channel::<Outbound>(64);
        let (queue_tx, queue_rx) = mpsc::channel::<PendingRequest>(self.config.max_pending.max(1));
        let (oob_tx, oob_rx) = mpsc::channel::<Frame>(64);
        let (hb_tx, hb_rx) = mpsc::channel::<Frame>(4);

        let queue_rx = Arc::new(AsyncMutex::new(queue_rx));
        let mut worker_replies = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers + 3);
        for index in 0..workers {
            let (reply_tx, reply_rx) = mpsc::channel::<Frame>(8);
            worker_replies.push(reply_tx);
            handles.push(worker::spawn(
                index,
                Arc::clone(&queue_rx),
                cmd_tx.clone(),
                reply_rx,
                processor.clone(),
                Arc::clone(&shared),
                shared.subscribe_shutdown(),
            ));
        }
        handles.push(dispatch::spawn(
            transport,
            cmd_rx,
            worker_replies,
            hb_tx,
            processor.clone(),
            Arc::clone(&shared),
            shared.subscribe_shutdown(),
        ));
        handles.push(heartbeat::spawn(
            cmd_tx.clone(),
            hb_rx,
            Arc::clone(&shared),
            shared.subscribe_shutdown(),
        ));
        handles.push(listener::spawn(
            oob_rx,
            processor,
            shared.subscribe_shutdown(),
        ));

        let runtime = Runtime {
            shared: Arc::clone(&shared),
            cmd_tx: cmd_tx.clone(),
            queue_tx,
            oob_tx,
            handles,
        };

        // Capability handshake: hello (with credentials when given), then
        // wait for the grant push. A handshake that does not complete within
        // the timeout leaves nothing running.
        let hello = Frame::new(
            op::HELLO,
            0,
            auth_key.map(String::into_bytes).unwrap_or_default(),
        );
        if cmd_tx.send(Outbound::Hello(hello)).await.is_err() {
            teardown(runtime).await;
            return Err(ClientError::disconnected());
        }
        if let Err(e) = await_grant(&shared, timeout).await {
            tracing::warn!(url = %url, error = %e, "capability handshake failed");
            teardown(runtime).await;
            return Err(e);
        }

        let granted = shared.capabilities.read().unwrap().granted_names();
        tracing::info!(url = %url, workers, capabilities = ?granted, "connected");

        *self.runtime.lock().unwrap() = Some(runtime);
        Ok(())
    }

    /// Stop every loop, release the transport and clear all tracked state.
    /// Calling this while not connected is an error.
    pub async fn destroy(&self) -> Result<(), ClientError> {
        let runtime = self
            .runtime
            .lock()
            .unwrap()
            .take()
            .ok_or(ClientError::NotConnected)?;
        tracing::info!("destroying connection");
        teardown(runtime).await;
        Ok(())
    }

    /// Enqueue a tracked request and wait until it reaches a terminal status
    /// or `timeout` elapses. On timeout the request stays live server-side;
    /// a later [`get_status`](Self::get_status) may report the true outcome.
    pub async fn send_blocking(
        &self,
        id: CorrelationId,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<StatusRecord, ClientError> {
        let active = self.active()?;
        self.enqueue(&active, id, payload)?;
        wait_terminal(&active.shared, id, Some(timeout)).await
    }

    /// Enqueue a tracked request and return a future resolving to its
    /// terminal record. Runtime teardown resolves the future with a
    /// transport error.
    pub fn send_async(
        &self,
        id: CorrelationId,
        payload: Vec<u8>,
    ) -> Result<StatusFuture, ClientError> {
        let active = self.active()?;
        self.enqueue(&active, id, payload)?;
        let (tx, rx) = oneshot::channel();
        let shared = active.shared;
        tokio::spawn(async move {
            let result = wait_terminal(&shared, id, None).await;
            let _ = tx.send(result);
        });
        Ok(StatusFuture { rx })
    }

    /// One untracked round trip, no correlation tracking; used for simple
    /// queries.
    pub async fn send_non_blocking(&self, payload: Vec<u8>) -> Result<Vec<u8>, ClientError> {
        let active = self.active()?;
        self.require(&active, capability::STATE_QUERY)?;
        let (tx, rx) = oneshot::channel();
        active
            .cmd_tx
            .send(Outbound::Query {
                frame: Frame::new(op::QUERY, 0, payload),
                reply: tx,
            })
            .await
            .map_err(|_| ClientError::disconnected())?;

        let timeout = active.shared.config.receive_timeout;
        match time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::disconnected()),
            Err(_) => Err(ClientError::Timeout {
                ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Snapshot lookup. `Unknown` covers both "never tracked" and "evicted".
    pub fn get_status(&self, id: CorrelationId) -> Lookup {
        match self.shared() {
            Some(shared) => shared.table.get(id),
            None => Lookup::Unknown,
        }
    }

    /// Register interest in a topic. Idempotent.
    pub fn subscribe(&self, topic: &str) -> Result<(), ClientError> {
        let active = self.active()?;
        self.require(&active, capability::EVENTS_SUBSCRIBE)?;
        active.shared.registry.subscribe(topic);
        Ok(())
    }

    pub fn unsubscribe(&self, topics: &[&str]) {
        if let Some(shared) = self.shared() {
            shared.registry.unsubscribe(topics);
        }
    }

    pub fn unsubscribe_all(&self) {
        if let Some(shared) = self.shared() {
            shared.registry.unsubscribe_all();
        }
    }

    /// Remove and return everything queued for the given topics.
    pub fn drain(&self, topics: &[&str]) -> Vec<ChainEvent> {
        match self.shared() {
            Some(shared) => shared.registry.drain(topics),
            None => Vec::new(),
        }
    }

    /// Read-only snapshot of the handshake's grants.
    pub fn capabilities(&self) -> CapabilitySet {
        match self.shared() {
            Some(shared) => shared.capabilities.read().unwrap().clone(),
            None => CapabilitySet::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared().is_some_and(|shared| shared.is_connected())
    }

    /// Requests not yet in a terminal state.
    pub fn in_flight(&self) -> usize {
        self.shared()
            .map(|shared| shared.gate.in_flight())
            .unwrap_or(0)
    }

    /// One consistent-enough snapshot of the connection's health.
    pub fn state(&self) -> ConnState {
        match self.shared() {
            Some(shared) => ConnState {
                connected: shared.is_connected(),
                in_flight: shared.gate.in_flight(),
                subscribed_topics: shared.registry.len(),
                capabilities: shared.capabilities.read().unwrap().granted_names(),
            },
            None => ConnState {
                connected: false,
                in_flight: 0,
                subscribed_topics: 0,
                capabilities: Vec::new(),
            },
        }
    }

    /// Ingress for transports with a secondary delivery path: frames pushed
    /// here are drained by the callback listener and processed exactly like
    /// the dispatch proxy's inline branch.
    pub fn push_out_of_band(&self, frame: Frame) -> Result<(), ClientError> {
        let oob_tx = {
            let guard = self.runtime.lock().unwrap();
            let runtime = guard.as_ref().ok_or(ClientError::NotConnected)?;
            runtime.oob_tx.clone()
        };
        oob_tx
            .try_send(frame)
            .map_err(|_| ClientError::disconnected())
    }

    fn shared(&self) -> Option<Arc<RuntimeShared>> {
        self.runtime
            .lock()
            .unwrap()
            .as_ref()
            .map(|runtime| Arc::clone(&runtime.shared))
    }

    fn active(&self) -> Result<Active, ClientError> {
        let guard = self.runtime.lock().unwrap();
        match guard.as_ref() {
            Some(runtime) if runtime.shared.is_connected() => Ok(Active {
                shared: Arc::clone(&runtime.shared),
                cmd_tx: runtime.cmd_tx.clone(),
                queue_tx: runtime.queue_tx.clone(),
            }),
            Some(_) => Err(ClientError::disconnected()),
            None => Err(ClientError::NotConnected),
        }
    }

    fn require(&self, active: &Active, name: &str) -> Result<(), ClientError> {
        if active.shared.capabilities.read().unwrap().is_granted(name) {
            Ok(())
        } else {
            Err(ClientError::Privilege {
                name: name.to_string(),
            })
        }
    }

    /// The enqueue path. Order matters: gate slot first, then the status
    /// record, then the queue — the record must exist before the request is
    /// queued, and every failure rolls back the earlier steps.
    fn enqueue(
        &self,
        active: &Active,
        id: CorrelationId,
        payload: Vec<u8>,
    ) -> Result<(), ClientError> {
        self.require(active, capability::TX_SUBMIT)?;
        active.shared.gate.try_acquire()?;
        if let Err(e) = active.shared.table.create(id) {
            active.shared.gate.release();
            return Err(e);
        }
        let request = PendingRequest {
            id,
            payload,
            enqueued_at: Instant::now(),
        };
        if let Err(e) = active.queue_tx.try_send(request) {
            active.shared.table.remove(id);
            active.shared.gate.release();
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => ClientError::Capacity {
                    limit: active.shared.gate.limit(),
                },
                mpsc::error::TrySendError::Closed(_) => ClientError::disconnected(),
            });
        }
        Ok(())
    }
}

/// Future returned by [`NodeClient::send_async`].
pub struct StatusFuture {
    rx: oneshot::Receiver<Result<StatusRecord, ClientError>>,
}

impl Future for StatusFuture {
    type Output = Result<StatusRecord, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or_else(|_| Err(ClientError::disconnected())))
    }
}

/// Wait until the record is terminal, the deadline passes, or the runtime
/// goes down. Wakeups are notify-driven; the short sleep only bounds the
/// window between snapshotting and parking.
async fn wait_terminal(
    shared: &Arc<RuntimeShared>,
    id: CorrelationId,
    timeout: Option<Duration>,
) -> Result<StatusRecord, ClientError> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        let Some((record, notify)) = shared.table.watch(id) else {
            return Err(if shared.is_connected() {
                ClientError::Untracked(id)
            } else {
                ClientError::disconnected()
            });
        };
        if record.is_terminal() {
            return Ok(record);
        }
        if !shared.is_connected() {
            return Err(ClientError::disconnected());
        }
        let mut bound = shared.config.poll_fallback;
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                return Err(ClientError::Timeout {
                    ms: timeout.unwrap_or_default().as_millis() as u64,
                });
            }
            bound = bound.min(deadline - now);
        }
        tokio::select! {
            _ = notify.notified() => {}
            _ = time::sleep(bound) => {}
        }
    }
}

async fn await_grant(shared: &Arc<RuntimeShared>, timeout: Duration) -> Result<(), ClientError> {
    let deadline = Instant::now() + timeout;
    loop {
        if shared.capabilities.read().unwrap().any_granted() {
            return Ok(());
        }
        if !shared.is_connected() {
            return Err(ClientError::disconnected());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(ClientError::Timeout {
                ms: timeout.as_millis() as u64,
            });
        }
        let bound = shared.config.poll_fallback.min(deadline - now);
        tokio::select! {
            _ = shared.grant_notify.notified() => {}
            _ = time::sleep(bound) => {}
        }
    }
}

fn clamp_workers(requested: usize, ceiling: usize) -> usize {
    let parallelism = std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(2);
    let cap = (parallelism / 2).max(1).min(ceiling.max(1));
    let clamped = requested.clamp(1, cap);
    if clamped != requested {
        tracing::warn!(requested, clamped, "worker count clamped");
    }
    clamped
}

async fn teardown(runtime: Runtime) {
    runtime.shared.shutdown();
    drop(runtime.cmd_tx);
    drop(runtime.queue_tx);
    drop(runtime.oob_tx);
    for mut handle in runtime.handles {
        if time::timeout(Duration::from_secs(1), &mut handle).await.is_err() {
            handle.abort();
        }
    }
    runtime.shared.table.clear();
    runtime.shared.registry.unsubscribe_all();
    runtime.shared.capabilities.write().unwrap().reset();
    runtime.shared.gate.reset();
}
