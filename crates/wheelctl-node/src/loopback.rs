use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;
use wheelctl_core::{
    MessageType, NodeId, PortId, Request, RequestKind, Response, Telemetry, TransferMeta,
};

use crate::node::{Client, Close, NodeService, Subscriber};
use crate::{NodeError, Result};

// ─── Replies ──────────────────────────────────────────────────────────────

/// How the loopback server answers a call.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Affirmative response.
    Ack,
    Respond(Response),
    /// Server answered with nothing.
    Empty,
    /// Never answers.
    Silent,
    Fault(String),
}

/// One service call observed by the loopback node.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub kind: RequestKind,
    pub server_node_id: NodeId,
    pub port: PortId,
    pub request: Request,
    pub at: Instant,
}

impl CallRecord {
    /// Velocity targets if this was a `SetTargetValue` call.
    pub fn velocity(&self) -> Option<Vec<f32>> {
        self.request.velocity()
    }
}

type Handler = Arc<dyn Fn(&CallRecord) -> Reply + Send + Sync>;

// ─── LoopbackNode ─────────────────────────────────────────────────────────

/// In-memory [`NodeService`].
///
/// Records every client call, answers through a configurable handler, and
/// delivers telemetry published with [`LoopbackNode::publish`] to every
/// subscriber on the port. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct LoopbackNode {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    started: AtomicBool,
    refuse_clients: AtomicBool,
    refuse_subscribers: AtomicBool,
    calls: Mutex<Vec<CallRecord>>,
    handler: Mutex<Option<Handler>>,
    delay: Mutex<Duration>,
    topics: Mutex<HashMap<PortId, Vec<mpsc::UnboundedSender<Telemetry>>>>,
    receive_faults: Mutex<HashMap<PortId, usize>>,
    clients_created: AtomicUsize,
    open_clients: AtomicUsize,
    open_subscribers: AtomicUsize,
    next_transfer_id: AtomicU64,
}

impl LoopbackNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call with `reply`.
    pub fn set_reply(&self, reply: Reply) {
        self.set_handler(move |_| reply.clone());
    }

    /// Answer calls through `handler`.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&CallRecord) -> Reply + Send + Sync + 'static,
    {
        *lock(&self.inner.handler) = Some(Arc::new(handler));
    }

    /// Delay applied before each reply.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.inner.delay) = delay;
    }

    pub fn refuse_clients(&self, refuse: bool) {
        self.inner.refuse_clients.store(refuse, Ordering::SeqCst);
    }

    pub fn refuse_subscribers(&self, refuse: bool) {
        self.inner.refuse_subscribers.store(refuse, Ordering::SeqCst);
    }

    /// Make the next `count` receives on `port` fail.
    pub fn inject_receive_faults(&self, port: PortId, count: usize) {
        *lock(&self.inner.receive_faults).entry(port).or_default() += count;
    }

    /// Deliver `message` from `source` to every subscriber on `port`.
    /// Returns the number of subscribers reached.
    pub fn publish(
        &self,
        port: PortId,
        source: Option<NodeId>,
        message: serde_json::Value,
    ) -> usize {
        let transfer_id = self.inner.next_transfer_id.fetch_add(1, Ordering::SeqCst);
        let telemetry = Telemetry {
            message,
            transfer: TransferMeta {
                source_node_id: source,
                transfer_id,
                timestamp_us: now_micros(),
            },
        };
        let mut topics = lock(&self.inner.topics);
        let Some(subscribers) = topics.get_mut(&port) else {
            return 0;
        };
        subscribers.retain(|tx| !tx.is_closed());
        subscribers
            .iter()
            .filter(|tx| tx.send(telemetry.clone()).is_ok())
            .count()
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        lock(&self.inner.calls).clone()
    }

    /// Velocity vectors of every `SetTargetValue` call, in call order.
    pub fn velocity_calls(&self) -> Vec<Vec<f32>> {
        lock(&self.inner.calls)
            .iter()
            .filter_map(CallRecord::velocity)
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.inner.calls).clear();
    }

    pub fn clients_created(&self) -> usize {
        self.inner.clients_created.load(Ordering::SeqCst)
    }

    pub fn open_clients(&self) -> usize {
        self.inner.open_clients.load(Ordering::SeqCst)
    }

    pub fn open_subscribers(&self) -> usize {
        self.inner.open_subscribers.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeService for LoopbackNode {
    async fn start(&self) -> bool {
        self.inner.started.store(true, Ordering::SeqCst);
        debug!("loopback node started");
        true
    }

    async fn stop(&self) {
        self.inner.started.store(false, Ordering::SeqCst);
        lock(&self.inner.topics).clear();
        debug!("loopback node stopped");
    }

    fn create_subscriber(
        &self,
        message_type: MessageType,
        port: PortId,
    ) -> Option<Box<dyn Subscriber>> {
        if !self.is_started() || self.inner.refuse_subscribers.load(Ordering::SeqCst) {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.topics).entry(port).or_default().push(tx);
        self.inner.open_subscribers.fetch_add(1, Ordering::SeqCst);
        debug!(%message_type, port, "loopback subscriber created");
        Some(Box::new(LoopbackSubscriber {
            inner: self.inner.clone(),
            port,
            rx,
            closed: false,
        }))
    }

    fn create_client(
        &self,
        request_type: RequestKind,
        server_node_id: NodeId,
        port: PortId,
    ) -> Option<Box<dyn Client>> {
        if !self.is_started() || self.inner.refuse_clients.load(Ordering::SeqCst) {
            return None;
        }
        self.inner.clients_created.fetch_add(1, Ordering::SeqCst);
        self.inner.open_clients.fetch_add(1, Ordering::SeqCst);
        Some(Box::new(LoopbackClient {
            inner: self.inner.clone(),
            kind: request_type,
            server_node_id,
            port,
            closed: false,
        }))
    }
}

// ─── Handles ──────────────────────────────────────────────────────────────

struct LoopbackClient {
    inner: Arc<Inner>,
    kind: RequestKind,
    server_node_id: NodeId,
    port: PortId,
    closed: bool,
}

#[async_trait]
impl Client for LoopbackClient {
    async fn call(&mut self, request: Request) -> Result<Option<Response>> {
        if self.closed {
            return Err(NodeError::Closed);
        }
        let record = CallRecord {
            kind: self.kind,
            server_node_id: self.server_node_id,
            port: self.port,
            request,
            at: Instant::now(),
        };
        lock(&self.inner.calls).push(record.clone());

        let handler = lock(&self.inner.handler).clone();
        let reply = handler.map(|h| h(&record)).unwrap_or(Reply::Ack);
        let delay = *lock(&self.inner.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Reply::Ack => Ok(Some(Response::ok())),
            Reply::Respond(response) => Ok(Some(response)),
            Reply::Empty => Ok(None),
            Reply::Silent => std::future::pending().await,
            Reply::Fault(reason) => Err(NodeError::Fault(reason)),
        }
    }
}

impl Close for LoopbackClient {
    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.open_clients.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

struct LoopbackSubscriber {
    inner: Arc<Inner>,
    port: PortId,
    rx: mpsc::UnboundedReceiver<Telemetry>,
    closed: bool,
}

impl LoopbackSubscriber {
    fn take_fault(&self) -> bool {
        let mut faults = lock(&self.inner.receive_faults);
        match faults.get_mut(&self.port) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl Subscriber for LoopbackSubscriber {
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Telemetry>> {
        if self.closed {
            return Err(NodeError::Closed);
        }
        if self.take_fault() {
            return Err(NodeError::Fault(format!(
                "injected receive fault on port {}",
                self.port
            )));
        }
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(telemetry)) => Ok(Some(telemetry)),
            Ok(None) => Err(NodeError::Closed),
        }
    }
}

impl Close for LoopbackSubscriber {
    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.rx.close();
            self.inner.open_subscribers.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Scoped;
    use serde_json::json;
    use wheelctl_core::request::{EnableRequest, Params};

    fn enable() -> Request {
        Request::build(RequestKind::Enable, "MotorEnable", &{
            let mut p = Params::new();
            p.insert("enable_state".into(), json!(0));
            p
        })
        .unwrap()
    }

    #[tokio::test]
    async fn handles_refused_before_start() {
        let node = LoopbackNode::new();
        assert!(node.create_client(RequestKind::Enable, 28, 113).is_none());
        assert!(node
            .create_subscriber(MessageType::Heartbeat, 7509)
            .is_none());
        assert!(node.start().await);
        assert!(node.create_client(RequestKind::Enable, 28, 113).is_some());
    }

    #[tokio::test]
    async fn client_records_call_and_acks() {
        let node = LoopbackNode::new();
        node.start().await;
        let mut client = Scoped::new(node.create_client(RequestKind::Enable, 28, 113).unwrap());
        let response = client.call(enable()).await.unwrap().unwrap();
        assert!(response.is_affirmative());
        let calls = node.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].port, 113);
        assert_eq!(
            calls[0].request,
            Request::Enable(EnableRequest { enable_state: 0 })
        );
        assert_eq!(node.open_clients(), 1);
        drop(client);
        assert_eq!(node.open_clients(), 0);
    }

    #[tokio::test]
    async fn fault_reply_surfaces_as_error() {
        let node = LoopbackNode::new();
        node.start().await;
        node.set_reply(Reply::Fault("bus off".into()));
        let mut client = Scoped::new(node.create_client(RequestKind::Enable, 28, 113).unwrap());
        let err = client.call(enable()).await.unwrap_err();
        assert!(err.to_string().contains("bus off"));
    }

    #[tokio::test]
    async fn publish_reaches_subscribers_on_port_only() {
        let node = LoopbackNode::new();
        node.start().await;
        let mut hb = Scoped::new(node.create_subscriber(MessageType::Heartbeat, 7509).unwrap());
        let mut odom = Scoped::new(
            node.create_subscriber(MessageType::OdometryAndVelocity, 1100)
                .unwrap(),
        );

        assert_eq!(node.publish(7509, Some(28), json!({"uptime": 1})), 1);
        let got = hb.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(got.message["uptime"], 1);
        assert_eq!(got.transfer.source_node_id, Some(28));
        assert!(odom
            .receive(Duration::from_millis(10))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn injected_fault_is_consumed_once() {
        let node = LoopbackNode::new();
        node.start().await;
        let mut sub = Scoped::new(node.create_subscriber(MessageType::Heartbeat, 7509).unwrap());
        node.inject_receive_faults(7509, 1);
        assert!(sub.receive(Duration::from_millis(5)).await.is_err());
        assert!(sub.receive(Duration::from_millis(5)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn subscriber_close_is_counted() {
        let node = LoopbackNode::new();
        node.start().await;
        let sub = node.create_subscriber(MessageType::Heartbeat, 7509).unwrap();
        assert_eq!(node.open_subscribers(), 1);
        drop(Scoped::new(sub));
        assert_eq!(node.open_subscribers(), 0);
        assert_eq!(node.publish(7509, Some(28), json!({})), 0);
    }
}
