use std::ops::{Deref, DerefMut};
use std::time::Duration;

use async_trait::async_trait;
use wheelctl_core::{MessageType, NodeId, PortId, Request, RequestKind, Response, Telemetry};

use crate::Result;

// ─── Node service ─────────────────────────────────────────────────────────

/// The transport node this crate talks through.
///
/// Implementations own the bus connection and hand out subscriber and
/// client handles. Handle creation returns `None` when the node cannot
/// provide the channel (not started, port in use, etc.). Implementations
/// must be safe to use from many tasks at once.
#[async_trait]
pub trait NodeService: Send + Sync {
    async fn start(&self) -> bool;

    async fn stop(&self);

    fn create_subscriber(
        &self,
        message_type: MessageType,
        port: PortId,
    ) -> Option<Box<dyn Subscriber>>;

    fn create_client(
        &self,
        request_type: RequestKind,
        server_node_id: NodeId,
        port: PortId,
    ) -> Option<Box<dyn Client>>;
}

/// Release of a node handle. Called exactly once per handle by [`Scoped`].
pub trait Close {
    fn close(&mut self);
}

/// Receiving side of a subscription.
#[async_trait]
pub trait Subscriber: Close + Send {
    /// Wait up to `timeout` for the next message. `Ok(None)` when the
    /// deadline passes without one.
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Telemetry>>;
}

/// Calling side of a service.
#[async_trait]
pub trait Client: Close + Send {
    /// Issue `request` and wait for the reply. `Ok(None)` when the server
    /// answered with nothing.
    async fn call(&mut self, request: Request) -> Result<Option<Response>>;
}

// ─── Scoped ───────────────────────────────────────────────────────────────

/// Owns a node handle and closes it when dropped, on every exit path.
pub struct Scoped<T: Close + ?Sized> {
    inner: Box<T>,
}

impl<T: Close + ?Sized> Scoped<T> {
    pub fn new(inner: Box<T>) -> Self {
        Self { inner }
    }
}

impl<T: Close + ?Sized> Deref for Scoped<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: Close + ?Sized> DerefMut for Scoped<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: Close + ?Sized> Drop for Scoped<T> {
    fn drop(&mut self) {
        self.inner.close();
    }
}
