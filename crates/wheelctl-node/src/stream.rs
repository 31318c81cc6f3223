use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, error};
use wheelctl_core::TelemetryEvent;

/// Buffered events per stream before new ones are dropped.
const STREAM_CAPACITY: usize = 1024;

type Callback = Arc<dyn Fn(&TelemetryEvent) + Send + Sync>;

#[derive(Clone)]
enum Sink {
    Callback(Callback),
    Channel(mpsc::Sender<TelemetryEvent>),
}

// ─── EventHub ─────────────────────────────────────────────────────────────

/// Registry of telemetry consumers.
///
/// Consumers register either a callback (`on_event`) or take a
/// [`TelemetryStream`] (`subscribe`). Every emitted event reaches every
/// consumer registered at the time of emission. Cheap to clone; clones share
/// the registry.
#[derive(Clone, Default)]
pub struct EventHub {
    sinks: Arc<Mutex<Vec<Sink>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked on the emitting task for every event.
    pub fn on_event<F>(&self, callback: F)
    where
        F: Fn(&TelemetryEvent) + Send + Sync + 'static,
    {
        self.lock().push(Sink::Callback(Arc::new(callback)));
    }

    /// Open a new event stream.
    pub fn subscribe(&self) -> TelemetryStream {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        self.lock().push(Sink::Channel(tx));
        TelemetryStream { rx }
    }

    pub fn consumer_count(&self) -> usize {
        self.lock().len()
    }

    /// Deliver `event` to every consumer.
    ///
    /// A panicking callback is logged and skipped. Streams whose receiver
    /// was dropped are unregistered; a full stream drops the event.
    pub fn emit(&self, event: &TelemetryEvent) {
        let sinks = self.lock().clone();
        let mut closed = false;

        for sink in &sinks {
            match sink {
                Sink::Callback(cb) => {
                    if catch_unwind(AssertUnwindSafe(|| cb(event))).is_err() {
                        error!(event = %event.name, "telemetry callback panicked");
                    }
                }
                Sink::Channel(tx) => match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(event = %event.name, "telemetry stream full, event dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed = true,
                },
            }
        }

        if closed {
            self.lock().retain(|sink| match sink {
                Sink::Channel(tx) => !tx.is_closed(),
                Sink::Callback(_) => true,
            });
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sink>> {
        self.sinks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ─── TelemetryStream ──────────────────────────────────────────────────────

/// An async stream of [`TelemetryEvent`]s.
///
/// Backed by a bounded Tokio mpsc channel fed by the fan-out's receive
/// loops. Dropping the stream unregisters it on the next emission. The
/// stream ends once the hub and every loop holding it are gone.
///
/// ```rust,ignore
/// use futures::StreamExt;
///
/// let mut events = fanout.subscribe();
/// while let Some(event) = events.next().await {
///     println!("{} [{}]", event.name, event.tier);
/// }
/// ```
pub struct TelemetryStream {
    rx: mpsc::Receiver<TelemetryEvent>,
}

impl TelemetryStream {
    pub async fn recv(&mut self) -> Option<TelemetryEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<TelemetryEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for TelemetryStream {
    type Item = TelemetryEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
