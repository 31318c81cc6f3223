use std::collections::VecDeque;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};
use wheelctl_core::{TelemetryConfig, TelemetryEvent, Tier};

pub const HIGH_CAPACITY: usize = 200;
pub const HIGH_FLUSH_INTERVAL: Duration = Duration::from_millis(10);
pub const MID_CAPACITY: usize = 100;
pub const MID_FLUSH_INTERVAL: Duration = Duration::from_millis(20);

/// Event name the link watchdog listens for.
pub const HEARTBEAT_EVENT: &str = "heartbeat";

/// Events released together for one tier.
#[derive(Debug, Clone, PartialEq)]
pub struct PacedBatch {
    pub tier: Tier,
    pub events: Vec<TelemetryEvent>,
}

// ─── TierPacer ────────────────────────────────────────────────────────────

/// Releases telemetry at a rate suited to its tier.
///
/// - High: bounded ring, flushed every 10 ms, only the newest event per name.
/// - Mid: bounded ring, flushed every 20 ms, every buffered event in order.
/// - Low: released as soon as it arrives.
///
/// Full rings drop their oldest event.
#[derive(Debug, Default)]
pub struct TierPacer {
    high: VecDeque<TelemetryEvent>,
    mid: VecDeque<TelemetryEvent>,
    dropped: u64,
}

impl TierPacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer `event`, or return it straight away for the low tier.
    pub fn push(&mut self, event: TelemetryEvent) -> Option<PacedBatch> {
        let (ring, capacity) = match event.tier {
            Tier::Low => {
                return Some(PacedBatch {
                    tier: Tier::Low,
                    events: vec![event],
                })
            }
            Tier::High => (&mut self.high, HIGH_CAPACITY),
            Tier::Mid => (&mut self.mid, MID_CAPACITY),
        };
        if ring.len() == capacity {
            ring.pop_front();
            self.dropped += 1;
        }
        ring.push_back(event);
        None
    }

    /// Newest buffered high-tier event per name, ordered by arrival.
    pub fn flush_high(&mut self) -> Option<PacedBatch> {
        if self.high.is_empty() {
            return None;
        }
        let mut latest: Vec<TelemetryEvent> = Vec::new();
        for event in self.high.drain(..) {
            latest.retain(|e| e.name != event.name);
            latest.push(event);
        }
        Some(PacedBatch {
            tier: Tier::High,
            events: latest,
        })
    }

    pub fn flush_mid(&mut self) -> Option<PacedBatch> {
        if self.mid.is_empty() {
            return None;
        }
        Some(PacedBatch {
            tier: Tier::Mid,
            events: self.mid.drain(..).collect(),
        })
    }

    /// Events discarded because a ring was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Pace `events` into `sink` until the stream ends, then flush what is
    /// left.
    pub async fn drive<S, F>(mut self, mut events: S, mut sink: F)
    where
        S: Stream<Item = TelemetryEvent> + Unpin,
        F: FnMut(PacedBatch),
    {
        let start = Instant::now();
        let mut high = tokio::time::interval_at(start + HIGH_FLUSH_INTERVAL, HIGH_FLUSH_INTERVAL);
        high.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut mid = tokio::time::interval_at(start + MID_FLUSH_INTERVAL, MID_FLUSH_INTERVAL);
        mid.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(event) => {
                        if let Some(batch) = self.push(event) {
                            sink(batch);
                        }
                    }
                    None => break,
                },
                _ = high.tick() => {
                    if let Some(batch) = self.flush_high() {
                        sink(batch);
                    }
                }
                _ = mid.tick() => {
                    if let Some(batch) = self.flush_mid() {
                        sink(batch);
                    }
                }
            }
        }

        if let Some(batch) = self.flush_high() {
            sink(batch);
        }
        if let Some(batch) = self.flush_mid() {
            sink(batch);
        }
        if self.dropped > 0 {
            warn!(dropped = self.dropped, "telemetry pacer dropped events");
        }
    }
}

// ─── LinkWatchdog ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No heartbeat seen yet and the timeout has not passed.
    Unknown,
    Up,
    Lost,
}

/// Tracks heartbeat events and reports when the remote goes quiet.
#[derive(Debug)]
pub struct LinkWatchdog {
    timeout: Duration,
    since: Instant,
    last_heartbeat: Option<Instant>,
    state: LinkState,
}

impl LinkWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            since: Instant::now(),
            last_heartbeat: None,
            state: LinkState::Unknown,
        }
    }

    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(Duration::from_millis(config.heartbeat_timeout_ms))
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Feed an event. Returns the new state when a heartbeat brings the
    /// link up.
    pub fn observe(&mut self, event: &TelemetryEvent) -> Option<LinkState> {
        if event.name != HEARTBEAT_EVENT {
            return None;
        }
        self.last_heartbeat = Some(Instant::now());
        self.transition(LinkState::Up)
    }

    /// Returns [`LinkState::Lost`] once when the timeout has passed without
    /// a heartbeat.
    pub fn check(&mut self) -> Option<LinkState> {
        let reference = self.last_heartbeat.unwrap_or(self.since);
        if reference.elapsed() > self.timeout {
            return self.transition(LinkState::Lost);
        }
        None
    }

    fn transition(&mut self, next: LinkState) -> Option<LinkState> {
        if self.state == next {
            return None;
        }
        match next {
            LinkState::Up => info!("actuator link up"),
            LinkState::Lost => warn!(timeout_ms = self.timeout.as_millis() as u64, "actuator link lost"),
            LinkState::Unknown => {}
        }
        self.state = next;
        Some(next)
    }
}
