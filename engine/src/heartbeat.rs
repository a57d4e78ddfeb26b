//! Heartbeat tick signal
//!
//! The engine is passive: it subscribes to a periodic pulse carrying a
//! monotonically increasing sequence number and runs one orchestration
//! cycle per pulse. An external transport can drive [`Heartbeat::pulse`]
//! directly; when none is available, [`LocalPulse`] is the fallback
//! periodic self-trigger.
//!
//! Pulses go over a `tokio::sync::broadcast` channel: a lagged receiver
//! skips missed pulses, it never blocks the sender.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Broadcast capacity; a receiver further behind than this lags and skips
const PULSE_BUFFER_SIZE: usize = 64;

/// One tick of the orchestration clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    /// Monotonically increasing sequence number
    pub seq: u64,
}

/// Pulse fan-out point
///
/// Cloneable handle; all clones share one broadcast channel.
#[derive(Clone)]
pub struct Heartbeat {
    tx: broadcast::Sender<Pulse>,
    seq: Arc<AtomicU64>,
}

impl Heartbeat {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(PULSE_BUFFER_SIZE);
        Self {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribe to pulses
    pub fn subscribe(&self) -> broadcast::Receiver<Pulse> {
        self.tx.subscribe()
    }

    /// Emit the next pulse
    ///
    /// Returns the emitted sequence number. Sending into a channel with no
    /// subscribers is not an error; the pulse is simply dropped.
    pub fn pulse(&self) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = self.tx.send(Pulse { seq });
        trace!(seq, "heartbeat pulse");
        seq
    }

    /// The last emitted sequence number
    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Local periodic self-trigger
///
/// Spawns a background task that pulses the heartbeat on a fixed interval
/// until stopped. Used when no external tick transport is wired in.
pub struct LocalPulse {
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
}

impl LocalPulse {
    /// Start pulsing `heartbeat` every `interval`
    pub fn start(heartbeat: Heartbeat, interval: Duration) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick of a tokio interval fires immediately; skip it
            // so the first pulse arrives one full interval after start.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }
                heartbeat.pulse();
            }
            debug!("local pulse stopped");
        });

        Self { handle, shutdown }
    }

    /// Stop the pulse task
    pub fn stop(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pulse_sequence_is_monotonic() {
        let heartbeat = Heartbeat::new();
        let mut rx = heartbeat.subscribe();

        assert_eq!(heartbeat.pulse(), 1);
        assert_eq!(heartbeat.pulse(), 2);
        assert_eq!(heartbeat.pulse(), 3);

        assert_eq!(rx.recv().await.unwrap().seq, 1);
        assert_eq!(rx.recv().await.unwrap().seq, 2);
        assert_eq!(rx.recv().await.unwrap().seq, 3);
        assert_eq!(heartbeat.last_seq(), 3);
    }

    #[tokio::test]
    async fn test_pulse_without_subscribers_is_fine() {
        let heartbeat = Heartbeat::new();
        assert_eq!(heartbeat.pulse(), 1);
        assert_eq!(heartbeat.pulse(), 2);
    }

    #[tokio::test]
    async fn test_late_subscriber_only_sees_new_pulses() {
        let heartbeat = Heartbeat::new();
        heartbeat.pulse();
        heartbeat.pulse();

        let mut rx = heartbeat.subscribe();
        heartbeat.pulse();

        assert_eq!(rx.recv().await.unwrap().seq, 3);
    }

    #[tokio::test]
    async fn test_local_pulse_emits_and_stops() {
        let heartbeat = Heartbeat::new();
        let mut rx = heartbeat.subscribe();

        let pulse = LocalPulse::start(heartbeat.clone(), Duration::from_millis(5));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(second.seq > first.seq);

        pulse.stop();
    }
}
