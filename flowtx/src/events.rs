//! Lifecycle events for the presentation layer.
//!
//! The core never renders anything itself. Every state change, terminal
//! outcome, surfaced error and auth change is emitted as a
//! [`LifecycleEvent`] to a [`LifecycleListener`]. [`EventBus`] fans events
//! out to any number of async consumers.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::ErrorKind;
use crate::lifecycle::{LifecycleState, Outcome};
use crate::status::TxId;
use crate::util::lock;

/// Default capacity for the broadcast channel.
const DEFAULT_BROADCAST_CAPACITY: usize = 64;

/// An observable change in the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The observer moved to a new state.
    StateChanged {
        /// The new state.
        state: LifecycleState,
    },
    /// A transaction reached its terminal outcome. Emitted once per id.
    Terminal {
        /// Transaction that finished.
        tx_id: TxId,
        /// How it finished.
        outcome: Outcome,
    },
    /// An error the user should see.
    Error {
        /// Taxonomy bucket.
        kind: ErrorKind,
        /// Display message.
        message: String,
    },
    /// The wallet session changed.
    AuthChanged {
        /// Whether a wallet is connected.
        logged_in: bool,
        /// Connected address.
        address: Option<String>,
    },
}

/// Receiver of lifecycle events.
///
/// Called synchronously from whichever context caused the change, never
/// while the core holds an internal lock. `Tracking` is announced only
/// after the status subscription for it is open.
pub trait LifecycleListener: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &LifecycleEvent);
}

/// Listener that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl LifecycleListener for NoopListener {
    fn on_event(&self, _event: &LifecycleEvent) {}
}

impl<F> LifecycleListener for F
where
    F: Fn(&LifecycleEvent) + Send + Sync,
{
    fn on_event(&self, event: &LifecycleEvent) {
        self(event);
    }
}

/// Event bus statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    /// Events published.
    pub published: u64,
    /// Events published while nobody was subscribed.
    pub unobserved: u64,
}

struct EventBusInner {
    tx: broadcast::Sender<LifecycleEvent>,
    stats: Mutex<BusStats>,
}

/// Broadcast fan-out of lifecycle events.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.inner.tx.receiver_count())
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Create a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BROADCAST_CAPACITY)
    }

    /// Create a bus whose slow receivers lag after `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventBusInner {
                tx,
                stats: Mutex::new(BusStats::default()),
            }),
        }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: LifecycleEvent) {
        trace!(?event, "publishing lifecycle event");
        let delivered = self.inner.tx.send(event).is_ok();
        let mut stats = lock(&self.inner.stats);
        stats.published += 1;
        if !delivered {
            stats.unobserved += 1;
        }
    }

    /// Receive every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.tx.subscribe()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        *lock(&self.inner.stats)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleListener for EventBus {
    fn on_event(&self, event: &LifecycleEvent) {
        self.publish(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bus_fans_out() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.on_event(&LifecycleEvent::StateChanged {
            state: LifecycleState::Submitting,
        });

        assert_eq!(
            a.recv().await.unwrap(),
            LifecycleEvent::StateChanged {
                state: LifecycleState::Submitting
            }
        );
        assert!(matches!(
            b.recv().await.unwrap(),
            LifecycleEvent::StateChanged { .. }
        ));
    }

    #[test]
    fn test_stats_count_unobserved() {
        let bus = EventBus::new();
        bus.publish(LifecycleEvent::StateChanged {
            state: LifecycleState::Idle,
        });
        let _rx = bus.subscribe();
        bus.publish(LifecycleEvent::StateChanged {
            state: LifecycleState::Idle,
        });

        let stats = bus.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.unobserved, 1);
    }

    #[test]
    fn test_event_serialization() {
        let event = LifecycleEvent::Terminal {
            tx_id: TxId::new("abc"),
            outcome: Outcome::Sealed,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "terminal");
        assert_eq!(json["tx_id"], "abc");
        assert_eq!(json["outcome"], "sealed");
    }

    #[test]
    fn test_closure_listener() {
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        let listener = move |_: &LifecycleEvent| *counter.lock().unwrap() += 1;
        listener.on_event(&LifecycleEvent::StateChanged {
            state: LifecycleState::Idle,
        });
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
