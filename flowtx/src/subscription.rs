//! Exclusive ownership of the status-stream registration.
//!
//! The [`SubscriptionManager`] holds at most one open registration against a
//! [`StatusStreamProvider`]. Opening a new one always releases the previous
//! one first, and closing is synchronous: once [`SubscriptionManager::close`]
//! returns, the registered callback will not run again.
//!
//! ```text
//! open(A) ──► [A active] ──open(B)──► close A ──► [B active]
//!                 │                                   │
//!              close(A)                          close_all()
//!                 ▼                                   ▼
//!              [empty]                             [empty]
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace, warn};

use crate::error::ProviderError;
use crate::status::{TxId, TxStatusUpdate};
use crate::util::lock;

/// Callback invoked by a provider for each status delivery.
pub type StatusCallback = Arc<dyn Fn(TxStatusUpdate) + Send + Sync>;

/// External source of per-transaction status updates.
pub trait StatusStreamProvider: Send + Sync {
    /// Register `on_update` for `id`.
    ///
    /// The returned [`Registration`] is the only way to unregister. A
    /// provider that fails must not keep any partial registration.
    fn subscribe_status(
        &self,
        id: &TxId,
        on_update: StatusCallback,
    ) -> Result<Registration, ProviderError>;
}

/// Release capability for a provider-side callback registration.
///
/// Closing is idempotent, and dropping an open registration closes it.
pub struct Registration {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Registration {
    /// Wrap the provider's unregister routine.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A registration with nothing to release.
    #[must_use]
    pub fn noop() -> Self {
        Self { release: None }
    }

    /// Unregister. Later calls do nothing.
    pub fn close(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    /// Whether [`close`](Self::close) has already run.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.release.is_none()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Identifies one `open` call on a [`SubscriptionManager`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    seq: u64,
    tx_id: TxId,
}

impl SubscriptionHandle {
    /// The transaction this handle tracks.
    #[must_use]
    pub const fn tx_id(&self) -> &TxId {
        &self.tx_id
    }

    /// Monotonic sequence number of the `open` that produced this handle.
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }
}

struct ActiveSubscription {
    handle: SubscriptionHandle,
    registration: Registration,
    live: Arc<AtomicBool>,
}

impl Drop for ActiveSubscription {
    fn drop(&mut self) {
        // Gate first so a delivery racing the provider's unregister is dropped.
        self.live.store(false, Ordering::Release);
        self.registration.close();
        debug!(
            tx_id = %self.handle.tx_id,
            seq = self.handle.seq,
            "status subscription closed"
        );
    }
}

/// Owner of the single open status subscription.
pub struct SubscriptionManager {
    provider: Arc<dyn StatusStreamProvider>,
    active: Mutex<Option<ActiveSubscription>>,
    next_seq: AtomicU64,
}

impl fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}

impl SubscriptionManager {
    /// Create a manager over the given provider.
    pub fn new(provider: Arc<dyn StatusStreamProvider>) -> Self {
        Self {
            provider,
            active: Mutex::new(None),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Close whatever is open, then register `on_update` for `id`.
    ///
    /// On provider failure the error is returned and nothing is left open.
    pub fn open(
        &self,
        id: TxId,
        on_update: impl Fn(TxStatusUpdate) + Send + Sync + 'static,
    ) -> Result<SubscriptionHandle, ProviderError> {
        self.close_all();

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let live = Arc::new(AtomicBool::new(true));
        let gate = Arc::clone(&live);
        let callback: StatusCallback = Arc::new(move |update| {
            if gate.load(Ordering::Acquire) {
                on_update(update);
            } else {
                trace!(status = %update.status, "dropped delivery on closed subscription");
            }
        });

        let registration = match self.provider.subscribe_status(&id, callback) {
            Ok(registration) => registration,
            Err(e) => {
                live.store(false, Ordering::Release);
                warn!(tx_id = %id, error = %e, "status subscription failed to open");
                return Err(e);
            }
        };

        let handle = SubscriptionHandle { seq, tx_id: id };
        debug!(tx_id = %handle.tx_id, seq, "status subscription opened");

        let incoming = ActiveSubscription {
            handle: handle.clone(),
            registration,
            live,
        };
        // Only reachable if another thread opened while the provider call was
        // in progress; the later `open` keeps the slot.
        let dropped = {
            let mut slot = lock(&self.active);
            if slot.as_ref().is_some_and(|a| a.handle.seq > seq) {
                Some(incoming)
            } else {
                slot.replace(incoming)
            }
        };
        drop(dropped);

        Ok(handle)
    }

    /// Close `handle` if it is still the open subscription.
    ///
    /// Returns `false` when the handle was already closed or replaced.
    pub fn close(&self, handle: &SubscriptionHandle) -> bool {
        let taken = {
            let mut slot = lock(&self.active);
            if slot.as_ref().is_some_and(|a| a.handle == *handle) {
                slot.take()
            } else {
                None
            }
        };
        taken.is_some()
    }

    /// Close whatever subscription is open.
    ///
    /// Returns `false` when nothing was open.
    pub fn close_all(&self) -> bool {
        // Take under the lock, release outside it: the provider's unregister
        // may re-enter this manager.
        let taken = lock(&self.active).take();
        taken.is_some()
    }

    /// Whether a subscription is currently open.
    pub fn is_open(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Handle of the open subscription, if any.
    pub fn current(&self) -> Option<SubscriptionHandle> {
        lock(&self.active).as_ref().map(|a| a.handle.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::memory::MemoryStatusStream;
    use crate::status::TxStatusCode;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(TxStatusUpdate) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        (count, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_registration_close_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let mut registration = Registration::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        registration.close();
        registration.close();
        drop(registration);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_open_replaces_previous_subscription() {
        let stream = Arc::new(MemoryStatusStream::new());
        let manager = SubscriptionManager::new(stream.clone());

        let (a_count, a_cb) = counter();
        let (b_count, b_cb) = counter();
        let a = manager.open(TxId::new("a"), a_cb).unwrap();
        let b = manager.open(TxId::new("b"), b_cb).unwrap();

        assert_eq!(stream.subscribe_count(), 2);
        assert_eq!(stream.unsubscribe_count(), 1);
        assert_eq!(stream.listener_count(&TxId::new("a")), 0);

        stream.emit(&TxId::new("a"), TxStatusCode::Pending);
        stream.emit(&TxId::new("b"), TxStatusCode::Pending);
        assert_eq!(a_count.load(Ordering::SeqCst), 0);
        assert_eq!(b_count.load(Ordering::SeqCst), 1);

        assert!(!manager.close(&a));
        assert_eq!(manager.current(), Some(b));
    }

    #[test]
    fn test_close_is_safe_when_nothing_open() {
        let stream = Arc::new(MemoryStatusStream::new());
        let manager = SubscriptionManager::new(stream.clone());
        assert!(!manager.close_all());

        let (_, cb) = counter();
        let handle = manager.open(TxId::new("a"), cb).unwrap();
        assert!(manager.close(&handle));
        assert!(!manager.close(&handle));
        assert!(!manager.close_all());
        assert_eq!(stream.unsubscribe_count(), 1);
    }

    #[test]
    fn test_failed_open_leaves_nothing_open() {
        let stream = Arc::new(MemoryStatusStream::new());
        let manager = SubscriptionManager::new(stream.clone());

        let (_, cb) = counter();
        manager.open(TxId::new("a"), cb).unwrap();

        stream.fail_next_subscribe("stream unavailable");
        let (_, cb) = counter();
        let err = manager.open(TxId::new("b"), cb).unwrap_err();
        assert_eq!(err.message, "stream unavailable");
        assert!(!manager.is_open());
        assert_eq!(stream.active_listeners(), 0);
    }

    #[test]
    fn test_no_delivery_after_close() {
        let stream = Arc::new(MemoryStatusStream::new());
        let manager = SubscriptionManager::new(stream.clone());

        let (count, cb) = counter();
        manager.open(TxId::new("a"), cb).unwrap();
        stream.emit(&TxId::new("a"), TxStatusCode::Pending);
        manager.close_all();
        stream.emit(&TxId::new("a"), TxStatusCode::Finalized);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    /// Runs a hook the first time a subscription is requested, before
    /// forwarding to the inner stream.
    struct InterleavingStream {
        inner: Arc<MemoryStatusStream>,
        hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    impl StatusStreamProvider for InterleavingStream {
        fn subscribe_status(
            &self,
            id: &TxId,
            on_update: StatusCallback,
        ) -> Result<Registration, ProviderError> {
            let hook = lock(&self.hook).take();
            if let Some(hook) = hook {
                hook();
            }
            self.inner.subscribe_status(id, on_update)
        }
    }

    #[test]
    fn test_slow_open_does_not_displace_later_open() {
        let stream = Arc::new(MemoryStatusStream::new());
        let provider = Arc::new(InterleavingStream {
            inner: stream.clone(),
            hook: Mutex::new(None),
        });
        let manager = Arc::new(SubscriptionManager::new(provider.clone()));
        let (b_count, b_cb) = counter();
        let later = {
            let manager = Arc::clone(&manager);
            let slot = Arc::new(Mutex::new(None));
            let out = Arc::clone(&slot);
            *lock(&provider.hook) = Some(Box::new(move || {
                *lock(&out) = manager.open(TxId::new("b"), b_cb).ok();
            }));
            slot
        };

        let (_, a_cb) = counter();
        let slow = manager.open(TxId::new("a"), a_cb).unwrap();
        let later = lock(&later).take().unwrap();

        assert!(later.seq() > slow.seq());
        assert_eq!(manager.current(), Some(later));
        assert_eq!(stream.listener_count(&TxId::new("a")), 0);
        stream.emit(&TxId::new("b"), TxStatusCode::Pending);
        assert_eq!(b_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases_registration() {
        let stream = Arc::new(MemoryStatusStream::new());
        {
            let manager = SubscriptionManager::new(stream.clone());
            let (_, cb) = counter();
            manager.open(TxId::new("a"), cb).unwrap();
            assert_eq!(stream.active_listeners(), 1);
        }
        assert_eq!(stream.active_listeners(), 0);
    }
}
