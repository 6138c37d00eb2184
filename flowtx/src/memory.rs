//! In-memory providers.
//!
//! Deterministic stand-ins for the wallet, the access node and the status
//! stream. Used by tests and by the CLI's simulated network. None of them
//! hold their own lock while invoking a callback, so callbacks may re-enter
//! (close a subscription from inside a delivery, read a snapshot from inside
//! an auth notification).

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::actions::{QueryAction, ScriptRequest, SubmitAction, TransactionRequest};
use crate::auth::{AUTHZ_SERVICE, AuthCallback, AuthProvider, AuthState, WalletService};
use crate::error::ProviderError;
use crate::events::{LifecycleEvent, LifecycleListener};
use crate::status::{TxId, TxStatusUpdate};
use crate::subscription::{Registration, StatusCallback, StatusStreamProvider};
use crate::util::lock;

/// Address used when authenticating without an explicit one.
pub const DEFAULT_ACCOUNT: &str = "0xf8d6e0586b0a20c7";

// ============================================================================
// Auth
// ============================================================================

struct AuthInner {
    state: Mutex<AuthState>,
    subscribers: Mutex<Vec<(u64, AuthCallback)>>,
    next_id: AtomicU64,
    next_authenticate: Mutex<Option<Result<AuthState, ProviderError>>>,
    address: String,
}

impl AuthInner {
    fn notify(&self, state: &AuthState) {
        let subscribers: Vec<AuthCallback> = lock(&self.subscribers)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in subscribers {
            callback(state);
        }
    }
}

/// Wallet session held in memory.
///
/// `authenticate` logs in as an authz-capable wallet unless a different
/// result was scripted with [`script_authenticate`](Self::script_authenticate).
#[derive(Clone)]
pub struct MemoryAuthProvider {
    inner: Arc<AuthInner>,
}

impl fmt::Debug for MemoryAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAuthProvider")
            .field("state", &*lock(&self.inner.state))
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuthProvider {
    /// Logged out; authenticates as [`DEFAULT_ACCOUNT`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(AuthState::logged_out(), DEFAULT_ACCOUNT)
    }

    /// Already logged in to an authz-capable wallet at `address`.
    #[must_use]
    pub fn logged_in(address: &str) -> Self {
        Self::with_state(Self::authorized(address), address)
    }

    fn with_state(state: AuthState, address: &str) -> Self {
        Self {
            inner: Arc::new(AuthInner {
                state: Mutex::new(state),
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                next_authenticate: Mutex::new(None),
                address: address.to_string(),
            }),
        }
    }

    fn authorized(address: &str) -> AuthState {
        AuthState::from_services(
            address,
            &[WalletService::new("authn"), WalletService::new(AUTHZ_SERVICE)],
        )
    }

    /// Replace the session and notify every subscriber.
    pub fn set_state(&self, state: AuthState) {
        *lock(&self.inner.state) = state.clone();
        trace!(logged_in = state.logged_in, "memory auth state set");
        self.inner.notify(&state);
    }

    /// Result for the next `authenticate` call only.
    ///
    /// A scripted `Ok` state is applied and broadcast like a real login.
    pub fn script_authenticate(&self, result: Result<AuthState, ProviderError>) {
        *lock(&self.inner.next_authenticate) = Some(result);
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }
}

#[async_trait]
impl AuthProvider for MemoryAuthProvider {
    fn subscribe(&self, on_change: AuthCallback) -> Registration {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.subscribers).push((id, on_change));
        let inner = Arc::downgrade(&self.inner);
        Registration::new(move || {
            if let Some(inner) = inner.upgrade() {
                lock(&inner.subscribers).retain(|(sub, _)| *sub != id);
            }
        })
    }

    fn snapshot(&self) -> AuthState {
        lock(&self.inner.state).clone()
    }

    async fn authenticate(&self) -> Result<AuthState, ProviderError> {
        let scripted = lock(&self.inner.next_authenticate).take();
        let state = match scripted {
            Some(Err(e)) => return Err(e),
            Some(Ok(state)) => state,
            None => Self::authorized(&self.inner.address),
        };
        self.set_state(state.clone());
        Ok(state)
    }

    async fn unauthenticate(&self) -> Result<(), ProviderError> {
        self.set_state(AuthState::logged_out());
        Ok(())
    }
}

// ============================================================================
// Status stream
// ============================================================================

struct StreamListener {
    id: u64,
    tx_id: TxId,
    callback: StatusCallback,
}

#[derive(Default)]
struct StreamState {
    listeners: Vec<StreamListener>,
    last: Vec<(TxId, TxStatusUpdate)>,
    fail_next: Option<String>,
}

#[derive(Default)]
struct StreamInner {
    state: Mutex<StreamState>,
    next_id: AtomicU64,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
    replay: bool,
}

/// Per-transaction status fan-out driven by [`emit`](Self::emit).
///
/// In replaying mode a new subscriber first receives the last update
/// emitted for its id, synchronously from inside `subscribe_status`, the
/// way a network client replays the status it already knows.
#[derive(Clone, Default)]
pub struct MemoryStatusStream {
    inner: Arc<StreamInner>,
}

impl fmt::Debug for MemoryStatusStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStatusStream")
            .field("active_listeners", &self.active_listeners())
            .field("subscribes", &self.subscribe_count())
            .field("unsubscribes", &self.unsubscribe_count())
            .finish_non_exhaustive()
    }
}

impl MemoryStatusStream {
    /// A stream that only delivers what is emitted after subscribing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A stream that replays the last known update to new subscribers.
    #[must_use]
    pub fn replaying() -> Self {
        Self {
            inner: Arc::new(StreamInner {
                replay: true,
                ..StreamInner::default()
            }),
        }
    }

    /// Deliver `update` to every listener for `id`.
    ///
    /// Returns the number of callbacks invoked.
    pub fn emit(&self, id: &TxId, update: impl Into<TxStatusUpdate>) -> usize {
        let update = update.into();
        let callbacks: Vec<StatusCallback> = {
            let mut state = lock(&self.inner.state);
            let callbacks: Vec<StatusCallback> = state
                .listeners
                .iter()
                .filter(|l| l.tx_id == *id)
                .map(|l| Arc::clone(&l.callback))
                .collect();
            if self.inner.replay {
                state.last.retain(|(known, _)| known != id);
                // A terminal status someone already saw is never replayed.
                if !(update.status.is_terminal() && !callbacks.is_empty()) {
                    state.last.push((id.clone(), update.clone()));
                }
            }
            callbacks
        };
        trace!(tx_id = %id, status = %update.status, listeners = callbacks.len(), "emit");
        for callback in &callbacks {
            callback(update.clone());
        }
        callbacks.len()
    }

    /// Make the next `subscribe_status` fail with `message`.
    pub fn fail_next_subscribe(&self, message: impl Into<String>) {
        lock(&self.inner.state).fail_next = Some(message.into());
    }

    /// Successful `subscribe_status` calls so far.
    pub fn subscribe_count(&self) -> usize {
        self.inner.subscribes.load(Ordering::SeqCst)
    }

    /// Registrations released so far.
    pub fn unsubscribe_count(&self) -> usize {
        self.inner.unsubscribes.load(Ordering::SeqCst)
    }

    /// Live listeners for `id`.
    pub fn listener_count(&self, id: &TxId) -> usize {
        lock(&self.inner.state)
            .listeners
            .iter()
            .filter(|l| l.tx_id == *id)
            .count()
    }

    /// Transactions whose last status is held for replay.
    pub fn replay_cache_len(&self) -> usize {
        lock(&self.inner.state).last.len()
    }

    /// Live listeners across all ids.
    pub fn active_listeners(&self) -> usize {
        lock(&self.inner.state).listeners.len()
    }
}

impl StatusStreamProvider for MemoryStatusStream {
    fn subscribe_status(
        &self,
        id: &TxId,
        on_update: StatusCallback,
    ) -> Result<Registration, ProviderError> {
        let listener_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let replay = {
            let mut state = lock(&self.inner.state);
            if let Some(message) = state.fail_next.take() {
                debug!(tx_id = %id, %message, "injected subscribe failure");
                return Err(ProviderError::new(message));
            }
            state.listeners.push(StreamListener {
                id: listener_id,
                tx_id: id.clone(),
                callback: Arc::clone(&on_update),
            });
            let position = state.last.iter().position(|(known, _)| known == id);
            position.map(|i| {
                if state.last[i].1.status.is_terminal() {
                    state.last.swap_remove(i).1
                } else {
                    state.last[i].1.clone()
                }
            })
        };
        self.inner.subscribes.fetch_add(1, Ordering::SeqCst);

        let inner = Arc::downgrade(&self.inner);
        let registration = Registration::new(move || {
            if let Some(inner) = inner.upgrade() {
                lock(&inner.state).listeners.retain(|l| l.id != listener_id);
                inner.unsubscribes.fetch_add(1, Ordering::SeqCst);
            }
        });

        if let Some(update) = replay {
            trace!(tx_id = %id, status = %update.status, "replaying last status");
            on_update(update);
        }
        Ok(registration)
    }
}

// ============================================================================
// Submit / query
// ============================================================================

#[derive(Default)]
struct SubmitterState {
    submit_results: VecDeque<Result<TxId, ProviderError>>,
    query_results: VecDeque<Result<serde_json::Value, ProviderError>>,
    submitted: Vec<TransactionRequest>,
    queried: Vec<ScriptRequest>,
}

/// Scripted submit and query actions.
///
/// Unscripted submissions succeed with ids `tx1`, `tx2`, ...; unscripted
/// queries return `null`.
#[derive(Default)]
pub struct MemorySubmitter {
    state: Mutex<SubmitterState>,
    counter: AtomicU64,
}

impl fmt::Debug for MemorySubmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("MemorySubmitter")
            .field("submitted", &state.submitted.len())
            .field("queried", &state.queried.len())
            .finish_non_exhaustive()
    }
}

impl MemorySubmitter {
    /// Submitter with nothing scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of a future `submit`.
    pub fn push_submit(&self, result: Result<TxId, ProviderError>) {
        lock(&self.state).submit_results.push_back(result);
    }

    /// Queue the result of a future `query`.
    pub fn push_query(&self, result: Result<serde_json::Value, ProviderError>) {
        lock(&self.state).query_results.push_back(result);
    }

    /// Requests passed to `submit`, in order.
    pub fn submitted(&self) -> Vec<TransactionRequest> {
        lock(&self.state).submitted.clone()
    }

    /// Requests passed to `query`, in order.
    pub fn queried(&self) -> Vec<ScriptRequest> {
        lock(&self.state).queried.clone()
    }
}

#[async_trait]
impl SubmitAction for MemorySubmitter {
    async fn submit(&self, request: TransactionRequest) -> Result<TxId, ProviderError> {
        let scripted = {
            let mut state = lock(&self.state);
            state.submitted.push(request);
            state.submit_results.pop_front()
        };
        scripted.unwrap_or_else(|| {
            let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
            Ok(TxId::new(format!("tx{n}")))
        })
    }
}

#[async_trait]
impl QueryAction for MemorySubmitter {
    async fn query(&self, request: ScriptRequest) -> Result<serde_json::Value, ProviderError> {
        let mut state = lock(&self.state);
        state.queried.push(request);
        state
            .query_results
            .pop_front()
            .unwrap_or(Ok(serde_json::Value::Null))
    }
}

// ============================================================================
// Listener
// ============================================================================

/// Listener that keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingListener {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything received so far.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        lock(&self.events).clone()
    }

    /// Number of `Terminal` events.
    pub fn terminal_count(&self) -> usize {
        self.count(|e| matches!(e, LifecycleEvent::Terminal { .. }))
    }

    /// Number of `Error` events.
    pub fn error_count(&self) -> usize {
        self.count(|e| matches!(e, LifecycleEvent::Error { .. }))
    }

    /// Forget everything received so far.
    pub fn clear(&self) {
        lock(&self.events).clear();
    }

    fn count(&self, pred: impl Fn(&LifecycleEvent) -> bool) -> usize {
        lock(&self.events).iter().filter(|e| pred(e)).count()
    }
}

impl LifecycleListener for RecordingListener {
    fn on_event(&self, event: &LifecycleEvent) {
        lock(&self.events).push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::TxStatusCode;

    #[test]
    fn test_emit_reaches_only_matching_listeners() {
        let stream = MemoryStatusStream::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let _reg = stream
            .subscribe_status(
                &TxId::new("a"),
                Arc::new(move |_: TxStatusUpdate| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert_eq!(stream.emit(&TxId::new("a"), TxStatusCode::Pending), 1);
        assert_eq!(stream.emit(&TxId::new("b"), TxStatusCode::Pending), 0);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let stream = MemoryStatusStream::new();
        let slot: Arc<Mutex<Option<Registration>>> = Arc::new(Mutex::new(None));
        let inner_slot = Arc::clone(&slot);
        let registration = stream
            .subscribe_status(
                &TxId::new("a"),
                Arc::new(move |_: TxStatusUpdate| {
                    let taken = inner_slot.lock().unwrap().take();
                    drop(taken);
                }),
            )
            .unwrap();
        *slot.lock().unwrap() = Some(registration);

        stream.emit(&TxId::new("a"), TxStatusCode::Sealed);
        assert_eq!(stream.active_listeners(), 0);
        assert_eq!(stream.unsubscribe_count(), 1);
    }

    #[test]
    fn test_replaying_stream_delivers_last_status() {
        let stream = MemoryStatusStream::replaying();
        stream.emit(&TxId::new("a"), TxStatusCode::Pending);
        stream.emit(&TxId::new("a"), TxStatusCode::Executed);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _reg = stream
            .subscribe_status(
                &TxId::new("a"),
                Arc::new(move |u: TxStatusUpdate| sink.lock().unwrap().push(u.status)),
            )
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![TxStatusCode::Executed]);
    }

    #[test]
    fn test_replay_cache_forgets_terminal_statuses() {
        let stream = MemoryStatusStream::replaying();
        let a = TxId::new("a");
        let b = TxId::new("b");

        // Delivered live: nothing left to replay.
        let _reg = stream.subscribe_status(&a, Arc::new(|_: TxStatusUpdate| {})).unwrap();
        stream.emit(&a, TxStatusCode::Pending);
        assert_eq!(stream.replay_cache_len(), 1);
        stream.emit(&a, TxStatusCode::Sealed);
        assert_eq!(stream.replay_cache_len(), 0);

        // Emitted before anyone listened: replayed once, then dropped.
        stream.emit(&b, TxStatusCode::Expired);
        assert_eq!(stream.replay_cache_len(), 1);
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&seen);
        let _first = stream
            .subscribe_status(
                &b,
                Arc::new(move |_: TxStatusUpdate| {
                    sink.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(stream.replay_cache_len(), 0);

        let _second = stream.subscribe_status(&b, Arc::new(|_: TxStatusUpdate| {})).unwrap();
        assert_eq!(stream.replay_cache_len(), 0);
    }

    #[tokio::test]
    async fn test_auth_provider_login_and_logout() {
        let auth = MemoryAuthProvider::new();
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);
        let _reg = auth.subscribe(Arc::new(move |s: &AuthState| {
            sink.lock().unwrap().push(s.logged_in);
        }));

        let state = auth.authenticate().await.unwrap();
        assert!(state.can_authorize);
        assert_eq!(state.address.as_deref(), Some(DEFAULT_ACCOUNT));

        auth.unauthenticate().await.unwrap();
        assert!(!auth.snapshot().logged_in);
        assert_eq!(*changes.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_scripted_authenticate_failure() {
        let auth = MemoryAuthProvider::new();
        auth.script_authenticate(Err(ProviderError::new("discovery timed out")));
        assert!(auth.authenticate().await.is_err());
        assert!(!auth.snapshot().logged_in);
        assert!(auth.authenticate().await.is_ok());
    }

    #[tokio::test]
    async fn test_submitter_records_requests() {
        let submitter = MemorySubmitter::new();
        submitter.push_submit(Err(ProviderError::new("User rejected request")));
        let request = TransactionRequest::transfer(
            crate::network::Network::Testnet,
            "1",
            "0x01cf0e2f2f715450",
        )
        .unwrap();

        assert!(submitter.submit(request.clone()).await.is_err());
        assert_eq!(submitter.submit(request).await.unwrap(), TxId::new("tx1"));
        assert_eq!(submitter.submitted().len(), 2);
    }
}
