//! The application-facing service object.
//!
//! A [`Session`] is built once by the entry point and owns the transaction
//! observer and the auth gate. Presentation code issues intents through it
//! (`connect`, `disconnect`, `submit`, `query`) and watches the listener for
//! [`LifecycleEvent`]s.
//!
//! Every `.await` on a provider is a point where a disconnect may interleave,
//! so each intent re-validates the session after its await before acting on
//! the result.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::actions::{QueryAction, ScriptRequest, SubmitAction, TransactionRequest};
use crate::auth::{AuthGate, AuthProvider, AuthState};
use crate::cadence::UFix64;
use crate::config::AppConfig;
use crate::error::{ConfigError, ConfigResult, Error, GateError, ProviderError, Result};
use crate::events::{LifecycleEvent, LifecycleListener, NoopListener};
use crate::lifecycle::{LifecycleState, TransactionObserver};
use crate::network::Network;
use crate::status::TxId;
use crate::subscription::StatusStreamProvider;

/// Builder for a [`Session`].
pub struct SessionBuilder {
    auth: Option<Arc<dyn AuthProvider>>,
    status_stream: Option<Arc<dyn StatusStreamProvider>>,
    listener: Arc<dyn LifecycleListener>,
    network: Network,
    compute_limit: u64,
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("network", &self.network)
            .field("compute_limit", &self.compute_limit)
            .field("has_auth", &self.auth.is_some())
            .field("has_status_stream", &self.status_stream.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        let defaults = AppConfig::default();
        Self {
            auth: None,
            status_stream: None,
            listener: Arc::new(NoopListener),
            network: defaults.network,
            compute_limit: defaults.compute_limit,
        }
    }

    /// Set the wallet session provider.
    #[must_use]
    pub fn auth(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(provider);
        self
    }

    /// Set the transaction status stream.
    #[must_use]
    pub fn status_stream(mut self, provider: Arc<dyn StatusStreamProvider>) -> Self {
        self.status_stream = Some(provider);
        self
    }

    /// Set the event listener.
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn LifecycleListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Set the network.
    #[must_use]
    pub const fn network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    /// Set the default computation limit applied by [`Session::transfer`].
    #[must_use]
    pub const fn compute_limit(mut self, limit: u64) -> Self {
        self.compute_limit = limit;
        self
    }

    /// Take network and compute limit from a loaded configuration.
    #[must_use]
    pub const fn config(self, config: &AppConfig) -> Self {
        self.network(config.network).compute_limit(config.compute_limit)
    }

    /// Build the session. It does not observe auth changes until
    /// [`Session::start`].
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] if the auth provider or status stream was
    /// not set.
    pub fn build(self) -> ConfigResult<Session> {
        let auth = self.auth.ok_or_else(|| ConfigError::missing("auth provider"))?;
        let status_stream = self
            .status_stream
            .ok_or_else(|| ConfigError::missing("status stream provider"))?;

        let observer = TransactionObserver::new(status_stream, Arc::clone(&self.listener));
        let gate = AuthGate::new(Arc::clone(&auth), observer.clone(), Arc::clone(&self.listener));
        Ok(Session {
            auth,
            observer,
            gate,
            listener: self.listener,
            network: self.network,
            compute_limit: self.compute_limit,
        })
    }
}

/// Owner of the lifecycle observer and the auth gate for one app instance.
pub struct Session {
    auth: Arc<dyn AuthProvider>,
    observer: TransactionObserver,
    gate: AuthGate,
    listener: Arc<dyn LifecycleListener>,
    network: Network,
    compute_limit: u64,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("network", &self.network)
            .field("observer", &self.observer)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Start building a session.
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Begin observing the wallet session. Later calls do nothing.
    pub fn start(&self) {
        if !self.gate.is_started() {
            info!(network = %self.network, "session started");
        }
        self.gate.start();
    }

    /// Stop observing the wallet session and abandon any tracked transaction.
    pub fn shutdown(&self) {
        self.gate.stop();
        self.observer.reset();
        info!("session shut down");
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.observer.state()
    }

    /// Current wallet session.
    pub fn auth_state(&self) -> AuthState {
        self.gate.current()
    }

    /// Whether a transaction could be submitted right now.
    pub fn can_submit(&self) -> bool {
        self.gate.can_submit()
    }

    /// The network this session targets.
    pub const fn network(&self) -> Network {
        self.network
    }

    /// The lifecycle observer.
    pub const fn observer(&self) -> &TransactionObserver {
        &self.observer
    }

    /// The auth gate.
    pub const fn gate(&self) -> &AuthGate {
        &self.gate
    }

    /// Run wallet discovery and connect.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] if the user closed the wallet prompt, otherwise
    /// [`Error::Provider`].
    pub async fn connect(&self) -> Result<AuthState> {
        debug!("connecting wallet");
        match self.auth.authenticate().await {
            Ok(state) => {
                info!(
                    address = ?state.address,
                    can_authorize = state.can_authorize,
                    "wallet connected"
                );
                Ok(state)
            }
            Err(e) => Err(self.fail(Error::from_provider(e))),
        }
    }

    /// End the wallet session and return the observer to `Idle`.
    ///
    /// # Errors
    ///
    /// [`Error::Provider`] if the wallet refused; the observer is reset
    /// regardless.
    pub async fn disconnect(&self) -> Result<()> {
        debug!("disconnecting wallet");
        let result = self.auth.unauthenticate().await;
        self.observer.reset();
        match result {
            Ok(()) => {
                info!("wallet disconnected");
                Ok(())
            }
            Err(e) => Err(self.fail(Error::from_provider(e))),
        }
    }

    /// Submit `request` through `action` and start tracking it.
    ///
    /// # Errors
    ///
    /// - [`Error::Gate`] if the wallet is not connected or cannot sign.
    /// - [`LifecycleError::AlreadyInProgress`](crate::error::LifecycleError::AlreadyInProgress)
    ///   while another transaction is in flight.
    /// - [`Error::Cancelled`] if the user rejected the request.
    /// - [`Error::Provider`] if submission or subscription failed.
    /// - [`LifecycleError::Superseded`](crate::error::LifecycleError::Superseded)
    ///   if the session was reset while the wallet was signing; the returned
    ///   id is not tracked.
    pub async fn submit(
        &self,
        action: &dyn SubmitAction,
        request: TransactionRequest,
    ) -> Result<TxId> {
        self.require_authorized()?;
        let ticket = self
            .observer
            .begin_submission()
            .map_err(|e| self.fail(e.into()))?;

        match action.submit(request).await {
            Ok(tx_id) => {
                self.observer.on_submitted_for(ticket, tx_id.clone())?;
                Ok(tx_id)
            }
            Err(e) => {
                if let Err(stale) = self.observer.on_submit_failed_for(ticket, &e.message) {
                    debug!(error = %stale, reason = %e, "submission failed after reset");
                }
                Err(Error::from_provider(e))
            }
        }
    }

    /// Transfer `amount` FLOW to `recipient` with the session's compute limit.
    ///
    /// # Errors
    ///
    /// [`Error::Input`] for a malformed amount or address, otherwise as
    /// [`submit`](Self::submit).
    pub async fn transfer(
        &self,
        action: &dyn SubmitAction,
        amount: &str,
        recipient: &str,
    ) -> Result<TxId> {
        let request = TransactionRequest::transfer(self.network, amount, recipient)
            .map_err(|e| self.fail(e.into()))?
            .with_compute_limit(self.compute_limit);
        self.submit(action, request).await
    }

    /// Run a read-only script.
    ///
    /// # Errors
    ///
    /// - [`Error::Gate`] before the query, or [`GateError::NotLoggedIn`] if
    ///   the wallet disconnected while it ran.
    /// - [`Error::Provider`] if the access node failed.
    pub async fn query(
        &self,
        action: &dyn QueryAction,
        request: ScriptRequest,
    ) -> Result<serde_json::Value> {
        self.require_authorized()?;
        let value = action
            .query(request)
            .await
            .map_err(|e| self.fail(Error::from_provider(e)))?;

        if !self.gate.is_logged_in() {
            debug!("query result discarded, wallet disconnected");
            return Err(self.fail(GateError::NotLoggedIn.into()));
        }
        Ok(value)
    }

    /// FLOW balance of the connected account.
    ///
    /// # Errors
    ///
    /// As [`query`](Self::query), plus [`Error::Provider`] if the result is
    /// not a `UFix64`.
    pub async fn balance(&self, action: &dyn QueryAction) -> Result<UFix64> {
        let state = self.gate.current();
        let Some(address) = state.address.filter(|_| state.logged_in) else {
            return Err(self.fail(GateError::NotLoggedIn.into()));
        };
        let request =
            ScriptRequest::balance(self.network, &address).map_err(|e| self.fail(e.into()))?;
        let value = self.query(action, request).await?;

        let balance = match &value {
            serde_json::Value::String(s) => s.parse::<UFix64>().ok(),
            serde_json::Value::Number(n) => n.to_string().parse::<UFix64>().ok(),
            _ => None,
        };
        balance.ok_or_else(|| {
            self.fail(Error::Provider(ProviderError::new(format!(
                "unexpected balance result: {value}"
            ))))
        })
    }

    /// `Terminal → Idle` once the outcome has been shown.
    pub fn acknowledge(&self) -> bool {
        self.observer.acknowledge()
    }

    fn require_authorized(&self) -> Result<()> {
        self.gate
            .require_authorized()
            .map_err(|e| self.fail(e.into()))
    }

    /// Report `err` to the listener if the user should see it.
    fn fail(&self, err: Error) -> Error {
        match err.user_message() {
            Some(message) => {
                warn!(kind = ?err.kind(), error = %err, "session error");
                self.listener.on_event(&LifecycleEvent::Error {
                    kind: err.kind(),
                    message,
                });
            }
            None => debug!(error = %err, "suppressed session error"),
        }
        err
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.gate.stop();
        self.observer.reset();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::{MemoryAuthProvider, MemoryStatusStream, MemorySubmitter, RecordingListener};
    use crate::status::TxStatusCode;

    struct Fixture {
        session: Session,
        auth: Arc<MemoryAuthProvider>,
        stream: Arc<MemoryStatusStream>,
        listener: Arc<RecordingListener>,
        submitter: MemorySubmitter,
    }

    fn fixture(auth: MemoryAuthProvider) -> Fixture {
        let auth = Arc::new(auth);
        let stream = Arc::new(MemoryStatusStream::new());
        let listener = Arc::new(RecordingListener::new());
        let session = Session::builder()
            .auth(auth.clone())
            .status_stream(stream.clone())
            .listener(listener.clone())
            .build()
            .unwrap();
        session.start();
        Fixture {
            session,
            auth,
            stream,
            listener,
            submitter: MemorySubmitter::new(),
        }
    }

    fn transfer() -> TransactionRequest {
        TransactionRequest::transfer(Network::Testnet, "1.0", "0x01cf0e2f2f715450").unwrap()
    }

    #[test]
    fn test_build_requires_providers() {
        let err = Session::builder().build().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[tokio::test]
    async fn test_submit_requires_login() {
        let f = fixture(MemoryAuthProvider::new());
        let err = f.session.submit(&f.submitter, transfer()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        assert!(f.submitter.submitted().is_empty());
        assert_eq!(f.session.state(), LifecycleState::Idle);
        assert_eq!(f.listener.error_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_then_submit_tracks() {
        let f = fixture(MemoryAuthProvider::new());
        f.session.connect().await.unwrap();
        assert!(f.session.can_submit());

        let id = f.session.submit(&f.submitter, transfer()).await.unwrap();
        assert_eq!(
            f.session.state(),
            LifecycleState::Tracking {
                tx_id: id.clone(),
                status: TxStatusCode::Unknown
            }
        );
        assert_eq!(f.stream.listener_count(&id), 1);
    }

    #[tokio::test]
    async fn test_cancelled_submit_is_silent() {
        let f = fixture(MemoryAuthProvider::logged_in("0x01cf0e2f2f715450"));
        f.submitter
            .push_submit(Err(ProviderError::new("User rejected request")));

        let err = f.session.submit(&f.submitter, transfer()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UserCancelled);
        assert_eq!(f.session.state(), LifecycleState::Idle);
        assert_eq!(f.listener.error_count(), 0);
    }

    #[tokio::test]
    async fn test_second_submit_rejected() {
        let f = fixture(MemoryAuthProvider::logged_in("0x01cf0e2f2f715450"));
        f.session.submit(&f.submitter, transfer()).await.unwrap();

        let err = f.session.submit(&f.submitter, transfer()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyInProgress);
        assert_eq!(f.submitter.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_transfer_rejects_bad_amount() {
        let f = fixture(MemoryAuthProvider::logged_in("0x01cf0e2f2f715450"));
        let err = f
            .session
            .transfer(&f.submitter, "0", "0x01cf0e2f2f715450")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(f.session.state(), LifecycleState::Idle);
    }

    #[tokio::test]
    async fn test_transfer_uses_compute_limit() {
        let auth = Arc::new(MemoryAuthProvider::logged_in("0x01cf0e2f2f715450"));
        let session = Session::builder()
            .auth(auth)
            .status_stream(Arc::new(MemoryStatusStream::new()))
            .compute_limit(9999)
            .build()
            .unwrap();
        let submitter = MemorySubmitter::new();
        session
            .transfer(&submitter, "2", "01cf0e2f2f715450")
            .await
            .unwrap();
        assert_eq!(submitter.submitted()[0].compute_limit, 9999);
    }

    #[tokio::test]
    async fn test_disconnect_resets_tracking() {
        let f = fixture(MemoryAuthProvider::logged_in("0x01cf0e2f2f715450"));
        let id = f.session.submit(&f.submitter, transfer()).await.unwrap();
        f.stream.emit(&id, TxStatusCode::Pending);

        f.session.disconnect().await.unwrap();
        assert_eq!(f.session.state(), LifecycleState::Idle);
        assert_eq!(f.stream.active_listeners(), 0);
        assert!(!f.auth.snapshot().logged_in);
    }

    #[tokio::test]
    async fn test_balance_parses_ufix64() {
        let f = fixture(MemoryAuthProvider::logged_in("0x01cf0e2f2f715450"));
        f.submitter.push_query(Ok(json!("100.00100000")));

        let balance = f.session.balance(&f.submitter).await.unwrap();
        assert_eq!(balance.to_string(), "100.00100000");
        let request = &f.submitter.queried()[0];
        assert_eq!(request.args[0].value, "0x01cf0e2f2f715450");
    }

    #[tokio::test]
    async fn test_balance_rejects_garbage() {
        let f = fixture(MemoryAuthProvider::logged_in("0x01cf0e2f2f715450"));
        f.submitter.push_query(Ok(json!({"nope": true})));
        let err = f.session.balance(&f.submitter).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderFailure);
    }

    #[tokio::test]
    async fn test_shutdown_releases_everything() {
        let f = fixture(MemoryAuthProvider::logged_in("0x01cf0e2f2f715450"));
        f.session.submit(&f.submitter, transfer()).await.unwrap();
        assert_eq!(f.auth.subscriber_count(), 1);

        f.session.shutdown();
        assert_eq!(f.auth.subscriber_count(), 0);
        assert_eq!(f.stream.active_listeners(), 0);
        assert_eq!(f.session.state(), LifecycleState::Idle);
    }
}
