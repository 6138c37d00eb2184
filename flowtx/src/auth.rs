//! Wallet session state and the authorization gate.
//!
//! The [`AuthProvider`] owns the wallet session (discovery, handshake,
//! service list). [`AuthGate`] only reads it: it checks preconditions before
//! any action reaches the SDK, and it resets the [`TransactionObserver`] when
//! the session ends.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{GateError, ProviderError};
use crate::events::{LifecycleEvent, LifecycleListener};
use crate::lifecycle::TransactionObserver;
use crate::subscription::Registration;
use crate::util::lock;

/// Service type a wallet advertises when it can authorize transactions.
pub const AUTHZ_SERVICE: &str = "authz";

/// A capability advertised by the connected wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletService {
    /// Service type, e.g. `authn`, `authz`, `user-signature`.
    #[serde(rename = "type")]
    pub service_type: String,
    /// Endpoint the wallet exposes for this service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl WalletService {
    /// A service of the given type with no endpoint.
    pub fn new(service_type: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            endpoint: None,
        }
    }
}

/// Current wallet session as reported by the auth provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    /// Whether a wallet is connected.
    pub logged_in: bool,
    /// Connected account address.
    pub address: Option<String>,
    /// Whether the wallet advertised an authorization service.
    pub can_authorize: bool,
}

impl AuthState {
    /// No wallet connected.
    #[must_use]
    pub fn logged_out() -> Self {
        Self::default()
    }

    /// Session derived from the wallet's advertised services.
    pub fn from_services(address: impl Into<String>, services: &[WalletService]) -> Self {
        Self {
            logged_in: true,
            address: Some(address.into()),
            can_authorize: services.iter().any(|s| s.service_type == AUTHZ_SERVICE),
        }
    }
}

/// Callback invoked on each auth state change.
pub type AuthCallback = Arc<dyn Fn(&AuthState) + Send + Sync>;

/// External wallet session provider.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Register `on_change`; the returned registration unsubscribes.
    fn subscribe(&self, on_change: AuthCallback) -> Registration;

    /// Best-effort current state.
    fn snapshot(&self) -> AuthState;

    /// Run wallet discovery and the connection handshake.
    async fn authenticate(&self) -> Result<AuthState, ProviderError>;

    /// End the wallet session.
    async fn unauthenticate(&self) -> Result<(), ProviderError>;
}

struct GateShared {
    last: Mutex<AuthState>,
    observer: TransactionObserver,
    listener: Arc<dyn LifecycleListener>,
}

impl GateShared {
    fn on_change(&self, next: &AuthState) {
        let was_logged_in = {
            let mut last = lock(&self.last);
            let was = last.logged_in;
            *last = next.clone();
            was
        };
        debug!(
            logged_in = next.logged_in,
            address = ?next.address,
            can_authorize = next.can_authorize,
            "auth state changed"
        );
        self.listener.on_event(&LifecycleEvent::AuthChanged {
            logged_in: next.logged_in,
            address: next.address.clone(),
        });
        if was_logged_in && !next.logged_in {
            info!("wallet disconnected, resetting transaction lifecycle");
            self.observer.reset();
        }
    }
}

/// Precondition checks and logout handling for a wallet session.
pub struct AuthGate {
    provider: Arc<dyn AuthProvider>,
    shared: Arc<GateShared>,
    registration: Mutex<Option<Registration>>,
}

impl fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGate")
            .field("last", &*lock(&self.shared.last))
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

impl AuthGate {
    /// Create a gate that resets `observer` when the session ends.
    pub fn new(
        provider: Arc<dyn AuthProvider>,
        observer: TransactionObserver,
        listener: Arc<dyn LifecycleListener>,
    ) -> Self {
        Self {
            shared: Arc::new(GateShared {
                last: Mutex::new(provider.snapshot()),
                observer,
                listener,
            }),
            provider,
            registration: Mutex::new(None),
        }
    }

    /// Subscribe to the provider. Later calls do nothing.
    pub fn start(&self) {
        let mut registration = lock(&self.registration);
        if registration.is_some() {
            return;
        }
        *lock(&self.shared.last) = self.provider.snapshot();

        let weak: Weak<GateShared> = Arc::downgrade(&self.shared);
        *registration = Some(self.provider.subscribe(Arc::new(move |state: &AuthState| {
            if let Some(shared) = weak.upgrade() {
                shared.on_change(state);
            }
        })));
        debug!("auth gate subscribed");
    }

    /// Unsubscribe from the provider.
    pub fn stop(&self) {
        let taken = lock(&self.registration).take();
        if taken.is_some() {
            debug!("auth gate unsubscribed");
        }
    }

    /// Whether [`start`](Self::start) has subscribed.
    pub fn is_started(&self) -> bool {
        lock(&self.registration).is_some()
    }

    /// Current session from the provider.
    pub fn current(&self) -> AuthState {
        self.provider.snapshot()
    }

    /// Whether a wallet is connected right now.
    pub fn is_logged_in(&self) -> bool {
        self.current().logged_in
    }

    /// Whether a transaction could be submitted right now.
    pub fn can_submit(&self) -> bool {
        let state = self.current();
        state.logged_in && state.can_authorize
    }

    /// Check the preconditions shared by every submit and query action.
    ///
    /// # Errors
    ///
    /// [`GateError::NotLoggedIn`] or
    /// [`GateError::MissingAuthorizationCapability`].
    pub fn require_authorized(&self) -> Result<(), GateError> {
        let state = self.current();
        if !state.logged_in {
            return Err(GateError::NotLoggedIn);
        }
        if !state.can_authorize {
            return Err(GateError::MissingAuthorizationCapability);
        }
        Ok(())
    }
}

impl Drop for AuthGate {
    fn drop(&mut self) {
        self.stop();
    }
}
