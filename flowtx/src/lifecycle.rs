//! Transaction lifecycle observer.
//!
//! [`TransactionObserver`] is the state machine that follows one submitted
//! transaction from the wallet prompt to its terminal network status:
//!
//! ```text
//!            begin_submission            on_submitted(id)
//!   Idle ───────────────────► Submitting ───────────────► Tracking(id, status)
//!    ▲                            │                            │
//!    │      on_submit_failed      │          Sealed / Expired  │
//!    ├────────────────────────────┘          / stream error    ▼
//!    │                                                  Terminal(id, outcome)
//!    │              reset() from any state                     │
//!    └─────────────────────────────────────────────────────────┘
//! ```
//!
//! At most one transaction is in flight. Status deliveries arrive through a
//! [`SubscriptionManager`]; each tracking session is stamped with a
//! generation so a delivery from an earlier session can never touch the
//! current one.

use std::fmt;
use std::sync::{Arc, LazyLock, Mutex, Weak};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, ErrorKind, LifecycleError};
use crate::events::{LifecycleEvent, LifecycleListener};
use crate::status::{TxId, TxStatusCode, TxStatusUpdate};
use crate::subscription::{StatusStreamProvider, SubscriptionHandle, SubscriptionManager};
use crate::util::lock;

/// Wallet responses that mean the user backed out rather than something failing.
static CANCELLATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)cancel|declin|reject").expect("valid cancellation pattern"));

/// How a tracked transaction ended.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Sealed without an execution error.
    Sealed,
    /// Dropped by the network before finalization.
    Expired,
    /// Sealed with an execution error, or the status stream failed.
    Failed(String),
}

impl Outcome {
    /// Whether the transaction took effect on chain.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Sealed)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sealed => f.write_str("sealed"),
            Self::Expired => f.write_str("expired"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Current lifecycle state as seen by the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LifecycleState {
    /// Nothing in flight.
    #[default]
    Idle,
    /// Waiting for the wallet to sign and the submit action to return.
    Submitting,
    /// Submitted; following network status.
    Tracking {
        /// Transaction being tracked.
        tx_id: TxId,
        /// Highest status seen so far.
        status: TxStatusCode,
    },
    /// Reached a terminal status.
    Terminal {
        /// Transaction that finished.
        tx_id: TxId,
        /// How it finished.
        outcome: Outcome,
    },
}

impl LifecycleState {
    /// Short state name for logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Submitting => "submitting",
            Self::Tracking { .. } => "tracking",
            Self::Terminal { .. } => "terminal",
        }
    }

    /// The transaction this state refers to, if any.
    #[must_use]
    pub const fn tx_id(&self) -> Option<&TxId> {
        match self {
            Self::Tracking { tx_id, .. } | Self::Terminal { tx_id, .. } => Some(tx_id),
            Self::Idle | Self::Submitting => None,
        }
    }

    /// Whether a new submission would be rejected.
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        matches!(self, Self::Submitting | Self::Tracking { .. })
    }
}

/// Classification of a submission failure reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The user cancelled, declined or rejected in the wallet.
    UserCancelled,
    /// Anything else; surfaced verbatim.
    Other(String),
}

impl FailureReason {
    /// Classify a provider reason string.
    #[must_use]
    pub fn classify(reason: &str) -> Self {
        if CANCELLATION.is_match(reason) {
            Self::UserCancelled
        } else {
            Self::Other(reason.to_string())
        }
    }

    /// Whether the failure should be suppressed.
    #[must_use]
    pub const fn is_user_cancelled(&self) -> bool {
        matches!(self, Self::UserCancelled)
    }
}

struct ObserverInner {
    state: LifecycleState,
    /// Bumped on every transition that starts or abandons a tracking session.
    generation: u64,
    /// Last transaction whose terminal outcome was announced.
    notified: Option<TxId>,
    /// Subscription opened for the current tracking session.
    handle: Option<SubscriptionHandle>,
}

struct ObserverShared {
    inner: Mutex<ObserverInner>,
    subscriptions: SubscriptionManager,
    listener: Arc<dyn LifecycleListener>,
}

/// Proof that a caller started the current submission.
///
/// Returned by [`TransactionObserver::begin_submission`]; completing a
/// submission with a ticket fails once the observer has been reset, even if
/// a newer submission has started since.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionTicket {
    generation: u64,
}

/// What a state transition asks the caller to do once the lock is released.
#[derive(Default)]
struct Effects {
    state: Option<LifecycleState>,
    close_subscription: Option<SubscriptionHandle>,
    terminal: Option<(TxId, Outcome)>,
}

/// State machine for the single in-flight transaction.
///
/// Cloning yields another handle to the same observer.
#[derive(Clone)]
pub struct TransactionObserver {
    shared: Arc<ObserverShared>,
}

impl fmt::Debug for TransactionObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionObserver")
            .field("state", &self.state())
            .field("subscriptions", &self.shared.subscriptions)
            .finish_non_exhaustive()
    }
}

impl TransactionObserver {
    /// Create an idle observer reading status from `provider`.
    pub fn new(
        provider: Arc<dyn StatusStreamProvider>,
        listener: Arc<dyn LifecycleListener>,
    ) -> Self {
        Self {
            shared: Arc::new(ObserverShared {
                inner: Mutex::new(ObserverInner {
                    state: LifecycleState::Idle,
                    generation: 0,
                    notified: None,
                    handle: None,
                }),
                subscriptions: SubscriptionManager::new(provider),
                listener,
            }),
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> LifecycleState {
        lock(&self.shared.inner).state.clone()
    }

    /// Whether a status subscription is currently open.
    pub fn has_open_subscription(&self) -> bool {
        self.shared.subscriptions.is_open()
    }

    /// `Idle | Terminal → Submitting`.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::AlreadyInProgress`] while submitting or tracking;
    /// the existing state is left untouched.
    pub fn begin_submission(&self) -> Result<SubmissionTicket, LifecycleError> {
        let (ticket, effects) = {
            let mut inner = lock(&self.shared.inner);
            match &inner.state {
                LifecycleState::Submitting => {
                    return Err(LifecycleError::AlreadyInProgress { in_flight: None });
                }
                LifecycleState::Tracking { tx_id, .. } => {
                    return Err(LifecycleError::AlreadyInProgress {
                        in_flight: Some(tx_id.clone()),
                    });
                }
                LifecycleState::Idle | LifecycleState::Terminal { .. } => {}
            }
            inner.generation += 1;
            inner.notified = None;
            inner.state = LifecycleState::Submitting;
            (
                SubmissionTicket {
                    generation: inner.generation,
                },
                Effects {
                    state: Some(LifecycleState::Submitting),
                    ..Effects::default()
                },
            )
        };
        debug!("transaction submission started");
        self.apply(effects);
        Ok(ticket)
    }

    /// `Submitting → Tracking(id, Unknown)` and open the status subscription.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::Superseded`] if the observer was reset while the
    ///   submission was in progress; nothing is opened.
    /// - [`LifecycleError::NotSubmitting`] from any other non-submitting state.
    /// - [`Error::Provider`] if the status stream refuses the subscription;
    ///   the observer returns to `Idle`.
    pub fn on_submitted(&self, tx_id: TxId) -> crate::Result<()> {
        self.submitted(None, tx_id)
    }

    /// Like [`on_submitted`](Self::on_submitted), but only for the
    /// submission `ticket` started.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::Superseded`] if the observer was reset since the
    /// ticket was issued; otherwise as [`on_submitted`](Self::on_submitted).
    pub fn on_submitted_for(&self, ticket: SubmissionTicket, tx_id: TxId) -> crate::Result<()> {
        self.submitted(Some(ticket), tx_id)
    }

    fn submitted(&self, ticket: Option<SubmissionTicket>, tx_id: TxId) -> crate::Result<()> {
        let generation = {
            let mut inner = lock(&self.shared.inner);
            if ticket.is_some_and(|t| t.generation != inner.generation) {
                debug!(tx_id = %tx_id, "submission superseded by reset");
                return Err(LifecycleError::Superseded { tx_id }.into());
            }
            match &inner.state {
                LifecycleState::Submitting => {}
                LifecycleState::Idle => {
                    debug!(tx_id = %tx_id, "submission superseded by reset");
                    return Err(LifecycleError::Superseded { tx_id }.into());
                }
                other => {
                    return Err(LifecycleError::NotSubmitting { state: other.name() }.into());
                }
            }
            inner.generation += 1;
            inner.state = LifecycleState::Tracking {
                tx_id: tx_id.clone(),
                status: TxStatusCode::Unknown,
            };
            inner.generation
        };
        info!(tx_id = %tx_id, "transaction submitted, tracking status");

        let weak: Weak<ObserverShared> = Arc::downgrade(&self.shared);
        let opened = self.shared.subscriptions.open(tx_id.clone(), move |update| {
            if let Some(shared) = weak.upgrade() {
                Self { shared }.deliver(Some(generation), &update);
            }
        });

        match opened {
            Ok(handle) => {
                // A replayed terminal status or a reset may already have ended
                // this session while the provider was registering.
                let announce = {
                    let mut inner = lock(&self.shared.inner);
                    let still_tracking = inner.generation == generation
                        && matches!(inner.state, LifecycleState::Tracking { .. });
                    if still_tracking {
                        inner.handle = Some(handle.clone());
                        Some(inner.state.clone())
                    } else {
                        None
                    }
                };
                match announce {
                    Some(state) => self.apply(Effects {
                        state: Some(state),
                        ..Effects::default()
                    }),
                    None => {
                        self.shared.subscriptions.close(&handle);
                    }
                }
                Ok(())
            }
            Err(e) => {
                let effects = {
                    let mut inner = lock(&self.shared.inner);
                    if inner.generation == generation {
                        inner.generation += 1;
                        inner.state = LifecycleState::Idle;
                        Effects {
                            state: Some(LifecycleState::Idle),
                            ..Effects::default()
                        }
                    } else {
                        Effects::default()
                    }
                };
                self.apply(effects);
                let err = Error::Provider(e);
                self.emit_error(&err);
                Err(err)
            }
        }
    }

    /// `Submitting → Idle` after the submit action failed.
    ///
    /// Cancellations are returned as [`FailureReason::UserCancelled`] and not
    /// reported; other reasons are emitted as a provider failure.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::NotSubmitting`] outside `Submitting`.
    pub fn on_submit_failed(&self, reason: &str) -> Result<FailureReason, LifecycleError> {
        self.submit_failed(None, reason)
    }

    /// Like [`on_submit_failed`](Self::on_submit_failed), but only for the
    /// submission `ticket` started.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::NotSubmitting`] if the observer was reset since the
    /// ticket was issued.
    pub fn on_submit_failed_for(
        &self,
        ticket: SubmissionTicket,
        reason: &str,
    ) -> Result<FailureReason, LifecycleError> {
        self.submit_failed(Some(ticket), reason)
    }

    fn submit_failed(
        &self,
        ticket: Option<SubmissionTicket>,
        reason: &str,
    ) -> Result<FailureReason, LifecycleError> {
        let effects = {
            let mut inner = lock(&self.shared.inner);
            let stale = ticket.is_some_and(|t| t.generation != inner.generation);
            if stale || !matches!(inner.state, LifecycleState::Submitting) {
                return Err(LifecycleError::NotSubmitting {
                    state: inner.state.name(),
                });
            }
            inner.generation += 1;
            inner.state = LifecycleState::Idle;
            Effects {
                state: Some(LifecycleState::Idle),
                ..Effects::default()
            }
        };
        self.apply(effects);

        let classified = FailureReason::classify(reason);
        match &classified {
            FailureReason::UserCancelled => {
                debug!(reason, "submission cancelled by user");
            }
            FailureReason::Other(message) => {
                warn!(reason, "submission failed");
                self.shared.listener.on_event(&LifecycleEvent::Error {
                    kind: ErrorKind::ProviderFailure,
                    message: message.clone(),
                });
            }
        }
        Ok(classified)
    }

    /// Apply a status code to the tracked transaction.
    ///
    /// Ignored unless tracking. Repeated or lower codes are ignored, except
    /// that `Expired` always terminates.
    pub fn on_status_update(&self, status: TxStatusCode) {
        self.deliver(None, &TxStatusUpdate::new(status));
    }

    /// Apply a full status delivery, including any execution error.
    pub fn on_status(&self, update: &TxStatusUpdate) {
        self.deliver(None, update);
    }

    /// The status stream failed for the tracked transaction.
    ///
    /// Terminates as [`Outcome::Failed`] and closes the subscription.
    pub fn on_stream_error(&self, reason: &str) {
        let effects = {
            let mut inner = lock(&self.shared.inner);
            let LifecycleState::Tracking { tx_id, .. } = &inner.state else {
                trace!(reason, "stream error ignored outside tracking");
                return;
            };
            let tx_id = tx_id.clone();
            warn!(tx_id = %tx_id, reason, "status stream failed");
            Self::terminate(&mut inner, tx_id, Outcome::Failed(reason.to_string()))
        };
        self.apply(effects);
    }

    /// Return to `Idle` from any state and close the open subscription.
    ///
    /// Once this returns, no delivery for the abandoned transaction can
    /// change the observer.
    pub fn reset(&self) {
        let (previous, handle) = {
            let mut inner = lock(&self.shared.inner);
            inner.generation += 1;
            (std::mem::take(&mut inner.state), inner.handle.take())
        };
        // An open still in progress sees the new generation and closes its
        // own handle.
        let closed = handle.is_some_and(|h| self.shared.subscriptions.close(&h));
        if previous != LifecycleState::Idle {
            debug!(from = previous.name(), closed, "lifecycle reset");
            self.shared
                .listener
                .on_event(&LifecycleEvent::StateChanged {
                    state: LifecycleState::Idle,
                });
        }
    }

    /// `Terminal → Idle` once the outcome has been shown.
    ///
    /// Returns `false` if the observer was not terminal.
    pub fn acknowledge(&self) -> bool {
        let effects = {
            let mut inner = lock(&self.shared.inner);
            if !matches!(inner.state, LifecycleState::Terminal { .. }) {
                return false;
            }
            inner.state = LifecycleState::Idle;
            Effects {
                state: Some(LifecycleState::Idle),
                ..Effects::default()
            }
        };
        self.apply(effects);
        true
    }

    fn deliver(&self, generation: Option<u64>, update: &TxStatusUpdate) {
        if let Some(effects) = self.transition(generation, update) {
            self.apply(effects);
        }
    }

    fn transition(&self, generation: Option<u64>, update: &TxStatusUpdate) -> Option<Effects> {
        let mut inner = lock(&self.shared.inner);
        if generation.is_some_and(|g| g != inner.generation) {
            trace!(status = %update.status, "stale delivery ignored");
            return None;
        }
        let LifecycleState::Tracking { tx_id, status } = &mut inner.state else {
            trace!(status = %update.status, "delivery ignored outside tracking");
            return None;
        };
        let next = update.status;
        let current = *status;

        if next == TxStatusCode::Expired {
            let tx_id = tx_id.clone();
            Some(Self::terminate(&mut inner, tx_id, Outcome::Expired))
        } else if next <= current {
            trace!(tx_id = %tx_id, status = %next, current = %current, "status not newer");
            None
        } else if next == TxStatusCode::Sealed {
            let outcome = update
                .error()
                .map_or(Outcome::Sealed, |e| Outcome::Failed(e.to_string()));
            let tx_id = tx_id.clone();
            Some(Self::terminate(&mut inner, tx_id, outcome))
        } else {
            *status = next;
            debug!(tx_id = %tx_id, status = %next, "transaction status advanced");
            Some(Effects {
                state: Some(inner.state.clone()),
                ..Effects::default()
            })
        }
    }

    fn terminate(inner: &mut ObserverInner, tx_id: TxId, outcome: Outcome) -> Effects {
        info!(tx_id = %tx_id, outcome = %outcome, "transaction reached terminal status");
        let first = inner.notified.as_ref() != Some(&tx_id);
        inner.notified = Some(tx_id.clone());
        inner.state = LifecycleState::Terminal {
            tx_id: tx_id.clone(),
            outcome: outcome.clone(),
        };
        Effects {
            state: Some(inner.state.clone()),
            close_subscription: inner.handle.take(),
            terminal: first.then_some((tx_id, outcome)),
        }
    }

    /// Run side effects outside the state lock; subscription teardown and
    /// listeners may call back into the observer.
    fn apply(&self, effects: Effects) {
        if let Some(handle) = effects.close_subscription {
            self.shared.subscriptions.close(&handle);
        }
        if let Some(state) = effects.state {
            self.shared
                .listener
                .on_event(&LifecycleEvent::StateChanged { state });
        }
        if let Some((tx_id, outcome)) = effects.terminal {
            self.shared
                .listener
                .on_event(&LifecycleEvent::Terminal { tx_id, outcome });
        }
    }

    fn emit_error(&self, err: &Error) {
        if let Some(message) = err.user_message() {
            self.shared.listener.on_event(&LifecycleEvent::Error {
                kind: err.kind(),
                message,
            });
        }
    }
}
