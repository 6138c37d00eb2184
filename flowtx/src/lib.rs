//! flowtx - Transaction lifecycle core for Flow wallet apps.
//!
//! This crate follows one user-submitted transaction from the wallet prompt
//! to its sealed (or expired) status, gates every action on the wallet
//! session, and reports everything the presentation layer needs as events.
//! The wallet, the access node and the status stream are external
//! collaborators behind traits.
//!
//! # Architecture
//!
//! - **Subscriptions** ([`subscription`]) - Exclusive owner of the one open
//!   status-stream registration
//! - **Lifecycle** ([`lifecycle`]) - State machine for the in-flight transaction
//! - **Auth** ([`auth`]) - Wallet session preconditions and logout reset
//! - **Session** ([`session`]) - The owned service object the app talks to
//! - **Events** ([`events`]) - Listener trait and broadcast bus
//! - **Actions** ([`actions`]) - Submit/query seams and request builders
//! - **Memory** ([`memory`]) - In-process providers for tests and demos
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use flowtx::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let bus = EventBus::new();
//!     let session = Session::builder()
//!         .auth(Arc::new(MemoryAuthProvider::new()))
//!         .status_stream(Arc::new(MemoryStatusStream::new()))
//!         .listener(Arc::new(bus.clone()))
//!         .build()?;
//!     session.start();
//!     session.connect().await?;
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod auth;
pub mod cadence;
pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod memory;
pub mod network;
pub mod session;
pub mod status;
pub mod subscription;

mod util;

pub use error::{Error, Result};

/// Prelude module for convenient imports.
pub mod prelude {
    // Error types
    pub use crate::error::{
        ConfigError, ConfigResult, DisplayError, Error, ErrorKind, GateError, LifecycleError,
        ProviderError, Result,
    };

    // Lifecycle
    pub use crate::lifecycle::{
        FailureReason, LifecycleState, Outcome, SubmissionTicket, TransactionObserver,
    };
    pub use crate::status::{TxId, TxStatusCode, TxStatusUpdate};
    pub use crate::subscription::{
        Registration, StatusCallback, StatusStreamProvider, SubscriptionHandle,
        SubscriptionManager,
    };

    // Auth and session
    pub use crate::auth::{AuthGate, AuthProvider, AuthState, WalletService};
    pub use crate::session::{Session, SessionBuilder};

    // Events
    pub use crate::events::{EventBus, LifecycleEvent, LifecycleListener, NoopListener};

    // Actions and Cadence
    pub use crate::actions::{
        Argument, ArgumentType, QueryAction, ScriptRequest, SubmitAction, TransactionRequest,
    };
    pub use crate::cadence::{InputError, UFix64};
    pub use crate::network::Network;

    // Config
    pub use crate::config::{
        AppConfig, AppDetails, ConfigIssue, IssueLevel, config_path, init_config, load_config,
        load_config_from, save_config, save_config_to,
    };

    // In-memory providers
    pub use crate::memory::{
        MemoryAuthProvider, MemoryStatusStream, MemorySubmitter, RecordingListener,
    };
}
