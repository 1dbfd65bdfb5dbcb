//! # Waypost Core Library
//!
//! `waypost-core` provides the client-side machinery for Waypost, a
//! continuous location sharing tool for self-hosted servers.
//!
//! ## Features
//!
//! - **Time-boxed sessions**: every share belongs to a server-authorized
//!   session with a fixed expiry
//! - **Background pushing**: a scheduler task reports the device position
//!   at a configured interval until the session expires or is stopped
//! - **Share reconciliation**: the locally known set of view links is kept
//!   in sync with the server's authoritative share list
//! - **Crash resumption**: session state is snapshotted so an interrupted
//!   session can be resumed after an unclean shutdown
//! - **Optional end-to-end encryption**: key material is derived client-side
//!   when the backend is new enough to support it
//!
//! ## Modules
//!
//! - [`backend`] - Backend protocol client (session creation, share stop,
//!   location posts)
//! - [`config`] - Configuration management
//! - [`crypto`] - Salt generation and key derivation for E2E sessions
//! - [`error`] - Unified error type
//! - [`location`] - Position data and platform location preconditions
//! - [`manager`] - Session/share lifecycle coordination
//! - [`pusher`] - Recurring background location push task
//! - [`session`] - Session and share data model
//! - [`store`] - Durable resumption snapshots
//!
//! ## Example
//!
//! ```rust,ignore
//! use waypost_core::manager::SessionManager;
//! use waypost_core::session::StartReason;
//!
//! let (mut manager, mut events) = SessionManager::new(backend, env, store, positions);
//! let outcome = manager.start_session(params, StartReason::UserStarted).await?;
//! println!("Sharing at {}", outcome.share.view_url);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod backend;
pub mod config;
pub mod crypto;
pub mod error;
pub mod location;
pub mod manager;
pub mod pusher;
pub mod session;
pub mod store;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Response header carrying the backend protocol version
pub const VERSION_HEADER: &str = "X-Waypost-Version";

/// Minimum backend version that reports a separate view ID for new shares
pub const VERSION_COMPAT_VIEW_ID: &str = "1.1";

/// Minimum backend version that supports end-to-end encrypted sessions
pub const VERSION_COMPAT_E2E: &str = "1.2";

/// Key size for end-to-end encryption, in bits
pub const E2E_KEY_BITS: usize = 256;

/// PBKDF2 iteration count for E2E key derivation
pub const PBKDF2_ITERATIONS: u32 = 65_536;

/// Default backend request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default session duration in seconds
pub const DEFAULT_DURATION_SECS: u64 = 1800;

/// Default location push interval in seconds
pub const DEFAULT_INTERVAL_SECS: u64 = 1;
