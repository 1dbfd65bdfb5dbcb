//! Backend protocol client.
//!
//! The backend speaks a deliberately small protocol: three POST endpoints
//! (create a session, report a position, stop a share) with line-oriented
//! responses and a version header used for capability negotiation. This
//! module defines the logical request/response types, the [`Backend`] trait
//! the rest of the crate programs against, and the version ordering rules.
//!
//! The [`HttpBackend`] implementation lives in [`http`].

pub mod http;

use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::location::Position;
use crate::session::Session;
use crate::{DEFAULT_REQUEST_TIMEOUT_SECS, VERSION_COMPAT_E2E, VERSION_COMPAT_VIEW_ID};

pub use http::HttpBackend;

/// A backend protocol version, as reported in the server's version header.
///
/// Versions are dotted number sequences compared segment-wise, so
/// `1.10` is newer than `1.2` and `1.0` equals `1.0.0`. Unparseable
/// segments compare as zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendVersion(String);

impl BackendVersion {
    /// Wrap a raw version string.
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// The raw version string as reported by the server.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segments(&self) -> Vec<u64> {
        self.0
            .split('.')
            .map(|s| s.trim().parse().unwrap_or(0))
            .collect()
    }

    /// Whether this version is the same as or newer than `other`.
    #[must_use]
    pub fn is_at_least(&self, other: &Self) -> bool {
        self >= other
    }

    /// Whether the backend reports a separate view ID for new shares.
    #[must_use]
    pub fn supports_view_id(&self) -> bool {
        self.is_at_least(&Self::new(VERSION_COMPAT_VIEW_ID))
    }

    /// Whether the backend supports end-to-end encrypted sessions.
    #[must_use]
    pub fn supports_e2e(&self) -> bool {
        self.is_at_least(&Self::new(VERSION_COMPAT_E2E))
    }
}

impl PartialEq for BackendVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for BackendVersion {}

impl PartialOrd for BackendVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BackendVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.segments();
        let b = other.segments();
        for i in 0..a.len().max(b.len()) {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            match x.cmp(&y) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for BackendVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport parameters applied to every request of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Optional HTTP(S) proxy URL
    pub proxy: Option<String>,
    /// Skip TLS certificate validation, e.g. for hidden-service hosts
    pub accept_invalid_certs: bool,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            proxy: None,
            accept_invalid_certs: false,
        }
    }
}

/// Everything needed to initiate a new sharing session.
#[derive(Debug, Clone)]
pub struct InitParams {
    /// Base URL of the backend server
    pub server_url: String,
    /// Account name, for servers that require one
    pub username: Option<String>,
    /// Server password
    pub password: String,
    /// Requested session duration
    pub duration: Duration,
    /// Requested location push interval
    pub interval: Duration,
    /// Minimum movement in meters before a new position is pushed
    pub min_distance: f64,
    /// Preferred link ID; the server may honor or ignore it
    pub custom_id: Option<String>,
    /// Passphrase enabling end-to-end encryption when set
    pub e2e_passphrase: Option<String>,
    /// Transport parameters for this session
    pub connection: ConnectionParams,
}

impl InitParams {
    /// Create parameters for a session against `server_url`.
    #[must_use]
    pub fn new(server_url: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            username: None,
            password: password.into(),
            duration: Duration::from_secs(crate::DEFAULT_DURATION_SECS),
            interval: Duration::from_secs(crate::DEFAULT_INTERVAL_SECS),
            min_distance: 0.0,
            custom_id: None,
            e2e_passphrase: None,
            connection: ConnectionParams::default(),
        }
    }

    /// Set the session duration.
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set the push interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the end-to-end encryption passphrase.
    #[must_use]
    pub fn with_e2e_passphrase(mut self, passphrase: Option<String>) -> Self {
        self.e2e_passphrase = passphrase.filter(|p| !p.is_empty());
        self
    }
}

/// Successful response to a session initiation request.
#[derive(Debug, Clone)]
pub struct SessionCreated {
    /// Opaque session token issued by the server
    pub session_id: String,
    /// Publicly viewable link for the initial share
    pub view_url: String,
    /// Server-side identifier of the initial share
    pub view_id: String,
    /// Protocol version the server reported
    pub backend_version: BackendVersion,
}

/// Share-list snapshot returned by a location post.
///
/// `link_format` contains a `%s` placeholder that expands to a share ID.
/// Old backends report neither field; the update is then empty and carries
/// no authority over the local share set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareListUpdate {
    /// URL format string for building view links from share IDs
    pub link_format: Option<String>,
    /// Authoritative list of currently live share IDs
    pub share_ids: Vec<String>,
}

/// Client side of the backend protocol.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Initiate a new sharing session.
    ///
    /// `salt` is the freshly generated E2E salt to announce to the server,
    /// or `None` when end-to-end encryption is not requested.
    async fn create_session(
        &self,
        params: &InitParams,
        salt: Option<&[u8]>,
    ) -> Result<SessionCreated>;

    /// Ask the server to stop a single share.
    async fn stop_share(&self, session: &Session, share_id: &str) -> Result<()>;

    /// Report the device position for the session.
    async fn post_location(
        &self,
        session: &Session,
        position: &Position,
    ) -> Result<ShareListUpdate>;
}
