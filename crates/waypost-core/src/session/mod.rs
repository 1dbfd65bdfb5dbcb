//! Session and share data model.
//!
//! A [`Session`] is one server-authorized sharing period; a [`Share`] is one
//! public view link bound to a session. Both are immutable values: updating
//! either means constructing a new one. Sessions and shares are serializable
//! so the resumption store can snapshot them verbatim.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{BackendVersion, ConnectionParams};
use crate::crypto::KeyMaterial;
use crate::error::{Error, Result};

/// How a share is created on the server.
///
/// A closed set; solo sharing is the only remaining variant, but the index
/// mapping is kept because the wire protocol still carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareMode {
    /// One participant per session
    Solo,
}

impl ShareMode {
    /// Wire index of this mode.
    #[must_use]
    pub fn index(self) -> u8 {
        match self {
            Self::Solo => 0,
        }
    }

    /// Resolve a mode from its wire index.
    pub fn from_index(index: u8) -> Result<Self> {
        match index {
            0 => Ok(Self::Solo),
            other => Err(Error::Protocol(format!("unknown share mode {other}"))),
        }
    }

    /// Minimum backend version required to request this mode, if any.
    #[must_use]
    pub fn min_backend_version(self) -> Option<BackendVersion> {
        match self {
            Self::Solo => None,
        }
    }
}

impl fmt::Display for ShareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Solo => f.write_str("solo"),
        }
    }
}

/// Why a session or share transition happened.
///
/// Delivered to listeners so they can distinguish a fresh start from a
/// resumption or a server-initiated addition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartReason {
    /// The user explicitly started sharing
    UserStarted,
    /// The user confirmed resumption of an interrupted session
    UserResumed,
    /// The server reported a share this client did not know about
    ShareAdded,
}

/// One authenticated, time-boxed sharing period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Base URL of the backend server
    pub server_url: String,
    /// Transport parameters applied to every request of this session
    pub connection: ConnectionParams,
    /// Negotiated backend protocol version
    pub backend_version: BackendVersion,
    /// Opaque session token issued by the server
    pub session_id: String,
    /// Absolute expiry time, fixed at creation
    pub expiry: DateTime<Utc>,
    /// Location push interval
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Minimum movement in meters before a new position is pushed
    pub min_distance: f64,
    /// End-to-end key material, when encryption was negotiated
    pub key_material: Option<KeyMaterial>,
}

impl Session {
    /// Whether this session carries end-to-end key material.
    #[must_use]
    pub fn is_end_to_end_encrypted(&self) -> bool {
        self.key_material.is_some()
    }

    /// Time left until expiry, zero once expired.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        (self.expiry - Utc::now()).to_std().unwrap_or_default()
    }

    /// Whether the expiry time has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Expiry time formatted for display.
    #[must_use]
    pub fn expiry_string(&self) -> String {
        self.expiry.format("%Y-%m-%d %H:%M").to_string()
    }
}

/// One public view link bound to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Share {
    /// The session this share belongs to
    pub session: Session,
    /// Publicly viewable URL
    pub view_url: String,
    /// Server-side share identifier
    pub view_id: String,
    /// Join code for multi-participant modes; reserved, currently absent
    pub join_code: Option<String>,
    /// How this share was created
    pub mode: ShareMode,
}

impl Share {
    /// Create a solo share for `session`.
    #[must_use]
    pub fn new(
        session: Session,
        view_url: impl Into<String>,
        view_id: impl Into<String>,
        mode: ShareMode,
    ) -> Self {
        Self {
            session,
            view_url: view_url.into(),
            view_id: view_id.into(),
            join_code: None,
            mode,
        }
    }

    /// The identifier this share is registered under.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.view_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(duration: Duration) -> Session {
        Session {
            server_url: "https://waypost.example.com".to_string(),
            connection: ConnectionParams::default(),
            backend_version: BackendVersion::new("1.2"),
            session_id: "abc".to_string(),
            expiry: Utc::now() + chrono::Duration::from_std(duration).unwrap(),
            interval: Duration::from_secs(30),
            min_distance: 0.0,
            key_material: None,
        }
    }

    #[test]
    fn test_share_mode_index_round_trip() {
        assert_eq!(ShareMode::from_index(ShareMode::Solo.index()).unwrap(), ShareMode::Solo);
        assert!(ShareMode::from_index(3).is_err());
    }

    #[test]
    fn test_remaining_tracks_expiry() {
        let session = session(Duration::from_secs(3600));
        let remaining = session.remaining();
        assert!(remaining <= Duration::from_secs(3600));
        assert!(remaining > Duration::from_secs(3590));
        assert!(!session.is_expired());
    }

    #[test]
    fn test_expired_session_has_zero_remaining() {
        let session = session(Duration::ZERO);
        assert!(session.is_expired());
        assert_eq!(session.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_session_round_trips_through_json() {
        let mut original = session(Duration::from_secs(600));
        original.key_material = Some(KeyMaterial::new("hunter2", crate::crypto::generate_salt()));
        let json = serde_json::to_string(&original).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(original, back);
    }

    #[test]
    fn test_share_has_no_join_code() {
        let share = Share::new(session(Duration::from_secs(60)), "https://x/view/a", "a", ShareMode::Solo);
        assert!(share.join_code.is_none());
        assert_eq!(share.id(), "a");
    }
}
