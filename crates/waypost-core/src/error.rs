//! Error types for Waypost.
//!
//! This module provides a unified error type for all Waypost operations,
//! with specific error variants for different failure modes.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for Waypost operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Waypost.
#[derive(Error, Debug)]
pub enum Error {
    /// Location permission has not been granted by the platform
    #[error("location permission has not been granted")]
    PermissionDenied,

    /// Device location services are switched off
    #[error("location services are disabled")]
    LocationServicesDisabled,

    /// A session is already running; it must be stopped first
    #[error("a sharing session is already active")]
    ConcurrentSessionActive,

    /// No session is currently active
    #[error("no sharing session is active")]
    NoActiveSession,

    /// The share ID is not in the set of known shares
    #[error("share '{0}' is not known to this session")]
    UnknownShare(String),

    /// The server response was empty or could not be parsed
    #[error("malformed server response: {0}")]
    Protocol(String),

    /// The server understood the request but reported an error
    #[error("server rejected the request: {0}")]
    ServerRejected(String),

    /// The backend is too old for a requested capability
    #[error("backend {actual} is too old: {feature} requires {required}")]
    VersionIncompatible {
        /// Capability that was requested
        feature: String,
        /// Minimum backend version for the capability
        required: String,
        /// Version the server actually reported
        actual: String,
    },

    /// Transport-level failure talking to the server
    #[error("network request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// The configured server URL could not be parsed
    #[error("invalid server URL: {0}")]
    InvalidUrl(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    Config(String),

    /// Resumption snapshot could not be read or written
    #[error("resumption store error: {0}")]
    Store(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns whether this error is a precondition failure that left no
    /// state behind and can be retried after the caller fixes the cause.
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied | Self::LocationServicesDisabled | Self::ConcurrentSessionActive
        )
    }

    /// Returns whether this error is recoverable (can be retried).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Protocol(_) | Self::ServerRejected(_)
        ) || self.is_precondition()
    }
}
