//! Session/share lifecycle coordination.
//!
//! [`SessionManager`] owns the single active session, the registry of known
//! shares, the background push task handle, and the listener registries. It
//! is designed for exclusive ownership by one task: every state mutation
//! goes through `&mut self`, network completions are awaited inline, and
//! status events from the push task arrive on one mpsc channel the owner
//! pumps into [`SessionManager::handle_status_event`]. That makes "at most
//! one in-flight mutation at a time" a compile-time property rather than a
//! locking discipline.
//!
//! ## Share reconciliation
//!
//! The server is authoritative for share liveness. Every share-list event
//! from the push task is reconciled against the local registry in a single
//! pass: server-reported IDs the client does not know are synthesized and
//! attached, locally known IDs the server no longer reports are removed.
//! Feeding the same list twice is a no-op, so a stale stop racing a sync is
//! harmless; the next list settles the registry again.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};

use crate::backend::{Backend, BackendVersion, InitParams};
use crate::crypto::{self, KeyMaterial};
use crate::error::{Error, Result};
use crate::location::{LocationEnvironment, Position};
use crate::pusher::{self, PusherHandle, StatusEvent};
use crate::session::{Session, Share, ShareMode, StartReason};
use crate::store::ResumptionStore;

/// Capacity of the status event channel between pusher and coordinator.
const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Listener for session lifecycle events.
pub trait SessionListener: Send {
    /// A session was activated, anchored by `share`.
    fn on_session_created(&mut self, session: &Session, share: &Share, reason: StartReason) {
        let _ = (session, share, reason);
    }

    /// Session activation was aborted because the location permission is
    /// missing.
    fn on_session_creation_failed_due_to_permissions(&mut self) {}
}

/// Listener for share membership events.
pub trait ShareListener: Send {
    /// A share was registered, locally or by the server.
    fn on_share_joined(&mut self, share: &Share) {
        let _ = share;
    }

    /// A share was confirmed gone, by an explicit stop or a server sync.
    fn on_share_parted(&mut self, share: &Share) {
        let _ = share;
    }
}

/// Listener for position fix and connectivity status events.
///
/// Mirrors the push task's event stream one-to-one.
pub trait StatusListener: Send {
    /// The satellite fix was lost.
    fn on_connection_lost(&mut self) {}
    /// The satellite fix was regained.
    fn on_connection_restored(&mut self) {}
    /// A coarse position fix was obtained.
    fn on_fix_coarse(&mut self) {}
    /// An accurate position fix was obtained.
    fn on_fix_accurate(&mut self) {}
    /// The server became unreachable.
    fn on_server_connection_lost(&mut self) {}
    /// The server became reachable again.
    fn on_server_connection_restored(&mut self) {}
    /// The server reported its current share list.
    fn on_share_list_received(&mut self, link_format: &str, share_ids: &[String]) {
        let _ = (link_format, share_ids);
    }
}

/// Token identifying an attached listener, for later detachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(usize);

/// Ordered listener registry with stable registration-order delivery.
struct ListenerSet<L: ?Sized> {
    entries: Vec<(ListenerId, Box<L>)>,
    next_id: usize,
}

impl<L: ?Sized> ListenerSet<L> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    fn attach(&mut self, listener: Box<L>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    fn detach(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }
}

/// What a successful [`SessionManager::start_session`] produced.
#[derive(Debug, Clone)]
pub struct StartOutcome {
    /// The initial share of the new session
    pub share: Share,
    /// Set when end-to-end encryption was requested but the backend is too
    /// old, so the session was created without it
    pub e2e_dropped: Option<BackendVersion>,
}

/// Result of [`SessionManager::relaunch_pusher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relaunch {
    /// The push task was restarted from the live session state
    Restarted,
    /// No live pusher existed; the caller should run the resume-prompt flow
    NeedsPrompt,
}

/// Coordinates the lifecycle of the active session and its shares.
pub struct SessionManager {
    backend: Arc<dyn Backend>,
    environment: Arc<dyn LocationEnvironment>,
    store: Box<dyn ResumptionStore>,
    positions: watch::Receiver<Option<Position>>,
    events_tx: mpsc::Sender<StatusEvent>,
    active_session: Option<Session>,
    known_shares: HashMap<String, Share>,
    pusher: Option<PusherHandle>,
    session_listeners: ListenerSet<dyn SessionListener>,
    share_listeners: ListenerSet<dyn ShareListener>,
    status_listeners: ListenerSet<dyn StatusListener>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("active_session", &self.active_session)
            .field("known_shares", &self.known_shares.keys())
            .field("pusher_running", &self.pusher.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a coordinator and the status event stream its owner pumps.
    ///
    /// `positions` carries the latest device position from the platform's
    /// location producer; the returned receiver yields events from the push
    /// task that must be fed back through
    /// [`SessionManager::handle_status_event`].
    #[must_use]
    pub fn new(
        backend: Arc<dyn Backend>,
        environment: Arc<dyn LocationEnvironment>,
        store: Box<dyn ResumptionStore>,
        positions: watch::Receiver<Option<Position>>,
    ) -> (Self, mpsc::Receiver<StatusEvent>) {
        let (events_tx, events_rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);
        let manager = Self {
            backend,
            environment,
            store,
            positions,
            events_tx,
            active_session: None,
            known_shares: HashMap::new(),
            pusher: None,
            session_listeners: ListenerSet::new(),
            share_listeners: ListenerSet::new(),
            status_listeners: ListenerSet::new(),
        };
        (manager, events_rx)
    }

    /// Whether a session is currently active.
    #[must_use]
    pub fn is_session_active(&self) -> bool {
        self.active_session.is_some()
    }

    /// The currently active session, if any.
    #[must_use]
    pub fn active_session(&self) -> Option<&Session> {
        self.active_session.as_ref()
    }

    /// The currently known shares, in no particular order.
    #[must_use]
    pub fn shares(&self) -> Vec<&Share> {
        self.known_shares.values().collect()
    }

    /// Look up a known share by its ID.
    #[must_use]
    pub fn share(&self, share_id: &str) -> Option<&Share> {
        self.known_shares.get(share_id)
    }

    /// Add a listener for session lifecycle events.
    pub fn attach_session_listener(&mut self, listener: Box<dyn SessionListener>) -> ListenerId {
        self.session_listeners.attach(listener)
    }

    /// Remove a previously attached session listener.
    pub fn detach_session_listener(&mut self, id: ListenerId) -> bool {
        self.session_listeners.detach(id)
    }

    /// Add a listener for share membership events.
    pub fn attach_share_listener(&mut self, listener: Box<dyn ShareListener>) -> ListenerId {
        self.share_listeners.attach(listener)
    }

    /// Remove a previously attached share listener.
    pub fn detach_share_listener(&mut self, id: ListenerId) -> bool {
        self.share_listeners.detach(id)
    }

    /// Add a listener for status events.
    pub fn attach_status_listener(&mut self, listener: Box<dyn StatusListener>) -> ListenerId {
        self.status_listeners.attach(listener)
    }

    /// Remove a previously attached status listener.
    pub fn detach_status_listener(&mut self, id: ListenerId) -> bool {
        self.status_listeners.detach(id)
    }

    /// Start a new sharing session.
    ///
    /// Preconditions are checked synchronously before anything else
    /// happens: a running session, a missing location permission, or
    /// disabled location services reject the call without creating any
    /// state, so the caller can run its permission flow and retry.
    ///
    /// On success exactly one session and one share exist, the push task is
    /// running, and the snapshot is persisted. If end-to-end encryption was
    /// requested but the backend is too old, the session is still created
    /// and the degradation is reported in the returned [`StartOutcome`].
    ///
    /// # Errors
    ///
    /// Returns a precondition error as described above, or a network,
    /// protocol, or server error from session initiation; in every error
    /// case the coordinator state is unchanged.
    pub async fn start_session(
        &mut self,
        params: InitParams,
        reason: StartReason,
    ) -> Result<StartOutcome> {
        if self.active_session.is_some() {
            return Err(Error::ConcurrentSessionActive);
        }
        if !self.environment.permission_granted() {
            return Err(Error::PermissionDenied);
        }
        if !self.environment.services_enabled() {
            return Err(Error::LocationServicesDisabled);
        }

        tracing::info!(server = %params.server_url, "initiating sharing session");

        let salt = params.e2e_passphrase.as_ref().map(|_| crypto::generate_salt());
        let created = self
            .backend
            .create_session(&params, salt.as_deref())
            .await?;

        let mut e2e_dropped = None;
        let key_material = match (&params.e2e_passphrase, salt) {
            (Some(passphrase), Some(salt)) if created.backend_version.supports_e2e() => {
                Some(KeyMaterial::new(passphrase.clone(), salt))
            }
            (Some(_), _) => {
                tracing::warn!(
                    backend = %created.backend_version,
                    "backend too old for end-to-end encryption, continuing without it"
                );
                e2e_dropped = Some(created.backend_version.clone());
                None
            }
            _ => None,
        };

        let session = Session {
            server_url: params.server_url.clone(),
            connection: params.connection.clone(),
            backend_version: created.backend_version,
            session_id: created.session_id,
            expiry: Utc::now()
                + chrono::TimeDelta::from_std(params.duration)
                    .unwrap_or(chrono::TimeDelta::MAX),
            interval: params.interval,
            min_distance: params.min_distance,
            key_material,
        };
        let share = Share::new(session, created.view_url, created.view_id, ShareMode::Solo);

        self.attach_share(share.clone(), reason);

        Ok(StartOutcome { share, e2e_dropped })
    }

    /// Register a share with the active session.
    ///
    /// The first share anchors the session: if none is active yet, this
    /// call activates the share's session and spawns the push task as a
    /// side effect. Re-attaching an already known share ID overwrites it
    /// and is safe.
    pub fn attach_share(&mut self, share: Share, reason: StartReason) {
        if self.active_session.is_none() {
            self.activate_session(share.session.clone(), &share, reason);
        }

        tracing::info!(share = share.id(), "attaching share");
        self.known_shares.insert(share.id().to_string(), share.clone());
        self.persist();

        for (_, listener) in &mut self.share_listeners.entries {
            listener.on_share_joined(&share);
        }
    }

    /// Ask the server to stop a single share.
    ///
    /// Only a confirmed stop removes the share locally; on any failure the
    /// registry keeps the share, so it is never orphaned while the server
    /// may still consider it live.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownShare`] for an unregistered ID, or the
    /// backend error when the stop request fails.
    pub async fn stop_share(&mut self, share_id: &str) -> Result<()> {
        let share = self
            .known_shares
            .get(share_id)
            .cloned()
            .ok_or_else(|| Error::UnknownShare(share_id.to_string()))?;

        match self.backend.stop_share(&share.session, share_id).await {
            Ok(()) => {
                tracing::info!(share = share_id, "share stopped");
                self.known_shares.remove(share_id);
                if let Err(e) = self.store.clear_share(share_id) {
                    tracing::warn!(error = %e, "failed to clear share from snapshot");
                }
                for (_, listener) in &mut self.share_listeners.entries {
                    listener.on_share_parted(&share);
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!(share = share_id, error = %e, "share could not be stopped");
                Err(e)
            }
        }
    }

    /// Unconditionally tear down all sharing state.
    ///
    /// Cancels the push task, clears the session, the share registry, and
    /// the resumption snapshot, all without server round-trips. Safe to
    /// call at any time, including twice in a row.
    pub fn stop_all_sharing(&mut self) {
        if self.active_session.is_some() || self.pusher.is_some() {
            tracing::info!("force-stopping all shares");
        }
        if let Some(pusher) = self.pusher.take() {
            pusher.abort();
        }
        self.active_session = None;
        self.known_shares.clear();
        if let Err(e) = self.store.clear() {
            tracing::warn!(error = %e, "failed to clear resumption snapshot");
        }
    }

    /// Re-activate a previously persisted session and its shares.
    ///
    /// Call only after the external resume-prompt flow confirmed the
    /// resumption; listeners see `UserResumed` as the reason.
    pub fn resume_session(&mut self, session: Session, shares: Vec<Share>) {
        tracing::info!(
            session = %session.session_id,
            shares = shares.len(),
            "resuming session"
        );

        let Some(anchor) = shares.first().cloned() else {
            tracing::warn!("resumption snapshot has no shares, nothing to resume");
            return;
        };
        if self.active_session.is_none() {
            self.activate_session(session, &anchor, StartReason::UserResumed);
        }
        for share in shares {
            self.attach_share(share, StartReason::UserResumed);
        }
    }

    /// React to the platform reporting that the push process died.
    ///
    /// With a live session and a stale handle the push task is restarted
    /// immediately; otherwise the caller is told to run the resume-prompt
    /// flow ([`SessionManager::load_resumable`] followed by
    /// [`SessionManager::resume_session`] on confirmation).
    pub fn relaunch_pusher(&mut self) -> Relaunch {
        let stale = self.pusher.take();

        let Some(session) = self.active_session.clone() else {
            if let Some(stale) = stale {
                stale.abort();
            }
            tracing::debug!("no active session, deferring to resume prompt flow");
            return Relaunch::NeedsPrompt;
        };

        match stale {
            Some(stale) => {
                tracing::warn!(
                    session = %session.session_id,
                    "push task died unexpectedly, relaunching"
                );
                stale.abort();
                self.spawn_pusher(session);
                Relaunch::Restarted
            }
            None => {
                tracing::debug!("no pusher handle, deferring to resume prompt flow");
                Relaunch::NeedsPrompt
            }
        }
    }

    /// Load the persisted snapshot for the resume-prompt flow.
    ///
    /// # Errors
    ///
    /// Returns the store error when the snapshot exists but cannot be read.
    pub fn load_resumable(&self) -> Result<Option<(Session, Vec<Share>)>> {
        self.store.load()
    }

    /// Apply one status event from the push task.
    ///
    /// Events are re-broadcast to status listeners in registration order;
    /// share-list events additionally reconcile the local registry, and the
    /// expiry event tears the session down.
    pub fn handle_status_event(&mut self, event: StatusEvent) {
        match event {
            StatusEvent::ConnectionLost => {
                self.each_status_listener(|l| l.on_connection_lost());
            }
            StatusEvent::ConnectionRestored => {
                self.each_status_listener(|l| l.on_connection_restored());
            }
            StatusEvent::FixCoarse => {
                self.each_status_listener(|l| l.on_fix_coarse());
            }
            StatusEvent::FixAccurate => {
                self.each_status_listener(|l| l.on_fix_accurate());
            }
            StatusEvent::ServerConnectionLost => {
                self.each_status_listener(|l| l.on_server_connection_lost());
            }
            StatusEvent::ServerConnectionRestored => {
                self.each_status_listener(|l| l.on_server_connection_restored());
            }
            StatusEvent::ShareListReceived {
                link_format,
                share_ids,
            } => {
                self.each_status_listener(|l| l.on_share_list_received(&link_format, &share_ids));
                self.reconcile_shares(&link_format, &share_ids);
            }
            StatusEvent::Expired => {
                tracing::info!("session reached its expiry");
                self.stop_all_sharing();
            }
        }
    }

    /// Activate `session`, spawning the push task.
    ///
    /// `anchor` is the share that carried the activation and is what
    /// session listeners receive alongside the session.
    fn activate_session(&mut self, session: Session, anchor: &Share, reason: StartReason) {
        self.active_session = Some(session.clone());

        // The permission can be revoked between the start call and an
        // attach-driven activation, e.g. on resume.
        if !self.environment.permission_granted() {
            tracing::warn!("location permission missing, push task not started");
            for (_, listener) in &mut self.session_listeners.entries {
                listener.on_session_creation_failed_due_to_permissions();
            }
            return;
        }

        tracing::info!(
            session = %session.session_id,
            expires = %session.expiry_string(),
            "session activated"
        );
        self.spawn_pusher(session.clone());

        for (_, listener) in &mut self.session_listeners.entries {
            listener.on_session_created(&session, anchor, reason);
        }
    }

    fn spawn_pusher(&mut self, session: Session) {
        if let Some(old) = self.pusher.take() {
            old.abort();
        }
        self.pusher = Some(pusher::spawn(
            session,
            Arc::clone(&self.backend),
            self.positions.clone(),
            self.events_tx.clone(),
        ));
    }

    /// Reconcile the local registry against the server's share list.
    fn reconcile_shares(&mut self, link_format: &str, server_ids: &[String]) {
        let Some(session) = self.active_session.clone() else {
            return;
        };

        for id in server_ids {
            if !self.known_shares.contains_key(id) {
                tracing::info!(share = %id, "server reported unknown share, registering");
                let share = Share::new(
                    session.clone(),
                    link_format.replace("%s", id),
                    id.clone(),
                    ShareMode::Solo,
                );
                self.attach_share(share, StartReason::ShareAdded);
            }
        }

        let dropped: Vec<String> = self
            .known_shares
            .keys()
            .filter(|id| !server_ids.iter().any(|sid| sid == *id))
            .cloned()
            .collect();
        for id in dropped {
            let Some(share) = self.known_shares.remove(&id) else {
                continue;
            };
            tracing::info!(share = %id, "share terminated on server, removing");
            if let Err(e) = self.store.clear_share(&id) {
                tracing::warn!(error = %e, "failed to clear share from snapshot");
            }
            for (_, listener) in &mut self.share_listeners.entries {
                listener.on_share_parted(&share);
            }
        }
    }

    fn each_status_listener(&mut self, mut f: impl FnMut(&mut dyn StatusListener)) {
        for (_, listener) in &mut self.status_listeners.entries {
            f(listener.as_mut());
        }
    }

    /// Persist the current session and share set, best effort.
    fn persist(&self) {
        let Some(session) = &self.active_session else {
            return;
        };
        let shares: Vec<Share> = self.known_shares.values().cloned().collect();
        if let Err(e) = self.store.save(session, &shares) {
            tracing::warn!(error = %e, "failed to save resumption snapshot");
        }
    }
}
