//! Integration tests for session/share lifecycle coordination.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::watch;

use waypost_core::backend::{
    Backend, BackendVersion, InitParams, SessionCreated, ShareListUpdate,
};
use waypost_core::error::{Error, Result};
use waypost_core::location::{LocationEnvironment, Position};
use waypost_core::manager::{
    Relaunch, SessionListener, SessionManager, ShareListener, StatusListener,
};
use waypost_core::pusher::StatusEvent;
use waypost_core::session::{Session, Share, ShareMode, StartReason};
use waypost_core::store::{FileResumptionStore, ResumptionStore};
use waypost_core::E2E_KEY_BITS;

/// Backend double with scriptable version, view ID, and stop behavior.
struct FakeBackend {
    version: BackendVersion,
    view_id: Option<String>,
    fail_stop: AtomicBool,
    stop_calls: Mutex<Vec<String>>,
}

impl FakeBackend {
    fn with_version(version: &str) -> Self {
        Self {
            version: BackendVersion::new(version),
            view_id: None,
            fail_stop: AtomicBool::new(false),
            stop_calls: Mutex::new(Vec::new()),
        }
    }

    fn with_view_id(mut self, view_id: &str) -> Self {
        self.view_id = Some(view_id.to_string());
        self
    }

    fn fail_stops(self) -> Self {
        self.fail_stop.store(true, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn create_session(
        &self,
        _params: &InitParams,
        _salt: Option<&[u8]>,
    ) -> Result<SessionCreated> {
        let view_url = "https://x/view/abc".to_string();
        let view_id = self.view_id.clone().unwrap_or_else(|| {
            if self.version.supports_view_id() {
                "abc".to_string()
            } else {
                view_url.clone()
            }
        });
        Ok(SessionCreated {
            session_id: "abc".to_string(),
            view_url,
            view_id,
            backend_version: self.version.clone(),
        })
    }

    async fn stop_share(&self, _session: &Session, share_id: &str) -> Result<()> {
        self.stop_calls.lock().unwrap().push(share_id.to_string());
        if self.fail_stop.load(Ordering::SeqCst) {
            Err(Error::Protocol("stop failed".to_string()))
        } else {
            Ok(())
        }
    }

    async fn post_location(
        &self,
        _session: &Session,
        _position: &Position,
    ) -> Result<ShareListUpdate> {
        Ok(ShareListUpdate::default())
    }
}

/// Environment stub with toggleable precondition answers.
struct FakeEnvironment {
    permission: AtomicBool,
    services: AtomicBool,
}

impl FakeEnvironment {
    fn ready() -> Self {
        Self {
            permission: AtomicBool::new(true),
            services: AtomicBool::new(true),
        }
    }
}

impl LocationEnvironment for FakeEnvironment {
    fn permission_granted(&self) -> bool {
        self.permission.load(Ordering::SeqCst)
    }

    fn services_enabled(&self) -> bool {
        self.services.load(Ordering::SeqCst)
    }
}

/// Shared log the recording listeners append to.
#[derive(Clone, Default)]
struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

struct RecordingShareListener {
    log: EventLog,
    tag: &'static str,
}

impl ShareListener for RecordingShareListener {
    fn on_share_joined(&mut self, share: &Share) {
        self.log.push(format!("{}joined:{}", self.tag, share.id()));
    }

    fn on_share_parted(&mut self, share: &Share) {
        self.log.push(format!("{}parted:{}", self.tag, share.id()));
    }
}

struct RecordingSessionListener {
    log: EventLog,
}

impl SessionListener for RecordingSessionListener {
    fn on_session_created(&mut self, session: &Session, share: &Share, reason: StartReason) {
        self.log.push(format!(
            "created:{}:{}:{reason:?}",
            session.session_id,
            share.id()
        ));
    }

    fn on_session_creation_failed_due_to_permissions(&mut self) {
        self.log.push("failed_permissions".to_string());
    }
}

struct RecordingStatusListener {
    log: EventLog,
}

impl StatusListener for RecordingStatusListener {
    fn on_server_connection_lost(&mut self) {
        self.log.push("server_lost".to_string());
    }

    fn on_server_connection_restored(&mut self) {
        self.log.push("server_restored".to_string());
    }

    fn on_share_list_received(&mut self, _link_format: &str, share_ids: &[String]) {
        self.log.push(format!("share_list:{}", share_ids.join(",")));
    }
}

struct Fixture {
    manager: SessionManager,
    store: FileResumptionStore,
    backend: Arc<FakeBackend>,
    _position_tx: watch::Sender<Option<Position>>,
    _dir: TempDir,
}

fn fixture(backend: FakeBackend) -> Fixture {
    fixture_with_env(backend, FakeEnvironment::ready())
}

fn fixture_with_env(backend: FakeBackend, env: FakeEnvironment) -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = FileResumptionStore::at(dir.path().join("session.json"));
    let backend = Arc::new(backend);
    let (position_tx, position_rx) = watch::channel::<Option<Position>>(None);
    let (manager, _events) = SessionManager::new(
        Arc::clone(&backend) as Arc<dyn Backend>,
        Arc::new(env),
        Box::new(store.clone()),
        position_rx,
    );
    Fixture {
        manager,
        store,
        backend,
        _position_tx: position_tx,
        _dir: dir,
    }
}

fn params() -> InitParams {
    InitParams::new("https://waypost.example.com", "secret")
        .with_duration(Duration::from_secs(3600))
        .with_interval(Duration::from_secs(30))
}

fn share_list(ids: &[&str]) -> StatusEvent {
    StatusEvent::ShareListReceived {
        link_format: "https://x/?%s".to_string(),
        share_ids: ids.iter().map(ToString::to_string).collect(),
    }
}

#[tokio::test]
async fn start_session_creates_one_session_and_one_share() {
    let mut f = fixture(FakeBackend::with_version("1.1"));

    let outcome = f
        .manager
        .start_session(params(), StartReason::UserStarted)
        .await
        .unwrap();

    assert!(f.manager.is_session_active());
    assert_eq!(f.manager.shares().len(), 1);
    assert_eq!(outcome.share.id(), "abc");
    assert!(outcome.e2e_dropped.is_none());

    // The snapshot is persisted immediately.
    let (session, shares) = f.store.load().unwrap().unwrap();
    assert_eq!(session.session_id, "abc");
    assert_eq!(shares.len(), 1);
}

#[tokio::test]
async fn start_session_legacy_backend_defaults_share_id_to_url() {
    let mut f = fixture(FakeBackend::with_version("1.0"));

    let outcome = f
        .manager
        .start_session(params(), StartReason::UserStarted)
        .await
        .unwrap();

    assert_eq!(outcome.share.id(), "https://x/view/abc");
    assert_eq!(outcome.share.view_url, "https://x/view/abc");

    let session = f.manager.active_session().unwrap();
    let remaining = session.remaining();
    assert!(remaining <= Duration::from_secs(3600));
    assert!(remaining > Duration::from_secs(3590));
    assert_eq!(session.interval, Duration::from_secs(30));
}

#[tokio::test]
async fn start_session_rejects_concurrent_start() {
    let mut f = fixture(FakeBackend::with_version("1.1"));
    f.manager
        .start_session(params(), StartReason::UserStarted)
        .await
        .unwrap();

    let err = f
        .manager
        .start_session(params(), StartReason::UserStarted)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConcurrentSessionActive));
    assert_eq!(f.manager.shares().len(), 1, "state must be unchanged");
}

#[tokio::test]
async fn start_session_precondition_failures_leave_no_state() {
    let env = FakeEnvironment::ready();
    env.permission.store(false, Ordering::SeqCst);
    let mut f = fixture_with_env(FakeBackend::with_version("1.1"), env);

    let err = f
        .manager
        .start_session(params(), StartReason::UserStarted)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermissionDenied));
    assert!(!f.manager.is_session_active());
    assert!(f.store.load().unwrap().is_none());

    let env = FakeEnvironment::ready();
    env.services.store(false, Ordering::SeqCst);
    let mut f = fixture_with_env(FakeBackend::with_version("1.1"), env);

    let err = f
        .manager
        .start_session(params(), StartReason::UserStarted)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::LocationServicesDisabled));
    assert!(!f.manager.is_session_active());
}

#[tokio::test]
async fn e2e_is_dropped_below_compat_threshold() {
    let mut f = fixture(FakeBackend::with_version("1.1"));

    let outcome = f
        .manager
        .start_session(
            params().with_e2e_passphrase(Some("hunter2".to_string())),
            StartReason::UserStarted,
        )
        .await
        .unwrap();

    assert_eq!(outcome.e2e_dropped, Some(BackendVersion::new("1.1")));
    let session = f.manager.active_session().unwrap();
    assert!(!session.is_end_to_end_encrypted());
}

#[tokio::test]
async fn e2e_key_material_is_derived_at_compat_threshold() {
    let mut f = fixture(FakeBackend::with_version("1.2"));

    let outcome = f
        .manager
        .start_session(
            params().with_e2e_passphrase(Some("hunter2".to_string())),
            StartReason::UserStarted,
        )
        .await
        .unwrap();

    assert!(outcome.e2e_dropped.is_none());
    let session = f.manager.active_session().unwrap();
    let material = session.key_material.as_ref().unwrap();
    assert_eq!(material.salt().len(), E2E_KEY_BITS / 8);
}

#[tokio::test]
async fn stop_all_sharing_is_idempotent() {
    let mut f = fixture(FakeBackend::with_version("1.1"));
    f.manager
        .start_session(params(), StartReason::UserStarted)
        .await
        .unwrap();

    f.manager.stop_all_sharing();
    assert!(!f.manager.is_session_active());
    assert!(f.manager.shares().is_empty());
    assert!(f.store.load().unwrap().is_none());

    // Second call over empty state is safe.
    f.manager.stop_all_sharing();
    assert!(!f.manager.is_session_active());
    assert!(f.manager.shares().is_empty());
}

#[tokio::test]
async fn failed_stop_keeps_share_locally() {
    let mut f = fixture(FakeBackend::with_version("1.1").with_view_id("s1").fail_stops());
    let log = EventLog::default();
    f.manager.attach_share_listener(Box::new(RecordingShareListener {
        log: log.clone(),
        tag: "",
    }));

    f.manager
        .start_session(params(), StartReason::UserStarted)
        .await
        .unwrap();

    let err = f.manager.stop_share("s1").await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
    assert!(f.manager.share("s1").is_some(), "share must not be deleted locally");

    let (_, shares) = f.store.load().unwrap().unwrap();
    assert_eq!(shares.len(), 1, "snapshot must keep the share too");
    assert_eq!(log.entries(), ["joined:s1"], "no parted event on failure");
}

#[tokio::test]
async fn confirmed_stop_removes_share_and_fires_parted() {
    let mut f = fixture(FakeBackend::with_version("1.1").with_view_id("s1"));
    let log = EventLog::default();
    f.manager.attach_share_listener(Box::new(RecordingShareListener {
        log: log.clone(),
        tag: "",
    }));

    f.manager
        .start_session(params(), StartReason::UserStarted)
        .await
        .unwrap();
    f.manager.stop_share("s1").await.unwrap();

    assert!(f.manager.share("s1").is_none());
    assert_eq!(*f.backend.stop_calls.lock().unwrap(), ["s1"]);
    assert!(f.store.load().unwrap().is_none(), "last share clears the snapshot");
    assert_eq!(log.entries(), ["joined:s1", "parted:s1"]);
}

#[tokio::test]
async fn stop_of_unknown_share_is_rejected() {
    let mut f = fixture(FakeBackend::with_version("1.1"));
    let err = f.manager.stop_share("ghost").await.unwrap_err();
    assert!(matches!(err, Error::UnknownShare(_)));
}

#[tokio::test]
async fn reconciliation_adds_and_removes_in_one_pass() {
    let mut f = fixture(FakeBackend::with_version("1.1"));
    let log = EventLog::default();
    f.manager.attach_share_listener(Box::new(RecordingShareListener {
        log: log.clone(),
        tag: "",
    }));

    f.manager
        .start_session(params(), StartReason::UserStarted)
        .await
        .unwrap();
    assert_eq!(log.entries(), ["joined:abc"]);

    // Server added b2 out of band and still reports abc.
    f.manager.handle_status_event(share_list(&["abc", "b2"]));
    assert_eq!(log.entries(), ["joined:abc", "joined:b2"]);
    let added = f.manager.share("b2").unwrap();
    assert_eq!(added.view_url, "https://x/?b2");
    assert_eq!(added.mode, ShareMode::Solo);

    // Server dropped abc; b2 stays.
    f.manager.handle_status_event(share_list(&["b2"]));
    assert_eq!(log.entries(), ["joined:abc", "joined:b2", "parted:abc"]);
    assert!(f.manager.share("abc").is_none());
    assert!(f.manager.share("b2").is_some());

    let (_, shares) = f.store.load().unwrap().unwrap();
    assert_eq!(shares.len(), 1);
    assert_eq!(shares[0].id(), "b2");
}

#[tokio::test]
async fn reconciliation_is_idempotent() {
    let mut f = fixture(FakeBackend::with_version("1.1"));
    let log = EventLog::default();
    f.manager.attach_share_listener(Box::new(RecordingShareListener {
        log: log.clone(),
        tag: "",
    }));

    f.manager
        .start_session(params(), StartReason::UserStarted)
        .await
        .unwrap();

    f.manager.handle_status_event(share_list(&["abc", "b2"]));
    let after_first = log.entries();
    f.manager.handle_status_event(share_list(&["abc", "b2"]));
    assert_eq!(log.entries(), after_first, "same list twice fires no new events");
}

#[tokio::test]
async fn reconciliation_without_active_session_is_ignored() {
    let mut f = fixture(FakeBackend::with_version("1.1"));
    f.manager.handle_status_event(share_list(&["stray"]));
    assert!(f.manager.shares().is_empty());
    assert!(!f.manager.is_session_active());
}

#[tokio::test]
async fn status_events_reach_listeners_in_registration_order() {
    let mut f = fixture(FakeBackend::with_version("1.1"));
    let log = EventLog::default();
    f.manager.attach_share_listener(Box::new(RecordingShareListener {
        log: log.clone(),
        tag: "a:",
    }));
    f.manager.attach_share_listener(Box::new(RecordingShareListener {
        log: log.clone(),
        tag: "b:",
    }));

    f.manager
        .start_session(params(), StartReason::UserStarted)
        .await
        .unwrap();
    assert_eq!(log.entries(), ["a:joined:abc", "b:joined:abc"]);
}

#[tokio::test]
async fn detached_listeners_stop_receiving_events() {
    let mut f = fixture(FakeBackend::with_version("1.1"));
    let log = EventLog::default();
    let id = f.manager.attach_share_listener(Box::new(RecordingShareListener {
        log: log.clone(),
        tag: "",
    }));

    assert!(f.manager.detach_share_listener(id));
    assert!(!f.manager.detach_share_listener(id), "second detach is a no-op");

    f.manager
        .start_session(params(), StartReason::UserStarted)
        .await
        .unwrap();
    assert!(log.entries().is_empty());
}

#[tokio::test]
async fn status_stream_is_rebroadcast() {
    let mut f = fixture(FakeBackend::with_version("1.1"));
    let log = EventLog::default();
    f.manager.attach_status_listener(Box::new(RecordingStatusListener { log: log.clone() }));

    f.manager.handle_status_event(StatusEvent::ServerConnectionLost);
    f.manager.handle_status_event(StatusEvent::ServerConnectionRestored);
    f.manager.handle_status_event(share_list(&[]));

    assert_eq!(log.entries(), ["server_lost", "server_restored", "share_list:"]);
}

#[tokio::test]
async fn expiry_event_tears_everything_down() {
    let mut f = fixture(FakeBackend::with_version("1.1"));
    f.manager
        .start_session(params(), StartReason::UserStarted)
        .await
        .unwrap();

    f.manager.handle_status_event(StatusEvent::Expired);
    assert!(!f.manager.is_session_active());
    assert!(f.manager.shares().is_empty());
    assert!(f.store.load().unwrap().is_none());
}

#[tokio::test]
async fn resume_reattaches_shares_with_resumed_reason() {
    let mut f = fixture(FakeBackend::with_version("1.1"));
    let log = EventLog::default();
    f.manager
        .attach_session_listener(Box::new(RecordingSessionListener { log: log.clone() }));
    f.manager.attach_share_listener(Box::new(RecordingShareListener {
        log: log.clone(),
        tag: "",
    }));

    // Simulate a prior run that persisted a snapshot and then died.
    f.manager
        .start_session(params(), StartReason::UserStarted)
        .await
        .unwrap();
    let (session, shares) = f.store.load().unwrap().unwrap();
    f.manager.stop_all_sharing();
    f.store.save(&session, &shares).unwrap();

    let (session, shares) = f.manager.load_resumable().unwrap().unwrap();
    f.manager.resume_session(session, shares);

    assert!(f.manager.is_session_active());
    assert_eq!(f.manager.shares().len(), 1);
    let entries = log.entries();
    assert!(
        entries.contains(&"created:abc:abc:UserResumed".to_string()),
        "listeners must see the resume reason, got {entries:?}"
    );
}

#[tokio::test]
async fn relaunch_restarts_live_pusher_and_defers_otherwise() {
    let mut f = fixture(FakeBackend::with_version("1.1"));

    assert_eq!(f.manager.relaunch_pusher(), Relaunch::NeedsPrompt);

    f.manager
        .start_session(params(), StartReason::UserStarted)
        .await
        .unwrap();
    assert_eq!(f.manager.relaunch_pusher(), Relaunch::Restarted);
    assert!(f.manager.is_session_active());

    f.manager.stop_all_sharing();
    assert_eq!(f.manager.relaunch_pusher(), Relaunch::NeedsPrompt);
}

#[tokio::test]
async fn attach_share_is_idempotent_per_id() {
    let mut f = fixture(FakeBackend::with_version("1.1"));
    f.manager
        .start_session(params(), StartReason::UserStarted)
        .await
        .unwrap();

    let share = f.manager.share("abc").unwrap().clone();
    f.manager.attach_share(share, StartReason::ShareAdded);
    assert_eq!(f.manager.shares().len(), 1);
}
