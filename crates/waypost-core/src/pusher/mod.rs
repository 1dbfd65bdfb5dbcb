//! Recurring background location push task.
//!
//! The pusher is a long-lived tokio task that reports the latest known
//! position to the backend at the session's interval, watches for position
//! quality and server connectivity transitions, and halts on its own when
//! the session's absolute expiry is reached. It never touches coordinator
//! state directly; everything it learns is emitted as [`StatusEvent`]
//! messages on an mpsc channel, in the order produced.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backend::Backend;
use crate::location::{FixQuality, Position};
use crate::session::Session;

/// Capacity of the shutdown signal channel.
const SHUTDOWN_CHANNEL_CAPACITY: usize = 1;

/// Status events emitted by the push task toward the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// The satellite fix was lost and the device fell back to a coarse fix
    ConnectionLost,
    /// A satellite fix was regained after having been lost
    ConnectionRestored,
    /// A coarse position fix was obtained
    FixCoarse,
    /// An accurate position fix was obtained
    FixAccurate,
    /// A location push failed after previously succeeding
    ServerConnectionLost,
    /// A location push succeeded after previously failing
    ServerConnectionRestored,
    /// The server reported its authoritative share list for the session
    ShareListReceived {
        /// URL format string with a `%s` placeholder for the share ID
        link_format: String,
        /// Currently live share IDs
        share_ids: Vec<String>,
    },
    /// The session's expiry deadline passed; no further pushes will happen
    Expired,
}

/// Handle to a running push task.
///
/// There is at most one push task per coordinator; dropping the handle does
/// not stop the task, call [`PusherHandle::abort`] or
/// [`PusherHandle::stop`].
#[derive(Debug)]
pub struct PusherHandle {
    shutdown: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl PusherHandle {
    /// Cancel the task immediately. No further pushes happen after this
    /// call returns.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Ask the task to wind down and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(()).await;
        let _ = self.task.await;
    }

    /// Whether the task has already exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn the push task for a session.
///
/// The task reads the latest position from `positions`, posts it through
/// `backend` every `session.interval`, and reports what it observes on
/// `events`. It exits when the session expires, when the shutdown signal
/// fires, or when the event receiver is dropped.
#[must_use]
pub fn spawn(
    session: Session,
    backend: Arc<dyn Backend>,
    positions: watch::Receiver<Option<Position>>,
    events: mpsc::Sender<StatusEvent>,
) -> PusherHandle {
    let (shutdown_tx, shutdown_rx) = mpsc::channel(SHUTDOWN_CHANNEL_CAPACITY);
    let task = tokio::spawn(run(session, backend, positions, events, shutdown_rx));
    PusherHandle {
        shutdown: shutdown_tx,
        task,
    }
}

async fn run(
    session: Session,
    backend: Arc<dyn Backend>,
    positions: watch::Receiver<Option<Position>>,
    events: mpsc::Sender<StatusEvent>,
    mut shutdown: mpsc::Receiver<()>,
) {
    let period = if session.interval.is_zero() {
        Duration::from_secs(1)
    } else {
        session.interval
    };
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // The expiry is a deadline, not a retry timer: it fires regardless of
    // how the pushes themselves are going.
    let deadline = tokio::time::sleep(session.remaining());
    tokio::pin!(deadline);

    let mut state = PushState::default();

    tracing::info!(
        session = %session.session_id,
        interval = ?period,
        expires = %session.expiry_string(),
        "location push task started"
    );

    loop {
        tokio::select! {
            () = &mut deadline => {
                tracing::info!(session = %session.session_id, "session expired, halting pushes");
                let _ = events.send(StatusEvent::Expired).await;
                break;
            }
            _ = interval.tick() => {
                if !push_once(&session, backend.as_ref(), &positions, &mut state, &events).await {
                    tracing::debug!("event receiver dropped, halting pushes");
                    break;
                }
            }
            _ = shutdown.recv() => {
                tracing::debug!("push task received shutdown signal");
                break;
            }
        }
    }
}

/// One tick of the push loop. Returns `false` once the event channel is
/// closed and the task should exit.
async fn push_once(
    session: &Session,
    backend: &dyn Backend,
    positions: &watch::Receiver<Option<Position>>,
    state: &mut PushState,
    events: &mpsc::Sender<StatusEvent>,
) -> bool {
    let position = positions.borrow().clone();
    let Some(position) = position else {
        tracing::trace!("no position available yet, skipping push");
        return true;
    };

    // Fix transitions are observed even for positions the movement filter
    // ends up discarding.
    for event in state.fix_events(position.fix) {
        if events.send(event).await.is_err() {
            return false;
        }
    }

    if session.min_distance > 0.0 {
        if let Some(last) = &state.last_pushed {
            let moved = position.distance_to(last);
            if moved < session.min_distance {
                tracing::trace!(moved, "movement below threshold, skipping push");
                return true;
            }
        }
    }

    match backend.post_location(session, &position).await {
        Ok(update) => {
            state.last_pushed = Some(position);
            if state.server_offline {
                state.server_offline = false;
                if events.send(StatusEvent::ServerConnectionRestored).await.is_err() {
                    return false;
                }
            }
            if let Some(link_format) = update.link_format {
                let event = StatusEvent::ShareListReceived {
                    link_format,
                    share_ids: update.share_ids,
                };
                if events.send(event).await.is_err() {
                    return false;
                }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "location push failed");
            if !state.server_offline {
                state.server_offline = true;
                if events.send(StatusEvent::ServerConnectionLost).await.is_err() {
                    return false;
                }
            }
        }
    }

    true
}

/// Mutable state the push loop tracks between ticks.
#[derive(Debug, Default)]
struct PushState {
    last_fix: Option<FixQuality>,
    gnss_lost: bool,
    last_pushed: Option<Position>,
    server_offline: bool,
}

impl PushState {
    /// Events to emit for a newly observed fix quality.
    fn fix_events(&mut self, fix: FixQuality) -> Vec<StatusEvent> {
        let events = match (self.last_fix, fix) {
            (None, FixQuality::Coarse) => vec![StatusEvent::FixCoarse],
            (None | Some(FixQuality::Coarse), FixQuality::Accurate) => {
                let mut events = Vec::with_capacity(2);
                if self.gnss_lost {
                    self.gnss_lost = false;
                    events.push(StatusEvent::ConnectionRestored);
                }
                events.push(StatusEvent::FixAccurate);
                events
            }
            (Some(FixQuality::Accurate), FixQuality::Coarse) => {
                self.gnss_lost = true;
                vec![StatusEvent::ConnectionLost, StatusEvent::FixCoarse]
            }
            _ => Vec::new(),
        };
        self.last_fix = Some(fix);
        events
    }
}
