//! Share command implementation.

use std::io::Write;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use waypost_core::backend::{HttpBackend, InitParams};
use waypost_core::location::{FixQuality, Position, UnrestrictedEnvironment};
use waypost_core::manager::{SessionManager, ShareListener, StatusListener};
use waypost_core::session::{Session, StartReason};
use waypost_core::store::FileResumptionStore;

use super::{parse_duration, ShareArgs};

/// Run the share command.
pub async fn run(args: ShareArgs) -> Result<()> {
    let config = super::load_config();

    let server = args
        .server
        .clone()
        .or_else(|| non_empty(config.server.url.clone()))
        .context("no server URL configured; pass --server or set server.url in the config")?;
    let password = args
        .password
        .clone()
        .or_else(|| non_empty(config.server.password.clone()))
        .unwrap_or_default();

    let duration = match &args.duration {
        Some(raw) => parse_duration(raw).ok_or_else(|| anyhow!("invalid duration '{raw}'"))?,
        None => config.sharing.duration,
    };
    let interval = match &args.interval {
        Some(raw) => parse_duration(raw).ok_or_else(|| anyhow!("invalid interval '{raw}'"))?,
        None => config.sharing.interval,
    };

    let mut params = InitParams::new(server, password)
        .with_duration(duration)
        .with_interval(interval)
        .with_e2e_passphrase(
            args.e2e_passphrase
                .clone()
                .or_else(|| config.security.e2e_passphrase.clone()),
        );
    params.username = args.username.clone().or_else(|| config.server.username.clone());
    params.min_distance = args.min_distance.unwrap_or(config.sharing.min_distance);
    params.custom_id = args.link_id.clone().or_else(|| config.sharing.custom_id.clone());
    params.connection = config.server.connection.clone();

    let (position_tx, position_rx) = watch::channel(None);
    let fixed = args.fixed.as_deref().map(parse_fixed).transpose()?;
    let _position_feed = spawn_position_feed(fixed, position_tx);

    let store = FileResumptionStore::new();
    let (mut manager, mut events) = SessionManager::new(
        Arc::new(HttpBackend::new()),
        Arc::new(UnrestrictedEnvironment),
        Box::new(store),
        position_rx,
    );
    manager.attach_share_listener(Box::new(PrintingShareListener { quiet: args.quiet }));
    manager.attach_status_listener(Box::new(PrintingStatusListener { quiet: args.quiet }));

    try_resume(&mut manager, &args, config.sharing.auto_resume)?;

    if manager.is_session_active() {
        if !args.quiet {
            if let Some(session) = manager.active_session() {
                println!("resumed session, expires {}", session.expiry_string());
            }
            for share in manager.shares() {
                println!("{}", share.view_url);
            }
        }
    } else {
        let outcome = manager.start_session(params, StartReason::UserStarted).await?;
        if let Some(version) = outcome.e2e_dropped {
            eprintln!(
                "warning: server (backend {version}) is too old for end-to-end encryption; \
                 sharing without it"
            );
        }
        if !args.quiet {
            if let Some(session) = manager.active_session() {
                println!("sharing until {}", session.expiry_string());
            }
        }
        println!("{}", outcome.share.view_url);
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                manager.handle_status_event(event);
                if !manager.is_session_active() {
                    if !args.quiet {
                        println!("session expired");
                    }
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if !args.quiet {
                    eprintln!("stopping shares...");
                }
                let ids: Vec<String> =
                    manager.shares().iter().map(|s| s.id().to_string()).collect();
                for id in ids {
                    if let Err(e) = manager.stop_share(&id).await {
                        tracing::warn!(share = %id, error = %e, "could not stop share on server");
                    }
                }
                manager.stop_all_sharing();
                break;
            }
        }
    }

    if !args.quiet {
        println!("sharing ended");
    }
    Ok(())
}

/// Offer to resume a persisted session, honoring the auto-resume settings.
fn try_resume(manager: &mut SessionManager, args: &ShareArgs, auto_resume: bool) -> Result<()> {
    let snapshot = match manager.load_resumable() {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!(error = %e, "could not read resumption snapshot");
            return Ok(());
        }
    };
    let Some((session, shares)) = snapshot else {
        return Ok(());
    };

    if session.is_expired() || shares.is_empty() {
        manager.stop_all_sharing();
        return Ok(());
    }

    let resume = args.resume || auto_resume || prompt_resume(&session, shares.len())?;
    if resume {
        manager.resume_session(session, shares);
    } else {
        manager.stop_all_sharing();
    }
    Ok(())
}

/// Ask on the terminal whether to resume an interrupted session.
fn prompt_resume(session: &Session, share_count: usize) -> Result<bool> {
    eprint!(
        "Found an interrupted session with {share_count} share(s), expiring {}. Resume? [y/N] ",
        session.expiry_string()
    );
    std::io::stderr().flush()?;

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

/// Feed positions into the watch channel, either a fixed point or JSON
/// lines from stdin (`{"lat": 63.4, "lon": 10.4}` per line).
fn spawn_position_feed(
    fixed: Option<Position>,
    tx: watch::Sender<Option<Position>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(position) = fixed {
            let _ = tx.send(Some(position));
        } else {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                match parse_position_line(&line) {
                    Ok(position) => {
                        let _ = tx.send(Some(position));
                    }
                    Err(e) => tracing::warn!(error = %e, "ignoring malformed position line"),
                }
            }
        }
        // Keep the channel open so the pusher can reuse the last position.
        std::future::pending::<()>().await;
    })
}

/// Wire format for one stdin position line.
#[derive(serde::Deserialize)]
struct PositionLine {
    lat: f64,
    lon: f64,
    #[serde(default)]
    acc: Option<f64>,
    #[serde(default)]
    alt: Option<f64>,
    #[serde(default)]
    spd: Option<f64>,
    #[serde(default)]
    coarse: bool,
}

fn parse_position_line(line: &str) -> Result<Position> {
    let parsed: PositionLine = serde_json::from_str(line)?;
    Ok(Position {
        latitude: parsed.lat,
        longitude: parsed.lon,
        accuracy: parsed.acc,
        altitude: parsed.alt,
        speed: parsed.spd,
        timestamp: Utc::now(),
        fix: if parsed.coarse {
            FixQuality::Coarse
        } else {
            FixQuality::Accurate
        },
    })
}

fn parse_fixed(raw: &str) -> Result<Position> {
    let (lat, lon) = raw
        .split_once(',')
        .ok_or_else(|| anyhow!("expected LAT,LON, got '{raw}'"))?;
    Ok(Position {
        latitude: lat.trim().parse().context("invalid latitude")?,
        longitude: lon.trim().parse().context("invalid longitude")?,
        accuracy: None,
        altitude: None,
        speed: None,
        timestamp: Utc::now(),
        fix: FixQuality::Accurate,
    })
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Prints share membership changes as they happen.
struct PrintingShareListener {
    quiet: bool,
}

impl ShareListener for PrintingShareListener {
    fn on_share_joined(&mut self, share: &waypost_core::session::Share) {
        if !self.quiet {
            println!("+ {}", share.view_url);
        }
    }

    fn on_share_parted(&mut self, share: &waypost_core::session::Share) {
        if !self.quiet {
            println!("- {}", share.view_url);
        }
    }
}

/// Prints connectivity transitions as they happen.
struct PrintingStatusListener {
    quiet: bool,
}

impl StatusListener for PrintingStatusListener {
    fn on_server_connection_lost(&mut self) {
        eprintln!("! lost connection to server, retrying");
    }

    fn on_server_connection_restored(&mut self) {
        eprintln!("! connection to server restored");
    }

    fn on_fix_accurate(&mut self) {
        if !self.quiet {
            eprintln!("  accurate position fix");
        }
    }

    fn on_fix_coarse(&mut self) {
        if !self.quiet {
            eprintln!("  coarse position fix");
        }
    }
}
