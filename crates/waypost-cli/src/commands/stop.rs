//! Stop command implementation.
//!
//! Stops the shares recorded in the last session snapshot. Useful when a
//! `share` run died and its links are still live on the server.

use anyhow::Result;

use waypost_core::backend::{Backend, HttpBackend};
use waypost_core::store::{FileResumptionStore, ResumptionStore};

use super::StopArgs;

/// Run the stop command.
pub async fn run(args: StopArgs) -> Result<()> {
    let store = FileResumptionStore::new();

    let Some((session, shares)) = store.load()? else {
        println!("no session snapshot; nothing to stop");
        return Ok(());
    };

    if args.local {
        store.clear()?;
        println!("snapshot cleared; the server was not contacted");
        return Ok(());
    }

    let backend = HttpBackend::new();
    let mut failures = 0usize;
    for share in &shares {
        match backend.stop_share(&session, share.id()).await {
            Ok(()) => {
                store.clear_share(share.id())?;
                println!("stopped {}", share.view_url);
            }
            Err(e) => {
                // Keep the share in the snapshot; it may still be live.
                failures += 1;
                eprintln!("could not stop {}: {e}", share.view_url);
            }
        }
    }

    if failures == 0 {
        store.clear()?;
        println!("all shares stopped");
    } else {
        anyhow::bail!("{failures} share(s) could not be stopped; snapshot kept");
    }
    Ok(())
}
