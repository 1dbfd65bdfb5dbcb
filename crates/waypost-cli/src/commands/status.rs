//! Status command implementation.

use anyhow::Result;
use serde_json::json;

use waypost_core::store::{FileResumptionStore, ResumptionStore};

use super::StatusArgs;

/// Run the status command.
pub fn run(args: &StatusArgs) -> Result<()> {
    let store = FileResumptionStore::new();
    let snapshot = store.load()?;

    if args.json {
        let payload = match &snapshot {
            Some((session, shares)) => json!({
                "snapshot": true,
                "server": session.server_url,
                "expires": session.expiry.to_rfc3339(),
                "expired": session.is_expired(),
                "end_to_end_encrypted": session.is_end_to_end_encrypted(),
                "shares": shares.iter().map(|s| s.view_url.clone()).collect::<Vec<_>>(),
            }),
            None => json!({ "snapshot": false }),
        };
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    match snapshot {
        Some((session, shares)) => {
            let state = if session.is_expired() { "expired" } else { "resumable" };
            println!("{state} session on {}", session.server_url);
            println!("expires {}", session.expiry_string());
            if session.is_end_to_end_encrypted() {
                println!("end-to-end encrypted");
            }
            for share in &shares {
                println!("  {}", share.view_url);
            }
        }
        None => println!("no session snapshot"),
    }
    Ok(())
}
