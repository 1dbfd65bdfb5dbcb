//! Config command implementation.

use anyhow::{bail, Context, Result};

use waypost_core::config::Config;

use super::{ConfigAction, ConfigArgs};

/// Run the config command.
pub fn run(args: &ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => show(),
        ConfigAction::Path => {
            let path = Config::default_path().context("cannot determine config directory")?;
            println!("{}", path.display());
            Ok(())
        }
        ConfigAction::Init => init(),
    }
}

fn show() -> Result<()> {
    let config = super::load_config();

    println!("server.url = {:?}", config.server.url);
    println!("server.username = {:?}", config.server.username);
    println!(
        "server.password = {}",
        if config.server.password.is_empty() { "(unset)" } else { "(set)" }
    );
    println!("server.connection.timeout = {:?}", config.server.connection.timeout);
    println!("server.connection.proxy = {:?}", config.server.connection.proxy);
    println!(
        "server.connection.accept_invalid_certs = {}",
        config.server.connection.accept_invalid_certs
    );
    println!("sharing.duration = {:?}", config.sharing.duration);
    println!("sharing.interval = {:?}", config.sharing.interval);
    println!("sharing.min_distance = {}", config.sharing.min_distance);
    println!("sharing.custom_id = {:?}", config.sharing.custom_id);
    println!("sharing.auto_resume = {}", config.sharing.auto_resume);
    println!(
        "security.e2e_passphrase = {}",
        if config.security.e2e_passphrase.is_some() { "(set)" } else { "(unset)" }
    );
    Ok(())
}

fn init() -> Result<()> {
    let path = Config::default_path().context("cannot determine config directory")?;
    if path.exists() {
        bail!("config file already exists at {}", path.display());
    }
    Config::default().save_to(path.clone())?;
    println!("wrote {}", path.display());
    Ok(())
}
