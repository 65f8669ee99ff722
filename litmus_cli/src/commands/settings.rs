//! `litmus config` - show or update the saved platform URLs

use crate::config::{self, Config};
use anyhow::Result;
use console::style;
use litmus_client::ClientConfig;

/// Show the resolved configuration, or save new values when any are given
pub fn run(effective: &ClientConfig, api_url: Option<String>, ws_url: Option<String>) -> Result<()> {
    if api_url.is_none() && ws_url.is_none() {
        show(effective);
        return Ok(());
    }

    let mut saved = Config::load()?;
    if let Some(api_url) = api_url {
        ClientConfig::new(api_url.as_str()).validate()?;
        saved.api_url = Some(api_url);
    }
    if let Some(ws_url) = ws_url {
        ClientConfig::default().with_ws_url(ws_url.as_str()).validate()?;
        saved.ws_url = Some(ws_url);
    }
    saved.save()?;

    cliclack::log::success(format!(
        "Saved to {}",
        style(config::config_file().display()).cyan()
    ))?;
    Ok(())
}

fn show(effective: &ClientConfig) {
    println!();
    println!("  {}  {}", style("API URL     ").dim(), effective.api_url);
    println!("  {}  {}", style("Live URL    ").dim(), effective.ws_url);
    println!(
        "  {}  {}",
        style("Timeout     ").dim(),
        config::describe_timeout(effective.request_timeout)
    );
    println!(
        "  {}  {}",
        style("Config file ").dim(),
        config::config_file().display()
    );
    println!();
}
