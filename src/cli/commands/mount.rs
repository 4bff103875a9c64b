//! CLI implementation for `insturl mount`

use std::path::Path;

use anyhow::{Context, Result};

use crate::cli::output::{engine_progress, is_json, print_detail, print_success};
use crate::config::Settings;
use crate::core::mount::MountEngine;
use crate::core::url::InstallUrl;

/// Engine for the running system, drawing progress bars
pub(crate) fn engine(settings: &Settings) -> MountEngine {
    MountEngine::system(settings).with_progress(engine_progress())
}

/// Report where `url` ended up
pub(crate) fn report(url: &InstallUrl) -> Result<()> {
    if is_json() {
        let json = serde_json::json!({
            "url": url.to_string(),
            "mount": url.mount,
            "tmp_mount": url.tmp_mount,
            "used": url.used,
            "is": url.is,
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    match &url.mount {
        Some(mount) => print_success(&format!("{url} mounted at {}", mount.display())),
        None => print_success(&format!("{url} is reachable")),
    }
    if let Some(device) = &url.used.device {
        print_detail("device", device);
    }
    if let Some(model) = &url.used.model {
        print_detail("model", model);
    }
    if let Some(server) = &url.used.server {
        let addr = server.addr.map(|a| a.to_string()).unwrap_or_default();
        print_detail("server", &format!("{} {addr}", server.name));
    }
    Ok(())
}

/// Execute the mount command
pub fn execute(settings: &Settings, text: &str, dir: Option<&Path>) -> Result<()> {
    let mut url = InstallUrl::parse(text);
    let mut engine = engine(settings);

    engine
        .resolve_and_mount(&mut url, dir, None)
        .with_context(|| format!("Failed to mount {text}"))?;
    report(&url)
}
