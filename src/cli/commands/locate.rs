//! CLI implementation for `insturl find-repo` and `insturl find-instsys`

use std::path::Path;

use anyhow::{Context, Result};

use super::mount::{engine, report};
use crate::cli::output::{is_json, print_detail};
use crate::config::Settings;
use crate::core::locate::{find_instsys, find_repository};
use crate::core::url::InstallUrl;

/// Execute the find-repo command
pub fn execute_repo(settings: &Settings, text: &str, dir: Option<&Path>) -> Result<()> {
    let mut url = InstallUrl::parse(text);
    let mut engine = engine(settings);

    let instsys = find_repository(&mut engine, settings, &mut url, dir)
        .with_context(|| format!("No repository found at {text}"))?;
    report(&url)?;

    if let Some(instsys) = instsys {
        if !is_json() {
            let place = instsys
                .mount
                .as_ref()
                .map_or_else(|| "not mounted".to_string(), |m| m.display().to_string());
            print_detail("instsys", &format!("{instsys} ({place})"));
        }
    }
    Ok(())
}

/// Execute the find-instsys command
pub fn execute_instsys(settings: &Settings, text: &str, dir: Option<&Path>) -> Result<()> {
    let mut url = InstallUrl::parse(text);
    let mut engine = engine(settings);

    find_instsys(&mut engine, settings, &mut url, dir)
        .with_context(|| format!("No install system found at {text}"))?;
    report(&url)
}
