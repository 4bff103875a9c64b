//! CLI implementation for `insturl fetch`
//!
//! Downloads one resource to a local file, with a progress bar.

use std::path::Path;

use anyhow::{Context, Result};

use crate::cli::output::{create_load_bar, is_json, print_detail, print_success, update_load_bar};
use crate::config::Settings;
use crate::core::url::InstallUrl;
use crate::infra::fetch::{self, Decompressor, FetchOptions};

/// Execute the fetch command
pub fn execute(settings: &Settings, text: &str, dest: &Path, unzip: bool) -> Result<()> {
    let url = InstallUrl::parse(text);
    tracing::info!("loading {url} -> {}", dest.display());

    let decompressor = Decompressor::from_settings(settings);
    if unzip && !decompressor.is_available() {
        tracing::warn!("decompressor '{}' not found", decompressor.program);
    }

    let bar = create_load_bar(&url.to_string());
    let options = FetchOptions {
        unzip,
        ..FetchOptions::default()
    }
    .with_decompressor(decompressor)
    .with_progress(|progress| {
        update_load_bar(&bar, progress);
        std::ops::ControlFlow::Continue(())
    });

    let result = fetch::fetch(&url, dest, options);
    bar.abandon();
    let report = result
        .map_err(|e| anyhow::anyhow!("error {}: {e}", e.code()))
        .with_context(|| format!("Failed to load {url}"))?;

    if is_json() {
        let json = serde_json::json!({
            "url": url.to_string(),
            "dest": dest,
            "bytes_received": report.bytes_received,
            "bytes_written": report.bytes_written,
            "format": format!("{:?}", report.format).to_lowercase(),
            "original_name": report.original_name,
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    print_success(&format!("{} -> {}", url, dest.display()));
    print_detail("received", &report.bytes_received.to_string());
    print_detail("written", &report.bytes_written.to_string());
    if let Some(name) = &report.original_name {
        print_detail("name", name);
    }
    Ok(())
}
