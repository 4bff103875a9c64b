//! CLI implementation for `insturl parse`
//!
//! Shows how an address is understood without touching any device.

use anyhow::Result;

use crate::cli::output::{is_json, print_detail};
use crate::core::url::InstallUrl;

/// Execute the parse command
pub fn execute(text: &str) -> Result<()> {
    let url = InstallUrl::parse(text);

    if is_json() {
        let mut json = serde_json::to_value(&url)?;
        if let Some(fields) = json.as_object_mut() {
            fields.insert("url".into(), url.to_string().into());
        }
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    println!("{url}");
    let fields = [
        ("scheme", url.scheme.map(|s| s.to_string())),
        ("server", url.server.clone()),
        ("port", url.port.map(|p| p.to_string())),
        ("domain", url.domain.clone()),
        ("user", url.user.clone()),
        ("password", url.password.as_ref().map(|_| "***".to_string())),
        ("share", url.share.clone()),
        ("path", url.path.clone()),
        ("device", url.device.clone()),
        ("instsys", url.instsys.clone()),
        ("proxy", url.proxy.clone()),
    ];
    for (label, value) in fields {
        if let Some(value) = value {
            print_detail(label, &value);
        }
    }
    for param in &url.query {
        print_detail("query", &format!("{}={}", param.key, param.value.as_deref().unwrap_or("")));
    }

    let mut flags = Vec::new();
    if url.is.mountable {
        flags.push("mountable");
    }
    if url.is.network {
        flags.push("network");
    }
    if url.is.optical {
        flags.push("optical");
    }
    if !flags.is_empty() {
        print_detail("is", &flags.join(", "));
    }

    Ok(())
}
