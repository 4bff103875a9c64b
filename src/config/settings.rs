//! Installer settings
//!
//! Reads the resolver's settings from a TOML file. Every section and key is
//! optional; anything missing falls back to [`crate::config::defaults`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::config::defaults;
use crate::core::url::InstallUrl;
use crate::error::SettingsError;

/// Resolver settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Install-system settings
    #[serde(default)]
    pub instsys: InstsysSettings,

    /// Repository detection
    #[serde(default)]
    pub repository: RepositorySettings,

    /// Scratch locations
    #[serde(default)]
    pub scratch: ScratchSettings,

    /// Network configuration policy
    #[serde(default)]
    pub network: NetSettings,

    /// Fetch engine settings
    #[serde(default)]
    pub fetch: FetchSettings,
}

/// Install-system settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstsysSettings {
    /// Install-system address, usually relative to the repository
    pub url: Option<String>,

    /// Fixed mountpoint for the install-system image
    pub mountpoint: Option<PathBuf>,

    /// Always download instead of mounting in place
    #[serde(default)]
    pub download: bool,

    /// Rescue mode (implies download)
    #[serde(default)]
    pub rescue: bool,
}

/// Repository detection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositorySettings {
    /// Marker file that must exist in a repository
    pub marker: Option<String>,

    /// Local copy of the marker file
    pub marker_dest: Option<PathBuf>,
}

/// Scratch locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScratchSettings {
    /// Base directory for temporary mountpoints
    pub mount_dir: Option<PathBuf>,

    /// Base directory for staged images
    pub download_dir: Option<PathBuf>,
}

/// Network configuration policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetSettings {
    /// Use DHCP (true) or BOOTP (false)
    #[serde(default = "default_true")]
    pub use_dhcp: bool,

    /// Accept incomplete DHCP/BOOTP answers
    #[serde(default)]
    pub test_mode: bool,

    /// Static address
    pub address: Option<Ipv4Addr>,

    /// Static netmask
    pub netmask: Option<Ipv4Addr>,

    /// Default gateway
    pub gateway: Option<Ipv4Addr>,

    /// Name servers
    #[serde(default)]
    pub nameservers: Vec<Ipv4Addr>,
}

/// Fetch engine settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchSettings {
    /// Decompressor program
    pub decompressor: Option<String>,

    /// Decompressor arguments
    pub decompressor_args: Option<Vec<String>>,
}

fn default_true() -> bool {
    true
}

impl Default for NetSettings {
    fn default() -> Self {
        Self {
            use_dhcp: true,
            test_mode: false,
            address: None,
            netmask: None,
            gateway: None,
            nameservers: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings from `$INSTURL_CONFIG` or the user config directory
    ///
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self, SettingsError> {
        match Self::default_path() {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// Path the settings are read from when none is given explicitly
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(defaults::ENV_CONFIG) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        dirs::config_dir().map(|dir| dir.join(defaults::CONFIG_FILE_NAME))
    }

    /// Load settings from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| SettingsError::ReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| SettingsError::ParseError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Parse settings from TOML text
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Parsed install-system address, if one is configured
    pub fn instsys_url(&self) -> Result<Option<InstallUrl>, SettingsError> {
        match self.instsys.url.as_deref() {
            None => Ok(None),
            Some(text) => {
                let url = InstallUrl::parse(text);
                if url.scheme.is_none() {
                    return Err(SettingsError::InvalidInstsys {
                        url: text.to_string(),
                    });
                }
                Ok(Some(url))
            }
        }
    }

    /// Mountpoint used for the install-system image
    pub fn instsys_mountpoint(&self) -> PathBuf {
        self.instsys
            .mountpoint
            .clone()
            .unwrap_or_else(|| PathBuf::from(defaults::INSTSYS_MOUNTPOINT))
    }

    /// Download everything instead of mounting in place
    pub fn download_instsys(&self) -> bool {
        self.instsys.download || self.instsys.rescue
    }

    /// Repository marker file
    pub fn repository_marker(&self) -> &str {
        self.repository
            .marker
            .as_deref()
            .unwrap_or(defaults::REPOSITORY_MARKER)
    }

    /// Local copy of the repository marker file
    pub fn repository_marker_dest(&self) -> PathBuf {
        self.repository
            .marker_dest
            .clone()
            .unwrap_or_else(|| PathBuf::from(defaults::REPOSITORY_MARKER_DEST))
    }

    /// Base directory for temporary mountpoints
    pub fn mount_dir(&self) -> PathBuf {
        self.scratch
            .mount_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(defaults::MOUNT_DIR))
    }

    /// Base directory for staged images
    pub fn download_dir(&self) -> PathBuf {
        self.scratch
            .download_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(defaults::DOWNLOAD_DIR))
    }

    /// Decompressor command line
    pub fn decompressor(&self) -> (String, Vec<String>) {
        let program = self
            .fetch
            .decompressor
            .clone()
            .unwrap_or_else(|| defaults::DECOMPRESSOR.to_string());
        let args = self.fetch.decompressor_args.clone().unwrap_or_else(|| {
            defaults::DECOMPRESSOR_ARGS
                .iter()
                .map(ToString::to_string)
                .collect()
        });
        (program, args)
    }
}
