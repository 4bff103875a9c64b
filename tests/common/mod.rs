//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests: a scratch
//! tree for source files, a way to run the binary, and collaborators that
//! let the mount engine run without touching the host.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::rc::Rc;

use tempfile::TempDir;

use insturl::config::settings::NetSettings;
use insturl::core::mount::MountEngine;
use insturl::core::url::ResolvedServer;
use insturl::error::{MountError, NetError};
use insturl::infra::devices::{Device, DeviceClass, DeviceRegistry};
use insturl::infra::net::NetworkSession;
use insturl::infra::scratch::ScratchSpace;
use insturl::infra::system::{
    FsProbe, FsType, IfaceConfig, LeaseProtocol, ModuleLoader, Mounter, NetworkBackend,
    SmbCredentials,
};

/// Temporary directory holding source files, mountpoints and scratch files
pub struct TestTree {
    /// Temporary directory for the test
    pub dir: TempDir,
}

impl TestTree {
    /// Create a new tree in a temporary directory
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Get the path to the tree
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Create a file in the tree
    pub fn create_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }

    /// Create a directory in the tree
    pub fn create_dir(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(&path).expect("Failed to create directory");
        path
    }

    /// Read a file from the tree
    pub fn read_file(&self, name: &str) -> Vec<u8> {
        std::fs::read(self.dir.path().join(name)).expect("Failed to read file")
    }

    /// Run the insturl binary with settings read from this tree
    pub fn run(&self, args: &[&str]) -> Output {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_insturl"));
        cmd.current_dir(self.path());
        cmd.env("INSTURL_CONFIG", self.path().join("insturl.toml"));
        cmd.env_remove("RUST_LOG");
        cmd.args(args);
        cmd.output().expect("Failed to execute insturl")
    }
}

impl Default for TestTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry with fixed devices
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    pub block: Vec<Device>,
    pub network: Vec<Device>,
}

impl DeviceRegistry for StaticRegistry {
    fn list(&mut self, class: DeviceClass) -> Vec<Device> {
        match class {
            DeviceClass::Network => self.network.clone(),
            _ => self.block.clone(),
        }
    }
}

/// Mounter recording `mount <source> <target>` lines instead of mounting
#[derive(Debug, Clone, Default)]
pub struct RecordingMounter {
    pub log: Rc<RefCell<Vec<String>>>,
}

impl Mounter for RecordingMounter {
    fn mount_readonly(&mut self, source: &Path, target: &Path) -> Result<(), MountError> {
        self.log
            .borrow_mut()
            .push(format!("mount {} {}", source.display(), target.display()));
        Ok(())
    }

    fn unmount(&mut self, target: &Path) -> Result<(), MountError> {
        self.log
            .borrow_mut()
            .push(format!("umount {}", target.display()));
        Ok(())
    }
}

/// Probe knowing filesystems by file name
#[derive(Debug, Clone, Default)]
pub struct NamedProbe {
    pub fs_types: HashMap<String, String>,
}

impl FsProbe for NamedProbe {
    fn fs_type(&self, source: &Path) -> Option<FsType> {
        let name = source.file_name()?.to_string_lossy();
        self.fs_types.get(name.as_ref()).map(|fs| FsType {
            name: fs.clone(),
            module: None,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoModules;

impl ModuleLoader for NoModules {
    fn load(&mut self, _module: &str) -> Result<(), MountError> {
        Ok(())
    }
}

/// Backend for a loopback-only test network
///
/// Every request gets a 127.0.0.0/8 lease; names resolve to 127.0.0.1.
#[derive(Debug, Clone, Default)]
pub struct LoopbackBackend;

impl NetworkBackend for LoopbackBackend {
    fn stop(&mut self, _device: &str) -> Result<(), NetError> {
        Ok(())
    }

    fn wlan_setup(&mut self, _device: &str) -> Result<(), NetError> {
        Ok(())
    }

    fn request_lease(&mut self, _device: &str, _protocol: LeaseProtocol) -> IfaceConfig {
        IfaceConfig {
            address: Some("127.0.0.2".parse().unwrap()),
            netmask: Some("255.0.0.0".parse().unwrap()),
            broadcast: Some("127.255.255.255".parse().unwrap()),
            ..IfaceConfig::default()
        }
    }

    fn activate(&mut self, _device: &str, _config: &IfaceConfig) -> Result<(), NetError> {
        Ok(())
    }

    fn resolve(&mut self, server: &str) -> Option<IpAddr> {
        server
            .parse()
            .ok()
            .or_else(|| Some("127.0.0.1".parse().unwrap()))
    }

    fn mount_nfs(
        &mut self,
        _target: &Path,
        _server: &ResolvedServer,
        path: &str,
    ) -> Result<(), MountError> {
        Err(MountError::NotFound {
            source_path: path.to_string(),
        })
    }

    fn mount_smb(
        &mut self,
        _target: &Path,
        _server: &ResolvedServer,
        share: &str,
        _credentials: &SmbCredentials<'_>,
    ) -> Result<(), MountError> {
        Err(MountError::NotFound {
            source_path: share.to_string(),
        })
    }
}

/// Engine wired to the collaborators above, scratch space inside `tree`
pub fn engine(
    tree: &TestTree,
    registry: StaticRegistry,
    probe: NamedProbe,
) -> (MountEngine, Rc<RefCell<Vec<String>>>) {
    let mounter = RecordingMounter::default();
    let log = mounter.log.clone();
    let engine = MountEngine::new(
        Box::new(registry),
        Box::new(mounter),
        Box::new(probe),
        Box::new(NoModules),
        NetworkSession::new(Box::new(LoopbackBackend), NetSettings::default()),
        ScratchSpace::new(tree.path().join("mnt"), tree.path().join("dl")),
    );
    (engine, log)
}

/// Network device entry
pub fn nic(name: &str) -> Device {
    Device {
        name: name.to_string(),
        hwaddr: Some("52:54:00:12:34:56".to_string()),
        ..Device::default()
    }
}
