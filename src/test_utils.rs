//! Test utilities
//!
//! Generators for property-based tests and fake system collaborators for
//! exercising the mount engine without touching the host.

#[cfg(test)]
pub mod generators {
    use proptest::prelude::*;

    /// Generate a server name
    pub fn hostname() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9]{0,8}"
    }

    /// Generate an absolute path of up to four segments (or nothing)
    pub fn url_path() -> impl Strategy<Value = String> {
        "(/[a-z0-9._-]{1,8}){0,4}"
    }

    /// Generate a network interface or partition name
    pub fn device_name() -> impl Strategy<Value = String> {
        "(eth[0-9]|sd[a-c][1-3])"
    }
}

#[cfg(test)]
pub mod fakes {
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};
    use std::rc::Rc;

    use tempfile::TempDir;

    use crate::config::settings::NetSettings;
    use crate::core::mount::MountEngine;
    use crate::error::MountError;
    use crate::infra::devices::{Device, DeviceClass, DeviceRegistry};
    use crate::infra::net::tests::FakeBackend;
    use crate::infra::net::NetworkSession;
    use crate::infra::scratch::ScratchSpace;
    use crate::infra::system::{self, FileKind, FsProbe, FsType, ModuleLoader, Mounter};

    /// Fixed device lists per class
    #[derive(Debug, Clone, Default)]
    pub struct FakeRegistry {
        pub block: Vec<Device>,
        pub cdrom: Vec<Device>,
        pub floppy: Vec<Device>,
        pub network: Vec<Device>,
    }

    impl DeviceRegistry for FakeRegistry {
        fn list(&mut self, class: DeviceClass) -> Vec<Device> {
            match class {
                DeviceClass::Block => self.block.clone(),
                DeviceClass::Cdrom => self.cdrom.clone(),
                DeviceClass::Floppy => self.floppy.clone(),
                DeviceClass::Network => self.network.clone(),
            }
        }
    }

    /// What the fake mounter has done so far
    #[derive(Debug, Default)]
    pub struct MountState {
        /// `mount <source> <target>` / `umount <target>` lines
        pub log: Vec<String>,
        pub mounted: HashSet<PathBuf>,
    }

    impl MountState {
        pub fn is_mounted(&self, target: &Path) -> bool {
            self.mounted.contains(target)
        }
    }

    /// Mounter that only keeps books
    #[derive(Debug, Clone, Default)]
    pub struct FakeMounter {
        pub state: Rc<RefCell<MountState>>,
        /// Fail every mount
        pub fail_all: bool,
        /// Sources whose mount fails
        pub fail: Vec<PathBuf>,
    }

    impl Mounter for FakeMounter {
        fn mount_readonly(&mut self, source: &Path, target: &Path) -> Result<(), MountError> {
            if self.fail_all || self.fail.iter().any(|f| f == source) {
                return Err(MountError::Failed {
                    source_path: source.display().to_string(),
                    target: target.to_path_buf(),
                    message: "wrong fs type".into(),
                });
            }
            let mut state = self.state.borrow_mut();
            state
                .log
                .push(format!("mount {} {}", source.display(), target.display()));
            state.mounted.insert(target.to_path_buf());
            Ok(())
        }

        fn unmount(&mut self, target: &Path) -> Result<(), MountError> {
            let mut state = self.state.borrow_mut();
            if state.mounted.remove(target) {
                state.log.push(format!("umount {}", target.display()));
            }
            Ok(())
        }
    }

    /// Entry for `path`: an exact key, or a relative key naming its tail
    fn lookup<'m, V>(map: &'m HashMap<PathBuf, V>, path: &Path) -> Option<&'m V> {
        map.iter()
            .find(|(key, _)| path == key.as_path() || (key.is_relative() && path.ends_with(key)))
            .map(|(_, value)| value)
    }

    /// Probe answering from tables; `/dev/*` nodes are block devices
    #[derive(Debug, Clone, Default)]
    pub struct FakeProbe {
        pub fs_types: HashMap<PathBuf, FsType>,
        pub kinds: HashMap<PathBuf, FileKind>,
        /// Paths whose filesystem was asked for, repeats collapsed
        pub probed: Rc<RefCell<Vec<String>>>,
    }

    impl FsProbe for FakeProbe {
        fn fs_type(&self, source: &Path) -> Option<FsType> {
            let name = source.display().to_string();
            let mut probed = self.probed.borrow_mut();
            if probed.last() != Some(&name) {
                probed.push(name);
            }
            lookup(&self.fs_types, source).cloned()
        }

        fn file_kind(&self, path: &Path) -> Option<FileKind> {
            if let Some(kind) = lookup(&self.kinds, path) {
                return Some(*kind);
            }
            if path.starts_with("/dev") {
                return Some(FileKind::Block);
            }
            system::file_kind(path)
        }
    }

    #[derive(Debug, Clone, Default)]
    pub struct FakeModules {
        pub loaded: Rc<RefCell<Vec<String>>>,
    }

    impl ModuleLoader for FakeModules {
        fn load(&mut self, module: &str) -> Result<(), MountError> {
            self.loaded.borrow_mut().push(module.to_string());
            Ok(())
        }
    }

    /// Engine wired to fakes, scratch space in a temp dir
    pub struct Harness {
        pub engine: MountEngine,
        /// Holds `mnt/` (mountpoints) and `dl/` (scratch files)
        pub temp: TempDir,
        pub mounts: Rc<RefCell<MountState>>,
        pub probed: Rc<RefCell<Vec<String>>>,
        pub loaded: Rc<RefCell<Vec<String>>>,
    }

    impl Harness {
        pub fn new(
            registry: FakeRegistry,
            mounter: FakeMounter,
            probe: FakeProbe,
            backend: FakeBackend,
        ) -> Self {
            Self::with_settings(registry, mounter, probe, backend, NetSettings::default())
        }

        pub fn with_settings(
            registry: FakeRegistry,
            mounter: FakeMounter,
            probe: FakeProbe,
            backend: FakeBackend,
            settings: NetSettings,
        ) -> Self {
            let temp = TempDir::new().unwrap();
            let mounts = mounter.state.clone();
            let probed = probe.probed.clone();
            let modules = FakeModules::default();
            let loaded = modules.loaded.clone();
            let engine = MountEngine::new(
                Box::new(registry),
                Box::new(mounter),
                Box::new(probe),
                Box::new(modules),
                NetworkSession::new(Box::new(backend), settings),
                ScratchSpace::new(temp.path().join("mnt"), temp.path().join("dl")),
            );
            Self {
                engine,
                temp,
                mounts,
                probed,
                loaded,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::generators::*;
    use crate::infra::system::{FileKind, FsProbe, Mounter};
    use proptest::prelude::*;
    use std::path::Path;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_hostname_generator(name in hostname()) {
            prop_assert!(!name.is_empty());
            prop_assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }

        #[test]
        fn test_url_path_generator(path in url_path()) {
            prop_assert!(path.is_empty() || path.starts_with('/'));
        }
    }

    #[test]
    fn test_fake_probe_suffix_lookup() {
        let mut probe = FakeProbe::default();
        probe.kinds.insert("image.iso".into(), FileKind::Regular);
        assert_eq!(
            probe.file_kind(Path::new("/mnt/x/image.iso")),
            Some(FileKind::Regular)
        );
        assert_eq!(probe.file_kind(Path::new("/dev/sda1")), Some(FileKind::Block));
        assert_eq!(probe.file_kind(Path::new("/no/such/file")), None);
    }

    #[test]
    fn test_fake_mounter_books() {
        let mut mounter = FakeMounter::default();
        mounter
            .mount_readonly(Path::new("/dev/sda1"), Path::new("/mnt/a"))
            .unwrap();
        assert!(mounter.state.borrow().is_mounted(Path::new("/mnt/a")));
        mounter.unmount(Path::new("/mnt/a")).unwrap();
        mounter.unmount(Path::new("/mnt/a")).unwrap();
        assert_eq!(
            mounter.state.borrow().log,
            ["mount /dev/sda1 /mnt/a", "umount /mnt/a"]
        );
    }
}
