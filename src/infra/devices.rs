//! Device registry
//!
//! Lists candidate devices per class. [`SysfsRegistry`] reads them from
//! `/sys/class/block`, `/sys/class/net` and the `/dev/disk/by-*` links.

use std::fs;
use std::path::{Path, PathBuf};

/// Device classes the mount engine asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    /// Any block device
    Block,
    Cdrom,
    Floppy,
    /// Network interfaces
    Network,
}

/// One registry entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Device {
    /// Device node (`/dev/sda1`) or interface name (`eth0`)
    pub name: String,
    /// Other names for the same device (`/dev/disk/by-id/...`)
    pub alt_names: Vec<String>,
    pub hwaddr: Option<String>,
    pub model: Option<String>,
    /// Whole disk with partitions of its own
    pub has_children: bool,
    pub cdrom: bool,
    pub floppy: bool,
    pub wlan: bool,
}

impl Device {
    /// Does the user supplied `hint` name this device?
    ///
    /// A hint matches the short device name, the hardware address, any
    /// alternate name, or, ending in `*`, a prefix of the short name.
    pub fn matches_hint(&self, hint: &str) -> bool {
        let short = crate::core::url::short_dev(&self.name);
        if short == hint {
            return true;
        }
        if let Some(prefix) = hint.strip_suffix('*') {
            if short.starts_with(prefix) {
                return true;
            }
        }
        if self
            .hwaddr
            .as_deref()
            .is_some_and(|hw| hw.eq_ignore_ascii_case(hint))
        {
            return true;
        }
        let long = crate::core::url::long_dev(hint);
        self.alt_names.iter().any(|name| *name == long)
    }
}

/// Source of candidate devices
pub trait DeviceRegistry {
    /// Current devices of `class`, freshly scanned
    fn list(&mut self, class: DeviceClass) -> Vec<Device>;
}

/// Registry backed by sysfs
#[derive(Debug, Clone)]
pub struct SysfsRegistry {
    sys: PathBuf,
    dev: PathBuf,
}

impl Default for SysfsRegistry {
    fn default() -> Self {
        Self::with_roots("/sys", "/dev")
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn sorted_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

impl SysfsRegistry {
    /// Registry reading from alternative sysfs and dev roots
    pub fn with_roots(sys: impl Into<PathBuf>, dev: impl Into<PathBuf>) -> Self {
        Self {
            sys: sys.into(),
            dev: dev.into(),
        }
    }

    /// `/dev/disk/by-*` links grouped by the node they point to
    fn alt_names(&self, node: &str) -> Vec<String> {
        let mut names = Vec::new();
        let disk = self.dev.join("disk");
        for kind in sorted_entries(&disk) {
            let dir = disk.join(&kind);
            for link in sorted_entries(&dir) {
                let path = dir.join(&link);
                let Ok(target) = fs::read_link(&path) else {
                    continue;
                };
                if target.file_name().is_some_and(|t| t.to_string_lossy() == node) {
                    names.push(format!("/dev/disk/{kind}/{link}"));
                }
            }
        }
        names
    }

    fn block_devices(&self) -> Vec<Device> {
        let class = self.sys.join("class/block");
        sorted_entries(&class)
            .into_iter()
            .filter(|name| !name.starts_with("loop") && !name.starts_with("ram"))
            .map(|name| {
                let dir = class.join(&name);
                let has_children = sorted_entries(&dir)
                    .iter()
                    .any(|entry| entry.starts_with(&name) && dir.join(entry).join("partition").exists());
                let scsi_type = read_trimmed(&dir.join("device/type"));
                Device {
                    alt_names: self.alt_names(&name),
                    model: read_trimmed(&dir.join("device/model")),
                    has_children,
                    cdrom: name.starts_with("sr") || scsi_type.as_deref() == Some("5"),
                    floppy: name.starts_with("fd"),
                    name: format!("/dev/{name}"),
                    ..Device::default()
                }
            })
            .collect()
    }

    fn network_devices(&self) -> Vec<Device> {
        let class = self.sys.join("class/net");
        sorted_entries(&class)
            .into_iter()
            .map(|name| {
                let dir = class.join(&name);
                Device {
                    hwaddr: read_trimmed(&dir.join("address")),
                    model: read_trimmed(&dir.join("device/uevent"))
                        .and_then(|uevent| {
                            uevent
                                .lines()
                                .find_map(|l| l.strip_prefix("DRIVER=").map(str::to_string))
                        }),
                    wlan: dir.join("wireless").exists() || dir.join("phy80211").exists(),
                    name,
                    ..Device::default()
                }
            })
            .collect()
    }
}

impl DeviceRegistry for SysfsRegistry {
    fn list(&mut self, class: DeviceClass) -> Vec<Device> {
        let devices = match class {
            DeviceClass::Network => self.network_devices(),
            DeviceClass::Block => self.block_devices(),
            DeviceClass::Cdrom => self.block_devices().into_iter().filter(|d| d.cdrom).collect(),
            DeviceClass::Floppy => self
                .block_devices()
                .into_iter()
                .filter(|d| d.floppy)
                .collect(),
        };
        tracing::debug!(?class, count = devices.len(), "device list");
        devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_sys() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let mk = |p: &str| fs::create_dir_all(root.join(p)).unwrap();
        let put = |p: &str, text: &str| fs::write(root.join(p), text).unwrap();

        mk("sys/class/block/sda/sda1");
        put("sys/class/block/sda/sda1/partition", "1\n");
        mk("sys/class/block/sda/device");
        put("sys/class/block/sda/device/model", "VBOX HARDDISK   \n");
        mk("sys/class/block/sda1");
        put("sys/class/block/sda1/partition", "1\n");
        mk("sys/class/block/sr0/device");
        put("sys/class/block/sr0/device/type", "5\n");
        mk("sys/class/block/loop0");

        mk("sys/class/net/eth0/device");
        put("sys/class/net/eth0/address", "52:54:00:AB:CD:EF\n");
        put("sys/class/net/eth0/device/uevent", "DRIVER=e1000\nPCI_ID=8086:100E\n");
        mk("sys/class/net/wlan0/wireless");
        put("sys/class/net/wlan0/address", "00:11:22:33:44:55\n");

        mk("dev/disk/by-label");
        std::os::unix::fs::symlink("../../sda1", root.join("dev/disk/by-label/INSTALL")).unwrap();
        temp
    }

    #[test]
    fn test_block_devices() {
        let temp = fake_sys();
        let mut registry =
            SysfsRegistry::with_roots(temp.path().join("sys"), temp.path().join("dev"));

        let block = registry.list(DeviceClass::Block);
        let names: Vec<_> = block.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["/dev/sda", "/dev/sda1", "/dev/sr0"]);
        assert!(block[0].has_children);
        assert_eq!(block[0].model.as_deref(), Some("VBOX HARDDISK"));
        assert!(!block[1].has_children);
        assert_eq!(block[1].alt_names, ["/dev/disk/by-label/INSTALL"]);
        assert!(block[2].cdrom);

        let cdrom = registry.list(DeviceClass::Cdrom);
        assert_eq!(cdrom.len(), 1);
        assert_eq!(cdrom[0].name, "/dev/sr0");
    }

    #[test]
    fn test_network_devices() {
        let temp = fake_sys();
        let mut registry =
            SysfsRegistry::with_roots(temp.path().join("sys"), temp.path().join("dev"));

        let net = registry.list(DeviceClass::Network);
        assert_eq!(net.len(), 2);
        assert_eq!(net[0].name, "eth0");
        assert_eq!(net[0].model.as_deref(), Some("e1000"));
        assert!(!net[0].wlan);
        assert!(net[1].wlan);
    }

    #[test]
    fn test_hint_matching() {
        let dev = Device {
            name: "/dev/sda1".into(),
            alt_names: vec!["/dev/disk/by-label/INSTALL".into()],
            hwaddr: Some("52:54:00:AB:CD:EF".into()),
            ..Device::default()
        };
        assert!(dev.matches_hint("sda1"));
        assert!(dev.matches_hint("sd*"));
        assert!(dev.matches_hint("52:54:00:ab:cd:ef"));
        assert!(dev.matches_hint("disk/by-label/INSTALL"));
        assert!(!dev.matches_hint("sdb1"));
        assert!(!dev.matches_hint("eth*"));
    }
}
