//! System collaborators
//!
//! Traits for everything the mount engine asks of the running system, and
//! implementations that shell out to the usual tools (`mount`, `blkid`,
//! `modprobe`, `ip`, `dhcpcd`). Tests substitute fakes.

use std::fs;
use std::io::Write as _;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::path::Path;
use std::process::{Command, Output};

use crate::core::url::ResolvedServer;
use crate::error::{MountError, NetError};

/// Filesystem type of a device or image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsType {
    pub name: String,
    /// Kernel module providing the filesystem, if any
    pub module: Option<String>,
}

/// Kind of node at an access path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Block,
    Directory,
    Other,
}

/// Kind of the node at `path`, following symlinks
pub fn file_kind(path: &Path) -> Option<FileKind> {
    use std::os::unix::fs::FileTypeExt;

    let file_type = fs::metadata(path).ok()?.file_type();
    Some(if file_type.is_file() {
        FileKind::Regular
    } else if file_type.is_block_device() {
        FileKind::Block
    } else if file_type.is_dir() {
        FileKind::Directory
    } else {
        FileKind::Other
    })
}

/// Mount and unmount, always read-only
pub trait Mounter {
    fn mount_readonly(&mut self, source: &Path, target: &Path) -> Result<(), MountError>;

    /// Unmount `target`; an unmounted target is not an error
    fn unmount(&mut self, target: &Path) -> Result<(), MountError>;
}

/// Filesystem detection
pub trait FsProbe {
    /// Filesystem found on a device node or image file
    fn fs_type(&self, source: &Path) -> Option<FsType>;

    fn file_kind(&self, path: &Path) -> Option<FileKind> {
        file_kind(path)
    }

    /// `path` holds a filesystem image the kernel can mount as is
    fn is_mountable(&self, path: &Path) -> bool {
        self.fs_type(path).is_some_and(|fs| fs.name != "swap")
    }
}

/// Kernel module loading
pub trait ModuleLoader {
    fn load(&mut self, module: &str) -> Result<(), MountError>;
}

/// Address negotiation protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseProtocol {
    Dhcp,
    Bootp,
}

impl std::fmt::Display for LeaseProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Dhcp => "DHCP",
            Self::Bootp => "BOOTP",
        })
    }
}

/// Interface addressing, from static settings or a lease
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IfaceConfig {
    pub address: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
    pub broadcast: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub nameservers: Vec<Ipv4Addr>,
}

impl IfaceConfig {
    /// Address, netmask and broadcast are all known
    pub fn is_complete(&self) -> bool {
        self.address.is_some() && self.netmask.is_some() && self.broadcast.is_some()
    }

    /// Broadcast address derived from address and netmask
    pub fn derived_broadcast(&self) -> Option<Ipv4Addr> {
        let address = u32::from(self.address?);
        let netmask = u32::from(self.netmask?);
        Some(Ipv4Addr::from(address | !netmask))
    }

    /// `addr` lies in the local subnet
    pub fn is_local(&self, addr: Ipv4Addr) -> Option<bool> {
        let address = u32::from(self.address?);
        let netmask = u32::from(self.netmask?);
        Some(address & netmask == u32::from(addr) & netmask)
    }
}

/// Credentials for an SMB mount
#[derive(Debug, Clone, Default)]
pub struct SmbCredentials<'a> {
    pub user: Option<&'a str>,
    pub password: Option<&'a str>,
    pub domain: Option<&'a str>,
}

/// Network primitives
pub trait NetworkBackend {
    /// Tear down the configuration of `device`
    fn stop(&mut self, device: &str) -> Result<(), NetError>;

    /// Associate a wireless interface
    fn wlan_setup(&mut self, device: &str) -> Result<(), NetError>;

    /// Ask for an address; fields the server did not supply stay `None`
    fn request_lease(&mut self, device: &str, protocol: LeaseProtocol) -> IfaceConfig;

    /// Apply `config` to `device` and bring it up
    fn activate(&mut self, device: &str, config: &IfaceConfig) -> Result<(), NetError>;

    fn resolve(&mut self, server: &str) -> Option<IpAddr>;

    /// Ask the user for transport credentials
    fn prompt_credentials(&mut self, _device: &str) {}

    fn mount_nfs(
        &mut self,
        target: &Path,
        server: &ResolvedServer,
        path: &str,
    ) -> Result<(), MountError>;

    fn mount_smb(
        &mut self,
        target: &Path,
        server: &ResolvedServer,
        share: &str,
        credentials: &SmbCredentials<'_>,
    ) -> Result<(), MountError>;
}

/// Run `program`, failing when it cannot be started
fn run(program: &str, args: &[&str]) -> Result<Output, MountError> {
    tracing::debug!(program, ?args, "run");
    Command::new(program)
        .args(args)
        .output()
        .map_err(|e| MountError::Spawn {
            program: program.to_string(),
            error: e.to_string(),
        })
}

fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Classify a failed mount helper by its message
fn mount_failure(source: &str, target: &Path, output: &Output) -> MountError {
    let message = stderr_text(output);
    let lower = message.to_lowercase();
    if lower.contains("no such file or directory") {
        MountError::NotFound {
            source_path: source.to_string(),
        }
    } else if lower.contains("not a directory") {
        MountError::NotADirectory {
            source_path: source.to_string(),
        }
    } else {
        MountError::Failed {
            source_path: source.to_string(),
            target: target.to_path_buf(),
            message,
        }
    }
}

/// `mount`/`umount` from util-linux
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandMounter;

impl Mounter for CommandMounter {
    fn mount_readonly(&mut self, source: &Path, target: &Path) -> Result<(), MountError> {
        let options = match fs::metadata(source) {
            Ok(meta) if meta.is_dir() => "bind,ro",
            Ok(meta) if meta.is_file() => "loop,ro",
            _ => "ro",
        };
        let source_str = source.to_string_lossy();
        let target_str = target.to_string_lossy();

        let output = run("mount", &["-o", options, &source_str, &target_str])?;
        if output.status.success() {
            tracing::info!(source = %source.display(), target = %target.display(), "mounted");
            Ok(())
        } else {
            Err(mount_failure(&source_str, target, &output))
        }
    }

    fn unmount(&mut self, target: &Path) -> Result<(), MountError> {
        let output = run("umount", &[&target.to_string_lossy()])?;
        if output.status.success() {
            tracing::debug!(target = %target.display(), "unmounted");
            return Ok(());
        }
        let message = stderr_text(&output);
        if message.contains("not mounted") || message.contains("no mount point") {
            return Ok(());
        }
        Err(MountError::Unmount {
            target: target.to_path_buf(),
            message,
        })
    }
}

/// Filesystem types whose driver lives in a module of another name
const FS_MODULES: &[(&str, &str)] = &[
    ("iso9660", "isofs"),
    ("vfat", "vfat"),
    ("msdos", "msdos"),
    ("ext2", "ext2"),
    ("ext3", "ext4"),
    ("ext4", "ext4"),
    ("xfs", "xfs"),
    ("btrfs", "btrfs"),
    ("udf", "udf"),
    ("squashfs", "squashfs"),
    ("cramfs", "cramfs"),
    ("ntfs", "ntfs3"),
    ("exfat", "exfat"),
];

/// `blkid` backed probe
#[derive(Debug, Default, Clone, Copy)]
pub struct BlkidProbe;

impl FsProbe for BlkidProbe {
    fn fs_type(&self, source: &Path) -> Option<FsType> {
        let output = run(
            "blkid",
            &["-o", "value", "-s", "TYPE", &source.to_string_lossy()],
        )
        .ok()?;
        if !output.status.success() {
            return None;
        }
        let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if name.is_empty() {
            return None;
        }
        let module = FS_MODULES
            .iter()
            .find(|(fs, _)| *fs == name)
            .map(|(_, module)| (*module).to_string());
        Some(FsType { name, module })
    }
}

/// `modprobe` backed loader
#[derive(Debug, Default, Clone, Copy)]
pub struct Modprobe;

impl ModuleLoader for Modprobe {
    fn load(&mut self, module: &str) -> Result<(), MountError> {
        let output = run("modprobe", &[module])?;
        if output.status.success() {
            Ok(())
        } else {
            Err(MountError::Spawn {
                program: format!("modprobe {module}"),
                error: stderr_text(&output),
            })
        }
    }
}

/// Parse `key=value` lines as printed by lease helpers (`dhcpcd -T`, `bootpc`)
pub fn parse_lease(text: &str) -> IfaceConfig {
    let mut config = IfaceConfig::default();

    for line in text.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim_matches(|c| c == '\'' || c == '"');
        let first = || value.split_whitespace().next().and_then(|v| v.parse().ok());

        match key {
            "new_ip_address" | "IPADDR" => config.address = first(),
            "new_subnet_mask" | "NETMASK" => config.netmask = first(),
            "new_broadcast_address" | "BROADCAST" => config.broadcast = first(),
            "new_routers" | "GATEWAYS" => config.gateway = first(),
            "new_domain_name_servers" | "DNSSRVS" => {
                config.nameservers = value
                    .split_whitespace()
                    .filter_map(|v| v.parse().ok())
                    .collect();
            }
            _ => {}
        }
    }

    config
}

/// Network backend driving `ip`, `dhcpcd`/`bootpc` and the mount helpers
#[derive(Debug, Default, Clone)]
pub struct CommandBackend;

impl CommandBackend {
    fn ip(args: &[&str]) -> Result<(), String> {
        let output = run("ip", args).map_err(|e| e.to_string())?;
        if output.status.success() {
            Ok(())
        } else {
            Err(stderr_text(&output))
        }
    }
}

impl NetworkBackend for CommandBackend {
    fn stop(&mut self, device: &str) -> Result<(), NetError> {
        Self::ip(&["addr", "flush", "dev", device])
            .and_then(|()| Self::ip(&["link", "set", device, "down"]))
            .map_err(|error| NetError::Activation {
                device: device.to_string(),
                error,
            })
    }

    fn wlan_setup(&mut self, device: &str) -> Result<(), NetError> {
        let wlan_error = |error: String| NetError::Wlan {
            device: device.to_string(),
            error,
        };
        Self::ip(&["link", "set", device, "up"]).map_err(wlan_error)?;
        let output = run("iw", &["dev", device, "link"]).map_err(|e| wlan_error(e.to_string()))?;
        if String::from_utf8_lossy(&output.stdout).contains("Connected") {
            Ok(())
        } else {
            Err(wlan_error("not associated".to_string()))
        }
    }

    fn request_lease(&mut self, device: &str, protocol: LeaseProtocol) -> IfaceConfig {
        let output = match protocol {
            LeaseProtocol::Dhcp => run("dhcpcd", &["-4", "-T", "-t", "30", device]),
            LeaseProtocol::Bootp => run("bootpc", &["--dev", device, "--timeoutwait", "30"]),
        };
        match output {
            Ok(output) => parse_lease(&String::from_utf8_lossy(&output.stdout)),
            Err(e) => {
                tracing::warn!(device, %protocol, "lease request failed: {e}");
                IfaceConfig::default()
            }
        }
    }

    fn activate(&mut self, device: &str, config: &IfaceConfig) -> Result<(), NetError> {
        let activation_error = |error: String| NetError::Activation {
            device: device.to_string(),
            error,
        };

        if let (Some(address), Some(netmask)) = (config.address, config.netmask) {
            let prefix = u32::from(netmask).count_ones();
            let mut args = vec![
                "addr".to_string(),
                "add".to_string(),
                format!("{address}/{prefix}"),
            ];
            if let Some(broadcast) = config.broadcast.or_else(|| config.derived_broadcast()) {
                args.extend(["broadcast".to_string(), broadcast.to_string()]);
            }
            args.extend(["dev".to_string(), device.to_string()]);
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            Self::ip(&args).map_err(activation_error)?;
        }

        Self::ip(&["link", "set", device, "up"]).map_err(activation_error)?;

        if let Some(gateway) = config.gateway {
            Self::ip(&["route", "replace", "default", "via", &gateway.to_string()])
                .map_err(activation_error)?;
        }

        if !config.nameservers.is_empty() {
            let mut resolv = fs::File::create("/etc/resolv.conf")
                .map_err(|e| activation_error(e.to_string()))?;
            for ns in &config.nameservers {
                writeln!(resolv, "nameserver {ns}").map_err(|e| activation_error(e.to_string()))?;
            }
        }

        Ok(())
    }

    fn resolve(&mut self, server: &str) -> Option<IpAddr> {
        if let Ok(addr) = server.parse() {
            return Some(addr);
        }
        (server, 0)
            .to_socket_addrs()
            .ok()?
            .next()
            .map(|addr| addr.ip())
    }

    fn mount_nfs(
        &mut self,
        target: &Path,
        server: &ResolvedServer,
        path: &str,
    ) -> Result<(), MountError> {
        let host = server
            .addr
            .map_or_else(|| server.name.clone(), |addr| addr.to_string());
        let source = format!("{host}:{path}");
        let output = run(
            "mount",
            &["-t", "nfs", "-o", "ro,nolock", &source, &target.to_string_lossy()],
        )?;
        if output.status.success() {
            Ok(())
        } else {
            Err(mount_failure(&source, target, &output))
        }
    }

    fn mount_smb(
        &mut self,
        target: &Path,
        server: &ResolvedServer,
        share: &str,
        credentials: &SmbCredentials<'_>,
    ) -> Result<(), MountError> {
        let host = server
            .addr
            .map_or_else(|| server.name.clone(), |addr| addr.to_string());
        let source = format!("//{host}/{share}");

        let mut options = vec!["ro".to_string()];
        match credentials.user {
            Some(user) => {
                options.push(format!("username={user}"));
                options.push(format!("password={}", credentials.password.unwrap_or("")));
            }
            None => options.push("guest".to_string()),
        }
        if let Some(domain) = credentials.domain {
            options.push(format!("domain={domain}"));
        }
        let options = options.join(",");

        let output = run(
            "mount",
            &["-t", "cifs", "-o", &options, &source, &target.to_string_lossy()],
        )?;
        if output.status.success() {
            Ok(())
        } else {
            Err(mount_failure(&source, target, &output))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dhcpcd_lease() {
        let lease = parse_lease(
            "new_ip_address='192.168.1.50'\n\
             new_subnet_mask='255.255.255.0'\n\
             new_broadcast_address='192.168.1.255'\n\
             new_routers='192.168.1.1 192.168.1.2'\n\
             new_domain_name_servers='192.168.1.1 8.8.8.8'\n\
             new_domain_name='example.org'\n",
        );
        assert_eq!(lease.address, Some(Ipv4Addr::new(192, 168, 1, 50)));
        assert_eq!(lease.gateway, Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(lease.nameservers.len(), 2);
        assert!(lease.is_complete());
    }

    #[test]
    fn test_parse_bootpc_lease_incomplete() {
        let lease = parse_lease("IPADDR='10.0.0.7'\nNETMASK='255.0.0.0'\n");
        assert_eq!(lease.address, Some(Ipv4Addr::new(10, 0, 0, 7)));
        assert!(!lease.is_complete());
        assert_eq!(lease.derived_broadcast(), Some(Ipv4Addr::new(10, 255, 255, 255)));
    }

    #[test]
    fn test_is_local() {
        let config = IfaceConfig {
            address: Some(Ipv4Addr::new(10, 1, 2, 3)),
            netmask: Some(Ipv4Addr::new(255, 255, 0, 0)),
            ..IfaceConfig::default()
        };
        assert_eq!(config.is_local(Ipv4Addr::new(10, 1, 200, 1)), Some(true));
        assert_eq!(config.is_local(Ipv4Addr::new(10, 2, 0, 1)), Some(false));
        assert_eq!(IfaceConfig::default().is_local(Ipv4Addr::LOCALHOST), None);
    }

    #[test]
    fn test_mount_failure_classification() {
        use std::os::unix::process::ExitStatusExt;

        let output = |stderr: &str| Output {
            status: std::process::ExitStatus::from_raw(32 << 8),
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        };
        let target = Path::new("/mnt");

        assert!(matches!(
            mount_failure("srv:/x", target, &output("mount.nfs: No such file or directory")),
            MountError::NotFound { .. }
        ));
        assert!(matches!(
            mount_failure("srv:/x", target, &output("Not a directory")),
            MountError::NotADirectory { .. }
        ));
        assert!(matches!(
            mount_failure("srv:/x", target, &output("access denied by server")),
            MountError::Failed { .. }
        ));
    }

    #[test]
    fn test_file_kind() {
        let temp = tempfile::TempDir::new().unwrap();
        let file = temp.path().join("f");
        fs::write(&file, b"x").unwrap();

        assert_eq!(BlkidProbe.file_kind(temp.path()), Some(FileKind::Directory));
        assert_eq!(BlkidProbe.file_kind(&file), Some(FileKind::Regular));
        assert_eq!(BlkidProbe.file_kind(&temp.path().join("missing")), None);
    }
}
