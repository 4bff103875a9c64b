//! Network negotiation
//!
//! One [`NetworkSession`] owns the active interface configuration. Bringing
//! up a different device always tears the current one down first.

use std::net::IpAddr;
use std::path::Path;

use crate::config::settings::NetSettings;
use crate::core::url::ResolvedServer;
use crate::error::{MountError, NetError};
use crate::infra::system::{IfaceConfig, LeaseProtocol, NetworkBackend, SmbCredentials};

/// How the active interface got its address
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NetConfigured {
    #[default]
    None,
    Static,
    Dhcp,
    Bootp,
}

/// The process' network state
pub struct NetworkSession {
    backend: Box<dyn NetworkBackend>,
    settings: NetSettings,
    configured: NetConfigured,
    device: Option<String>,
    iface: IfaceConfig,
}

impl std::fmt::Debug for NetworkSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkSession")
            .field("configured", &self.configured)
            .field("device", &self.device)
            .field("iface", &self.iface)
            .finish_non_exhaustive()
    }
}

impl NetworkSession {
    pub fn new(backend: Box<dyn NetworkBackend>, settings: NetSettings) -> Self {
        Self {
            backend,
            settings,
            configured: NetConfigured::None,
            device: None,
            iface: IfaceConfig::default(),
        }
    }

    pub fn configured(&self) -> NetConfigured {
        self.configured
    }

    /// Interface currently configured
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    pub fn iface(&self) -> &IfaceConfig {
        &self.iface
    }

    /// Tear down the active configuration and forget it
    pub fn reset(&mut self) {
        if let Some(device) = self.device.take() {
            if let Err(e) = self.backend.stop(&device) {
                tracing::debug!(%device, "stop failed: {e}");
            }
        }
        self.configured = NetConfigured::None;
        self.iface = IfaceConfig::default();
    }

    fn static_config(&self) -> Option<IfaceConfig> {
        let address = self.settings.address?;
        let netmask = self.settings.netmask?;
        let mut config = IfaceConfig {
            address: Some(address),
            netmask: Some(netmask),
            broadcast: None,
            gateway: self.settings.gateway,
            nameservers: self.settings.nameservers.clone(),
        };
        config.broadcast = config.derived_broadcast();
        Some(config)
    }

    /// Configure `device` and check that `server` can be reached through it
    ///
    /// Returns `Ok(None)` without doing anything when `device` is already
    /// the configured interface; the caller resolves the server itself then.
    pub fn bring_up(
        &mut self,
        device: &str,
        wlan: bool,
        server: Option<&str>,
    ) -> Result<Option<ResolvedServer>, NetError> {
        if self.configured != NetConfigured::None && self.device.as_deref() == Some(device) {
            return Ok(None);
        }

        if device.starts_with("lo") || device.starts_with("sit") {
            return Err(NetError::PseudoDevice {
                device: device.to_string(),
            });
        }

        self.reset();
        tracing::info!(device, "interface setup");

        if wlan {
            self.backend.wlan_setup(device)?;
        }

        self.configured = NetConfigured::Static;
        let config = match self.static_config() {
            Some(config) => config,
            None => {
                let protocol = if self.settings.use_dhcp {
                    LeaseProtocol::Dhcp
                } else {
                    LeaseProtocol::Bootp
                };
                tracing::info!(device, %protocol, "sending request");

                let mut lease = self.backend.request_lease(device, protocol);
                if !self.settings.test_mode && !lease.is_complete() {
                    self.configured = NetConfigured::None;
                    return Err(NetError::IncompleteLease {
                        protocol: protocol.to_string(),
                        device: device.to_string(),
                    });
                }
                lease.gateway = lease.gateway.or(self.settings.gateway);
                if lease.nameservers.is_empty() {
                    lease.nameservers.clone_from(&self.settings.nameservers);
                }
                self.configured = match protocol {
                    LeaseProtocol::Dhcp => NetConfigured::Dhcp,
                    LeaseProtocol::Bootp => NetConfigured::Bootp,
                };
                lease
            }
        };

        if let Err(e) = self.backend.activate(device, &config) {
            self.configured = NetConfigured::None;
            return Err(e);
        }
        tracing::info!(device, "activated");

        self.device = Some(device.to_string());
        self.iface = config;

        self.backend.prompt_credentials(device);

        let resolved = match server {
            Some(server) => {
                let resolved = self.resolve_server(server);
                match resolved.and_then(|resolved| self.check_reachable(resolved, device)) {
                    Ok(resolved) => Some(resolved),
                    Err(e) => {
                        self.reset();
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        tracing::info!(
            device,
            address = ?self.iface.address,
            netmask = ?self.iface.netmask,
            gateway = ?self.iface.gateway,
            nameservers = ?self.iface.nameservers,
            "network configured"
        );

        Ok(resolved)
    }

    /// Resolve a server name through the backend
    pub fn resolve_server(&mut self, server: &str) -> Result<ResolvedServer, NetError> {
        let addr = self.backend.resolve(server).ok_or_else(|| NetError::Resolve {
            server: server.to_string(),
        })?;
        Ok(ResolvedServer {
            name: server.to_string(),
            addr: Some(addr),
        })
    }

    /// Server must be on the local subnet unless a gateway is configured
    fn check_reachable(
        &self,
        resolved: ResolvedServer,
        device: &str,
    ) -> Result<ResolvedServer, NetError> {
        let Some(IpAddr::V4(addr)) = resolved.addr else {
            return Ok(resolved);
        };
        if addr.is_unspecified() || addr.is_broadcast() {
            return Err(NetError::Resolve {
                server: resolved.name,
            });
        }
        match self.iface.is_local(addr) {
            Some(false) if self.iface.gateway.is_none() => Err(NetError::Unreachable {
                server: resolved.name,
                device: device.to_string(),
            }),
            _ => Ok(resolved),
        }
    }

    pub fn mount_nfs(
        &mut self,
        target: &Path,
        server: &ResolvedServer,
        path: &str,
    ) -> Result<(), MountError> {
        self.backend.mount_nfs(target, server, path)
    }

    pub fn mount_smb(
        &mut self,
        target: &Path,
        server: &ResolvedServer,
        share: &str,
        credentials: &SmbCredentials<'_>,
    ) -> Result<(), MountError> {
        self.backend.mount_smb(target, server, share, credentials)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::net::Ipv4Addr;
    use std::rc::Rc;

    /// Scripted backend recording every call
    #[derive(Clone, Default)]
    pub(crate) struct FakeBackend {
        pub calls: Rc<RefCell<Vec<String>>>,
        pub lease: IfaceConfig,
        pub fail_activate: bool,
        pub nfs_missing: Vec<String>,
    }

    impl FakeBackend {
        pub fn with_lease() -> Self {
            Self {
                lease: IfaceConfig {
                    address: Some(Ipv4Addr::new(192, 168, 0, 10)),
                    netmask: Some(Ipv4Addr::new(255, 255, 255, 0)),
                    broadcast: Some(Ipv4Addr::new(192, 168, 0, 255)),
                    ..IfaceConfig::default()
                },
                ..Self::default()
            }
        }

        fn log(&self, call: String) {
            self.calls.borrow_mut().push(call);
        }
    }

    impl NetworkBackend for FakeBackend {
        fn stop(&mut self, device: &str) -> Result<(), NetError> {
            self.log(format!("stop {device}"));
            Ok(())
        }

        fn wlan_setup(&mut self, device: &str) -> Result<(), NetError> {
            self.log(format!("wlan {device}"));
            Ok(())
        }

        fn request_lease(&mut self, device: &str, protocol: LeaseProtocol) -> IfaceConfig {
            self.log(format!("{protocol} {device}"));
            self.lease.clone()
        }

        fn activate(&mut self, device: &str, _config: &IfaceConfig) -> Result<(), NetError> {
            self.log(format!("activate {device}"));
            if self.fail_activate {
                return Err(NetError::Activation {
                    device: device.to_string(),
                    error: "link down".into(),
                });
            }
            Ok(())
        }

        fn resolve(&mut self, server: &str) -> Option<IpAddr> {
            match server {
                "local" => Some(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1))),
                "remote" => Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
                other => other.parse().ok(),
            }
        }

        fn mount_nfs(
            &mut self,
            target: &Path,
            _server: &ResolvedServer,
            path: &str,
        ) -> Result<(), MountError> {
            self.log(format!("nfs {path} {}", target.display()));
            if self.nfs_missing.iter().any(|p| p == path) {
                return Err(MountError::NotFound {
                    source_path: path.to_string(),
                });
            }
            Ok(())
        }

        fn mount_smb(
            &mut self,
            target: &Path,
            _server: &ResolvedServer,
            share: &str,
            credentials: &SmbCredentials<'_>,
        ) -> Result<(), MountError> {
            self.log(format!(
                "smb {share} {} user={}",
                target.display(),
                credentials.user.unwrap_or("-")
            ));
            Ok(())
        }
    }

    fn session(backend: FakeBackend, settings: NetSettings) -> NetworkSession {
        NetworkSession::new(Box::new(backend), settings)
    }

    #[test]
    fn test_dhcp_bring_up() {
        let backend = FakeBackend::with_lease();
        let calls = backend.calls.clone();
        let mut net = session(backend, NetSettings::default());

        let resolved = net.bring_up("eth0", false, Some("local")).unwrap().unwrap();
        assert_eq!(resolved.addr, Some(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1))));
        assert_eq!(net.configured(), NetConfigured::Dhcp);
        assert_eq!(net.device(), Some("eth0"));
        assert_eq!(*calls.borrow(), ["DHCP eth0", "activate eth0"]);
    }

    #[test]
    fn test_same_device_is_idempotent() {
        let backend = FakeBackend::with_lease();
        let calls = backend.calls.clone();
        let mut net = session(backend, NetSettings::default());

        net.bring_up("eth0", false, None).unwrap();
        assert!(net.bring_up("eth0", false, Some("local")).unwrap().is_none());
        assert_eq!(calls.borrow().len(), 2);
    }

    #[test]
    fn test_switching_device_tears_down_first() {
        let backend = FakeBackend::with_lease();
        let calls = backend.calls.clone();
        let mut net = session(backend, NetSettings::default());

        net.bring_up("eth0", false, None).unwrap();
        net.bring_up("eth1", true, None).unwrap();
        assert_eq!(
            *calls.borrow(),
            ["DHCP eth0", "activate eth0", "stop eth0", "wlan eth1", "DHCP eth1", "activate eth1"]
        );
        assert_eq!(net.device(), Some("eth1"));
    }

    #[test]
    fn test_pseudo_devices_rejected() {
        let mut net = session(FakeBackend::with_lease(), NetSettings::default());
        assert!(matches!(
            net.bring_up("lo", false, None),
            Err(NetError::PseudoDevice { .. })
        ));
        assert!(matches!(
            net.bring_up("sit0", false, None),
            Err(NetError::PseudoDevice { .. })
        ));
    }

    #[test]
    fn test_incomplete_lease() {
        let mut net = session(FakeBackend::default(), NetSettings::default());
        assert!(matches!(
            net.bring_up("eth0", false, None),
            Err(NetError::IncompleteLease { .. })
        ));
        assert_eq!(net.configured(), NetConfigured::None);

        let settings = NetSettings {
            test_mode: true,
            ..NetSettings::default()
        };
        let mut net = session(FakeBackend::default(), settings);
        assert!(net.bring_up("eth0", false, None).is_ok());
    }

    #[test]
    fn test_bootp_policy() {
        let backend = FakeBackend::with_lease();
        let calls = backend.calls.clone();
        let settings = NetSettings {
            use_dhcp: false,
            ..NetSettings::default()
        };
        let mut net = session(backend, settings);
        net.bring_up("eth0", false, None).unwrap();
        assert_eq!(net.configured(), NetConfigured::Bootp);
        assert_eq!(calls.borrow()[0], "BOOTP eth0");
    }

    #[test]
    fn test_static_config_skips_lease() {
        let backend = FakeBackend::default();
        let calls = backend.calls.clone();
        let settings = NetSettings {
            address: Some(Ipv4Addr::new(10, 0, 0, 5)),
            netmask: Some(Ipv4Addr::new(255, 255, 255, 0)),
            ..NetSettings::default()
        };
        let mut net = session(backend, settings);

        net.bring_up("eth0", false, None).unwrap();
        assert_eq!(net.configured(), NetConfigured::Static);
        assert_eq!(net.iface().broadcast, Some(Ipv4Addr::new(10, 0, 0, 255)));
        assert_eq!(*calls.borrow(), ["activate eth0"]);
    }

    #[test]
    fn test_activation_failure_resets() {
        let backend = FakeBackend {
            fail_activate: true,
            ..FakeBackend::with_lease()
        };
        let mut net = session(backend, NetSettings::default());
        assert!(net.bring_up("eth0", false, None).is_err());
        assert_eq!(net.configured(), NetConfigured::None);
        assert_eq!(net.device(), None);
    }

    #[test]
    fn test_unreachable_server() {
        let mut net = session(FakeBackend::with_lease(), NetSettings::default());
        assert!(matches!(
            net.bring_up("eth0", false, Some("remote")),
            Err(NetError::Unreachable { .. })
        ));
        assert_eq!(net.configured(), NetConfigured::None);

        let settings = NetSettings {
            gateway: Some(Ipv4Addr::new(192, 168, 0, 254)),
            ..NetSettings::default()
        };
        let mut net = session(FakeBackend::with_lease(), settings);
        assert!(net.bring_up("eth0", false, Some("remote")).is_ok());
    }

    #[test]
    fn test_unreachable_server_forgets_interface() {
        let backend = FakeBackend::with_lease();
        let calls = backend.calls.clone();
        let mut net = session(backend, NetSettings::default());

        assert!(net.bring_up("eth0", false, Some("remote")).is_err());
        assert_eq!(net.configured(), NetConfigured::None);
        assert_eq!(net.device(), None);
        assert_eq!(net.iface(), &IfaceConfig::default());
        assert_eq!(calls.borrow().last().map(String::as_str), Some("stop eth0"));

        // Not mistaken for an already configured interface on retry
        assert!(net.bring_up("eth0", false, Some("local")).unwrap().is_some());
        assert_eq!(net.device(), Some("eth0"));
    }

    #[test]
    fn test_unresolvable_server() {
        let mut net = session(FakeBackend::with_lease(), NetSettings::default());
        assert!(matches!(
            net.bring_up("eth0", false, Some("no.such.host")),
            Err(NetError::Resolve { .. })
        ));
    }
}
