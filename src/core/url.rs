//! Installation source descriptor
//!
//! Parses addresses of the form
//!
//! ```text
//! scheme:[//[domain;][user[:password]@]server[:port]]/path[?key=value&...]
//! ```
//!
//! into an [`InstallUrl`]. Parsing never fails: malformed input degrades to
//! a partial descriptor, and a string whose scheme is unknown becomes a
//! path relative to an already mounted source.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use std::fmt;
use std::fmt::Write as _;
use std::net::IpAddr;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use super::scheme::Scheme;

/// Characters escaped in user names and passwords
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// One `key[=value]` query parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryParam {
    pub key: String,
    pub value: Option<String>,
}

/// Capabilities derived from the scheme (and refined during resolution)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Exposes a browsable filesystem tree
    pub mountable: bool,
    /// Reached over the network
    pub network: bool,
    /// Optical media
    pub optical: bool,
    /// Reached over a wireless interface
    pub wlan: bool,
    /// Resolved to a single regular file or block device
    pub file: bool,
}

/// Resolved server address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedServer {
    pub name: String,
    pub addr: Option<IpAddr>,
}

/// What a resolution actually used
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Used {
    /// Device node (local) or interface name (network)
    pub device: Option<String>,
    /// Hardware model
    pub model: Option<String>,
    /// Hardware address
    pub hwaddr: Option<String>,
    /// Server address
    pub server: Option<ResolvedServer>,
}

impl Used {
    /// Forget everything recorded for the current candidate
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// How [`InstallUrl::print`] renders a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintMode {
    /// Password masked, resolved device and hardware address appended
    Masked,
    /// Real password, nothing appended; suitable for a transport
    Transport,
}

/// Kind of filesystem node found while probing a device path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Block,
    Directory,
    Other,
}

/// Looks up filesystem nodes while splitting a device name off a path
pub trait NodeProbe {
    /// Kind of the node at `path`, `None` if it does not exist
    fn node_kind(&self, path: &Path) -> Option<NodeKind>;
}

/// Probes the real filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemNodes;

impl NodeProbe for SystemNodes {
    fn node_kind(&self, path: &Path) -> Option<NodeKind> {
        let meta = std::fs::metadata(path).ok()?;
        let file_type = meta.file_type();
        Some(if file_type.is_block_device() {
            NodeKind::Block
        } else if file_type.is_dir() {
            NodeKind::Directory
        } else {
            NodeKind::Other
        })
    }
}

/// Parsed installation source
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallUrl {
    /// Original string
    #[serde(skip_serializing)]
    pub source: String,
    /// Scheme; `None` if the string was empty
    pub scheme: Option<Scheme>,
    pub server: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub domain: Option<String>,
    pub share: Option<String>,
    pub path: Option<String>,
    /// Explicit device hint (short form)
    pub device: Option<String>,
    pub query: Vec<QueryParam>,
    /// Install-system override
    pub instsys: Option<String>,
    /// Proxy override
    pub proxy: Option<String>,
    pub is: Capabilities,
    pub used: Used,
    /// Final mountpoint
    pub mount: Option<PathBuf>,
    /// Intermediate mountpoint
    pub tmp_mount: Option<PathBuf>,
    /// Always stage through a scratch file
    pub download: bool,
}

impl InstallUrl {
    /// Parse an address, probing the real `/dev` for device names
    pub fn parse(text: &str) -> Self {
        Self::parse_with(text, &SystemNodes)
    }

    /// Parse an address using `nodes` to probe device names
    pub fn parse_with(text: &str, nodes: &dyn NodeProbe) -> Self {
        let mut url = Self {
            source: text.to_string(),
            ..Self::default()
        };

        if text.is_empty() {
            return url;
        }

        let mut authority = None;

        match text.split_once(':').map(|(name, rest)| (Scheme::from_name(name), rest)) {
            Some((Some(scheme), rest)) => {
                url.scheme = Some(scheme);

                let mut rest = rest;
                if let Some(after) = rest.strip_prefix("//") {
                    let end = after.find(['/', '?']).unwrap_or(after.len());
                    if end > 0 {
                        authority = Some(&after[..end]);
                    }
                    rest = &after[end..];
                }

                let path = match rest.split_once('?') {
                    Some((path, query)) => {
                        url.query = parse_query(query);
                        path
                    }
                    None => rest,
                };
                url.path = Some(path.strip_prefix('/').unwrap_or(path).to_string());
            }
            Some((None, _)) => {
                url.scheme = Some(Scheme::Rel);
                url.path = Some(text.to_string());
            }
            None => match Scheme::from_name(text) {
                Some(scheme) => url.scheme = Some(scheme),
                None => {
                    url.scheme = Some(Scheme::Rel);
                    url.path = Some(text.to_string());
                }
            },
        }

        if let Some(authority) = authority {
            url.parse_authority(authority);
        }

        let scheme = url.scheme.unwrap_or(Scheme::Rel);

        if scheme.has_share() {
            if let Some(path) = url.path.take() {
                match path.split_once('/') {
                    Some((share, rest)) => {
                        url.share = Some(share.to_string());
                        url.path = Some(rest.to_string());
                    }
                    None => url.share = Some(path),
                }
            }
        }

        for field in [
            &mut url.server,
            &mut url.share,
            &mut url.path,
            &mut url.user,
            &mut url.password,
            &mut url.domain,
        ] {
            if let Some(value) = field.as_mut() {
                *value = unescape(value);
            }
        }

        if scheme.is_local_device() {
            url.split_device(nodes);
        }

        if let Some(device) = url.query_value("device").map(short_dev).map(str::to_string) {
            url.device = (!device.is_empty()).then_some(device);
        }
        if let Some(instsys) = url.query_value("instsys").map(str::to_string) {
            url.instsys = Some(instsys);
        }
        if let Some(proxy) = url.query_value("proxy").map(str::to_string) {
            url.proxy = Some(proxy);
        }

        url.is = Capabilities {
            mountable: scheme.is_mountable(),
            network: scheme.is_network(),
            optical: scheme.is_optical(),
            ..Capabilities::default()
        };

        if url.is.mountable {
            match url.path.as_mut() {
                Some(path) if !path.starts_with('/') => path.insert(0, '/'),
                Some(_) => {}
                None => url.path = Some("/".to_string()),
            }
        }

        tracing::debug!(
            url = %url.source,
            scheme = %scheme,
            server = ?url.server,
            port = ?url.port,
            path = ?url.path,
            share = ?url.share,
            domain = ?url.domain,
            device = ?url.device,
            network = url.is.network,
            mountable = url.is.mountable,
            "parsed url"
        );

        url
    }

    /// `domain;user:password@server:port`, left to right
    fn parse_authority(&mut self, authority: &str) {
        let mut rest = authority;

        if let Some((domain, after)) = rest.split_once(';') {
            self.domain = Some(domain.to_string());
            rest = after;
        }

        if let Some((userinfo, after)) = rest.split_once('@') {
            match userinfo.split_once(':') {
                Some((user, password)) => {
                    self.user = Some(user.to_string());
                    self.password = Some(password.to_string());
                }
                None => self.user = Some(userinfo.to_string()),
            }
            rest = after;
        }

        if let Some((server, port)) = rest.split_once(':') {
            self.port = port.parse().ok();
            rest = server;
        }

        self.server = Some(rest.to_string());
    }

    /// Move a leading block device name from `path` into `device`
    fn split_device(&mut self, nodes: &dyn NodeProbe) {
        let Some(path) = self.path.as_deref() else {
            return;
        };

        let has_dev_prefix = path
            .strip_prefix("dev")
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'));
        let full = if has_dev_prefix {
            format!("/{path}")
        } else {
            format!("/dev/{path}")
        };

        let mut found = None;
        let mut end = 0;
        loop {
            let next = full[end + 1..].find('/').map(|i| end + 1 + i);
            let prefix = &full[..next.unwrap_or(full.len())];

            let Some(kind) = nodes.node_kind(Path::new(prefix)) else {
                break;
            };
            if kind == NodeKind::Block {
                found = Some((prefix.to_string(), next.map(|i| full[i + 1..].to_string())));
            }
            if kind != NodeKind::Directory {
                break;
            }
            match next {
                Some(i) => end = i,
                None => break,
            }
        }

        if let Some((device, rest)) = found {
            self.device = Some(short_dev(&device).to_string());
            self.path = rest;
        }
    }

    /// First value for `key` in the query string
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_deref().unwrap_or(""))
    }

    /// Scheme, treating an empty descriptor as relative
    pub fn scheme_or_rel(&self) -> Scheme {
        self.scheme.unwrap_or(Scheme::Rel)
    }

    /// Path, or `/` when unset
    pub fn path_or_root(&self) -> &str {
        self.path.as_deref().unwrap_or("/")
    }

    /// Render the descriptor as an address
    pub fn print(&self, mode: PrintMode) -> String {
        let mut buf = String::new();
        let Some(scheme) = self.scheme else {
            return buf;
        };

        let _ = write!(buf, "{}:", scheme.name());

        if self.domain.is_some()
            || self.user.is_some()
            || self.password.is_some()
            || self.server.is_some()
            || self.port.is_some()
        {
            buf.push_str("//");
            if let Some(domain) = &self.domain {
                let _ = write!(buf, "{domain};");
            }
            if let Some(user) = &self.user {
                buf.extend(utf8_percent_encode(user, USERINFO));
            }
            if let Some(password) = &self.password {
                buf.push(':');
                match mode {
                    PrintMode::Masked => buf.push_str("***"),
                    PrintMode::Transport => buf.extend(utf8_percent_encode(password, USERINFO)),
                }
            }
            if self.user.is_some() || self.password.is_some() {
                buf.push('@');
            }
            if let Some(server) = &self.server {
                buf.push_str(server);
            }
            if let Some(port) = self.port {
                let _ = write!(buf, ":{port}");
            }
        }

        if let Some(share) = &self.share {
            let _ = write!(buf, "/{share}");
        }

        if let Some(path) = &self.path {
            buf.push('/');
            match path.strip_prefix('/') {
                Some(rest) => {
                    if scheme == Scheme::Ftp {
                        buf.push_str("%2F");
                    }
                    buf.push_str(rest);
                }
                None => buf.push_str(path),
            }
        }

        if mode == PrintMode::Masked {
            let device = self.used.device.as_deref().map(short_dev);
            let mut sep = '?';
            if let Some(device) = device {
                let _ = write!(buf, "{sep}device={device}");
                sep = '&';
            }
            if let Some(hwaddr) = &self.used.hwaddr {
                let _ = write!(buf, "{sep}hwaddr={hwaddr}");
            }
        }

        buf
    }

    /// Copy of the descriptor addressing `file` below its path
    pub fn join(&self, file: &str) -> Self {
        let mut url = self.clone();
        let base = self.path.as_deref().unwrap_or("");
        let base = base.strip_suffix('/').unwrap_or(base);
        let file = file.strip_prefix('/').unwrap_or(file);
        url.path = Some(format!("{base}/{file}"));
        url.source = url.print(PrintMode::Transport);
        url
    }

    /// Descriptor for a local path
    pub fn local_file(path: &Path) -> Self {
        let text = path.to_string_lossy();
        let path = if text.starts_with('/') {
            text.into_owned()
        } else {
            format!("/{text}")
        };
        let mut url = Self {
            scheme: Some(Scheme::File),
            path: Some(path),
            is: Capabilities {
                mountable: true,
                ..Capabilities::default()
            },
            ..Self::default()
        };
        url.source = url.print(PrintMode::Transport);
        url
    }
}

impl fmt::Display for InstallUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.print(PrintMode::Masked))
    }
}

/// Split `a=1&b&c=3` into ordered parameters, keeping duplicates
fn parse_query(query: &str) -> Vec<QueryParam> {
    query
        .split('&')
        .filter(|item| !item.is_empty())
        .map(|item| match item.split_once('=') {
            Some((key, value)) => QueryParam {
                key: key.to_string(),
                value: Some(value.to_string()),
            },
            None => QueryParam {
                key: item.to_string(),
                value: None,
            },
        })
        .collect()
}

fn unescape(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

/// `/dev/sda1` -> `sda1`
pub fn short_dev(name: &str) -> &str {
    name.strip_prefix("/dev/").unwrap_or(name)
}

/// `sda1` -> `/dev/sda1`
pub fn long_dev(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/dev/{name}")
    }
}
