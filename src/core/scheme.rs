//! Installation source schemes
//!
//! Maps scheme names to [`Scheme`] values and derives the static
//! capabilities of each scheme.

use serde::Serialize;
use std::fmt;

/// Installation source scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Any local block device
    Disk,
    /// Hard disk partition (never optical or floppy)
    Hd,
    /// CD-ROM drive
    Cd,
    /// DVD drive
    Dvd,
    /// Floppy drive
    Floppy,
    /// NFS export
    Nfs,
    /// SMB/CIFS share
    Smb,
    /// HTTP server
    Http,
    /// HTTPS server
    Https,
    /// FTP server
    Ftp,
    /// TFTP server
    Tftp,
    /// Local file or directory
    File,
    /// Program output
    Exec,
    /// Relative to an already mounted source
    Rel,
}

/// Name table: every accepted spelling, canonical name first per scheme
const NAMES: &[(&str, Scheme)] = &[
    ("disk", Scheme::Disk),
    ("hd", Scheme::Hd),
    ("harddisk", Scheme::Hd),
    ("cd", Scheme::Cd),
    ("cdrom", Scheme::Cd),
    ("dvd", Scheme::Dvd),
    ("floppy", Scheme::Floppy),
    ("fd", Scheme::Floppy),
    ("nfs", Scheme::Nfs),
    ("smb", Scheme::Smb),
    ("cifs", Scheme::Smb),
    ("http", Scheme::Http),
    ("https", Scheme::Https),
    ("ftp", Scheme::Ftp),
    ("tftp", Scheme::Tftp),
    ("file", Scheme::File),
    ("exec", Scheme::Exec),
    ("rel", Scheme::Rel),
];

impl Scheme {
    /// Look up a scheme by name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        NAMES
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, scheme)| *scheme)
    }

    /// Canonical short name
    pub fn name(self) -> &'static str {
        NAMES
            .iter()
            .find(|(_, s)| *s == self)
            .map_or("rel", |(n, _)| n)
    }

    /// All schemes, in table order
    pub fn all() -> impl Iterator<Item = Scheme> {
        let mut seen = Vec::new();
        NAMES.iter().filter_map(move |(_, s)| {
            if seen.contains(s) {
                None
            } else {
                seen.push(*s);
                Some(*s)
            }
        })
    }

    /// Resource exposes a browsable filesystem tree
    pub fn is_mountable(self) -> bool {
        matches!(
            self,
            Self::File
                | Self::Nfs
                | Self::Smb
                | Self::Cd
                | Self::Floppy
                | Self::Hd
                | Self::Disk
                | Self::Dvd
                | Self::Exec
        )
    }

    /// Reached over the network
    pub fn is_network(self) -> bool {
        matches!(
            self,
            Self::Nfs | Self::Ftp | Self::Smb | Self::Http | Self::Https | Self::Tftp
        )
    }

    /// Optical media
    pub fn is_optical(self) -> bool {
        matches!(self, Self::Cd | Self::Dvd)
    }

    /// Path may begin with a block device name
    pub fn is_local_device(self) -> bool {
        matches!(
            self,
            Self::Disk | Self::Cd | Self::Dvd | Self::Floppy | Self::Hd
        )
    }

    /// Byte-stream transfer protocol (never pre-mounted)
    pub fn is_transfer(self) -> bool {
        matches!(self, Self::Http | Self::Https | Self::Ftp | Self::Tftp)
    }

    /// First path segment names a share
    pub fn has_share(self) -> bool {
        self == Self::Smb
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
