//! Error types for insturl
//!
//! Domain-specific error types using thiserror.

use std::path::PathBuf;
use thiserror::Error;

/// Fetch errors
///
/// Every variant maps onto a stable integer code (see [`FetchError::code`]),
/// so callers that only want an `(code, message)` pair can get one.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Transport-level failure (network, HTTP status, unreadable file)
    #[error("{message}")]
    Transport { code: i32, message: String },

    /// Failed to create the private file for decompressor diagnostics
    #[error("mkstemp: {error}")]
    TempFile { error: String },

    /// Failed to open the destination
    #[error("open: {path}: {error}")]
    OpenDestination { path: PathBuf, error: String },

    /// Progress callback asked to stop
    #[error("transfer aborted")]
    Aborted,

    /// Decompressor could not be started or exited with an error
    #[error("{message}")]
    Decompressor { message: String },

    /// Writing or closing the destination failed
    #[error("write: {path}: {error}")]
    Output { path: PathBuf, error: String },
}

impl FetchError {
    /// Numeric error code
    pub fn code(&self) -> i32 {
        match self {
            Self::Transport { code, .. } => *code,
            Self::TempFile { .. } => 1,
            Self::OpenDestination { .. } => 101,
            Self::Aborted => 102,
            Self::Decompressor { .. } => 103,
            Self::Output { .. } => 104,
        }
    }

    /// Build a transport error
    pub fn transport(code: i32, message: impl Into<String>) -> Self {
        Self::Transport {
            code,
            message: message.into(),
        }
    }
}

/// Mount and unmount errors
#[derive(Error, Debug)]
pub enum MountError {
    /// Source does not exist on the server or device
    #[error("{source_path}: no such file or directory")]
    NotFound { source_path: String },

    /// A path component is not a directory
    #[error("{source_path}: not a directory")]
    NotADirectory { source_path: String },

    /// Mount helper reported a failure
    #[error("mount {source_path} -> {target}: {message}")]
    Failed {
        source_path: String,
        target: PathBuf,
        message: String,
    },

    /// Unmount failed
    #[error("umount {target}: {message}")]
    Unmount { target: PathBuf, message: String },

    /// Helper program could not be run
    #[error("failed to run '{program}': {error}")]
    Spawn { program: String, error: String },

    /// Mountpoint could not be created
    #[error("mountpoint {path}: {error}")]
    Mountpoint { path: PathBuf, error: String },
}

/// Network negotiation errors
#[derive(Error, Debug)]
pub enum NetError {
    /// Loopback and tunnel devices are never configured
    #[error("'{device}' is a pseudo device")]
    PseudoDevice { device: String },

    /// Wireless association failed
    #[error("wlan setup failed on '{device}': {error}")]
    Wlan { device: String, error: String },

    /// DHCP/BOOTP gave no or an incomplete answer
    #[error("{protocol} on '{device}': no/incomplete answer")]
    IncompleteLease { protocol: String, device: String },

    /// Interface activation failed
    #[error("network setup failed on '{device}': {error}")]
    Activation { device: String, error: String },

    /// Server name could not be resolved
    #[error("invalid server address: {server}")]
    Resolve { server: String },

    /// Server is outside the local network and no gateway is set
    #[error("server {server} is not reachable from {device}")]
    Unreachable { server: String, device: String },

    /// A network scheme was used without a candidate interface
    #[error("no network device")]
    NoDevice,
}

/// Why a single candidate attempt failed
///
/// Attempt errors never reach the caller of a resolution directly; the
/// engine logs them and moves on to the next candidate.
#[derive(Error, Debug)]
pub enum AttemptError {
    /// Device or transport could not be readied
    #[error("{device}: {reason}")]
    NotReady { device: String, reason: String },

    #[error(transparent)]
    Mount(#[from] MountError),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error("error {}: {}", .0.code(), .0)]
    Fetch(#[from] FetchError),

    /// Mounted fine, but the acceptance test said no
    #[error("rejected")]
    Rejected,

    /// Scheme has no mount strategy
    #[error("{scheme}: unsupported scheme")]
    Unsupported { scheme: String },
}

/// Resolution errors
#[derive(Error, Debug)]
pub enum ResolveError {
    /// Descriptor carries no usable scheme
    #[error("'{url}' has no usable scheme")]
    NoScheme { url: String },

    /// Descriptor cannot be turned into a filesystem
    #[error("'{url}' is not mountable")]
    NotMountable { url: String },

    /// Every candidate was tried and none was accepted
    #[error("'{url}' not found ({tried} candidate(s) tried)")]
    NotFound { url: String, tried: usize },

    /// Reading a file relative to the descriptor failed
    #[error("reading '{file}' from '{url}' failed: {source}")]
    Read {
        url: String,
        file: String,
        #[source]
        source: FetchError,
    },
}

/// Settings file errors
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Failed to read settings file
    #[error("Failed to read settings file '{path}': {error}")]
    ReadError { path: PathBuf, error: String },

    /// Failed to parse settings file
    #[error("Failed to parse settings file '{path}': {error}")]
    ParseError { path: PathBuf, error: String },

    /// Install-system address is unusable
    #[error("Invalid instsys address '{url}'")]
    InvalidInstsys { url: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_codes() {
        assert_eq!(FetchError::transport(22, "HTTP 404").code(), 22);
        assert_eq!(FetchError::Aborted.code(), 102);
        assert_eq!(
            FetchError::Decompressor {
                message: "gzip: stdin: not in gzip format".into()
            }
            .code(),
            103
        );
        assert_eq!(
            FetchError::OpenDestination {
                path: PathBuf::from("/x"),
                error: "denied".into()
            }
            .code(),
            101
        );
    }

    #[test]
    fn test_attempt_error_shows_fetch_code() {
        let err = AttemptError::from(FetchError::transport(22, "HTTP 404"));
        assert_eq!(err.to_string(), "error 22: HTTP 404");
    }

    #[test]
    fn test_transport_message_is_verbatim() {
        let err = FetchError::transport(7, "Failed to connect to host");
        assert_eq!(err.to_string(), "Failed to connect to host");
    }
}
