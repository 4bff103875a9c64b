//! Byte-stream transports
//!
//! Each transport opens one resource named by an [`InstallUrl`] and hands
//! back a blocking reader plus the total size when the remote side tells.

pub mod file;
pub mod ftp;
pub mod http;
pub mod tftp;

use std::io::Read;

use crate::core::scheme::Scheme;
use crate::core::url::InstallUrl;
use crate::error::FetchError;

/// libcurl-compatible transport error codes
pub mod codes {
    pub const UNSUPPORTED_PROTOCOL: i32 = 1;
    pub const COULDNT_RESOLVE_PROXY: i32 = 5;
    pub const COULDNT_RESOLVE_HOST: i32 = 6;
    pub const COULDNT_CONNECT: i32 = 7;
    pub const WEIRD_SERVER_REPLY: i32 = 8;
    pub const HTTP_RETURNED_ERROR: i32 = 22;
    pub const OPERATION_TIMEDOUT: i32 = 28;
    pub const FILE_COULDNT_READ_FILE: i32 = 37;
    pub const TOO_MANY_REDIRECTS: i32 = 47;
    pub const RECV_ERROR: i32 = 56;
    pub const LOGIN_DENIED: i32 = 67;
    pub const TFTP_NOTFOUND: i32 = 68;
    pub const TFTP_PERM: i32 = 69;
    pub const TFTP_ILLEGAL: i32 = 71;
    pub const REMOTE_FILE_NOT_FOUND: i32 = 78;
}

/// An open resource
pub struct Stream {
    /// Blocking reader over the resource's bytes
    pub reader: Box<dyn Read>,
    /// Total size, when known up front
    pub total: Option<u64>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").field("total", &self.total).finish_non_exhaustive()
    }
}

/// Open `url` with the transport matching its scheme
pub fn open(url: &InstallUrl) -> Result<Stream, FetchError> {
    match url.scheme {
        Some(Scheme::Http | Scheme::Https) => http::open(url),
        Some(Scheme::Ftp) => ftp::open(url),
        Some(Scheme::Tftp) => tftp::open(url),
        Some(Scheme::File) => file::open(url),
        other => Err(FetchError::transport(
            codes::UNSUPPORTED_PROTOCOL,
            format!(
                "Protocol \"{}\" not supported",
                other.map_or("none", Scheme::name)
            ),
        )),
    }
}

/// Map a mid-stream read failure onto a transport error
///
/// Readers that fail with a transport error of their own wrap it in the
/// `io::Error`; that code is kept.
pub fn read_error(error: &std::io::Error) -> FetchError {
    if let Some(FetchError::Transport { code, message }) = error
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<FetchError>())
    {
        return FetchError::transport(*code, message.clone());
    }

    let code = match error.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => codes::OPERATION_TIMEDOUT,
        _ => codes::RECV_ERROR,
    };
    FetchError::transport(code, error.to_string())
}
