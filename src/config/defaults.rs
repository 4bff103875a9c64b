//! Default configuration values

/// Bytes held back for format sniffing before any output is written
pub const SNIFF_BUFFER_SIZE: usize = 256;

/// Maximum number of HTTP redirects followed
pub const MAX_REDIRECTS: usize = 10;

/// Read size for transport streams
pub const TRANSPORT_CHUNK_SIZE: usize = 16 * 1024;

/// Default decompressor (reads stdin, writes stdout)
pub const DECOMPRESSOR: &str = "gzip";

/// Arguments passed to the default decompressor
pub const DECOMPRESSOR_ARGS: &[&str] = &["-dc"];

/// Decompressor exit code that only signals a warning (e.g. trailing garbage)
pub const DECOMPRESSOR_HARMLESS_EXIT: i32 = 2;

/// Marker file identifying an install repository
pub const REPOSITORY_MARKER: &str = "/content";

/// Where the repository marker is copied to
pub const REPOSITORY_MARKER_DEST: &str = "/tmp/content";

/// Fixed mountpoint for the install-system image
pub const INSTSYS_MOUNTPOINT: &str = "/mounts/instsys";

/// Base directory for temporary mountpoints
pub const MOUNT_DIR: &str = "/mounts";

/// Base directory for scratch files
pub const DOWNLOAD_DIR: &str = "/download";

/// Environment variable naming the settings file
pub const ENV_CONFIG: &str = "INSTURL_CONFIG";

/// Settings file name inside the user config directory
pub const CONFIG_FILE_NAME: &str = "insturl.toml";

/// TFTP timeout per block (in seconds)
pub const TFTP_TIMEOUT_SECS: u64 = 5;

/// TFTP retransmissions before giving up
pub const TFTP_RETRIES: u32 = 5;

/// FTP control connection timeout (in seconds)
pub const FTP_TIMEOUT_SECS: u64 = 60;
