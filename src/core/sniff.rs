//! Inline format sniffing
//!
//! Looks at the first bytes of a transfer to decide whether it has to go
//! through the decompressor, and picks up a size hint from the embedded
//! name of gzip and cramfs images (`"<word> <KiB>"`).

use regex::Regex;
use std::sync::OnceLock;

/// gzip magic bytes
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// gzip header flag: original file name present
const GZIP_FNAME: u8 = 0x08;

/// Offset of the original file name in a gzip header without extra field
const GZIP_NAME_OFFSET: usize = 10;

/// Shortest prefix worth sniffing
pub const MIN_SNIFF_LEN: usize = 11;

/// cramfs superblock magic
pub const CRAMFS_MAGIC: u32 = 0x28cd_3d45;

/// cramfs superblock as seen from the other byte order
pub const CRAMFS_MAGIC_SWAPPED: u32 = 0x453d_cd28;

/// cramfs superblock layout
mod cramfs {
    pub const MAGIC: usize = 0;
    pub const NAME: usize = 48;
    pub const NAME_LEN: usize = 16;
    /// magic, size, flags, future, signature[16], crc, edition, blocks, files, name[16]
    pub const SUPERBLOCK_LEN: usize = 64;
}

/// Detected content format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Write verbatim
    Plain,
    /// gzip stream, to be piped through the decompressor
    Gzip,
    /// cramfs image
    Cramfs,
}

/// Outcome of sniffing a prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sniffed {
    pub format: Format,
    /// Name stored in the header
    pub name: Option<String>,
    /// Estimated uncompressed size in bytes
    pub size_hint: Option<u64>,
}

impl Sniffed {
    fn plain() -> Self {
        Self {
            format: Format::Plain,
            name: None,
            size_hint: None,
        }
    }
}

/// Identify the content of `buf`
///
/// gzip is only recognised when `unzip` is set; otherwise the data is
/// written verbatim anyway.
pub fn sniff(buf: &[u8], unzip: bool) -> Sniffed {
    if buf.len() < MIN_SNIFF_LEN {
        return Sniffed::plain();
    }

    let mut sniffed = if unzip && buf.starts_with(&GZIP_MAGIC) {
        Sniffed {
            format: Format::Gzip,
            name: gzip_name(buf),
            size_hint: None,
        }
    } else if let Some(name) = cramfs_name(buf) {
        Sniffed {
            format: Format::Cramfs,
            name: Some(name),
            size_hint: None,
        }
    } else {
        Sniffed::plain()
    };

    sniffed.size_hint = sniffed.name.as_deref().and_then(size_hint);
    sniffed
}

/// NUL-terminated original name from a gzip header, if present and complete
fn gzip_name(buf: &[u8]) -> Option<String> {
    if buf[3] & GZIP_FNAME == 0 {
        return None;
    }
    let rest = &buf[GZIP_NAME_OFFSET..];
    let end = rest.iter().position(|&b| b == 0)?;
    Some(String::from_utf8_lossy(&rest[..end]).into_owned())
}

/// Name field of a cramfs superblock in either byte order
fn cramfs_name(buf: &[u8]) -> Option<String> {
    if buf.len() <= cramfs::SUPERBLOCK_LEN {
        return None;
    }
    let magic = read_u32_le(buf, cramfs::MAGIC)?;
    if magic != CRAMFS_MAGIC && magic != CRAMFS_MAGIC_SWAPPED {
        return None;
    }
    let name = &buf[cramfs::NAME..cramfs::NAME + cramfs::NAME_LEN];
    let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    Some(String::from_utf8_lossy(&name[..end]).into_owned())
}

fn read_u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// `"Compressed 4711"` -> 4711 KiB in bytes
pub fn size_hint(name: &str) -> Option<u64> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^\s*\S+\s+([+-]?\d+)").ok())
        .as_ref()?;

    let kib: i64 = pattern.captures(name)?.get(1)?.as_str().parse().ok()?;
    u64::try_from(kib).ok().filter(|&k| k > 0).map(|k| k << 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gzip_header(name: Option<&str>) -> Vec<u8> {
        let mut buf = vec![0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0x00, 0x03];
        if let Some(name) = name {
            buf[3] = GZIP_FNAME;
            buf.extend_from_slice(name.as_bytes());
            buf.push(0);
        }
        buf.extend_from_slice(&[0xaa; 32]);
        buf
    }

    fn cramfs_superblock(magic: u32, name: &str, little_endian: bool) -> Vec<u8> {
        let mut buf = vec![0u8; 80];
        let bytes = if little_endian {
            magic.to_le_bytes()
        } else {
            magic.to_be_bytes()
        };
        buf[..4].copy_from_slice(&bytes);
        buf[48..48 + name.len()].copy_from_slice(name.as_bytes());
        buf
    }

    #[test]
    fn test_gzip_requires_unzip() {
        let buf = gzip_header(None);
        assert_eq!(sniff(&buf, true).format, Format::Gzip);
        assert_eq!(sniff(&buf, false).format, Format::Plain);
    }

    #[test]
    fn test_gzip_original_name_and_size() {
        let buf = gzip_header(Some("root 65536"));
        let sniffed = sniff(&buf, true);
        assert_eq!(sniffed.name.as_deref(), Some("root 65536"));
        assert_eq!(sniffed.size_hint, Some(65536 << 10));
    }

    #[test]
    fn test_gzip_name_without_terminator_is_ignored() {
        let mut buf = vec![0x1f, 0x8b, 0x08, GZIP_FNAME, 0, 0, 0, 0, 0, 3];
        buf.extend_from_slice(b"truncated-name");
        let sniffed = sniff(&buf, true);
        assert_eq!(sniffed.format, Format::Gzip);
        assert_eq!(sniffed.name, None);
    }

    #[test]
    fn test_cramfs_either_byte_order() {
        let le = cramfs_superblock(CRAMFS_MAGIC, "Compressed 1024", true);
        let be = cramfs_superblock(CRAMFS_MAGIC, "Compressed 1024", false);
        for buf in [le, be] {
            let sniffed = sniff(&buf, true);
            assert_eq!(sniffed.format, Format::Cramfs);
            assert_eq!(sniffed.name.as_deref(), Some("Compressed 1024"));
            assert_eq!(sniffed.size_hint, Some(1024 * 1024));
        }
    }

    #[test]
    fn test_cramfs_needs_full_superblock() {
        let buf = cramfs_superblock(CRAMFS_MAGIC, "x", true);
        assert_eq!(sniff(&buf[..64], true).format, Format::Plain);
    }

    #[test]
    fn test_short_buffer_is_plain() {
        assert_eq!(sniff(&[0x1f, 0x8b, 8], true), Sniffed::plain());
    }

    #[test]
    fn test_size_hint() {
        assert_eq!(size_hint("Compressed 12"), Some(12 << 10));
        assert_eq!(size_hint("root 42abc"), Some(42 << 10));
        assert_eq!(size_hint("root"), None);
        assert_eq!(size_hint("root -5"), None);
        assert_eq!(size_hint("root 0"), None);
        assert_eq!(size_hint("12"), None);
    }
}
