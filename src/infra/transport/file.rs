//! Local file transport

use std::fs::File;
use std::path::Path;

use super::{codes, Stream};
use crate::core::url::InstallUrl;
use crate::error::FetchError;

/// Open the local file named by `url`'s path
pub fn open(url: &InstallUrl) -> Result<Stream, FetchError> {
    let path = Path::new(url.path_or_root());

    let file = File::open(path).map_err(|e| {
        FetchError::transport(
            codes::FILE_COULDNT_READ_FILE,
            format!("Couldn't open file {}: {e}", path.display()),
        )
    })?;

    let meta = file.metadata().map_err(|e| {
        FetchError::transport(
            codes::FILE_COULDNT_READ_FILE,
            format!("Couldn't stat file {}: {e}", path.display()),
        )
    })?;

    if meta.is_dir() {
        return Err(FetchError::transport(
            codes::FILE_COULDNT_READ_FILE,
            format!("Couldn't read file {}: is a directory", path.display()),
        ));
    }

    Ok(Stream {
        total: meta.is_file().then(|| meta.len()),
        reader: Box::new(file),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_open_regular_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut stream = open(&InstallUrl::local_file(&path)).unwrap();
        assert_eq!(stream.total, Some(10));
        let mut buf = Vec::new();
        stream.reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"0123456789");
    }

    #[test]
    fn test_missing_file() {
        let err = open(&InstallUrl::parse("file:/nonexistent/insturl/file")).unwrap_err();
        assert_eq!(err.code(), codes::FILE_COULDNT_READ_FILE);
    }

    #[test]
    fn test_directory_is_rejected() {
        let temp = TempDir::new().unwrap();
        let err = open(&InstallUrl::local_file(temp.path())).unwrap_err();
        assert_eq!(err.code(), codes::FILE_COULDNT_READ_FILE);
    }
}
