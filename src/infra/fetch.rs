//! Fetch engine
//!
//! Transfers one resource to a local file. The first bytes are held back
//! and sniffed; a gzip stream is piped through an external decompressor
//! whose stdout is the destination, anything else is written verbatim.

use std::fs::File;
use std::io::{self, Read, Seek, Write};
use std::ops::ControlFlow;
use std::path::Path;

use crate::config::defaults;
use crate::config::Settings;
use crate::core::sniff::{self, Format, Sniffed};
use crate::core::url::InstallUrl;
use crate::error::FetchError;
use crate::infra::pipe::PipedChild;
use crate::infra::transport::{self, Stream};

/// External program turning a compressed stdin into plain stdout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decompressor {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for Decompressor {
    fn default() -> Self {
        Self {
            program: defaults::DECOMPRESSOR.to_string(),
            args: defaults::DECOMPRESSOR_ARGS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl Decompressor {
    /// Decompressor configured in the settings
    pub fn from_settings(settings: &Settings) -> Self {
        let (program, args) = settings.decompressor();
        Self { program, args }
    }

    /// The program can be found on `PATH`
    pub fn is_available(&self) -> bool {
        which::which(&self.program).is_ok()
    }
}

/// Snapshot handed to the progress callback
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Bytes read from the transport
    pub received: u64,
    /// Size announced by the transport
    pub total: Option<u64>,
    /// Bytes that reached the destination
    pub written: u64,
    /// Uncompressed size taken from the sniffed header name
    pub expected: Option<u64>,
    /// Output goes through the decompressor
    pub decompressing: bool,
    /// Transfer complete
    pub finished: bool,
}

impl Progress {
    /// Completion in percent, `None` while no total is known
    pub fn percent(&self) -> Option<u8> {
        if self.finished {
            return Some(100);
        }
        let (done, of) = match (self.decompressing, self.expected, self.total) {
            (true, Some(expected), _) => (self.written, expected),
            (_, _, Some(total)) => (self.received, total),
            (_, Some(expected), None) => (self.received, expected),
            _ => return None,
        };
        let percent = done.saturating_mul(100) / of.max(1);
        Some(u8::try_from(percent.min(100)).unwrap_or(100))
    }
}

/// Progress callback; `Break` aborts the transfer
pub type ProgressCallback<'a> = Box<dyn FnMut(&Progress) -> ControlFlow<()> + 'a>;

/// Per-transfer options
#[derive(Default)]
pub struct FetchOptions<'a> {
    /// Decompress gzip content
    pub unzip: bool,
    pub progress: Option<ProgressCallback<'a>>,
    pub decompressor: Decompressor,
}

impl<'a> FetchOptions<'a> {
    /// Options with decompression enabled
    pub fn unzip() -> Self {
        Self {
            unzip: true,
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: impl FnMut(&Progress) -> ControlFlow<()> + 'a) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn with_decompressor(mut self, decompressor: Decompressor) -> Self {
        self.decompressor = decompressor;
        self
    }
}

impl std::fmt::Debug for FetchOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOptions")
            .field("unzip", &self.unzip)
            .field("progress", &self.progress.is_some())
            .field("decompressor", &self.decompressor)
            .finish()
    }
}

/// Outcome of a successful transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    /// Bytes read from the transport
    pub bytes_received: u64,
    /// Bytes in the destination file
    pub bytes_written: u64,
    pub format: Format,
    /// Name embedded in a gzip or cramfs header
    pub original_name: Option<String>,
    /// Uncompressed size derived from that name
    pub size_hint: Option<u64>,
}

enum Output {
    Plain {
        file: File,
    },
    Piped {
        child: PipedChild,
        /// Shares its offset with the child's stdout
        dest: File,
        /// Child's stderr; unlinked from creation on
        diagnostics: File,
    },
}

struct FetchSession<'a> {
    dest: &'a Path,
    unzip: bool,
    decompressor: Decompressor,
    progress: Option<ProgressCallback<'a>>,
    /// Held-back prefix; `None` once output has begun
    sniff: Option<Vec<u8>>,
    sniffed: Sniffed,
    output: Option<Output>,
    received: u64,
    total: Option<u64>,
    written: u64,
    error: Option<FetchError>,
}

impl<'a> FetchSession<'a> {
    fn new(dest: &'a Path, options: FetchOptions<'a>) -> Self {
        Self {
            dest,
            unzip: options.unzip,
            decompressor: options.decompressor,
            progress: options.progress,
            sniff: Some(Vec::with_capacity(defaults::SNIFF_BUFFER_SIZE)),
            sniffed: sniff::sniff(&[], false),
            output: None,
            received: 0,
            total: None,
            written: 0,
            error: None,
        }
    }

    /// Record `error` unless an earlier one is already set
    fn fail(&mut self, error: FetchError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn run(&mut self, mut stream: Stream) {
        self.total = stream.total.filter(|&total| total > 0);
        let mut chunk = vec![0u8; defaults::TRANSPORT_CHUNK_SIZE];

        while self.error.is_none() {
            match stream.reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => self.receive(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => self.fail(transport::read_error(&e)),
            }
        }
    }

    fn receive(&mut self, mut data: &[u8]) {
        self.received += data.len() as u64;

        if let Some(buf) = self.sniff.as_mut() {
            let take = (defaults::SNIFF_BUFFER_SIZE - buf.len()).min(data.len());
            buf.extend_from_slice(&data[..take]);
            data = &data[take..];
            if buf.len() == defaults::SNIFF_BUFFER_SIZE {
                self.begin_output();
            }
        }

        if !data.is_empty() {
            self.emit(data);
        }
        self.report(false);
    }

    /// Sniff the held-back prefix, open the destination and flush the prefix
    fn begin_output(&mut self) {
        let Some(prefix) = self.sniff.take() else {
            return;
        };

        self.sniffed = sniff::sniff(&prefix, self.unzip);
        tracing::debug!(
            format = ?self.sniffed.format,
            name = ?self.sniffed.name,
            size_hint = ?self.sniffed.size_hint,
            "sniffed"
        );

        match self.open_output() {
            Ok(output) => {
                self.output = Some(output);
                self.emit(&prefix);
            }
            Err(e) => self.fail(e),
        }
    }

    fn open_output(&self) -> Result<Output, FetchError> {
        let open_error = |e: io::Error| FetchError::OpenDestination {
            path: self.dest.to_path_buf(),
            error: e.to_string(),
        };

        if self.sniffed.format != Format::Gzip {
            let file = File::create(self.dest).map_err(open_error)?;
            return Ok(Output::Plain { file });
        }

        let temp_error = |e: io::Error| FetchError::TempFile {
            error: e.to_string(),
        };
        let diagnostics = tempfile::tempfile().map_err(temp_error)?;
        let stderr = diagnostics.try_clone().map_err(temp_error)?;
        let dest = File::create(self.dest).map_err(open_error)?;
        let stdout = dest.try_clone().map_err(open_error)?;

        let Decompressor { program, args } = &self.decompressor;
        let child = PipedChild::spawn(program, args, stdout, stderr).map_err(|e| {
            FetchError::Decompressor {
                message: format!("{program}: {e}"),
            }
        })?;

        Ok(Output::Piped {
            child,
            dest,
            diagnostics,
        })
    }

    fn emit(&mut self, data: &[u8]) {
        let result = match self.output.as_mut() {
            Some(Output::Plain { file }) => file.write_all(data).map(|()| {
                self.written += data.len() as u64;
            }),
            Some(Output::Piped { child, dest, .. }) => {
                let written = match child.write_all(data) {
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                    other => other,
                };
                if let Ok(pos) = dest.stream_position() {
                    self.written = pos;
                }
                written
            }
            None => Ok(()),
        };

        if let Err(e) = result {
            self.fail(FetchError::Output {
                path: self.dest.to_path_buf(),
                error: e.to_string(),
            });
        }
    }

    fn report(&mut self, finished: bool) {
        let progress = Progress {
            received: self.received,
            total: self.total,
            written: self.written,
            expected: self.sniffed.size_hint,
            decompressing: matches!(self.output, Some(Output::Piped { .. })),
            finished,
        };
        if progress.total.is_none() && progress.expected.is_none() {
            return;
        }

        let Some(callback) = self.progress.as_mut() else {
            return;
        };
        if callback(&progress).is_break() {
            self.fail(FetchError::Aborted);
        }
    }

    /// Close the output, reap the decompressor and settle the result
    fn finish(mut self) -> Result<FetchReport, FetchError> {
        if self.error.is_none() {
            self.begin_output();
        }

        match self.output.take() {
            Some(Output::Plain { file }) => {
                if let Err(e) = file.sync_all() {
                    self.fail(FetchError::Output {
                        path: self.dest.to_path_buf(),
                        error: e.to_string(),
                    });
                }
            }
            Some(Output::Piped {
                mut child,
                mut dest,
                mut diagnostics,
            }) => {
                let status = child.wait();
                let program = child.program().to_string();
                match status {
                    Ok(status) if status.success() => {}
                    Ok(status) if status.code() == Some(defaults::DECOMPRESSOR_HARMLESS_EXIT) => {
                        tracing::debug!(%program, "decompressor warning ignored");
                    }
                    // Only a regular exit status counts
                    Ok(status) if status.code().is_none() => {
                        tracing::debug!(%program, %status, "decompressor did not exit normally");
                    }
                    Ok(_) => {
                        let text = read_diagnostics(&mut diagnostics);
                        let message = if text.is_empty() {
                            format!("{program}: command terminated")
                        } else {
                            text
                        };
                        self.fail(FetchError::Decompressor { message });
                    }
                    Err(e) => self.fail(FetchError::Decompressor {
                        message: format!("{program}: {e}"),
                    }),
                }
                if let Ok(pos) = dest.stream_position() {
                    self.written = pos;
                }
            }
            None => {}
        }

        if self.error.is_none() {
            self.report(true);
        }

        match self.error.take() {
            Some(e) => {
                tracing::warn!(dest = %self.dest.display(), code = e.code(), "fetch failed: {e}");
                Err(e)
            }
            None => Ok(FetchReport {
                bytes_received: self.received,
                bytes_written: self.written,
                format: self.sniffed.format,
                original_name: self.sniffed.name.take(),
                size_hint: self.sniffed.size_hint,
            }),
        }
    }
}

fn read_diagnostics(file: &mut File) -> String {
    let mut text = String::new();
    if file.rewind().is_ok() {
        let _ = file.read_to_string(&mut text);
    }
    text.trim().to_string()
}

/// Transfer `url` into `dest`
///
/// The destination is created only once the first bytes have arrived; on
/// failure a partially written file is left for the caller to remove.
pub fn fetch(url: &InstallUrl, dest: &Path, options: FetchOptions<'_>) -> Result<FetchReport, FetchError> {
    tracing::debug!(url = %url, dest = %dest.display(), unzip = options.unzip, "fetch");

    let mut session = FetchSession::new(dest, options);
    match transport::open(url) {
        Ok(stream) => session.run(stream),
        Err(e) => session.fail(e),
    }
    session.finish()
}
