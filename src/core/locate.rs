//! Repository and install-system locators
//!
//! Built on the mount engine: [`find_repository`] looks for a candidate
//! carrying the repository marker (and mounts a repository-relative
//! install system along the way), [`find_instsys`] mounts a standalone
//! install-system image. [`read_file`] copies single files relative to a
//! descriptor.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::core::mount::{join_under, AcceptanceTest, MountEngine, Verdict};
use crate::core::scheme::Scheme;
use crate::core::url::InstallUrl;
use crate::error::{AttemptError, FetchError, MountError, ResolveError};
use crate::infra::fetch::FetchReport;
use crate::infra::transport::codes;

/// How [`read_file`] copies
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions<'a> {
    /// Decompress gzip content
    pub unzip: bool,
    /// Progress label; defaults to the file name
    pub label: Option<&'a str>,
}

/// Descriptor addressing `src` relative to `url`
fn source_for(url: &InstallUrl, src: &str) -> Result<InstallUrl, FetchError> {
    match &url.mount {
        Some(mount) => Ok(InstallUrl::local_file(&join_under(mount, src))),
        None if url.is.mountable && url.scheme != Some(Scheme::File) => Err(FetchError::transport(
            codes::FILE_COULDNT_READ_FILE,
            format!("{url}: not mounted"),
        )),
        None => Ok(url.join(src)),
    }
}

/// Copy `src` relative to an already usable `url` to `dst`
///
/// A mounted descriptor is read below its mountpoint, anything else over
/// its transport.
pub fn copy_file(
    engine: &mut MountEngine,
    url: &InstallUrl,
    src: &str,
    dst: &Path,
    options: ReadOptions<'_>,
) -> Result<FetchReport, FetchError> {
    let source = source_for(url, src)?;
    tracing::info!("loading {source} -> {}", dst.display());

    let label = options.label.unwrap_or(src);
    engine
        .fetch(&source, dst, options.unzip, label)
        .map_err(|e| {
            tracing::warn!("error {}: {e}", e.code());
            e
        })
}

/// Acceptance test performing the copy
struct CopyTest<'a> {
    src: &'a str,
    dst: &'a Path,
    options: ReadOptions<'a>,
    outcome: Option<Result<FetchReport, FetchError>>,
}

impl AcceptanceTest for CopyTest<'_> {
    fn check(&mut self, url: &InstallUrl, engine: &mut MountEngine) -> Verdict {
        let result = copy_file(engine, url, self.src, self.dst, self.options);
        let verdict = if result.is_ok() {
            Verdict::Accept
        } else {
            Verdict::Reject
        };
        self.outcome = Some(result);
        verdict
    }
}

/// Copy `src` relative to `url` to `dst`, resolving `url` first if it is
/// mountable but not mounted yet
///
/// A descriptor resolved here stays mounted.
pub fn read_file(
    engine: &mut MountEngine,
    url: &mut InstallUrl,
    dir: Option<&Path>,
    src: &str,
    dst: &Path,
    options: ReadOptions<'_>,
) -> Result<FetchReport, ResolveError> {
    let read_error = |url: &InstallUrl, source| ResolveError::Read {
        url: url.to_string(),
        file: src.to_string(),
        source,
    };

    if url.mount.is_some() || !url.is.mountable {
        return copy_file(engine, url, src, dst, options).map_err(|e| read_error(&*url, e));
    }

    let mut test = CopyTest {
        src,
        dst,
        options,
        outcome: None,
    };
    let resolved = engine.resolve_and_mount(url, dir, Some(&mut test));
    match (resolved, test.outcome) {
        (Ok(()), Some(Ok(report))) => Ok(report),
        (_, Some(Err(e))) => Err(read_error(&*url, e)),
        (Err(e), _) => Err(e),
        (Ok(()), None) => Err(ResolveError::NotFound {
            url: url.to_string(),
            tried: 0,
        }),
    }
}

/// Acceptance test for repositories
///
/// A candidate is a repository when the marker file can be copied from it.
/// A repository-relative install system is mounted from the same
/// candidate before it is accepted.
pub struct RepoProbe<'s> {
    settings: &'s Settings,
    instsys: Option<InstallUrl>,
}

impl<'s> RepoProbe<'s> {
    pub fn new(settings: &'s Settings, instsys: Option<InstallUrl>) -> Self {
        Self { settings, instsys }
    }

    /// Install-system descriptor, mounted if it was found in the repository
    pub fn into_instsys(self) -> Option<InstallUrl> {
        self.instsys
    }

    fn mount_instsys(
        &self,
        url: &InstallUrl,
        engine: &mut MountEngine,
        rel: &str,
    ) -> Result<PathBuf, AttemptError> {
        let mountpoint = self.settings.instsys_mountpoint();

        let direct = match &url.mount {
            Some(mount) if url.is.mountable => {
                let path = join_under(mount, rel);
                if !path.exists() {
                    return Err(MountError::NotFound {
                        source_path: path.display().to_string(),
                    }
                    .into());
                }
                Some(path)
            }
            _ => None,
        };

        fs::create_dir_all(&mountpoint).map_err(|e| MountError::Mountpoint {
            path: mountpoint.clone(),
            error: e.to_string(),
        })?;

        match direct {
            Some(path) if !self.settings.download_instsys() && engine.probe().is_mountable(&path) => {
                engine.mount_readonly(&path, &mountpoint)?;
            }
            _ => {
                let label = if self.settings.instsys.rescue {
                    "Loading Rescue System"
                } else {
                    "Loading Installation System"
                };
                let source = source_for(url, rel)?;
                engine.stage(&source, &mountpoint, label)?;
            }
        }
        Ok(mountpoint)
    }
}

impl AcceptanceTest for RepoProbe<'_> {
    fn check(&mut self, url: &InstallUrl, engine: &mut MountEngine) -> Verdict {
        if url.mount.is_none() && url.is.mountable {
            return Verdict::Reject;
        }

        let marker = self.settings.repository_marker();
        let dest = self.settings.repository_marker_dest();
        if copy_file(engine, url, marker, &dest, ReadOptions::default()).is_err() {
            return Verdict::Reject;
        }

        let rel = match &self.instsys {
            Some(instsys) if instsys.scheme == Some(Scheme::Rel) => instsys.path_or_root().to_string(),
            _ => return Verdict::Accept,
        };

        match self.mount_instsys(url, engine, &rel) {
            Ok(mountpoint) => {
                tracing::info!("instsys: mounted at {}", mountpoint.display());
                if let Some(instsys) = self.instsys.as_mut() {
                    instsys.mount = Some(mountpoint);
                }
                Verdict::Accept
            }
            Err(e) => {
                tracing::warn!("instsys {rel}: {e}");
                Verdict::Reject
            }
        }
    }
}

/// Find the repository `url` points at and mount it at `dir`
///
/// Returns the install-system descriptor in effect (the `instsys` query
/// parameter, else the configured one); its `mount` is set when it was
/// found relative to the repository and mounted.
pub fn find_repository(
    engine: &mut MountEngine,
    settings: &Settings,
    url: &mut InstallUrl,
    dir: Option<&Path>,
) -> Result<Option<InstallUrl>, ResolveError> {
    let instsys = match url.instsys.as_deref() {
        Some(text) => Some(InstallUrl::parse(text)),
        None => settings.instsys_url().unwrap_or_else(|e| {
            tracing::warn!("{e}");
            None
        }),
    };

    tracing::info!("repository: looking for {url}");
    let mut probe = RepoProbe::new(settings, instsys);

    match engine.resolve_and_mount(url, dir, Some(&mut probe)) {
        Ok(()) => {
            match &url.mount {
                Some(mount) => tracing::info!("repository: using {url} @ {}", mount.display()),
                None => tracing::info!("repository: using {url}"),
            }
            Ok(probe.into_instsys())
        }
        Err(e) => {
            tracing::warn!("repository: not found");
            Err(e)
        }
    }
}

/// Mount a standalone install-system image at `dir`
///
/// Transfer schemes and download/rescue mode always go through a scratch
/// file.
pub fn find_instsys(
    engine: &mut MountEngine,
    settings: &Settings,
    url: &mut InstallUrl,
    dir: Option<&Path>,
) -> Result<(), ResolveError> {
    let Some(scheme) = url.scheme else {
        return Err(ResolveError::NoScheme {
            url: url.source.clone(),
        });
    };
    if scheme == Scheme::Rel || url.path.is_none() {
        return Err(ResolveError::NotMountable {
            url: url.to_string(),
        });
    }

    if settings.download_instsys() {
        url.download = true;
    }
    if !url.is.mountable {
        if !scheme.is_transfer() {
            return Err(ResolveError::NotMountable {
                url: url.to_string(),
            });
        }
        url.download = true;
    }

    tracing::info!("instsys: looking for {url}");
    engine.resolve_and_mount(url, dir, None)
}
