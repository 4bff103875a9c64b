//! Mount resolution engine
//!
//! Turns a descriptor into a read-only mounted filesystem. A descriptor
//! naming a concrete device (or a plain file) is tried once; otherwise every
//! matching device of the scheme's class is tried in turn until an
//! [`AcceptanceTest`] is satisfied.
//!
//! Each attempt readies the transport, pre-mounts whatever has to be
//! mounted to reach the requested path, and then mounts the target
//! natively or stages it through a scratch file. A failed or rejected
//! attempt unmounts everything it created before the next one starts.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::core::scheme::Scheme;
use crate::core::url::{long_dev, Capabilities, InstallUrl, Used};
use crate::error::{AttemptError, FetchError, MountError, NetError, ResolveError};
use crate::infra::devices::{Device, DeviceClass, DeviceRegistry, SysfsRegistry};
use crate::infra::fetch::{self, Decompressor, FetchOptions, FetchReport, Progress};
use crate::infra::net::NetworkSession;
use crate::infra::scratch::ScratchSpace;
use crate::infra::system::{
    BlkidProbe, CommandBackend, CommandMounter, FileKind, FsProbe, ModuleLoader, Modprobe, Mounter,
    SmbCredentials,
};

/// Outcome of an acceptance test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Wrong candidate; undo the attempt and try the next one
    Reject,
    /// Right candidate; stop searching
    Accept,
    /// Usable candidate, but keep probing the remaining ones
    AcceptContinue,
}

/// Decides whether a mounted candidate is the one wanted
///
/// The test may use the engine itself, e.g. to read files below the
/// candidate's mountpoint or to mount further images.
pub trait AcceptanceTest {
    fn check(&mut self, url: &InstallUrl, engine: &mut MountEngine) -> Verdict;
}

impl<F> AcceptanceTest for F
where
    F: FnMut(&InstallUrl, &mut MountEngine) -> Verdict,
{
    fn check(&mut self, url: &InstallUrl, engine: &mut MountEngine) -> Verdict {
        self(url, engine)
    }
}

/// Progress reporting for loads done by the engine; receives a label
pub type LoadProgress = Box<dyn FnMut(&str, &Progress) -> ControlFlow<()>>;

/// `path` below `base`, whether or not `path` starts with `/`
pub(crate) fn join_under(base: &Path, path: &str) -> PathBuf {
    let rel = path.trim_start_matches('/');
    if rel.is_empty() {
        base.to_path_buf()
    } else {
        base.join(rel)
    }
}

/// The mount resolution engine and its collaborators
pub struct MountEngine {
    devices: Box<dyn DeviceRegistry>,
    mounter: Box<dyn Mounter>,
    probe: Box<dyn FsProbe>,
    modules: Box<dyn ModuleLoader>,
    net: NetworkSession,
    scratch: ScratchSpace,
    decompressor: Decompressor,
    progress: Option<LoadProgress>,
    /// Scratch images, keyed by the target they are mounted at
    staged: HashMap<PathBuf, PathBuf>,
}

impl std::fmt::Debug for MountEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountEngine")
            .field("net", &self.net)
            .field("scratch", &self.scratch)
            .field("decompressor", &self.decompressor)
            .field("staged", &self.staged)
            .finish_non_exhaustive()
    }
}

impl MountEngine {
    pub fn new(
        devices: Box<dyn DeviceRegistry>,
        mounter: Box<dyn Mounter>,
        probe: Box<dyn FsProbe>,
        modules: Box<dyn ModuleLoader>,
        net: NetworkSession,
        scratch: ScratchSpace,
    ) -> Self {
        Self {
            devices,
            mounter,
            probe,
            modules,
            net,
            scratch,
            decompressor: Decompressor::default(),
            progress: None,
            staged: HashMap::new(),
        }
    }

    /// Engine driving the running system
    pub fn system(settings: &Settings) -> Self {
        Self::new(
            Box::new(SysfsRegistry::default()),
            Box::new(CommandMounter),
            Box::new(BlkidProbe),
            Box::new(Modprobe),
            NetworkSession::new(Box::new(CommandBackend), settings.network.clone()),
            ScratchSpace::from_settings(settings),
        )
        .with_decompressor(Decompressor::from_settings(settings))
    }

    pub fn with_decompressor(mut self, decompressor: Decompressor) -> Self {
        self.decompressor = decompressor;
        self
    }

    pub fn with_progress(
        mut self,
        progress: impl FnMut(&str, &Progress) -> ControlFlow<()> + 'static,
    ) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn net(&self) -> &NetworkSession {
        &self.net
    }

    pub fn net_mut(&mut self) -> &mut NetworkSession {
        &mut self.net
    }

    pub fn probe(&self) -> &dyn FsProbe {
        self.probe.as_ref()
    }

    /// Fetch `source` to `dest` with the engine's decompressor and progress
    pub fn fetch(
        &mut self,
        source: &InstallUrl,
        dest: &Path,
        unzip: bool,
        label: &str,
    ) -> Result<FetchReport, FetchError> {
        let mut options = FetchOptions {
            unzip,
            progress: None,
            decompressor: self.decompressor.clone(),
        };
        if let Some(progress) = self.progress.as_mut() {
            options = options.with_progress(move |p| progress(label, p));
        }
        fetch::fetch(source, dest, options)
    }

    pub fn mount_readonly(&mut self, source: &Path, target: &Path) -> Result<(), MountError> {
        self.mounter.mount_readonly(source, target)
    }

    /// Fetch `source` (decompressing) into a scratch file and mount that at
    /// `target`; the scratch file is gone again if anything fails
    pub fn stage(
        &mut self,
        source: &InstallUrl,
        target: &Path,
        label: &str,
    ) -> Result<(), AttemptError> {
        let image = self.scratch.new_download()?;
        tracing::info!("loading {source} -> {}", image.display());

        let result = match self.fetch(source, &image, true, label) {
            Ok(_) => self
                .mounter
                .mount_readonly(&image, target)
                .map_err(AttemptError::from),
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => {
                self.staged.insert(target.to_path_buf(), image);
                Ok(())
            }
            Err(e) => {
                self.scratch.remove_download(&image);
                Err(e)
            }
        }
    }

    /// Unmount `target`, delete a scratch image behind it and remove the
    /// directory if the engine created it
    pub fn release_mount(&mut self, target: &Path) {
        if let Err(e) = self.mounter.unmount(target) {
            tracing::warn!("{e}");
        }
        if let Some(image) = self.staged.remove(target) {
            self.scratch.remove_download(&image);
        }
        self.scratch.release_mountpoint(target);
    }

    /// Undo every mount recorded in `url`
    pub fn unmount(&mut self, url: &mut InstallUrl) {
        if let Some(mount) = url.mount.take() {
            self.release_mount(&mount);
        }
        if let Some(tmp) = url.tmp_mount.take() {
            self.release_mount(&tmp);
        }
    }

    /// Resolve `url` to a mounted filesystem
    ///
    /// `dir` is the final mountpoint; a fresh one is created if it is
    /// `None`. Without an acceptance test the first successful candidate
    /// wins. On success `url.used`, `url.mount` and `url.tmp_mount`
    /// describe the candidate that was kept.
    pub fn resolve_and_mount(
        &mut self,
        url: &mut InstallUrl,
        dir: Option<&Path>,
        mut accept: Option<&mut (dyn AcceptanceTest + '_)>,
    ) -> Result<(), ResolveError> {
        let Some(scheme) = url.scheme else {
            return Err(ResolveError::NoScheme {
                url: url.source.clone(),
            });
        };
        if matches!(scheme, Scheme::Rel | Scheme::Exec) {
            return Err(ResolveError::NotMountable {
                url: url.to_string(),
            });
        }

        if scheme == Scheme::File || url.used.device.is_some() {
            return match self.attempt(url, dir, accept) {
                Ok(_) => Ok(()),
                Err(_) => Err(ResolveError::NotFound {
                    url: url.to_string(),
                    tried: 1,
                }),
            };
        }

        let class = match scheme {
            Scheme::Cd | Scheme::Dvd => DeviceClass::Cdrom,
            Scheme::Floppy => DeviceClass::Floppy,
            Scheme::Disk | Scheme::Hd => DeviceClass::Block,
            _ => DeviceClass::Network,
        };
        let candidates = self.candidates(scheme, class, url.device.as_deref());

        let mut tried = 0;
        let mut last_success: Option<(Used, Capabilities)> = None;
        let mut current_ok = false;

        for device in candidates {
            tried += 1;
            url.used = Used {
                device: Some(device.name),
                model: device.model,
                hwaddr: device.hwaddr,
                server: None,
            };
            url.is.wlan = device.wlan;

            match self.attempt(url, dir, accept.as_deref_mut()) {
                Ok(verdict) => {
                    if class == DeviceClass::Cdrom {
                        url.is.optical = true;
                    }
                    current_ok = true;
                    last_success = Some((url.used.clone(), url.is));
                    if verdict == Verdict::Accept {
                        break;
                    }
                }
                Err(_) => current_ok = false,
            }
        }

        if current_ok {
            return Ok(());
        }

        if let Some((used, is)) = last_success {
            tracing::info!("back to last usable candidate");
            url.used = used;
            url.is = is;
            if self.attempt(url, dir, None).is_ok() {
                return Ok(());
            }
        }

        url.used.clear();
        Err(ResolveError::NotFound {
            url: url.to_string(),
            tried,
        })
    }

    /// Devices of `class` worth trying, in registry order
    ///
    /// Falls back to the literal hint when nothing in the registry matches.
    fn candidates(&mut self, scheme: Scheme, class: DeviceClass, hint: Option<&str>) -> Vec<Device> {
        let mut candidates: Vec<Device> = self
            .devices
            .list(class)
            .into_iter()
            .filter(|device| {
                !(scheme == Scheme::Hd && (device.floppy || device.cdrom || device.has_children))
            })
            .filter(|device| hint.map_or(true, |hint| device.matches_hint(hint)))
            .collect();

        if candidates.is_empty() {
            if let Some(hint) = hint {
                let name = if class == DeviceClass::Network {
                    hint.to_string()
                } else {
                    long_dev(hint)
                };
                tracing::debug!(%name, "no registry match, trying hint");
                candidates.push(Device {
                    name,
                    ..Device::default()
                });
            }
        }
        candidates
    }

    /// One candidate, all or nothing
    fn attempt(
        &mut self,
        url: &mut InstallUrl,
        dir: Option<&Path>,
        accept: Option<&mut (dyn AcceptanceTest + '_)>,
    ) -> Result<Verdict, AttemptError> {
        tracing::info!("trying {url}");
        if let Some(model) = &url.used.model {
            tracing::info!("model: {model}");
        }

        self.unmount(url);
        url.is.file = false;

        match self.try_candidate(url, dir, accept) {
            Ok(verdict) => {
                match &url.mount {
                    Some(mount) => tracing::info!("{url}: mounted at {}", mount.display()),
                    None => tracing::info!("{url}: ok"),
                }
                Ok(verdict)
            }
            Err(e) => {
                tracing::warn!("{url}: {e}");
                self.unmount(url);
                Err(e)
            }
        }
    }

    fn try_candidate(
        &mut self,
        url: &mut InstallUrl,
        dir: Option<&Path>,
        accept: Option<&mut (dyn AcceptanceTest + '_)>,
    ) -> Result<Verdict, AttemptError> {
        self.ready(url)?;
        self.mount_candidate(url, dir)?;

        match accept {
            None => Ok(Verdict::Accept),
            Some(test) => match test.check(url, self) {
                Verdict::Reject => Err(AttemptError::Rejected),
                verdict => Ok(verdict),
            },
        }
    }

    /// Load the filesystem driver or bring up the network
    fn ready(&mut self, url: &mut InstallUrl) -> Result<(), AttemptError> {
        let scheme = url.scheme_or_rel();
        if scheme == Scheme::File {
            return Ok(());
        }

        if scheme.is_network() {
            let device = url.used.device.clone().ok_or(NetError::NoDevice)?;
            let server = url.server.clone();
            let resolved = self
                .net
                .bring_up(&device, url.is.wlan, server.as_deref())?;
            url.used.server = match (resolved, server) {
                (Some(resolved), _) => Some(resolved),
                (None, Some(server)) => Some(self.net.resolve_server(&server)?),
                (None, None) => None,
            };
            return Ok(());
        }

        let device = url
            .used
            .device
            .clone()
            .ok_or_else(|| AttemptError::NotReady {
                device: scheme.to_string(),
                reason: "no device".to_string(),
            })?;
        let node = PathBuf::from(long_dev(&device));
        let Some(fs) = self.probe.fs_type(&node) else {
            return Err(AttemptError::NotReady {
                device,
                reason: "no filesystem".to_string(),
            });
        };
        if fs.name == "swap" {
            return Err(AttemptError::NotReady {
                device,
                reason: "swap partition".to_string(),
            });
        }
        if let Some(module) = &fs.module {
            if let Err(e) = self.modules.load(module) {
                tracing::debug!("{e}");
            }
        }
        tracing::debug!(%device, fs = %fs.name, "device ready");
        Ok(())
    }

    /// Final mountpoint, created on first use
    fn target(&mut self, url: &mut InstallUrl, dir: Option<&Path>) -> Result<PathBuf, MountError> {
        if let Some(mount) = &url.mount {
            return Ok(mount.clone());
        }
        let target = match dir {
            Some(dir) => dir.to_path_buf(),
            None => self.scratch.new_mountpoint()?,
        };
        url.mount = Some(target.clone());
        Ok(target)
    }

    /// Fresh intermediate mountpoint recorded in `url`
    fn tmp_target(&mut self, url: &mut InstallUrl) -> Result<PathBuf, MountError> {
        let tmp = self.scratch.new_mountpoint()?;
        url.tmp_mount = Some(tmp.clone());
        Ok(tmp)
    }

    fn mount_candidate(
        &mut self,
        url: &mut InstallUrl,
        dir: Option<&Path>,
    ) -> Result<(), AttemptError> {
        let scheme = url.scheme_or_rel();
        let path = url.path_or_root().to_string();

        let access = match scheme {
            Scheme::File => Some(PathBuf::from(&path)),
            Scheme::Disk | Scheme::Hd | Scheme::Cd | Scheme::Dvd | Scheme::Floppy => {
                let device = url.used.device.as_deref().unwrap_or_default();
                let node = PathBuf::from(long_dev(device));
                if path == "/" {
                    Some(node)
                } else {
                    let tmp = self.tmp_target(url)?;
                    self.mounter.mount_readonly(&node, &tmp)?;
                    Some(join_under(&tmp, &path))
                }
            }
            Scheme::Nfs => self.mount_nfs(url, dir, &path)?,
            Scheme::Smb => self.mount_smb(url, dir, &path)?,
            s if s.is_transfer() => None,
            s => {
                return Err(AttemptError::Unsupported {
                    scheme: s.to_string(),
                })
            }
        };

        match access {
            Some(access) => self.mount_access_path(url, dir, &access),
            None if url.mount.is_none() && url.download => {
                let target = self.target(url, dir)?;
                url.is.file = true;
                let source = url.clone();
                let label = url.to_string();
                self.stage(&source, &target, &label)
            }
            None => Ok(()),
        }
    }

    /// Mount what `access` points at: directories and images natively,
    /// anything else through a scratch file
    fn mount_access_path(
        &mut self,
        url: &mut InstallUrl,
        dir: Option<&Path>,
        access: &Path,
    ) -> Result<(), AttemptError> {
        let Some(kind) = self.probe.file_kind(access) else {
            return Err(MountError::NotFound {
                source_path: access.display().to_string(),
            }
            .into());
        };
        let file = matches!(kind, FileKind::Regular | FileKind::Block);
        url.is.file = file;

        let target = self.target(url, dir)?;
        if file && (url.download || !self.probe.is_mountable(access)) {
            let label = access.display().to_string();
            self.stage(&InstallUrl::local_file(access), &target, &label)
        } else {
            self.mounter
                .mount_readonly(access, &target)
                .map_err(AttemptError::from)
        }
    }

    /// Mount the export; a path naming a file is reached through its
    /// parent directory instead, unless that parent is the root
    fn mount_nfs(
        &mut self,
        url: &mut InstallUrl,
        dir: Option<&Path>,
        path: &str,
    ) -> Result<Option<PathBuf>, AttemptError> {
        let server = url.used.server.clone().ok_or_else(|| NetError::Resolve {
            server: url.server.clone().unwrap_or_default(),
        })?;

        let target = self.target(url, dir)?;
        let split = path
            .trim_end_matches('/')
            .rsplit_once('/')
            .filter(|(parent, leaf)| !parent.is_empty() && !leaf.is_empty());
        match self.net.mount_nfs(&target, &server, path) {
            Ok(()) => Ok(None),
            Err(MountError::NotFound { .. } | MountError::NotADirectory { .. }) if split.is_some() => {
                let (parent, leaf) = split.unwrap_or_default();
                tracing::info!("{path}: trying {parent}");

                let tmp = self.tmp_target(url)?;
                self.net.mount_nfs(&tmp, &server, parent)?;
                Ok(Some(join_under(&tmp, leaf)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Mount the share; a path inside it is reached through a temporary
    /// mount of the whole share
    fn mount_smb(
        &mut self,
        url: &mut InstallUrl,
        dir: Option<&Path>,
        path: &str,
    ) -> Result<Option<PathBuf>, AttemptError> {
        let server = url.used.server.clone().ok_or_else(|| NetError::Resolve {
            server: url.server.clone().unwrap_or_default(),
        })?;
        let share = url.share.clone().unwrap_or_default();
        let user = url.user.clone();
        let password = url.password.clone();
        let domain = url.domain.clone();
        let credentials = SmbCredentials {
            user: user.as_deref(),
            password: password.as_deref(),
            domain: domain.as_deref(),
        };

        if path == "/" {
            let target = self.target(url, dir)?;
            self.net.mount_smb(&target, &server, &share, &credentials)?;
            Ok(None)
        } else {
            let tmp = self.tmp_target(url)?;
            self.net.mount_smb(&tmp, &server, &share, &credentials)?;
            Ok(Some(join_under(&tmp, path)))
        }
    }
}
