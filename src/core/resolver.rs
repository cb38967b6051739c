use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::builders::command::Command;
use crate::core::config::{MountOptions, RemoteSpec, Source, SourceLocation};
use crate::core::errors::{BackupError, Result};
use crate::core::process::Executor;

/// A source turned into something the backends can read from.
#[derive(Debug)]
pub struct ResolvedSource {
    pub effective_path: PathBuf,
    pub working_dir: Option<PathBuf>,
    mount: Option<MountGuard>,
}

impl ResolvedSource {
    fn local(path: PathBuf) -> Self {
        Self {
            effective_path: path,
            working_dir: None,
            mount: None,
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.mount.is_some()
    }

    pub fn mount_point(&self) -> Option<&Path> {
        self.mount.as_ref().map(MountGuard::mount_point)
    }

    /// Unmounts a mounted source. Calling it again, or on a local source,
    /// does nothing.
    pub fn release(&mut self) -> Result<()> {
        match self.mount.take() {
            Some(guard) => guard.release(),
            None => Ok(()),
        }
    }
}

/// Owns a live mount. `release` unmounts and removes the mount point; if
/// the guard is dropped without it, the same happens on drop and a failure
/// is reported instead of returned.
pub struct MountGuard {
    mount_point: PathBuf,
    unmount: Command,
    executor: Executor,
    released: bool,
}

impl std::fmt::Debug for MountGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountGuard")
            .field("mount_point", &self.mount_point)
            .field("released", &self.released)
            .finish()
    }
}

impl MountGuard {
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.unmount_now()
    }

    fn unmount_now(&self) -> Result<()> {
        let unmounted = match self.executor.execute(&self.unmount) {
            Ok(Some(0)) => Ok(()),
            Ok(code) => Err(failure_reason(&self.unmount, code)),
            Err(err) => Err(err.to_string()),
        };
        // A directory that is still a mount point cannot be removed.
        let removed = fs::remove_dir(&self.mount_point);
        match (unmounted, removed) {
            (Err(reason), _) => Err(BackupError::Unmount {
                mount_point: self.mount_point.clone(),
                reason,
            }),
            (Ok(()), Err(err)) if err.kind() != std::io::ErrorKind::NotFound => {
                Err(BackupError::Unmount {
                    mount_point: self.mount_point.clone(),
                    reason: format!("could not remove mount point: {err}"),
                })
            }
            _ => Ok(()),
        }
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.unmount_now() {
            self.executor.reporter().critical(&err.to_string());
        }
    }
}

fn failure_reason(command: &Command, code: Option<i32>) -> String {
    match code {
        Some(code) => format!("{} exited with code {code}", command.tool()),
        None => format!("{} was terminated by a signal", command.tool()),
    }
}

/// Turns sources into readable locations, mounting remote ones.
pub struct Resolver {
    executor: Executor,
}

impl Resolver {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    /// Makes a source readable by the backends.
    ///
    /// Local sources pass through unchanged. Remote sources get a fresh
    /// mount point (`<base>/<host>-<uuid>`, mode 0700) and are mounted
    /// there; in dry-run the mount command is only rendered.
    ///
    /// # Arguments
    /// * `source`: The source to resolve.
    ///
    /// # Returns
    /// The path to read from plus, for remote sources, the held mount. The
    /// caller must `release` it once the backup is over.
    pub fn resolve(&self, source: &Source) -> Result<ResolvedSource> {
        match &source.location {
            SourceLocation::Local(path) => Ok(ResolvedSource::local(path.clone())),
            SourceLocation::Remote(remote) => self.mount(remote, &source.mount),
        }
    }

    fn mount(&self, remote: &RemoteSpec, options: &MountOptions) -> Result<ResolvedSource> {
        let base = options.base.clone().unwrap_or_else(std::env::temp_dir);
        let mount_point = base.join(format!("{}-{}", remote.host, Uuid::new_v4()));
        create_private_dir(&mount_point)?;

        let command = mount_command(remote, options, &mount_point);
        let reason = match self.executor.execute(&command) {
            Ok(Some(0)) => None,
            Ok(code) => Some(failure_reason(&command, code)),
            Err(err) => Some(err.to_string()),
        };
        if let Some(reason) = reason {
            let _ = fs::remove_dir(&mount_point);
            return Err(BackupError::Mount {
                remote: remote.to_string(),
                mount_point,
                reason,
            });
        }

        let unmount = Command::from_argv(options.unmount.clone()).path_arg(&mount_point);
        Ok(ResolvedSource {
            effective_path: mount_point.clone(),
            working_dir: Some(mount_point.clone()),
            mount: Some(MountGuard {
                mount_point,
                unmount,
                executor: self.executor.clone(),
                released: false,
            }),
        })
    }
}

/// `sshfs [-F cfg] [-o opt]* <remote> <mount-point>`
pub fn mount_command(remote: &RemoteSpec, options: &MountOptions, mount_point: &Path) -> Command {
    let mut command = Command::from_argv(options.command.clone());
    if let Some(config) = &options.ssh_config {
        command = command.arg("-F").path_arg(config);
    }
    for option in &options.options {
        command = command.args(["-o", option.as_str()]);
    }
    command.arg(remote.to_string()).path_arg(mount_point)
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(path)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}
