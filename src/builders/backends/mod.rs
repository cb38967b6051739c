// This file is the module declaration file for the `backends` module.
// Each submodule translates one source and its rules into the command line of
// one backup engine. The engines disagree on how selection works, so the
// adapters share no translation logic; they share only the vocabulary below.

pub mod borg;
pub mod duplicity;
pub mod rsync;
pub mod script;
pub mod tar;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::builders::command::Command;
use crate::core::config::{Method, Source, TarSuffixPolicy};

/// Where one source's backup lives below the target root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLayout {
    host_dir: PathBuf,
    key: String,
}

impl TargetLayout {
    /// `root/host`, keyed by the source's destination key.
    pub fn new(root: &Path, host: &str, key: impl Into<String>) -> Self {
        Self {
            host_dir: root.join(host),
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// `<root>/<host>/files`
    pub fn files_dir(&self) -> PathBuf {
        self.host_dir.join("files")
    }

    /// `<root>/<host>/files/<key>`, or the files dir itself for the empty key.
    pub fn files_path(&self) -> PathBuf {
        join_key(self.files_dir(), &self.key)
    }

    /// `<root>/<host>/backup/<key>`
    pub fn backup_path(&self) -> PathBuf {
        join_key(self.host_dir.join("backup"), &self.key)
    }

    /// The file name stem used by archive based backends. The empty key
    /// (a backup of `/`) is spelled `rootfs`.
    pub fn stem(&self) -> &str {
        if self.key.is_empty() { "rootfs" } else { &self.key }
    }
}

fn join_key(base: PathBuf, key: &str) -> PathBuf {
    if key.is_empty() { base } else { base.join(key) }
}

/// Everything an adapter needs to build the commands for one source.
pub struct SynthesisRequest<'a> {
    pub source: &'a Source,
    /// The path to read from: the source path, or the mount point.
    pub path: &'a Path,
    /// Set for mounted sources; the commands run inside the mount point.
    pub working_dir: Option<&'a Path>,
    pub layout: &'a TargetLayout,
}

impl SynthesisRequest<'_> {
    pub fn path_arg(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// `.` inside a mount point, otherwise the path itself. Keeps archive
    /// member names independent of the generated mount point name.
    pub fn relative_path_arg(&self) -> String {
        match self.working_dir {
            Some(_) => ".".to_string(),
            None => self.path_arg(),
        }
    }

    /// For a mounted source, the part of an absolute rule value below the
    /// remote source path: `/var/log` of `host:/` gives `var/log`.
    ///
    /// `None` for local sources and for values that are relative or lie
    /// outside the source path; those stay as written.
    pub fn mounted_relative(&self, value: &str) -> Option<PathBuf> {
        self.working_dir?;
        Path::new(value)
            .strip_prefix(self.source.path())
            .ok()
            .map(Path::to_path_buf)
    }
}

/// Run-wide state the adapters may consult. Append-only within a run.
#[derive(Debug, Default)]
pub struct SynthesisContext {
    pub tar_suffix: TarSuffixPolicy,
    issued: HashMap<PathBuf, u32>,
}

impl SynthesisContext {
    pub fn new(tar_suffix: TarSuffixPolicy) -> Self {
        Self {
            tar_suffix,
            issued: HashMap::new(),
        }
    }

    /// The next free archive number for `<base>.<N>.tar.gz`.
    ///
    /// Numbers already handed out in this run are remembered, so two
    /// archives with the same base never collide even in dry-run, where no
    /// archive is written to disk.
    pub fn next_archive_number(&mut self, base: &Path) -> u32 {
        if self.tar_suffix == TarSuffixPolicy::Fixed {
            return 0;
        }
        let next = match self.issued.get(base) {
            Some(last) => last + 1,
            None => highest_archive_number(base).map_or(0, |n| n + 1),
        };
        self.issued.insert(base.to_path_buf(), next);
        next
    }
}

fn highest_archive_number(base: &Path) -> Option<u32> {
    let dir = base.parent()?;
    let name = base.file_name()?.to_str()?;
    let prefix = format!("{name}.");
    fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let file_name = entry.file_name().into_string().ok()?;
            file_name
                .strip_prefix(&prefix)?
                .strip_suffix(".tar.gz")?
                .parse::<u32>()
                .ok()
        })
        .max()
}

/// An adapter's output for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Notices reported at WARNING level before anything runs.
    pub warnings: Vec<String>,
    /// Commands that must succeed before the transfer (e.g. `borg init`).
    pub prepare: Vec<Command>,
    /// The transfer itself; `None` for script-only sources.
    pub transfer: Option<Command>,
    /// Directories the engine creates before running (skipped in dry-run).
    pub directories: Vec<PathBuf>,
}

impl Plan {
    pub fn transfer(command: Command) -> Self {
        Self {
            transfer: Some(command),
            ..Self::default()
        }
    }

    pub fn with_directory(mut self, dir: Option<&Path>) -> Self {
        if let Some(dir) = dir
            && !self.directories.iter().any(|known| known == dir)
        {
            self.directories.push(dir.to_path_buf());
        }
        self
    }

    /// Every command in execution order.
    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.prepare.iter().chain(self.transfer.iter())
    }
}

/// The capability every backup engine adapter provides.
///
/// Synthesis is a pure function of validated data plus the run context, so
/// it cannot fail; only running the resulting commands can.
pub trait BackendAdapter: Sync {
    /// The engine name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Translates one source into the commands that back it up.
    ///
    /// # Arguments
    /// * `request`: The source, where to read it from and where its backup
    ///   lives below the target.
    /// * `context`: Run-wide state shared by all sources of the run.
    ///
    /// # Returns
    /// The commands in execution order, the warnings to show first and the
    /// directories the engine creates before running anything.
    fn synthesize(&self, request: &SynthesisRequest<'_>, context: &mut SynthesisContext) -> Plan;
}

/// The adapter for a method. This is the only place that maps methods to
/// adapters.
pub fn adapter(method: Method) -> &'static dyn BackendAdapter {
    match method {
        Method::Rsync => &rsync::RsyncAdapter,
        Method::Tar => &tar::TarAdapter,
        Method::Borg => &borg::BorgAdapter,
        Method::Duplicity => &duplicity::DuplicityAdapter,
        Method::Script => &script::ScriptAdapter,
    }
}
