use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::builders::rules::RuleSet;
use crate::builders::validator::{DescriptorValidator, StandardValidator};
use crate::core::errors::BackupError;

/// The backup engines a source can be handed to.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Rsync,
    Tar,
    Borg,
    Duplicity,
    Script,
}

impl Method {
    pub const ALL: [Method; 5] = [
        Method::Rsync,
        Method::Tar,
        Method::Borg,
        Method::Duplicity,
        Method::Script,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Method::Rsync => "rsync",
            Method::Tar => "tar",
            Method::Borg => "borg",
            Method::Duplicity => "duplicity",
            Method::Script => "script",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A `[user@]host:path` remote source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSpec {
    pub user: Option<String>,
    pub host: String,
    pub path: String,
}

fn remote_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:(?P<user>[^@:/\s]+)@)?(?P<host>[^@:/\s]+):(?P<path>.*)$")
            .expect("remote spec pattern is valid")
    })
}

impl RemoteSpec {
    /// Parses a remote spec. Local absolute paths never match because the
    /// host part may not contain a slash.
    pub fn parse(spec: &str) -> Option<Self> {
        let captures = remote_pattern().captures(spec)?;
        let path = captures["path"].to_string();
        Some(Self {
            user: captures.name("user").map(|m| m.as_str().to_string()),
            host: captures["host"].to_string(),
            path: if path.is_empty() { "/".to_string() } else { path },
        })
    }

    /// `user@host`, or just `host` without a user.
    pub fn login(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }
}

impl fmt::Display for RemoteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.login(), self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Local(PathBuf),
    Remote(RemoteSpec),
}

/// How a remote source is mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    /// Directory that receives the generated mount points.
    pub base: Option<PathBuf>,
    pub ssh_config: Option<PathBuf>,
    pub options: Vec<String>,
    pub command: Vec<String>,
    pub unmount: Vec<String>,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            base: None,
            ssh_config: None,
            options: Vec::new(),
            command: vec!["sshfs".to_string()],
            unmount: vec!["fusermount".to_string(), "-u".to_string()],
        }
    }
}

/// One script invocation, already split into its argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCommand {
    pub argv: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scripts {
    pub before: Vec<ScriptCommand>,
    pub after: Vec<ScriptCommand>,
    /// Extra environment for both phases, e.g. `PGPASSFILE` for a dump.
    pub env: BTreeMap<String, String>,
}

impl Scripts {
    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorgOptions {
    pub compression: String,
    pub encryption: String,
    pub filter: Option<String>,
}

impl Default for BorgOptions {
    fn default() -> Self {
        Self {
            compression: "zstd,11".to_string(),
            encryption: "repokey".to_string(),
            filter: None,
        }
    }
}

/// One backup unit, with every inherited setting already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub location: SourceLocation,
    pub method: Method,
    pub dest: Option<String>,
    pub sudo: bool,
    pub rules: RuleSet,
    pub mount: MountOptions,
    pub scripts: Scripts,
    pub borg: BorgOptions,
}

impl Source {
    /// The path being backed up, on whichever machine holds it.
    pub fn path(&self) -> &str {
        match &self.location {
            SourceLocation::Local(path) => path.to_str().unwrap_or_default(),
            SourceLocation::Remote(remote) => &remote.path,
        }
    }

    pub fn remote(&self) -> Option<&RemoteSpec> {
        match &self.location {
            SourceLocation::Remote(remote) => Some(remote),
            SourceLocation::Local(_) => None,
        }
    }

    /// Destination key below `<host>/files`: the explicit `dest`, or the
    /// source path without leading, trailing or repeated slashes.
    pub fn key(&self) -> String {
        normalize_key(self.dest.as_deref().unwrap_or_else(|| self.path()))
    }

    /// Directory name below the target root that groups this source.
    pub fn host<'a>(&'a self, local_host: &'a str) -> &'a str {
        match &self.location {
            SourceLocation::Remote(remote) => &remote.host,
            SourceLocation::Local(_) => local_host,
        }
    }

    /// The human readable name used in progress output.
    pub fn describe(&self) -> String {
        match &self.location {
            SourceLocation::Local(path) => path.display().to_string(),
            SourceLocation::Remote(remote) => {
                format!("{} mounted from {}", remote.path, remote.login())
            }
        }
    }
}

pub fn normalize_key(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// How the numeric suffix of tar archives is chosen.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TarSuffixPolicy {
    /// One past the highest archive number already present.
    #[default]
    Increment,
    /// Always `0`; every run rewrites the same archive name.
    Fixed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub stop_on_failure: bool,
    pub tar_suffix: TarSuffixPolicy,
}

/// A validated backup descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub target: Option<PathBuf>,
    pub settings: Settings,
    pub sources: Vec<Source>,
}

/// The three output tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Errors and the failure summary only.
    #[default]
    Quiet,
    /// One line per source plus completion, and warnings.
    Normal,
    /// Also every command rendering and the validation trace.
    Verbose,
}

impl Verbosity {
    pub fn from_occurrences(count: u8) -> Self {
        match count {
            0 => Verbosity::Quiet,
            1 => Verbosity::Normal,
            _ => Verbosity::Verbose,
        }
    }
}

/// Per-invocation options threaded from the command line into the engine.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub target_override: Option<PathBuf>,
    pub dry_run: bool,
    /// Output tier the logging layer is initialized with.
    pub verbosity: Verbosity,
    pub stop_on_failure: bool,
}

impl RunConfig {
    /// The backup root: the command-line override wins over the descriptor.
    /// Relative paths are anchored at the working directory.
    pub fn target_root(&self, descriptor: &Descriptor) -> Result<Option<PathBuf>, BackupError> {
        match self.target_override.as_ref().or(descriptor.target.as_ref()) {
            Some(target) => Ok(Some(std::path::absolute(target)?)),
            None => Ok(None),
        }
    }
}

pub trait DescriptorProvider {
    fn load_descriptor(&self) -> Result<Descriptor>;
}

/// Reads a descriptor file from disk and runs it through the validator.
pub struct DescriptorLoader {
    path: PathBuf,
}

impl DescriptorLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The path as given by the user, used as the file name in diagnostics.
    pub fn label(&self) -> String {
        self.path.display().to_string()
    }

    pub fn read_text(&self) -> Result<String> {
        fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read descriptor file {}", self.path.display()))
    }
}

impl DescriptorProvider for DescriptorLoader {
    /// Validation failures surface as `BackupError::Validation` inside the
    /// returned `anyhow::Error` so callers can print each diagnostic.
    fn load_descriptor(&self) -> Result<Descriptor> {
        tracing::debug!("Loading descriptor file \"{}\".", self.path.display());
        let text = self.read_text()?;
        let validator = StandardValidator::new();
        validator
            .validate(&self.label(), &text)
            .map_err(|issues| BackupError::Validation(issues).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(path: &str) -> Source {
        Source {
            location: SourceLocation::Local(PathBuf::from(path)),
            method: Method::Rsync,
            dest: None,
            sudo: false,
            rules: RuleSet::default(),
            mount: MountOptions::default(),
            scripts: Scripts::default(),
            borg: BorgOptions::default(),
        }
    }

    #[test]
    fn test_remote_spec_parsing() {
        let spec = RemoteSpec::parse("USER@SERVER:/").unwrap();
        assert_eq!(spec.user.as_deref(), Some("USER"));
        assert_eq!(spec.host, "SERVER");
        assert_eq!(spec.path, "/");
        assert_eq!(spec.login(), "USER@SERVER");
        assert_eq!(spec.to_string(), "USER@SERVER:/");

        let bare = RemoteSpec::parse("nas:").unwrap();
        assert_eq!(bare.user, None);
        assert_eq!(bare.path, "/");

        assert!(RemoteSpec::parse("/home/user").is_none());
        assert!(RemoteSpec::parse("/srv/a:b").is_none());
    }

    #[test]
    fn test_source_keys_are_stable() {
        assert_eq!(local("/").key(), "");
        assert_eq!(local("/boot").key(), "boot");
        assert_eq!(local("/var//lib/").key(), "var/lib");

        let mut media = local("/run/media/DATA");
        media.dest = Some("run/media".to_string());
        assert_eq!(media.key(), "run/media");
    }

    #[test]
    fn test_source_host_and_description() {
        let mut source = local("/");
        assert_eq!(source.host("laptop"), "laptop");
        assert_eq!(source.describe(), "/");

        source.location = SourceLocation::Remote(RemoteSpec::parse("USER@SERVER:/").unwrap());
        assert_eq!(source.host("laptop"), "SERVER");
        assert_eq!(source.describe(), "/ mounted from USER@SERVER");
    }

    #[test]
    fn test_target_override_wins() {
        let descriptor = Descriptor {
            target: Some(PathBuf::from("/mnt/BACKUPS")),
            settings: Settings::default(),
            sources: vec![],
        };
        let mut run = RunConfig::default();
        assert_eq!(
            run.target_root(&descriptor).unwrap(),
            Some(PathBuf::from("/mnt/BACKUPS"))
        );

        run.target_override = Some(PathBuf::from("/srv/other"));
        assert_eq!(
            run.target_root(&descriptor).unwrap(),
            Some(PathBuf::from("/srv/other"))
        );
    }

    #[test]
    fn test_verbosity_tiers() {
        assert_eq!(Verbosity::from_occurrences(0), Verbosity::Quiet);
        assert_eq!(Verbosity::from_occurrences(1), Verbosity::Normal);
        assert_eq!(Verbosity::from_occurrences(3), Verbosity::Verbose);
    }
}
