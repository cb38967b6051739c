use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

/// A fully synthesized external command.
///
/// Commands are plain values: adapters build them, the executor either runs
/// them or renders them as text. Nothing mutates a command once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    argv: Vec<String>,
    env: Option<BTreeMap<String, String>>,
    cwd: Option<PathBuf>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            argv: vec![program.into()],
            env: None,
            cwd: None,
        }
    }

    /// Builds a command from an already tokenized argument vector.
    pub fn from_argv(argv: Vec<String>) -> Self {
        Self {
            argv,
            env: None,
            cwd: None,
        }
    }

    /// Prefixes the command with `sudo` when `elevated` is set.
    pub fn elevated(program: &str, elevated: bool) -> Self {
        if elevated {
            Self::new("sudo").arg(program)
        } else {
            Self::new(program)
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, cwd: Option<&Path>) -> Self {
        self.cwd = cwd.map(Path::to_path_buf);
        self
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// The program that actually does the work, skipping a `sudo` prefix.
    pub fn tool(&self) -> &str {
        match self.argv.as_slice() {
            [sudo, tool, ..] if sudo == "sudo" => tool,
            _ => self.program(),
        }
    }

    /// `"a" "b" "c"`, the argument vector as printed in verbose output.
    pub fn render_argv(&self) -> String {
        self.argv
            .iter()
            .map(|arg| format!("\"{arg}\""))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn render_env(&self) -> String {
        match &self.env {
            None => "None".to_string(),
            Some(env) => env
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    pub fn render_cwd(&self) -> String {
        match &self.cwd {
            None => "None".to_string(),
            Some(cwd) => cwd.display().to_string(),
        }
    }

    /// Converts into a `std::process::Command` ready to spawn.
    pub fn to_process(&self) -> std::process::Command {
        let mut process = std::process::Command::new(OsStr::new(self.program()));
        process.args(self.argv.iter().skip(1));
        if let Some(env) = &self.env {
            process.envs(env);
        }
        if let Some(cwd) = &self.cwd {
            process.current_dir(cwd);
        }
        process
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render_argv())
    }
}
