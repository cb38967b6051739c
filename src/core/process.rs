use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::builders::command::Command;
use crate::builders::reporter::Reporter;
use crate::core::errors::{BackupError, Result};

/// Runs external commands to completion.
pub trait CommandRunner: Send + Sync {
    /// Returns the exit code, or `None` if the child was killed by a signal.
    fn run(&self, command: &Command) -> Result<Option<i32>>;
}

/// Spawns real processes with inherited stdio so the tools' own progress
/// output reaches the terminal.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &Command) -> Result<Option<i32>> {
        let status = command
            .to_process()
            .status()
            .map_err(|source| BackupError::Spawn {
                program: command.program().to_string(),
                source,
            })?;
        Ok(status.code())
    }
}

/// Records every command instead of running it. Tools can be told to
/// fail with a given exit code, or to raise an interrupt flag when run.
#[derive(Debug, Clone, Default)]
pub struct RecordingRunner {
    commands: Arc<Mutex<Vec<Command>>>,
    exit_codes: Arc<Mutex<HashMap<String, i32>>>,
    interrupts: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command whose tool (program without `sudo`) is `tool` exits
    /// with `code`.
    pub fn fail_with(self, tool: &str, code: i32) -> Self {
        if let Ok(mut codes) = self.exit_codes.lock() {
            codes.insert(tool.to_string(), code);
        }
        self
    }

    /// Running `tool` sets `flag`, like a Ctrl+C arriving while it runs.
    pub fn interrupt_on(self, tool: &str, flag: Arc<AtomicBool>) -> Self {
        if let Ok(mut interrupts) = self.interrupts.lock() {
            interrupts.insert(tool.to_string(), flag);
        }
        self
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// The tool of every recorded command, in order.
    pub fn tools(&self) -> Vec<String> {
        self.commands()
            .iter()
            .map(|command| command.tool().to_string())
            .collect()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, command: &Command) -> Result<Option<i32>> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.clone());
        }
        let tool = command.tool();
        if let Some(flag) = self.interrupts.lock().ok().and_then(|i| i.get(tool).cloned()) {
            flag.store(true, Ordering::SeqCst);
            return Ok(Some(130));
        }
        let code = self
            .exit_codes
            .lock()
            .ok()
            .and_then(|codes| codes.get(tool).copied())
            .unwrap_or(0);
        Ok(Some(code))
    }
}

/// Renders commands at the verbose tier, then runs them, or only renders
/// them in a dry run.
#[derive(Clone)]
pub struct Executor {
    runner: Arc<dyn CommandRunner>,
    reporter: Arc<dyn Reporter>,
    dry_run: bool,
}

impl Executor {
    pub fn new(runner: Arc<dyn CommandRunner>, reporter: Arc<dyn Reporter>, dry_run: bool) -> Self {
        Self {
            runner,
            reporter,
            dry_run,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn reporter(&self) -> &dyn Reporter {
        self.reporter.as_ref()
    }

    /// A simulated command always "exits" with 0.
    pub fn execute(&self, command: &Command) -> Result<Option<i32>> {
        self.reporter.detail(&format!("Command: {}", command.render_argv()));
        self.reporter.detail(&format!("Env: {}", command.render_env()));
        self.reporter.detail(&format!("Cwd: {}", command.render_cwd()));
        if self.dry_run {
            return Ok(Some(0));
        }
        self.runner.run(command)
    }

    /// Like `execute`, but a non-zero exit fails the source's backup.
    pub fn execute_checked(&self, command: &Command, backend: &str, source_key: &str) -> Result<()> {
        match self.execute(command)? {
            Some(0) => Ok(()),
            code => Err(BackupError::CommandExecution {
                backend: backend.to_string(),
                source_key: source_key.to_string(),
                code,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::reporter::{MemoryReporter, Severity};

    fn executor(runner: RecordingRunner, dry_run: bool) -> (Executor, Arc<MemoryReporter>) {
        let reporter = Arc::new(MemoryReporter::new());
        (Executor::new(Arc::new(runner), reporter.clone(), dry_run), reporter)
    }

    #[test]
    fn test_rendering_precedes_execution() {
        let runner = RecordingRunner::new();
        let (executor, reporter) = executor(runner.clone(), false);

        let code = executor.execute(&Command::new("echo").arg("Hello World")).unwrap();

        assert_eq!(code, Some(0));
        assert_eq!(
            reporter.messages(Severity::Detail),
            vec![r#"Command: "echo" "Hello World""#, "Env: None", "Cwd: None"]
        );
        assert_eq!(runner.tools(), vec!["echo"]);
    }

    #[test]
    fn test_dry_run_never_reaches_runner() {
        let runner = RecordingRunner::new().fail_with("rsync", 23);
        let (executor, reporter) = executor(runner.clone(), true);

        executor
            .execute_checked(&Command::new("rsync"), "rsync", "home")
            .unwrap();

        assert!(runner.commands().is_empty());
        assert_eq!(reporter.messages(Severity::Detail).len(), 3);
    }

    #[test]
    fn test_non_zero_exit_is_an_execution_error() {
        let runner = RecordingRunner::new().fail_with("rsync", 23);
        let (executor, _) = executor(runner, false);

        let err = executor
            .execute_checked(&Command::elevated("rsync", true), "rsync", "home")
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "rsync backup of source 'home' failed with exit code 23"
        );
    }
}
