use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::builders::backends::{self, SynthesisContext, SynthesisRequest, TargetLayout};
use crate::builders::backends::script::script_command;
use crate::builders::reporter::Reporter;
use crate::core::config::{Descriptor, Method, RunConfig, ScriptCommand, Scripts, Source};
use crate::core::errors::{BackupError, Result};
use crate::core::process::{CommandRunner, Executor};
use crate::core::resolver::{ResolvedSource, Resolver};
use crate::core::signals;

/// Where a source is in its lifecycle. Every source that resolved passes
/// through `Cleanup` before it ends `Done` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Pending,
    Resolving,
    Mounted,
    Local,
    CommandBuilt,
    Executing,
    Simulating,
    Cleanup,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub source: String,
    pub key: String,
    /// Every state the source went through, in order.
    pub states: Vec<SourceState>,
    pub error: Option<String>,
}

impl SourceOutcome {
    fn pending(source: &Source) -> Self {
        Self {
            source: source.describe(),
            key: source.key(),
            states: vec![SourceState::Pending],
            error: None,
        }
    }

    pub fn state(&self) -> SourceState {
        self.states.last().copied().unwrap_or(SourceState::Pending)
    }

    fn enter(&mut self, state: SourceState) {
        self.states.push(state);
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: Vec<SourceOutcome>,
    pub interrupted: bool,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        !self.interrupted && self.outcomes.iter().all(|o| o.state() == SourceState::Done)
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state() != SourceState::Done)
            .count()
    }

    pub fn exit_code(&self) -> i32 {
        if self.succeeded() { 0 } else { 1 }
    }
}

/// Drives every source of a descriptor through resolve, synthesize,
/// execute and cleanup, one source at a time.
pub struct BackupEngine {
    descriptor: Descriptor,
    run: RunConfig,
    executor: Executor,
    resolver: Resolver,
    reporter: Arc<dyn Reporter>,
    hostname: String,
    interrupt: Arc<AtomicBool>,
}

impl BackupEngine {
    /// Creates an engine for one run.
    ///
    /// # Arguments
    /// * `descriptor`: The validated descriptor whose sources are backed up.
    /// * `run`: Command-line options; the target override and
    ///   stop-on-failure flag win over the descriptor.
    /// * `runner`: Spawns the external commands. Tests pass a
    ///   `RecordingRunner`.
    /// * `reporter`: Receives every narrative line and diagnostic.
    pub fn new(
        descriptor: Descriptor,
        run: RunConfig,
        runner: Arc<dyn CommandRunner>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let executor = Executor::new(runner, reporter.clone(), run.dry_run);
        let hostname = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Self {
            descriptor,
            run,
            resolver: Resolver::new(executor.clone()),
            executor,
            reporter,
            hostname,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Groups local sources under `name` instead of the machine's hostname.
    pub fn with_hostname(mut self, name: impl Into<String>) -> Self {
        self.hostname = name.into();
        self
    }

    /// Watches `flag` (set from the signal handler) between commands.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    /// Backs up every source in declaration order.
    ///
    /// A failing source is reported at CRITICAL and the run moves on to the
    /// next one, unless stop-on-failure is set or the run was interrupted;
    /// the remaining sources then stay `Pending`. Mounts are released on
    /// every path.
    ///
    /// # Returns
    /// The per-source outcomes. `Err` only for problems that keep the run
    /// from starting, such as a missing target.
    pub fn run(&self) -> Result<RunReport> {
        let target = self.run.target_root(&self.descriptor)?;
        let needs_target = self
            .descriptor
            .sources
            .iter()
            .any(|source| source.method != Method::Script);
        if target.is_none() && needs_target {
            return Err(BackupError::Configuration(
                "No backup target given, set one in the descriptor or on the command line."
                    .to_string(),
            ));
        }

        if let Some(target) = &target
            && self.run.target_override.is_some()
        {
            self.reporter
                .info(&format!("Using '{}' as backup target.", target.display()));
            if !target.exists() {
                self.reporter.warning("The given target path does not exist.");
            }
        }
        if self.run.dry_run {
            self.reporter
                .warning("Performing dry run, no changes will be done.");
        }

        let stop_on_failure = self.run.stop_on_failure || self.descriptor.settings.stop_on_failure;
        let mut context = SynthesisContext::new(self.descriptor.settings.tar_suffix);
        let mut scripts = 0;
        let mut report = RunReport::default();

        for source in &self.descriptor.sources {
            let mut outcome = SourceOutcome::pending(source);
            if report.interrupted || (stop_on_failure && report.failed() > 0) {
                report.outcomes.push(outcome);
                continue;
            }

            let result = self.process(source, target.as_deref(), &mut context, &mut scripts, &mut outcome);
            match result {
                Ok(()) => outcome.enter(SourceState::Done),
                Err(err) => {
                    if matches!(err, BackupError::Interrupted) {
                        report.interrupted = true;
                    }
                    self.reporter.critical(&err.to_string());
                    outcome.error = Some(err.to_string());
                    outcome.enter(SourceState::Failed);
                }
            }
            report.outcomes.push(outcome);
        }

        if report.succeeded() {
            self.reporter.info(if self.run.dry_run {
                "Dry run done."
            } else {
                "Backup complete."
            });
        } else {
            self.reporter.critical(&format!(
                "{} of {} sources did not complete.",
                report.failed(),
                report.outcomes.len()
            ));
        }
        Ok(report)
    }

    /// Resolves, backs up and releases one source. The release runs whatever
    /// happened in between.
    fn process(
        &self,
        source: &Source,
        target: Option<&Path>,
        context: &mut SynthesisContext,
        scripts: &mut u32,
        outcome: &mut SourceOutcome,
    ) -> Result<()> {
        outcome.enter(SourceState::Resolving);
        let mut resolved = self.resolver.resolve(source)?;
        outcome.enter(if resolved.is_mounted() {
            SourceState::Mounted
        } else {
            SourceState::Local
        });

        let result = self.back_up(source, &resolved, target, context, scripts, outcome);

        outcome.enter(SourceState::Cleanup);
        let released = resolved.release();
        match (result, released) {
            (Err(err), Err(unmount)) => {
                self.reporter.critical(&unmount.to_string());
                Err(err)
            }
            (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    fn back_up(
        &self,
        source: &Source,
        resolved: &ResolvedSource,
        target: Option<&Path>,
        context: &mut SynthesisContext,
        scripts: &mut u32,
        outcome: &mut SourceOutcome,
    ) -> Result<()> {
        let key = source.key();
        for script in &source.scripts.before {
            self.run_script(script, &source.scripts, &key, scripts)?;
        }

        self.reporter
            .info(&format!("Backing up source {}.", source.describe()));

        if source.method != Method::Script {
            let Some(target) = target else {
                return Err(BackupError::Configuration(format!(
                    "No backup target for source {}.",
                    source.describe()
                )));
            };
            let adapter = backends::adapter(source.method);
            let layout = TargetLayout::new(target, source.host(&self.hostname), key.as_str());
            let request = SynthesisRequest {
                source,
                path: &resolved.effective_path,
                working_dir: resolved.working_dir.as_deref(),
                layout: &layout,
            };
            let plan = adapter.synthesize(&request, context);
            outcome.enter(SourceState::CommandBuilt);

            for warning in &plan.warnings {
                self.reporter.warning(warning);
            }
            if !self.executor.is_dry_run() {
                for dir in &plan.directories {
                    fs::create_dir_all(dir)?;
                }
            }

            outcome.enter(if self.executor.is_dry_run() {
                SourceState::Simulating
            } else {
                SourceState::Executing
            });
            for command in plan.commands() {
                self.check_interrupt()?;
                let executed = self.executor.execute_checked(command, adapter.name(), &key);
                self.check_interrupt()?;
                executed?;
            }
        }

        for script in &source.scripts.after {
            self.run_script(script, &source.scripts, &key, scripts)?;
        }
        Ok(())
    }

    fn run_script(
        &self,
        script: &ScriptCommand,
        scripts: &Scripts,
        key: &str,
        counter: &mut u32,
    ) -> Result<()> {
        self.check_interrupt()?;
        *counter += 1;
        self.reporter.info(&format!("Running script {counter}."));
        let executed = self
            .executor
            .execute_checked(&script_command(script, &scripts.env), "script", key);
        // A child killed by Ctrl+C fails too; report the interrupt instead.
        self.check_interrupt()?;
        executed
    }

    fn check_interrupt(&self) -> Result<()> {
        if signals::is_interrupted(&self.interrupt) {
            Err(BackupError::Interrupted)
        } else {
            Ok(())
        }
    }
}
