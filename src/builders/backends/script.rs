use std::collections::BTreeMap;

use crate::builders::backends::{BackendAdapter, Plan, SynthesisContext, SynthesisRequest};
use crate::builders::command::Command;
use crate::core::config::ScriptCommand;

/// A source whose whole backup is its before/after scripts.
pub struct ScriptAdapter;

impl BackendAdapter for ScriptAdapter {
    fn name(&self) -> &'static str {
        "script"
    }

    fn synthesize(&self, _request: &SynthesisRequest<'_>, _context: &mut SynthesisContext) -> Plan {
        Plan::default()
    }
}

/// Builds the command for one script.
///
/// # Arguments
/// * `script`: The script, already split into its argument vector. The
///   vector is passed through untouched, no shell is involved.
/// * `env`: Variables set for the script on top of the inherited
///   environment, from the source's `scripts.env`.
///
/// # Returns
/// A command with no working directory, so scripts run where the tool was
/// started.
pub fn script_command(script: &ScriptCommand, env: &BTreeMap<String, String>) -> Command {
    env.iter().fold(Command::from_argv(script.argv.clone()), |command, (key, value)| {
        command.env(key.as_str(), value.as_str())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo() -> ScriptCommand {
        ScriptCommand {
            argv: vec!["echo".to_string(), "Goodbye!".to_string()],
        }
    }

    #[test]
    fn test_script_command_keeps_argv() {
        let cmd = script_command(&echo(), &BTreeMap::new());
        assert_eq!(cmd.render_argv(), r#""echo" "Goodbye!""#);
        assert_eq!(cmd.render_env(), "None");
        assert_eq!(cmd.render_cwd(), "None");
    }

    #[test]
    fn test_script_environment_is_rendered() {
        let env = BTreeMap::from([
            ("PGUSER".to_string(), "backup".to_string()),
            ("PGHOST".to_string(), "db".to_string()),
        ]);
        let cmd = script_command(&echo(), &env);
        assert_eq!(cmd.render_env(), "PGHOST=db PGUSER=backup");
    }
}
