use crate::builders::backends::{BackendAdapter, Plan, SynthesisContext, SynthesisRequest};
use crate::builders::command::Command;
use crate::builders::rules::RuleKind;

/// Encrypted incremental volumes written to a `file://` URL.
pub struct DuplicityAdapter;

impl BackendAdapter for DuplicityAdapter {
    fn name(&self) -> &'static str {
        "duplicity"
    }

    fn synthesize(&self, request: &SynthesisRequest<'_>, _context: &mut SynthesisContext) -> Plan {
        let source = request.source;
        let files = request.layout.files_path();

        let mut command = Command::elevated("duplicity", source.sudo)
            .args(["--volsize", "1024", "--full-if-older-than", "1D"]);
        // duplicity evaluates selection options in order, first match wins.
        for rule in &source.rules {
            let value = selection_value(request, &rule.value);
            match rule.kind {
                RuleKind::Exclude => command = command.arg(format!("--exclude={value}")),
                RuleKind::Include => command = command.arg(format!("--include={value}")),
                RuleKind::Pattern => {}
            }
        }
        if source.rules.has(RuleKind::Include) {
            command = command.arg("--exclude=**");
        }

        let command = command
            .arg(request.path_arg())
            .arg(format!("file://{}", files.display()))
            .current_dir(request.working_dir);

        Plan::transfer(command).with_directory(files.parent())
    }
}

/// duplicity only accepts selections below the directory it backs up, so
/// absolute paths of a mounted source are moved below the mount point.
fn selection_value(request: &SynthesisRequest<'_>, value: &str) -> String {
    match request.mounted_relative(value) {
        Some(relative) if relative.as_os_str().is_empty() => request.path_arg(),
        Some(relative) => request.path.join(relative).display().to_string(),
        None => value.to_string(),
    }
}
