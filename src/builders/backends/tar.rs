use crate::builders::backends::{BackendAdapter, Plan, SynthesisContext, SynthesisRequest};
use crate::builders::command::Command;
use crate::builders::rules::RuleKind;

/// Incremental gzip archives: `<stem>.snapshot` holds the GNU tar listing,
/// every run adds `<stem>.<N>.tar.gz`.
pub struct TarAdapter;

impl BackendAdapter for TarAdapter {
    fn name(&self) -> &'static str {
        "tar"
    }

    fn synthesize(&self, request: &SynthesisRequest<'_>, context: &mut SynthesisContext) -> Plan {
        let source = request.source;
        let base = request.layout.files_dir().join(request.layout.stem());
        let number = context.next_archive_number(&base);

        let snapshot = format!("{}.snapshot", base.display());
        let archive = format!("{}.{number}.tar.gz", base.display());

        let command = Command::elevated("tar", source.sudo)
            .args(["--create", "--gzip"])
            .arg(format!("--listed-incremental={snapshot}"))
            .arg("--verbose")
            .args(
                source
                    .rules
                    .values(RuleKind::Exclude)
                    .map(|value| format!("--exclude={}", member_pattern(request, value))),
            )
            .args(["--file".to_string(), archive])
            .arg(request.relative_path_arg())
            .current_dir(request.working_dir);

        Plan::transfer(command).with_directory(base.parent())
    }
}

/// Inside a mount the archive is made of `.`, so members are named `./...`
/// and absolute excludes have to be spelled the same way.
fn member_pattern(request: &SynthesisRequest<'_>, value: &str) -> String {
    match request.mounted_relative(value) {
        Some(relative) if relative.as_os_str().is_empty() => ".".to_string(),
        Some(relative) => format!("./{}", relative.display()),
        None => value.to_string(),
    }
}
