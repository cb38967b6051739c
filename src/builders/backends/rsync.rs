use crate::builders::backends::{BackendAdapter, Plan, SynthesisContext, SynthesisRequest};
use crate::builders::command::Command;
use crate::builders::rules::RuleKind;

const FLAGS: &str = "-abuchvz";
const ELEVATED_FLAGS: &str = "-abuchPpzz";

/// Mirrors a source into `<host>/files/<key>`, moving replaced files into
/// `<host>/backup/<key>`.
pub struct RsyncAdapter;

impl BackendAdapter for RsyncAdapter {
    fn name(&self) -> &'static str {
        "rsync"
    }

    fn synthesize(&self, request: &SynthesisRequest<'_>, _context: &mut SynthesisContext) -> Plan {
        let source = request.source;
        let files = request.layout.files_path();
        let backup = request.layout.backup_path();

        let mut command = Command::elevated("rsync", source.sudo)
            .args(["--delete", "--delete-excluded", "--stats"])
            .arg(format!("--backup-dir={}", backup.display()))
            .arg(if source.sudo { ELEVATED_FLAGS } else { FLAGS });

        for rule in &source.rules {
            match rule.kind {
                RuleKind::Exclude => command = command.arg(format!("--exclude={}", rule.value)),
                RuleKind::Include => command = command.arg(format!("--include={}", include_filter(&rule.value))),
                // Rejected by the validator for every backend but borg.
                RuleKind::Pattern => {}
            }
        }
        if source.rules.has(RuleKind::Include) {
            command = command.arg("--exclude=*");
        }

        let command = command
            .arg(source_arg(&request.path_arg(), source.dest.is_some()))
            .path_arg(&files)
            .current_dir(request.working_dir);

        Plan::transfer(command)
            .with_directory(files.parent())
            .with_directory(backup.parent())
    }
}

/// An include of a directory must also take in everything below it.
fn include_filter(value: &str) -> String {
    if value.contains('*') {
        value.to_string()
    } else {
        format!("{}/***", value.trim_end_matches('/'))
    }
}

/// `path/` copies the directory's contents; without the slash rsync creates
/// the directory itself below the destination.
fn source_arg(path: &str, copy_directory: bool) -> String {
    if copy_directory {
        match path.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        }
    } else if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::backends::{TargetLayout, fixtures};
    use crate::builders::rules::Rule;
    use crate::core::config::Method;
    use std::path::{Path, PathBuf};

    fn plan_for(source: &crate::core::config::Source, layout: &TargetLayout) -> Plan {
        let path = PathBuf::from(source.path());
        let request = SynthesisRequest {
            source,
            path: &path,
            working_dir: None,
            layout,
        };
        RsyncAdapter.synthesize(&request, &mut SynthesisContext::default())
    }

    #[test]
    fn test_root_source_with_excludes() {
        let source = fixtures::source("/", Method::Rsync, vec![Rule::exclude("/proc"), Rule::exclude("/tmp")]);
        let layout = TargetLayout::new(Path::new("/mnt/B"), "laptop", source.key());
        let plan = plan_for(&source, &layout);
        let transfer = plan.transfer.unwrap();

        assert_eq!(
            transfer.argv(),
            [
                "rsync",
                "--delete",
                "--delete-excluded",
                "--stats",
                "--backup-dir=/mnt/B/laptop/backup",
                "-abuchvz",
                "--exclude=/proc",
                "--exclude=/tmp",
                "/",
                "/mnt/B/laptop/files",
            ]
        );
        assert!(plan.prepare.is_empty());
        assert_eq!(plan.directories, vec![PathBuf::from("/mnt/B/laptop")]);
    }

    #[test]
    fn test_includes_expand_and_close_with_catch_all() {
        let source = fixtures::source(
            "/",
            Method::Rsync,
            vec![Rule::include("/boot"), Rule::include("/home/*"), Rule::exclude("/home/u/tmp")],
        );
        let layout = TargetLayout::new(Path::new("/t"), "h", source.key());
        let argv = plan_for(&source, &layout).transfer.unwrap().argv().to_vec();

        let filters: Vec<_> = argv.iter().filter(|a| a.starts_with("--include") || a.starts_with("--exclude")).collect();
        assert_eq!(
            filters,
            ["--include=/boot/***", "--include=/home/*", "--exclude=/home/u/tmp", "--exclude=*"]
        );
    }

    #[test]
    fn test_elevated_flags_and_dest_copy() {
        let mut source = fixtures::source("/run/media/DATA/", Method::Rsync, vec![]);
        source.sudo = true;
        source.dest = Some("run/media".to_string());
        let layout = TargetLayout::new(Path::new("/t"), "h", source.key());
        let transfer = plan_for(&source, &layout).transfer.unwrap();

        assert_eq!(transfer.argv()[..2], ["sudo", "rsync"]);
        assert!(transfer.argv().contains(&"-abuchPpzz".to_string()));
        let tail = &transfer.argv()[transfer.argv().len() - 2..];
        assert_eq!(tail, ["/run/media/DATA", "/t/h/files/run/media"]);
    }

    #[test]
    fn test_contents_source_argument() {
        assert_eq!(source_arg("/", false), "/");
        assert_eq!(source_arg("/etc", false), "/etc/");
        assert_eq!(source_arg("/", true), "/");
    }
}
