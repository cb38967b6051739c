use crate::builders::backends::{BackendAdapter, Plan, SynthesisContext, SynthesisRequest};
use crate::builders::command::Command;
use crate::builders::rules::RuleKind;

/// Deduplicating archives in a borg repository at `<host>/files/<key>`.
///
/// A missing repository is initialized on the fly with a WARNING, so a new
/// source needs no manual setup.
pub struct BorgAdapter;

impl BackendAdapter for BorgAdapter {
    fn name(&self) -> &'static str {
        "borg"
    }

    fn synthesize(&self, request: &SynthesisRequest<'_>, _context: &mut SynthesisContext) -> Plan {
        let source = request.source;
        let options = &source.borg;
        let repo = request.layout.files_path();

        let mut plan = Plan::default();
        if !repo.join("config").is_file() {
            plan.warnings.push(format!(
                "No borg repository found in {}, initializing it.",
                repo.display()
            ));
            plan.prepare.push(
                Command::elevated("borg", source.sudo)
                    .args(["init", "--encryption", options.encryption.as_str()])
                    .path_arg(&repo),
            );
        }

        let mut create = Command::elevated("borg", source.sudo).args(["create", "--verbose"]);
        if let Some(filter) = &options.filter {
            create = create.arg(format!("--filter={filter}"));
        }
        let create = create
            .args(["--list", "--stats", "--show-rc", "--compression", options.compression.as_str()])
            .arg("--exclude-caches")
            .args(source.rules.values(RuleKind::Exclude).map(|v| format!("--exclude={v}")))
            .args(source.rules.values(RuleKind::Pattern).map(|v| format!("--pattern={v}")))
            .arg(format!("{}::{}", repo.display(), archive_name(request)))
            .arg(request.relative_path_arg())
            .current_dir(request.working_dir);

        plan.transfer = Some(create);
        plan.with_directory(repo.parent())
    }
}

/// `{hostname}[:label]-{now}`. The braces are borg placeholders and are
/// passed through untouched for borg to expand.
fn archive_name(request: &SynthesisRequest<'_>) -> String {
    let host = match request.source.remote() {
        Some(remote) => remote.host.clone(),
        None => "{hostname}".to_string(),
    };
    let key = request.layout.key();
    if key.is_empty() {
        format!("{host}-{{now}}")
    } else {
        format!("{host}:{}-{{now}}", key.replace('/', "_"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::backends::{TargetLayout, fixtures};
    use crate::builders::rules::Rule;
    use crate::core::config::{Method, RemoteSpec, SourceLocation};
    use std::fs;
    use std::path::{Path, PathBuf};

    #[test]
    fn test_missing_repository_is_initialized() {
        let mut source = fixtures::source(
            "/",
            Method::Borg,
            vec![Rule::exclude("**/.cache"), Rule::pattern("+etc"), Rule::pattern("-**")],
        );
        source.borg.filter = Some("AMUCE".to_string());
        let layout = TargetLayout::new(Path::new("/nonexistent/B"), "laptop", source.key());
        let path = PathBuf::from("/");
        let request = SynthesisRequest {
            source: &source,
            path: &path,
            working_dir: None,
            layout: &layout,
        };
        let plan = BorgAdapter.synthesize(&request, &mut SynthesisContext::default());

        assert_eq!(
            plan.warnings,
            ["No borg repository found in /nonexistent/B/laptop/files, initializing it."]
        );
        assert_eq!(
            plan.prepare[0].argv(),
            ["borg", "init", "--encryption", "repokey", "/nonexistent/B/laptop/files"]
        );
        assert_eq!(
            plan.transfer.unwrap().argv(),
            [
                "borg",
                "create",
                "--verbose",
                "--filter=AMUCE",
                "--list",
                "--stats",
                "--show-rc",
                "--compression",
                "zstd,11",
                "--exclude-caches",
                "--exclude=**/.cache",
                "--pattern=+etc",
                "--pattern=-**",
                "/nonexistent/B/laptop/files::{hostname}-{now}",
                "/",
            ]
        );
    }

    #[test]
    fn test_existing_repository_skips_init() {
        let dir = tempfile::tempdir().unwrap();
        let source = fixtures::source("/home", Method::Borg, vec![]);
        let layout = TargetLayout::new(dir.path(), "laptop", source.key());
        fs::create_dir_all(layout.files_path()).unwrap();
        fs::write(layout.files_path().join("config"), "[repository]\n").unwrap();

        let path = PathBuf::from("/home");
        let request = SynthesisRequest {
            source: &source,
            path: &path,
            working_dir: None,
            layout: &layout,
        };
        let plan = BorgAdapter.synthesize(&request, &mut SynthesisContext::default());

        assert!(plan.warnings.is_empty());
        assert!(plan.prepare.is_empty());
        let transfer = plan.transfer.unwrap();
        assert!(
            transfer
                .argv()
                .iter()
                .any(|a| a.ends_with("::{hostname}:home-{now}"))
        );
    }

    #[test]
    fn test_mounted_remote_archive_name_and_cwd() {
        let mut source = fixtures::source("/", Method::Borg, vec![]);
        source.location = SourceLocation::Remote(RemoteSpec::parse("USER@SERVER:/var/lib").unwrap());
        let layout = TargetLayout::new(Path::new("/nonexistent"), "SERVER", source.key());
        let mount = PathBuf::from("/tmp/SERVER-42");
        let request = SynthesisRequest {
            source: &source,
            path: &mount,
            working_dir: Some(&mount),
            layout: &layout,
        };
        let transfer = BorgAdapter
            .synthesize(&request, &mut SynthesisContext::default())
            .transfer
            .unwrap();

        let argv = transfer.argv();
        assert_eq!(argv[argv.len() - 2], "/nonexistent/SERVER/files/var/lib::SERVER:var_lib-{now}");
        assert_eq!(argv[argv.len() - 1], ".");
        assert_eq!(transfer.cwd(), Some(mount.as_path()));
    }
}
