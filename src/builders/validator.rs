use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::builders::rules::{Rule, RuleKind, RuleSet};
use crate::builders::schema::{self, Locator};
use crate::core::config::{
    BorgOptions, Descriptor, Method, MountOptions, RemoteSpec, ScriptCommand, Scripts, Settings,
    Source, SourceLocation, TarSuffixPolicy, normalize_key,
};
use crate::core::errors::ValidationError;

/// The `DescriptorValidator` trait defines the public interface for turning a
/// descriptor document into a validated [`Descriptor`].
///
/// Validation runs in two phases. The structural phase checks the document
/// against the descriptor schema; the semantic phase checks constraints that
/// span several fields. Either phase failing makes the descriptor invalid and
/// every issue found is returned, not just the first.
pub trait DescriptorValidator {
    /// Runs both phases over the document text.
    ///
    /// # Arguments
    /// * `file`: The name used for the file in diagnostics.
    /// * `text`: The raw descriptor document.
    fn validate(&self, file: &str, text: &str) -> Result<Descriptor, Vec<ValidationError>>;

    /// Checks the cross-field constraints of a structurally valid document
    /// and returns one diagnostic per broken constraint.
    fn validate_semantics(&self, file: &str, document: &Value, locator: &Locator)
    -> Vec<ValidationError>;
}

/// The `StandardValidator` is the concrete validator used by the loader and
/// the `--is-valid` mode.
pub struct StandardValidator;

impl Default for StandardValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// A source as written, before inherited settings are applied.
struct DraftSource {
    path: String,
    method: Option<Method>,
    dest: Option<String>,
    sudo: Option<bool>,
    rules: Vec<Rule>,
    mount: Option<MountOptions>,
    scripts: Scripts,
    borg: Option<BorgOptions>,
    unterminated_scripts: Vec<String>,
}

/// The whole document as written.
struct Draft {
    target: Option<PathBuf>,
    method: Option<Method>,
    sudo: bool,
    rules: Vec<Rule>,
    settings: Settings,
    sources: Vec<DraftSource>,
}

impl StandardValidator {
    /// Creates a new instance of `StandardValidator`.
    pub fn new() -> Self {
        Self
    }

    /// Checks one rule against the method of the source it applies to.
    fn check_rule(&self, rule: &Rule, method: Method) -> Option<&'static str> {
        match (rule.kind, method) {
            (_, Method::Script) => Some("Script sources do not take rules."),
            (RuleKind::Pattern, Method::Borg) => None,
            (RuleKind::Pattern, _) => Some("The pattern rule can only be used with borg."),
            (RuleKind::Include, Method::Borg) => Some("Borg does not support include, use pattern."),
            (RuleKind::Include, Method::Tar) => Some("Tar does not support include."),
            _ => None,
        }
    }

    /// Two sources writing to the same destination would overwrite each
    /// other's snapshots and repositories. Script sources write nothing
    /// below the target and never conflict.
    fn check_destination_conflicts(&self, draft: &Draft) -> Vec<(usize, String)> {
        let mut seen: HashMap<(Option<String>, String), usize> = HashMap::new();
        let mut conflicts = Vec::new();

        for (index, source) in draft.sources.iter().enumerate() {
            if source.method.or(draft.method) == Some(Method::Script) {
                continue;
            }
            let (host, path) = match RemoteSpec::parse(&source.path) {
                Some(remote) => (Some(remote.host), remote.path),
                None => (None, source.path.clone()),
            };
            let key = normalize_key(source.dest.as_deref().unwrap_or(&path));
            if let Some(first) = seen.get(&(host.clone(), key.clone())) {
                conflicts.push((
                    index,
                    format!(
                        "Source {} has the same destination as source {}.",
                        source.path, draft.sources[*first].path
                    ),
                ));
            } else {
                seen.insert((host, key), index);
            }
        }
        conflicts
    }

    /// The destination key must name a directory strictly inside the host's
    /// `files` directory.
    fn check_destination(&self, source: &DraftSource) -> Option<(&'static str, String)> {
        let escapes = |key: &str| key.split('/').any(|segment| segment == "..");
        match &source.dest {
            Some(dest) if escapes(dest) || normalize_key(dest).is_empty() => Some((
                "dest",
                format!("Destination '{dest}' must be a relative path inside the backup target."),
            )),
            None if escapes(&source.path) => Some((
                "path",
                format!("Source path '{}' may not contain '..'.", source.path),
            )),
            _ => None,
        }
    }
}

impl DescriptorValidator for StandardValidator {
    fn validate(&self, file: &str, text: &str) -> Result<Descriptor, Vec<ValidationError>> {
        let document = schema::validate_structure(file, text)?;
        tracing::debug!("Descriptor file {file} matches the descriptor schema.");

        let locator = Locator::new(text);
        let issues = self.validate_semantics(file, &document, &locator);
        if !issues.is_empty() {
            return Err(issues);
        }
        Ok(build_descriptor(read_draft(&document)))
    }

    fn validate_semantics(
        &self,
        file: &str,
        document: &Value,
        locator: &Locator,
    ) -> Vec<ValidationError> {
        let draft = read_draft(document);
        let mut issues: Vec<ValidationError> = Vec::new();
        let mut reported: HashSet<(String, &'static str)> = HashSet::new();
        let issue = |path: String, message: String, issues: &mut Vec<ValidationError>| {
            issues.push(ValidationError::semantic(file, locator.locate(&path), message));
        };

        for (index, source) in draft.sources.iter().enumerate() {
            let at = format!("sources[{index}]");
            let remote = RemoteSpec::parse(&source.path);

            if remote.is_none() && !Path::new(&source.path).is_absolute() {
                issue(
                    format!("{at}.path"),
                    format!(
                        "Source path '{}' must be absolute or of the form [user@]host:path.",
                        source.path
                    ),
                    &mut issues,
                );
            }
            if let Some((key, message)) = self.check_destination(source) {
                issue(format!("{at}.{key}"), message, &mut issues);
            }
            if remote.is_none() && source.mount.is_some() {
                issue(
                    format!("{at}.mount"),
                    "The mount option can only be used with remote sources.".to_string(),
                    &mut issues,
                );
            }

            let Some(method) = source.method.or(draft.method) else {
                issue(
                    at.clone(),
                    format!(
                        "No backup method given for source {}, set one on the source or the descriptor.",
                        source.path
                    ),
                    &mut issues,
                );
                continue;
            };

            // Script sources do not inherit the descriptor-wide rules.
            let global = draft
                .rules
                .iter()
                .enumerate()
                .filter(|_| method != Method::Script)
                .map(|(i, rule)| (format!("rules[{i}]"), rule));
            let local = source
                .rules
                .iter()
                .enumerate()
                .map(|(i, rule)| (format!("{at}.rules[{i}]"), rule));
            for (path, rule) in global.chain(local) {
                if let Some(message) = self.check_rule(rule, method)
                    && reported.insert((path.clone(), message))
                {
                    issue(path, message.to_string(), &mut issues);
                }
            }

            if method == Method::Script && source.scripts.is_empty() {
                issue(
                    at.clone(),
                    "The script method needs at least one script.".to_string(),
                    &mut issues,
                );
            }
            if method != Method::Borg && source.borg.is_some() {
                issue(
                    format!("{at}.borg"),
                    "The borg options can only be used with borg.".to_string(),
                    &mut issues,
                );
            }
            for path in &source.unterminated_scripts {
                issue(
                    path.clone(),
                    "Unterminated quote in script command.".to_string(),
                    &mut issues,
                );
            }
        }

        for (index, message) in self.check_destination_conflicts(&draft) {
            issue(format!("sources[{index}]"), message, &mut issues);
        }

        issues
    }
}

fn read_draft(document: &Value) -> Draft {
    let root = document.as_mapping();
    let sources = root
        .and_then(|m| m.get("sources"))
        .and_then(Value::as_sequence)
        .map(|items| {
            items
                .iter()
                .enumerate()
                .filter_map(|(index, item)| item.as_mapping().map(|m| read_source(index, m)))
                .collect()
        })
        .unwrap_or_default();

    let settings = root
        .and_then(|m| m.get("settings"))
        .and_then(Value::as_mapping)
        .map(|m| Settings {
            stop_on_failure: get_bool(m, "stop_on_failure").unwrap_or(false),
            tar_suffix: get_enum::<TarSuffixPolicy>(m, "tar_suffix").unwrap_or_default(),
        })
        .unwrap_or_default();

    Draft {
        target: root.and_then(|m| get_str(m, "target")).map(PathBuf::from),
        method: root.and_then(|m| get_enum(m, "method")),
        sudo: root.and_then(|m| get_bool(m, "sudo")).unwrap_or(false),
        rules: root.map(read_rules).unwrap_or_default(),
        settings,
        sources,
    }
}

fn read_source(index: usize, map: &Mapping) -> DraftSource {
    let mut unterminated_scripts = Vec::new();
    let mut scripts = Scripts::default();
    if let Some(block) = map.get("scripts").and_then(Value::as_mapping) {
        for (phase, list) in [("before", &mut scripts.before), ("after", &mut scripts.after)] {
            let entries = block.get(phase).and_then(Value::as_sequence);
            for (i, entry) in entries.into_iter().flatten().enumerate() {
                match read_script(entry) {
                    Some(command) => list.push(command),
                    None => unterminated_scripts.push(format!("sources[{index}].scripts.{phase}[{i}]")),
                }
            }
        }
        if let Some(env) = block.get("env").and_then(Value::as_mapping) {
            scripts.env = env
                .iter()
                .filter_map(|(key, value)| {
                    Some((key.as_str()?.to_string(), value.as_str()?.to_string()))
                })
                .collect::<BTreeMap<_, _>>();
        }
    }

    let mount = map.get("mount").and_then(Value::as_mapping).map(|m| {
        let defaults = MountOptions::default();
        MountOptions {
            base: get_str(m, "base").map(PathBuf::from),
            ssh_config: get_str(m, "ssh_config").map(PathBuf::from),
            options: get_strings(m, "options").unwrap_or_default(),
            command: get_strings(m, "command").unwrap_or(defaults.command),
            unmount: get_strings(m, "unmount").unwrap_or(defaults.unmount),
        }
    });

    let borg = map.get("borg").and_then(Value::as_mapping).map(|m| {
        let defaults = BorgOptions::default();
        BorgOptions {
            compression: get_str(m, "compression").unwrap_or(defaults.compression),
            encryption: get_str(m, "encryption").unwrap_or(defaults.encryption),
            filter: get_str(m, "filter"),
        }
    });

    DraftSource {
        path: get_str(map, "path").unwrap_or_default(),
        method: get_enum(map, "method"),
        dest: get_str(map, "dest"),
        sudo: get_bool(map, "sudo"),
        rules: read_rules(map),
        mount,
        scripts,
        borg,
        unterminated_scripts,
    }
}

fn read_rules(map: &Mapping) -> Vec<Rule> {
    map.get("rules")
        .and_then(Value::as_sequence)
        .into_iter()
        .flatten()
        .filter_map(Value::as_mapping)
        .filter_map(|rule| {
            let (key, value) = rule.iter().next()?;
            let kind = RuleKind::from_key(key.as_str()?)?;
            Some(Rule::new(kind, value.as_str()?))
        })
        .collect()
}

/// `None` when a string form leaves a quote open.
fn read_script(entry: &Value) -> Option<ScriptCommand> {
    match entry {
        Value::String(line) => shell_words::split(line)
            .ok()
            .map(|argv| ScriptCommand { argv }),
        Value::Sequence(args) => Some(ScriptCommand {
            argv: args
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        }),
        _ => None,
    }
}

fn build_descriptor(draft: Draft) -> Descriptor {
    let sources = draft
        .sources
        .into_iter()
        .filter_map(|source| {
            let method = source.method.or(draft.method)?;
            let location = match RemoteSpec::parse(&source.path) {
                Some(remote) => SourceLocation::Remote(remote),
                None => SourceLocation::Local(PathBuf::from(&source.path)),
            };
            Some(Source {
                location,
                method,
                dest: source.dest,
                sudo: source.sudo.unwrap_or(draft.sudo),
                rules: match method {
                    Method::Script => RuleSet::new(source.rules),
                    _ => RuleSet::layered(&draft.rules, &source.rules),
                },
                mount: source.mount.unwrap_or_default(),
                scripts: source.scripts,
                borg: source.borg.unwrap_or_default(),
            })
        })
        .collect();

    Descriptor {
        target: draft.target,
        settings: draft.settings,
        sources,
    }
}

fn get_str(map: &Mapping, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

fn get_bool(map: &Mapping, key: &str) -> Option<bool> {
    map.get(key).and_then(Value::as_bool)
}

/// Deserializes one of the lowercase enums (`method`, `tar_suffix`).
fn get_enum<T: serde::de::DeserializeOwned>(map: &Mapping, key: &str) -> Option<T> {
    map.get(key)
        .cloned()
        .and_then(|value| serde_yaml::from_value(value).ok())
}

fn get_strings(map: &Mapping, key: &str) -> Option<Vec<String>> {
    map.get(key).and_then(Value::as_sequence).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}
