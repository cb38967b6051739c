//! Structural validation of a descriptor document.
//!
//! The document is parsed into a `serde_yaml::Value` and walked against a
//! fixed, declarative schema. Every violation is collected (the walk never
//! stops at the first one) and located in the original text through a
//! [`Locator`], because `serde_yaml` values carry no positions.

use serde_yaml::Value;
use std::collections::HashMap;

use crate::builders::rules::RuleKind;
use crate::core::errors::ValidationError;

/// The shape a value must have.
pub enum Shape {
    Str,
    Bool,
    Enum(&'static [&'static str]),
    /// A sequence with a minimum number of entries.
    Seq(&'static Shape, usize),
    Map(&'static [Field]),
    /// A single-key mapping `{exclude|include|pattern: <string>}`.
    Rule,
    /// A command string, or a non-empty list of argument strings.
    Script,
    /// A mapping from string keys to string values.
    StrMap,
}

pub struct Field {
    pub name: &'static str,
    pub shape: Shape,
    pub required: bool,
}

const fn field(name: &'static str, shape: Shape) -> Field {
    Field {
        name,
        shape,
        required: false,
    }
}

const fn required(name: &'static str, shape: Shape) -> Field {
    Field {
        name,
        shape,
        required: true,
    }
}

const METHODS: &[&str] = &["rsync", "tar", "borg", "duplicity", "script"];
const TAR_SUFFIXES: &[&str] = &["increment", "fixed"];

static MOUNT_FIELDS: [Field; 5] = [
    field("base", Shape::Str),
    field("ssh_config", Shape::Str),
    field("options", Shape::Seq(&Shape::Str, 0)),
    field("command", Shape::Seq(&Shape::Str, 1)),
    field("unmount", Shape::Seq(&Shape::Str, 1)),
];

static SCRIPT_FIELDS: [Field; 3] = [
    field("before", Shape::Seq(&Shape::Script, 0)),
    field("after", Shape::Seq(&Shape::Script, 0)),
    field("env", Shape::StrMap),
];

static BORG_FIELDS: [Field; 3] = [
    field("compression", Shape::Str),
    field("encryption", Shape::Str),
    field("filter", Shape::Str),
];

static SOURCE_FIELDS: [Field; 8] = [
    required("path", Shape::Str),
    field("method", Shape::Enum(METHODS)),
    field("dest", Shape::Str),
    field("sudo", Shape::Bool),
    field("rules", Shape::Seq(&Shape::Rule, 0)),
    field("mount", Shape::Map(&MOUNT_FIELDS)),
    field("scripts", Shape::Map(&SCRIPT_FIELDS)),
    field("borg", Shape::Map(&BORG_FIELDS)),
];

static SOURCE: Shape = Shape::Map(&SOURCE_FIELDS);

static SETTINGS_FIELDS: [Field; 2] = [
    field("stop_on_failure", Shape::Bool),
    field("tar_suffix", Shape::Enum(TAR_SUFFIXES)),
];

static DESCRIPTOR_FIELDS: [Field; 6] = [
    field("target", Shape::Str),
    field("method", Shape::Enum(METHODS)),
    field("sudo", Shape::Bool),
    field("rules", Shape::Seq(&Shape::Rule, 0)),
    field("settings", Shape::Map(&SETTINGS_FIELDS)),
    required("sources", Shape::Seq(&SOURCE, 1)),
];

/// The descriptor schema.
pub static DESCRIPTOR: Shape = Shape::Map(&DESCRIPTOR_FIELDS);

/// Checks `value` against `shape`, appending one message per violation.
/// Each message is paired with the document path it concerns.
pub fn check(value: &Value, shape: &Shape, path: &str, violations: &mut Vec<(String, String)>) {
    let here = display_path(path);
    match shape {
        Shape::Str => {
            if !value.is_string() {
                push(violations, path, format!("{here}: expected a string"));
            }
        }
        Shape::Bool => {
            if !value.is_bool() {
                push(violations, path, format!("{here}: expected true or false"));
            }
        }
        Shape::Enum(choices) => match value.as_str() {
            Some(choice) if choices.contains(&choice) => {}
            Some(choice) => push(
                violations,
                path,
                format!("{here}: '{choice}' is not one of {}", choices.join(", ")),
            ),
            None => push(
                violations,
                path,
                format!("{here}: expected one of {}", choices.join(", ")),
            ),
        },
        Shape::Seq(item, min) => match value.as_sequence() {
            Some(items) => {
                if items.len() < *min {
                    let noun = if *min == 1 { "entry" } else { "entries" };
                    push(
                        violations,
                        path,
                        format!("{here}: at least {min} {noun} required"),
                    );
                }
                for (index, entry) in items.iter().enumerate() {
                    check(entry, item, &format!("{path}[{index}]"), violations);
                }
            }
            None => push(violations, path, format!("{here}: expected a list")),
        },
        Shape::Map(fields) => check_map(value, fields, path, violations),
        Shape::Rule => check_rule(value, path, violations),
        Shape::Script => match value {
            Value::String(command) if !command.trim().is_empty() => {}
            Value::Sequence(args) if !args.is_empty() => {
                for (index, arg) in args.iter().enumerate() {
                    check(arg, &Shape::Str, &format!("{path}[{index}]"), violations);
                }
            }
            _ => push(
                violations,
                path,
                format!("{here}: expected a command string or a non-empty argument list"),
            ),
        },
        Shape::StrMap => match value.as_mapping() {
            Some(map) => {
                for (key, entry) in map {
                    match key.as_str() {
                        Some(name) => check(entry, &Shape::Str, &join(path, name), violations),
                        None => push(violations, path, format!("{here}: keys must be strings")),
                    }
                }
            }
            None => push(violations, path, format!("{here}: expected a mapping")),
        },
    }
}

fn push(violations: &mut Vec<(String, String)>, path: &str, message: String) {
    violations.push((path.to_string(), message));
}

fn check_map(value: &Value, fields: &[Field], path: &str, violations: &mut Vec<(String, String)>) {
    let Some(map) = value.as_mapping() else {
        violations.push((
            path.to_string(),
            format!("{}: expected a mapping", display_path(path)),
        ));
        return;
    };

    for (key, entry) in map {
        let Some(name) = key.as_str() else {
            violations.push((
                path.to_string(),
                format!("{}: keys must be strings", display_path(path)),
            ));
            continue;
        };
        let child = join(path, name);
        match fields.iter().find(|f| f.name == name) {
            Some(spec) => check(entry, &spec.shape, &child, violations),
            None => violations.push((
                child,
                format!("{}: unexpected key '{}'", display_path(path), name),
            )),
        }
    }

    for spec in fields.iter().filter(|f| f.required) {
        if !map.contains_key(spec.name) {
            violations.push((
                path.to_string(),
                format!(
                    "{}: missing required key '{}'",
                    display_path(path),
                    spec.name
                ),
            ));
        }
    }
}

fn check_rule(value: &Value, path: &str, violations: &mut Vec<(String, String)>) {
    let expected = || {
        let kinds: Vec<String> = RuleKind::ALL.iter().map(ToString::to_string).collect();
        format!(
            "{}: a rule is a single '{}' entry",
            display_path(path),
            kinds.join("|")
        )
    };
    let Some(map) = value.as_mapping() else {
        violations.push((path.to_string(), expected()));
        return;
    };
    if map.len() != 1 {
        violations.push((path.to_string(), expected()));
        return;
    }
    if let Some((key, entry)) = map.iter().next() {
        match key.as_str().and_then(RuleKind::from_key) {
            Some(kind) => {
                if !entry.is_string() {
                    violations.push((
                        join(path, &kind.to_string()),
                        format!("{}: {} value must be a string", display_path(path), kind),
                    ));
                }
            }
            None => violations.push((path.to_string(), expected())),
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() { "descriptor" } else { path }
}

/// Maps document paths (`sources[1].rules[0]`) to 1-based line/column
/// positions by scanning block-style YAML by indentation.
///
/// Flow collections are not descended into; lookups fall back to the
/// closest located ancestor.
#[derive(Debug, Default)]
pub struct Locator {
    positions: HashMap<String, (usize, usize)>,
}

struct Frame {
    indent: usize,
    path: String,
    is_item: bool,
}

impl Locator {
    pub fn new(text: &str) -> Self {
        let mut positions = HashMap::new();
        let mut stack: Vec<Frame> = Vec::new();
        let mut counters: HashMap<String, usize> = HashMap::new();
        let mut block_scalar: Option<usize> = None;

        for (number, raw) in text.lines().enumerate() {
            let line = number + 1;
            let trimmed = raw.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("---") {
                continue;
            }
            let mut indent = raw.len() - trimmed.len();
            if let Some(owner) = block_scalar {
                if indent > owner {
                    continue;
                }
                block_scalar = None;
            }

            let mut rest = trimmed;
            loop {
                if rest == "-" || rest.starts_with("- ") {
                    while stack
                        .last()
                        .is_some_and(|top| top.indent > indent || (top.indent == indent && top.is_item))
                    {
                        stack.pop();
                    }
                    let parent = stack.last().map(|f| f.path.clone()).unwrap_or_default();
                    let counter = counters.entry(parent.clone()).or_insert(0);
                    let path = format!("{parent}[{counter}]");
                    *counter += 1;
                    positions.entry(path.clone()).or_insert((line, indent + 1));
                    stack.push(Frame {
                        indent,
                        path,
                        is_item: true,
                    });
                    let after = rest[1..].trim_start();
                    indent += rest.len() - after.len();
                    rest = after;
                    if rest.is_empty() {
                        break;
                    }
                    continue;
                }

                if let Some((key, value)) = split_key(rest) {
                    while stack.last().is_some_and(|top| top.indent >= indent) {
                        stack.pop();
                    }
                    let parent = stack.last().map(|f| f.path.as_str()).unwrap_or_default();
                    let path = join(parent, &key);
                    positions.entry(path.clone()).or_insert((line, indent + 1));
                    if value.starts_with('|') || value.starts_with('>') {
                        block_scalar = Some(indent);
                    }
                    stack.push(Frame {
                        indent,
                        path,
                        is_item: false,
                    });
                }
                break;
            }
        }

        Self { positions }
    }

    /// The position of `path`, or of its nearest located ancestor.
    pub fn locate(&self, path: &str) -> Option<(usize, usize)> {
        let mut current = path;
        loop {
            if let Some(position) = self.positions.get(current) {
                return Some(*position);
            }
            let cut = current.rfind(['.', '['])?;
            current = &current[..cut];
        }
    }
}

/// Splits `key: value` (or `key:`) outside of quotes. Returns `None` for
/// plain scalars and flow collections.
fn split_key(text: &str) -> Option<(String, &str)> {
    if text.starts_with('{') || text.starts_with('[') {
        return None;
    }
    let (key, rest) = if let Some(quote) = text.chars().next().filter(|c| *c == '"' || *c == '\'') {
        let close = text[1..].find(quote)? + 1;
        (text[1..close].to_string(), &text[close + 1..])
    } else {
        let colon = text
            .char_indices()
            .find(|(i, c)| *c == ':' && text[i + 1..].chars().next().is_none_or(char::is_whitespace))
            .map(|(i, _)| i)?;
        (text[..colon].trim_end().to_string(), &text[colon..])
    };
    let value = rest.strip_prefix(':')?;
    Some((key, value.trim()))
}

/// Runs the structural phase. On success returns the parsed document.
pub fn validate_structure(file: &str, text: &str) -> Result<Value, Vec<ValidationError>> {
    let document: Value = match serde_yaml::from_str(text) {
        Ok(document) => document,
        Err(err) => {
            let location = err.location().map(|l| (l.line(), l.column()));
            return Err(vec![ValidationError::schema(file, location, err.to_string())]);
        }
    };

    let mut violations = Vec::new();
    check(&document, &DESCRIPTOR, "", &mut violations);
    if violations.is_empty() {
        return Ok(document);
    }

    let locator = Locator::new(text);
    Err(violations
        .into_iter()
        .map(|(path, message)| ValidationError::schema(file, locator.locate(&path), message))
        .collect())
}
