use serde::Deserialize;
use serde_yaml::Value;
use std::fmt;

/// The kinds of selection directives a source can carry.
///
/// The variants are backend neutral. Each backend adapter decides how (and
/// whether) a kind maps onto its own command-line grammar; legality per
/// backend is enforced by the semantic validator before any command exists.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Leave matching paths out of the backup.
    Exclude,
    /// Take matching paths in. Only meaningful for backends with ordered
    /// include/exclude evaluation (rsync, duplicity).
    Include,
    /// A borg pattern (`+path`, `-path`, `!path`, with optional style prefix
    /// such as `pp:`). First match wins, so declaration order is kept.
    Pattern,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Exclude => write!(f, "exclude"),
            RuleKind::Include => write!(f, "include"),
            RuleKind::Pattern => write!(f, "pattern"),
        }
    }
}

impl RuleKind {
    pub const ALL: [RuleKind; 3] = [RuleKind::Exclude, RuleKind::Include, RuleKind::Pattern];

    /// The kind named by a rule's mapping key, `None` for unknown keys.
    pub fn from_key(key: &str) -> Option<Self> {
        serde_yaml::from_value(Value::from(key)).ok()
    }
}

/// One include/exclude/pattern directive, in the order it was declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub kind: RuleKind,
    pub value: String,
}

impl Rule {
    pub fn new(kind: RuleKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn exclude(value: impl Into<String>) -> Self {
        Self::new(RuleKind::Exclude, value)
    }

    pub fn include(value: impl Into<String>) -> Self {
        Self::new(RuleKind::Include, value)
    }

    pub fn pattern(value: impl Into<String>) -> Self {
        Self::new(RuleKind::Pattern, value)
    }

    pub fn is(&self, kind: RuleKind) -> bool {
        self.kind == kind
    }
}

/// An ordered rule list: the descriptor's global rules followed by the
/// source's own rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Global rules come first so a source can refine them.
    pub fn layered(global: &[Rule], local: &[Rule]) -> Self {
        Self {
            rules: global.iter().chain(local).cloned().collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// Values of one kind, declaration order preserved.
    pub fn values(&self, kind: RuleKind) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .filter(move |rule| rule.is(kind))
            .map(|rule| rule.value.as_str())
    }

    pub fn has(&self, kind: RuleKind) -> bool {
        self.rules.iter().any(|rule| rule.is(kind))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}
