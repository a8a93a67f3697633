//! Safety rule data.
//!
//! Rules are TOML, versioned, and compiled once at load time. The built-in
//! set ships inside the binary; `safety.rules_path` replaces it wholesale.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use super::analysis::{Analysis, SimpleCommand};

/// Rule file format version understood by this build.
pub const RULES_VERSION: &str = "1";

const BUILTIN_RULES: &str = include_str!("default_rules.toml");

const DEFAULT_SHELLS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh", "mksh", "ash", "fish"];

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("Failed to read rules {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid rules file: {0}")]
    Parse(String),

    #[error("Unsupported rules version '{0}' (expected '1')")]
    UnsupportedVersion(String),

    #[error("Duplicate rule id '{0}'")]
    DuplicateId(String),

    #[error("Rule has an empty id")]
    EmptyId,

    #[error("Rule '{rule}' has an invalid pattern: {source}")]
    InvalidPattern {
        rule: String,
        #[source]
        source: regex::Error,
    },

    #[error("Rule '{0}' matches nothing: a command rule needs at least one criterion")]
    EmptyMatcher(String),
}

/// Stable identifier of a rule, e.g. `rm-recursive-root`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Match blocks the candidate
    Deny,
    /// Match accepts the candidate with a warning
    Risky,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Deny => "deny",
            RuleKind::Risky => "risky",
        }
    }
}

/// How a rule matches, as written in the rules file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchSpec {
    Command {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        verbs: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        verb_regex: Option<String>,
        /// Every group needs at least one of its flags present
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        all_flags: Vec<Vec<String>>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        any_flag: Vec<String>,
        /// Regex over any positional argument
        #[serde(default, skip_serializing_if = "Option::is_none")]
        any_arg: Option<String>,
        /// Regex over the first positional argument only
        #[serde(default, skip_serializing_if = "Option::is_none")]
        first_arg: Option<String>,
        /// Regex over any argument word as written, options included
        #[serde(default, skip_serializing_if = "Option::is_none")]
        any_word: Option<String>,
        #[serde(default)]
        privileged: bool,
    },
    Redirect {
        target: String,
    },
    PipeToShell {
        /// Upstream verbs; empty means any
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        from: Vec<String>,
        /// Downstream interpreters; empty means the usual shells
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        to: Vec<String>,
    },
    Raw {
        pattern: String,
    },
    Unparseable,
}

impl MatchSpec {
    pub fn type_name(&self) -> &'static str {
        match self {
            MatchSpec::Command { .. } => "command",
            MatchSpec::Redirect { .. } => "redirect",
            MatchSpec::PipeToShell { .. } => "pipe_to_shell",
            MatchSpec::Raw { .. } => "raw",
            MatchSpec::Unparseable => "unparseable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub id: String,
    pub kind: RuleKind,
    pub reason: String,
    #[serde(rename = "match")]
    pub matcher: MatchSpec,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    version: String,
    #[serde(default, rename = "rule")]
    rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone)]
enum Matcher {
    Command {
        verbs: Vec<String>,
        verb_regex: Option<Regex>,
        all_flags: Vec<Vec<String>>,
        any_flag: Vec<String>,
        any_arg: Option<Regex>,
        first_arg: Option<Regex>,
        any_word: Option<Regex>,
        privileged: bool,
    },
    Redirect(Regex),
    PipeToShell { from: Vec<String>, to: Vec<String> },
    Raw(Regex),
    Unparseable,
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: RuleId,
    pub kind: RuleKind,
    pub reason: String,
    pub spec: MatchSpec,
    matcher: Matcher,
}

/// What a rule matched, for explanations and the debug trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleMatch {
    pub rule: RuleId,
    pub kind: RuleKind,
    pub detail: String,
}

impl Rule {
    fn compile(spec: RuleSpec) -> Result<Self, RulesError> {
        if spec.id.trim().is_empty() {
            return Err(RulesError::EmptyId);
        }
        let id = spec.id.clone();
        let regex = |pattern: &str| {
            Regex::new(pattern).map_err(|source| RulesError::InvalidPattern {
                rule: id.clone(),
                source,
            })
        };

        let matcher = match &spec.matcher {
            MatchSpec::Command {
                verbs,
                verb_regex,
                all_flags,
                any_flag,
                any_arg,
                first_arg,
                any_word,
                privileged,
            } => {
                let empty = verbs.is_empty()
                    && verb_regex.is_none()
                    && all_flags.is_empty()
                    && any_flag.is_empty()
                    && any_arg.is_none()
                    && first_arg.is_none()
                    && any_word.is_none()
                    && !privileged;
                if empty {
                    return Err(RulesError::EmptyMatcher(spec.id.clone()));
                }
                Matcher::Command {
                    verbs: verbs.clone(),
                    verb_regex: verb_regex.as_deref().map(&regex).transpose()?,
                    all_flags: all_flags.clone(),
                    any_flag: any_flag.clone(),
                    any_arg: any_arg.as_deref().map(&regex).transpose()?,
                    first_arg: first_arg.as_deref().map(&regex).transpose()?,
                    any_word: any_word.as_deref().map(&regex).transpose()?,
                    privileged: *privileged,
                }
            }
            MatchSpec::Redirect { target } => Matcher::Redirect(regex(target)?),
            MatchSpec::PipeToShell { from, to } => Matcher::PipeToShell {
                from: from.clone(),
                to: if to.is_empty() {
                    DEFAULT_SHELLS.iter().map(|s| s.to_string()).collect()
                } else {
                    to.clone()
                },
            },
            MatchSpec::Raw { pattern } => Matcher::Raw(regex(pattern)?),
            MatchSpec::Unparseable => Matcher::Unparseable,
        };

        Ok(Self {
            id: RuleId::new(spec.id),
            kind: spec.kind,
            reason: spec.reason,
            spec: spec.matcher,
            matcher,
        })
    }

    /// Test this rule against a command line and its analysis.
    pub fn check(&self, raw: &str, analysis: &Analysis) -> Option<RuleMatch> {
        let detail = match &self.matcher {
            Matcher::Raw(pattern) => pattern.find(raw).map(|m| m.as_str().to_string()),
            Matcher::Unparseable => analysis.unparseable.clone(),
            Matcher::Redirect(target) => analysis
                .redirections
                .iter()
                .filter(|r| r.op.writes_file())
                .find(|r| target.is_match(&r.target))
                .map(|r| format!("{} {}", r.op.as_str(), r.target)),
            Matcher::PipeToShell { from, to } => analysis.feeds.iter().find_map(|feed| {
                let upstream = analysis.commands.get(feed.from)?;
                let downstream = analysis.commands.get(feed.to)?;
                let from_ok = from.is_empty() || from.contains(&upstream.verb);
                (from_ok && to.contains(&downstream.verb))
                    .then(|| format!("{} | {}", upstream.verb, downstream.verb))
            }),
            Matcher::Command { .. } => analysis
                .commands
                .iter()
                .find(|cmd| self.command_matches(cmd))
                .map(|cmd| cmd.display()),
        }?;

        Some(RuleMatch {
            rule: self.id.clone(),
            kind: self.kind,
            detail,
        })
    }

    fn command_matches(&self, cmd: &SimpleCommand) -> bool {
        let Matcher::Command {
            verbs,
            verb_regex,
            all_flags,
            any_flag,
            any_arg,
            first_arg,
            any_word,
            privileged,
        } = &self.matcher
        else {
            return false;
        };

        let verb_ok = match (verbs.is_empty(), verb_regex) {
            (true, None) => true,
            (_, Some(re)) => verbs.contains(&cmd.verb) || re.is_match(&cmd.verb),
            (false, None) => verbs.contains(&cmd.verb),
        };
        if !verb_ok || (*privileged && !cmd.privileged) {
            return false;
        }

        if !all_flags.is_empty() || !any_flag.is_empty() {
            let flags = cmd.flags();
            let has = |name: &String| flags.iter().any(|f| f == name);
            if !all_flags.iter().all(|group| group.iter().any(has)) {
                return false;
            }
            if !any_flag.is_empty() && !any_flag.iter().any(has) {
                return false;
            }
        }

        if let Some(re) = any_word {
            if !cmd.args.iter().any(|a| re.is_match(&a.text)) {
                return false;
            }
        }

        if any_arg.is_some() || first_arg.is_some() {
            let positionals = cmd.positionals();
            if let Some(re) = any_arg {
                if !positionals.iter().any(|p| re.is_match(p)) {
                    return false;
                }
            }
            if let Some(re) = first_arg {
                match positionals.first() {
                    Some(first) if re.is_match(first) => {}
                    _ => return false,
                }
            }
        }

        true
    }
}

/// An ordered, immutable rule list.
#[derive(Debug, Clone)]
pub struct RuleSet {
    version: String,
    rules: Vec<Rule>,
}

impl RuleSet {
    /// The rule set compiled into the binary.
    pub fn builtin() -> Result<Self, RulesError> {
        Self::from_toml_str(BUILTIN_RULES)
    }

    /// Load from `path` when given, else the built-in set.
    pub fn load(path: Option<&Path>) -> Result<Self, RulesError> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|source| RulesError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                let rules = Self::from_toml_str(&content)?;
                info!("Loaded {} safety rules from {}", rules.len(), path.display());
                Ok(rules)
            }
            None => Self::builtin(),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, RulesError> {
        let file: RuleFile =
            toml::from_str(content).map_err(|e| RulesError::Parse(e.to_string()))?;
        if file.version != RULES_VERSION {
            return Err(RulesError::UnsupportedVersion(file.version));
        }
        Self::from_specs(file.rules)
    }

    pub fn from_specs(specs: Vec<RuleSpec>) -> Result<Self, RulesError> {
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(specs.len());
        for spec in specs {
            if !seen.insert(spec.id.clone()) {
                return Err(RulesError::DuplicateId(spec.id));
            }
            rules.push(Rule::compile(spec)?);
        }
        Ok(Self {
            version: RULES_VERSION.to_string(),
            rules,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Rules in file order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id.as_str() == id)
    }

    /// Rules of one kind, in file order.
    pub fn of_kind(&self, kind: RuleKind) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(move |r| r.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::analysis::analyze;

    fn first_match(rules: &RuleSet, text: &str) -> Option<String> {
        let analysis = analyze(text);
        rules
            .rules()
            .iter()
            .find_map(|r| r.check(text, &analysis))
            .map(|m| m.rule.to_string())
    }

    #[test]
    fn test_builtin_rules_compile() {
        let rules = RuleSet::builtin().unwrap();
        assert!(rules.len() > 15);
        assert!(rules.get("rm-recursive-root").is_some());
        assert!(rules.of_kind(RuleKind::Deny).count() > 5);
        assert!(rules.of_kind(RuleKind::Risky).count() > 5);
    }

    #[test]
    fn test_custom_rules() {
        let rules = RuleSet::from_toml_str(
            r#"
            version = "1"

            [[rule]]
            id = "no-docker-prune"
            kind = "risky"
            reason = "Removes unused images"
            [rule.match]
            type = "command"
            verbs = ["docker"]
            first_arg = '^system$'
            "#,
        )
        .unwrap();
        assert_eq!(
            first_match(&rules, "docker system prune -af").as_deref(),
            Some("no-docker-prune")
        );
        assert_eq!(first_match(&rules, "docker ps"), None);
    }

    #[test]
    fn test_rejects_bad_files() {
        assert!(matches!(
            RuleSet::from_toml_str("version = \"2\""),
            Err(RulesError::UnsupportedVersion(_))
        ));

        let dup = r#"
            version = "1"
            [[rule]]
            id = "a"
            kind = "deny"
            reason = "x"
            [rule.match]
            type = "raw"
            pattern = "x"
            [[rule]]
            id = "a"
            kind = "deny"
            reason = "y"
            [rule.match]
            type = "raw"
            pattern = "y"
        "#;
        assert!(matches!(
            RuleSet::from_toml_str(dup),
            Err(RulesError::DuplicateId(_))
        ));

        let bad_regex = r#"
            version = "1"
            [[rule]]
            id = "broken"
            kind = "deny"
            reason = "x"
            [rule.match]
            type = "raw"
            pattern = "(unclosed"
        "#;
        assert!(matches!(
            RuleSet::from_toml_str(bad_regex),
            Err(RulesError::InvalidPattern { .. })
        ));

        let empty = r#"
            version = "1"
            [[rule]]
            id = "everything"
            kind = "deny"
            reason = "x"
            [rule.match]
            type = "command"
        "#;
        assert!(matches!(
            RuleSet::from_toml_str(empty),
            Err(RulesError::EmptyMatcher(_))
        ));
    }

    #[test]
    fn test_flag_groups() {
        let rules = RuleSet::builtin().unwrap();
        let rule = rules.get("rm-recursive-root").unwrap();
        let hit = |text: &str| rule.check(text, &analyze(text)).is_some();
        assert!(hit("rm -rf /"));
        assert!(hit("rm -r -f /"));
        assert!(hit("rm --recursive --force /"));
        assert!(hit("rm -fr //"));
        assert!(!hit("rm -rf ./build"));
        assert!(!hit("rm /tmp/file"));
    }
}
