//! Trigger Rules
//!
//! Maps route keys to compiled script artifacts. Patterns are shell-style
//! globs compiled to anchored regular expressions:
//!
//! - `*` matches within one path segment, `**` across segments
//! - `?` matches one character other than `/`
//! - `[abc]`, `[a-z]`, `[!x]` match character classes
//!
//! A pattern starting with `/` is matched against the whole path; any other
//! pattern is matched against the final segment only, so `*.tiger` covers
//! every `.tiger` file on the site.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TigerError};
use crate::routing::RouteKey;

// == Trigger Spec ==
/// A trigger rule as written in configuration: pattern and/or file type,
/// and the id of the artifact it selects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSpec {
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    pub artifact: String,
}

impl TriggerSpec {
    pub fn new(
        pattern: Option<&str>,
        file_type: Option<&str>,
        artifact: impl Into<String>,
    ) -> Self {
        Self {
            pattern: pattern.map(str::to_string),
            file_type: file_type.map(|t| t.trim_start_matches('.').to_ascii_lowercase()),
            artifact: artifact.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !is_valid_artifact_id(&self.artifact) {
            return Err(TigerError::Config(format!(
                "invalid artifact id '{}' in trigger rule",
                self.artifact
            )));
        }
        if self.pattern.is_none() && self.file_type.is_none() {
            return Err(TigerError::Config(format!(
                "trigger rule for '{}' needs a pattern or a file type",
                self.artifact
            )));
        }
        if let Some(pattern) = &self.pattern {
            TriggerPattern::compile(pattern)?;
        }
        Ok(())
    }
}

/// Parses `[pattern][:file-type]=artifact`, e.g. `/api/*=api` or `:tiger=render`.
impl FromStr for TriggerSpec {
    type Err = TigerError;

    fn from_str(s: &str) -> Result<Self> {
        let (lhs, artifact) = s
            .trim()
            .rsplit_once('=')
            .ok_or_else(|| TigerError::Config(format!("trigger '{}' lacks '=artifact'", s)))?;

        let (pattern, file_type) = match lhs.rsplit_once(':') {
            Some((p, t)) => (p.trim(), Some(t.trim())),
            None => (lhs.trim(), None),
        };
        let pattern = Some(pattern).filter(|p| !p.is_empty());
        let file_type = file_type.filter(|t| !t.is_empty());

        let spec = TriggerSpec::new(pattern, file_type, artifact.trim());
        spec.validate()?;
        Ok(spec)
    }
}

/// Artifact ids are file stems: ASCII letters, digits, `-`, `_` and `.`.
pub fn is_valid_artifact_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

// == Trigger Pattern ==
/// A compiled glob.
#[derive(Debug, Clone)]
pub struct TriggerPattern {
    source: String,
    regex: Regex,
    anchored_at_root: bool,
    literals: usize,
}

impl TriggerPattern {
    pub fn compile(source: &str) -> Result<Self> {
        let mut expr = String::from("^");
        let mut literals = 0;
        let chars: Vec<char> = source.chars().collect();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '*' if chars.get(i + 1) == Some(&'*') => {
                    expr.push_str(".*");
                    i += 2;
                    continue;
                }
                '*' => expr.push_str("[^/]*"),
                '?' => expr.push_str("[^/]"),
                '[' => match chars[i + 1..].iter().position(|&c| c == ']') {
                    Some(offset) if offset > 0 => {
                        let class: String = chars[i + 1..i + 1 + offset].iter().collect();
                        expr.push('[');
                        match class.strip_prefix('!') {
                            Some(rest) => {
                                expr.push('^');
                                expr.push_str(&escape_class(rest));
                            }
                            None => expr.push_str(&escape_class(&class)),
                        }
                        expr.push(']');
                        i += offset + 2;
                        continue;
                    }
                    _ => {
                        expr.push_str(r"\[");
                        literals += 1;
                    }
                },
                c => {
                    expr.push_str(&regex::escape(&c.to_string()));
                    literals += 1;
                }
            }
            i += 1;
        }
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| {
            TigerError::Config(format!("invalid trigger pattern '{}': {}", source, e))
        })?;

        Ok(Self {
            source: source.to_string(),
            regex,
            anchored_at_root: source.starts_with('/'),
            literals,
        })
    }

    pub fn is_match(&self, key: &RouteKey) -> bool {
        if self.anchored_at_root {
            self.regex.is_match(key.path())
        } else {
            self.regex.is_match(key.file_name())
        }
    }

    /// Number of literal characters; more literals means a narrower pattern.
    pub fn literals(&self) -> usize {
        self.literals
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

// The regex is derived from the source, so the source decides equality.
impl PartialEq for TriggerPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

fn escape_class(class: &str) -> String {
    class
        .chars()
        .map(|c| match c {
            '\\' | '[' | ']' | '^' | '&' | '~' => format!("\\{}", c),
            c => c.to_string(),
        })
        .collect()
}

// == Trigger Rule ==
/// Where a rule was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleOrigin {
    Config,
    Artifact,
}

/// A compiled, registered trigger rule.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerRule {
    pub pattern: Option<TriggerPattern>,
    pub file_type: Option<String>,
    pub artifact: String,
    pub origin: RuleOrigin,
    specificity: usize,
}

impl TriggerRule {
    pub fn compile(spec: &TriggerSpec, origin: RuleOrigin) -> Result<Self> {
        spec.validate()?;
        let pattern = spec
            .pattern
            .as_deref()
            .map(TriggerPattern::compile)
            .transpose()?;
        let specificity = match (&pattern, &spec.file_type) {
            (Some(p), Some(_)) => p.literals() + 1,
            (Some(p), None) => p.literals(),
            (None, _) => 0,
        };
        Ok(Self {
            pattern,
            file_type: spec.file_type.clone(),
            artifact: spec.artifact.clone(),
            origin,
            specificity,
        })
    }

    pub fn matches(&self, key: &RouteKey) -> bool {
        let type_ok = match &self.file_type {
            Some(t) => key.file_type() == Some(t.as_str()),
            None => true,
        };
        type_ok && self.pattern.as_ref().map_or(true, |p| p.is_match(key))
    }

    pub fn specificity(&self) -> usize {
        self.specificity
    }
}

impl fmt::Display for TriggerRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.pattern {
            f.write_str(p.as_str())?;
        }
        if let Some(t) = &self.file_type {
            write!(f, ":{}", t)?;
        }
        write!(f, "={}", self.artifact)
    }
}

// == Trigger Table ==
/// Ordered rule set. Registration order is the tie-breaker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerTable {
    rules: Vec<TriggerRule>,
}

impl TriggerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, rule: TriggerRule) {
        self.rules.push(rule);
    }

    /// Returns the rule selecting `key`: highest specificity first, then the
    /// earliest registered. Same table and key always give the same rule.
    pub fn resolve(&self, key: &RouteKey) -> Option<&TriggerRule> {
        let mut best: Option<&TriggerRule> = None;
        for rule in self.rules.iter().filter(|r| r.matches(key)) {
            match best {
                Some(current) if current.specificity >= rule.specificity => {}
                _ => best = Some(rule),
            }
        }
        best
    }

    pub fn rules(&self) -> &[TriggerRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn key(path: &str) -> RouteKey {
        RouteKey::new(path, &HashMap::new())
    }

    fn rule(spec: &str) -> TriggerRule {
        TriggerRule::compile(&spec.parse().unwrap(), RuleOrigin::Config).unwrap()
    }

    #[test]
    fn test_parse_spec_forms() {
        let spec: TriggerSpec = "/api/*=api".parse().unwrap();
        assert_eq!(spec.pattern.as_deref(), Some("/api/*"));
        assert_eq!(spec.file_type, None);

        let spec: TriggerSpec = ":TIGER=render".parse().unwrap();
        assert_eq!(spec.pattern, None);
        assert_eq!(spec.file_type.as_deref(), Some("tiger"));

        let spec: TriggerSpec = "/reports/*:tiger=report".parse().unwrap();
        assert_eq!(spec.pattern.as_deref(), Some("/reports/*"));
        assert_eq!(spec.file_type.as_deref(), Some("tiger"));
    }

    #[test]
    fn test_parse_spec_rejects_bad_input() {
        assert!("/api/*".parse::<TriggerSpec>().is_err());
        assert!("=api".parse::<TriggerSpec>().is_err());
        assert!("/x=../evil".parse::<TriggerSpec>().is_err());
    }

    #[test]
    fn test_glob_segments() {
        let p = TriggerPattern::compile("/api/*").unwrap();
        assert!(p.is_match(&key("/api/users")));
        assert!(!p.is_match(&key("/api/users/1")));

        let p = TriggerPattern::compile("/api/**").unwrap();
        assert!(p.is_match(&key("/api/users/1")));

        let p = TriggerPattern::compile("/v?/x").unwrap();
        assert!(p.is_match(&key("/v1/x")));
        assert!(!p.is_match(&key("/v10/x")));
    }

    #[test]
    fn test_glob_classes() {
        let p = TriggerPattern::compile("/[a-c]*.txt").unwrap();
        assert!(p.is_match(&key("/b.txt")));
        assert!(!p.is_match(&key("/d.txt")));

        let p = TriggerPattern::compile("/[!a]*").unwrap();
        assert!(p.is_match(&key("/zeta")));
        assert!(!p.is_match(&key("/alpha")));

        let p = TriggerPattern::compile("/odd[").unwrap();
        assert!(p.is_match(&key("/odd[")));
    }

    #[test]
    fn test_relative_pattern_matches_file_name() {
        let p = TriggerPattern::compile("*.tiger").unwrap();
        assert!(p.is_match(&key("/deep/dir/report.tiger")));
        assert!(!p.is_match(&key("/report.html")));
    }

    #[test]
    fn test_literal_characters_escaped() {
        let p = TriggerPattern::compile("/a.b+c").unwrap();
        assert!(p.is_match(&key("/a.b+c")));
        assert!(!p.is_match(&key("/aXb+c")));
        assert_eq!(p.literals(), 6);
    }

    #[test]
    fn test_file_type_rule() {
        let r = rule(":tiger=render");
        assert!(r.matches(&key("/report.tiger")));
        assert!(!r.matches(&key("/report.html")));
        assert_eq!(r.specificity(), 0);
    }

    #[test]
    fn test_most_specific_wins() {
        let mut table = TriggerTable::new();
        table.register(rule(":tiger=generic"));
        table.register(rule("/reports/*=reports"));
        table.register(rule("/reports/annual.tiger=annual"));

        assert_eq!(table.resolve(&key("/reports/annual.tiger")).unwrap().artifact, "annual");
        assert_eq!(table.resolve(&key("/reports/q1.tiger")).unwrap().artifact, "reports");
        assert_eq!(table.resolve(&key("/other.tiger")).unwrap().artifact, "generic");
        assert!(table.resolve(&key("/other.html")).is_none());
    }

    #[test]
    fn test_tie_goes_to_first_registered() {
        let mut table = TriggerTable::new();
        table.register(rule("/a/*=first"));
        table.register(rule("/a/*=second"));
        assert_eq!(table.resolve(&key("/a/x")).unwrap().artifact, "first");
    }

    #[test]
    fn test_type_constraint_breaks_pattern_tie() {
        let mut table = TriggerTable::new();
        table.register(rule("/a/*=plain"));
        table.register(rule("/a/*:tiger=typed"));
        assert_eq!(table.resolve(&key("/a/x.tiger")).unwrap().artifact, "typed");
        assert_eq!(table.resolve(&key("/a/x.html")).unwrap().artifact, "plain");
    }

    #[test]
    fn test_display() {
        assert_eq!(rule("/a/*:tiger=typed").to_string(), "/a/*:tiger=typed");
    }
}
