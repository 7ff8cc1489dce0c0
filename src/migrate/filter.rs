//! Table-name filter for the copy phase
//!
//! Only a named subset of provisioned tables carries data worth copying.
//! Rules are written as:
//! - `regex: <pattern>` - regular expression
//! - `glob: <pattern>` - explicit glob
//! - a bare pattern containing `*`, `?` or `[` - glob
//! - anything else - exact table name
//!
//! Exclude rules win over include rules. A table no include rule names is
//! not copied.

use glob::Pattern as GlobPattern;
use regex::Regex;
use thiserror::Error;

/// Errors that can occur while compiling filter rules
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Invalid glob pattern '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        source: glob::PatternError,
    },

    #[error("Invalid regex pattern '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        source: regex::Error,
    },

    #[error("Empty filter rule")]
    Empty,
}

/// A compiled name pattern
#[derive(Debug, Clone)]
pub enum NameRule {
    Glob(GlobPattern),
    Regex(Regex),
    Exact(String),
}

impl NameRule {
    /// Compile one rule
    pub fn parse(rule: &str) -> Result<Self, FilterError> {
        let rule = rule.trim();
        if rule.is_empty() {
            return Err(FilterError::Empty);
        }

        if let Some(pattern) = rule.strip_prefix("regex:") {
            let pattern = pattern.trim();
            return Regex::new(pattern)
                .map(NameRule::Regex)
                .map_err(|e| FilterError::InvalidRegex {
                    pattern: pattern.to_string(),
                    source: e,
                });
        }

        let (pattern, explicit_glob) = match rule.strip_prefix("glob:") {
            Some(pattern) => (pattern.trim(), true),
            None => (rule, false),
        };
        if explicit_glob || pattern.contains(['*', '?', '[']) {
            return GlobPattern::new(pattern)
                .map(NameRule::Glob)
                .map_err(|e| FilterError::InvalidGlob {
                    pattern: pattern.to_string(),
                    source: e,
                });
        }

        Ok(NameRule::Exact(pattern.to_string()))
    }

    pub fn matches(&self, table: &str) -> bool {
        match self {
            NameRule::Glob(pattern) => pattern.matches(table),
            NameRule::Regex(regex) => regex.is_match(table),
            NameRule::Exact(name) => name == table,
        }
    }
}

/// Include/exclude rules deciding which tables get their data copied
#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    include: Vec<NameRule>,
    exclude: Vec<NameRule>,
}

impl TableFilter {
    /// Compile include and exclude rule lists
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self, FilterError> {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// Check if a table's data should be copied
    pub fn should_copy(&self, table: &str) -> bool {
        if self.exclude.iter().any(|rule| rule.matches(table)) {
            return false;
        }
        self.include.iter().any(|rule| rule.matches(table))
    }
}

fn compile<S: AsRef<str>>(rules: &[S]) -> Result<Vec<NameRule>, FilterError> {
    rules.iter().map(|rule| NameRule::parse(rule.as_ref())).collect()
}
