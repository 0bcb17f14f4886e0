//! Typed rules and the checks they resolve into.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::pattern::Pattern;

/// A validated manifest rule. Immutable once loaded.
///
/// Identity is structural: two rules with the same fields are the same rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rule {
    pub pattern: Pattern,
    /// Name of the checker executable under the checks directory.
    pub check: String,
    /// Environment overrides applied when running the checker.
    pub env: BTreeMap<String, String>,
    /// Only report findings that are not already present in the previous tree.
    pub no_new: bool,
    pub hint: String,
}

impl Rule {
    pub fn new(pattern: Pattern, check: impl Into<String>) -> Self {
        Self {
            pattern,
            check: check.into(),
            env: BTreeMap::new(),
            no_new: false,
            hint: String::new(),
        }
    }

    /// Name of the companion dependency script for this rule's checker.
    pub fn deps_script(&self) -> String {
        format!("{}-deps", self.check)
    }
}

/// One rule applied to one changed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub rule: Rule,
    pub file: String,
    /// Set once during the prerequisite phase.
    pub prerequisite_satisfied: bool,
}

impl Check {
    pub fn new(rule: Rule, file: impl Into<String>) -> Self {
        Self {
            rule,
            file: file.into(),
            prerequisite_satisfied: false,
        }
    }

    pub fn requires_old_source(&self) -> bool {
        self.rule.no_new
    }
}

/// Checks deduplicated by `(rule, file)`, in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckSet {
    checks: Vec<Check>,
}

impl CheckSet {
    pub fn from_pairs(pairs: BTreeSet<(Rule, String)>) -> Self {
        Self {
            checks: pairs
                .into_iter()
                .map(|(rule, file)| Check::new(rule, file))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Check> {
        self.checks.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Check> {
        self.checks.iter_mut()
    }

    /// True if any check compares against the previous source tree.
    pub fn requires_old_source(&self) -> bool {
        self.checks.iter().any(Check::requires_old_source)
    }
}

impl<'a> IntoIterator for &'a CheckSet {
    type Item = &'a Check;
    type IntoIter = std::slice::Iter<'a, Check>;

    fn into_iter(self) -> Self::IntoIter {
        self.checks.iter()
    }
}
