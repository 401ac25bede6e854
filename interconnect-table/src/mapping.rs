use std::collections::HashMap;

use regex::Regex;

use crate::error::TableError;

/// One name-rewriting rule, applied by the table when an accessor is
/// requested. Resolution over a rule list is first-match-wins; a name no
/// rule matches passes through unchanged.
#[derive(Debug, Clone)]
pub enum NameMappingRule {
    /// Rewrites exactly `from` to `to`.
    Exact { from: String, to: String },

    /// Rewrites a leading `from` to `to`, keeping the rest of the name.
    Prefix { from: String, to: String },

    /// Rewrites the first regex match using `replacement` (which may use
    /// `$0`, `$1`, ... captures). Names the pattern does not match are not
    /// affected by this rule.
    Regex {
        pattern: Regex,
        replacement: String,
    },

    /// A nested rule list, resolved first-match-wins like the outer list.
    List(Vec<NameMappingRule>),
}

impl NameMappingRule {
    pub fn exact(from: impl Into<String>, to: impl Into<String>) -> Self {
        NameMappingRule::Exact {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn prefix(from: impl Into<String>, to: impl Into<String>) -> Self {
        NameMappingRule::Prefix {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn regex(pattern: &str, replacement: impl Into<String>) -> Result<Self, TableError> {
        let pattern = Regex::new(pattern).map_err(|e| TableError::InvalidMappingRegex {
            pattern: pattern.to_owned(),
            message: e.to_string(),
        })?;
        Ok(NameMappingRule::Regex {
            pattern,
            replacement: replacement.into(),
        })
    }

    fn apply(&self, name: &str) -> Option<String> {
        match self {
            NameMappingRule::Exact { from, to } => (name == from).then(|| to.clone()),
            NameMappingRule::Prefix { from, to } => name
                .strip_prefix(from.as_str())
                .map(|rest| format!("{to}{rest}")),
            NameMappingRule::Regex {
                pattern,
                replacement,
            } => pattern
                .is_match(name)
                .then(|| pattern.replace(name, replacement.as_str()).into_owned()),
            NameMappingRule::List(rules) => rules.iter().find_map(|r| r.apply(name)),
        }
    }

    fn collect_exact<'a>(&'a self, cache: &mut HashMap<String, String, ahash::RandomState>) {
        match self {
            NameMappingRule::Exact { from, to } => {
                // first-match-wins: an earlier rule already owns this name
                cache.entry(from.clone()).or_insert_with(|| to.clone());
            }
            NameMappingRule::List(rules) => {
                for rule in rules {
                    rule.collect_exact(cache);
                }
            }
            _ => {}
        }
    }
}

/// The table's resolved mapping state: the ordered rule list plus a flat
/// cache of the exact-rule subset for the fast path.
#[derive(Debug, Clone, Default)]
pub(crate) struct NameMapper {
    rules: Vec<NameMappingRule>,
    exact: HashMap<String, String, ahash::RandomState>,
}

impl NameMapper {
    pub(crate) fn set_rules(&mut self, rules: Vec<NameMappingRule>) {
        self.rules = rules;
        self.rebuild_exact();
    }

    pub(crate) fn add_rule(&mut self, rule: NameMappingRule) {
        self.rules.push(rule);
        self.rebuild_exact();
    }

    pub(crate) fn reset(&mut self) {
        self.rules.clear();
        self.exact.clear();
    }

    fn rebuild_exact(&mut self) {
        self.exact.clear();
        for rule in &self.rules {
            rule.collect_exact(&mut self.exact);
        }
    }

    /// Map a sanitized name. The exact cache beats the rule list; within the
    /// list, earlier rules beat later ones.
    pub(crate) fn map<'a>(&self, name: &'a str) -> std::borrow::Cow<'a, str> {
        if let Some(mapped) = self.exact.get(name) {
            return mapped.clone().into();
        }
        match self.rules.iter().find_map(|r| r.apply(name)) {
            Some(mapped) => mapped.into(),
            None => name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper(rules: Vec<NameMappingRule>) -> NameMapper {
        let mut m = NameMapper::default();
        m.set_rules(rules);
        m
    }

    #[test]
    fn unmatched_names_pass_through() {
        let m = mapper(vec![NameMappingRule::exact("a", "b")]);
        assert_eq!(m.map("c"), "c");
    }

    #[test]
    fn exact_beats_rule_list() {
        let m = mapper(vec![
            NameMappingRule::prefix("a", "z"),
            NameMappingRule::exact("a.x", "direct"),
        ]);
        // the exact cache short-circuits even though the prefix rule comes
        // first in the list
        assert_eq!(m.map("a.x"), "direct");
        assert_eq!(m.map("a.y"), "z.y");
    }

    #[test]
    fn earlier_rule_beats_later() {
        let m = mapper(vec![
            NameMappingRule::prefix("a.", "one."),
            NameMappingRule::prefix("a.", "two."),
        ]);
        assert_eq!(m.map("a.k"), "one.k");
    }

    #[test]
    fn regex_rewrite_with_whole_match() {
        let m = mapper(vec![NameMappingRule::regex("foo.*", "bar.$0").unwrap()]);
        assert_eq!(m.map("foo.zz"), "bar.foo.zz");
        assert_eq!(m.map("other"), "other");
    }

    #[test]
    fn nested_list_resolves_first_match() {
        let m = mapper(vec![NameMappingRule::List(vec![
            NameMappingRule::exact("x", "inner1"),
            NameMappingRule::exact("x", "inner2"),
        ])]);
        assert_eq!(m.map("x"), "inner1");
    }

    #[test]
    fn bad_regex_is_a_config_error() {
        assert!(matches!(
            NameMappingRule::regex("(", "x"),
            Err(TableError::InvalidMappingRegex { .. })
        ));
    }
}
