use serde::{Deserialize, Serialize};

/// One name-selection rule.
///
/// These select which names cross a session boundary: the server applies its
/// set when choosing which table names to export, the client when deciding
/// which inbound registrations to accept. They are separate from the table's
/// name-mapping rules, which rewrite names rather than select them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchRule {
    /// Matches every name.
    Any,
    /// Matches exactly this name.
    Exact(String),
    /// Matches names starting with this prefix.
    Prefix(String),
}

impl MatchRule {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            MatchRule::Any => true,
            MatchRule::Exact(n) => name == n,
            MatchRule::Prefix(p) => name.starts_with(p.as_str()),
        }
    }
}

/// An ordered list of [`MatchRule`]s. A name matches the set when any rule
/// matches it; the empty set matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchRuleSet {
    rules: Vec<MatchRule>,
}

impl MatchRuleSet {
    /// The default rule set: matches any name.
    pub fn match_any() -> Self {
        Default::default()
    }

    pub fn matches(&self, name: &str) -> bool {
        self.rules.is_empty() || self.rules.iter().any(|r| r.matches(name))
    }
}

impl From<Vec<MatchRule>> for MatchRuleSet {
    fn from(rules: Vec<MatchRule>) -> Self {
        MatchRuleSet { rules }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_matches_everything() {
        assert!(MatchRuleSet::match_any().matches("anything.at.all"));
    }

    #[test]
    fn rules_are_disjunctive() {
        let set = MatchRuleSet::from(vec![
            MatchRule::Exact("a".into()),
            MatchRule::Prefix("sub.".into()),
        ]);
        assert!(set.matches("a"));
        assert!(set.matches("sub.x"));
        assert!(!set.matches("b"));
    }
}
