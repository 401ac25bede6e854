use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::container::ValueContainer;

/// An insertion-ordered set of named values.
///
/// Used as the parameter and result payload of remote service actions, and
/// available as an ordinary container kind. Lookup by name is constant time;
/// iteration yields pairs in insertion order.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct NamedValueSet {
    values: IndexMap<String, ValueContainer, ahash::RandomState>,
}

impl NamedValueSet {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Set `name` to `value`, replacing any previous value while keeping the
    /// name's original position in the set.
    pub fn set(&mut self, name: impl Into<String>, value: ValueContainer) -> &mut Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ValueContainer> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<ValueContainer> {
        self.values.shift_remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ValueContainer)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    /// Estimated wire size of the whole set.
    pub fn estimated_content_size(&self) -> usize {
        5 + self
            .values
            .iter()
            .map(|(k, v)| 5 + k.len() + v.estimated_content_size())
            .sum::<usize>()
    }
}

impl fmt::Display for NamedValueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str("}")
    }
}

impl FromIterator<(String, ValueContainer)> for NamedValueSet {
    fn from_iter<T: IntoIterator<Item = (String, ValueContainer)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a NamedValueSet {
    type Item = (&'a String, &'a ValueContainer);
    type IntoIter = indexmap::map::Iter<'a, String, ValueContainer>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_insertion_order() {
        let mut set = NamedValueSet::new();
        set.set("b", ValueContainer::I32(2))
            .set("a", ValueContainer::I32(1))
            .set("b", ValueContainer::I32(3));
        let names: Vec<_> = set.names().collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(set.get("b"), Some(&ValueContainer::I32(3)));
    }

    #[test]
    fn equality_is_deep() {
        let mut a = NamedValueSet::new();
        a.set("x", ValueContainer::TextList(vec!["1".into()]));
        let b = a.clone();
        assert_eq!(a, b);
        a.set("x", ValueContainer::TextList(vec!["2".into()]));
        assert_ne!(a, b);
    }
}
