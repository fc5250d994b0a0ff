//! Dictionary lookups
//!
//! A dictionary maps stored codes to display labels per dictionary type
//! (`sys_user_sex`: `0 -> Male`). The lookup itself is supplied by the host;
//! [`DictionaryCache`] scopes memoization to a single export or import call.

use serde::Deserialize;
use std::collections::HashMap;

/// Code/label lookup collaborator
pub trait DictionaryLookup {
    fn label_for(&self, dict_type: &str, code: &str) -> Option<String>;

    fn code_for(&self, dict_type: &str, label: &str) -> Option<String>;

    /// Labels in display order, used to build dropdown lists
    fn all_labels(&self, dict_type: &str) -> Vec<String>;
}

/// Lookup with no entries. Every code resolves to nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDictionary;

impl DictionaryLookup for NoDictionary {
    fn label_for(&self, _dict_type: &str, _code: &str) -> Option<String> {
        None
    }

    fn code_for(&self, _dict_type: &str, _label: &str) -> Option<String> {
        None
    }

    fn all_labels(&self, _dict_type: &str) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DictEntry {
    pub value: String,
    pub label: String,
}

/// In-memory dictionary, typically loaded from a schema file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct StaticDictionary {
    types: HashMap<String, Vec<DictEntry>>,
}

impl StaticDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_entry(
        mut self,
        dict_type: impl Into<String>,
        value: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        self.insert(dict_type, value, label);
        self
    }

    pub fn insert(
        &mut self,
        dict_type: impl Into<String>,
        value: impl Into<String>,
        label: impl Into<String>,
    ) {
        self.types.entry(dict_type.into()).or_default().push(DictEntry {
            value: value.into(),
            label: label.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl DictionaryLookup for StaticDictionary {
    fn label_for(&self, dict_type: &str, code: &str) -> Option<String> {
        self.types
            .get(dict_type)?
            .iter()
            .find(|e| e.value == code)
            .map(|e| e.label.clone())
    }

    fn code_for(&self, dict_type: &str, label: &str) -> Option<String> {
        self.types
            .get(dict_type)?
            .iter()
            .find(|e| e.label == label)
            .map(|e| e.value.clone())
    }

    fn all_labels(&self, dict_type: &str) -> Vec<String> {
        self.types
            .get(dict_type)
            .map(|entries| entries.iter().map(|e| e.label.clone()).collect())
            .unwrap_or_default()
    }
}

//==============================================================================
// Per-call cache
//==============================================================================

/// Memoizes dictionary lookups for one export or import invocation.
///
/// Each `(type, raw value)` pair is resolved through the collaborator at
/// most once. Multi-value cells (`"0,1"`) are split on the column separator
/// and translated piecewise; unknown pieces are dropped.
pub struct DictionaryCache<'a> {
    lookup: &'a dyn DictionaryLookup,
    labels: HashMap<(String, String), String>,
    codes: HashMap<(String, String), String>,
    combos: HashMap<String, Vec<String>>,
    queries: usize,
}

impl<'a> DictionaryCache<'a> {
    pub fn new(lookup: &'a dyn DictionaryLookup) -> Self {
        Self {
            lookup,
            labels: HashMap::new(),
            codes: HashMap::new(),
            combos: HashMap::new(),
            queries: 0,
        }
    }

    /// Code(s) to label(s)
    pub fn label(&mut self, dict_type: &str, value: &str, separator: &str) -> String {
        let key = (dict_type.to_string(), value.to_string());
        if let Some(hit) = self.labels.get(&key) {
            return hit.clone();
        }
        self.queries += 1;
        let lookup = self.lookup;
        let resolved = translate(value, separator, |v| lookup.label_for(dict_type, v));
        self.labels.insert(key, resolved.clone());
        resolved
    }

    /// Label(s) back to code(s)
    pub fn code(&mut self, dict_type: &str, label: &str, separator: &str) -> String {
        let key = (dict_type.to_string(), label.to_string());
        if let Some(hit) = self.codes.get(&key) {
            return hit.clone();
        }
        self.queries += 1;
        let lookup = self.lookup;
        let resolved = translate(label, separator, |v| lookup.code_for(dict_type, v));
        self.codes.insert(key, resolved.clone());
        resolved
    }

    pub fn all_labels(&mut self, dict_type: &str) -> Vec<String> {
        if let Some(hit) = self.combos.get(dict_type) {
            return hit.clone();
        }
        self.queries += 1;
        let labels = self.lookup.all_labels(dict_type);
        self.combos.insert(dict_type.to_string(), labels.clone());
        labels
    }

    /// Number of collaborator round-trips so far
    pub fn queries(&self) -> usize {
        self.queries
    }
}

fn translate(value: &str, separator: &str, mut f: impl FnMut(&str) -> Option<String>) -> String {
    if separator.is_empty() || !value.contains(separator) {
        return f(value).unwrap_or_default();
    }
    value
        .split(separator)
        .filter_map(&mut f)
        .collect::<Vec<_>>()
        .join(separator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn sexes() -> StaticDictionary {
        StaticDictionary::new()
            .with_entry("sys_user_sex", "0", "Male")
            .with_entry("sys_user_sex", "1", "Female")
            .with_entry("sys_user_sex", "2", "Unknown")
    }

    struct Counting {
        inner: StaticDictionary,
        calls: Cell<usize>,
    }

    impl DictionaryLookup for Counting {
        fn label_for(&self, dict_type: &str, code: &str) -> Option<String> {
            self.calls.set(self.calls.get() + 1);
            self.inner.label_for(dict_type, code)
        }

        fn code_for(&self, dict_type: &str, label: &str) -> Option<String> {
            self.calls.set(self.calls.get() + 1);
            self.inner.code_for(dict_type, label)
        }

        fn all_labels(&self, dict_type: &str) -> Vec<String> {
            self.inner.all_labels(dict_type)
        }
    }

    #[test]
    fn test_static_lookup() {
        let dict = sexes();
        assert_eq!(dict.label_for("sys_user_sex", "1").as_deref(), Some("Female"));
        assert_eq!(dict.code_for("sys_user_sex", "Unknown").as_deref(), Some("2"));
        assert_eq!(dict.label_for("sys_user_sex", "9"), None);
        assert_eq!(dict.label_for("other", "0"), None);
        assert_eq!(dict.all_labels("sys_user_sex"), vec!["Male", "Female", "Unknown"]);
    }

    #[test]
    fn test_cache_queries_once_per_key() {
        let counting = Counting {
            inner: sexes(),
            calls: Cell::new(0),
        };
        let mut cache = DictionaryCache::new(&counting);
        for _ in 0..5 {
            assert_eq!(cache.label("sys_user_sex", "0", ","), "Male");
        }
        assert_eq!(counting.calls.get(), 1);
        assert_eq!(cache.label("sys_user_sex", "1", ","), "Female");
        assert_eq!(counting.calls.get(), 2);
        assert_eq!(cache.queries(), 2);
    }

    #[test]
    fn test_multi_value_translation() {
        let dict = sexes();
        let mut cache = DictionaryCache::new(&dict);
        assert_eq!(cache.label("sys_user_sex", "0,1", ","), "Male,Female");
        assert_eq!(cache.code("sys_user_sex", "Female,Male", ","), "1,0");
        assert_eq!(cache.label("sys_user_sex", "0,7", ","), "Male");
    }

    #[test]
    fn test_unknown_code_resolves_empty() {
        let mut cache = DictionaryCache::new(&NoDictionary);
        assert_eq!(cache.label("any", "x", ","), "");
        assert!(cache.all_labels("any").is_empty());
    }

    #[test]
    fn test_deserialize_dictionary() {
        let yaml = r#"
sys_user_sex:
  - { value: "0", label: Male }
  - { value: "1", label: Female }
"#;
        let dict: StaticDictionary = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(dict.label_for("sys_user_sex", "0").as_deref(), Some("Male"));
    }
}
