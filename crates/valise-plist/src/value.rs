//! The tagged document value tree.

use std::collections::BTreeMap;

/// A structured document value.
///
/// Maps are ordered by key so iteration and externalization are
/// deterministic. Callers must not rely on identity across `get` calls;
/// equality is structural.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Key/value mapping with sorted keys.
    Map(BTreeMap<String, Value>),
    /// Ordered sequence.
    Seq(Vec<Value>),
    /// UTF-8 string.
    Str(String),
    /// Signed integer.
    Int(i64),
    /// Boolean.
    Bool(bool),
    /// Opaque bytes.
    Bytes(Vec<u8>),
}

impl Value {
    /// Create an empty map.
    pub fn map() -> Self {
        Self::Map(BTreeMap::new())
    }

    /// Create an empty sequence.
    pub fn seq() -> Self {
        Self::Seq(Vec::new())
    }

    /// Build a sequence of strings.
    pub fn str_seq<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Seq(items.into_iter().map(|s| Self::Str(s.into())).collect())
    }

    /// View as a map.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Mutable view as a map.
    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// View as a sequence.
    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Self::Seq(seq) => Some(seq),
            _ => None,
        }
    }

    /// Mutable view as a sequence.
    pub fn as_seq_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Self::Seq(seq) => Some(seq),
            _ => None,
        }
    }

    /// View as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// View as an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// View as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// View as bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Map lookup; `None` on non-maps.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Map lookup returning a string value.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Map lookup returning an integer value.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_int)
    }

    /// Map lookup returning a boolean; missing keys are `false`.
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Map lookup returning a sequence.
    pub fn get_seq(&self, key: &str) -> Option<&[Value]> {
        self.get(key).and_then(Value::as_seq)
    }

    /// Map lookup returning the strings of a string sequence, skipping
    /// non-string members. A missing key yields an empty vector.
    pub fn get_str_seq(&self, key: &str) -> Vec<String> {
        self.get_seq(key)
            .unwrap_or_default()
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    /// Insert into a map; panics on non-maps (programming error).
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.as_map_mut().expect("insert on non-map value").insert(key.into(), value);
    }

    /// Remove a key from a map; `None` on non-maps or missing keys.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.as_map_mut().and_then(|m| m.remove(key))
    }

    /// Push onto a sequence; panics on non-sequences (programming error).
    pub fn push(&mut self, value: Value) {
        self.as_seq_mut().expect("push on non-seq value").push(value);
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Int(n as i64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors() {
        let mut doc = Value::map();
        doc.insert("name", Value::from("mpfr"));
        doc.insert("count", Value::from(3_i64));
        doc.insert("auto", Value::from(true));
        doc.insert("deps", Value::str_seq(["a", "b"]));

        assert_eq!(doc.get_str("name"), Some("mpfr"));
        assert_eq!(doc.get_int("count"), Some(3));
        assert!(doc.get_bool("auto"));
        assert!(!doc.get_bool("missing"));
        assert_eq!(doc.get_str_seq("deps"), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(doc.get_str("count"), None);
    }

    #[test]
    fn map_iteration_is_sorted() {
        let mut doc = Value::map();
        doc.insert("zeta", Value::from(1_i64));
        doc.insert("alpha", Value::from(2_i64));
        let keys: Vec<&String> = doc.as_map().unwrap().keys().collect();
        assert_eq!(keys, ["alpha", "zeta"]);
    }
}
