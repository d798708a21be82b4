use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Case-insensitive multimap: a header name can carry more than one value
/// (`Set-Cookie`, repeated `Link` headers), and lookups shouldn't care
/// whether the caller wrote `Content-Type` or `content-type`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Headers {
    entries: HashMap<String, Vec<String>>,
}

fn normalize(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .entry(normalize(name.as_ref()))
            .or_default()
            .push(value.into());
    }

    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .insert(normalize(name.as_ref()), vec![value.into()]);
    }

    /// First value for the header, if any.
    pub fn get(&self, name: impl AsRef<str>) -> Option<&str> {
        self.entries
            .get(&normalize(name.as_ref()))
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }

    pub fn get_all(&self, name: impl AsRef<str>) -> &[String] {
        self.entries
            .get(&normalize(name.as_ref()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains(&self, name: impl AsRef<str>) -> bool {
        self.entries.contains_key(&normalize(name.as_ref()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v.as_str())))
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
