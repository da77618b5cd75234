// Best-effort name resolution shared by the EF and migration stages.
//
// Matching is case-insensitive, with an optional pluralization probe that
// tries the bare name and `name + "s"` in both directions. The heuristic is
// deliberately asymmetric (it never strips more than one trailing `s`) and
// callers opt into it per lookup site.

use std::collections::HashMap;

/// Map wrapper whose lookups are case-insensitive. Values keep the spelling
/// they were inserted with; the first insertion for a key wins.
#[derive(Debug, Default, Clone)]
pub struct CiMap<V> {
    inner: HashMap<String, V>,
}

impl<V> CiMap<V> {
    pub fn new() -> Self {
        CiMap { inner: HashMap::new() }
    }

    pub fn insert(&mut self, key: &str, value: V) {
        self.inner.entry(key.to_lowercase()).or_insert(value);
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.inner.get(&key.to_lowercase())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(&key.to_lowercase())
    }

    /// Lookup with the ±"s" pluralization probe: exact first, then
    /// `name + "s"`, then the name with one trailing `s` removed.
    pub fn get_plural_tolerant(&self, key: &str) -> Option<&V> {
        if let Some(v) = self.get(key) {
            return Some(v);
        }
        if let Some(v) = self.get(&format!("{key}s")) {
            return Some(v);
        }
        key.strip_suffix('s')
            .or_else(|| key.strip_suffix('S'))
            .and_then(|singular| self.get(singular))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// The candidate spellings the ±"s" probe would accept for `name`.
pub fn plural_variants(name: &str) -> Vec<String> {
    let mut variants = vec![name.to_string(), format!("{name}s")];
    if let Some(singular) = name.strip_suffix('s').or_else(|| name.strip_suffix('S')) {
        if !singular.is_empty() {
            variants.push(singular.to_string());
        }
    }
    variants
}

/// Case-insensitive equality for short identifier strings.
pub fn eq_ci(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
