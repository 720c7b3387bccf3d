//! Namespace prefix bindings
//!
//! A [`PrefixMap`] is an ordered set of `prefix -> namespace` bindings as
//! declared on an element. The [`PrefixRegistry`] is the fallback consulted
//! when no ancestor declares a binding.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// The NETCONF base namespace
pub const NS_NETCONF: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

/// The partial-lock namespace
pub const NS_PARTIAL_LOCK: &str = "urn:ietf:params:xml:ns:netconf:partial-lock:1.0";

/// The notification namespace
pub const NS_NOTIFICATION: &str = "urn:ietf:params:xml:ns:netconf:notification:1.0";

/// The XML namespace for `xmlns` attributes
pub const NS_XMLNS: &str = "http://www.w3.org/2000/xmlns/";

/// A single prefix binding. The empty prefix is the default namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prefix {
    pub name: String,
    pub ns: String,
}

impl Prefix {
    /// Create a new prefix binding
    pub fn new(name: impl Into<String>, ns: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ns: ns.into(),
        }
    }

    /// Create a default namespace binding
    pub fn default_ns(ns: impl Into<String>) -> Self {
        Self::new("", ns)
    }

    /// Is this a default namespace declaration
    pub fn is_default(&self) -> bool {
        self.name.is_empty()
    }

    /// Attribute name used to declare this binding: `xmlns` or `xmlns:p`
    pub fn qualified_name(&self) -> String {
        if self.is_default() {
            "xmlns".to_string()
        } else {
            format!("xmlns:{}", self.name)
        }
    }
}

/// Ordered set of prefix bindings, unique per prefix name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixMap {
    prefixes: Vec<Prefix>,
}

impl PrefixMap {
    /// Create an empty prefix map
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a map holding a single binding
    pub fn with(prefix: Prefix) -> Self {
        let mut map = Self::new();
        map.set(prefix);
        map
    }

    /// Add a binding unless the prefix is already bound
    pub fn merge_prefix(&mut self, prefix: Prefix) {
        if self.index_of(&prefix.name).is_none() {
            self.insert(prefix);
        }
    }

    /// Add all absent bindings of `other`; existing bindings win
    pub fn merge(&mut self, other: &PrefixMap) {
        for p in &other.prefixes {
            self.merge_prefix(p.clone());
        }
    }

    /// Bind a prefix, overwriting any existing binding for it
    pub fn set(&mut self, prefix: Prefix) {
        match self.index_of(&prefix.name) {
            Some(i) => self.prefixes[i].ns = prefix.ns,
            None => self.insert(prefix),
        }
    }

    /// Bind all prefixes of `other`, overwriting existing bindings
    pub fn set_all(&mut self, other: &PrefixMap) {
        for p in &other.prefixes {
            self.set(p.clone());
        }
    }

    /// Remove the binding for a prefix, returning it
    pub fn remove(&mut self, name: &str) -> Option<Prefix> {
        self.index_of(name).map(|i| self.prefixes.remove(i))
    }

    /// Namespace bound to a prefix
    pub fn prefix_to_ns(&self, name: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.ns.as_str())
    }

    /// First prefix bound to a namespace
    pub fn ns_to_prefix(&self, ns: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .find(|p| p.ns == ns)
            .map(|p| p.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Prefix> {
        self.prefixes.iter()
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.prefixes.iter().position(|p| p.name == name)
    }

    // The default binding is kept first so it is declared before any
    // prefixed binding when serialized.
    fn insert(&mut self, prefix: Prefix) {
        if prefix.is_default() {
            self.prefixes.insert(0, prefix);
        } else {
            self.prefixes.push(prefix);
        }
    }
}

impl FromIterator<Prefix> for PrefixMap {
    fn from_iter<I: IntoIterator<Item = Prefix>>(iter: I) -> Self {
        let mut map = PrefixMap::new();
        for p in iter {
            map.set(p);
        }
        map
    }
}

/// Shared, additive-only registry of default prefixes.
///
/// Cloning the registry yields another handle to the same bindings. A new
/// registry starts with `nc`, `pl` and `ncn`; protocol extensions register
/// further bindings with [`PrefixRegistry::register`].
#[derive(Debug, Clone)]
pub struct PrefixRegistry {
    map: Arc<RwLock<PrefixMap>>,
}

impl Default for PrefixRegistry {
    fn default() -> Self {
        let map: PrefixMap = [
            Prefix::new("nc", NS_NETCONF),
            Prefix::new("pl", NS_PARTIAL_LOCK),
            Prefix::new("ncn", NS_NOTIFICATION),
        ]
        .into_iter()
        .collect();
        Self {
            map: Arc::new(RwLock::new(map)),
        }
    }
}

impl PrefixRegistry {
    /// Create a registry with the standard bindings
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding unless its prefix is already registered.
    /// Returns true if the binding was added.
    pub fn register(&self, prefix: Prefix) -> bool {
        let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);
        if map.prefix_to_ns(&prefix.name).is_some() {
            return false;
        }
        tracing::debug!(prefix = %prefix.name, ns = %prefix.ns, "registering default prefix");
        map.merge_prefix(prefix);
        true
    }

    /// Namespace bound to a default prefix
    pub fn prefix_to_ns(&self, name: &str) -> Option<String> {
        self.read().prefix_to_ns(name).map(str::to_string)
    }

    /// Default prefix bound to a namespace
    pub fn ns_to_prefix(&self, ns: &str) -> Option<String> {
        self.read().ns_to_prefix(ns).map(str::to_string)
    }

    /// Copy of the current bindings
    pub fn snapshot(&self) -> PrefixMap {
        self.read().clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, PrefixMap> {
        self.map.read().unwrap_or_else(PoisonError::into_inner)
    }
}
