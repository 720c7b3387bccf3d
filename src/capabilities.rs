//! Capabilities advertised by a NETCONF peer

use serde::Serialize;

use crate::tree::{NodeId, Tree};

pub const NETCONF_BASE_CAPABILITY: &str = "urn:ietf:params:netconf:base:1.0";
pub const NETCONF_BASE_1_1_CAPABILITY: &str = "urn:ietf:params:netconf:base:1.1";
pub const WRITABLE_RUNNING_CAPABILITY: &str =
    "urn:ietf:params:netconf:capability:writable-running:1.0";
pub const CANDIDATE_CAPABILITY: &str = "urn:ietf:params:netconf:capability:candidate:1.0";
pub const CONFIRMED_COMMIT_CAPABILITY: &str =
    "urn:ietf:params:netconf:capability:confirmed-commit:1.0";
pub const ROLLBACK_ON_ERROR_CAPABILITY: &str =
    "urn:ietf:params:netconf:capability:rollback-on-error:1.0";
pub const VALIDATE_CAPABILITY: &str = "urn:ietf:params:netconf:capability:validate:1.0";
pub const STARTUP_CAPABILITY: &str = "urn:ietf:params:netconf:capability:startup:1.0";
pub const URL_CAPABILITY: &str = "urn:ietf:params:netconf:capability:url:1.0";
pub const URL_CAPABILITY_SCHEME: &str = "urn:ietf:params:netconf:capability:url:1.0?scheme=";
pub const XPATH_CAPABILITY: &str = "urn:ietf:params:netconf:capability:xpath:1.0";
pub const NOTIFICATION_CAPABILITY: &str = "urn:ietf:params:netconf:capability:notification:1.0";
pub const INTERLEAVE_CAPABILITY: &str = "urn:ietf:params:netconf:capability:interleave:1.0";
pub const PARTIAL_LOCK_CAPABILITY: &str = "urn:ietf:params:netconf:capability:partial-lock:1.0";

/// Actions extension namespace, also its capability URI
pub const NS_ACTIONS: &str = "http://tail-f.com/ns/netconf/actions/1.0";
/// Transactions extension namespace, also its capability URI
pub const NS_TRANSACTIONS: &str = "http://tail-f.com/ns/netconf/transactions/1.0";
pub const ACTIONS_CAPABILITY: &str = NS_ACTIONS;
pub const TRANSACTIONS_CAPABILITY: &str = NS_TRANSACTIONS;
pub const WITH_DEFAULTS_CAPABILITY: &str = "http://tail-f.com/ns/netconf/with-defaults/1.0";

// Pre-RFC forms under the xml:ns tree, still sent by older servers
const LEGACY_BASE: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
const LEGACY_CANDIDATE: &str = "urn:ietf:params:xml:ns:netconf:capability:candidate:1.0";
const LEGACY_CONFIRMED_COMMIT: &str =
    "urn:ietf:params:xml:ns:netconf:capability:confirmed-commit:1.0";
const LEGACY_VALIDATE: &str = "urn:ietf:params:xml:ns:netconf:capability:validate:1.0";
const LEGACY_URL: &str = "urn:ietf:params:xml:ns:netconf:capability:url:1.0";

/// A capability URI without its query part, with the advertised revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capability {
    pub uri: String,
    pub revision: Option<String>,
}

/// Parsed capability set, immutable once built
#[derive(Debug, Clone, Default, Serialize)]
pub struct Capabilities {
    pub base: bool,
    pub writable_running: bool,
    pub candidate: bool,
    pub confirmed_commit: bool,
    pub rollback_on_error: bool,
    pub validate: bool,
    pub startup: bool,
    pub url: bool,
    pub url_schemes: Vec<String>,
    pub xpath: bool,
    pub notification: bool,
    pub interleave: bool,
    pub partial_lock: bool,
    pub actions: bool,
    pub transactions: bool,
    pub with_defaults: bool,
    /// Every advertised capability
    capabilities: Vec<Capability>,
    /// Capabilities that are not protocol features, usually data models
    data_capabilities: Vec<Capability>,
}

impl Capabilities {
    /// Read the `capability` children of a `capabilities` node
    pub fn from_node(tree: &Tree, id: NodeId) -> Self {
        Self::from_uris(
            tree.children_named(id, "capability")
                .into_iter()
                .filter_map(|c| tree.value(c).map(|v| v.to_string())),
        )
    }

    /// Build from capability strings as they appear on the wire
    pub fn from_uris<I, S>(uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut caps = Self::default();
        for raw in uris {
            caps.add(raw.as_ref().trim());
        }
        caps
    }

    fn add(&mut self, raw: &str) {
        let (uri, query) = match raw.split_once('?') {
            Some((u, q)) => (u, Some(q)),
            None => (raw, None),
        };
        let revision = query.and_then(|q| {
            q.split('&').find_map(|pair| match pair.split_once('=') {
                Some(("revision", rev)) => Some(rev.to_string()),
                _ => None,
            })
        });
        let capa = Capability {
            uri: uri.to_string(),
            revision,
        };
        self.capabilities.push(capa.clone());

        match uri {
            NETCONF_BASE_CAPABILITY | NETCONF_BASE_1_1_CAPABILITY | LEGACY_BASE => self.base = true,
            WRITABLE_RUNNING_CAPABILITY => self.writable_running = true,
            CANDIDATE_CAPABILITY | LEGACY_CANDIDATE => self.candidate = true,
            CONFIRMED_COMMIT_CAPABILITY | LEGACY_CONFIRMED_COMMIT => self.confirmed_commit = true,
            ROLLBACK_ON_ERROR_CAPABILITY => self.rollback_on_error = true,
            VALIDATE_CAPABILITY | LEGACY_VALIDATE => self.validate = true,
            NOTIFICATION_CAPABILITY => self.notification = true,
            INTERLEAVE_CAPABILITY => self.interleave = true,
            STARTUP_CAPABILITY => self.startup = true,
            XPATH_CAPABILITY => self.xpath = true,
            PARTIAL_LOCK_CAPABILITY => self.partial_lock = true,
            URL_CAPABILITY if raw.starts_with(URL_CAPABILITY_SCHEME) => {
                self.url = true;
                self.url_schemes = split_schemes(&raw[URL_CAPABILITY_SCHEME.len()..]);
            }
            LEGACY_URL => {
                // legacy servers list the schemes directly as the query
                self.url = true;
                if let Some(q) = query {
                    self.url_schemes = split_schemes(q.strip_prefix("scheme=").unwrap_or(q));
                }
            }
            WITH_DEFAULTS_CAPABILITY => self.with_defaults = true,
            ACTIONS_CAPABILITY => self.actions = true,
            TRANSACTIONS_CAPABILITY => self.transactions = true,
            _ => self.data_capabilities.push(capa),
        }
    }

    /// Is a capability advertised, by URI without query
    pub fn has_capability(&self, uri: &str) -> bool {
        self.capabilities.iter().any(|c| c.uri == uri)
    }

    /// Revision advertised for a data model namespace. Protocol
    /// capabilities never carry one.
    pub fn revision(&self, uri: &str) -> Option<&str> {
        self.data_capabilities
            .iter()
            .find(|c| c.uri == uri)
            .and_then(|c| c.revision.as_deref())
    }

    /// Is a URL scheme supported by the `:url` capability
    pub fn has_url_scheme(&self, scheme: &str) -> bool {
        self.url && self.url_schemes.iter().any(|s| s == scheme)
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    pub fn data_capabilities(&self) -> &[Capability] {
        &self.data_capabilities
    }

    /// JSON dump of the capability set
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn split_schemes(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
