//! NETCONF session protocol engine
//!
//! A [`Session`] owns a [`Transport`], performs the hello exchange when it
//! is opened and then runs one blocking request/reply exchange per
//! operation. Capability preconditions are checked before anything is
//! written, so a refused operation leaves the transport untouched.

use std::sync::Arc;

use serde::Deserialize;

use crate::capabilities::{
    Capabilities, NETCONF_BASE_CAPABILITY, NS_ACTIONS, NS_TRANSACTIONS, WITH_DEFAULTS_CAPABILITY,
};
use crate::config::{SessionConfig, TraceMode};
use crate::error::{NetconfError, Result};
use crate::framing::TracingSubscriber;
use crate::prefix::{NS_NETCONF, NS_NOTIFICATION, NS_PARTIAL_LOCK, Prefix, PrefixMap, PrefixRegistry};
use crate::rpc_error::RpcError;
use crate::schema::SchemaRegistry;
use crate::transport::Transport;
use crate::tree::{Document, NodeId, NodeSet, Tree};
use crate::xml::{EncodeOptions, XmlParser, escape_attr, escape_text};

/// Namespace of the notification streams model queried by `get_streams`
pub const NS_NETMOD_NOTIFICATION: &str = "urn:ietf:params:xml:ns:netmod:notification";

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    HelloSent,
    Established,
    Closed,
}

/// Configuration datastores
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datastore {
    Running,
    Startup,
    Candidate,
}

impl Datastore {
    pub fn as_str(self) -> &'static str {
        match self {
            Datastore::Running => "running",
            Datastore::Startup => "startup",
            Datastore::Candidate => "candidate",
        }
    }
}

/// `default-operation` of edit-config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DefaultOperation {
    Merge,
    Replace,
    None,
}

impl DefaultOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            DefaultOperation::Merge => "merge",
            DefaultOperation::Replace => "replace",
            DefaultOperation::None => "none",
        }
    }
}

/// `test-option` of edit-config; needs `:validate`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestOption {
    Set,
    TestThenSet,
    TestOnly,
}

impl TestOption {
    pub fn as_str(self) -> &'static str {
        match self {
            TestOption::Set => "set",
            TestOption::TestThenSet => "test-then-set",
            TestOption::TestOnly => "test-only",
        }
    }
}

/// `error-option` of edit-config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorOption {
    StopOnError,
    ContinueOnError,
    /// Needs `:rollback-on-error`
    RollbackOnError,
}

impl ErrorOption {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorOption::StopOnError => "stop-on-error",
            ErrorOption::ContinueOnError => "continue-on-error",
            ErrorOption::RollbackOnError => "rollback-on-error",
        }
    }
}

/// Filter of a retrieval operation
#[derive(Debug, Clone, Copy)]
pub enum Filter<'a> {
    /// Everything
    All,
    /// Subtree filter given as nodes of a tree
    Subtree(&'a Tree, &'a [NodeId]),
    /// XPath filter; needs `:xpath`
    XPath(&'a str),
}

/// Source of copy-config and validate
#[derive(Debug, Clone, Copy)]
pub enum Source<'a> {
    Datastore(Datastore),
    /// URL; needs `:url` with a matching scheme
    Url(&'a str),
    /// Inline configuration
    Config(&'a Tree, &'a [NodeId]),
}

/// Target of copy-config and delete-config
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Datastore(Datastore),
    Url(&'a str),
}

impl From<Datastore> for Source<'_> {
    fn from(ds: Datastore) -> Self {
        Source::Datastore(ds)
    }
}

impl From<Datastore> for Target<'_> {
    fn from(ds: Datastore) -> Self {
        Target::Datastore(ds)
    }
}

/// Top nodes of a reply, detached from the reply envelope
#[derive(Debug, Clone)]
pub struct Data {
    pub tree: Tree,
    pub nodes: NodeSet,
}

impl Data {
    pub fn first(&self) -> Option<NodeId> {
        self.nodes.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A client session with a NETCONF server
pub struct Session<T: Transport> {
    transport: T,
    state: SessionState,
    session_id: u64,
    message_id: u64,
    capabilities: Capabilities,
    client_capabilities: Vec<String>,
    defaults: PrefixRegistry,
    parser: XmlParser,
    default_operation: Option<DefaultOperation>,
    test_option: Option<TestOption>,
    error_option: Option<ErrorOption>,
    with_defaults: Option<bool>,
}

impl<T: Transport> Session<T> {
    /// Open a session with the default configuration
    pub fn new(transport: T) -> Result<Self> {
        Self::connect(transport, &SessionConfig::default())
    }

    /// Apply a configuration and perform the hello exchange
    pub fn connect(transport: T, config: &SessionConfig) -> Result<Self> {
        Self::connect_with_defaults(transport, config, PrefixRegistry::new())
    }

    /// Like [`Session::connect`], sharing a default prefix registry
    pub fn connect_with_defaults(
        mut transport: T,
        config: &SessionConfig,
        defaults: PrefixRegistry,
    ) -> Result<Self> {
        transport.set_read_timeout(config.read_timeout())?;
        match config.trace {
            TraceMode::Off => {}
            TraceMode::Raw => transport.add_subscriber(Box::new(TracingSubscriber::raw())),
            TraceMode::Parsed => transport.add_subscriber(Box::new(TracingSubscriber::parsed())),
        }

        let mut session = Self {
            transport,
            state: SessionState::Init,
            session_id: 0,
            message_id: 1,
            capabilities: Capabilities::default(),
            client_capabilities: Vec::new(),
            parser: XmlParser::new().with_defaults(defaults.clone()),
            defaults,
            default_operation: config.default_operation,
            test_option: config.test_option,
            error_option: config.error_option,
            with_defaults: None,
        };
        for capa in &config.capabilities {
            session.add_client_capability(capa);
        }
        session.hello()?;
        if config.with_defaults {
            session.set_with_defaults(true)?;
        }
        Ok(session)
    }

    /// Assign node kinds to retrieved data from a schema
    pub fn with_schema(mut self, schema: Arc<SchemaRegistry>) -> Self {
        self.parser = std::mem::take(&mut self.parser).with_schema(schema);
        self
    }

    fn add_client_capability(&mut self, capa: &str) {
        if !self.client_capabilities.iter().any(|c| c == capa) {
            self.client_capabilities.push(capa.to_string());
        }
    }

    fn hello(&mut self) -> Result<()> {
        let mut hello = format!("<hello xmlns=\"{}\"><capabilities>", NS_NETCONF);
        hello.push_str(&format!("<capability>{}</capability>\n", NETCONF_BASE_CAPABILITY));
        for capa in &self.client_capabilities {
            hello.push_str(&format!("<capability>{}</capability>\n", escape_text(capa)));
        }
        hello.push_str("</capabilities></hello>");

        tracing::debug!(capabilities = self.client_capabilities.len() + 1, "sending hello");
        self.transport.print(&hello)?;
        self.transport.flush()?;
        self.state = SessionState::HelloSent;

        let reply = self.transport.read_one()?;
        let doc = self.parser.parse(&reply)?;
        let caps = doc
            .tree
            .get_first(doc.root, "self::hello/capabilities")?
            .ok_or_else(|| NetconfError::Session("hello contains no capabilities".into()))?;
        let capabilities = Capabilities::from_node(&doc.tree, caps);
        if !capabilities.base {
            return Err(NetconfError::Session(format!(
                "server does not support NETCONF base capability: {}",
                NETCONF_BASE_CAPABILITY
            )));
        }

        let sid = doc
            .tree
            .get_first(doc.root, "self::hello/session-id")?
            .ok_or_else(|| NetconfError::Session("hello contains no session identifier".into()))?;
        let text = doc.tree.value(sid).map(|v| v.to_string()).unwrap_or_default();
        self.session_id = text.trim().parse().map_err(|_| {
            NetconfError::Session(format!("bad session identifier in hello: \"{}\"", text))
        })?;

        tracing::debug!(
            session_id = self.session_id,
            capabilities = capabilities.capabilities().len(),
            "session established"
        );
        self.capabilities = capabilities;
        self.state = SessionState::Established;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn has_capability(&self, uri: &str) -> bool {
        self.capabilities.has_capability(uri)
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Message id the next request will carry
    pub fn next_message_id(&self) -> u64 {
        self.message_id
    }

    pub fn defaults(&self) -> &PrefixRegistry {
        &self.defaults
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Is inbound data waiting, for polling notifications
    pub fn ready(&mut self) -> Result<bool> {
        self.transport.ready()
    }

    pub fn set_default_operation(&mut self, op: Option<DefaultOperation>) {
        self.default_operation = op;
    }

    pub fn set_test_option(&mut self, option: Option<TestOption>) {
        self.test_option = option;
    }

    pub fn set_error_option(&mut self, option: Option<ErrorOption>) {
        self.error_option = option;
    }

    /// Ask for default values in get, get-config and copy-config
    pub fn set_with_defaults(&mut self, on: bool) -> Result<()> {
        self.require(self.capabilities.with_defaults, ":with-defaults")?;
        self.with_defaults = Some(on);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Retrieval
    // ------------------------------------------------------------------

    /// Retrieve configuration from a datastore
    pub fn get_config(&mut self, source: Datastore, filter: Filter<'_>) -> Result<Data> {
        tracing::debug!(datastore = source.as_str(), "get-config");
        self.check_datastore(source, false)?;
        let mut body = String::from("<nc:get-config>");
        body.push_str(&format!("<nc:source>{}</nc:source>", datastore_xml(source)));
        body.push_str(&self.filter_xml(filter)?);
        body.push_str("</nc:get-config>");
        let mid = self.send(&body, true)?;
        self.receive_data(mid)
    }

    /// Retrieve running configuration and state data
    pub fn get(&mut self, filter: Filter<'_>) -> Result<Data> {
        tracing::debug!("get");
        let mut body = String::from("<nc:get>");
        body.push_str(&self.filter_xml(filter)?);
        body.push_str("</nc:get>");
        let mid = self.send(&body, true)?;
        self.receive_data(mid)
    }

    fn filter_xml(&self, filter: Filter<'_>) -> Result<String> {
        match filter {
            Filter::All => Ok(String::new()),
            Filter::Subtree(tree, nodes) => Ok(format!(
                "<nc:filter nc:type=\"subtree\">{}</nc:filter>",
                self.encode_nodes(tree, nodes)?
            )),
            Filter::XPath(xpath) => {
                self.require(self.capabilities.xpath, ":xpath")?;
                Ok(format!(
                    "<nc:filter nc:type=\"xpath\" nc:select=\"{}\"/>",
                    escape_attr(xpath)
                ))
            }
        }
    }

    // ------------------------------------------------------------------
    // Editing
    // ------------------------------------------------------------------

    /// Load configuration nodes into a datastore
    pub fn edit_config(&mut self, target: Datastore, tree: &Tree, nodes: &[NodeId]) -> Result<()> {
        tracing::debug!(datastore = target.as_str(), nodes = nodes.len(), "edit-config");
        let config = format!("<nc:config>{}</nc:config>", self.encode_nodes(tree, nodes)?);
        self.edit(target, &config)
    }

    /// Load the configuration found at a URL into a datastore
    pub fn edit_config_url(&mut self, target: Datastore, url: &str) -> Result<()> {
        tracing::debug!(datastore = target.as_str(), url, "edit-config");
        let config = self.url_xml(url)?;
        self.edit(target, &config)
    }

    fn edit(&mut self, target: Datastore, config: &str) -> Result<()> {
        self.check_datastore(target, true)?;
        let mut body = String::from("<nc:edit-config>");
        body.push_str(&format!("<nc:target>{}</nc:target>", datastore_xml(target)));
        if let Some(op) = self.default_operation {
            body.push_str(&format!(
                "<nc:default-operation>{}</nc:default-operation>",
                op.as_str()
            ));
        }
        if let Some(option) = self.test_option {
            self.require(self.capabilities.validate, ":validate")?;
            body.push_str(&format!("<nc:test-option>{}</nc:test-option>", option.as_str()));
        }
        if let Some(option) = self.error_option {
            if option == ErrorOption::RollbackOnError {
                self.require(self.capabilities.rollback_on_error, ":rollback-on-error")?;
            }
            body.push_str(&format!("<nc:error-option>{}</nc:error-option>", option.as_str()));
        }
        body.push_str(config);
        body.push_str("</nc:edit-config>");
        let mid = self.send(&body, false)?;
        self.receive_ok(mid)
    }

    /// Replace a whole datastore or URL with another configuration
    pub fn copy_config(&mut self, source: Source<'_>, target: Target<'_>) -> Result<()> {
        tracing::debug!("copy-config");
        let target = self.target_xml(target)?;
        let source = self.source_xml(source)?;
        let body = format!(
            "<nc:copy-config><nc:target>{}</nc:target><nc:source>{}</nc:source></nc:copy-config>",
            target, source
        );
        let mid = self.send(&body, true)?;
        self.receive_ok(mid)
    }

    /// Delete a datastore or URL; the running datastore cannot be deleted
    pub fn delete_config(&mut self, target: Target<'_>) -> Result<()> {
        tracing::debug!("delete-config");
        if matches!(target, Target::Datastore(Datastore::Running)) {
            return Err(NetconfError::Session(
                "the running datastore cannot be deleted".into(),
            ));
        }
        let target = self.target_xml(target)?;
        let body = format!("<nc:delete-config><nc:target>{}</nc:target></nc:delete-config>", target);
        let mid = self.send(&body, false)?;
        self.receive_ok(mid)
    }

    // ------------------------------------------------------------------
    // Locking
    // ------------------------------------------------------------------

    pub fn lock(&mut self, target: Datastore) -> Result<()> {
        tracing::debug!(datastore = target.as_str(), "lock");
        self.check_datastore(target, false)?;
        let body = format!("<nc:lock><nc:target>{}</nc:target></nc:lock>", datastore_xml(target));
        let mid = self.send(&body, false)?;
        self.receive_ok(mid)
    }

    pub fn unlock(&mut self, target: Datastore) -> Result<()> {
        tracing::debug!(datastore = target.as_str(), "unlock");
        self.check_datastore(target, false)?;
        let body = format!("<nc:unlock><nc:target>{}</nc:target></nc:unlock>", datastore_xml(target));
        let mid = self.send(&body, false)?;
        self.receive_ok(mid)
    }

    /// Lock the parts of the running configuration selected by the
    /// expressions; returns the lock id
    pub fn lock_partial(&mut self, selects: &[&str]) -> Result<u32> {
        tracing::debug!(selects = selects.len(), "partial-lock");
        self.require(self.capabilities.partial_lock, ":partial-lock")?;
        let mut body = format!("<pl:partial-lock xmlns:pl=\"{}\">", NS_PARTIAL_LOCK);
        for select in selects {
            body.push_str(&format!("<pl:select>{}</pl:select>", escape_text(select)));
        }
        body.push_str("</pl:partial-lock>");
        let mid = self.send(&body, false)?;

        let reply = self.receive(mid)?;
        let lock_id = reply
            .tree
            .child(reply.root, "lock-id")
            .and_then(|n| reply.tree.value(n))
            .map(|v| v.to_string());
        lock_id
            .as_deref()
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| {
                NetconfError::Session(format!(
                    "bad lock-id returned from partial-lock: {}",
                    reply.tree.to_xml_compact(reply.root)
                ))
            })
    }

    pub fn unlock_partial(&mut self, lock_id: u32) -> Result<()> {
        tracing::debug!(lock_id, "partial-unlock");
        self.require(self.capabilities.partial_lock, ":partial-lock")?;
        let body = format!(
            "<pl:partial-unlock xmlns:pl=\"{}\"><pl:lock-id>{}</pl:lock-id></pl:partial-unlock>",
            NS_PARTIAL_LOCK, lock_id
        );
        let mid = self.send(&body, false)?;
        self.receive_ok(mid)
    }

    // ------------------------------------------------------------------
    // Candidate and validation
    // ------------------------------------------------------------------

    /// Commit the candidate configuration to running
    pub fn commit(&mut self) -> Result<()> {
        tracing::debug!("commit");
        self.require(self.capabilities.candidate, ":candidate")?;
        let mid = self.send("<nc:commit/>", false)?;
        self.receive_ok(mid)
    }

    /// Commit that is reverted unless confirmed within `timeout` seconds
    pub fn confirmed_commit(&mut self, timeout: u32) -> Result<()> {
        tracing::debug!(timeout, "confirmed commit");
        self.require(self.capabilities.candidate, ":candidate")?;
        self.require(self.capabilities.confirmed_commit, ":confirmed-commit")?;
        let body = format!(
            "<nc:commit><nc:confirmed/><nc:confirm-timeout>{}</nc:confirm-timeout></nc:commit>",
            timeout
        );
        let mid = self.send(&body, false)?;
        self.receive_ok(mid)
    }

    /// Revert the candidate configuration to running
    pub fn discard_changes(&mut self) -> Result<()> {
        tracing::debug!("discard-changes");
        self.require(self.capabilities.candidate, ":candidate")?;
        let mid = self.send("<nc:discard-changes/>", false)?;
        self.receive_ok(mid)
    }

    pub fn validate(&mut self, source: Source<'_>) -> Result<()> {
        tracing::debug!("validate");
        self.require(self.capabilities.validate, ":validate")?;
        let source = self.source_xml(source)?;
        let body = format!("<nc:validate><nc:source>{}</nc:source></nc:validate>", source);
        let mid = self.send(&body, false)?;
        self.receive_ok(mid)
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Subscribe to an event stream, `NETCONF` when none is given
    pub fn create_subscription(
        &mut self,
        stream: Option<&str>,
        filter: Filter<'_>,
        start_time: Option<&str>,
        stop_time: Option<&str>,
    ) -> Result<()> {
        tracing::debug!(stream, "create-subscription");
        self.require(self.capabilities.notification, ":notification")?;
        let mut body = format!("<ncn:create-subscription xmlns:ncn=\"{}\">", NS_NOTIFICATION);
        if let Some(stream) = stream {
            body.push_str(&format!("<ncn:stream>{}</ncn:stream>", escape_text(stream)));
        }
        match filter {
            Filter::All => {}
            Filter::Subtree(tree, nodes) => {
                let subtree = self.encode_nodes(tree, nodes)?;
                body.push_str(&format!(
                    "<ncn:filter ncn:type=\"subtree\">{}</ncn:filter>",
                    subtree
                ));
            }
            Filter::XPath(xpath) => {
                self.require(self.capabilities.xpath, ":xpath")?;
                body.push_str(&format!(
                    "<ncn:filter ncn:type=\"xpath\">{}</ncn:filter>",
                    escape_text(xpath)
                ));
            }
        }
        if let Some(start) = start_time {
            body.push_str(&format!("<ncn:startTime>{}</ncn:startTime>", escape_text(start)));
        }
        if let Some(stop) = stop_time {
            body.push_str(&format!("<ncn:stopTime>{}</ncn:stopTime>", escape_text(stop)));
        }
        body.push_str("</ncn:create-subscription>");
        let mid = self.send(&body, false)?;
        self.receive_ok(mid)
    }

    /// The event streams the server offers
    pub fn get_streams(&mut self) -> Result<Data> {
        let mut filter = Tree::with_defaults(self.defaults.clone());
        let netconf = filter.create_node(NS_NETMOD_NOTIFICATION, "netconf");
        filter.set_default_prefix(netconf);
        let streams = filter.create_node(NS_NETMOD_NOTIFICATION, "streams");
        filter.add_child(netconf, streams)?;
        self.get(Filter::Subtree(&filter, &[netconf]))
    }

    /// Block until the next notification arrives
    pub fn receive_notification(&mut self) -> Result<Document> {
        let message = self.transport.read_one()?;
        let doc = self.parser.parse(&message)?;
        if doc.tree.name(doc.root) == "notification" {
            Ok(doc)
        } else {
            Err(NetconfError::Notification(message))
        }
    }

    // ------------------------------------------------------------------
    // Extensions
    // ------------------------------------------------------------------

    /// Invoke an action; `node` is the action path down to the action
    /// element with its input
    pub fn action(&mut self, tree: &Tree, node: NodeId) -> Result<Data> {
        tracing::debug!(action = %tree.tagpath(node), "action");
        self.require(self.capabilities.actions, ":actions")?;
        self.defaults.register(Prefix::new("nca", NS_ACTIONS));
        let body = format!(
            "<nca:action xmlns:nca=\"{}\"><nca:data>{}</nca:data></nca:action>",
            NS_ACTIONS,
            self.encode_nodes(tree, &[node])?
        );
        let mid = self.send(&body, false)?;
        let reply = self.receive(mid)?;
        if reply.tree.child(reply.root, "ok").is_some() {
            return Ok(Data {
                tree: reply.tree,
                nodes: Vec::new(),
            });
        }
        match reply.tree.child(reply.root, "data") {
            Some(data) => Ok(detach_children(reply, data)),
            None => Err(unexpected_reply(&reply)),
        }
    }

    /// Send any operation element; returns the children of the reply
    pub fn call_rpc(&mut self, tree: &Tree, node: NodeId) -> Result<Data> {
        tracing::debug!(rpc = %tree.name(node), "call rpc");
        let body = self.encode_nodes(tree, &[node])?;
        let mid = self.send(&body, false)?;
        let reply = self.receive(mid)?;
        let root = reply.root;
        Ok(detach_children(reply, root))
    }

    /// Start a transaction towards a datastore
    pub fn start_transaction(&mut self, target: Datastore) -> Result<()> {
        self.check_datastore(target, false)?;
        let inner = format!("<nctr:target>{}</nctr:target>", datastore_xml(target));
        self.transaction("start-transaction", &inner)
    }

    pub fn prepare_transaction(&mut self) -> Result<()> {
        self.transaction("prepare-transaction", "")
    }

    pub fn commit_transaction(&mut self) -> Result<()> {
        self.transaction("commit-transaction", "")
    }

    pub fn abort_transaction(&mut self) -> Result<()> {
        self.transaction("abort-transaction", "")
    }

    fn transaction(&mut self, op: &str, inner: &str) -> Result<()> {
        tracing::debug!(op, "transaction");
        self.require(self.capabilities.transactions, ":transactions")?;
        self.defaults.register(Prefix::new("nctr", NS_TRANSACTIONS));
        let body = if inner.is_empty() {
            format!("<nctr:{} xmlns:nctr=\"{}\"/>", op, NS_TRANSACTIONS)
        } else {
            format!("<nctr:{op} xmlns:nctr=\"{}\">{}</nctr:{op}>", NS_TRANSACTIONS, inner)
        };
        let mid = self.send(&body, false)?;
        self.receive_ok(mid)
    }

    // ------------------------------------------------------------------
    // Session control
    // ------------------------------------------------------------------

    /// Ask the server to end this session, then close the transport
    pub fn close_session(&mut self) -> Result<()> {
        tracing::debug!(session_id = self.session_id, "close-session");
        let mid = self.send("<nc:close-session/>", false)?;
        self.receive_ok(mid)?;
        self.state = SessionState::Closed;
        if let Err(e) = self.transport.close() {
            tracing::warn!(error = %e, "closing transport failed");
        }
        Ok(())
    }

    /// Terminate another session
    pub fn kill_session(&mut self, session_id: u64) -> Result<()> {
        tracing::debug!(session_id, "kill-session");
        if session_id == self.session_id {
            return Err(NetconfError::Session(
                "illegal to use kill-session on own session id".into(),
            ));
        }
        let body = format!(
            "<nc:kill-session><nc:session-id>{}</nc:session-id></nc:kill-session>",
            session_id
        );
        let mid = self.send(&body, false)?;
        self.receive_ok(mid)
    }

    // ------------------------------------------------------------------
    // Preconditions and encoding
    // ------------------------------------------------------------------

    fn require(&self, present: bool, capability: &str) -> Result<()> {
        if present {
            Ok(())
        } else {
            Err(NetconfError::Session(format!(
                "capability {} is not supported by server",
                capability
            )))
        }
    }

    fn check_datastore(&self, ds: Datastore, write: bool) -> Result<()> {
        match ds {
            Datastore::Candidate => self.require(self.capabilities.candidate, ":candidate"),
            Datastore::Startup => self.require(self.capabilities.startup, ":startup"),
            Datastore::Running if write => {
                self.require(self.capabilities.writable_running, ":writable-running")
            }
            Datastore::Running => Ok(()),
        }
    }

    fn url_xml(&self, url: &str) -> Result<String> {
        self.require(self.capabilities.url, ":url")?;
        let supported = self
            .capabilities
            .url_schemes
            .iter()
            .any(|scheme| url.starts_with(&format!("{}:", scheme)));
        if !supported {
            return Err(NetconfError::Session(format!(
                "the url: \"{}\" is not a supported :url scheme",
                url
            )));
        }
        Ok(format!("<nc:url>{}</nc:url>", escape_text(url)))
    }

    fn target_xml(&self, target: Target<'_>) -> Result<String> {
        match target {
            Target::Datastore(ds) => {
                self.check_datastore(ds, true)?;
                Ok(datastore_xml(ds))
            }
            Target::Url(url) => self.url_xml(url),
        }
    }

    fn source_xml(&self, source: Source<'_>) -> Result<String> {
        match source {
            Source::Datastore(ds) => {
                self.check_datastore(ds, false)?;
                Ok(datastore_xml(ds))
            }
            Source::Url(url) => self.url_xml(url),
            Source::Config(tree, nodes) => Ok(format!(
                "<nc:config>{}</nc:config>",
                self.encode_nodes(tree, nodes)?
            )),
        }
    }

    /// Serialize nodes for the peer, applying its revision limits
    fn encode_nodes(&self, tree: &Tree, nodes: &[NodeId]) -> Result<String> {
        let opts = EncodeOptions {
            pretty: false,
            capabilities: Some(&self.capabilities),
        };
        let mut out = String::new();
        for &n in nodes {
            out.push_str(&tree.encode(n, opts)?);
        }
        Ok(out)
    }

    /// Wrap a body in an rpc envelope and send it; returns its message id
    fn send(&mut self, body: &str, with_defaults: bool) -> Result<u64> {
        if self.state != SessionState::Established {
            return Err(NetconfError::Session(format!(
                "session is not established: {:?}",
                self.state
            )));
        }
        let mid = self.message_id;
        let mut rpc = format!("<nc:rpc xmlns:nc=\"{}\" nc:message-id=\"{}\"", NS_NETCONF, mid);
        if let (true, Some(on)) = (with_defaults, self.with_defaults) {
            rpc.push_str(&format!(
                " xmlns:ncwd=\"{}\" ncwd:with-defaults=\"{}\"",
                WITH_DEFAULTS_CAPABILITY, on
            ));
        }
        rpc.push('>');
        rpc.push_str(body);
        rpc.push_str("</nc:rpc>");

        self.message_id += 1;
        tracing::debug!(message_id = mid, "sending rpc");
        self.transport.print(&rpc)?;
        self.transport.flush()?;
        Ok(mid)
    }

    /// Read the reply to a request. Fails on a message-id mismatch and on
    /// rpc-error elements that are not warnings.
    fn receive(&mut self, mid: u64) -> Result<Document> {
        let text = self.transport.read_one()?;
        let reply = self.parser.parse(&text)?;
        let tree = &reply.tree;
        if tree.name(reply.root) != "rpc-reply" {
            return Err(NetconfError::RpcReply {
                errors: Vec::new(),
                reply: text,
            });
        }

        let received = tree.get_attr_value(reply.root, "message-id");
        if received != Some(mid.to_string().as_str()) {
            return Err(NetconfError::MessageIdMismatch {
                sent: mid,
                received: received.unwrap_or("none").to_string(),
            });
        }
        tracing::debug!(message_id = mid, "received rpc-reply");

        let errors: Vec<RpcError> = tree
            .children_named(reply.root, "rpc-error")
            .into_iter()
            .map(|e| RpcError::from_node(tree, e))
            .collect();
        if errors.iter().any(|e| !e.is_warning()) {
            return Err(NetconfError::RpcReply {
                errors,
                reply: text,
            });
        }
        for warning in &errors {
            tracing::warn!(%warning, "rpc-reply warning");
        }
        Ok(reply)
    }

    fn receive_ok(&mut self, mid: u64) -> Result<()> {
        let reply = self.receive(mid)?;
        if reply.tree.child(reply.root, "ok").is_some() {
            Ok(())
        } else {
            Err(unexpected_reply(&reply))
        }
    }

    fn receive_data(&mut self, mid: u64) -> Result<Data> {
        let reply = self.receive(mid)?;
        match reply.tree.child(reply.root, "data") {
            Some(data) => Ok(detach_children(reply, data)),
            None => Err(unexpected_reply(&reply)),
        }
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            self.state = SessionState::Closed;
            if let Err(e) = self.transport.close() {
                tracing::warn!(error = %e, "closing transport failed");
            }
        }
    }
}

fn datastore_xml(ds: Datastore) -> String {
    format!("<nc:{}/>", ds.as_str())
}

fn unexpected_reply(reply: &Document) -> NetconfError {
    NetconfError::RpcReply {
        errors: Vec::new(),
        reply: reply.tree.to_xml_compact(reply.root),
    }
}

/// Take the children of a reply element out of the envelope. Each keeps
/// the prefix bindings that were in scope at the element.
fn detach_children(mut reply: Document, parent: NodeId) -> Data {
    let tree = &mut reply.tree;
    let mut context = PrefixMap::new();
    for n in tree.ancestry(parent).into_iter().rev() {
        context.merge(tree.prefixes(n));
    }
    let nodes: NodeSet = tree.children(parent).to_vec();
    for &n in &nodes {
        tree.detach(n);
        tree.merge_prefix_map(n, &context);
    }
    Data {
        tree: reply.tree,
        nodes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{CANDIDATE_CAPABILITY, WRITABLE_RUNNING_CAPABILITY};
    use crate::transport::StreamTransport;
    use std::io::Cursor;

    type TestSession = Session<StreamTransport<Cursor<Vec<u8>>, Vec<u8>>>;

    fn hello(capabilities: &[&str]) -> String {
        let mut xml = format!("<hello xmlns=\"{}\"><capabilities>", NS_NETCONF);
        for c in capabilities {
            xml.push_str(&format!("<capability>{}</capability>", c));
        }
        xml.push_str("</capabilities><session-id>4</session-id></hello>]]>]]>");
        xml
    }

    fn reply(mid: u64, body: &str) -> String {
        format!(
            "<rpc-reply xmlns=\"{}\" message-id=\"{}\">{}</rpc-reply>]]>]]>",
            NS_NETCONF, mid, body
        )
    }

    fn open(capabilities: &[&str], replies: &[String]) -> TestSession {
        let mut input = hello(capabilities);
        for r in replies {
            input.push_str(r);
        }
        let transport = StreamTransport::new(Cursor::new(input.into_bytes()), Vec::new());
        Session::new(transport).unwrap()
    }

    fn sent(session: &TestSession) -> String {
        String::from_utf8_lossy(session.transport().writer()).into_owned()
    }

    #[test]
    fn test_hello() {
        let session = open(&[NETCONF_BASE_CAPABILITY, CANDIDATE_CAPABILITY], &[]);
        assert_eq!(session.state(), SessionState::Established);
        assert_eq!(session.session_id(), 4);
        assert!(session.capabilities().candidate);
        assert!(sent(&session).starts_with("<hello"));
        assert!(sent(&session).contains(NETCONF_BASE_CAPABILITY));
    }

    #[test]
    fn test_bad_hello() {
        let cases = [
            ("<hello xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\"><session-id>1</session-id></hello>]]>]]>", "no capabilities"),
            ("<hello xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\"><capabilities><capability>urn:ietf:params:netconf:base:1.0</capability></capabilities></hello>]]>]]>", "no session identifier"),
            ("<hello xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\"><capabilities><capability>urn:x</capability></capabilities><session-id>1</session-id></hello>]]>]]>", "base capability"),
        ];
        for (input, expected) in cases {
            let transport = StreamTransport::new(Cursor::new(input.as_bytes().to_vec()), Vec::new());
            let err = Session::new(transport).err().unwrap();
            assert!(matches!(err, NetconfError::Session(_)));
            assert!(err.to_string().contains(expected), "{}", err);
        }
    }

    #[test]
    fn test_get_config_data() {
        let data = r#"<data><hosts xmlns="urn:example:hosts"><host><name>joe</name></host></hosts></data>"#;
        let mut session = open(&[NETCONF_BASE_CAPABILITY], &[reply(1, data)]);
        let result = session.get_config(Datastore::Running, Filter::All).unwrap();

        assert_eq!(result.nodes.len(), 1);
        let hosts = result.nodes[0];
        assert!(result.tree.parent(hosts).is_none());
        assert_eq!(result.tree.ns(hosts), Some("urn:example:hosts"));
        assert_eq!(result.tree.get(hosts, "host[name='joe']").unwrap().len(), 1);

        let out = sent(&session);
        assert!(out.contains("nc:message-id=\"1\""));
        assert!(out.contains("<nc:get-config><nc:source><nc:running/></nc:source></nc:get-config>"));
        assert_eq!(session.next_message_id(), 2);
    }

    #[test]
    fn test_rpc_error_reply() {
        let error = "<rpc-error><error-type>application</error-type><error-tag>lock-denied</error-tag>\
                     <error-severity>error</error-severity><error-info><session-id>7</session-id></error-info></rpc-error>";
        let mut session = open(&[NETCONF_BASE_CAPABILITY], &[reply(1, error)]);
        let err = session.lock(Datastore::Running).unwrap_err();
        let errors = err.rpc_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_tag.as_deref(), Some("lock-denied"));
        assert!(errors[0].error_info.as_deref().unwrap().contains("7"));
    }

    #[test]
    fn test_warning_does_not_fail() {
        let body = "<rpc-error><error-severity>warning</error-severity></rpc-error><ok/>";
        let mut session = open(&[NETCONF_BASE_CAPABILITY], &[reply(1, body)]);
        session.unlock(Datastore::Running).unwrap();
    }

    #[test]
    fn test_capability_checks_send_nothing() {
        let mut session = open(&[NETCONF_BASE_CAPABILITY], &[]);
        let before = sent(&session).len();

        assert!(session.commit().is_err());
        assert!(session.discard_changes().is_err());
        assert!(session.confirmed_commit(10).is_err());
        assert!(session.lock_partial(&["/hosts"]).is_err());
        assert!(session.get(Filter::XPath("/hosts")).is_err());
        assert!(session.edit_config_url(Datastore::Running, "file:///x").is_err());
        assert!(session.lock(Datastore::Candidate).is_err());
        assert!(session.start_transaction(Datastore::Running).is_err());
        assert!(session.set_with_defaults(true).is_err());
        assert!(session.kill_session(4).is_err());
        assert!(session.delete_config(Target::Datastore(Datastore::Running)).is_err());

        let tree = Tree::new();
        assert!(session.edit_config(Datastore::Running, &tree, &[]).is_err());

        assert_eq!(sent(&session).len(), before);
        assert_eq!(session.next_message_id(), 1);
    }

    #[test]
    fn test_edit_config_options() {
        let mut session = open(
            &[NETCONF_BASE_CAPABILITY, WRITABLE_RUNNING_CAPABILITY],
            &[reply(1, "<ok/>")],
        );
        session.set_default_operation(Some(DefaultOperation::None));
        session.set_error_option(Some(ErrorOption::ContinueOnError));

        let mut tree = Tree::new();
        let hosts = tree.create_node("urn:example:hosts", "hosts");
        tree.set_default_prefix(hosts);
        session.edit_config(Datastore::Running, &tree, &[hosts]).unwrap();

        let out = sent(&session);
        assert!(out.contains("<nc:default-operation>none</nc:default-operation>"));
        assert!(out.contains("<nc:error-option>continue-on-error</nc:error-option>"));
        assert!(out.contains("<nc:config><hosts xmlns=\"urn:example:hosts\"/></nc:config>"));

        session.set_test_option(Some(TestOption::TestOnly));
        assert!(session.edit_config(Datastore::Running, &tree, &[hosts]).is_err());
    }

    #[test]
    fn test_partial_lock() {
        let mut session = open(
            &[NETCONF_BASE_CAPABILITY, crate::capabilities::PARTIAL_LOCK_CAPABILITY],
            &[
                reply(1, "<lock-id xmlns=\"urn:ietf:params:xml:ns:netconf:partial-lock:1.0\">17</lock-id>"),
                reply(2, "<ok/>"),
            ],
        );
        assert_eq!(session.lock_partial(&["/hosts/host[name='joe']"]).unwrap(), 17);
        session.unlock_partial(17).unwrap();
        let out = sent(&session);
        assert!(out.contains("<pl:select>/hosts/host[name='joe']</pl:select>"));
        assert!(out.contains("<pl:lock-id>17</pl:lock-id>"));
    }

    #[test]
    fn test_action_registers_prefix() {
        let mut session = open(
            &[NETCONF_BASE_CAPABILITY, NS_ACTIONS],
            &[reply(1, "<data><result xmlns=\"urn:example:sys\">done</result></data>")],
        );
        let mut tree = Tree::new();
        let sys = tree.create_node("urn:example:sys", "sys");
        tree.create_child(sys, "reboot").unwrap();

        let data = session.action(&tree, sys).unwrap();
        assert_eq!(data.tree.value(data.nodes[0]).unwrap().to_string(), "done");
        assert_eq!(session.defaults().prefix_to_ns("nca").as_deref(), Some(NS_ACTIONS));
        assert!(sent(&session).contains("<nca:action xmlns:nca="));
    }

    #[test]
    fn test_with_defaults_attribute() {
        let mut session = open(
            &[NETCONF_BASE_CAPABILITY, WITH_DEFAULTS_CAPABILITY],
            &[reply(1, "<data/>"), reply(2, "<ok/>")],
        );
        session.set_with_defaults(true).unwrap();
        assert!(session.get(Filter::All).unwrap().is_empty());
        session.unlock(Datastore::Running).unwrap();

        let out = sent(&session);
        assert_eq!(out.matches("ncwd:with-defaults=\"true\"").count(), 1);
    }

    #[test]
    fn test_notifications() {
        let notification = format!(
            "<notification xmlns=\"{}\"><eventTime>2020-01-01T00:00:00Z</eventTime></notification>]]>]]>",
            NS_NOTIFICATION
        );
        let mut session = open(
            &[NETCONF_BASE_CAPABILITY, crate::capabilities::NOTIFICATION_CAPABILITY],
            &[reply(1, "<ok/>"), notification, reply(9, "<ok/>")],
        );
        session
            .create_subscription(Some("NETCONF"), Filter::All, None, None)
            .unwrap();
        let event = session.receive_notification().unwrap();
        assert!(event.get("eventTime").unwrap().len() == 1);
        assert!(matches!(
            session.receive_notification(),
            Err(NetconfError::Notification(_))
        ));
        assert!(sent(&session).contains("<ncn:stream>NETCONF</ncn:stream>"));
    }

    #[test]
    fn test_request_bodies() {
        let input = hello(&[
            NETCONF_BASE_CAPABILITY,
            crate::capabilities::NOTIFICATION_CAPABILITY,
            crate::capabilities::XPATH_CAPABILITY,
        ]) + &reply(1, "<ok/>");
        let transport = StreamTransport::new(Cursor::new(input.into_bytes()), Vec::new());
        let config = SessionConfig {
            capabilities: vec!["urn:example:private&x".into()],
            ..Default::default()
        };
        let mut session = Session::connect(transport, &config).unwrap();
        session
            .create_subscription(
                None,
                Filter::XPath("/hosts/host[name='joe']"),
                Some("2020-01-01T00:00:00Z"),
                Some("2020-01-02T00:00:00Z"),
            )
            .unwrap();

        let out = sent(&session);
        assert!(out.contains(&format!("<capability>{}</capability>\n", NETCONF_BASE_CAPABILITY)));
        assert!(out.contains("<capability>urn:example:private&amp;x</capability>\n"));
        assert!(out.contains("<ncn:filter ncn:type=\"xpath\">/hosts/host[name='joe']</ncn:filter>"));
        assert!(out.contains(
            "<ncn:startTime>2020-01-01T00:00:00Z</ncn:startTime><ncn:stopTime>2020-01-02T00:00:00Z</ncn:stopTime>"
        ));
        assert!(!out.contains("<ncn:stream>"));
    }

    #[test]
    fn test_close_session() {
        let mut session = open(&[NETCONF_BASE_CAPABILITY], &[reply(1, "<ok/>")]);
        session.close_session().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.transport().is_closed());
        assert!(matches!(session.commit(), Err(NetconfError::Session(_))));
    }
}
