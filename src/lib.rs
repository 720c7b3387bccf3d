//! rust-netconf - NETCONF client with configuration trees, path queries and
//! diff/sync
//!
//! The library models configuration data as an arena [`Tree`], selects and
//! creates nodes with a small XPath subset, talks to a NETCONF server over
//! any [`Transport`] with `]]>]]>` framing, and computes the edit needed to
//! bring one configuration in line with another.
//!
//! # Example
//!
//! ```no_run
//! use rust_netconf::{Datastore, Filter, Session, TcpTransport};
//! use rust_netconf::sync;
//!
//! let transport = TcpTransport::connect("192.0.2.1:2023", None).unwrap();
//! let mut session = Session::new(transport).unwrap();
//!
//! // Read the running configuration
//! let running = session.get_config(Datastore::Running, Filter::All).unwrap();
//! let hosts = running.tree.get(running.nodes[0], "host[name='joe']").unwrap();
//! println!("{} entries", hosts.len());
//!
//! // Push a wanted configuration as one edit
//! let wanted = rust_netconf::XmlParser::new().read_file("hosts.xml").unwrap();
//! if let Some(edit) = sync::sync(&running.tree, running.nodes[0], &wanted.tree, wanted.root).unwrap() {
//!     session.edit_config(Datastore::Running, &edit.tree, &[edit.root]).unwrap();
//! }
//! session.close_session().unwrap();
//! ```

pub mod capabilities;
pub mod config;
mod error;
pub mod framing;
pub mod path;
pub mod prefix;
pub mod rpc_error;
pub mod schema;
pub mod session;
pub mod sync;
pub mod transport;
pub mod tree;
mod value;
pub mod xml;

pub use capabilities::Capabilities;
pub use config::{SessionConfig, TraceMode};
pub use error::{NetconfError, Result};
pub use framing::{IoSubscriber, TracingSubscriber};
pub use path::CreateMode;
pub use prefix::{Prefix, PrefixMap, PrefixRegistry};
pub use rpc_error::RpcError;
pub use schema::{ContainerSchema, NodeKind, SchemaRegistry};
pub use session::{
    Data, Datastore, DefaultOperation, ErrorOption, Filter, Session, SessionState, Source, Target,
    TestOption,
};
pub use transport::{StreamTransport, TcpTransport, Transport};
pub use tree::{Document, NodeId, NodeSet, Operation, Tree};
pub use value::Value;
pub use xml::{EncodeOptions, XmlParser};
