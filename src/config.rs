//! Session configuration
//!
//! Loaded from JSON:
//!
//! ```json
//! {
//!   "read_timeout_ms": 30000,
//!   "capabilities": ["http://example.com/ns/private/1.0"],
//!   "default_operation": "merge",
//!   "error_option": "rollback-on-error",
//!   "trace": "parsed"
//! }
//! ```
//!
//! Every field is optional.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;
use crate::session::{DefaultOperation, ErrorOption, TestOption};

/// How session traffic is traced through `tracing`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceMode {
    #[default]
    Off,
    /// One event per line
    Raw,
    /// One event per message, pretty printed
    Parsed,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Read timeout in milliseconds; none blocks forever
    pub read_timeout_ms: Option<u64>,
    /// Proprietary capabilities advertised in the client hello
    pub capabilities: Vec<String>,
    pub default_operation: Option<DefaultOperation>,
    pub test_option: Option<TestOption>,
    pub error_option: Option<ErrorOption>,
    /// Report default values in retrieved data
    pub with_defaults: bool,
    pub trace: TraceMode,
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}
