//! Structured `rpc-error` records from server replies

use serde::{Deserialize, Serialize};

use crate::tree::{NodeId, Tree};

/// One `rpc-error` element of a reply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub error_type: Option<String>,
    pub error_tag: Option<String>,
    pub error_severity: Option<String>,
    pub error_app_tag: Option<String>,
    pub error_path: Option<String>,
    pub error_message: Option<String>,
    /// Children of `error-info`, serialized as XML
    pub error_info: Option<String>,
}

impl RpcError {
    /// Read the fields from an `rpc-error` node
    pub fn from_node(tree: &Tree, id: NodeId) -> Self {
        let text = |name: &str| {
            tree.get_value_of_child(id, name)
                .map(|v| v.to_string().trim().to_string())
        };
        let error_info = tree.child(id, "error-info").map(|info| {
            tree.children(info)
                .iter()
                .map(|&c| tree.to_xml_compact(c))
                .collect::<String>()
        });

        Self {
            error_type: text("error-type"),
            error_tag: text("error-tag"),
            error_severity: text("error-severity"),
            error_app_tag: text("error-app-tag"),
            error_path: text("error-path"),
            error_message: text("error-message"),
            error_info,
        }
    }

    /// Severity `warning` errors do not fail an operation on their own
    pub fn is_warning(&self) -> bool {
        self.error_severity.as_deref() == Some("warning")
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}",
            self.error_tag.as_deref().unwrap_or("unknown"),
            self.error_message.as_deref().unwrap_or("")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::XmlParser;

    #[test]
    fn test_from_node() {
        let xml = r#"<rpc-error xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
              <error-type>application</error-type>
              <error-tag>data-exists</error-tag>
              <error-severity>error</error-severity>
              <error-message xml:lang="en">already there</error-message>
              <error-info><bad-element>host</bad-element></error-info>
            </rpc-error>"#;
        let doc = XmlParser::new().parse(xml).unwrap();
        let err = RpcError::from_node(&doc.tree, doc.root);

        assert_eq!(err.error_tag.as_deref(), Some("data-exists"));
        assert_eq!(err.error_message.as_deref(), Some("already there"));
        assert_eq!(err.error_app_tag, None);
        assert!(!err.is_warning());
        assert!(err.error_info.unwrap().contains("<bad-element"));

        let json: serde_json::Value = serde_json::from_str(&RpcError::default().to_json().unwrap()).unwrap();
        assert!(json.get("error_tag").is_some());
    }
}
