//! Integration tests over a scripted in-memory transport
//!
//! The transport answers each flushed request with the next canned reply,
//! so whole sessions run without a server.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use rstest::rstest;
use rust_netconf::capabilities::{
    CANDIDATE_CAPABILITY, NETCONF_BASE_CAPABILITY, URL_CAPABILITY_SCHEME,
    WRITABLE_RUNNING_CAPABILITY,
};
use rust_netconf::framing::FrameReader;
use rust_netconf::sync::{self, Compare};
use rust_netconf::{
    ContainerSchema, CreateMode, Datastore, Document, IoSubscriber, NetconfError, Operation,
    SchemaRegistry, Session, SessionConfig, Source, Target, Transport, Tree, XmlParser,
};

const NS_NC: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
const NS_HOSTS: &str = "urn:example:hosts";

const HOSTS: &str = r#"<hosts xmlns="urn:example:hosts">
  <host><name>joe</name><ip>10.0.0.1</ip></host>
  <host><name>anne</name><ip>10.0.0.2</ip></host>
</hosts>"#;

const HOSTS_WANTED: &str = r#"<hosts xmlns="urn:example:hosts">
  <host><name>joe</name><ip>10.0.0.1</ip></host>
  <host><name>eve</name><ip>10.0.0.5</ip></host>
</hosts>"#;

/// Transport whose peer is a queue of canned messages
#[derive(Default)]
struct ScriptedTransport {
    replies: VecDeque<String>,
    pending: String,
    sent: Arc<Mutex<Vec<String>>>,
    closed: bool,
}

impl ScriptedTransport {
    fn new(replies: Vec<String>) -> (Self, Arc<Mutex<Vec<String>>>) {
        let t = Self {
            replies: replies.into(),
            ..Default::default()
        };
        let sent = t.sent.clone();
        (t, sent)
    }
}

impl Transport for ScriptedTransport {
    fn print(&mut self, text: &str) -> rust_netconf::Result<()> {
        self.pending.push_str(text);
        Ok(())
    }

    fn flush(&mut self) -> rust_netconf::Result<()> {
        let message = std::mem::take(&mut self.pending);
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn read_one(&mut self) -> rust_netconf::Result<String> {
        self.replies
            .pop_front()
            .ok_or_else(|| NetconfError::Session("end of stream".into()))
    }

    fn ready(&mut self) -> rust_netconf::Result<bool> {
        Ok(!self.replies.is_empty())
    }

    fn close(&mut self) -> rust_netconf::Result<()> {
        self.closed = true;
        Ok(())
    }

    fn add_subscriber(&mut self, _subscriber: Box<dyn IoSubscriber>) {}
}

fn hello(capabilities: &[&str]) -> String {
    let caps: String = capabilities
        .iter()
        .map(|c| format!("<capability>{}</capability>", c))
        .collect();
    format!(
        "<hello xmlns=\"{}\"><capabilities>{}</capabilities><session-id>12</session-id></hello>",
        NS_NC, caps
    )
}

fn ok_reply(mid: u64) -> String {
    format!("<rpc-reply xmlns=\"{}\" message-id=\"{}\"><ok/></rpc-reply>", NS_NC, mid)
}

fn data_reply(mid: u64, data: &str) -> String {
    format!(
        "<rpc-reply xmlns=\"{}\" message-id=\"{}\"><data>{}</data></rpc-reply>",
        NS_NC, mid, data
    )
}

fn parser() -> XmlParser {
    let mut schema = SchemaRegistry::new();
    schema.register_container(NS_HOSTS, "hosts", ContainerSchema::new(&[], &["host"]));
    schema.register_container(NS_HOSTS, "host", ContainerSchema::new(&["name"], &["name", "ip"]));
    XmlParser::new().with_schema(Arc::new(schema))
}

fn parse(xml: &str) -> Document {
    parser().parse(xml).unwrap()
}

#[test]
fn test_hosts_delete_edit_config() {
    let doc = parse(HOSTS);
    let anne = doc.get("host[name='anne']").unwrap()[0];

    let mut edit = Tree::new();
    let root = doc.tree.merge_into(anne, &mut edit, None, Operation::Delete).unwrap();

    let (transport, sent) = ScriptedTransport::new(vec![
        hello(&[NETCONF_BASE_CAPABILITY, WRITABLE_RUNNING_CAPABILITY]),
        ok_reply(1),
    ]);
    let mut session = Session::new(transport).unwrap();
    session.edit_config(Datastore::Running, &edit, &[root]).unwrap();

    let sent = sent.lock().unwrap();
    let rpc = &sent[1];
    assert!(rpc.contains("nc:message-id=\"1\""));
    assert!(rpc.contains("<nc:target><nc:running/></nc:target>"));
    assert!(rpc.contains("operation=\"delete\""));
    assert!(rpc.contains("<name>anne</name>"));
    assert!(!rpc.contains("10.0.0.2"));
    assert!(!rpc.contains("joe"));
}

#[test]
fn test_message_id_mismatch() {
    let (transport, _) = ScriptedTransport::new(vec![
        hello(&[NETCONF_BASE_CAPABILITY]),
        data_reply(2, "<hosts xmlns=\"urn:example:hosts\"/>"),
    ]);
    let mut session = Session::new(transport).unwrap();
    match session.get_config(Datastore::Running, rust_netconf::Filter::All) {
        Err(NetconfError::MessageIdMismatch { sent, received }) => {
            assert_eq!(sent, 1);
            assert_eq!(received, "2");
        }
        other => panic!("expected a message-id mismatch, got {:?}", other.map(|d| d.nodes)),
    }
}

#[test]
fn test_commit_without_candidate_sends_nothing() {
    let (transport, sent) = ScriptedTransport::new(vec![hello(&[NETCONF_BASE_CAPABILITY])]);
    let mut session = Session::new(transport).unwrap();
    let err = session.commit().unwrap_err();
    assert!(matches!(err, NetconfError::Session(_)));
    assert!(err.to_string().contains(":candidate"));
    // only the hello went out
    assert_eq!(sent.lock().unwrap().len(), 1);
}

#[test]
fn test_candidate_workflow() {
    let (transport, sent) = ScriptedTransport::new(vec![
        hello(&[NETCONF_BASE_CAPABILITY, CANDIDATE_CAPABILITY]),
        ok_reply(1),
        ok_reply(2),
        ok_reply(3),
        ok_reply(4),
    ]);
    let mut session = Session::new(transport).unwrap();
    let wanted = parse(HOSTS_WANTED);

    session.lock(Datastore::Candidate).unwrap();
    session
        .edit_config(Datastore::Candidate, &wanted.tree, &[wanted.root])
        .unwrap();
    session.commit().unwrap();
    session.unlock(Datastore::Candidate).unwrap();

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 5);
    assert!(sent[2].contains("<nc:target><nc:candidate/></nc:target>"));
    assert!(sent[2].contains("<name>eve</name>"));
    assert!(sent[3].contains("<nc:commit/>"));
}

#[test]
fn test_url_scheme_checked() {
    let url_caps = format!("{}file,ftp", URL_CAPABILITY_SCHEME);
    let (transport, sent) = ScriptedTransport::new(vec![
        hello(&[NETCONF_BASE_CAPABILITY, &url_caps]),
        ok_reply(1),
    ]);
    let mut session = Session::new(transport).unwrap();

    let err = session
        .copy_config(Source::Datastore(Datastore::Running), Target::Url("http://x/cfg"))
        .unwrap_err();
    assert!(err.to_string().contains("is not a supported :url scheme"));

    session
        .copy_config(Source::Datastore(Datastore::Running), Target::Url("file:///tmp/cfg.xml"))
        .unwrap();
    assert!(sent.lock().unwrap()[1].contains("<nc:url>file:///tmp/cfg.xml</nc:url>"));
}

#[test]
fn test_connect_with_config() {
    let config = SessionConfig::from_json_str(
        r#"{"capabilities": ["urn:example:private"], "default_operation": "replace"}"#,
    )
    .unwrap();
    let (transport, sent) = ScriptedTransport::new(vec![
        hello(&[NETCONF_BASE_CAPABILITY, WRITABLE_RUNNING_CAPABILITY]),
        ok_reply(1),
    ]);
    let mut session = Session::connect(transport, &config).unwrap();
    assert_eq!(session.session_id(), 12);

    let wanted = parse(HOSTS_WANTED);
    session
        .edit_config(Datastore::Running, &wanted.tree, &[wanted.root])
        .unwrap();

    let sent = sent.lock().unwrap();
    assert!(sent[0].contains("<capability>urn:example:private</capability>"));
    assert!(sent[1].contains("<nc:default-operation>replace</nc:default-operation>"));
}

#[test]
fn test_sync_pushes_wanted_config() {
    let running = parse(HOSTS);
    let wanted = parse(HOSTS_WANTED);
    assert!(!sync::check_sync(&running.tree, running.root, &wanted.tree, wanted.root));

    let edit = sync::sync(&running.tree, running.root, &wanted.tree, wanted.root)
        .unwrap()
        .unwrap();

    let (transport, sent) = ScriptedTransport::new(vec![
        hello(&[NETCONF_BASE_CAPABILITY, WRITABLE_RUNNING_CAPABILITY]),
        ok_reply(1),
    ]);
    let mut session = Session::new(transport).unwrap();
    session
        .edit_config(Datastore::Running, &edit.tree, &[edit.root])
        .unwrap();
    let sent = sent.lock().unwrap();
    assert!(sent[1].contains("operation=\"delete\""));
    assert!(sent[1].contains("operation=\"create\""));

    // the same edit applied locally brings running in line
    let mut applied = running.clone();
    sync::apply_edit(&mut applied.tree, applied.root, &edit.tree, edit.root).unwrap();
    assert!(sync::check_sync(&applied.tree, applied.root, &wanted.tree, wanted.root));
}

#[test]
fn test_check_sync_with_clone() {
    let mut doc = parse(HOSTS);
    let copy = doc.tree.clone_node(doc.root);
    assert!(sync::check_sync(&doc.tree, doc.root, &doc.tree, copy));
    assert_eq!(
        sync::compare(&doc.tree, doc.root, &doc.tree, copy),
        Compare::Equal
    );
}

#[test]
fn test_framing_false_start_and_split_marker() {
    let mut reader = FrameReader::new(std::io::Cursor::new("]]>]XYZ]]>]]><ok/>]]>]]>"));
    assert_eq!(reader.read_frame().unwrap(), "]]>]XYZ");
    assert_eq!(reader.read_frame().unwrap(), "<ok/>");
}

#[test]
fn test_get_and_create_path() {
    let mut doc = parse(HOSTS);
    let found = doc.get("host[name='joe']/ip").unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(doc.tree.value(found[0]).unwrap().to_string(), "10.0.0.1");

    let created = doc
        .tree
        .create_path(doc.root, CreateMode::New, None, "host/name")
        .unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(doc.get("host").unwrap().len(), 3);

    let root = doc.root;
    doc.tree
        .create_path(root, CreateMode::Merge, None, "host[name='joe']/alias")
        .unwrap();
    doc.tree
        .create_path(root, CreateMode::Merge, None, "host[name='joe']/alias")
        .unwrap();
    assert_eq!(doc.get("host[name='joe']").unwrap().len(), 1);
    assert_eq!(doc.get("host[name='joe']/alias").unwrap().len(), 1);
}

#[rstest]
#[case("1 = true()", true)]
#[case("'0' = 0", true)]
#[case("'abc' = 'abc'", true)]
#[case("'abc' = 'abd'", false)]
fn test_predicate_coercion(#[case] predicate: &str, #[case] expected: bool) {
    let doc = parse(HOSTS);
    let found = doc.get(&format!(".[{}]", predicate)).unwrap();
    assert_eq!(!found.is_empty(), expected);
}

#[test]
fn test_rpc_error_surfaces_records() {
    let error = format!(
        "<rpc-reply xmlns=\"{}\" message-id=\"1\"><rpc-error>\
         <error-type>protocol</error-type><error-tag>in-use</error-tag>\
         <error-severity>error</error-severity><error-message>locked</error-message>\
         </rpc-error></rpc-reply>",
        NS_NC
    );
    let (transport, _) = ScriptedTransport::new(vec![hello(&[NETCONF_BASE_CAPABILITY]), error]);
    let mut session = Session::new(transport).unwrap();
    let err = session.lock(Datastore::Running).unwrap_err();
    let records = err.rpc_errors();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].error_type.as_deref(), Some("protocol"));
    assert_eq!(records[0].error_message.as_deref(), Some("locked"));
}
