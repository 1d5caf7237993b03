//! End-to-end receiver tests: real server, real HTTP client.

use std::io::Write;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use rsyslog_core::{CollectingSubmitter, StatsRegistry};
use rsyslog_imhttp::{HttpInput, ListenerConfig, ServerConfig};

struct TestServer {
    input: HttpInput,
    sink: Arc<CollectingSubmitter>,
    registry: Arc<StatsRegistry>,
    url: String,
}

fn start_server(listeners: Vec<ListenerConfig>) -> TestServer {
    let sink = Arc::new(CollectingSubmitter::new());
    let registry = Arc::new(StatsRegistry::new());
    let cfg = ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        worker_threads: 2,
    };
    let mut input = HttpInput::build(&cfg, sink.clone(), &registry).unwrap();
    for listener in listeners {
        input.add_listener(listener).unwrap();
    }
    input.start().unwrap();
    let addr = input.local_addr().unwrap();
    TestServer {
        input,
        sink,
        registry,
        url: format!("http://{addr}"),
    }
}

fn counter(registry: &StatsRegistry, name: &str) -> u64 {
    registry
        .snapshot()
        .iter()
        .find(|s| s.name == "imhttp")
        .and_then(|s| {
            s.counters
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| *v)
        })
        .unwrap_or(0)
}

fn client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::new()
}

fn bodies(sink: &CollectingSubmitter) -> Vec<String> {
    sink.messages()
        .iter()
        .map(|m| m.body_str().into_owned())
        .collect()
}

#[test]
fn lf_framed_body_splits_into_messages() {
    let mut server = start_server(vec![ListenerConfig::new("/postrequest")]);

    let response = client()
        .post(format!("{}/postrequest", server.url))
        .body("line1\nline2\n")
        .send()
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    assert_eq!(bodies(&server.sink), vec!["line1", "line2"]);
    assert_eq!(counter(&server.registry, "submitted"), 2);
    server.input.stop();
}

#[test]
fn octet_counted_body_splits_on_frame_boundaries() {
    let mut listener = ListenerConfig::new("/octet");
    listener.support_octet_framing = true;
    let mut server = start_server(vec![listener]);

    let response = client()
        .post(format!("{}/octet", server.url))
        .body("5 hello10 0123456789")
        .send()
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    assert_eq!(bodies(&server.sink), vec!["hello", "0123456789"]);
    server.input.stop();
}

#[test]
fn gzip_body_is_inflated() {
    let mut server = start_server(vec![ListenerConfig::new("/gz")]);

    let mut encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(b"line1\nline2\n").unwrap();
    let compressed = encoder.finish().unwrap();

    let response = client()
        .post(format!("{}/gz", server.url))
        .header("Content-Encoding", "gzip")
        .body(compressed)
        .send()
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    assert_eq!(bodies(&server.sink), vec!["line1", "line2"]);
    server.input.stop();
}

#[test]
fn block_granular_listener_submits_whole_body() {
    let mut listener = ListenerConfig::new("/block");
    listener.disable_lf_delim = true;
    let mut server = start_server(vec![listener]);

    client()
        .post(format!("{}/block", server.url))
        .body("one\ntwo\nthree")
        .send()
        .unwrap();

    assert_eq!(bodies(&server.sink), vec!["one\ntwo\nthree"]);
    server.input.stop();
}

#[test]
fn non_post_methods_are_rejected() {
    let mut server = start_server(vec![ListenerConfig::new("/postrequest")]);

    let response = client()
        .get(format!("{}/postrequest", server.url))
        .send()
        .unwrap();
    assert_eq!(response.status().as_u16(), 405);
    assert!(server.sink.is_empty());
    assert_eq!(counter(&server.registry, "failed"), 1);
    server.input.stop();
}

#[test]
fn unknown_endpoint_is_not_found() {
    let mut server = start_server(vec![ListenerConfig::new("/postrequest")]);
    let response = client()
        .post(format!("{}/other", server.url))
        .body("x\n")
        .send()
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    assert!(server.sink.is_empty());
    server.input.stop();
}

#[test]
fn basic_auth_guards_the_endpoint() {
    let mut auth_file = tempfile::NamedTempFile::new().unwrap();
    let digest = openssl_sha1(b"secret");
    writeln!(auth_file, "alice:{{SHA}}{}", BASE64.encode(digest)).unwrap();
    auth_file.flush().unwrap();

    let mut listener = ListenerConfig::new("/secure");
    listener.basic_auth_file = Some(auth_file.path().to_path_buf());
    let mut server = start_server(vec![listener]);

    // no credentials
    let response = client()
        .post(format!("{}/secure", server.url))
        .body("x\n")
        .send()
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
    assert_eq!(
        response
            .headers()
            .get("WWW-Authenticate")
            .and_then(|v| v.to_str().ok()),
        Some("Basic realm=\"User Visible Realm\"")
    );

    // wrong password
    let response = client()
        .post(format!("{}/secure", server.url))
        .basic_auth("alice", Some("nope"))
        .body("x\n")
        .send()
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
    assert!(server.sink.is_empty());

    // correct credentials
    let response = client()
        .post(format!("{}/secure", server.url))
        .basic_auth("alice", Some("secret"))
        .body("authorized\n")
        .send()
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(bodies(&server.sink), vec!["authorized"]);
    server.input.stop();
}

#[test]
fn metadata_is_attached_when_enabled() {
    let mut listener = ListenerConfig::new("/meta");
    listener.add_metadata = true;
    let mut server = start_server(vec![listener]);

    client()
        .post(format!("{}/meta?source=edge&batch=7", server.url))
        .header("X-Tenant", "acme")
        .body("with metadata\n")
        .send()
        .unwrap();

    let messages = server.sink.messages();
    assert_eq!(messages.len(), 1);
    let msg = &messages[0];

    let headers = msg.property("!metadata!httpheaders").unwrap();
    assert_eq!(headers["x-tenant"], "acme");

    let params = msg.property("!metadata!queryparams").unwrap();
    assert_eq!(params["source"], "edge");
    assert_eq!(params["batch"], "7");
    server.input.stop();
}

#[test]
fn listener_properties_are_stamped_onto_messages() {
    let mut listener = ListenerConfig::new("/tagged");
    listener.input_name = Some("edge-http".to_string());
    listener.ruleset = Some("remote".to_string());
    listener.flow_control = false;
    let mut server = start_server(vec![listener]);

    client()
        .post(format!("{}/tagged", server.url))
        .body("tagged\n")
        .send()
        .unwrap();

    let messages = server.sink.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].input_name.as_deref(), Some("edge-http"));
    assert_eq!(messages[0].ruleset.as_deref(), Some("remote"));
    assert_eq!(messages[0].flow_control, rsyslog_core::FlowControl::NoDelay);
    assert!(messages[0].remote_addr.is_some());
    server.input.stop();
}

#[test]
fn rate_limit_discards_excess_messages() {
    let mut listener = ListenerConfig::new("/limited");
    listener.ratelimit_interval = 60;
    listener.ratelimit_burst = 2;
    let mut server = start_server(vec![listener]);

    client()
        .post(format!("{}/limited", server.url))
        .body("a\nb\nc\nd\n")
        .send()
        .unwrap();

    assert_eq!(bodies(&server.sink), vec!["a", "b"]);
    assert_eq!(counter(&server.registry, "submitted"), 2);
    assert_eq!(counter(&server.registry, "discarded"), 2);
    server.input.stop();
}

#[test]
fn two_listeners_route_independently() {
    let mut octet = ListenerConfig::new("/octet");
    octet.support_octet_framing = true;
    let plain = ListenerConfig::new("/plain");
    let mut server = start_server(vec![octet, plain]);

    client()
        .post(format!("{}/octet", server.url))
        .body("3 abc")
        .send()
        .unwrap();
    client()
        .post(format!("{}/plain", server.url))
        .body("def\n")
        .send()
        .unwrap();

    let mut received = bodies(&server.sink);
    received.sort();
    assert_eq!(received, vec!["abc", "def"]);
    server.input.stop();
}

fn openssl_sha1(data: &[u8]) -> [u8; 20] {
    openssl::sha::sha1(data)
}
