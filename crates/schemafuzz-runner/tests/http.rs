//! HTTP transport against a tiny in-process responder.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use schemafuzz_core::case::Case;
use schemafuzz_core::outcome::{DEADLINE_CHECK, ErrorKind, Outcome};
use schemafuzz_core::schema::{Operation, Parameter, ParameterLocation, ParameterSchema};
use schemafuzz_runner::{CheckSet, Engine, EngineSettings, HttpTransport, Transport};
use serde_json::json;

/// Raw request head and body as received by the responder.
struct Received {
    head: String,
    body: String,
}

/// Serves `status` after `delay` to every connection. Returns the base URL
/// and a receiver of the requests seen.
fn serve(status: u16, delay: Duration) -> (String, mpsc::Receiver<Received>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let tx = tx.clone();
            thread::spawn(move || respond(stream, status, delay, &tx));
        }
    });
    (base_url, rx)
}

fn respond(stream: TcpStream, status: u16, delay: Duration, tx: &mpsc::Sender<Received>) {
    let mut reader = BufReader::new(stream);
    let mut head = String::new();
    let mut content_length = 0;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
            break;
        }
        if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
            content_length = value.trim().parse().unwrap_or(0);
        }
        head.push_str(&line);
    }
    let mut body = vec![0; content_length];
    let _ = reader.read_exact(&mut body);
    let _ = tx.send(Received {
        head,
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    thread::sleep(delay);
    let mut stream = reader.into_inner();
    let _ = write!(
        stream,
        "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{{}}"
    );
}

fn slow_operation(base_url: &str) -> Operation {
    Operation::new("GET", "/slow", base_url)
}

#[test]
fn slow_response_is_a_deadline_failure_not_a_timeout() {
    let (base_url, _requests) = serve(200, Duration::from_millis(600));
    let transport = HttpTransport::new(Duration::from_millis(5000)).unwrap();
    let checks = CheckSet::standard().with_deadline(Some(Duration::from_millis(500)));
    let settings = EngineSettings::default();
    let operation = slow_operation(&base_url);
    let engine = Engine::new(&operation, &transport, &checks, &settings);

    let case = Case::new("GET", "/slow", &base_url);
    let Outcome::CheckFailed { failure, response, .. } = engine.replay(&case) else {
        panic!("expected a deadline failure");
    };
    assert_eq!(failure.check, DEADLINE_CHECK);
    let deadline = failure.deadline.unwrap();
    assert_eq!(deadline.deadline_ms, 500);
    assert!(deadline.latency_ms >= 600, "{}", deadline.latency_ms);
    assert_eq!(response.status_code, 200);
}

#[test]
fn hard_timeout_is_a_transport_error() {
    let (base_url, _requests) = serve(200, Duration::from_millis(600));
    let transport = HttpTransport::new(Duration::from_millis(200)).unwrap();
    let checks = CheckSet::standard().with_deadline(Some(Duration::from_millis(100)));
    let settings = EngineSettings::default();
    let operation = slow_operation(&base_url);
    let engine = Engine::new(&operation, &transport, &checks, &settings);

    let outcome = engine.replay(&Case::new("GET", "/slow", &base_url));
    let Outcome::Errored { cause, .. } = outcome else {
        panic!("expected a timeout, got {outcome:?}");
    };
    assert_eq!(cause.kind, ErrorKind::Timeout);
    assert_eq!(cause.message, "Request timed out after 200ms");
}

#[test]
fn server_error_is_a_check_failure() {
    let (base_url, _requests) = serve(503, Duration::ZERO);
    let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
    let response = transport
        .execute(&Case::new("GET", "/", &base_url))
        .unwrap();
    assert_eq!(response.status_code, 503);
    assert_eq!(response.content_type(), Some("application/json"));
    assert_eq!(response.body.as_deref(), Some("{}"));
    let evaluation = CheckSet::standard().evaluate(&Case::new("GET", "/", &base_url), &response);
    assert_eq!(
        evaluation.failure.unwrap().message,
        "Received a response with 5xx status code: 503"
    );
}

#[test]
fn request_carries_path_query_headers_and_json_body() {
    let (base_url, requests) = serve(200, Duration::ZERO);
    let transport = HttpTransport::new(Duration::from_secs(5))
        .unwrap()
        .with_basic_auth("user", "pass");

    let mut case = Case::new("POST", "/users/{id}", &base_url);
    case.path_parameters.insert("id".into(), json!("a b"));
    case.query.insert("tag".into(), json!(["x", "y"]));
    case.headers.insert("X-Trace".into(), json!(7));
    case.headers.insert("X-Broken".into(), json!("line\r\nbreak"));
    case.body = Some(json!({"name": "rex"}));
    transport.execute(&case).unwrap();

    let received = requests.recv_timeout(Duration::from_secs(5)).unwrap();
    let request_line = received.head.lines().next().unwrap().to_string();
    assert_eq!(request_line, "POST /users/a%20b?tag=x&tag=y HTTP/1.1");
    let head = received.head.to_ascii_lowercase();
    assert!(head.contains("x-trace: 7"));
    assert!(!head.contains("x-broken"));
    assert!(head.contains("content-type: application/json"));
    // base64("user:pass")
    assert!(head.contains("authorization: basic dxnlcjpwyxnz"));
    assert_eq!(received.body, r#"{"name":"rex"}"#);
}

#[test]
fn closed_port_is_a_connection_error() {
    let base_url = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        format!("http://{}", listener.local_addr().unwrap())
    };
    let operation = Operation::new("GET", "/", &base_url).with_parameter(Parameter::new(
        "q",
        ParameterLocation::Query,
        true,
        ParameterSchema::integer_range(0, 3),
    ));
    let transport = HttpTransport::new(Duration::from_secs(2)).unwrap();
    let checks = CheckSet::standard();
    let settings = EngineSettings {
        max_examples: 5,
        ..EngineSettings::default()
    };
    let engine = Engine::new(&operation, &transport, &checks, &settings);
    let run = engine.run(0, &schemafuzz_runner::CancelToken::new(), &mut |_, _| {});
    let Outcome::Errored { cause, case: Some(case) } = run.terminal else {
        panic!("expected a connection error, got {:?}", run.terminal);
    };
    assert_eq!(cause.kind, ErrorKind::Connection);
    // Minimized to the simplest query value
    assert_eq!(case.query.get("q"), Some(&json!(0)));
}
