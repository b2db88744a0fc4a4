//! HTTP client integration tests
//!
//! Run with: cargo test -p integration-tests --test http_tests

use std::cell::RefCell;
use std::net::TcpListener;
use std::rc::Rc;
use std::time::Duration;

use cord_io::http::{HttpClient, HttpError, HttpRequest, HttpResponse, HttpResult, Method};
use cord_io::Uri;
use integration_tests::{
    drive_for, drive_until, init_logging, test_reactor, MockHttpServer, MockResponse,
};
use serde_json::{json, Value};

type Results = Rc<RefCell<Vec<HttpResult<HttpResponse>>>>;

fn collector() -> Results {
    Rc::new(RefCell::new(Vec::new()))
}

fn push_to(results: &Results) -> impl FnOnce(&mut cord_io::Reactor, HttpResult<HttpResponse>) + 'static {
    let results = Rc::clone(results);
    move |_, result| results.borrow_mut().push(result)
}

// ============================================================================
// Connection reuse
// ============================================================================

#[test]
fn test_keep_alive_reuses_connection() {
    init_logging();
    let server = MockHttpServer::start(|_, index| MockResponse::json(200, &json!({ "n": index })))
        .expect("server");
    let mut reactor = test_reactor();
    let client = HttpClient::new();
    let results = collector();

    let first = HttpRequest::get(&server.url("/first")).unwrap();
    let second = HttpRequest::get(&server.url("/second")).unwrap();
    client.request(&mut reactor, first, push_to(&results)).unwrap();
    client.request(&mut reactor, second, push_to(&results)).unwrap();
    assert_eq!(client.cached_routes(), 1);

    assert!(drive_until(&mut reactor, Duration::from_secs(5), || results.borrow().len() == 2));

    let bodies: Vec<Value> = results
        .borrow()
        .iter()
        .map(|result| result.as_ref().unwrap().json().unwrap())
        .collect();
    assert_eq!(bodies, vec![json!({"n": 0}), json!({"n": 1})]);
    assert_eq!(server.connections(), 1);

    let targets: Vec<String> = server.requests().into_iter().map(|r| r.target).collect();
    assert_eq!(targets, vec!["/first", "/second"]);

    // a later request still rides the cached connection
    let third = HttpRequest::get(&server.url("/third")).unwrap();
    client.request(&mut reactor, third, push_to(&results)).unwrap();
    assert!(drive_until(&mut reactor, Duration::from_secs(5), || results.borrow().len() == 3));
    assert_eq!(server.connections(), 1);
}

#[test]
fn test_post_body_and_headers_arrive() {
    init_logging();
    let server = MockHttpServer::start(|_, _| MockResponse::new(204, "")).expect("server");
    let mut reactor = test_reactor();
    let client = HttpClient::new();
    let results = collector();

    let uri = Uri::parse(&server.url("/channels/1/messages")).unwrap();
    let request = HttpRequest::new(Method::Post, uri)
        .with_header("Content-Type", "application/json")
        .with_body(br#"{"content":"hi"}"#.to_vec());
    client.request(&mut reactor, request, push_to(&results)).unwrap();

    assert!(drive_until(&mut reactor, Duration::from_secs(5), || !results.borrow().is_empty()));
    let response = results.borrow_mut().remove(0).unwrap();
    assert_eq!(response.status, 204);
    assert!(response.body.is_empty());

    let recorded = &server.requests()[0];
    assert_eq!(recorded.method, "POST");
    assert_eq!(recorded.body, br#"{"content":"hi"}"#.to_vec());
    assert_eq!(recorded.header("Content-Length"), Some("16"));
    assert_eq!(
        recorded.header("Host"),
        Some(server.addr().to_string().as_str())
    );
}

#[test]
fn test_connection_close_drops_route() {
    init_logging();
    let server = MockHttpServer::start(|_, _| MockResponse::new(200, "bye").closing()).expect("server");
    let mut reactor = test_reactor();
    let client = HttpClient::new();
    let results = collector();
    let uri = Uri::parse(&server.url("/")).unwrap();

    client
        .request(&mut reactor, HttpRequest::new(Method::Get, uri.clone()), push_to(&results))
        .unwrap();
    assert!(drive_until(&mut reactor, Duration::from_secs(5), || results.borrow().len() == 1));
    assert!(!client.is_cached(&uri));
    assert_eq!(results.borrow()[0].as_ref().unwrap().text(), "bye");

    client
        .request(&mut reactor, HttpRequest::new(Method::Get, uri.clone()), push_to(&results))
        .unwrap();
    assert!(drive_until(&mut reactor, Duration::from_secs(5), || results.borrow().len() == 2));
    assert!(results.borrow()[1].is_ok());
    assert_eq!(server.connections(), 2);
}

// ============================================================================
// Status handling
// ============================================================================

#[test]
fn test_non_success_status_is_error() {
    init_logging();
    let server = MockHttpServer::start(|_, _| MockResponse::json(404, &json!({"message": "Unknown Channel"})))
        .expect("server");
    let mut reactor = test_reactor();
    let client = HttpClient::new();
    let results = collector();

    let request = HttpRequest::get(&server.url("/channels/0")).unwrap();
    client.request(&mut reactor, request, push_to(&results)).unwrap();
    assert!(drive_until(&mut reactor, Duration::from_secs(5), || !results.borrow().is_empty()));

    match &results.borrow()[0] {
        Err(HttpError::Status { status, body }) => {
            assert_eq!(*status, 404);
            assert!(String::from_utf8_lossy(body).contains("Unknown Channel"));
        }
        other => panic!("expected status error, got {other:?}"),
    };
}

#[test]
fn test_rate_limit_retries_once_after_delay() {
    init_logging();
    let server = MockHttpServer::start(|_, index| {
        if index == 0 {
            MockResponse::json(429, &json!({"retry_after": 250, "global": false}))
        } else {
            MockResponse::json(200, &json!({"ok": true}))
        }
    })
    .expect("server");
    let mut reactor = test_reactor();
    let client = HttpClient::new();
    let results = collector();

    let request = HttpRequest::get(&server.url("/gateway/bot")).unwrap();
    client.request(&mut reactor, request, push_to(&results)).unwrap();
    assert!(drive_until(&mut reactor, Duration::from_secs(5), || !results.borrow().is_empty()));

    // no late duplicate
    let _ = drive_until(&mut reactor, Duration::from_millis(300), || false);
    assert_eq!(results.borrow().len(), 1);
    let response = results.borrow_mut().remove(0).unwrap();
    assert_eq!(response.json::<Value>().unwrap(), json!({"ok": true}));

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    let waited = requests[1].received_at.duration_since(requests[0].received_at);
    assert!(waited >= Duration::from_millis(250), "retried after {waited:?}");
}

#[test]
fn test_second_rate_limit_is_reported() {
    init_logging();
    let server = MockHttpServer::start(|_, _| {
        MockResponse::new(429, "").with_header("Retry-After", "0.05")
    })
    .expect("server");
    let mut reactor = test_reactor();
    let client = HttpClient::new();
    let results = collector();

    let request = HttpRequest::get(&server.url("/limited")).unwrap();
    client.request(&mut reactor, request, push_to(&results)).unwrap();
    assert!(drive_until(&mut reactor, Duration::from_secs(5), || !results.borrow().is_empty()));

    assert!(matches!(
        results.borrow()[0],
        Err(HttpError::RateLimited { .. })
    ));
    assert_eq!(server.requests().len(), 2);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_refused_connection_reports_failure() {
    init_logging();
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let mut reactor = test_reactor();
    let client = HttpClient::new();
    let results = collector();

    let request = HttpRequest::get(&format!("http://127.0.0.1:{port}/")).unwrap();
    match client.request(&mut reactor, request, push_to(&results)) {
        // refused before the socket was even registered
        Err(HttpError::Connect(_)) => {}
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(()) => {
            assert!(drive_until(&mut reactor, Duration::from_secs(5), || !results.borrow().is_empty()));
            assert!(matches!(
                results.borrow()[0],
                Err(HttpError::ConnectionClosed | HttpError::Connect(_))
            ));
        }
    }
    assert_eq!(client.cached_routes(), 0);
}

#[test]
fn test_head_response_completes_without_body() {
    init_logging();
    let server = MockHttpServer::start(|_, _| MockResponse::new(200, "hello")).expect("server");
    let mut reactor = test_reactor();
    let client = HttpClient::new();
    let results = collector();
    let uri = Uri::parse(&server.url("/asset")).unwrap();

    client
        .request(&mut reactor, HttpRequest::new(Method::Head, uri.clone()), push_to(&results))
        .unwrap();
    client
        .request(&mut reactor, HttpRequest::new(Method::Get, uri), push_to(&results))
        .unwrap();
    assert!(drive_until(&mut reactor, Duration::from_secs(5), || results.borrow().len() == 2));

    let results = results.borrow();
    let head = results[0].as_ref().unwrap();
    assert_eq!(head.header("Content-Length"), Some("5"));
    assert!(head.body.is_empty());
    // the GET behind it was not swallowed
    assert_eq!(results[1].as_ref().unwrap().text(), "hello");
    assert_eq!(server.connections(), 1);
}

// ============================================================================
// Lost connections
// ============================================================================

#[test]
fn test_lost_get_is_replayed_on_fresh_connection() {
    init_logging();
    let server = MockHttpServer::start(|request, index| match index {
        // the second queued request loses its connection
        1 => MockResponse::dropped(),
        _ => MockResponse::new(200, request.target.clone()),
    })
    .expect("server");
    let mut reactor = test_reactor();
    let client = HttpClient::new();
    let results = collector();

    let first = HttpRequest::get(&server.url("/a")).unwrap();
    let second = HttpRequest::get(&server.url("/b")).unwrap();
    client.request(&mut reactor, first, push_to(&results)).unwrap();
    client.request(&mut reactor, second, push_to(&results)).unwrap();
    assert!(drive_until(&mut reactor, Duration::from_secs(5), || results.borrow().len() == 2));

    let bodies: Vec<String> = results
        .borrow()
        .iter()
        .map(|result| result.as_ref().unwrap().text())
        .collect();
    assert_eq!(bodies, vec!["/a", "/b"]);

    let targets: Vec<String> = server.requests().into_iter().map(|r| r.target).collect();
    assert_eq!(targets, vec!["/a", "/b", "/b"]);
    assert_eq!(server.connections(), 2);
}

#[test]
fn test_lost_post_is_not_repeated() {
    init_logging();
    let server = MockHttpServer::start(|_, _| MockResponse::dropped()).expect("server");
    let mut reactor = test_reactor();
    let client = HttpClient::new();
    let results = collector();

    let uri = Uri::parse(&server.url("/channels/1/messages")).unwrap();
    let request = HttpRequest::new(Method::Post, uri).with_body(br#"{"content":"once"}"#.to_vec());
    client.request(&mut reactor, request, push_to(&results)).unwrap();
    assert!(drive_until(&mut reactor, Duration::from_secs(5), || !results.borrow().is_empty()));

    assert!(matches!(results.borrow()[0], Err(HttpError::ConnectionClosed)));
    drive_for(&mut reactor, Duration::from_millis(100));
    assert_eq!(server.requests().len(), 1);
    assert_eq!(server.connections(), 1);
}

#[test]
fn test_second_loss_fails_replayed_request() {
    init_logging();
    let server = MockHttpServer::start(|_, _| MockResponse::dropped()).expect("server");
    let mut reactor = test_reactor();
    let client = HttpClient::new();
    let results = collector();

    let request = HttpRequest::get(&server.url("/flaky")).unwrap();
    client.request(&mut reactor, request, push_to(&results)).unwrap();
    assert!(drive_until(&mut reactor, Duration::from_secs(5), || !results.borrow().is_empty()));

    assert!(matches!(results.borrow()[0], Err(HttpError::ConnectionClosed)));
    drive_for(&mut reactor, Duration::from_millis(100));
    assert_eq!(results.borrow().len(), 1);
    assert_eq!(server.requests().len(), 2);
    assert_eq!(client.cached_routes(), 0);
}
