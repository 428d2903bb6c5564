//! Integration tests for the async client using wiremock to simulate a portal.

use bitrix24_client::{
    config::ClientBuilder, Client, ClientConfig, Error, Params, RetryPolicy, RetryStrategy,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const TOTAL_ROWS: u64 = 120;

fn builder(server: &MockServer) -> ClientBuilder {
    ClientConfig::builder()
        .base_url(server.uri())
        .unwrap()
        .credential("key")
        .retry_strategy(RetryStrategy::new(
            RetryPolicy::Fixed,
            Duration::from_millis(10),
            Duration::from_millis(50),
        ))
}

fn open(builder: ClientBuilder) -> Client {
    let mut client = Client::new(builder.build().unwrap());
    client.open_session().unwrap();
    client
}

fn params(value: Value) -> Option<Params> {
    value.as_object().cloned()
}

fn request_start(req: &Request) -> u64 {
    serde_json::from_slice::<Value>(&req.body)
        .ok()
        .and_then(|body| body.get("start").and_then(Value::as_u64))
        .unwrap_or(0)
}

/// A list page of `TOTAL_ROWS` numbered rows starting at `start`.
fn list_page(start: u64) -> Value {
    let end = (start + 50).min(TOTAL_ROWS);
    let rows: Vec<u64> = (start..end).collect();
    if end < TOTAL_ROWS {
        json!({"result": rows, "next": end, "total": TOTAL_ROWS})
    } else {
        json!({"result": rows, "total": TOTAL_ROWS})
    }
}

#[tokio::test]
async fn test_single_call_posts_empty_object() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/key/user.current"))
        .and(body_json(json!({})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {"ID": "1"}})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = open(builder(&mock_server));
    let result = client.call_method("user.current", None, false).await.unwrap();

    assert_eq!(result, json!("1"));
}

#[tokio::test]
async fn test_oauth_path_and_params() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/7/token/crm.lead.list"))
        .and(body_json(json!({"select": ["ID"]})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": [{"ID": "1"}]})),
        )
        .mount(&mock_server)
        .await;

    let client = open(builder(&mock_server).credential("token").user_id(7));
    let result = client
        .call_method("crm.lead.list", params(json!({"select": ["ID"]})), false)
        .await
        .unwrap();

    assert_eq!(result, json!([{"ID": "1"}]));
}

#[tokio::test]
async fn test_nested_result_is_unwrapped() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/key/crm.item.list"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": {"items": [1, 2, 3]}})),
        )
        .mount(&mock_server)
        .await;

    let client = open(builder(&mock_server));
    let result = client.call_method("crm.item.list", None, false).await.unwrap();

    assert_eq!(result, json!([1, 2, 3]));
}

#[tokio::test]
async fn test_max_retries_exceeded_on_503() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/key/crm.lead.list"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .mount(&mock_server)
        .await;

    let client = open(builder(&mock_server).max_retries(2));
    let result = client.call_method("crm.lead.list", None, false).await;

    match result {
        Err(Error::MaxRetriesExceeded { attempts, url }) => {
            // max_retries: 2 means 3 physical requests (1 initial + 2 retries)
            assert_eq!(attempts, 3);
            assert!(!url.contains("key"));
        }
        other => panic!("Expected MaxRetriesExceeded, got {:?}", other),
    }
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_503_then_success_on_last_allowed_attempt() {
    let mock_server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    // Two 503s, then the third (and last allowed) attempt succeeds
    Mock::given(method("POST"))
        .and(path("/rest/key/crm.lead.get"))
        .respond_with(move |_req: &Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count < 2 {
                ResponseTemplate::new(503).set_body_string("busy")
            } else {
                ResponseTemplate::new(200).set_body_json(json!({"result": {"ID": "5"}}))
            }
        })
        .mount(&mock_server)
        .await;

    let client = open(builder(&mock_server).max_retries(2));
    let envelope = client.call_raw("crm.lead.get", None).await.unwrap();

    assert_eq!(envelope.attempts, 3);
    assert!(envelope.was_retried());
    assert_eq!(envelope.body["result"], json!({"ID": "5"}));
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_other_errors_are_not_retried() {
    for status in [400u16, 401, 500, 502] {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&mock_server)
            .await;

        let client = open(builder(&mock_server).max_retries(5));
        let result = client.call_method("crm.lead.list", None, false).await;

        match result {
            Err(Error::HttpError {
                status: got,
                raw_response,
            }) => {
                assert_eq!(got.as_u16(), status);
                assert_eq!(raw_response, "nope");
            }
            other => panic!("Expected HttpError, got {:?}", other),
        }
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_invalid_json_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("invalid json"))
        .mount(&mock_server)
        .await;

    let client = open(builder(&mock_server));
    let result = client.call_method("crm.lead.list", None, false).await;

    match result {
        Err(Error::InvalidResponse { raw_response, .. }) => {
            assert_eq!(raw_response, "invalid json");
        }
        other => panic!("Expected InvalidResponse, got {:?}", other),
    }
}

#[tokio::test]
async fn test_api_error_envelope() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [1],
            "error": "ERROR_METHOD_NOT_FOUND",
            "error_description": "Method not found!"
        })))
        .mount(&mock_server)
        .await;

    let client = open(builder(&mock_server));
    let result = client.call_method("crm.nothing", None, false).await;

    match result {
        Err(Error::Api { code, description }) => {
            assert_eq!(code, "ERROR_METHOD_NOT_FOUND");
            assert_eq!(description, "Method not found!");
        }
        other => panic!("Expected Api error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fetch_all_returns_rows_in_offset_order() {
    let mock_server = MockServer::start().await;

    // The page at offset 50 answers last, so completion order differs from
    // offset order.
    Mock::given(method("POST"))
        .and(path("/rest/key/crm.contact.list"))
        .respond_with(|req: &Request| {
            let start = request_start(req);
            let delay = if start == 50 { 200 } else { 0 };
            ResponseTemplate::new(200)
                .set_body_json(list_page(start))
                .set_delay(Duration::from_millis(delay))
        })
        .mount(&mock_server)
        .await;

    let client = open(builder(&mock_server));
    let result = client
        .call_method("crm.contact.list", params(json!({"select": ["ID"]})), true)
        .await
        .unwrap();

    let expected: Vec<Value> = (0..TOTAL_ROWS).map(Value::from).collect();
    assert_eq!(result, Value::Array(expected));

    let mut starts: Vec<u64> = mock_server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(request_start)
        .collect();
    starts.sort_unstable();
    assert_eq!(starts, vec![0, 50, 100]);
}

#[tokio::test]
async fn test_fetch_all_single_page() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": [1, 2], "total": 2})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = open(builder(&mock_server));
    let result = client.call_method("crm.deal.list", None, true).await.unwrap();

    assert_eq!(result, json!([1, 2]));
}

#[tokio::test]
async fn test_fetch_all_rejects_cursor_that_does_not_advance() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"result": [1], "next": 0, "total": 60})),
        )
        .mount(&mock_server)
        .await;

    let client = open(builder(&mock_server));
    let result = client.call_method("crm.deal.list", None, true).await;

    assert!(
        matches!(result, Err(Error::InvalidResponse { .. })),
        "{:?}",
        result
    );
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_fetch_all_cursor_must_pass_requested_start() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"result": [1], "next": 50, "total": 200})),
        )
        .mount(&mock_server)
        .await;

    let client = open(builder(&mock_server));
    let result = client
        .call_method("crm.deal.list", params(json!({"start": 50})), true)
        .await;

    assert!(
        matches!(result, Err(Error::InvalidResponse { .. })),
        "{:?}",
        result
    );
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_fetch_all_page_failure_discards_results() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(|req: &Request| {
            let start = request_start(req);
            if start == 100 {
                ResponseTemplate::new(400).set_body_string("bad page")
            } else {
                ResponseTemplate::new(200).set_body_json(list_page(start))
            }
        })
        .mount(&mock_server)
        .await;

    let client = open(builder(&mock_server));
    let result = client.call_method("crm.contact.list", None, true).await;

    match result {
        Err(Error::HttpError { status, .. }) => assert_eq!(status.as_u16(), 400),
        other => panic!("Expected HttpError, got {:?}", other),
    }
}

#[tokio::test]
async fn test_admission_gate_limits_concurrency() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(|req: &Request| {
            let start = request_start(req);
            let delay = if start == 0 { 0 } else { 150 };
            ResponseTemplate::new(200)
                .set_body_json(list_page(start))
                .set_delay(Duration::from_millis(delay))
        })
        .mount(&mock_server)
        .await;

    // With one permit the two remaining pages run one after the other
    let client = open(builder(&mock_server).max_concurrent_requests(1));
    let start = Instant::now();
    let result = client.call_method("crm.contact.list", None, true).await.unwrap();

    assert_eq!(result.as_array().unwrap().len(), TOTAL_ROWS as usize);
    assert!(start.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_backoff_sleep_releases_admission_permit() {
    let mock_server = MockServer::start().await;
    let busy_count = Arc::new(AtomicUsize::new(0));
    let busy_count_clone = busy_count.clone();

    // The first call gets one 503 and then sleeps before retrying
    Mock::given(method("POST"))
        .and(path("/rest/key/crm.lead.list"))
        .respond_with(move |_req: &Request| {
            if busy_count_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(503)
            } else {
                ResponseTemplate::new(200).set_body_json(json!({"result": [1]}))
            }
        })
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/key/crm.lead.get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {"ID": "1"}})))
        .mount(&mock_server)
        .await;

    let client = open(
        builder(&mock_server)
            .max_concurrent_requests(1)
            .retry_strategy(RetryStrategy::new(
                RetryPolicy::Fixed,
                Duration::from_millis(400),
                Duration::from_secs(1),
            )),
    );

    let busy_call = client.call_raw("crm.lead.list", None);
    let quick_call = async {
        // Let the first call receive its 503 and start sleeping
        tokio::time::sleep(Duration::from_millis(50)).await;
        let start = Instant::now();
        let result = client.call_method("crm.lead.get", None, false).await;
        (result, start.elapsed())
    };

    let (busy, (quick, quick_elapsed)) = tokio::join!(busy_call, quick_call);

    assert_eq!(busy.unwrap().attempts, 2);
    assert_eq!(quick.unwrap(), json!("1"));
    assert!(
        quick_elapsed < Duration::from_millis(300),
        "second call waited {:?} behind a sleeping retry",
        quick_elapsed
    );
}

#[tokio::test]
async fn test_batch_is_chunked_and_merged_in_order() {
    let mock_server = MockServer::start().await;

    // Echo each command back as its own result
    Mock::given(method("POST"))
        .and(path("/rest/key/batch"))
        .respond_with(|req: &Request| {
            let body: Value = serde_json::from_slice(&req.body).unwrap();
            assert_eq!(body["halt"], json!(0));
            ResponseTemplate::new(200).set_body_json(json!({
                "result": {
                    "result": body["cmd"].clone(),
                    "result_error": [],
                    "result_total": [],
                    "result_next": [],
                    "result_time": []
                }
            }))
        })
        .mount(&mock_server)
        .await;

    let commands: Params = (0..120)
        .map(|i| (format!("lead_{}", i), Value::from(format!("crm.lead.get?id={}", i))))
        .collect();

    let client = open(builder(&mock_server));
    let batch = client.call_batch(&commands, false).await.unwrap();

    assert_eq!(mock_server.received_requests().await.unwrap().len(), 3);
    assert!(!batch.has_errors());
    assert_eq!(
        batch.result.keys().collect::<Vec<_>>(),
        commands.keys().collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"result": []}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&mock_server)
        .await;

    let client = open(builder(&mock_server).timeout(Duration::from_millis(50)));
    let result = client.call_method("crm.lead.list", None, false).await;

    assert!(matches!(result, Err(Error::Timeout { .. })), "{:?}", result);
}

#[tokio::test]
async fn test_connection_failure() {
    let config = ClientConfig::builder()
        .base_url("http://127.0.0.1:1")
        .unwrap()
        .credential("key")
        .build()
        .unwrap();

    let client = open_config(config);
    let result = client.call_method("crm.lead.list", None, false).await;

    assert!(
        matches!(result, Err(Error::Connection { .. })),
        "{:?}",
        result
    );
}

fn open_config(config: ClientConfig) -> Client {
    let mut client = Client::new(config);
    client.open_session().unwrap();
    client
}

#[tokio::test]
async fn test_session_lifecycle() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": true})))
        .mount(&mock_server)
        .await;

    let mut client = Client::new(builder(&mock_server).build().unwrap());

    // Calling before any open is rejected without touching the network
    let result = client.call_method("crm.lead.delete", None, false).await;
    assert!(matches!(result, Err(Error::SessionNotOpen)));
    assert!(mock_server.received_requests().await.unwrap().is_empty());

    client.open_session().unwrap();
    assert!(matches!(client.open_session(), Err(Error::SessionAlreadyOpen)));
    assert_eq!(
        client.call_method("crm.lead.delete", None, false).await.unwrap(),
        json!(true)
    );

    client.close_session().unwrap();
    assert!(matches!(client.close_session(), Err(Error::SessionNotOpen)));
    assert!(!client.is_open());
}

#[tokio::test]
async fn test_session_guard_closes_on_error_path() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let mut client = Client::new(builder(&mock_server).build().unwrap());

    async fn failing_work(client: &mut Client) -> Result<Value, Error> {
        let session = client.session()?;
        session.call_method("crm.lead.list", None, false).await
    }

    assert!(failing_work(&mut client).await.is_err());
    assert!(!client.is_open());

    // The guard released the session, so it can be opened again
    client.open_session().unwrap();
}
