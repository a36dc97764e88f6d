//! End-to-end pipeline tests against a faked provider API.

#![allow(clippy::unwrap_used)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use pushgate_common::{
    config::Config,
    envelope::Envelope,
    reply::{Reply, Response},
};
use pushgate_relay::{
    Relay,
    dispatcher::RetryPolicy,
    provider::PushoverClient,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, method, path},
};

fn peer() -> SocketAddr {
    "127.0.0.1:49152".parse().unwrap()
}

fn envelope(rcpt: &str, data: &[u8]) -> Envelope {
    Envelope::new(
        "sensor@home.local".to_string(),
        vec![rcpt.to_string()],
        data.to_vec(),
        peer(),
    )
}

fn config(queue_dir: Option<std::path::PathBuf>) -> Config {
    let mut config = Config {
        pushover_token: "TKN".to_string(),
        default_user_key: "U0".to_string(),
        queue_dir,
        ..Config::default()
    };
    config
        .recipient_map
        .insert("alerts@home.local".to_string(), "U2".to_string());
    config
}

/// A relay whose retries fire instantly, wired to the mock server.
fn relay(server_uri: &str, config: &Config) -> Relay {
    let provider = Arc::new(
        PushoverClient::with_endpoint("TKN", format!("{server_uri}/1/messages.json")).unwrap(),
    );
    Relay::with_retry_policy(config, provider, RetryPolicy::new(vec![Duration::ZERO; 3])).unwrap()
}

async fn accepting_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/1/messages.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":1}"#))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn accepted_message_reaches_the_provider() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/1/messages.json"))
        .and(body_string_contains("user=U2"))
        .and(body_string_contains("title=Door+open"))
        .and(body_string_contains("priority=1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":1}"#))
        .expect(1)
        .mount(&server)
        .await;

    let relay = relay(&server.uri(), &config(None));
    let response = relay
        .handle(&envelope(
            "alerts@home.local",
            b"Subject: Door open [PRIO=1]\r\n\r\nThe back door opened",
        ))
        .await;

    assert_eq!(response, Response::new(Reply::Ok, "Message accepted"));
    assert_eq!(relay.metrics().pushed_ok, 1);
}

#[tokio::test]
async fn duplicate_within_the_window_is_coalesced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":1}"#))
        .expect(1)
        .mount(&server)
        .await;

    let relay = relay(&server.uri(), &config(None));
    let data = b"Subject: Same\r\n\r\nSame body";

    let first = relay.handle(&envelope("a@x", data)).await;
    let second = relay.handle(&envelope("a@x", data)).await;

    assert_eq!(first.code, Reply::Ok);
    assert_eq!(second, Response::new(Reply::Ok, "Message deduplicated"));
    assert_eq!(relay.metrics().dedup_dropped, 1);
    // expect(1) on the mock verifies the provider saw only one call.
}

#[tokio::test]
async fn over_limit_messages_are_rejected_transiently() {
    let server = accepting_server().await;

    let relay = relay(
        &server.uri(),
        &Config {
            rate_limit_per_minute: 1,
            ..config(None)
        },
    );

    let first = relay
        .handle(&envelope("a@x", b"Subject: one\r\n\r\nfirst"))
        .await;
    let second = relay
        .handle(&envelope("a@x", b"Subject: two\r\n\r\nsecond"))
        .await;

    assert_eq!(first.code, Reply::Ok);
    assert_eq!(second.code, Reply::ActionUnavailable);
    assert!(second.text.contains("Rate limit"));
    assert_eq!(relay.metrics().rate_limited, 1);
}

#[tokio::test]
async fn unmapped_recipients_route_to_the_default_user() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("user=U0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":1}"#))
        .expect(1)
        .mount(&server)
        .await;

    let relay = relay(&server.uri(), &config(None));
    let response = relay
        .handle(&envelope("unknown@x", b"Subject: hi\r\n\r\nbody"))
        .await;

    assert_eq!(response.code, Reply::Ok);
}

#[tokio::test]
async fn exhausted_retries_queue_exactly_one_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(4)
        .mount(&server)
        .await;

    let queue_dir = tempfile::tempdir().unwrap();
    let relay = relay(&server.uri(), &config(Some(queue_dir.path().to_path_buf())));

    let response = relay
        .handle(&envelope(
            "alerts@home.local",
            b"Subject: Failing [SOUND=siren]\r\n\r\nno luck",
        ))
        .await;

    assert_eq!(
        response,
        Response::new(Reply::ActionUnavailable, "Temporary failure, queued")
    );
    assert_eq!(relay.metrics().pushed_failed, 1);

    let log = std::fs::read_to_string(queue_dir.path().join("queue.jsonl")).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("alerts@home.local"));
    assert!(lines[0].contains("siren"));
}

#[tokio::test]
async fn exhausted_retries_without_a_queue_still_reject_transiently() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(4)
        .mount(&server)
        .await;

    let relay = relay(&server.uri(), &config(None));
    let response = relay
        .handle(&envelope("a@x", b"Subject: Failing\r\n\r\nno luck"))
        .await;

    assert_eq!(response.code, Reply::ActionUnavailable);
}

#[tokio::test]
async fn replayed_records_bypass_dedup_and_rate_limiting() {
    // Fail everything so a record lands in the queue...
    let failing = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&failing)
        .await;

    let queue_dir = tempfile::tempdir().unwrap();
    let cfg = config(Some(queue_dir.path().to_path_buf()));
    let relay = relay(&failing.uri(), &cfg);
    relay
        .handle(&envelope(
            "alerts@home.local",
            b"Subject: Queued [PRIO=1]\r\n\r\nheld back",
        ))
        .await;

    // ...then replay it through an accepting provider.
    let accepting = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("title=Queued"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":1}"#))
        .expect(1)
        .mount(&accepting)
        .await;

    let provider = Arc::new(
        PushoverClient::with_endpoint(
            "TKN",
            format!("{}/1/messages.json", accepting.uri()),
        )
        .unwrap(),
    );

    let report = pushgate_queue::replay_queue(queue_dir.path(), |record| {
        let provider = provider.clone();
        async move {
            let parsed = pushgate_relay::parser::parse(record.content.as_bytes());
            let payload = pushgate_relay::provider::PushPayload {
                user: "U2".to_string(),
                title: parsed.title().to_string(),
                message: parsed.message().to_string(),
                priority: record
                    .directives
                    .get("priority")
                    .and_then(|p| p.parse().ok()),
                ..Default::default()
            };
            use pushgate_relay::provider::Provider as _;
            provider.send(&payload).await.accepted
        }
    })
    .await
    .unwrap();

    assert_eq!(report.replayed, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.skipped, 0);
}
