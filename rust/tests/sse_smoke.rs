mod common;

use std::time::Duration;

use common::{
    find_free_port, sign_token, spawn_faxbot, spawn_jwks, stop_child, wait_for_http_status,
    MockFaxService, TEST_AUDIENCE, TEST_ISSUER,
};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::{json, Value};

async fn start_gateway(port: u16) -> (tokio::process::Child, MockFaxService) {
    let mock = MockFaxService::default();
    let upstream = mock.spawn().await;
    let jwks_url = spawn_jwks().await;
    let port_str = port.to_string();

    let child = spawn_faxbot(
        &[
            "--transport",
            "sse",
            "--faxApiUrl",
            &upstream,
            "--port",
            &port_str,
            "--oauthIssuer",
            TEST_ISSUER,
            "--oauthAudience",
            TEST_AUDIENCE,
            "--oauthJwksUrl",
            &jwks_url,
            "--logLevel",
            "none",
        ],
        false,
    )
    .await;

    wait_for_http_status(
        &format!("http://127.0.0.1:{port}/health"),
        reqwest::StatusCode::OK,
        Duration::from_secs(10),
    )
    .await;
    (child, mock)
}

#[tokio::test]
async fn sse_rejects_expired_token() {
    let port = find_free_port();
    let (mut child, _mock) = start_gateway(port).await;

    let response = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{port}/sse"))
        .header("Authorization", format!("Bearer {}", sign_token("user-1", -120)))
        .send()
        .await
        .expect("connect failed");
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.expect("401 body");
    assert_eq!(body, json!({"error": "Unauthorized"}));

    stop_child(&mut child).await;
}

#[tokio::test]
async fn sse_round_trip_with_valid_token() {
    let port = find_free_port();
    let (mut child, mock) = start_gateway(port).await;
    let client = reqwest::Client::new();
    let token = format!("Bearer {}", sign_token("user-1", 300));

    let response = client
        .get(format!("http://127.0.0.1:{port}/sse"))
        .header("Authorization", &token)
        .send()
        .await
        .expect("connect failed");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let mut events = response.bytes_stream().eventsource();

    let endpoint = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .expect("timed out waiting for endpoint event")
        .expect("stream ended")
        .expect("invalid event");
    assert_eq!(endpoint.event, "endpoint");
    let message_url = format!("http://127.0.0.1:{port}{}", endpoint.data);

    let requests = [
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
        json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {
                "name": "send_fax",
                "arguments": {
                    "to": "+15551234567",
                    "fileContent": "aGVsbG8gZmF4",
                    "fileName": "memo.txt"
                }
            }
        }),
    ];
    for request in &requests {
        let accepted = client
            .post(&message_url)
            .header("Authorization", &token)
            .json(request)
            .send()
            .await
            .expect("post failed");
        assert_eq!(accepted.status(), reqwest::StatusCode::ACCEPTED);
    }

    let mut replies = Vec::new();
    while replies.len() < 2 {
        let event = tokio::time::timeout(Duration::from_secs(5), events.next())
            .await
            .expect("timed out waiting for reply")
            .expect("stream ended")
            .expect("invalid event");
        if event.event == "message" {
            replies.push(serde_json::from_str::<Value>(&event.data).expect("reply JSON"));
        }
    }
    assert_eq!(replies[0]["id"], json!(1));
    assert_eq!(replies[0]["result"]["tools"][0]["name"], json!("send_fax"));
    assert_eq!(replies[1]["id"], json!(2));
    assert_eq!(replies[1]["result"]["structuredContent"]["status"], json!("queued"));
    assert_eq!(mock.creates(), 1);

    stop_child(&mut child).await;
}
