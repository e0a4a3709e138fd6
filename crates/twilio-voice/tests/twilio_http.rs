//! HTTP contract tests for TwilioClient against a mock REST API.

use twilio_voice::{CallId, ProviderError, TelephonyControl, TwilioClient, TwilioConfig};
use wiremock::matchers::{basic_auth, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> TwilioClient {
    let config = TwilioConfig::new("AC123", "secret", "+15550000000", "https://dial.example.com")
        .with_api_base(server.uri());
    TwilioClient::new(config).unwrap()
}

#[tokio::test]
async fn place_posts_amd_form_and_returns_sid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/AC123/Calls.json"))
        .and(basic_auth("AC123", "secret"))
        .and(body_string_contains("To=%2B15551234567"))
        .and(body_string_contains("MachineDetection=Enable"))
        .and(body_string_contains("AsyncAmd=true"))
        .and(body_string_contains(
            "AsyncAmdStatusCallback=https%3A%2F%2Fdial.example.com%2Fwebhook%2Ftwilio%2Fvoice%2Famd%3FsocketId%3Dsock1",
        ))
        .and(body_string_contains(
            "StatusCallback=https%3A%2F%2Fdial.example.com%2Fwebhook%2Ftwilio%2Fvoice%2Fstatus",
        ))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(serde_json::json!({ "sid": "CA42", "status": "queued" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let session = client_for(&server)
        .place("+15551234567", Some("sock1"))
        .await
        .unwrap();

    assert_eq!(session.call_id, CallId::new("CA42"));
    assert_eq!(session.destination, "+15551234567");
    assert_eq!(session.origin, "+15550000000");
}

#[tokio::test]
async fn place_refuses_unroutable_callback_base() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "sid": "CA1" })))
        .expect(0)
        .mount(&server)
        .await;

    let config = TwilioConfig::new("AC123", "secret", "+15550000000", "not a url")
        .with_api_base(server.uri());
    let err = TwilioClient::new(config)
        .unwrap()
        .place("+15551234567", Some("sock1"))
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::NotConfigured(_)));
}

#[tokio::test]
async fn place_maps_provider_error_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/AC123/Calls.json"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "code": 21211,
            "message": "The 'To' number is not a valid phone number.",
            "status": 400
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .place("+15551234567", None)
        .await
        .unwrap_err();

    match err {
        ProviderError::Rejected {
            status,
            code,
            message,
        } => {
            assert_eq!(status, 400);
            assert_eq!(code, Some(21211));
            assert!(message.contains("not a valid phone number"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn place_without_sid_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "status": "queued" })))
        .mount(&server)
        .await;

    let err = client_for(&server).place("+15551234567", None).await.unwrap_err();
    assert!(matches!(err, ProviderError::MalformedResponse(_)));
}

#[tokio::test]
async fn invalid_destination_never_reaches_provider() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let err = client_for(&server).place("not-a-number", None).await.unwrap_err();
    assert!(matches!(err, ProviderError::InvalidDestination(_)));
}

#[tokio::test]
async fn terminate_posts_hangup_twiml() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/AC123/Calls/CA42.json"))
        .and(basic_auth("AC123", "secret"))
        .and(body_string_contains("Twiml=%3CResponse%3E%3CHangup%2F%3E%3C%2FResponse%3E"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "sid": "CA42" })))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server)
        .terminate(&CallId::new("CA42"))
        .await
        .unwrap();
}

#[tokio::test]
async fn terminate_surfaces_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/AC123/Calls/CA404.json"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .terminate(&CallId::new("CA404"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProviderError::Rejected { status: 404, code: None, .. }
    ));
}
