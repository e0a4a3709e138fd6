//! Observability tests for call lifecycle tracing.

use std::sync::Arc;
use std::time::Duration;

use dialgate_core::{
    call_span, emit_call_completion, emit_call_placed, emit_disposition_resolved,
    emit_late_match_discarded, emit_race_timeout, emit_race_won, emit_webhook_publish_failed,
    emit_webhook_rejected, CallOrchestrator, EventKind, EventPublisher, IngestOutcome,
    MemoryCompletionLog, OrchestratorConfig, WebhookIngest,
};
use dialgate_queue::{BrokerConnection, MemoryConnector};
use tracing_test::traced_test;
use twilio_voice::RecordingTelephony;

#[traced_test]
#[test]
fn test_emit_call_placed_logs_call_id() {
    emit_call_placed("CA123", "+15551234567");
    assert!(logs_contain("call.placed"));
    assert!(logs_contain("CA123"));
}

#[traced_test]
#[test]
fn test_race_events_are_logged() {
    emit_race_won(1, "voice/status", "CA1", 42);
    emit_late_match_discarded(0, "voice/amd", "CA1");
    emit_race_timeout(2, 60_000);
    assert!(logs_contain("race.won"));
    assert!(logs_contain("race.late_match_discarded"));
    assert!(logs_contain("race.timeout"));
}

#[traced_test]
#[test]
fn test_disposition_and_completion_are_logged() {
    emit_disposition_resolved("CA1", "hangup");
    emit_call_completion("CA1", "machine_start");
    assert!(logs_contain("disposition.resolved"));
    assert!(logs_contain("call.completion"));
    assert!(logs_contain("machine_start"));
}

#[traced_test]
#[test]
fn test_webhook_failures_log_warnings() {
    emit_webhook_rejected("voice/amd", &"missing CallSid");
    emit_webhook_publish_failed("voice/status", "CA1", &"broker down");
    assert!(logs_contain("webhook.rejected"));
    assert!(logs_contain("webhook.publish_failed"));
}

#[traced_test]
#[test]
fn test_call_span_tags_events() {
    let _entered = call_span("CA-span").entered();
    tracing::info!("inside call");
    assert!(logs_contain("CA-span"));
}

#[traced_test]
#[tokio::test]
async fn test_call_placed_is_logged_inside_call_span() {
    let connection = Arc::new(
        BrokerConnection::open(Arc::new(MemoryConnector::default()))
            .await
            .unwrap(),
    );
    let orchestrator = CallOrchestrator::new(
        Arc::new(RecordingTelephony::new().with_call_id("CA-placed")),
        connection,
        Arc::new(MemoryCompletionLog::new()),
        OrchestratorConfig::default().with_race_timeout(Duration::from_millis(20)),
    );

    let err = orchestrator.make_call("+15551234567", None).await.unwrap_err();
    assert!(err.is_timeout());

    logs_assert(|lines: &[&str]| {
        let placed_in_span = lines.iter().any(|line| {
            line.contains("call.placed") && line.contains("dialgate.call{call_id=CA-placed}")
        });
        if placed_in_span {
            Ok(())
        } else {
            Err("call.placed was not logged inside the call span".to_string())
        }
    });
}

#[traced_test]
#[tokio::test]
async fn test_malformed_webhook_is_logged_and_absorbed() {
    let connection = Arc::new(
        BrokerConnection::open(Arc::new(MemoryConnector::default()))
            .await
            .unwrap(),
    );
    let ingest = WebhookIngest::new(EventPublisher::new(connection.clone()));

    let outcome = ingest
        .ingest(EventKind::Amd, b"AnsweredBy=human", Some("sock-1"))
        .await;
    assert_eq!(outcome, IngestOutcome::Rejected);
    assert!(logs_contain("webhook.rejected"));

    let outcome = ingest
        .ingest(EventKind::Status, b"CallSid=CA1&CallStatus=completed", None)
        .await;
    assert!(matches!(outcome, IngestOutcome::Published(_)));

    connection.close().await.unwrap();
    let outcome = ingest
        .ingest(EventKind::Status, b"CallSid=CA1&CallStatus=busy", None)
        .await;
    assert_eq!(outcome, IngestOutcome::PublishFailed);
    assert!(logs_contain("webhook.publish_failed"));
}
