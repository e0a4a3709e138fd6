//! Inbound provider webhooks
//!
//! Both callbacks post `application/x-www-form-urlencoded` bodies. Parsing
//! produces one `CallEvent`; ingestion publishes it to its queue. Ingestion
//! never fails towards the provider: rejected and unpublishable callbacks
//! are logged and acknowledged all the same.

use std::collections::HashMap;

use dialgate_queue::MessageId;
use tracing::{debug, info, instrument};
use twilio_voice::{CallId, SESSION_QUERY_KEY};
use url::form_urlencoded;

use crate::error::ValidationError;
use crate::events::{AmdEvent, AnsweredBy, CallEvent, CallStatus, EventKind, StatusEvent};
use crate::obs;
use crate::publisher::EventPublisher;

/// Decoded form fields. Repeated keys keep their first value.
struct FormFields(HashMap<String, String>);

impl FormFields {
    fn decode(body: &[u8]) -> Result<Self, ValidationError> {
        std::str::from_utf8(body).map_err(|e| ValidationError::MalformedBody(e.to_string()))?;
        let mut fields = HashMap::new();
        for (key, value) in form_urlencoded::parse(body) {
            fields.entry(key.into_owned()).or_insert_with(|| value.into_owned());
        }
        Ok(FormFields(fields))
    }

    fn optional(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str).filter(|v| !v.is_empty())
    }

    fn required(&self, field: &'static str) -> Result<&str, ValidationError> {
        self.optional(field)
            .ok_or(ValidationError::MissingField { field })
    }
}

/// Session token from a callback query string. The first non-empty
/// `socketId` wins; a missing or mangled query yields `None`.
pub fn session_from_query(query: Option<&str>) -> Option<String> {
    form_urlencoded::parse(query?.as_bytes())
        .filter(|(key, value)| key == SESSION_QUERY_KEY && !value.is_empty())
        .map(|(_, value)| value.into_owned())
        .next()
}

/// Parse an AMD callback body.
pub fn parse_amd(body: &[u8]) -> Result<AmdEvent, ValidationError> {
    let form = FormFields::decode(body)?;
    let call_sid = form.required("CallSid")?;
    let raw = form.required("AnsweredBy")?;
    let answered_by = AnsweredBy::parse(raw).ok_or_else(|| ValidationError::UnknownValue {
        field: "AnsweredBy",
        value: raw.to_string(),
    })?;

    debug!(
        call_sid = %call_sid,
        account_sid = form.optional("AccountSid").unwrap_or(""),
        detection_ms = form.optional("MachineDetectionDuration").unwrap_or(""),
        "amd callback parsed"
    );
    Ok(AmdEvent {
        call_id: CallId::new(call_sid),
        answered_by,
    })
}

/// Parse a status callback body.
pub fn parse_status(body: &[u8]) -> Result<StatusEvent, ValidationError> {
    let form = FormFields::decode(body)?;
    let call_sid = form.required("CallSid")?;
    let raw = form.required("CallStatus")?;
    let call_status = CallStatus::parse(raw).ok_or_else(|| ValidationError::UnknownValue {
        field: "CallStatus",
        value: raw.to_string(),
    })?;
    Ok(StatusEvent {
        call_id: CallId::new(call_sid),
        call_status,
    })
}

/// Parse a callback body of the given kind.
pub fn parse(kind: EventKind, body: &[u8]) -> Result<CallEvent, ValidationError> {
    match kind {
        EventKind::Amd => parse_amd(body).map(CallEvent::Amd),
        EventKind::Status => parse_status(body).map(CallEvent::Status),
    }
}

/// What happened to one callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Published(MessageId),
    Rejected,
    PublishFailed,
}

/// Parses callbacks and publishes them, absorbing every failure.
#[derive(Clone)]
pub struct WebhookIngest {
    publisher: EventPublisher,
}

impl WebhookIngest {
    pub fn new(publisher: EventPublisher) -> Self {
        Self { publisher }
    }

    #[instrument(skip(self, body), fields(kind = ?kind, session = session.unwrap_or("")))]
    pub async fn ingest(
        &self,
        kind: EventKind,
        body: &[u8],
        session: Option<&str>,
    ) -> IngestOutcome {
        let event = match parse(kind, body) {
            Ok(event) => event,
            Err(e) => {
                obs::emit_webhook_rejected(kind.queue(), &e);
                return IngestOutcome::Rejected;
            }
        };

        match self.publisher.publish(&event).await {
            Ok(message_id) => {
                info!(call_id = %event.call_id(), queue = kind.queue(), "webhook event queued");
                IngestOutcome::Published(message_id)
            }
            Err(e) => {
                obs::emit_webhook_publish_failed(kind.queue(), event.call_id().as_str(), &e);
                IngestOutcome::PublishFailed
            }
        }
    }
}
