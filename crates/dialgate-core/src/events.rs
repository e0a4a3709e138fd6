//! Call events reported by the provider and their queue wire format.
//!
//! The payload written to a queue is the JSON object of the event's fields:
//! `{"callSid":"CA..","answeredBy":"human"}` on `voice/amd` and
//! `{"callSid":"CA..","callStatus":"completed"}` on `voice/status`.

use serde::{Deserialize, Serialize};
use twilio_voice::CallId;

/// Queue carrying AMD verdicts
pub const AMD_QUEUE: &str = "voice/amd";
/// Queue carrying call status transitions
pub const STATUS_QUEUE: &str = "voice/status";

/// Who (or what) picked up, as reported by answering-machine detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnsweredBy {
    MachineStart,
    Human,
    Fax,
    Unknown,
}

impl AnsweredBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnsweredBy::MachineStart => "machine_start",
            AnsweredBy::Human => "human",
            AnsweredBy::Fax => "fax",
            AnsweredBy::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "machine_start" => Some(AnsweredBy::MachineStart),
            "human" => Some(AnsweredBy::Human),
            "fax" => Some(AnsweredBy::Fax),
            "unknown" => Some(AnsweredBy::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for AnsweredBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider call lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Queued,
    Initiated,
    Ringing,
    InProgress,
    Completed,
    Busy,
    Failed,
    NoAnswer,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Queued => "queued",
            CallStatus::Initiated => "initiated",
            CallStatus::Ringing => "ringing",
            CallStatus::InProgress => "in-progress",
            CallStatus::Completed => "completed",
            CallStatus::Busy => "busy",
            CallStatus::Failed => "failed",
            CallStatus::NoAnswer => "no-answer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(CallStatus::Queued),
            "initiated" => Some(CallStatus::Initiated),
            "ringing" => Some(CallStatus::Ringing),
            "in-progress" => Some(CallStatus::InProgress),
            "completed" => Some(CallStatus::Completed),
            "busy" => Some(CallStatus::Busy),
            "failed" => Some(CallStatus::Failed),
            "no-answer" => Some(CallStatus::NoAnswer),
            _ => None,
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AMD verdict for one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmdEvent {
    #[serde(rename = "callSid")]
    pub call_id: CallId,
    #[serde(rename = "answeredBy")]
    pub answered_by: AnsweredBy,
}

/// Status transition for one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    #[serde(rename = "callSid")]
    pub call_id: CallId,
    #[serde(rename = "callStatus")]
    pub call_status: CallStatus,
}

/// Every event the provider can report about a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Amd(AmdEvent),
    Status(StatusEvent),
}

/// Which queue family an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Amd,
    Status,
}

impl EventKind {
    pub fn queue(&self) -> &'static str {
        match self {
            EventKind::Amd => AMD_QUEUE,
            EventKind::Status => STATUS_QUEUE,
        }
    }

    /// Decode a queue payload of this kind.
    pub fn decode(&self, payload: &[u8]) -> Result<CallEvent, serde_json::Error> {
        match self {
            EventKind::Amd => serde_json::from_slice(payload).map(CallEvent::Amd),
            EventKind::Status => serde_json::from_slice(payload).map(CallEvent::Status),
        }
    }
}

impl CallEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CallEvent::Amd(_) => EventKind::Amd,
            CallEvent::Status(_) => EventKind::Status,
        }
    }

    pub fn call_id(&self) -> &CallId {
        match self {
            CallEvent::Amd(e) => &e.call_id,
            CallEvent::Status(e) => &e.call_id,
        }
    }

    /// Queue payload for this event.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            CallEvent::Amd(e) => serde_json::to_vec(e),
            CallEvent::Status(e) => serde_json::to_vec(e),
        }
    }
}

impl From<AmdEvent> for CallEvent {
    fn from(event: AmdEvent) -> Self {
        CallEvent::Amd(event)
    }
}

impl From<StatusEvent> for CallEvent {
    fn from(event: StatusEvent) -> Self {
        CallEvent::Status(event)
    }
}
