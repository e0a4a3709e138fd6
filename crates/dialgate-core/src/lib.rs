//! dialgate-core: Call correlation and disposition
//!
//! Places outbound calls and decides, from the provider's asynchronous
//! callbacks, whether a person or a machine answered.
//!
//! ## Key Components
//!
//! - `WebhookIngest` / `EventPublisher`: callbacks into durable queues
//! - `race_consume`: first matching event across several queues wins
//! - `DispositionResolver`: continue, hang up, or log the completion
//! - `CallOrchestrator`: place -> race -> resolve for one call

pub mod completion;
pub mod disposition;
mod error;
pub mod events;
pub mod obs;
pub mod orchestrator;
pub mod publisher;
pub mod race;
pub mod telemetry;
pub mod webhook;

pub use completion::{CompletionLog, CompletionRecord, MemoryCompletionLog, TracingCompletionLog};
pub use disposition::{decide, Disposition, DispositionResolver, DispositionState, RaceOutcome};
pub use error::{DispositionError, OrchestrationError, RaceError, UnresolvedCause, ValidationError};
pub use events::{
    AmdEvent, AnsweredBy, CallEvent, CallStatus, EventKind, StatusEvent, AMD_QUEUE, STATUS_QUEUE,
};
pub use obs::{
    call_span, emit_call_completion, emit_call_placed, emit_disposition_resolved,
    emit_late_match_discarded, emit_race_timeout, emit_race_won, emit_webhook_publish_failed,
    emit_webhook_rejected,
};
pub use orchestrator::{CallOrchestrator, CallResult, OrchestratorConfig};
pub use publisher::EventPublisher;
pub use race::{race_consume, EventPredicate, RaceBranch, RaceWinner};
pub use webhook::{IngestOutcome, WebhookIngest};
