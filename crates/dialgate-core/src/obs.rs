//! Structured observability hooks for call lifecycle events.
//!
//! This module provides:
//! - Call-scoped tracing spans via `call_span`
//! - Emission functions for placement, race, disposition and webhook events
//!
//! `emit_call_completion` is the single log entry written per recorded
//! disposition.

use tracing::{info, warn};

/// Span tagged with the call id, for instrumenting a call's futures.
///
/// ```ignore
/// self.dispose(&call_id).instrument(call_span("CA123")).await
/// // every event inside carries call_id = "CA123"
/// ```
pub fn call_span(call_id: &str) -> tracing::Span {
    tracing::info_span!("dialgate.call", call_id = %call_id)
}

/// Emit event: provider accepted the call.
pub fn emit_call_placed(call_id: &str, destination: &str) {
    info!(event = "call.placed", call_id = %call_id, destination = %destination);
}

/// Emit event: a race branch won.
pub fn emit_race_won(branch_index: usize, queue: &str, call_id: &str, elapsed_ms: u64) {
    info!(
        event = "race.won",
        branch_index = branch_index,
        queue = %queue,
        call_id = %call_id,
        elapsed_ms = elapsed_ms,
    );
}

/// Emit event: no branch matched before the deadline.
pub fn emit_race_timeout(branches: usize, timeout_ms: u64) {
    warn!(event = "race.timeout", branches = branches, timeout_ms = timeout_ms);
}

/// Emit event: a branch claimed a match after the winner was chosen.
pub fn emit_late_match_discarded(branch_index: usize, queue: &str, call_id: &str) {
    info!(
        event = "race.late_match_discarded",
        branch_index = branch_index,
        queue = %queue,
        call_id = %call_id,
    );
}

/// Emit event: disposition decided for a call.
pub fn emit_disposition_resolved(call_id: &str, disposition: &str) {
    info!(event = "disposition.resolved", call_id = %call_id, disposition = %disposition);
}

/// Emit event: completion entry for a disposed call.
pub fn emit_call_completion(call_id: &str, answered_by: &str) {
    info!(event = "call.completion", call_id = %call_id, answered_by = %answered_by);
}

/// Emit event: a webhook body failed validation (warning level).
pub fn emit_webhook_rejected(route: &str, error: &dyn std::fmt::Display) {
    warn!(event = "webhook.rejected", route = %route, error = %error);
}

/// Emit event: a valid webhook could not be queued (warning level).
pub fn emit_webhook_publish_failed(queue: &str, call_id: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "webhook.publish_failed",
        queue = %queue,
        call_id = %call_id,
        error = %error,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_span_create() {
        let _entered = call_span("CA-test").entered();
    }
}
