//! Error taxonomy for call correlation and disposition.

use dialgate_queue::BrokerError;
use twilio_voice::{CallId, ProviderError};

/// Errors produced while parsing an inbound webhook body.
///
/// Always logged and acknowledged; the provider never sees them.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("webhook body is not valid form data: {0}")]
    MalformedBody(String),

    #[error("webhook missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("unrecognized {field} value: {value:?}")]
    UnknownValue { field: &'static str, value: String },
}

/// Errors produced by the race engine.
#[derive(Debug, thiserror::Error)]
pub enum RaceError {
    #[error("race started with no branches")]
    NoBranches,

    #[error("no branch matched within {0:?}")]
    Timeout(std::time::Duration),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// Errors produced by the disposition resolver.
#[derive(Debug, thiserror::Error)]
pub enum DispositionError {
    #[error("illegal disposition transition: {from} -> {to}")]
    IllegalTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("status {status} cannot decide a call")]
    UndecidableStatus { status: String },

    #[error("hangup failed: {0}")]
    Hangup(#[from] ProviderError),

    #[error("completion record failed: {0}")]
    Record(String),
}

/// Cause of a placed call ending without a disposition.
#[derive(Debug, thiserror::Error)]
pub enum UnresolvedCause {
    #[error(transparent)]
    Race(#[from] RaceError),

    #[error(transparent)]
    Disposition(#[from] DispositionError),
}

/// The single failure shape returned by `CallOrchestrator::make_call`.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    /// The provider refused the call; nothing was dialed.
    #[error("call was not placed: {0}")]
    NotPlaced(#[source] ProviderError),

    /// The call was dialed but could not be resolved.
    #[error("call {call_id} placed but unresolved: {source}")]
    Unresolved {
        call_id: CallId,
        #[source]
        source: UnresolvedCause,
    },
}

impl OrchestrationError {
    /// Provider call id, when the call got that far.
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            OrchestrationError::NotPlaced(_) => None,
            OrchestrationError::Unresolved { call_id, .. } => Some(call_id),
        }
    }

    /// True when the race deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            OrchestrationError::Unresolved {
                source: UnresolvedCause::Race(RaceError::Timeout(_)),
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_orchestration_error_distinguishes_placement() {
        let not_placed = OrchestrationError::NotPlaced(ProviderError::Http("refused".into()));
        assert!(not_placed.call_id().is_none());
        assert!(!not_placed.is_timeout());
        assert!(not_placed.to_string().contains("not placed"));

        let unresolved = OrchestrationError::Unresolved {
            call_id: CallId::new("CA1"),
            source: RaceError::Timeout(Duration::from_secs(1)).into(),
        };
        assert_eq!(unresolved.call_id(), Some(&CallId::new("CA1")));
        assert!(unresolved.is_timeout());
        assert!(unresolved.to_string().contains("CA1"));
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::MissingField { field: "CallSid" };
        assert!(err.to_string().contains("CallSid"));
    }
}
