//! Call control abstraction
//!
//! `TelephonyControl` is the seam between call orchestration and the
//! provider: `place` dials and returns the provider's call id, `terminate`
//! hangs up. Both trigger real-world side effects and are never retried.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Provider-assigned identifier of one outbound call attempt (`CallSid`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub String);

impl CallId {
    pub fn new(sid: impl Into<String>) -> Self {
        CallId(sid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One placed call. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSession {
    pub call_id: CallId,
    pub destination: String,
    pub origin: String,
    pub created_at: DateTime<Utc>,
}

/// Outbound call control.
#[async_trait]
pub trait TelephonyControl: Send + Sync {
    /// Dial `destination`. `session` is echoed back on both webhook
    /// callbacks so upstream collaborators can route the events.
    async fn place(
        &self,
        destination: &str,
        session: Option<&str>,
    ) -> Result<CallSession, ProviderError>;

    /// Hang up a call in progress.
    async fn terminate(&self, call_id: &CallId) -> Result<(), ProviderError>;
}

/// Trim and sanity-check a destination number before dialing.
pub fn normalize_destination(destination: &str) -> Result<String, ProviderError> {
    let trimmed = destination.trim();
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ProviderError::InvalidDestination(destination.to_string()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_destination() {
        assert_eq!(normalize_destination(" +15551234567 ").unwrap(), "+15551234567");
        assert_eq!(normalize_destination("5551234").unwrap(), "5551234");
        assert!(normalize_destination("").is_err());
        assert!(normalize_destination("+").is_err());
        assert!(normalize_destination("555-CALL").is_err());
    }

    #[test]
    fn test_call_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&CallId::new("CA1")).unwrap();
        assert_eq!(json, "\"CA1\"");
    }
}
