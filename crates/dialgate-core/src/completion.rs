//! Completion log: the single entry written for each recorded disposition.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use twilio_voice::CallId;

use crate::error::DispositionError;
use crate::events::AnsweredBy;
use crate::obs;

/// One completed call as recorded by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub call_id: CallId,
    /// Observed AMD verdict, `unknown` when the call completed without one
    pub answered_by: AnsweredBy,
    pub recorded_at: DateTime<Utc>,
}

impl CompletionRecord {
    pub fn new(call_id: CallId, answered_by: AnsweredBy) -> Self {
        Self {
            call_id,
            answered_by,
            recorded_at: Utc::now(),
        }
    }
}

/// Sink for completion records.
#[async_trait]
pub trait CompletionLog: Send + Sync {
    async fn record(&self, entry: &CompletionRecord) -> Result<(), DispositionError>;
}

/// Writes completion records as structured `call.completion` log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCompletionLog;

#[async_trait]
impl CompletionLog for TracingCompletionLog {
    async fn record(&self, entry: &CompletionRecord) -> Result<(), DispositionError> {
        obs::emit_call_completion(entry.call_id.as_str(), entry.answered_by.as_str());
        Ok(())
    }
}

/// In-memory completion log for tests.
#[derive(Debug, Default)]
pub struct MemoryCompletionLog {
    entries: Mutex<Vec<CompletionRecord>>,
    fail_next: Mutex<Option<String>>,
}

impl MemoryCompletionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<CompletionRecord> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fail the next `record` call with `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
    }
}

#[async_trait]
impl CompletionLog for MemoryCompletionLog {
    async fn record(&self, entry: &CompletionRecord) -> Result<(), DispositionError> {
        if let Some(reason) = self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(DispositionError::Record(reason));
        }
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_log_records_and_fails_once() {
        let log = MemoryCompletionLog::new();
        let entry = CompletionRecord::new(CallId::new("CA1"), AnsweredBy::Unknown);

        log.fail_next("disk full");
        assert!(matches!(
            log.record(&entry).await,
            Err(DispositionError::Record(_))
        ));
        log.record(&entry).await.unwrap();
        assert_eq!(log.entries(), vec![entry]);
    }

    #[tokio::test]
    async fn test_tracing_log_never_fails() {
        let entry = CompletionRecord::new(CallId::new("CA1"), AnsweredBy::Fax);
        TracingCompletionLog.record(&entry).await.unwrap();
    }
}
