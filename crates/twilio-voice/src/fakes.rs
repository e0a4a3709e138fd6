//! In-memory fake implementation of TelephonyControl for tests.
//!
//! `RecordingTelephony` hands out sequential call ids and records every
//! placement and hang-up. Failures can be scripted per operation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use crate::control::{normalize_destination, CallId, CallSession, TelephonyControl};
use crate::error::ProviderError;

/// One recorded `place` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedCall {
    pub destination: String,
    pub session: Option<String>,
    pub call_id: CallId,
}

#[derive(Default)]
struct Script {
    next_call_id: Option<CallId>,
    place_failure: Option<ProviderError>,
    terminate_failure: Option<ProviderError>,
}

/// Recording fake for `TelephonyControl`.
#[derive(Default)]
pub struct RecordingTelephony {
    placed: Mutex<Vec<PlacedCall>>,
    terminated: Mutex<Vec<CallId>>,
    script: Mutex<Script>,
    counter: AtomicUsize,
}

impl RecordingTelephony {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `call_id` for the next successful placement.
    pub fn with_call_id(self, call_id: impl Into<String>) -> Self {
        self.lock_script().next_call_id = Some(CallId::new(call_id));
        self
    }

    /// Fail the next `place` with `err`.
    pub fn fail_place(&self, err: ProviderError) {
        self.lock_script().place_failure = Some(err);
    }

    /// Fail the next `terminate` with `err`.
    pub fn fail_terminate(&self, err: ProviderError) {
        self.lock_script().terminate_failure = Some(err);
    }

    pub fn placed(&self) -> Vec<PlacedCall> {
        self.placed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn terminated(&self) -> Vec<CallId> {
        self.terminated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn terminate_count(&self) -> usize {
        self.terminated().len()
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TelephonyControl for RecordingTelephony {
    async fn place(
        &self,
        destination: &str,
        session: Option<&str>,
    ) -> Result<CallSession, ProviderError> {
        let destination = normalize_destination(destination)?;
        let call_id = {
            let mut script = self.lock_script();
            if let Some(err) = script.place_failure.take() {
                return Err(err);
            }
            let scripted = script.next_call_id.take();
            scripted
        }
        .unwrap_or_else(|| {
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            CallId(format!("CAfake{n:04}"))
        });

        self.placed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PlacedCall {
                destination: destination.clone(),
                session: session.map(str::to_string),
                call_id: call_id.clone(),
            });

        Ok(CallSession {
            call_id,
            destination,
            origin: "+15550000000".to_string(),
            created_at: Utc::now(),
        })
    }

    async fn terminate(&self, call_id: &CallId) -> Result<(), ProviderError> {
        if let Some(err) = self.lock_script().terminate_failure.take() {
            return Err(err);
        }
        self.terminated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call_id.clone());
        Ok(())
    }
}
