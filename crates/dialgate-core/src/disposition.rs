//! Disposition resolver
//!
//! Turns the winning race event into an action on the call:
//!
//! ```text
//! Calling --race won--> AmdWon | StatusWon --resolve--> Resolved(disposition)
//! ```
//!
//! | Outcome                  | Disposition    | Side effects                          |
//! |--------------------------|----------------|---------------------------------------|
//! | AMD `human`              | `Continue`     | none                                  |
//! | AMD anything else        | `Hangup`       | terminate once, record `answered_by`  |
//! | status `completed`       | `LogCompleted` | record `unknown`                      |

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;
use twilio_voice::{CallId, TelephonyControl};

use crate::completion::{CompletionLog, CompletionRecord};
use crate::error::DispositionError;
use crate::events::{AmdEvent, AnsweredBy, CallEvent, CallStatus, StatusEvent};
use crate::obs;

/// Which event class decided the race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaceOutcome {
    AmdWon(AmdEvent),
    StatusWon(StatusEvent),
}

impl RaceOutcome {
    pub fn call_id(&self) -> &CallId {
        match self {
            RaceOutcome::AmdWon(e) => &e.call_id,
            RaceOutcome::StatusWon(e) => &e.call_id,
        }
    }
}

impl From<CallEvent> for RaceOutcome {
    fn from(event: CallEvent) -> Self {
        match event {
            CallEvent::Amd(e) => RaceOutcome::AmdWon(e),
            CallEvent::Status(e) => RaceOutcome::StatusWon(e),
        }
    }
}

/// What happens to the call once the race resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// A person answered; keep the call up.
    Continue,
    /// A machine, fax or unknown party answered; hang up.
    Hangup,
    /// The call completed before any AMD verdict.
    LogCompleted,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Continue => "continue",
            Disposition::Hangup => "hangup",
            Disposition::LogCompleted => "log_completed",
        }
    }
}

/// Pure mapping from race outcome to disposition.
pub fn decide(outcome: &RaceOutcome) -> Result<Disposition, DispositionError> {
    match outcome {
        RaceOutcome::AmdWon(e) if e.answered_by == AnsweredBy::Human => Ok(Disposition::Continue),
        RaceOutcome::AmdWon(_) => Ok(Disposition::Hangup),
        RaceOutcome::StatusWon(e) if e.call_status == CallStatus::Completed => {
            Ok(Disposition::LogCompleted)
        }
        RaceOutcome::StatusWon(e) => Err(DispositionError::UndecidableStatus {
            status: e.call_status.to_string(),
        }),
    }
}

/// Per-call disposition state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispositionState {
    Calling,
    AmdWon(AmdEvent),
    StatusWon(StatusEvent),
    Resolved(Disposition),
}

impl DispositionState {
    pub fn name(&self) -> &'static str {
        match self {
            DispositionState::Calling => "calling",
            DispositionState::AmdWon(_) => "amd_won",
            DispositionState::StatusWon(_) => "status_won",
            DispositionState::Resolved(_) => "resolved",
        }
    }

    /// `Calling -> AmdWon | StatusWon`
    pub fn race_won(self, outcome: RaceOutcome) -> Result<Self, DispositionError> {
        let next = match outcome {
            RaceOutcome::AmdWon(e) => DispositionState::AmdWon(e),
            RaceOutcome::StatusWon(e) => DispositionState::StatusWon(e),
        };
        match self {
            DispositionState::Calling => Ok(next),
            other => Err(DispositionError::IllegalTransition {
                from: other.name(),
                to: next.name(),
            }),
        }
    }

    /// `AmdWon | StatusWon -> Resolved`
    pub fn resolve(self) -> Result<Self, DispositionError> {
        let outcome = match self {
            DispositionState::AmdWon(e) => RaceOutcome::AmdWon(e),
            DispositionState::StatusWon(e) => RaceOutcome::StatusWon(e),
            other => {
                return Err(DispositionError::IllegalTransition {
                    from: other.name(),
                    to: "resolved",
                })
            }
        };
        decide(&outcome).map(DispositionState::Resolved)
    }
}

/// Applies dispositions: hangs up and records completions.
#[derive(Clone)]
pub struct DispositionResolver {
    telephony: Arc<dyn TelephonyControl>,
    completions: Arc<dyn CompletionLog>,
}

impl DispositionResolver {
    pub fn new(telephony: Arc<dyn TelephonyControl>, completions: Arc<dyn CompletionLog>) -> Self {
        Self {
            telephony,
            completions,
        }
    }

    /// Decide and apply the disposition for `outcome`.
    #[instrument(skip(self, outcome), fields(call_id = %outcome.call_id()))]
    pub async fn resolve(&self, outcome: RaceOutcome) -> Result<Disposition, DispositionError> {
        let call_id = outcome.call_id().clone();
        let answered_by = match &outcome {
            RaceOutcome::AmdWon(e) => e.answered_by,
            RaceOutcome::StatusWon(_) => AnsweredBy::Unknown,
        };

        let state = DispositionState::Calling.race_won(outcome)?.resolve()?;
        let DispositionState::Resolved(disposition) = state else {
            return Err(DispositionError::IllegalTransition {
                from: state.name(),
                to: "resolved",
            });
        };

        match disposition {
            Disposition::Continue => {}
            Disposition::Hangup => {
                self.telephony.terminate(&call_id).await?;
                self.completions
                    .record(&CompletionRecord::new(call_id.clone(), answered_by))
                    .await?;
            }
            Disposition::LogCompleted => {
                self.completions
                    .record(&CompletionRecord::new(call_id.clone(), AnsweredBy::Unknown))
                    .await?;
            }
        }

        obs::emit_disposition_resolved(call_id.as_str(), disposition.as_str());
        Ok(disposition)
    }
}
