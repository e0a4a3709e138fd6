//! Call orchestrator: place, race, resolve.

use std::sync::Arc;
use std::time::Duration;

use dialgate_queue::BrokerConnection;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, Instrument};
use twilio_voice::{CallId, TelephonyControl};

use crate::completion::CompletionLog;
use crate::disposition::{Disposition, DispositionResolver, RaceOutcome};
use crate::error::{OrchestrationError, RaceError, UnresolvedCause};
use crate::obs;
use crate::race::{race_consume, EventPredicate, RaceBranch};

const DEFAULT_RACE_TIMEOUT_SECS: u64 = 60;

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// How long to wait for an AMD verdict or completion after dialing
    pub race_timeout: Duration,
}

impl OrchestratorConfig {
    pub fn with_race_timeout(mut self, race_timeout: Duration) -> Self {
        self.race_timeout = race_timeout;
        self
    }

    /// Reads `RACE_TIMEOUT_SECS` (default: 60). Unparsable values fall back
    /// to the default.
    pub fn from_env() -> Self {
        let secs = std::env::var("RACE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_RACE_TIMEOUT_SECS);
        Self {
            race_timeout: Duration::from_secs(secs),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            race_timeout: Duration::from_secs(DEFAULT_RACE_TIMEOUT_SECS),
        }
    }
}

/// Outcome of one call attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResult {
    pub call_id: CallId,
    /// True iff AMD reported a human
    pub human: bool,
}

/// Places calls and waits for their disposition.
#[derive(Clone)]
pub struct CallOrchestrator {
    telephony: Arc<dyn TelephonyControl>,
    connection: Arc<BrokerConnection>,
    resolver: DispositionResolver,
    config: OrchestratorConfig,
}

impl CallOrchestrator {
    pub fn new(
        telephony: Arc<dyn TelephonyControl>,
        connection: Arc<BrokerConnection>,
        completions: Arc<dyn CompletionLog>,
        config: OrchestratorConfig,
    ) -> Self {
        let resolver = DispositionResolver::new(Arc::clone(&telephony), completions);
        Self {
            telephony,
            connection,
            resolver,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Dial `destination` and block until the call is disposed.
    ///
    /// `session` is the routing token echoed on both webhooks.
    #[instrument(skip(self, session), fields(to = %destination))]
    pub async fn make_call(
        &self,
        destination: &str,
        session: Option<&str>,
    ) -> Result<CallResult, OrchestrationError> {
        let call = self
            .telephony
            .place(destination, session)
            .await
            .map_err(OrchestrationError::NotPlaced)?;
        let call_id = call.call_id;
        let span = obs::call_span(call_id.as_str());
        span.in_scope(|| obs::emit_call_placed(call_id.as_str(), &call.destination));

        let unresolved = |source: UnresolvedCause| OrchestrationError::Unresolved {
            call_id: call_id.clone(),
            source,
        };

        let disposition = self
            .dispose(&call_id)
            .instrument(span)
            .await
            .map_err(unresolved)?;

        let human = disposition == Disposition::Continue;
        info!(call_id = %call_id, human, "call resolved");
        Ok(CallResult { call_id, human })
    }

    async fn dispose(&self, call_id: &CallId) -> Result<Disposition, UnresolvedCause> {
        let branches = vec![
            RaceBranch::on_default_queue(EventPredicate::MatchAmd {
                call_id: call_id.clone(),
            })
            .map_err(RaceError::from)?,
            RaceBranch::on_default_queue(EventPredicate::MatchStatusCompleted {
                call_id: call_id.clone(),
            })
            .map_err(RaceError::from)?,
        ];

        let winner = race_consume(&self.connection, branches, self.config.race_timeout).await?;
        let disposition = self.resolver.resolve(RaceOutcome::from(winner.event)).await?;
        Ok(disposition)
    }
}
