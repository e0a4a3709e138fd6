//! Correlated consumer race engine
//!
//! `race_consume` waits on several (queue, predicate) branches at once and
//! returns the first message that satisfies its branch's predicate:
//! - Every branch owns one consumer and runs as its own tokio task
//! - A branch acks only messages its predicate accepts; everything else
//!   stays pending for other readers
//! - The first acked match reported to the driver wins; later matches are
//!   logged and discarded. A match acked while the deadline fires still
//!   wins, since it is already gone from the queue
//! - Whatever the outcome, every consumer is canceled at the broker and
//!   every task is aborted and joined before returning
//! - After a win, losing branches get one non-blocking drain pass so a
//!   match that was already pending cannot decide the call a second time

use std::time::{Duration, Instant};

use dialgate_queue::{
    BrokerConnection, BrokerError, ConsumerTag, Delivery, QueueChannel, QueueConsumer, QueueName,
};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};
use twilio_voice::CallId;

use crate::error::RaceError;
use crate::events::{CallEvent, CallStatus, EventKind};
use crate::obs;

/// How long teardown waits for branches to finish an in-flight ack.
const TEARDOWN_GRACE: Duration = Duration::from_millis(250);

/// What a branch is waiting for. Closed set, so races stay inspectable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPredicate {
    /// Any AMD verdict for the call.
    MatchAmd { call_id: CallId },
    /// The call's `completed` status transition.
    MatchStatusCompleted { call_id: CallId },
}

impl EventPredicate {
    /// Event family this predicate decodes.
    pub fn kind(&self) -> EventKind {
        match self {
            EventPredicate::MatchAmd { .. } => EventKind::Amd,
            EventPredicate::MatchStatusCompleted { .. } => EventKind::Status,
        }
    }

    pub fn call_id(&self) -> &CallId {
        match self {
            EventPredicate::MatchAmd { call_id } => call_id,
            EventPredicate::MatchStatusCompleted { call_id } => call_id,
        }
    }

    pub fn matches(&self, event: &CallEvent) -> bool {
        match (self, event) {
            (EventPredicate::MatchAmd { call_id }, CallEvent::Amd(e)) => &e.call_id == call_id,
            (EventPredicate::MatchStatusCompleted { call_id }, CallEvent::Status(e)) => {
                &e.call_id == call_id && e.call_status == CallStatus::Completed
            }
            _ => false,
        }
    }

    /// Decode `payload` and test it. Undecodable payloads are misses.
    pub fn evaluate(&self, queue: &QueueName, payload: &[u8]) -> Option<CallEvent> {
        match self.kind().decode(payload) {
            Ok(event) if self.matches(&event) => Some(event),
            Ok(_) => None,
            Err(e) => {
                warn!(queue = %queue, error = %e, "undecodable message left pending");
                None
            }
        }
    }
}

/// One (queue, predicate) pair of a race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceBranch {
    pub queue: QueueName,
    pub predicate: EventPredicate,
}

impl RaceBranch {
    pub fn new(queue: QueueName, predicate: EventPredicate) -> Self {
        Self { queue, predicate }
    }

    /// Branch on the predicate's default queue (`voice/amd` or `voice/status`).
    pub fn on_default_queue(predicate: EventPredicate) -> Result<Self, BrokerError> {
        let queue = QueueName::new(predicate.kind().queue())?;
        Ok(Self { queue, predicate })
    }
}

/// The accepted match of a race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceWinner {
    /// Index into the branches passed to `race_consume`
    pub branch_index: usize,
    pub event: CallEvent,
    /// The acknowledged delivery, payload untouched
    pub delivery: Delivery,
}

enum BranchReport {
    Matched(RaceWinner),
    Failed { branch_index: usize, error: BrokerError },
}

/// Race `branches` against each other until one matches or `deadline`
/// elapses.
#[instrument(skip(connection, branches), fields(branches = branches.len(), deadline_ms = deadline.as_millis() as u64))]
pub async fn race_consume(
    connection: &BrokerConnection,
    branches: Vec<RaceBranch>,
    deadline: Duration,
) -> Result<RaceWinner, RaceError> {
    if branches.is_empty() {
        return Err(RaceError::NoBranches);
    }

    let started = Instant::now();
    let channel = connection.consume_channel().await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut tasks = JoinSet::new();
    let mut tags: Vec<(usize, ConsumerTag)> = Vec::with_capacity(branches.len());
    let mut last_error: Option<BrokerError> = None;

    for (branch_index, branch) in branches.iter().enumerate() {
        let consumer = match open_consumer(channel.as_ref(), &branch.queue).await {
            Ok(consumer) => consumer,
            Err(error) => {
                warn!(branch_index, queue = %branch.queue, error = %error, "branch failed to start");
                last_error = Some(error);
                continue;
            }
        };
        tags.push((branch_index, consumer.tag().clone()));
        tasks.spawn(run_branch(
            branch_index,
            branch.predicate.clone(),
            consumer,
            tx.clone(),
        ));
    }
    drop(tx);

    let live = tags.len();
    let mut outcome = if live == 0 {
        Err(RaceError::Broker(last_error.unwrap_or(BrokerError::ChannelClosed {
            channel: channel.id().to_string(),
        })))
    } else {
        match tokio::time::timeout(deadline, await_winner(&mut rx, live, last_error)).await {
            Ok(result) => result.map_err(RaceError::Broker),
            Err(_) => Err(RaceError::Timeout(deadline)),
        }
    };

    // Tear down: cancel at the broker first so no further deliveries are
    // made, then stop and reap every branch task. Canceled consumers fail
    // their pending `next`, so only a branch mid-ack outlives the grace.
    for (branch_index, tag) in &tags {
        if let Err(e) = channel.cancel(tag).await {
            warn!(branch_index, tag = %tag, error = %e, "consumer cancel failed");
        }
    }
    let _ = tokio::time::timeout(TEARDOWN_GRACE, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}

    while let Ok(report) = rx.try_recv() {
        let BranchReport::Matched(late) = report else {
            continue;
        };
        if matches!(outcome, Err(RaceError::Timeout(_))) {
            debug!(branch_index = late.branch_index, "match acked at the deadline accepted");
            outcome = Ok(late);
        } else {
            let queue = &branches[late.branch_index].queue;
            obs::emit_late_match_discarded(
                late.branch_index,
                queue.as_str(),
                late.event.call_id().as_str(),
            );
        }
    }

    if matches!(outcome, Err(RaceError::Timeout(_))) {
        obs::emit_race_timeout(branches.len(), deadline.as_millis() as u64);
    }
    let winner = outcome?;
    obs::emit_race_won(
        winner.branch_index,
        winner.delivery.queue.as_str(),
        winner.event.call_id().as_str(),
        started.elapsed().as_millis() as u64,
    );

    for (branch_index, branch) in branches.iter().enumerate() {
        if branch_index != winner.branch_index {
            drain_branch(channel.as_ref(), branch_index, branch).await;
        }
    }

    Ok(winner)
}

async fn open_consumer(
    channel: &dyn QueueChannel,
    queue: &QueueName,
) -> Result<Box<dyn QueueConsumer>, BrokerError> {
    channel.assert_queue(queue).await?;
    channel.consume(queue).await
}

async fn await_winner(
    rx: &mut mpsc::UnboundedReceiver<BranchReport>,
    mut live: usize,
    mut last_error: Option<BrokerError>,
) -> Result<RaceWinner, BrokerError> {
    while let Some(report) = rx.recv().await {
        match report {
            BranchReport::Matched(winner) => return Ok(winner),
            BranchReport::Failed {
                branch_index,
                error,
            } => {
                warn!(branch_index, error = %error, "race branch failed");
                last_error = Some(error);
                live -= 1;
                if live == 0 {
                    break;
                }
            }
        }
    }
    Err(last_error.unwrap_or(BrokerError::ShutDown))
}

async fn run_branch(
    branch_index: usize,
    predicate: EventPredicate,
    mut consumer: Box<dyn QueueConsumer>,
    tx: mpsc::UnboundedSender<BranchReport>,
) {
    let report = match claim_next_match(&predicate, consumer.as_mut()).await {
        Ok((event, delivery)) => BranchReport::Matched(RaceWinner {
            branch_index,
            event,
            delivery,
        }),
        Err(error) => BranchReport::Failed {
            branch_index,
            error,
        },
    };
    // The driver may already be gone.
    let _ = tx.send(report);
}

async fn claim_next_match(
    predicate: &EventPredicate,
    consumer: &mut dyn QueueConsumer,
) -> Result<(CallEvent, Delivery), BrokerError> {
    loop {
        let delivery = consumer.next().await?;
        let Some(event) = predicate.evaluate(&delivery.queue, &delivery.payload) else {
            continue;
        };
        if consumer.ack(&delivery).await? {
            return Ok((event, delivery));
        }
        debug!(message_id = %delivery.message_id, "match claimed by another reader");
    }
}

/// Ack every already-pending message on a losing branch that its predicate
/// accepts. Never waits for new messages.
async fn drain_branch(channel: &dyn QueueChannel, branch_index: usize, branch: &RaceBranch) {
    let mut consumer = match channel.consume(&branch.queue).await {
        Ok(consumer) => consumer,
        Err(e) => {
            warn!(branch_index, queue = %branch.queue, error = %e, "drain skipped");
            return;
        }
    };

    loop {
        let delivery = match consumer.try_next().await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => break,
            Err(e) => {
                warn!(branch_index, queue = %branch.queue, error = %e, "drain interrupted");
                break;
            }
        };
        let Some(event) = branch.predicate.evaluate(&delivery.queue, &delivery.payload) else {
            continue;
        };
        match consumer.ack(&delivery).await {
            Ok(true) => obs::emit_late_match_discarded(
                branch_index,
                branch.queue.as_str(),
                event.call_id().as_str(),
            ),
            Ok(false) => {}
            Err(e) => {
                warn!(branch_index, error = %e, "drain ack failed");
                break;
            }
        }
    }

    let tag = consumer.tag().clone();
    if let Err(e) = channel.cancel(&tag).await {
        warn!(branch_index, tag = %tag, error = %e, "drain consumer cancel failed");
    }
}
