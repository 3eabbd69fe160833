// Turns the engine's completion callback into something a request handler
// can wait on

use coderun_common::types::{Job, JobOutcome};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::engine::JobListener;

/// How the wait for a job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitVerdict {
    Completed(JobOutcome),
    TimedOut,
    ClientClosed,
}

/// Listener that forwards the first terminal state of a job into `tx`.
///
/// Non-terminal states are ignored. Once an outcome has been delivered, or the
/// receiving side has gone away, further calls do nothing.
pub fn outcome_listener(tx: oneshot::Sender<JobOutcome>) -> JobListener {
    let slot = Mutex::new(Some(tx));
    Box::new(move |job: &Job| {
        let Some(outcome) = job.outcome() else {
            return;
        };
        let sender = slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(sender) = sender {
            // receiver gone means the request already answered
            let _ = sender.send(outcome);
        }
    })
}

/// Wait for whichever comes first: the job outcome, the deadline, or the
/// client going away.
///
/// A sender dropped without an outcome never resolves the wait; the deadline
/// still bounds it.
pub async fn await_outcome<F>(
    outcome: oneshot::Receiver<JobOutcome>,
    deadline: Duration,
    client_closed: F,
) -> WaitVerdict
where
    F: Future<Output = ()>,
{
    let delivered = async move {
        match outcome.await {
            Ok(outcome) => outcome,
            Err(_) => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        outcome = delivered => WaitVerdict::Completed(outcome),
        _ = client_closed => WaitVerdict::ClientClosed,
        _ = tokio::time::sleep(deadline) => WaitVerdict::TimedOut,
    }
}
