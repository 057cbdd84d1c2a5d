// Job runner - executes one dequeued job and classifies the result

use super::{handler_for, JobOutcome, WorkerContext};
use crate::queue::{Envelope, QueueName};

/// Run `job` through the handler bound to `queue`. A panicking handler is
/// caught and reported as a failure so the worker loop keeps going.
pub fn run_job(ctx: &WorkerContext, queue: QueueName, job: &Envelope) -> JobOutcome {
    log::debug!("[{}] Job data: {}", queue, job.to_json().unwrap_or_default());

    let handler = handler_for(queue);
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler.handle(ctx, job)));

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(_) => JobOutcome::failed(-1, "handler panicked"),
    };
    log_outcome(queue, job, &outcome);
    outcome
}

fn log_outcome(queue: QueueName, job: &Envelope, outcome: &JobOutcome) {
    match outcome {
        JobOutcome::Success => log::info!("[{}] Completed job {} successfully", queue, job.id),
        JobOutcome::Warning(msg) => {
            log::warn!("[{}] Job {} complete, but with warnings: {}", queue, job.id, msg)
        }
        JobOutcome::Failed { code, reason } => {
            log::error!("[{}] Job {} failed. rval = {} ({})", queue, job.id, code, reason)
        }
    }
}
