use crate::edit::{EditStatus, FailureReason};
use crate::pipeline::RunOutcome;

/// What a worker did with one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Completed { result_ref: Option<String> },
    Failed(FailureReason),
    /// The edit was already terminal (duplicate delivery).
    Skipped(EditStatus),
    /// Infrastructure trouble; the delivery went back to the queue.
    Requeued { error: String },
    /// The delivery was acknowledged without a pipeline outcome.
    Dropped { error: String },
}

impl From<RunOutcome> for JobResult {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Completed { result_ref, .. } => JobResult::Completed { result_ref },
            RunOutcome::Failed(reason) => JobResult::Failed(reason),
            RunOutcome::AlreadyTerminal(status) => JobResult::Skipped(status),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub edit_id: String,
    pub worker_id: usize,
    /// Delivery number of the queue item, 1 on first delivery.
    pub delivery: u32,
    pub result: JobResult,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.result, JobResult::Completed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::ProcessingStage;
    use crate::error::ErrorKind;

    #[test]
    fn test_from_run_outcome() {
        let completed = JobResult::from(RunOutcome::Completed {
            result_ref: Some("mem://r".into()),
            warnings: vec![],
        });
        assert_eq!(
            completed,
            JobResult::Completed {
                result_ref: Some("mem://r".into())
            }
        );

        let reason = FailureReason::new(ProcessingStage::AiProcessing, ErrorKind::Permanent, "x");
        assert_eq!(
            JobResult::from(RunOutcome::Failed(reason.clone())),
            JobResult::Failed(reason)
        );
        assert_eq!(
            JobResult::from(RunOutcome::AlreadyTerminal(EditStatus::Completed)),
            JobResult::Skipped(EditStatus::Completed)
        );
    }

    #[test]
    fn test_is_success() {
        let outcome = JobOutcome {
            edit_id: "e".into(),
            worker_id: 0,
            delivery: 1,
            result: JobResult::Dropped {
                error: "gone".into(),
            },
        };
        assert!(!outcome.is_success());
    }
}
