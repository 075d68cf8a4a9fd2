//! Handles to background operations
//!
//! An operation is accepted once its task exists in the ledger. The caller gets
//! a handle immediately and may await it or drop it; dropping does not cancel
//! the work, whose outcome stays visible through the ledger.

use convoy_core::PipelineId;
use convoy_core::domain::lifecycle::OperationKind;
use convoy_core::domain::task::TaskStatus;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

/// Background operation over a set of machines
#[derive(Debug)]
pub struct OperationHandle {
    pub task_id: Uuid,
    pub operation: OperationKind,
    pub pipeline_id: PipelineId,
    join: JoinHandle<Result<TaskStatus>>,
}

impl OperationHandle {
    pub(crate) fn new(
        task_id: Uuid,
        operation: OperationKind,
        pipeline_id: PipelineId,
        join: JoinHandle<Result<TaskStatus>>,
    ) -> Self {
        Self {
            task_id,
            operation,
            pipeline_id,
            join,
        }
    }

    /// Waits for the final task status, whatever it is
    pub async fn outcome(self) -> Result<TaskStatus> {
        let (pipeline_id, operation) = (self.pipeline_id, self.operation);
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(operation_failed(
                pipeline_id,
                operation,
                format!("background task aborted: {}", e),
            )),
        }
    }

    /// Waits for completion, failing unless every machine succeeded
    pub async fn wait(self) -> Result<()> {
        let (pipeline_id, operation, task_id) = (self.pipeline_id, self.operation, self.task_id);

        match self.outcome().await {
            Ok(TaskStatus::Success) => Ok(()),
            Ok(status) => Err(operation_failed(
                pipeline_id,
                operation,
                format!("task {} finished with status {}", task_id, status),
            )),
            Err(e @ OrchestratorError::OperationFailed { .. }) => Err(e),
            Err(e) => Err(operation_failed(pipeline_id, operation, e.to_string())),
        }
    }

    /// Whether the background work has completed
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Deferred boolean outcome of an operation
///
/// Resolves to `true` when every machine succeeded and `false` when any
/// machine failed. Ledger failures surface as errors.
#[derive(Debug)]
pub struct DeferredResult<T> {
    handle: OperationHandle,
    map: fn(TaskStatus) -> T,
}

impl DeferredResult<bool> {
    pub(crate) fn succeeded(handle: OperationHandle) -> Self {
        Self {
            handle,
            map: |status| status == TaskStatus::Success,
        }
    }
}

impl<T> DeferredResult<T> {
    pub fn task_id(&self) -> Uuid {
        self.handle.task_id
    }

    pub async fn wait(self) -> Result<T> {
        let map = self.map;
        self.handle.outcome().await.map(map)
    }

    /// The underlying operation handle
    pub fn into_handle(self) -> OperationHandle {
        self.handle
    }
}

pub(crate) fn operation_failed(
    pipeline_id: PipelineId,
    operation: OperationKind,
    cause: impl Into<String>,
) -> OrchestratorError {
    OrchestratorError::OperationFailed {
        entity: "pipeline",
        id: pipeline_id.to_string(),
        operation: operation.verb().to_string(),
        cause: cause.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_with(result: Result<TaskStatus>) -> OperationHandle {
        let join = tokio::spawn(async move { result });
        OperationHandle::new(Uuid::new_v4(), OperationKind::Start, 7, join)
    }

    #[tokio::test]
    async fn test_wait_success() {
        assert!(handle_with(Ok(TaskStatus::Success)).wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_converts_partial_failure() {
        let err = handle_with(Ok(TaskStatus::PartialFailure))
            .wait()
            .await
            .unwrap_err();

        match err {
            OrchestratorError::OperationFailed {
                entity,
                id,
                operation,
                cause,
            } => {
                assert_eq!(entity, "pipeline");
                assert_eq!(id, "7");
                assert_eq!(operation, "start");
                assert!(cause.contains("PARTIAL_FAILURE"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wait_wraps_ledger_errors() {
        let err = handle_with(Err(OrchestratorError::LedgerUnavailable("gone".into())))
            .wait()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("gone"));
    }

    #[tokio::test]
    async fn test_deferred_bool() {
        let deferred = DeferredResult::succeeded(handle_with(Ok(TaskStatus::Success)));
        assert!(deferred.wait().await.unwrap());

        let deferred = DeferredResult::succeeded(handle_with(Ok(TaskStatus::Failed)));
        assert!(!deferred.wait().await.unwrap());
    }
}
