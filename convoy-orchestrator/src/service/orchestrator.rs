//! Orchestrator
//!
//! Fans an operation out over a set of machines. Each machine runs its step
//! sequence on a shared bounded pool while the task ledger records progress;
//! once every machine is done the per-machine outcomes are folded into the
//! task status.
//!
//! One machine failing never cancels its siblings. Inside one machine the
//! first failed step ends the sequence and the remaining steps are skipped.
//! Ledger failures are fatal to the whole task.

use convoy_core::domain::lifecycle::{MachineState, OperationKind};
use convoy_core::domain::machine::MachineAssignment;
use convoy_core::domain::pipeline::{ConfigUpdate, PipelineInstance};
use convoy_core::domain::task::{MachineOutcome, StepStatus, Task, TaskStatus};
use convoy_core::dto::task::TaskDetail;
use convoy_core::{MachineId, PipelineId};
use convoy_ssh::{MachineTarget, RemoteError, RemoteExecutor, ResolvedTarget};
use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::commands::{self, DeployLayout, StepKind};
use super::handle::{DeferredResult, OperationHandle};
use super::in_flight::{Claim, InFlight};
use super::ledger::TaskLedger;
use crate::config::Config;
use crate::error::{OrchestratorError, Result};
use crate::lookup::PipelineLookup;
use crate::repository::{MachineStateRepository, TaskRepository};

/// Drives lifecycle operations for pipeline instances across machines
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    executor: Arc<dyn RemoteExecutor>,
    pipelines: Arc<dyn PipelineLookup>,
    ledger: TaskLedger,
    states: Arc<dyn MachineStateRepository>,
    pool: Semaphore,
    in_flight: InFlight,
}

/// Work prepared for one machine before the task is spawned
struct MachineUnit {
    target: MachineTarget,
    layout: DeployLayout,
    state: MachineState,
    known_pid: Option<String>,
    steps: Vec<(StepKind, Uuid)>,
    _claim: Claim<(PipelineId, MachineId)>,
}

/// Package bytes read once per task and shared by every machine
enum SharedPackage {
    NotNeeded,
    Loaded(Arc<[u8]>),
    Unreadable(io::ErrorKind, String),
}

impl SharedPackage {
    async fn load(pipeline: &PipelineInstance, needed: bool) -> Self {
        if !needed {
            return SharedPackage::NotNeeded;
        }
        match tokio::fs::read(&pipeline.package_path).await {
            Ok(bytes) => SharedPackage::Loaded(bytes.into()),
            Err(e) => {
                warn!(pipeline_id = pipeline.id, "Cannot read package {}: {}", pipeline.package_path, e);
                SharedPackage::Unreadable(e.kind(), e.to_string())
            }
        }
    }

    fn bytes(&self) -> Result<Arc<[u8]>> {
        match self {
            SharedPackage::Loaded(bytes) => Ok(Arc::clone(bytes)),
            SharedPackage::Unreadable(kind, message) => {
                Err(io::Error::new(*kind, message.clone()).into())
            }
            SharedPackage::NotNeeded => {
                Err(io::Error::new(io::ErrorKind::NotFound, "package was not loaded").into())
            }
        }
    }
}

/// Mutable context threaded through one machine's steps
struct StepContext<'a> {
    pipeline: &'a PipelineInstance,
    package: &'a SharedPackage,
    target: &'a ResolvedTarget,
    layout: &'a DeployLayout,
    known_pid: Option<String>,
    pid: Option<String>,
}

/// What `recover_interrupted` repaired
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub machines_recovered: usize,
    pub tasks_finalized: usize,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        executor: Arc<dyn RemoteExecutor>,
        pipelines: Arc<dyn PipelineLookup>,
        tasks: Arc<dyn TaskRepository>,
        states: Arc<dyn MachineStateRepository>,
    ) -> Self {
        if config.max_parallel_machines == 0 {
            warn!("max_parallel_machines is 0, running one machine at a time");
        }
        let pool = Semaphore::new(config.max_parallel_machines.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                executor,
                pipelines,
                ledger: TaskLedger::new(tasks),
                states,
                pool,
                in_flight: InFlight::default(),
            }),
        }
    }

    pub fn ledger(&self) -> &TaskLedger {
        &self.inner.ledger
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Deploys the package and configuration to every machine
    pub async fn initialize(
        &self,
        pipeline: PipelineInstance,
        machines: Vec<MachineTarget>,
    ) -> Result<OperationHandle> {
        self.launch(OperationKind::Initialize, pipeline, machines).await
    }

    /// Launches the process on every machine and verifies it stays up
    pub async fn start(
        &self,
        pipeline: PipelineInstance,
        machines: Vec<MachineTarget>,
    ) -> Result<OperationHandle> {
        self.launch(OperationKind::Start, pipeline, machines).await
    }

    pub async fn stop(
        &self,
        pipeline_id: PipelineId,
        machines: Vec<MachineTarget>,
    ) -> Result<OperationHandle> {
        let pipeline = self.inner.pipelines.get_pipeline(pipeline_id).await?;
        self.launch(OperationKind::Stop, pipeline, machines).await
    }

    /// Kills the process on every machine without a grace period
    ///
    /// Machines end `NotStarted` whether or not the kill succeeded.
    pub async fn force_stop(
        &self,
        pipeline_id: PipelineId,
        machines: Vec<MachineTarget>,
    ) -> Result<OperationHandle> {
        let pipeline = self.inner.pipelines.get_pipeline(pipeline_id).await?;
        self.launch(OperationKind::ForceStop, pipeline, machines).await
    }

    /// Writes the supplied configuration files to deployed machines
    ///
    /// Storing the new content with the pipeline definition is the caller's job.
    pub async fn update_config(
        &self,
        pipeline_id: PipelineId,
        machines: Vec<MachineTarget>,
        update: ConfigUpdate,
    ) -> Result<OperationHandle> {
        if update.is_empty() {
            return Err(OrchestratorError::Validation(format!(
                "no configuration supplied to update pipeline {}",
                pipeline_id
            )));
        }
        let pipeline = self.inner.pipelines.get_pipeline(pipeline_id).await?;
        self.launch(OperationKind::UpdateConfig, update.staged(&pipeline), machines)
            .await
    }

    /// Rewrites every configuration file from the stored pipeline definition
    pub async fn refresh_config(
        &self,
        pipeline_id: PipelineId,
        machines: Vec<MachineTarget>,
    ) -> Result<OperationHandle> {
        let pipeline = self.inner.pipelines.get_pipeline(pipeline_id).await?;
        self.launch(OperationKind::RefreshConfig, pipeline, machines).await
    }

    /// Removes the deployment directory; resolves to whether every machine succeeded
    pub async fn delete_directory(
        &self,
        pipeline_id: PipelineId,
        machines: Vec<MachineTarget>,
    ) -> Result<DeferredResult<bool>> {
        let pipeline = self.inner.pipelines.get_pipeline(pipeline_id).await?;
        let handle = self
            .launch(OperationKind::DeleteDirectory, pipeline, machines)
            .await?;
        Ok(DeferredResult::succeeded(handle))
    }

    /// Checks that a machine accepts SSH sessions
    pub async fn test_connection(&self, machine: &MachineTarget) -> Result<()> {
        let target = machine.resolve()?;
        self.inner.executor.test_connection(&target).await?;
        info!(machine_id = machine.id, "Connection to {} succeeded", machine.host);
        Ok(())
    }

    // =========================================================================
    // Lifecycle state
    // =========================================================================

    /// Lifecycle states of every machine assigned to a pipeline
    pub async fn pipeline_status(&self, pipeline_id: PipelineId) -> Result<Vec<MachineAssignment>> {
        self.inner.states.list_for_pipeline(pipeline_id).await
    }

    /// Creates `Initializing` pairings; existing pairings are left untouched
    pub async fn register_machines(
        &self,
        pipeline_id: PipelineId,
        machine_ids: &[MachineId],
    ) -> Result<Vec<MachineAssignment>> {
        let mut assignments = Vec::with_capacity(machine_ids.len());
        for machine_id in machine_ids {
            assignments.push(self.inner.states.create(pipeline_id, *machine_id).await?);
        }
        Ok(assignments)
    }

    /// Repairs records left behind by a process that died mid-operation
    ///
    /// Machines stuck in an in-progress state move along their failure edge so
    /// the operation can be retried. Machines still `Initializing` without any
    /// initialize history are fresh pairings and stay as they are. Unfinished
    /// tasks get their dangling steps closed and are finalized.
    pub async fn recover_interrupted(&self) -> Result<RecoveryReport> {
        let inner = &self.inner;
        let mut report = RecoveryReport::default();

        for assignment in inner.states.list_all().await? {
            let (pipeline_id, machine_id) = (assignment.pipeline_id, assignment.machine_id);
            if !assignment.state.is_in_progress()
                || inner.in_flight.is_machine_busy(pipeline_id, machine_id)
            {
                continue;
            }

            let failed = match assignment.state {
                MachineState::Starting => MachineState::StartFailed,
                MachineState::Stopping => MachineState::StopFailed,
                MachineState::Initializing => {
                    if !inner
                        .ledger
                        .has_history(pipeline_id, machine_id, OperationKind::Initialize)
                        .await?
                    {
                        continue;
                    }
                    MachineState::InitializeFailed
                }
                _ => continue,
            };

            assignment.state.transition_to(failed)?;
            inner.states.set_state(pipeline_id, machine_id, failed).await?;
            warn!(
                pipeline_id,
                machine_id, "Recovered interrupted machine: {} -> {}", assignment.state, failed
            );
            report.machines_recovered += 1;
        }

        for task in inner.ledger.list_unfinished().await? {
            if inner.in_flight.is_task_running(task.id) {
                continue;
            }

            for step in inner.ledger.get_steps(task.id).await? {
                match step.status {
                    StepStatus::Running => {
                        inner
                            .ledger
                            .update_step(
                                step.id,
                                StepStatus::Failed,
                                Some("interrupted before completion".to_string()),
                            )
                            .await?
                    }
                    StepStatus::Pending => {
                        inner
                            .ledger
                            .update_step(step.id, StepStatus::Skipped, None)
                            .await?
                    }
                    _ => {}
                }
            }

            let status = inner.ledger.aggregate_status(task.id).await?;
            inner
                .ledger
                .finalize_task(
                    task.id,
                    status,
                    Some("interrupted by orchestrator restart".to_string()),
                )
                .await?;
            warn!(task_id = %task.id, pipeline_id = task.pipeline_id, "Finalized interrupted task as {}", status);
            report.tasks_finalized += 1;
        }

        info!(
            "Recovery complete: {} machine(s), {} task(s)",
            report.machines_recovered, report.tasks_finalized
        );
        Ok(report)
    }

    // =========================================================================
    // Ledger queries
    // =========================================================================

    pub async fn latest_task(&self, pipeline_id: PipelineId) -> Result<Option<TaskDetail>> {
        self.inner.ledger.get_latest_task(pipeline_id).await
    }

    pub async fn task_detail(&self, task_id: Uuid) -> Result<TaskDetail> {
        self.inner.ledger.get_task_detail(task_id).await
    }

    pub async fn tasks(&self, pipeline_id: PipelineId) -> Result<Vec<Task>> {
        self.inner.ledger.list_tasks(pipeline_id).await
    }

    pub async fn task_ids(&self, pipeline_id: PipelineId) -> Result<Vec<Uuid>> {
        self.inner.ledger.list_task_ids(pipeline_id).await
    }

    /// Deletes a finished task and its steps
    pub async fn delete_task(&self, task_id: Uuid) -> Result<bool> {
        if self.inner.in_flight.is_task_running(task_id) {
            return Err(OrchestratorError::Validation(format!(
                "task {} is still running",
                task_id
            )));
        }
        self.inner.ledger.delete_task(task_id).await
    }

    /// Deletes every task of a pipeline, typically when the pipeline is removed
    pub async fn delete_pipeline_tasks(&self, pipeline_id: PipelineId) -> Result<u64> {
        if self.inner.in_flight.is_pipeline_busy(pipeline_id) {
            return Err(OrchestratorError::Validation(format!(
                "pipeline {} has an operation in progress",
                pipeline_id
            )));
        }
        self.inner.ledger.delete_tasks_for_pipeline(pipeline_id).await
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Validates, records the task and its steps, then spawns the work
    async fn launch(
        &self,
        operation: OperationKind,
        pipeline: PipelineInstance,
        machines: Vec<MachineTarget>,
    ) -> Result<OperationHandle> {
        let inner = &self.inner;
        let pipeline_id = pipeline.id;

        if machines.is_empty() {
            return Err(OrchestratorError::Validation(format!(
                "no machines given to {} pipeline {}",
                operation, pipeline_id
            )));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = machines.iter().find(|m| !seen.insert(m.id)) {
            return Err(OrchestratorError::Validation(format!(
                "machine {} listed more than once",
                dup.id
            )));
        }

        let plan = commands::plan(operation, &pipeline);
        if plan.is_empty() {
            return Err(OrchestratorError::Validation(format!(
                "nothing to {} for pipeline {}",
                operation, pipeline_id
            )));
        }

        let machine_ids: Vec<MachineId> = machines.iter().map(|m| m.id).collect();
        let claims = inner
            .in_flight
            .claim_machines(pipeline_id, &machine_ids)
            .map_err(|busy| {
                OrchestratorError::Validation(format!(
                    "machine {} already has an operation in progress for pipeline {}",
                    busy, pipeline_id
                ))
            })?;

        let mut units = Vec::with_capacity(machines.len());
        let mut unregistered = Vec::new();
        for (target, claim) in machines.into_iter().zip(claims) {
            let (state, known_pid) = match inner.states.get(pipeline_id, target.id).await? {
                Some(assignment) => (assignment.state, assignment.process_pid),
                None if operation == OperationKind::Initialize => {
                    unregistered.push(target.id);
                    (MachineState::Initializing, None)
                }
                None => {
                    return Err(OrchestratorError::Validation(format!(
                        "machine {} is not assigned to pipeline {}",
                        target.id, pipeline_id
                    )));
                }
            };

            operation.validate_from(state).map_err(|e| {
                OrchestratorError::Validation(format!("machine {}: {}", target.id, e))
            })?;

            let layout =
                DeployLayout::resolve(&pipeline, &inner.config.deploy_base_dir, &target.username)?;

            units.push(MachineUnit {
                target,
                layout,
                state,
                known_pid,
                steps: Vec::new(),
                _claim: claim,
            });
        }

        for machine_id in unregistered {
            inner.states.create(pipeline_id, machine_id).await?;
        }

        let names: Vec<&str> = plan.iter().map(|s| s.as_str()).collect();

        // The task id is owned by this process before it appears in the ledger
        let task = Task::new(pipeline_id, operation);
        let task_id = task.id;
        let task_claim = inner.in_flight.claim_task(task_id);
        inner.ledger.record_task(&task).await?;

        let declared: Result<()> = async {
            for unit in &mut units {
                let ids = inner
                    .ledger
                    .declare_steps(task_id, unit.target.id, &names)
                    .await?;
                unit.steps = plan.iter().copied().zip(ids).collect();
            }
            inner.ledger.mark_task_running(task_id).await
        }
        .await;

        if let Err(e) = declared {
            if let Err(finalize) = inner
                .ledger
                .finalize_task(task_id, TaskStatus::Failed, Some(e.to_string()))
                .await
            {
                warn!(%task_id, "Could not finalize task after failed dispatch: {}", finalize);
            }
            return Err(e);
        }

        info!(
            %task_id,
            pipeline_id,
            "Dispatching {} to {} machine(s)",
            operation,
            units.len()
        );

        let driver = Arc::clone(inner);
        let pipeline = Arc::new(pipeline);
        let join = tokio::spawn(async move {
            let _task_claim = task_claim;
            let result = Arc::clone(&driver)
                .drive(task_id, operation, pipeline, units)
                .await;
            if let Err(e) = &result {
                error!(
                    entity = "pipeline",
                    id = pipeline_id,
                    operation = %operation,
                    %task_id,
                    "Operation aborted: {}",
                    e
                );
            }
            result
        });

        Ok(OperationHandle::new(task_id, operation, pipeline_id, join))
    }
}

impl Inner {
    /// Runs every machine unit and finalizes the task
    async fn drive(
        self: Arc<Self>,
        task_id: Uuid,
        operation: OperationKind,
        pipeline: Arc<PipelineInstance>,
        units: Vec<MachineUnit>,
    ) -> Result<TaskStatus> {
        let pipeline_id = pipeline.id;
        let mut handles = Vec::with_capacity(units.len());

        let uploads = units
            .iter()
            .any(|u| u.steps.iter().any(|(kind, _)| *kind == StepKind::UploadPackage));
        let package = Arc::new(SharedPackage::load(&pipeline, uploads).await);

        for unit in units {
            let inner = Arc::clone(&self);
            let pipeline = Arc::clone(&pipeline);
            let package = Arc::clone(&package);
            let machine_id = unit.target.id;
            let handle = tokio::spawn(async move {
                inner
                    .run_machine(task_id, operation, &pipeline, &package, unit)
                    .await
            });
            handles.push((machine_id, handle));
        }

        let total = handles.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut fatal = None;

        for (machine_id, handle) in handles {
            match handle.await {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(e)) => {
                    error!(%task_id, pipeline_id, machine_id, "Machine unit aborted: {}", e);
                    self.abandon_machine(pipeline_id, machine_id, operation).await;
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    error!(%task_id, pipeline_id, machine_id, "Machine unit panicked: {}", e);
                    self.abandon_machine(pipeline_id, machine_id, operation).await;
                    outcomes.push(MachineOutcome::Failed);
                }
            }
        }

        if let Some(err) = fatal {
            if let Err(e) = self
                .ledger
                .finalize_task(task_id, TaskStatus::Failed, Some(err.to_string()))
                .await
            {
                warn!(%task_id, "Could not finalize aborted task: {}", e);
            }
            return Err(err);
        }

        let status = TaskStatus::from_outcomes(&outcomes);
        let failed = outcomes
            .iter()
            .filter(|o| **o != MachineOutcome::Succeeded)
            .count();
        let error_message =
            (failed > 0).then(|| format!("{} of {} machine(s) failed", failed, total));

        self.ledger
            .finalize_task(task_id, status, error_message.clone())
            .await?;

        if let Some(message) = error_message {
            warn!(
                entity = "pipeline",
                id = pipeline_id,
                operation = %operation,
                %task_id,
                "Operation finished with {}: {}",
                status,
                message
            );
        }

        Ok(status)
    }

    /// Moves a machine left in the operation's in-progress state along its
    /// failure edge, best effort
    async fn abandon_machine(
        &self,
        pipeline_id: PipelineId,
        machine_id: MachineId,
        operation: OperationKind,
    ) {
        let (Some(in_progress), Some(failed)) =
            (operation.in_progress_state(), operation.failure_state())
        else {
            return;
        };

        let result = match self.states.get(pipeline_id, machine_id).await {
            Ok(Some(assignment)) if assignment.state == in_progress => self
                .move_state(pipeline_id, machine_id, in_progress, failed)
                .await
                .map(|_| ()),
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!(pipeline_id, machine_id, "Could not record failure state: {}", e);
        }
    }

    /// Runs one machine's steps in order
    ///
    /// Remote failures are recorded and reported as `MachineOutcome::Failed`;
    /// only ledger and state-store errors are returned as `Err`.
    async fn run_machine(
        &self,
        task_id: Uuid,
        operation: OperationKind,
        pipeline: &PipelineInstance,
        package: &SharedPackage,
        unit: MachineUnit,
    ) -> Result<MachineOutcome> {
        let MachineUnit {
            target,
            layout,
            mut state,
            known_pid,
            steps,
            _claim,
        } = unit;
        let (pipeline_id, machine_id) = (pipeline.id, target.id);

        let _permit = self.pool.acquire().await.map_err(|_| {
            OrchestratorError::Validation("machine pool has been closed".to_string())
        })?;

        debug!(%task_id, pipeline_id, machine_id, "Running {} on {}", operation, target.host);

        if let Some(in_progress) = operation.in_progress_state() {
            if state != in_progress {
                state = self.move_state(pipeline_id, machine_id, state, in_progress).await?;
            }
        }

        let resolved = match target.resolve() {
            Ok(resolved) => resolved,
            Err(e) => {
                if let Some((kind, step_id)) = steps.first() {
                    self.ledger
                        .update_step(*step_id, StepStatus::Running, None)
                        .await?;
                    return self
                        .fail_machine(task_id, operation, pipeline_id, machine_id, state, *kind, *step_id, e.into())
                        .await;
                }
                return Ok(MachineOutcome::Failed);
            }
        };

        let mut ctx = StepContext {
            pipeline,
            package,
            target: &resolved,
            layout: &layout,
            known_pid,
            pid: None,
        };

        for (kind, step_id) in &steps {
            self.ledger
                .update_step(*step_id, StepStatus::Running, None)
                .await?;
            debug!(%task_id, machine_id, step = %kind, "Step started");

            match self.run_step(*kind, &mut ctx, pipeline_id, machine_id).await {
                Ok(output) => {
                    self.ledger
                        .update_step(*step_id, StepStatus::Success, Some(output))
                        .await?;
                    debug!(%task_id, machine_id, step = %kind, "Step succeeded");
                }
                Err(e) if e.is_ledger() => return Err(e),
                Err(e) => {
                    return self
                        .fail_machine(task_id, operation, pipeline_id, machine_id, state, *kind, *step_id, e)
                        .await;
                }
            }
        }

        if let Some(success) = operation.success_state() {
            self.move_state(pipeline_id, machine_id, state, success).await?;
        }

        info!(%task_id, pipeline_id, machine_id, "{} succeeded on {}", operation, target.host);
        Ok(MachineOutcome::Succeeded)
    }

    /// Records a failed step, skips the rest and moves to the failure state
    #[allow(clippy::too_many_arguments)]
    async fn fail_machine(
        &self,
        task_id: Uuid,
        operation: OperationKind,
        pipeline_id: PipelineId,
        machine_id: MachineId,
        state: MachineState,
        step: StepKind,
        step_id: Uuid,
        err: OrchestratorError,
    ) -> Result<MachineOutcome> {
        warn!(%task_id, pipeline_id, machine_id, step = %step, "Step failed: {}", err);

        self.ledger
            .update_step(step_id, StepStatus::Failed, Some(err.to_string()))
            .await?;
        let skipped = self.ledger.skip_remaining_steps(task_id, machine_id).await?;
        if skipped > 0 {
            debug!(%task_id, machine_id, "Skipped {} remaining step(s)", skipped);
        }

        if let Some(failed) = operation.failure_state() {
            self.move_state(pipeline_id, machine_id, state, failed).await?;
        }

        Ok(MachineOutcome::Failed)
    }

    /// Applies one lifecycle edge
    async fn move_state(
        &self,
        pipeline_id: PipelineId,
        machine_id: MachineId,
        from: MachineState,
        to: MachineState,
    ) -> Result<MachineState> {
        let next = from.transition_to(to)?;
        self.states.set_state(pipeline_id, machine_id, next).await?;
        debug!(pipeline_id, machine_id, "State {} -> {}", from, next);
        Ok(next)
    }

    // =========================================================================
    // Steps
    // =========================================================================

    async fn run_step(
        &self,
        kind: StepKind,
        ctx: &mut StepContext<'_>,
        pipeline_id: PipelineId,
        machine_id: MachineId,
    ) -> Result<String> {
        let layout = ctx.layout;

        match kind {
            StepKind::CreateRemoteDir => self.exec(kind, ctx.target, &layout.create_dir()).await,
            StepKind::UploadPackage => {
                let package = ctx.package.bytes()?;
                self.exec_with_input(kind, ctx.target, &layout.upload_package(), &package)
                    .await?;
                Ok(format!(
                    "uploaded {} bytes to {}",
                    package.len(),
                    layout.package_path()
                ))
            }
            StepKind::ExtractPackage => self.exec(kind, ctx.target, &layout.extract_package()).await,
            StepKind::CreateConfig | StepKind::UpdateMainConfig => {
                let path = layout.pipeline_config_path();
                let content = ctx.pipeline.config_content.as_bytes();
                self.write_file(kind, ctx.target, layout, &path, content).await
            }
            StepKind::UpdateJvmOptions => {
                let path = layout.jvm_options_path();
                let content = ctx.pipeline.jvm_options.as_deref().unwrap_or_default();
                self.write_file(kind, ctx.target, layout, &path, content.as_bytes())
                    .await
            }
            StepKind::UpdateSystemConfig => {
                let path = layout.system_config_path();
                let content = ctx.pipeline.system_config.as_deref().unwrap_or_default();
                self.write_file(kind, ctx.target, layout, &path, content.as_bytes())
                    .await
            }
            StepKind::StartProcess => {
                let script = layout.launcher_script();
                self.exec_with_input(kind, ctx.target, &layout.write_launcher(), script.as_bytes())
                    .await?;

                let pid = self.exec(kind, ctx.target, &layout.launch()).await?;
                if !commands::is_pid(&pid) {
                    return Err(OrchestratorError::CommandFailure {
                        step: kind.to_string(),
                        exit_code: 0,
                        stderr: format!("launcher printed '{}' instead of a process id", pid),
                    });
                }

                self.states
                    .set_pid(pipeline_id, machine_id, Some(pid.clone()))
                    .await?;
                let output = format!("started process {}", pid);
                ctx.pid = Some(pid);
                Ok(output)
            }
            StepKind::VerifyProcess => {
                let Some(pid) = ctx.pid.clone() else {
                    return Err(OrchestratorError::CommandFailure {
                        step: kind.to_string(),
                        exit_code: 0,
                        stderr: "no process id recorded by start-process".to_string(),
                    });
                };

                let attempts = self.config.verify_attempts;
                for attempt in 1..=attempts {
                    let status = self
                        .exec(kind, ctx.target, &commands::probe_process(&pid))
                        .await?;
                    if status == "running" {
                        return Ok(format!(
                            "process {} running (check {}/{})",
                            pid, attempt, attempts
                        ));
                    }

                    debug!(machine_id, "Process {} not running yet ({}/{})", pid, attempt, attempts);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.verify_interval).await;
                    }
                }

                Err(OrchestratorError::CommandFailure {
                    step: kind.to_string(),
                    exit_code: 0,
                    stderr: format!("process {} not running after {} checks", pid, attempts),
                })
            }
            StepKind::StopProcess => {
                let command =
                    layout.stop_process(ctx.known_pid.as_deref(), self.config.stop_grace_period);
                self.exec(kind, ctx.target, &command).await
            }
            StepKind::ForceStopProcess => {
                let command = layout.force_stop_process(ctx.known_pid.as_deref());
                self.exec(kind, ctx.target, &command).await
            }
            StepKind::DeleteDirectory => self.exec(kind, ctx.target, &layout.delete_dir()).await,
            StepKind::RefreshConfig => {
                let pipeline = ctx.pipeline;
                let mut files = vec![(layout.pipeline_config_path(), pipeline.config_content.as_str())];
                if let Some(jvm) = pipeline.jvm_options.as_deref().filter(|v| !v.trim().is_empty()) {
                    files.push((layout.jvm_options_path(), jvm));
                }
                if let Some(system) = pipeline.system_config.as_deref().filter(|v| !v.trim().is_empty()) {
                    files.push((layout.system_config_path(), system));
                }

                let mut written = Vec::with_capacity(files.len());
                for (path, content) in &files {
                    written.push(
                        self.write_file(kind, ctx.target, layout, path, content.as_bytes())
                            .await?,
                    );
                }
                Ok(written.join("; "))
            }
        }
    }

    async fn write_file(
        &self,
        kind: StepKind,
        target: &ResolvedTarget,
        layout: &DeployLayout,
        path: &str,
        content: &[u8],
    ) -> Result<String> {
        self.exec_with_input(kind, target, &layout.write_config_file(path), content)
            .await?;
        Ok(format!("wrote {} bytes to {}", content.len(), path))
    }

    /// Runs a command and returns its trimmed stdout
    async fn exec(&self, kind: StepKind, target: &ResolvedTarget, command: &str) -> Result<String> {
        self.executor
            .execute(target, command, self.config.command_timeout)
            .await
            .map(|output| output.stdout_trimmed().to_string())
            .map_err(|e| step_error(kind, e))
    }

    async fn exec_with_input(
        &self,
        kind: StepKind,
        target: &ResolvedTarget,
        command: &str,
        input: &[u8],
    ) -> Result<String> {
        self.executor
            .execute_with_input(target, command, input, self.config.command_timeout)
            .await
            .map(|output| output.stdout_trimmed().to_string())
            .map_err(|e| step_error(kind, e))
    }
}

fn step_error(kind: StepKind, err: RemoteError) -> OrchestratorError {
    match err {
        RemoteError::NonZeroExit {
            exit_code, stderr, ..
        } => OrchestratorError::CommandFailure {
            step: kind.to_string(),
            exit_code,
            stderr: stderr.trim().to_string(),
        },
        other => OrchestratorError::Remote(other),
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_classification() {
        let err = step_error(
            StepKind::ExtractPackage,
            RemoteError::NonZeroExit {
                host: "h".to_string(),
                exit_code: 2,
                stdout: String::new(),
                stderr: "tar: short read\n".to_string(),
            },
        );
        assert!(matches!(
            &err,
            OrchestratorError::CommandFailure { step, exit_code: 2, stderr }
                if step == "extract-package" && stderr == "tar: short read"
        ));

        let err = step_error(StepKind::StartProcess, RemoteError::connect("h", 22, "refused"));
        assert!(matches!(err, OrchestratorError::Remote(RemoteError::Connect { .. })));
    }
}
