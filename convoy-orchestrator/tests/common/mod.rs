#![allow(dead_code)]

use async_trait::async_trait;
use convoy_core::domain::lifecycle::MachineState;
use convoy_core::domain::pipeline::PipelineInstance;
use convoy_core::domain::task::{StepStatus, Task, TaskStatus, TaskStep};
use convoy_core::{MachineId, PipelineId};
use convoy_orchestrator::repository::{
    InMemoryMachineStateRepository, InMemoryTaskRepository, MachineStateRepository,
    TaskRepository,
};
use convoy_orchestrator::{Config, InventoryFile, Orchestrator, OrchestratorError};
use convoy_ssh::{CommandOutput, MachineTarget, RemoteError, RemoteExecutor, ResolvedTarget};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

pub const PIPELINE_ID: PipelineId = 7;
pub const LAUNCHED_PID: &str = "4242";

/// One command seen by the scripted executor
#[derive(Debug, Clone)]
pub struct Call {
    pub machine_id: MachineId,
    pub command: String,
    pub input_len: Option<usize>,
}

struct Failure {
    machine_id: MachineId,
    needle: String,
    exit_code: i32,
    stderr: String,
}

/// Remote executor that answers from a script instead of a network
#[derive(Default)]
pub struct ScriptedExecutor {
    failures: Mutex<Vec<Failure>>,
    delays: Mutex<HashMap<MachineId, Duration>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedExecutor {
    /// Commands on `machine_id` containing `needle` exit with `exit_code`
    pub fn fail_when(&self, machine_id: MachineId, needle: &str, exit_code: i32, stderr: &str) {
        self.failures.lock().unwrap().push(Failure {
            machine_id,
            needle: needle.to_string(),
            exit_code,
            stderr: stderr.to_string(),
        });
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Every command on `machine_id` takes `delay`
    pub fn delay(&self, machine_id: MachineId, delay: Duration) {
        self.delays.lock().unwrap().insert(machine_id, delay);
    }

    pub fn calls_for(&self, machine_id: MachineId) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.machine_id == machine_id)
            .cloned()
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    async fn respond(
        &self,
        target: &ResolvedTarget,
        command: &str,
        input: Option<&[u8]>,
    ) -> convoy_ssh::Result<CommandOutput> {
        self.calls.lock().unwrap().push(Call {
            machine_id: target.id,
            command: command.to_string(),
            input_len: input.map(|i| i.len()),
        });

        let delay = self.delays.lock().unwrap().get(&target.id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.machine_id == target.id && command.contains(&f.needle))
            .map(|f| (f.exit_code, f.stderr.clone()));
        if let Some((exit_code, stderr)) = failure {
            return Err(RemoteError::NonZeroExit {
                host: target.host.clone(),
                exit_code,
                stdout: String::new(),
                stderr,
            });
        }

        let stdout = if command.contains("echo running") {
            "running\n"
        } else if command.contains("pid file was not written") {
            "4242\n"
        } else {
            "ok\n"
        };

        Ok(CommandOutput {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        target: &ResolvedTarget,
        command: &str,
        _timeout: Duration,
    ) -> convoy_ssh::Result<CommandOutput> {
        self.respond(target, command, None).await
    }

    async fn execute_with_input(
        &self,
        target: &ResolvedTarget,
        command: &str,
        input: &[u8],
        _timeout: Duration,
    ) -> convoy_ssh::Result<CommandOutput> {
        self.respond(target, command, Some(input)).await
    }
}

/// In-memory task store whose writes can be made to fail
#[derive(Default)]
pub struct FlakyTaskRepository {
    inner: InMemoryTaskRepository,
    fail_step_update_at: Option<usize>,
    fail_step_inserts: AtomicBool,
    step_updates: AtomicUsize,
    step_insert_gate: Option<Arc<Semaphore>>,
    /// Signalled each time a step insert reaches the store
    pub step_insert_started: Notify,
}

impl FlakyTaskRepository {
    /// The `nth` call to `update_step` (1-based) and every later one fails
    pub fn failing_step_update(nth: usize) -> Self {
        Self {
            fail_step_update_at: Some(nth),
            ..Default::default()
        }
    }

    /// Step inserts wait until the returned gate gets a permit
    pub fn gated_step_inserts() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let repo = Self {
            step_insert_gate: Some(Arc::clone(&gate)),
            ..Default::default()
        };
        (repo, gate)
    }

    pub fn fail_step_inserts(&self, fail: bool) {
        self.fail_step_inserts.store(fail, Ordering::SeqCst);
    }

    fn unavailable() -> OrchestratorError {
        OrchestratorError::LedgerUnavailable("db down".to_string())
    }
}

#[async_trait]
impl TaskRepository for FlakyTaskRepository {
    async fn insert_task(&self, task: &Task) -> convoy_orchestrator::Result<()> {
        self.inner.insert_task(task).await
    }

    async fn find_task(&self, id: Uuid) -> convoy_orchestrator::Result<Option<Task>> {
        self.inner.find_task(id).await
    }

    async fn list_tasks(&self, pipeline_id: PipelineId) -> convoy_orchestrator::Result<Vec<Task>> {
        self.inner.list_tasks(pipeline_id).await
    }

    async fn list_unfinished(&self) -> convoy_orchestrator::Result<Vec<Task>> {
        self.inner.list_unfinished().await
    }

    async fn update_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> convoy_orchestrator::Result<bool> {
        self.inner.update_task_status(id, status, error_message).await
    }

    async fn delete_task(&self, id: Uuid) -> convoy_orchestrator::Result<bool> {
        self.inner.delete_task(id).await
    }

    async fn delete_tasks_for_pipeline(
        &self,
        pipeline_id: PipelineId,
    ) -> convoy_orchestrator::Result<u64> {
        self.inner.delete_tasks_for_pipeline(pipeline_id).await
    }

    async fn insert_step(&self, step: &TaskStep) -> convoy_orchestrator::Result<()> {
        self.step_insert_started.notify_one();
        if let Some(gate) = &self.step_insert_gate {
            let _permit = gate.acquire().await.map_err(|_| Self::unavailable())?;
        }
        if self.fail_step_inserts.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.insert_step(step).await
    }

    async fn find_steps(&self, task_id: Uuid) -> convoy_orchestrator::Result<Vec<TaskStep>> {
        self.inner.find_steps(task_id).await
    }

    async fn update_step(
        &self,
        id: Uuid,
        status: StepStatus,
        output: Option<String>,
        error: Option<String>,
    ) -> convoy_orchestrator::Result<bool> {
        let call = self.step_updates.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_step_update_at.is_some_and(|nth| call >= nth) {
            return Err(Self::unavailable());
        }
        self.inner.update_step(id, status, output, error).await
    }

    async fn skip_pending_steps(
        &self,
        task_id: Uuid,
        machine_id: MachineId,
    ) -> convoy_orchestrator::Result<u64> {
        self.inner.skip_pending_steps(task_id, machine_id).await
    }

    async fn delete_steps(&self, task_id: Uuid) -> convoy_orchestrator::Result<u64> {
        self.inner.delete_steps(task_id).await
    }
}

/// Writes a throwaway package file and returns its path
pub fn package_file() -> PathBuf {
    let path = std::env::temp_dir().join(format!("convoy-test-{}.tar.gz", Uuid::new_v4()));
    std::fs::write(&path, b"not really a tarball").unwrap();
    path
}

pub fn pipeline() -> PipelineInstance {
    PipelineInstance {
        id: PIPELINE_ID,
        name: "nginx-access".to_string(),
        module: "nginx".to_string(),
        package_path: package_file().display().to_string(),
        config_content: "input { beats { port => 5044 } }".to_string(),
        jvm_options: None,
        system_config: None,
        deploy_path: None,
    }
}

pub fn machine(id: MachineId) -> MachineTarget {
    MachineTarget::with_password(id, format!("10.0.0.{}", id), "ops", "secret")
}

pub fn machines(ids: &[MachineId]) -> Vec<MachineTarget> {
    ids.iter().map(|id| machine(*id)).collect()
}

pub fn test_config() -> Config {
    Config {
        verify_attempts: 3,
        verify_interval: Duration::from_millis(10),
        stop_grace_period: Duration::from_secs(1),
        ..Config::default()
    }
}

/// Orchestrator wired to in-memory stores and a scripted executor
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub executor: Arc<ScriptedExecutor>,
    pub states: Arc<InMemoryMachineStateRepository>,
    pub pipeline: PipelineInstance,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_stores(config, Arc::new(InMemoryTaskRepository::new()))
    }

    /// Harness whose task ledger is backed by `tasks`
    pub fn with_tasks(tasks: Arc<dyn TaskRepository>) -> Self {
        Self::with_stores(test_config(), tasks)
    }

    fn with_stores(config: Config, tasks: Arc<dyn TaskRepository>) -> Self {
        let pipeline = pipeline();
        let executor = Arc::new(ScriptedExecutor::default());
        let states = Arc::new(InMemoryMachineStateRepository::new());
        let inventory = Arc::new(InventoryFile::new(vec![pipeline.clone()], Vec::new()));

        let orchestrator = Orchestrator::new(
            config,
            executor.clone(),
            inventory,
            tasks,
            states.clone(),
        );

        Self {
            orchestrator,
            executor,
            states,
            pipeline,
        }
    }

    /// Puts machines directly into a lifecycle state
    pub async fn set_state(&self, ids: &[MachineId], state: MachineState) {
        for id in ids {
            self.states.create(PIPELINE_ID, *id).await.unwrap();
            self.states.set_state(PIPELINE_ID, *id, state).await.unwrap();
        }
    }

    pub async fn state_of(&self, machine_id: MachineId) -> MachineState {
        self.states
            .get(PIPELINE_ID, machine_id)
            .await
            .unwrap()
            .expect("machine should be assigned")
            .state
    }
}
