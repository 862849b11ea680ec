//! Workflow runner: executes a plan of tasks through the system façade and
//! checkpoints progress so an interrupted workflow can resume.
//!
//! This is the consumer side of the pool's contract. A plan's steps run
//! sequentially or concurrently; after each completed step the runner saves
//! a checkpoint blob (keyed by workflow id, last writer wins) and on the
//! next run skips steps that already have a recorded result.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::system::{PersistentSystem, SubmitOptions, SystemError};
use crate::task::{TaskRequest, TaskResult};

/// One unit of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub task_type: String,
    pub input: Value,
    #[serde(default)]
    pub priority: i32,
}

impl WorkflowStep {
    pub fn new(task_type: impl Into<String>, input: Value) -> Self {
        Self {
            task_type: task_type.into(),
            input,
            priority: 0,
        }
    }
}

/// How the plan's steps are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One step at a time, in order.
    Sequential,
    /// All remaining steps submitted at once; cross-step ordering is
    /// unspecified.
    Concurrent,
}

/// A workflow: an id, a mode, and an ordered list of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPlan {
    pub id: String,
    pub mode: ExecutionMode,
    pub steps: Vec<WorkflowStep>,
}

/// Serialized progress, stored as the checkpoint blob.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WorkflowState {
    /// Step index -> recorded result.
    completed: HashMap<usize, TaskResult>,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    System(#[from] SystemError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] crate::bus::BusError),

    #[error("invalid checkpoint blob: {0}")]
    CorruptCheckpoint(#[from] serde_json::Error),

    #[error("step {step} of workflow '{workflow_id}' stalled without a result")]
    Stalled { workflow_id: String, step: usize },
}

/// Runs plans against a started [`PersistentSystem`].
pub struct WorkflowRunner {
    system: Arc<PersistentSystem>,
    options: SubmitOptions,
}

impl WorkflowRunner {
    pub fn new(system: Arc<PersistentSystem>) -> Self {
        Self {
            system,
            options: SubmitOptions::default(),
        }
    }

    /// Attach caller metadata to every task this runner submits.
    pub fn with_options(mut self, options: SubmitOptions) -> Self {
        self.options = options;
        self
    }

    /// Execute the plan, resuming from any existing checkpoint.
    ///
    /// Returns one result per step, in step order. Failed steps do not stop
    /// the workflow — their failed results are recorded and returned like
    /// any other (retry is the caller's decision).
    pub async fn run(&self, plan: &WorkflowPlan) -> Result<Vec<TaskResult>, WorkflowError> {
        let mut state = self.load_state(&plan.id).await?;
        let resumed = !state.completed.is_empty();
        if resumed {
            info!(
                workflow_id = %plan.id,
                completed = state.completed.len(),
                total = plan.steps.len(),
                "Resuming workflow from checkpoint"
            );
        }

        match plan.mode {
            ExecutionMode::Sequential => {
                for (idx, step) in plan.steps.iter().enumerate() {
                    if state.completed.contains_key(&idx) {
                        debug!(workflow_id = %plan.id, step = idx, "Step already completed; skipping");
                        continue;
                    }
                    let result = self.run_step(&plan.id, idx, step).await?;
                    state.completed.insert(idx, result);
                    self.save_state(&plan.id, &state).await?;
                }
            }
            ExecutionMode::Concurrent => {
                let pending: Vec<usize> = (0..plan.steps.len())
                    .filter(|idx| !state.completed.contains_key(idx))
                    .collect();
                let mut submissions = Vec::with_capacity(pending.len());
                for idx in &pending {
                    let step = &plan.steps[*idx];
                    let request = self.request_for(step);
                    let ticket = self
                        .system
                        .submit_task(request, self.options.clone())
                        .await?;
                    submissions.push((*idx, ticket.task_id));
                }
                for (idx, task_id) in submissions {
                    let result = self.await_result(&plan.id, idx, task_id).await?;
                    state.completed.insert(idx, result);
                    self.save_state(&plan.id, &state).await?;
                }
            }
        }

        let mut results = Vec::with_capacity(plan.steps.len());
        for idx in 0..plan.steps.len() {
            // Every index is present: either restored or just recorded.
            match state.completed.get(&idx) {
                Some(result) => results.push(result.clone()),
                None => {
                    return Err(WorkflowError::Stalled {
                        workflow_id: plan.id.clone(),
                        step: idx,
                    })
                }
            }
        }
        Ok(results)
    }

    fn request_for(&self, step: &WorkflowStep) -> TaskRequest {
        TaskRequest::new(step.task_type.clone(), step.input.clone()).with_priority(step.priority)
    }

    async fn run_step(
        &self,
        workflow_id: &str,
        idx: usize,
        step: &WorkflowStep,
    ) -> Result<TaskResult, WorkflowError> {
        let request = self.request_for(step);
        let ticket = self
            .system
            .submit_task(request, self.options.clone())
            .await?;
        self.await_result(workflow_id, idx, ticket.task_id).await
    }

    /// Poll for a step's result. Queued tasks carry no timeout until
    /// dispatch, so a generous stall deadline bounds the wait.
    async fn await_result(
        &self,
        workflow_id: &str,
        idx: usize,
        task_id: crate::task::TaskId,
    ) -> Result<TaskResult, WorkflowError> {
        let deadline = Instant::now() + Duration::from_secs(300);
        loop {
            if let Some(result) = self.system.get_task_result(task_id).await {
                return Ok(result);
            }
            if Instant::now() >= deadline {
                return Err(WorkflowError::Stalled {
                    workflow_id: workflow_id.to_string(),
                    step: idx,
                });
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn load_state(&self, workflow_id: &str) -> Result<WorkflowState, WorkflowError> {
        match self.system.bus().load_checkpoint(workflow_id).await? {
            Some(blob) => Ok(serde_json::from_str(&blob)?),
            None => Ok(WorkflowState::default()),
        }
    }

    async fn save_state(
        &self,
        workflow_id: &str,
        state: &WorkflowState,
    ) -> Result<(), WorkflowError> {
        let blob = serde_json::to_string(state)?;
        self.system.bus().save_checkpoint(workflow_id, &blob).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentId};
    use crate::config::Config;
    use crate::task::TaskFailure;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Echo-like agent that counts invocations.
    struct CountingAgent {
        id: AgentId,
        calls: Arc<AtomicU64>,
        delay: Duration,
    }

    impl CountingAgent {
        fn new(calls: Arc<AtomicU64>, delay: Duration) -> Self {
            Self {
                id: AgentId::new(),
                calls,
                delay,
            }
        }
    }

    #[async_trait]
    impl Agent for CountingAgent {
        fn id(&self) -> AgentId {
            self.id
        }
        fn name(&self) -> &str {
            "counting"
        }
        fn supported_task_types(&self) -> Vec<String> {
            vec!["count".to_string()]
        }
        async fn process_task(&self, _: &str, input: &Value) -> Result<Value, TaskFailure> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(input.clone())
        }
    }

    fn plan(id: &str, mode: ExecutionMode, steps: usize) -> WorkflowPlan {
        WorkflowPlan {
            id: id.to_string(),
            mode,
            steps: (0..steps)
                .map(|n| WorkflowStep::new("count", json!({"n": n})))
                .collect(),
        }
    }

    async fn started_system(
        calls: Arc<AtomicU64>,
        delay: Duration,
        capacity: usize,
    ) -> Arc<PersistentSystem> {
        let agent: Arc<dyn Agent> = Arc::new(CountingAgent::new(calls, delay));
        let system =
            PersistentSystem::from_config(vec![(agent, capacity)], Config::default()).unwrap();
        system.start().await.unwrap();
        system
    }

    #[tokio::test]
    async fn sequential_plan_completes_in_order() {
        let calls = Arc::new(AtomicU64::new(0));
        let system = started_system(Arc::clone(&calls), Duration::ZERO, 1).await;
        let runner = WorkflowRunner::new(Arc::clone(&system));

        let results = runner
            .run(&plan("wf-seq", ExecutionMode::Sequential, 3))
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(results[1].output, Some(json!({"n": 1})));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        system.stop().await;
    }

    #[tokio::test]
    async fn concurrent_plan_overlaps_steps() {
        let calls = Arc::new(AtomicU64::new(0));
        let system = started_system(Arc::clone(&calls), Duration::from_millis(100), 3).await;
        let runner = WorkflowRunner::new(Arc::clone(&system));

        let started = Instant::now();
        let results = runner
            .run(&plan("wf-con", ExecutionMode::Concurrent, 3))
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.success));
        // Sequential execution would take at least 300ms.
        assert!(started.elapsed() < Duration::from_millis(250));
        system.stop().await;
    }

    #[tokio::test]
    async fn rerun_resumes_from_checkpoint_without_resubmitting() {
        let calls = Arc::new(AtomicU64::new(0));
        let system = started_system(Arc::clone(&calls), Duration::ZERO, 1).await;
        let runner = WorkflowRunner::new(Arc::clone(&system));
        let plan = plan("wf-resume", ExecutionMode::Sequential, 3);

        let first = runner.run(&plan).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // All steps are checkpointed; a rerun replays recorded results.
        let second = runner.run(&plan).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(second.len(), first.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.task_id, b.task_id);
        }
        system.stop().await;
    }

    #[tokio::test]
    async fn checkpoint_blob_round_trips() {
        let mut state = WorkflowState::default();
        state.completed.insert(
            0,
            TaskResult::success(
                crate::task::TaskId::new(),
                AgentId::new(),
                json!({"ok": true}),
            ),
        );
        let blob = serde_json::to_string(&state).unwrap();
        let decoded: WorkflowState = serde_json::from_str(&blob).unwrap();
        assert_eq!(decoded.completed.len(), 1);
        assert!(decoded.completed[&0].success);
    }
}
