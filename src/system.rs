//! Persistent system façade: agent pool + message bus + health monitor as
//! one lifecycle unit.
//!
//! `start()` is safe to call exactly once; `stop()` releases everything on
//! all exit paths, including partial-startup failure. Per-task failures are
//! data (failed `TaskResult`s) and never cross this API as errors — only
//! misuse does (submitting before start, approving a task that isn't held).

use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::agent::{Agent, AgentId, AgentStartError};
use crate::bus::{create_checkpoint_store, topics, BusError, InMemoryBus, MessageBus};
use crate::config::Config;
use crate::pool::{AgentPool, PoolError, PoolHealth, SubmitOutcome};
use crate::registry::CapabilityRegistry;
use crate::task::{TaskFailure, TaskId, TaskRequest, TaskResult};

/// Errors crossing the façade boundary. All of these are caller-side
/// conditions; task execution failures are reported via [`TaskResult`].
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("system has not been started")]
    NotStarted,

    #[error("system is already running")]
    AlreadyStarted,

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    AgentStart(#[from] AgentStartError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("task {0} is not held for approval")]
    NotHeld(TaskId),
}

/// Caller metadata attached to a submission.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    /// Hold the task until [`PersistentSystem::approve_task`] is called.
    pub requires_approval: bool,
    /// Logical batch this task belongs to, for [`PersistentSystem::get_batch_status`].
    pub batch_id: Option<String>,
}

impl SubmitOptions {
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn requiring_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }
}

/// What the façade did with a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    Dispatched(AgentId),
    Queued,
    HeldForApproval,
}

/// Receipt for a submitted task.
#[derive(Debug, Clone)]
pub struct TaskTicket {
    pub task_id: TaskId,
    pub state: TicketState,
}

/// Batch progress view. `progress_percentage` is completed/total × 100,
/// not time-weighted.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub batch_id: String,
    pub status: BatchState,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub progress_percentage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Pending,
    InProgress,
    Completed,
}

/// Composite read-only health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub system_running: bool,
    pub uptime_seconds: f64,
    pub components: ComponentHealth,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub pool: PoolHealth,
    pub monitor_running: bool,
    pub pending_approvals: usize,
}

struct HeldTask {
    request: TaskRequest,
    options: SubmitOptions,
}

/// Top-level process composing pool, bus, and health monitor.
pub struct PersistentSystem {
    pool: Arc<AgentPool>,
    bus: Arc<dyn MessageBus>,
    config: Config,
    running: AtomicBool,
    started_at: RwLock<Option<Instant>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    held: RwLock<HashMap<TaskId, HeldTask>>,
    batches: RwLock<HashMap<String, Vec<TaskId>>>,
}

impl PersistentSystem {
    /// Compose a system from configured agents and an explicit bus.
    pub fn new(
        agents: Vec<(Arc<dyn Agent>, usize)>,
        config: Config,
        bus: Arc<dyn MessageBus>,
    ) -> Arc<Self> {
        let registry = Arc::new(CapabilityRegistry::build(&agents));
        let handles = agents.into_iter().map(|(agent, _)| agent).collect();
        let pool = AgentPool::new(
            registry,
            handles,
            config.pool.clone(),
            Some(Arc::clone(&bus)),
        );
        Arc::new(Self {
            pool,
            bus,
            config,
            running: AtomicBool::new(false),
            started_at: RwLock::new(None),
            monitor: Mutex::new(None),
            held: RwLock::new(HashMap::new()),
            batches: RwLock::new(HashMap::new()),
        })
    }

    /// Compose a system with an in-process bus and the checkpoint store the
    /// configuration selects.
    pub fn from_config(
        agents: Vec<(Arc<dyn Agent>, usize)>,
        config: Config,
    ) -> Result<Arc<Self>, SystemError> {
        let checkpoints =
            create_checkpoint_store(config.checkpoint_store, config.checkpoint_dir.clone())?;
        let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new(checkpoints));
        Ok(Self::new(agents, config, bus))
    }

    /// The bus shared by this system (for subscribers and checkpointing).
    pub fn bus(&self) -> Arc<dyn MessageBus> {
        Arc::clone(&self.bus)
    }

    fn ensure_running(&self) -> Result<(), SystemError> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SystemError::NotStarted)
        }
    }

    /// Bring the system up: start every agent, then the health monitor.
    ///
    /// # Errors
    /// - [`SystemError::AlreadyStarted`] on a second call.
    /// - [`SystemError::AgentStart`] if an agent fails to start; everything
    ///   started so far is stopped again before returning.
    pub async fn start(self: &Arc<Self>) -> Result<(), SystemError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SystemError::AlreadyStarted);
        }

        let agents = self.pool.agent_handles();
        let mut started: Vec<Arc<dyn Agent>> = Vec::with_capacity(agents.len());
        for agent in &agents {
            if let Err(e) = agent.on_start().await {
                error!(agent = %agent.name(), error = %e, "Agent failed to start; rolling back");
                for agent in started.iter().rev() {
                    agent.on_stop().await;
                }
                self.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
            started.push(Arc::clone(agent));
        }

        *self.started_at.write().await = Some(Instant::now());

        let monitor = {
            let system = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(system.config.monitor_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    system.pool.refresh_idle_heartbeats().await;
                    system.pool.run_maintenance().await;
                    let health = system.pool.pool_health().await;
                    if let Err(e) = system
                        .bus
                        .publish(
                            topics::SYSTEM_HEALTH,
                            json!({
                                "healthy_agents": health.healthy_agents,
                                "total_agents": health.total_agents,
                                "queued_tasks": health.queued_tasks,
                                "tasks_processed": health.tasks_processed,
                            }),
                        )
                        .await
                    {
                        warn!(error = %e, "Failed to publish health event");
                    }
                }
            })
        };
        *self.monitor.lock().await = Some(monitor);

        self.publish_lifecycle("system_started").await;
        info!(agents = agents.len(), "Persistent system started");
        Ok(())
    }

    /// Tear the system down. Idempotent; safe to call on a system that
    /// never fully started.
    pub async fn stop(self: &Arc<Self>) {
        if let Some(monitor) = self.monitor.lock().await.take() {
            monitor.abort();
        }

        let was_running = self.running.swap(false, Ordering::SeqCst);
        if was_running {
            for agent in self.pool.agent_handles().iter().rev() {
                agent.on_stop().await;
            }
            self.publish_lifecycle("system_stopped").await;
            info!("Persistent system stopped");
        }
    }

    async fn publish_lifecycle(&self, event: &str) {
        if let Err(e) = self
            .bus
            .publish(topics::AGENT_LIFECYCLE, json!({ "event": event }))
            .await
        {
            warn!(error = %e, "Failed to publish lifecycle event");
        }
    }

    /// Submit a task with caller metadata.
    ///
    /// With `requires_approval` set the task is held until
    /// [`approve_task`](Self::approve_task); otherwise it goes straight to
    /// the pool.
    ///
    /// # Errors
    /// [`SystemError::NotStarted`] before `start()`, and the pool's routing
    /// errors (`no_agent_available`, backpressure).
    pub async fn submit_task(
        self: &Arc<Self>,
        mut request: TaskRequest,
        options: SubmitOptions,
    ) -> Result<TaskTicket, SystemError> {
        self.ensure_running()?;

        // Requests that kept the built-in default timeout get the configured
        // one instead.
        if request.timeout() == crate::task::DEFAULT_TASK_TIMEOUT {
            request = request.with_timeout(self.config.default_task_timeout);
        }

        // Unknown task types are rejected up front even when the task would
        // be held — an approval gate on an unroutable task helps nobody.
        if self
            .pool
            .registry()
            .agents_for(request.task_type())
            .is_empty()
        {
            return Err(PoolError::NoAgentAvailable {
                task_type: request.task_type().to_string(),
            }
            .into());
        }

        let task_id = request.id();
        if let Some(batch_id) = &options.batch_id {
            self.batches
                .write()
                .await
                .entry(batch_id.clone())
                .or_default()
                .push(task_id);
        }

        self.publish_submission(&request, &options).await;

        if options.requires_approval {
            self.held
                .write()
                .await
                .insert(task_id, HeldTask { request, options });
            return Ok(TaskTicket {
                task_id,
                state: TicketState::HeldForApproval,
            });
        }

        let outcome = self.pool.submit_task(request).await?;
        Ok(TaskTicket {
            task_id,
            state: match outcome {
                SubmitOutcome::Dispatched(agent_id) => TicketState::Dispatched(agent_id),
                SubmitOutcome::Queued => TicketState::Queued,
            },
        })
    }

    async fn publish_submission(&self, request: &TaskRequest, options: &SubmitOptions) {
        if let Err(e) = self
            .bus
            .publish(
                topics::TASK_SUBMITTED,
                json!({
                    "event": "submitted",
                    "task_id": request.id(),
                    "task_type": request.task_type(),
                    "user_id": options.user_id,
                    "session_id": options.session_id,
                    "requires_approval": options.requires_approval,
                }),
            )
            .await
        {
            warn!(error = %e, "Failed to publish submission event");
        }
    }

    /// Release a held task into the pool.
    ///
    /// # Errors
    /// [`SystemError::NotHeld`] if the id isn't waiting for approval.
    pub async fn approve_task(self: &Arc<Self>, task_id: TaskId) -> Result<TaskTicket, SystemError> {
        self.ensure_running()?;
        let held = self
            .held
            .write()
            .await
            .remove(&task_id)
            .ok_or(SystemError::NotHeld(task_id))?;
        info!(task_id = %task_id, user_id = ?held.options.user_id, "Task approved");
        let outcome = self.pool.submit_task(held.request).await?;
        Ok(TaskTicket {
            task_id,
            state: match outcome {
                SubmitOutcome::Dispatched(agent_id) => TicketState::Dispatched(agent_id),
                SubmitOutcome::Queued => TicketState::Queued,
            },
        })
    }

    /// Refuse a held task. A failed result is recorded so pollers see a
    /// terminal state instead of waiting forever.
    pub async fn reject_task(
        self: &Arc<Self>,
        task_id: TaskId,
        reason: &str,
    ) -> Result<(), SystemError> {
        self.ensure_running()?;
        let _held = self
            .held
            .write()
            .await
            .remove(&task_id)
            .ok_or(SystemError::NotHeld(task_id))?;
        info!(task_id = %task_id, reason, "Task rejected");
        self.pool
            .record_result(TaskResult::failure(
                task_id,
                None,
                TaskFailure::internal(format!("rejected before dispatch: {}", reason)),
            ))
            .await;
        Ok(())
    }

    /// Task ids currently held for approval.
    pub async fn pending_approvals(&self) -> Vec<TaskId> {
        self.held.read().await.keys().copied().collect()
    }

    /// Polling accessor. `None` means "not yet complete", not "unknown id".
    pub async fn get_task_result(&self, task_id: TaskId) -> Option<TaskResult> {
        self.pool.get_task_result(task_id).await
    }

    /// Aggregate status for a batch of submitted tasks. `None` for a batch
    /// id no task was ever submitted under.
    pub async fn get_batch_status(&self, batch_id: &str) -> Option<BatchStatus> {
        let task_ids = self.batches.read().await.get(batch_id)?.clone();
        let total = task_ids.len();
        let mut completed = 0usize;
        let mut failed = 0usize;
        for task_id in &task_ids {
            if let Some(result) = self.pool.get_task_result(*task_id).await {
                completed += 1;
                if !result.success {
                    failed += 1;
                }
            }
        }
        let status = if completed == total && total > 0 {
            BatchState::Completed
        } else if completed > 0 {
            BatchState::InProgress
        } else {
            BatchState::Pending
        };
        Some(BatchStatus {
            batch_id: batch_id.to_string(),
            status,
            total,
            completed,
            failed,
            progress_percentage: if total > 0 {
                completed as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        })
    }

    /// Composite health snapshot. Read-only; no side effects.
    pub async fn get_system_health(&self) -> SystemHealth {
        let running = self.running.load(Ordering::SeqCst);
        let uptime_seconds = if running {
            self.started_at
                .read()
                .await
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or(0.0)
        } else {
            0.0
        };
        SystemHealth {
            system_running: running,
            uptime_seconds,
            components: ComponentHealth {
                pool: self.pool.pool_health().await,
                monitor_running: self.monitor.lock().await.is_some(),
                pending_approvals: self.held.read().await.len(),
            },
        }
    }
}
