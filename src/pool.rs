//! Agent pool: owns instance lifecycle state, routes and dispatches tasks,
//! tracks health.
//!
//! Routing picks a capable, healthy, under-capacity instance with the
//! fewest outstanding tasks (ties broken by registration order). When no
//! instance is routable the task waits in a bounded, priority-ordered queue;
//! overflow is rejected with an explicit backpressure error, never dropped
//! silently.
//!
//! # Invariants
//! - An instance's outstanding count never exceeds its declared capacity
//!   (selection and increment happen under one write lock).
//! - Exactly one `TaskResult` is recorded per dispatched task; on timeout
//!   the pool synthesizes it and the agent future is dropped (cancelled).
//! - Per-task failures never propagate out of the dispatch loop; the pool
//!   cannot crash from a failing agent.

use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::agent::{Agent, AgentId};
use crate::bus::{topics, MessageBus};
use crate::registry::CapabilityRegistry;
use crate::task::{TaskErrorKind, TaskId, TaskRequest, TaskResult};

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Pending tasks held when all capable instances are busy. 0 rejects
    /// immediately instead of queueing.
    pub queue_capacity: usize,
    /// Consecutive (non-input) failures before an instance is put into a
    /// recovery cooldown and excluded from routing.
    pub unhealthy_after_failures: u32,
    /// How long an unhealthy instance stays out of routing.
    pub recovery_cooldown: Duration,
    /// An instance whose heartbeat is older than this is considered stuck
    /// and excluded from routing. Idle instances are refreshed by the
    /// monitor loop.
    pub heartbeat_stale_after: Duration,
    /// Completed results older than this are pruned by the monitor loop.
    pub result_ttl: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            unhealthy_after_failures: 3,
            recovery_cooldown: Duration::from_secs(30),
            heartbeat_stale_after: Duration::from_secs(120),
            result_ttl: Duration::from_secs(3600),
        }
    }
}

/// Routing/queueing errors surfaced to the submitter.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("no agent available for task type '{task_type}'")]
    NoAgentAvailable { task_type: String },

    #[error("task queue full (capacity {capacity}); submission rejected")]
    Backpressure { capacity: usize },
}

/// What happened to a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Handed to this instance's execution immediately.
    Dispatched(AgentId),
    /// Waiting in the pending queue for a routable instance.
    Queued,
}

/// Mutable per-instance bookkeeping. All mutations happen under the pool's
/// write lock, between suspension points.
#[derive(Debug)]
struct InstanceState {
    outstanding: usize,
    capacity: usize,
    processed: u64,
    failed: u64,
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
    last_heartbeat: Instant,
}

impl InstanceState {
    fn new(capacity: usize) -> Self {
        Self {
            outstanding: 0,
            capacity,
            processed: 0,
            failed: 0,
            consecutive_failures: 0,
            cooldown_until: None,
            last_heartbeat: Instant::now(),
        }
    }

    fn in_cooldown(&self) -> bool {
        self.cooldown_until
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    fn is_healthy(&self, stale_after: Duration) -> bool {
        !self.in_cooldown() && self.last_heartbeat.elapsed() < stale_after
    }

    fn is_routable(&self, stale_after: Duration) -> bool {
        self.is_healthy(stale_after) && self.outstanding < self.capacity
    }
}

/// Read-only view of one instance, for health snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSnapshot {
    pub agent_id: AgentId,
    pub name: String,
    pub healthy: bool,
    pub outstanding: usize,
    pub capacity: usize,
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    pub consecutive_failures: u32,
    /// processed-minus-failed over processed; 1.0 with no samples.
    pub success_rate: f64,
    pub cooldown_remaining_secs: Option<f64>,
    pub heartbeat_age_secs: f64,
}

/// Aggregate pool health. Derived on demand, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct PoolHealth {
    pub total_agents: usize,
    pub healthy_agents: usize,
    pub queued_tasks: usize,
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    pub success_rate: f64,
    pub instances: Vec<InstanceSnapshot>,
}

/// The pool. Cheap to share via `Arc`; all state lives behind locks.
pub struct AgentPool {
    registry: Arc<CapabilityRegistry>,
    agents: HashMap<AgentId, Arc<dyn Agent>>,
    instances: RwLock<HashMap<AgentId, InstanceState>>,
    pending: Mutex<VecDeque<TaskRequest>>,
    results: RwLock<HashMap<TaskId, TaskResult>>,
    bus: Option<Arc<dyn MessageBus>>,
    config: PoolConfig,
}

impl AgentPool {
    /// Construct the pool from an injected registry and the agents it was
    /// built from. Capacities come from the registry.
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        agents: Vec<Arc<dyn Agent>>,
        config: PoolConfig,
        bus: Option<Arc<dyn MessageBus>>,
    ) -> Arc<Self> {
        let mut agent_map = HashMap::with_capacity(agents.len());
        let mut instances = HashMap::with_capacity(agents.len());
        for agent in agents {
            let id = agent.id();
            let capacity = registry.get(id).map(|r| r.capacity).unwrap_or(1);
            instances.insert(id, InstanceState::new(capacity));
            agent_map.insert(id, agent);
        }
        Arc::new(Self {
            registry,
            agents: agent_map,
            instances: RwLock::new(instances),
            pending: Mutex::new(VecDeque::new()),
            results: RwLock::new(HashMap::new()),
            bus,
            config,
        })
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// The agents this pool owns, in registration order (for lifecycle
    /// hooks run by the system façade).
    pub fn agent_handles(&self) -> Vec<Arc<dyn Agent>> {
        self.registry
            .registrations()
            .iter()
            .filter_map(|r| self.agents.get(&r.agent_id).cloned())
            .collect()
    }

    /// Route and dispatch a task, or queue it when every capable instance
    /// is busy or unhealthy.
    ///
    /// Does not block for completion.
    ///
    /// # Errors
    /// - [`PoolError::NoAgentAvailable`] when no registration claims the
    ///   task type.
    /// - [`PoolError::Backpressure`] when the pending queue is full (or
    ///   queueing is disabled).
    pub async fn submit_task(self: &Arc<Self>, request: TaskRequest) -> Result<SubmitOutcome, PoolError> {
        if self.registry.agents_for(request.task_type()).is_empty() {
            return Err(PoolError::NoAgentAvailable {
                task_type: request.task_type().to_string(),
            });
        }

        if let Some(agent_id) = self.try_reserve(request.task_type()).await {
            self.dispatch(agent_id, request);
            return Ok(SubmitOutcome::Dispatched(agent_id));
        }

        // With queueing disabled, "all capable agents busy or unhealthy" is
        // reported as no_agent_available; a full bounded queue is the
        // distinct backpressure case.
        if self.config.queue_capacity == 0 {
            return Err(PoolError::NoAgentAvailable {
                task_type: request.task_type().to_string(),
            });
        }
        let mut pending = self.pending.lock().await;
        if pending.len() >= self.config.queue_capacity {
            return Err(PoolError::Backpressure {
                capacity: self.config.queue_capacity,
            });
        }
        // Keep the queue ordered by priority (higher first), FIFO within
        // equal priority.
        let pos = pending
            .iter()
            .position(|queued| queued.priority() < request.priority())
            .unwrap_or(pending.len());
        debug!(task_id = %request.id(), priority = request.priority(), "Task queued");
        pending.insert(pos, request);
        Ok(SubmitOutcome::Queued)
    }

    /// Pick the least-loaded routable instance for a task type and reserve a
    /// slot on it. Selection and increment happen under one write lock so
    /// the capacity invariant holds under concurrent submission.
    async fn try_reserve(&self, task_type: &str) -> Option<AgentId> {
        let stale_after = self.config.heartbeat_stale_after;
        let mut instances = self.instances.write().await;

        let candidates = self.registry.agents_for(task_type);
        let chosen = candidates
            .iter()
            .filter_map(|id| instances.get(id).map(|state| (*id, state)))
            .filter(|(_, state)| state.is_routable(stale_after))
            .min_by_key(|(id, state)| (state.outstanding, self.registry.registration_rank(*id)))
            .map(|(id, _)| id)?;

        let state = instances.get_mut(&chosen)?;
        state.outstanding += 1;
        state.last_heartbeat = Instant::now();
        Some(chosen)
    }

    /// Hand a task to a reserved instance's execution. The agent call runs
    /// under `tokio::time::timeout`; on expiry the future is dropped, which
    /// cancels the in-flight work rather than leaking it.
    fn dispatch(self: &Arc<Self>, agent_id: AgentId, request: TaskRequest) {
        let pool = Arc::clone(self);
        let agent = match self.agents.get(&agent_id) {
            Some(agent) => Arc::clone(agent),
            None => return, // registry and agent map are built together; unreachable in practice
        };

        debug!(task_id = %request.id(), agent = %agent.name(), "Dispatching task");

        tokio::spawn(async move {
            let task_id = request.id();
            let outcome = tokio::time::timeout(
                request.timeout(),
                agent.process_task(request.task_type(), request.input()),
            )
            .await;

            let result = match outcome {
                Ok(Ok(output)) => TaskResult::success(task_id, agent_id, output),
                Ok(Err(failure)) => TaskResult::failure(task_id, Some(agent_id), failure),
                Err(_) => {
                    warn!(
                        task_id = %task_id,
                        agent = %agent.name(),
                        timeout_secs = request.timeout().as_secs_f64(),
                        "Task timed out; agent call cancelled"
                    );
                    TaskResult::timed_out(task_id, agent_id, request.timeout())
                }
            };

            pool.complete(agent_id, result).await;
        });
    }

    /// Update instance bookkeeping, record the result, publish the
    /// completion event, then try to drain the pending queue into the freed
    /// slot.
    async fn complete(self: &Arc<Self>, agent_id: AgentId, result: TaskResult) {
        let mut went_unhealthy = false;
        {
            let mut instances = self.instances.write().await;
            if let Some(state) = instances.get_mut(&agent_id) {
                state.outstanding = state.outstanding.saturating_sub(1);
                state.processed += 1;
                state.last_heartbeat = Instant::now();
                if result.success {
                    state.consecutive_failures = 0;
                    state.cooldown_until = None;
                } else {
                    state.failed += 1;
                    // Input-validation failures say nothing about the
                    // instance itself; only operational failures count
                    // toward the cooldown.
                    if result.error_kind != Some(TaskErrorKind::InvalidInput) {
                        state.consecutive_failures += 1;
                        if state.consecutive_failures >= self.config.unhealthy_after_failures
                            && !state.in_cooldown()
                        {
                            state.cooldown_until =
                                Some(Instant::now() + self.config.recovery_cooldown);
                            went_unhealthy = true;
                        }
                    }
                }
            }
        }

        // Record the result before announcing it: a subscriber reacting to
        // the completion event must be able to fetch the result immediately.
        let result_summary = json!({
            "task_id": result.task_id,
            "success": result.success,
            "error_kind": result.error_kind,
            "agent_id": result.agent_id,
        });
        self.results
            .write()
            .await
            .insert(result.task_id, result);

        if went_unhealthy {
            warn!(
                agent_id = %agent_id,
                cooldown_secs = self.config.recovery_cooldown.as_secs_f64(),
                "Instance marked unhealthy; excluded from routing until cooldown lapses"
            );
            self.publish(
                topics::AGENT_LIFECYCLE,
                json!({
                    "event": "unhealthy",
                    "agent_id": agent_id,
                    "cooldown_secs": self.config.recovery_cooldown.as_secs_f64(),
                }),
            )
            .await;
        }

        self.publish(topics::TASK_COMPLETED, result_summary).await;

        self.drain_pending().await;
    }

    /// Dispatch queued tasks while routable slots exist. Scans in queue
    /// order so priority and FIFO are preserved per task type.
    async fn drain_pending(self: &Arc<Self>) {
        loop {
            let next = {
                let mut pending = self.pending.lock().await;
                let mut picked = None;
                for (idx, queued) in pending.iter().enumerate() {
                    if let Some(agent_id) = self.try_reserve(queued.task_type()).await {
                        picked = Some((idx, agent_id));
                        break;
                    }
                }
                picked.and_then(|(idx, agent_id)| {
                    pending.remove(idx).map(|request| (agent_id, request))
                })
            };

            match next {
                Some((agent_id, request)) => self.dispatch(agent_id, request),
                None => break,
            }
        }
    }

    async fn publish(&self, topic: &str, payload: serde_json::Value) {
        if let Some(bus) = &self.bus {
            if let Err(e) = bus.publish(topic, payload).await {
                // Fire-and-forget: a bus hiccup must not fail task flow.
                warn!(topic, error = %e, "Failed to publish bus event");
            }
        }
    }

    /// Record a result produced outside the dispatch path (e.g. a task
    /// rejected at an approval gate). No instance bookkeeping is touched.
    pub(crate) async fn record_result(&self, result: TaskResult) {
        self.results.write().await.insert(result.task_id, result);
    }

    /// Polling accessor. `None` means "not yet complete" — callers track
    /// which ids they submitted. Reads are non-destructive.
    pub async fn get_task_result(&self, task_id: TaskId) -> Option<TaskResult> {
        self.results.read().await.get(&task_id).cloned()
    }

    /// Number of tasks waiting in the pending queue.
    pub async fn queued_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Snapshot of aggregate and per-instance health. Read-only.
    pub async fn pool_health(&self) -> PoolHealth {
        let stale_after = self.config.heartbeat_stale_after;
        // The pending mutex must never be requested while holding the
        // instances lock: drain_pending acquires them in the opposite order.
        let queued_tasks = self.pending.lock().await.len();
        let instances = self.instances.read().await;

        let mut snapshots = Vec::with_capacity(instances.len());
        for registration in self.registry.registrations() {
            let Some(state) = instances.get(&registration.agent_id) else {
                continue;
            };
            let success_rate = if state.processed > 0 {
                (state.processed - state.failed) as f64 / state.processed as f64
            } else {
                1.0
            };
            snapshots.push(InstanceSnapshot {
                agent_id: registration.agent_id,
                name: registration.name.clone(),
                healthy: state.is_healthy(stale_after),
                outstanding: state.outstanding,
                capacity: state.capacity,
                tasks_processed: state.processed,
                tasks_failed: state.failed,
                consecutive_failures: state.consecutive_failures,
                success_rate,
                cooldown_remaining_secs: state.cooldown_until.and_then(|until| {
                    let now = Instant::now();
                    (now < until).then(|| (until - now).as_secs_f64())
                }),
                heartbeat_age_secs: state.last_heartbeat.elapsed().as_secs_f64(),
            });
        }

        let tasks_processed: u64 = snapshots.iter().map(|s| s.tasks_processed).sum();
        let tasks_failed: u64 = snapshots.iter().map(|s| s.tasks_failed).sum();
        let success_rate = if tasks_processed > 0 {
            (tasks_processed - tasks_failed) as f64 / tasks_processed as f64
        } else {
            1.0
        };

        PoolHealth {
            total_agents: snapshots.len(),
            healthy_agents: snapshots.iter().filter(|s| s.healthy).count(),
            queued_tasks,
            tasks_processed,
            tasks_failed,
            success_rate,
            instances: snapshots,
        }
    }

    /// Refresh heartbeats for idle instances. An idle instance is alive by
    /// definition; without this, a quiet pool would look stuck.
    pub async fn refresh_idle_heartbeats(&self) {
        let mut instances = self.instances.write().await;
        for state in instances.values_mut() {
            if state.outstanding == 0 {
                state.last_heartbeat = Instant::now();
            }
        }
    }

    /// Drop completed results older than the configured TTL. Also retries
    /// the pending queue in case cooldowns lapsed while the pool was quiet.
    pub async fn run_maintenance(self: &Arc<Self>) {
        let ttl = chrono::Duration::from_std(self.config.result_ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let cutoff = chrono::Utc::now() - ttl;
        {
            let mut results = self.results.write().await;
            results.retain(|_, result| result.completed_at > cutoff);
        }
        self.drain_pending().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, EchoAgent};
    use crate::bus::{InMemoryBus, MemoryCheckpointStore};
    use crate::task::TaskFailure;
    use async_trait::async_trait;
    use serde_json::json;
    use serde_json::Value;

    /// Agent that holds each task for a fixed delay before echoing.
    struct SlowAgent {
        id: AgentId,
        name: String,
        delay: Duration,
    }

    impl SlowAgent {
        fn new(name: &str, delay: Duration) -> Self {
            Self {
                id: AgentId::new(),
                name: name.to_string(),
                delay,
            }
        }
    }

    #[async_trait]
    impl Agent for SlowAgent {
        fn id(&self) -> AgentId {
            self.id
        }
        fn name(&self) -> &str {
            &self.name
        }
        fn supported_task_types(&self) -> Vec<String> {
            vec!["slow".to_string()]
        }
        async fn process_task(&self, _: &str, input: &Value) -> Result<Value, TaskFailure> {
            tokio::time::sleep(self.delay).await;
            Ok(input.clone())
        }
    }

    /// Agent that always fails with a given kind.
    struct FailingAgent {
        id: AgentId,
        kind: TaskErrorKind,
    }

    impl FailingAgent {
        fn new(kind: TaskErrorKind) -> Self {
            Self {
                id: AgentId::new(),
                kind,
            }
        }
    }

    #[async_trait]
    impl Agent for FailingAgent {
        fn id(&self) -> AgentId {
            self.id
        }
        fn name(&self) -> &str {
            "failing"
        }
        fn supported_task_types(&self) -> Vec<String> {
            vec!["flaky".to_string()]
        }
        async fn process_task(&self, _: &str, _: &Value) -> Result<Value, TaskFailure> {
            Err(TaskFailure::new(self.kind, "boom"))
        }
    }

    fn build_pool(
        agents: Vec<(Arc<dyn Agent>, usize)>,
        config: PoolConfig,
    ) -> Arc<AgentPool> {
        let registry = Arc::new(CapabilityRegistry::build(&agents));
        let handles = agents.into_iter().map(|(agent, _)| agent).collect();
        let bus = InMemoryBus::new(MemoryCheckpointStore::shared());
        AgentPool::new(registry, handles, config, Some(Arc::new(bus)))
    }

    async fn wait_for_result(pool: &Arc<AgentPool>, task_id: TaskId) -> TaskResult {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(result) = pool.get_task_result(task_id).await {
                return result;
            }
            assert!(Instant::now() < deadline, "task {} never completed", task_id);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn unknown_task_type_rejected_immediately() {
        let pool = build_pool(vec![], PoolConfig::default());
        let err = pool
            .submit_task(TaskRequest::new("nope", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::NoAgentAvailable { .. }));
    }

    #[tokio::test]
    async fn echo_task_produces_result_from_registered_agent() {
        let agent = Arc::new(EchoAgent::default());
        let agent_id = agent.id();
        let pool = build_pool(vec![(agent, 2)], PoolConfig::default());

        let request = TaskRequest::new("echo", json!({"x": 1}));
        let task_id = request.id();
        let outcome = pool.submit_task(request).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Dispatched(agent_id));

        let result = wait_for_result(&pool, task_id).await;
        assert!(result.success);
        assert_eq!(result.output, Some(json!({"x": 1})));
        assert_eq!(result.agent_id, Some(agent_id));
    }

    #[tokio::test]
    async fn capacity_one_serializes_tasks() {
        let agent: Arc<dyn Agent> =
            Arc::new(SlowAgent::new("slow", Duration::from_millis(80)));
        let pool = build_pool(vec![(agent, 1)], PoolConfig::default());

        let first = TaskRequest::new("slow", json!({"n": 1}));
        let second = TaskRequest::new("slow", json!({"n": 2}));
        let (first_id, second_id) = (first.id(), second.id());

        assert!(matches!(
            pool.submit_task(first).await.unwrap(),
            SubmitOutcome::Dispatched(_)
        ));
        // Second task cannot be dispatched while the first holds the slot.
        assert_eq!(pool.submit_task(second).await.unwrap(), SubmitOutcome::Queued);

        // Outstanding never exceeds capacity while both complete.
        loop {
            let health = pool.pool_health().await;
            assert!(health.instances[0].outstanding <= 1);
            if pool.get_task_result(second_id).await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(wait_for_result(&pool, first_id).await.success);
        assert!(wait_for_result(&pool, second_id).await.success);
    }

    #[tokio::test]
    async fn slow_task_times_out_promptly() {
        let agent: Arc<dyn Agent> =
            Arc::new(SlowAgent::new("slow", Duration::from_millis(500)));
        let pool = build_pool(vec![(agent, 1)], PoolConfig::default());

        let request = TaskRequest::new("slow", json!({}))
            .with_timeout(Duration::from_millis(50));
        let task_id = request.id();
        let started = Instant::now();
        pool.submit_task(request).await.unwrap();

        let result = wait_for_result(&pool, task_id).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(TaskErrorKind::Timeout));
        // Well before the agent's 500ms sleep would have finished.
        assert!(started.elapsed() < Duration::from_millis(300));

        // The slot was released by the synthesized result.
        let health = pool.pool_health().await;
        assert_eq!(health.instances[0].outstanding, 0);
    }

    #[tokio::test]
    async fn least_loaded_distributes_evenly() {
        let a: Arc<dyn Agent> = Arc::new(SlowAgent::new("a", Duration::from_millis(100)));
        let b: Arc<dyn Agent> = Arc::new(SlowAgent::new("b", Duration::from_millis(100)));
        let pool = build_pool(vec![(a, 8), (b, 8)], PoolConfig::default());

        let mut ids = Vec::new();
        for n in 0..10 {
            let request = TaskRequest::new("slow", json!({"n": n}));
            ids.push(request.id());
            pool.submit_task(request).await.unwrap();
        }

        let mut per_agent: HashMap<AgentId, usize> = HashMap::new();
        for id in ids {
            let result = wait_for_result(&pool, id).await;
            *per_agent.entry(result.agent_id.unwrap()).or_default() += 1;
        }

        assert_eq!(per_agent.values().sum::<usize>(), 10);
        for (&_agent, &count) in &per_agent {
            assert!(count <= 6, "one agent received {} of 10 tasks", count);
        }
    }

    #[tokio::test]
    async fn queue_overflow_is_backpressure() {
        let agent: Arc<dyn Agent> =
            Arc::new(SlowAgent::new("slow", Duration::from_millis(200)));
        let config = PoolConfig {
            queue_capacity: 1,
            ..PoolConfig::default()
        };
        let pool = build_pool(vec![(agent, 1)], config);

        assert!(matches!(
            pool.submit_task(TaskRequest::new("slow", json!({}))).await.unwrap(),
            SubmitOutcome::Dispatched(_)
        ));
        assert_eq!(
            pool.submit_task(TaskRequest::new("slow", json!({}))).await.unwrap(),
            SubmitOutcome::Queued
        );
        let err = pool
            .submit_task(TaskRequest::new("slow", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Backpressure { capacity: 1 }));
    }

    #[tokio::test]
    async fn zero_queue_capacity_rejects_instead_of_queueing() {
        let agent: Arc<dyn Agent> =
            Arc::new(SlowAgent::new("slow", Duration::from_millis(200)));
        let config = PoolConfig {
            queue_capacity: 0,
            ..PoolConfig::default()
        };
        let pool = build_pool(vec![(agent, 1)], config);

        pool.submit_task(TaskRequest::new("slow", json!({})))
            .await
            .unwrap();
        let err = pool
            .submit_task(TaskRequest::new("slow", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::NoAgentAvailable { .. }));
    }

    #[tokio::test]
    async fn higher_priority_tasks_drain_first() {
        let agent: Arc<dyn Agent> =
            Arc::new(SlowAgent::new("slow", Duration::from_millis(50)));
        let pool = build_pool(vec![(agent, 1)], PoolConfig::default());

        // Occupy the single slot so the next two queue up.
        pool.submit_task(TaskRequest::new("slow", json!({"n": 0})))
            .await
            .unwrap();
        let low = TaskRequest::new("slow", json!({"n": 1})).with_priority(1);
        let high = TaskRequest::new("slow", json!({"n": 2})).with_priority(10);
        let (low_id, high_id) = (low.id(), high.id());
        pool.submit_task(low).await.unwrap();
        pool.submit_task(high).await.unwrap();

        let high_result = wait_for_result(&pool, high_id).await;
        let low_result = wait_for_result(&pool, low_id).await;
        assert!(high_result.completed_at <= low_result.completed_at);
    }

    #[tokio::test]
    async fn repeated_failures_trip_cooldown_and_exclude_from_routing() {
        let agent: Arc<dyn Agent> = Arc::new(FailingAgent::new(TaskErrorKind::Internal));
        let config = PoolConfig {
            queue_capacity: 0,
            unhealthy_after_failures: 2,
            recovery_cooldown: Duration::from_secs(60),
            ..PoolConfig::default()
        };
        let pool = build_pool(vec![(agent, 1)], config);

        for _ in 0..2 {
            let request = TaskRequest::new("flaky", json!({}));
            let task_id = request.id();
            pool.submit_task(request).await.unwrap();
            let result = wait_for_result(&pool, task_id).await;
            assert!(!result.success);
        }

        let health = pool.pool_health().await;
        assert_eq!(health.healthy_agents, 0);
        assert!(health.instances[0].cooldown_remaining_secs.is_some());

        // The only capable instance is unhealthy and queueing is disabled.
        let err = pool
            .submit_task(TaskRequest::new("flaky", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::NoAgentAvailable { .. }));
    }

    #[tokio::test]
    async fn invalid_input_failures_do_not_trip_cooldown() {
        let agent: Arc<dyn Agent> = Arc::new(FailingAgent::new(TaskErrorKind::InvalidInput));
        let config = PoolConfig {
            unhealthy_after_failures: 2,
            ..PoolConfig::default()
        };
        let pool = build_pool(vec![(agent, 1)], config);

        for _ in 0..4 {
            let request = TaskRequest::new("flaky", json!({}));
            let task_id = request.id();
            pool.submit_task(request).await.unwrap();
            wait_for_result(&pool, task_id).await;
        }

        let health = pool.pool_health().await;
        assert_eq!(health.healthy_agents, 1);
        assert_eq!(health.instances[0].tasks_failed, 4);
    }

    #[tokio::test]
    async fn health_reads_do_not_block_queue_draining() {
        let agent = Arc::new(EchoAgent::default());
        let config = PoolConfig {
            queue_capacity: 256,
            ..PoolConfig::default()
        };
        let pool = build_pool(vec![(agent, 1)], config);

        // Hammer health snapshots while completions repeatedly drain the
        // queue; the two paths touch the pending and instances locks and
        // must agree on acquisition order.
        let hammer = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                loop {
                    pool.pool_health().await;
                    tokio::time::sleep(Duration::from_micros(50)).await;
                }
            })
        };

        let mut ids = Vec::with_capacity(200);
        for n in 0..200 {
            let request = TaskRequest::new("echo", json!({"n": n}));
            ids.push(request.id());
            pool.submit_task(request).await.unwrap();
        }
        for id in ids {
            assert!(wait_for_result(&pool, id).await.success);
        }
        hammer.abort();
    }

    #[tokio::test]
    async fn completion_event_implies_result_is_readable() {
        let agent = Arc::new(EchoAgent::default());
        let registry = Arc::new(CapabilityRegistry::build(&[(
            Arc::clone(&agent) as Arc<dyn Agent>,
            1,
        )]));
        let bus = Arc::new(InMemoryBus::new(MemoryCheckpointStore::shared()));
        let pool = AgentPool::new(
            registry,
            vec![agent as Arc<dyn Agent>],
            PoolConfig::default(),
            Some(Arc::clone(&bus) as Arc<dyn MessageBus>),
        );
        let mut sub = bus.subscribe(topics::TASK_COMPLETED).await.unwrap();

        let request = TaskRequest::new("echo", json!({}));
        let task_id = request.id();
        pool.submit_task(request).await.unwrap();

        let message = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .expect("no completion event")
            .unwrap();
        assert_eq!(message.payload["task_id"], json!(task_id));
        // The event is published only after the result is recorded.
        assert!(pool.get_task_result(task_id).await.is_some());
    }

    #[tokio::test]
    async fn maintenance_prunes_expired_results() {
        let agent = Arc::new(EchoAgent::default());
        let config = PoolConfig {
            result_ttl: Duration::from_millis(0),
            ..PoolConfig::default()
        };
        let pool = build_pool(vec![(agent, 1)], config);

        let request = TaskRequest::new("echo", json!({}));
        let task_id = request.id();
        pool.submit_task(request).await.unwrap();
        wait_for_result(&pool, task_id).await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.run_maintenance().await;
        assert!(pool.get_task_result(task_id).await.is_none());
    }
}
