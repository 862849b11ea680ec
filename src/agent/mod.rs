//! Agent contract: the worker side of the pool.
//!
//! An agent declares the task types it can handle, exposes start/stop
//! lifecycle hooks, and executes tasks via [`Agent::process_task`].
//!
//! # Invariants
//! - `process_task` never panics; every failure comes back as a tagged
//!   [`TaskFailure`] (`invalid_input`, `upstream_unavailable`, `timeout`,
//!   `internal`).
//! - `on_start` is idempotent. Missing credentials degrade the agent to
//!   offline/mock behavior instead of failing startup; only genuinely
//!   unrecoverable setup errors are returned.
//! - `on_stop` releases resources and is called on pool shutdown, including
//!   the partial-startup rollback path.

mod assistant;
mod echo;

pub use assistant::{AssistantAgent, COMPLETE_TASK_TYPE};
pub use echo::{EchoAgent, ECHO_TASK_TYPE};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::task::TaskFailure;

/// Unique identifier for an agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(Uuid);

impl AgentId {
    /// Create a new unique agent ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Startup error for an agent. Distinct from [`TaskFailure`] because it is
/// the one place where a problem is allowed to abort system startup.
#[derive(Debug, thiserror::Error)]
#[error("agent {agent} failed to start: {message}")]
pub struct AgentStartError {
    pub agent: String,
    pub message: String,
}

/// Base trait for all pool workers.
///
/// Agents are I/O-dominated (LLM calls, third-party data APIs); their output
/// is best effort and not assumed reproducible across runs.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Unique identifier for this instance.
    fn id(&self) -> AgentId;

    /// Human-readable name, used in logs and health snapshots.
    fn name(&self) -> &str;

    /// Task types this agent handles. Queried once at registration; the
    /// routing table never changes afterwards.
    fn supported_task_types(&self) -> Vec<String>;

    /// Acquire external resources (HTTP clients, credentials).
    ///
    /// Must be idempotent. Missing credentials are not an error here.
    async fn on_start(&self) -> Result<(), AgentStartError> {
        Ok(())
    }

    /// Release resources. Called on pool shutdown.
    async fn on_stop(&self) {}

    /// Execute one task.
    ///
    /// # Errors
    /// Returns a tagged [`TaskFailure`]; implementations must catch their own
    /// downstream errors rather than letting them propagate.
    async fn process_task(&self, task_type: &str, input: &Value) -> Result<Value, TaskFailure>;
}
