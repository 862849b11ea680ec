//! Core task types: requests, results, and the failure taxonomy.
//!
//! # Invariants
//! - A `TaskRequest` is immutable once constructed; routing never mutates it.
//! - A `TaskResult` is produced exactly once per task under normal operation
//!   (on timeout the pool synthesizes one instead of waiting forever).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

use crate::agent::AgentId;

/// Default timeout applied when a request doesn't specify one.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60);

/// Unique identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new unique task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of a task failure.
///
/// Per-task errors are always returned as data (a failed [`TaskResult`]),
/// never raised across the pool boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// Task payload failed the agent's own validation.
    InvalidInput,
    /// No registered agent claims the task type, or all capable agents are
    /// at capacity/unhealthy and the queue is full.
    NoAgentAvailable,
    /// The agent's downstream API call failed (network, auth, rate limit).
    UpstreamUnavailable,
    /// The task exceeded its declared timeout. Synthesized by the pool.
    Timeout,
    /// Any unexpected failure inside agent logic.
    Internal,
}

impl std::fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput => write!(f, "invalid_input"),
            Self::NoAgentAvailable => write!(f, "no_agent_available"),
            Self::UpstreamUnavailable => write!(f, "upstream_unavailable"),
            Self::Timeout => write!(f, "timeout"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// A tagged failure returned by an agent's `process_task`.
///
/// Agents must not panic; everything they can't do becomes one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: TaskErrorKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for an `invalid_input` failure.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::InvalidInput, message)
    }

    /// Shorthand for an `upstream_unavailable` failure.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::UpstreamUnavailable, message)
    }

    /// Shorthand for an `internal` failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Internal, message)
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A unit of work submitted to the pool.
///
/// Immutable after construction: the pool reads it, agents read its input,
/// nobody writes it back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    id: TaskId,
    /// Routing tag — matched against agents' declared task types.
    task_type: String,
    /// Opaque structured payload; validated by the executing agent.
    input: Value,
    /// Higher is scheduled first when queued. Best effort, not strict.
    priority: i32,
    /// After this long without a result the pool synthesizes a timeout failure.
    #[serde(with = "duration_secs")]
    timeout: Duration,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TaskRequest {
    /// Create a request with default priority (0) and timeout.
    pub fn new(task_type: impl Into<String>, input: Value) -> Self {
        Self {
            id: TaskId::new(),
            task_type: task_type.into(),
            input,
            priority: 0,
            timeout: DEFAULT_TASK_TIMEOUT,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.created_at
    }
}

/// Outcome of a task. Created once, immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub success: bool,
    /// Result payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error classification on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<TaskErrorKind>,
    /// Human-readable error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// The agent that executed (or was executing) the task, if routing got
    /// that far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

impl TaskResult {
    /// Create a successful result.
    pub fn success(task_id: TaskId, agent_id: AgentId, output: Value) -> Self {
        Self {
            task_id,
            success: true,
            output: Some(output),
            error_kind: None,
            error_message: None,
            agent_id: Some(agent_id),
            completed_at: chrono::Utc::now(),
        }
    }

    /// Create a failed result from an agent's tagged failure.
    pub fn failure(task_id: TaskId, agent_id: Option<AgentId>, failure: TaskFailure) -> Self {
        Self {
            task_id,
            success: false,
            output: None,
            error_kind: Some(failure.kind),
            error_message: Some(failure.message),
            agent_id,
            completed_at: chrono::Utc::now(),
        }
    }

    /// Create the pool-synthesized timeout result.
    pub fn timed_out(task_id: TaskId, agent_id: AgentId, timeout: Duration) -> Self {
        Self::failure(
            task_id,
            Some(agent_id),
            TaskFailure::new(
                TaskErrorKind::Timeout,
                format!("task exceeded its {}s timeout", timeout.as_secs_f64()),
            ),
        )
    }
}

/// Serde helper: store `Duration` as fractional seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        // Negative, non-finite, or overflowing values fall back to the
        // default rather than panicking inside serde.
        Ok(Duration::try_from_secs_f64(secs).unwrap_or(super::DEFAULT_TASK_TIMEOUT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_builder_sets_fields() {
        let req = TaskRequest::new("echo", json!({"x": 1}))
            .with_priority(5)
            .with_timeout(Duration::from_millis(250));
        assert_eq!(req.task_type(), "echo");
        assert_eq!(req.priority(), 5);
        assert_eq!(req.timeout(), Duration::from_millis(250));
        assert_eq!(req.input()["x"], 1);
    }

    #[test]
    fn error_kinds_display_as_snake_case() {
        assert_eq!(TaskErrorKind::InvalidInput.to_string(), "invalid_input");
        assert_eq!(
            TaskErrorKind::NoAgentAvailable.to_string(),
            "no_agent_available"
        );
        assert_eq!(
            TaskErrorKind::UpstreamUnavailable.to_string(),
            "upstream_unavailable"
        );
        assert_eq!(TaskErrorKind::Timeout.to_string(), "timeout");
        assert_eq!(TaskErrorKind::Internal.to_string(), "internal");
    }

    #[test]
    fn request_round_trips_through_json() {
        let req = TaskRequest::new("echo", json!({"x": 1})).with_timeout(Duration::from_secs(2));
        let encoded = serde_json::to_string(&req).unwrap();
        let decoded: TaskRequest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.id(), req.id());
        assert_eq!(decoded.timeout(), Duration::from_secs(2));
        assert_eq!(decoded.input(), req.input());
    }

    #[test]
    fn out_of_range_timeout_falls_back_to_default() {
        let req = TaskRequest::new("echo", json!({}));
        let mut encoded = serde_json::to_value(&req).unwrap();

        encoded["timeout"] = json!(1e300);
        let decoded: TaskRequest = serde_json::from_value(encoded.clone()).unwrap();
        assert_eq!(decoded.timeout(), DEFAULT_TASK_TIMEOUT);

        encoded["timeout"] = json!(-5.0);
        let decoded: TaskRequest = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded.timeout(), DEFAULT_TASK_TIMEOUT);
    }

    #[test]
    fn timeout_result_carries_kind_and_agent() {
        let agent = AgentId::new();
        let result = TaskResult::timed_out(TaskId::new(), agent, Duration::from_secs(1));
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(TaskErrorKind::Timeout));
        assert_eq!(result.agent_id, Some(agent));
    }
}
