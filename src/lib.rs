//! # taskhive
//!
//! A persistent agent pool with capability-based task routing.
//!
//! This library provides:
//! - An [`Agent`](agent::Agent) contract: declared task types, lifecycle
//!   hooks, and failure-as-data task processing
//! - An [`AgentPool`](pool::AgentPool) that routes tasks to the least-loaded
//!   capable agent, enforces per-instance capacity, queues under
//!   backpressure, and synthesizes timeout results
//! - A [`MessageBus`](bus::MessageBus) for lifecycle/status events and
//!   workflow checkpoints
//! - A [`PersistentSystem`](system::PersistentSystem) façade owning the
//!   whole lifecycle, plus a [`WorkflowRunner`](workflow::WorkflowRunner)
//!   for multi-step plans with resume
//!
//! ## Task Flow
//! 1. Submit a typed task through the façade (optionally held for approval)
//! 2. The pool routes it to the least-loaded healthy agent, or queues it
//! 3. The agent processes it; failures come back as tagged data
//! 4. The result is retained for polling until its TTL expires
//!
//! ## Modules
//! - `agent`: the agent contract and the built-in echo/assistant agents
//! - `pool`: routing, capacity, queueing, timeouts, and health tracking
//! - `bus`: pub/sub topics and the checkpoint store
//! - `system`: the start/stop façade with approvals, batches, and health
//! - `workflow`: sequential/concurrent plans with checkpointed resume

pub mod agent;
pub mod bus;
pub mod config;
pub mod llm;
pub mod pool;
pub mod registry;
pub mod system;
pub mod task;
pub mod workflow;

pub use agent::{Agent, AgentId, AssistantAgent, EchoAgent};
pub use config::Config;
pub use pool::{AgentPool, PoolConfig, PoolError, SubmitOutcome};
pub use registry::CapabilityRegistry;
pub use system::{PersistentSystem, SubmitOptions, SystemError, TaskTicket, TicketState};
pub use task::{TaskErrorKind, TaskFailure, TaskId, TaskRequest, TaskResult};
pub use workflow::{ExecutionMode, WorkflowPlan, WorkflowRunner, WorkflowStep};
