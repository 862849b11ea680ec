//! Echo agent: returns its input unchanged.
//!
//! Used to exercise the routing path without any downstream dependency, and
//! as the smallest possible reference implementation of the [`Agent`] trait.

use async_trait::async_trait;
use serde_json::Value;

use super::{Agent, AgentId};
use crate::task::TaskFailure;

/// Task type handled by [`EchoAgent`].
pub const ECHO_TASK_TYPE: &str = "echo";

pub struct EchoAgent {
    id: AgentId,
    name: String,
}

impl EchoAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(),
            name: name.into(),
        }
    }
}

impl Default for EchoAgent {
    fn default() -> Self {
        Self::new("echo")
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn id(&self) -> AgentId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supported_task_types(&self) -> Vec<String> {
        vec![ECHO_TASK_TYPE.to_string()]
    }

    async fn process_task(&self, task_type: &str, input: &Value) -> Result<Value, TaskFailure> {
        if task_type != ECHO_TASK_TYPE {
            return Err(TaskFailure::invalid_input(format!(
                "echo agent cannot handle task type '{}'",
                task_type
            )));
        }
        Ok(input.clone())
    }
}
