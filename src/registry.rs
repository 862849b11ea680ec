//! Capability registry: static routing map from task type to agent ids.
//!
//! Built once at pool construction by querying each agent's declared task
//! types; never mutated afterwards. The per-type agent order is registration
//! order and serves only as a tie-break in routing, not as a priority.
//! Hot registration is deliberately out of scope — adding a task type means
//! redeploying with an updated agent set.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::agent::{Agent, AgentId};

/// Immutable registration record for one agent instance.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRegistration {
    pub agent_id: AgentId,
    pub name: String,
    pub task_types: Vec<String>,
    /// Max simultaneous tasks the pool will dispatch to this instance.
    pub capacity: usize,
}

/// Immutable-after-construction routing table.
///
/// Passed by reference into the pool rather than living as a module-level
/// singleton, so it can be built and inspected in isolation.
pub struct CapabilityRegistry {
    registrations: Vec<AgentRegistration>,
    /// task type -> agent ids in registration order.
    by_task_type: HashMap<String, Vec<AgentId>>,
}

impl CapabilityRegistry {
    /// Build the registry from agents and their declared capacities.
    ///
    /// Agents are queried for `supported_task_types()` exactly once, here.
    /// A `capacity` of 0 is clamped to 1 — an instance that can never accept
    /// a task would be unroutable by construction.
    pub fn build(agents: &[(Arc<dyn Agent>, usize)]) -> Self {
        let mut registrations = Vec::with_capacity(agents.len());
        let mut by_task_type: HashMap<String, Vec<AgentId>> = HashMap::new();

        for (agent, capacity) in agents {
            let registration = AgentRegistration {
                agent_id: agent.id(),
                name: agent.name().to_string(),
                task_types: agent.supported_task_types(),
                capacity: (*capacity).max(1),
            };
            for task_type in &registration.task_types {
                by_task_type
                    .entry(task_type.clone())
                    .or_default()
                    .push(registration.agent_id);
            }
            registrations.push(registration);
        }

        Self {
            registrations,
            by_task_type,
        }
    }

    /// Agent ids capable of handling `task_type`, in registration order.
    /// Empty slice if no agent claims the type.
    pub fn agents_for(&self, task_type: &str) -> &[AgentId] {
        self.by_task_type
            .get(task_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All registrations, in registration order.
    pub fn registrations(&self) -> &[AgentRegistration] {
        &self.registrations
    }

    /// Look up a single registration.
    pub fn get(&self, agent_id: AgentId) -> Option<&AgentRegistration> {
        self.registrations
            .iter()
            .find(|r| r.agent_id == agent_id)
    }

    /// All known task types (unordered).
    pub fn task_types(&self) -> impl Iterator<Item = &str> {
        self.by_task_type.keys().map(String::as_str)
    }

    /// Registration-order rank of an agent, used as the routing tie-break.
    pub fn registration_rank(&self, agent_id: AgentId) -> usize {
        self.registrations
            .iter()
            .position(|r| r.agent_id == agent_id)
            .unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::EchoAgent;

    #[test]
    fn routes_by_declared_task_type_in_registration_order() {
        let a = Arc::new(EchoAgent::new("echo-a"));
        let b = Arc::new(EchoAgent::new("echo-b"));
        let (a_id, b_id) = (a.id(), b.id());

        let registry = CapabilityRegistry::build(&[
            (a as Arc<dyn Agent>, 2),
            (b as Arc<dyn Agent>, 2),
        ]);

        assert_eq!(registry.agents_for("echo"), &[a_id, b_id]);
        assert!(registry.agents_for("unknown").is_empty());
        assert!(registry.registration_rank(a_id) < registry.registration_rank(b_id));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let a = Arc::new(EchoAgent::new("echo-a"));
        let registry = CapabilityRegistry::build(&[(a as Arc<dyn Agent>, 0)]);
        assert_eq!(registry.registrations()[0].capacity, 1);
    }
}
