//! Service instance records and the lifecycle state machine.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        }
    }

    /// Legal transitions: `stopped → starting → running → stopping → stopped`,
    /// `failed` from `starting`, `running` or `stopping`, and a retry from `failed`.
    pub fn can_transition_to(self, next: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Stopping)
                | (Running, Failed)
                | (Stopping, Stopped)
                | (Stopping, Failed)
                | (Failed, Starting)
                | (Failed, Stopping)
        )
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Graph,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Graph => "graph",
        }
    }
}

/// Transitions are serialized per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    pub identity_id: String,
    pub kind: ServiceKind,
    pub host_port: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceInstance {
    pub identity_id: String,
    pub kind: ServiceKind,
    pub host_port: u16,
    pub container_port: u16,
    pub container_id: Option<String>,
    pub state: ServiceState,
    pub last_error: Option<String>,
    pub updated_at: String,
}

impl ServiceInstance {
    pub fn new(key: &InstanceKey, container_port: u16) -> Self {
        Self {
            identity_id: key.identity_id.clone(),
            kind: key.kind,
            host_port: key.host_port,
            container_port,
            container_id: None,
            state: ServiceState::Stopped,
            last_error: None,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Move to `next`, logging the transition. Illegal transitions are refused.
    pub fn transition(&mut self, next: ServiceState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::error!(
                identity = %self.identity_id,
                from = %self.state,
                to = %next,
                "illegal service state transition"
            );
            return false;
        }
        tracing::info!(
            identity = %self.identity_id,
            kind = self.kind.as_str(),
            port = self.host_port,
            from = %self.state,
            to = %next,
            "service state transition"
        );
        self.state = next;
        self.updated_at = chrono::Utc::now().to_rfc3339();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ServiceState::*;

    #[test]
    fn happy_path_transitions() {
        let path = [Stopped, Starting, Running, Stopping, Stopped];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn failed_reachable_from_starting_and_running() {
        assert!(Starting.can_transition_to(Failed));
        assert!(Running.can_transition_to(Failed));
        assert!(!Stopped.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Starting));
    }

    #[test]
    fn no_shortcuts() {
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Running.can_transition_to(Starting));
        assert!(!Starting.can_transition_to(Stopped));
    }

    #[test]
    fn instance_refuses_illegal_transition() {
        let key = InstanceKey {
            identity_id: "charlie".into(),
            kind: ServiceKind::Graph,
            host_port: 9621,
        };
        let mut instance = ServiceInstance::new(&key, 9621);
        assert!(!instance.transition(Running));
        assert_eq!(instance.state, Stopped);
        assert!(instance.transition(Starting));
        assert!(instance.transition(Running));
    }
}
