//! Failure policy

use chorus_core::AgentRole;

/// Whether a failed agent with `role` stops all further scheduling
///
/// Leaders and monitors are critical; worker failures only skip the
/// worker's dependents.
pub fn failure_escalates(role: AgentRole) -> bool {
    match role {
        AgentRole::Leader | AgentRole::Monitor => true,
        AgentRole::Worker => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_escalates() {
        assert!(failure_escalates(AgentRole::Leader));
        assert!(failure_escalates(AgentRole::Monitor));
        assert!(!failure_escalates(AgentRole::Worker));
    }
}
