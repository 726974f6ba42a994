//! Service lifecycle states.

/// Transfer service operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Constructed but not yet started.
    Starting,
    /// Running and accepting requests.
    Running,
    /// Draining in-flight transfers, not accepting new requests.
    ShuttingDown,
    /// Stopped.
    Stopped,
}

impl ServiceState {
    /// Check if the service is accepting new requests.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, ServiceState::Running)
    }

    /// Check if the service is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceState::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_running_accepts_requests() {
        assert!(ServiceState::Running.accepts_requests());
        assert!(!ServiceState::Starting.accepts_requests());
        assert!(!ServiceState::ShuttingDown.accepts_requests());
        assert!(!ServiceState::Stopped.accepts_requests());
        assert!(ServiceState::Stopped.is_terminal());
    }
}
