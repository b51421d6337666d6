/// Errors surfaced directly to callers of the agent.
///
/// Delivery failures are never raised here; they travel through the event
/// bus and, for blocking submissions, the returned delivery outcome.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to build HTTP transport: {0}")]
    Transport(String),

    #[error("Notifier has shut down")]
    ShutDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = AgentError::InvalidConfig("blank access token".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: blank access token"
        );
    }

    #[test]
    fn test_error_debug() {
        let error = AgentError::ShutDown;
        let debug_str = format!("{error:?}");
        assert!(debug_str.contains("ShutDown"));
    }
}
