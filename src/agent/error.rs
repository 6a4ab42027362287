//! Program-level agent errors with rich miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use crate::error::{ActionError, GraphError};

/// Failures raised inside an agent program.
///
/// The dispatcher catches these at the runtime boundary and finishes the
/// action as [`Completion::Error`](crate::action::Completion::Error); they are
/// never propagated to the initiating caller.
#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    #[error("agent \"{agent}\" failed: {message}")]
    #[diagnostic(
        code(reactor::agent::failed),
        help("The agent program reported a failure. Check the message for details.")
    )]
    Failed { agent: String, message: String },

    #[error("agent \"{agent}\" is missing argument {ordinal}")]
    #[diagnostic(
        code(reactor::agent::missing_argument),
        help("Bind the argument with `set_argument` before initiating the action.")
    )]
    MissingArgument { agent: String, ordinal: usize },

    #[error("agent \"{agent}\" received an invalid argument: {message}")]
    #[diagnostic(
        code(reactor::agent::invalid_argument),
        help("The argument exists but does not have the shape the agent expects.")
    )]
    InvalidArgument { agent: String, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Action(#[from] ActionError),
}

impl AgentError {
    /// Shorthand for [`AgentError::Failed`].
    pub fn failed(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            agent: agent.into(),
            message: message.into(),
        }
    }
}

/// Result type for agent programs.
pub type AgentResult<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_errors_convert() {
        let err: AgentError = GraphError::ElementNotFound { addr: 4 }.into();
        assert!(matches!(err, AgentError::Graph(_)));
    }

    #[test]
    fn failed_shorthand_formats() {
        let err = AgentError::failed("echo", "no input");
        assert_eq!(err.to_string(), "agent \"echo\" failed: no input");
    }
}
