//! Error taxonomy for pipeline operations.
//!
//! Failed test runs are not errors: they come back as an
//! [`ExecutionResult`](crate::runner::ExecutionResult) with a non-success
//! status. Only caller misuse, collaborator failures and storage writes
//! surface here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A prerequisite pipeline step has not been completed.
    #[error("{0}")]
    Guard(String),

    #[error("invalid tenant identifier '{0}'")]
    InvalidTenant(String),

    #[error("path '{0}' is outside the tenant namespace")]
    OutsideNamespace(String),

    /// Scanner, generator, healer or policy service failure.
    #[error("{stage} failed: {source:#}")]
    Collaborator {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("storage write failed: {0:#}")]
    Storage(#[source] anyhow::Error),
}

impl PipelineError {
    pub fn guard(message: impl Into<String>) -> Self {
        Self::Guard(message.into())
    }

    pub fn collaborator(stage: &'static str, source: anyhow::Error) -> Self {
        Self::Collaborator { stage, source }
    }

    /// Caller-side mistakes, as opposed to server-side failures.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Guard(_) | Self::InvalidTenant(_) | Self::OutsideNamespace(_)
        )
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
