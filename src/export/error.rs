use thiserror::Error;

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct ExportError {
    stage: &'static str,
    message: String,
    kind: ExportErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportErrorKind {
    /// Operator input could not be turned into identifiers.
    InvalidInput,
    /// The job cannot start rendering; it is now `FailedPrecondition`.
    FailedPrecondition,
    /// The operation does not apply to the job's current state.
    InvalidState,
    NotFound,
    Internal,
}

impl ExportError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, ExportErrorKind::InvalidInput)
    }

    pub fn failed_precondition(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, ExportErrorKind::FailedPrecondition)
    }

    pub fn invalid_state(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, ExportErrorKind::InvalidState)
    }

    pub fn not_found(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, ExportErrorKind::NotFound)
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, ExportErrorKind::Internal)
    }

    fn new(stage: &'static str, message: impl Into<String>, kind: ExportErrorKind) -> Self {
        Self {
            stage,
            message: message.into(),
            kind,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> ExportErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}
