use crate::export::{ExportKind, IdentifierInput, ReviewDecision, SuspensionToken};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateJobRequest {
    #[serde(default)]
    pub kind: ExportKind,
    #[serde(default)]
    pub template_id: Option<String>,
    pub input: IdentifierInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Confirm,
    Cancel,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveSuspensionRequest {
    pub token: SuspensionToken,
    pub action: ReviewAction,
    /// Full image ordering to render with; omitted means "use the draft".
    #[serde(default)]
    pub ordering: Option<Vec<String>>,
}

impl ResolveSuspensionRequest {
    pub fn into_decision(self) -> ReviewDecision {
        match self.action {
            ReviewAction::Confirm => ReviewDecision::Confirm {
                token: self.token,
                ordering: self.ordering,
            },
            ReviewAction::Cancel => ReviewDecision::Cancel { token: self.token },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwapRequest {
    pub token: SuspensionToken,
    pub a: usize,
    pub b: usize,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
