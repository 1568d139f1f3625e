//! Identifier intake, record resolution and the document generation loop.

pub mod classifier;
pub mod error;
pub mod gate;
pub mod identifiers;
pub mod job;
pub mod report;
pub mod resolver;

pub use error::{ExportError, ExportErrorKind};
pub use gate::{SuspensionToken, SuspensionView};
pub use identifiers::{IdentifierInput, IdentifierSet, Table};
pub use job::{
    ExportJob, ExportKind, ExportSummary, FailureRecord, JobCursor, JobState, ProgressSnapshot,
    ReviewDecision, Step,
};
pub use resolver::BatchResolver;
