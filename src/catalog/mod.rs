pub mod client;
pub mod demo;
pub mod models;

pub use client::CatalogClient;
pub use models::{CategoryPolicy, PolicyTable, ResolvedRecord};

use std::future::Future;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

/// Resolves identifiers to catalog records. Identifiers with no match are
/// simply absent from the result.
pub trait RecordLookup {
    fn lookup(
        &self,
        identifiers: &[String],
        page_size: usize,
    ) -> impl Future<Output = Result<Vec<ResolvedRecord>, LookupError>> + Send;
}

pub trait PolicySource {
    fn fetch_policies(&self) -> impl Future<Output = Result<PolicyTable, LookupError>> + Send;
}
