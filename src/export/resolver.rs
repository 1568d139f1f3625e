use crate::catalog::{LookupError, RecordLookup, ResolvedRecord};
use crate::export::identifiers::IdentifierSet;
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("lookup chunk {chunk}/{chunks} failed: {source}")]
    Lookup {
        chunk: usize,
        chunks: usize,
        #[source]
        source: LookupError,
    },
    #[error("no catalog records matched the supplied identifiers")]
    NoMatchingRecords,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub records: Vec<ResolvedRecord>,
    /// Identifiers no returned record answered to, in input order.
    pub unresolved: Vec<String>,
}

/// Resolves identifiers in fixed-size chunks, one lookup call at a time.
#[derive(Debug, Clone, Copy)]
pub struct BatchResolver {
    chunk_size: usize,
}

impl BatchResolver {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub async fn resolve<L>(
        &self,
        lookup: &L,
        identifiers: &IdentifierSet,
    ) -> Result<Resolution, ResolveError>
    where
        L: RecordLookup + Sync,
    {
        let chunks = identifiers.len().div_ceil(self.chunk_size);
        let mut records: Vec<ResolvedRecord> = Vec::new();
        let mut seen = HashSet::new();

        for (idx, chunk) in identifiers.as_slice().chunks(self.chunk_size).enumerate() {
            let batch = lookup
                .lookup(chunk, self.chunk_size)
                .await
                .map_err(|source| ResolveError::Lookup {
                    chunk: idx + 1,
                    chunks,
                    source,
                })?;
            debug!(
                target = "export.job",
                chunk = idx + 1,
                chunks,
                requested = chunk.len(),
                returned = batch.len(),
                "resolve_chunk"
            );
            for record in batch {
                if seen.insert(record.id.clone()) {
                    records.push(record);
                }
            }
        }

        if records.is_empty() {
            return Err(ResolveError::NoMatchingRecords);
        }

        let matched: HashSet<&str> = records
            .iter()
            .flat_map(|record| [record.code.as_str(), record.id.as_str()])
            .collect();
        let unresolved = identifiers
            .iter()
            .filter(|id| !matched.contains(id))
            .map(str::to_string)
            .collect();

        Ok(Resolution {
            records,
            unresolved,
        })
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use serde_json::Map;
    use std::sync::Mutex;

    pub fn record(code: &str, category: Option<&str>) -> ResolvedRecord {
        ResolvedRecord {
            id: format!("id-{code}"),
            code: code.to_string(),
            category_id: category.map(str::to_string),
            images: vec![format!("{code}-1.jpg"), format!("{code}-2.jpg"), format!("{code}-3.jpg")],
            metadata: Map::new(),
        }
    }

    /// Lookup that answers every identifier not listed in `missing` and
    /// records the size of each call.
    #[derive(Default)]
    pub struct FakeLookup {
        pub missing: Vec<String>,
        pub fail_on_call: Option<usize>,
        pub category: Option<String>,
        pub calls: Mutex<Vec<usize>>,
    }

    impl RecordLookup for FakeLookup {
        async fn lookup(
            &self,
            identifiers: &[String],
            _page_size: usize,
        ) -> Result<Vec<ResolvedRecord>, LookupError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(identifiers.len());
                calls.len()
            };
            if self.fail_on_call == Some(call) {
                return Err(LookupError::Request("HTTP 502 Bad Gateway".into()));
            }
            Ok(identifiers
                .iter()
                .filter(|id| !self.missing.contains(id))
                .map(|id| record(id, self.category.as_deref()))
                .collect())
        }
    }
}
