use crate::catalog::{
    CategoryPolicy, LookupError, PolicySource, PolicyTable, RecordLookup, ResolvedRecord, demo,
};
use crate::config::ExportConfig;
use crate::http::build_client;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Catalog backend. Talks to the remote catalog API when one is configured and
/// otherwise answers from the built-in demo catalog.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    remote: Option<RemoteCatalog>,
}

#[derive(Debug, Clone)]
struct RemoteCatalog {
    base_url: String,
    api_key: Option<String>,
    http: Client,
}

#[derive(Debug, Serialize)]
struct LookupRequest<'a> {
    identifiers: &'a [String],
    page_size: usize,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecordsPayload {
    Wrapped { records: Vec<ResolvedRecord> },
    Bare(Vec<ResolvedRecord>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PoliciesPayload {
    Wrapped { policies: Vec<CategoryPolicy> },
    Bare(Vec<CategoryPolicy>),
}

impl CatalogClient {
    pub fn from_config(config: &ExportConfig) -> Self {
        let remote = config.catalog_url.as_ref().map(|url| RemoteCatalog {
            base_url: url.trim_end_matches('/').to_string(),
            api_key: config.catalog_key.clone(),
            http: build_client(),
        });
        if remote.is_none() {
            info!(target = "export.catalog", "CATALOG_API_URL not set; using demo catalog");
        }
        Self { remote }
    }

    pub fn offline() -> Self {
        Self { remote: None }
    }

    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }
}

impl RecordLookup for CatalogClient {
    async fn lookup(
        &self,
        identifiers: &[String],
        page_size: usize,
    ) -> Result<Vec<ResolvedRecord>, LookupError> {
        match &self.remote {
            Some(remote) => remote.lookup(identifiers, page_size).await,
            None => Ok(demo::lookup(identifiers)),
        }
    }
}

impl PolicySource for CatalogClient {
    async fn fetch_policies(&self) -> Result<PolicyTable, LookupError> {
        match &self.remote {
            Some(remote) => remote.fetch_policies().await,
            None => Ok(demo::policies()),
        }
    }
}

impl RemoteCatalog {
    async fn lookup(
        &self,
        identifiers: &[String],
        page_size: usize,
    ) -> Result<Vec<ResolvedRecord>, LookupError> {
        let url = format!("{}/records/lookup", self.base_url);
        let mut request = self.http.post(url).json(&LookupRequest {
            identifiers,
            page_size,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|err| LookupError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(LookupError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let payload: RecordsPayload = response
            .json()
            .await
            .map_err(|err| LookupError::Deserialize(err.to_string()))?;
        let records = match payload {
            RecordsPayload::Wrapped { records } | RecordsPayload::Bare(records) => records,
        };
        debug!(
            target = "export.catalog",
            requested = identifiers.len(),
            returned = records.len(),
            "lookup_chunk"
        );
        Ok(records)
    }

    async fn fetch_policies(&self) -> Result<PolicyTable, LookupError> {
        let url = format!("{}/categories/policies", self.base_url);
        let mut request = self.http.get(url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|err| LookupError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(LookupError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let payload: PoliciesPayload = response
            .json()
            .await
            .map_err(|err| LookupError::Deserialize(err.to_string()))?;
        let policies = match payload {
            PoliciesPayload::Wrapped { policies } | PoliciesPayload::Bare(policies) => policies,
        };
        Ok(policies.into_iter().collect())
    }
}
