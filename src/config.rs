use std::env;

pub const DEFAULT_CHUNK_SIZE: usize = 100;
pub const DEFAULT_COLUMN_TOKEN: &str = "sku";
pub const DEFAULT_JOB_RETENTION_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Identifiers sent per catalog lookup call.
    pub chunk_size: usize,
    /// Case-insensitive header fragment locating the identifier column of a table.
    pub identifier_column_token: String,
    pub catalog_url: Option<String>,
    pub catalog_key: Option<String>,
    pub render_url: Option<String>,
    pub render_key: Option<String>,
    pub default_template_id: Option<String>,
    /// How long a finished job stays in the registry before it is evicted.
    pub job_retention_secs: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            identifier_column_token: DEFAULT_COLUMN_TOKEN.to_string(),
            catalog_url: None,
            catalog_key: None,
            render_url: None,
            render_key: None,
            default_template_id: None,
            job_retention_secs: DEFAULT_JOB_RETENTION_SECS,
        }
    }
}

impl ExportConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            chunk_size: env::var("LOOKUP_CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v >= 1)
                .unwrap_or(default.chunk_size),
            identifier_column_token: non_empty_var("IDENTIFIER_COLUMN_TOKEN")
                .unwrap_or(default.identifier_column_token),
            catalog_url: non_empty_var("CATALOG_API_URL"),
            catalog_key: non_empty_var("CATALOG_API_KEY"),
            render_url: non_empty_var("RENDER_API_URL"),
            render_key: non_empty_var("RENDER_API_KEY"),
            default_template_id: non_empty_var("DEFAULT_TEMPLATE_ID"),
            job_retention_secs: env::var("JOB_RETENTION_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(default.job_retention_secs),
        }
    }
}

pub fn port_from_env() -> u16 {
    env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000)
}

pub fn body_limit_from_env() -> usize {
    env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(2 * 1024 * 1024)
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
