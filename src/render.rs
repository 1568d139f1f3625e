use crate::catalog::{CategoryPolicy, ResolvedRecord};
use crate::config::ExportConfig;
use crate::http::build_client;
use reqwest::{Client, header::CONTENT_TYPE};
use serde::Serialize;
use std::{
    collections::hash_map::DefaultHasher,
    future::Future,
    hash::{Hash, Hasher},
};
use thiserror::Error;
use tracing::{debug, info};
use urlencoding::encode;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render request failed: {0}")]
    Request(String),
    #[error("renderer rejected record (HTTP {status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("renderer returned an empty document")]
    Empty,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub record: &'a ResolvedRecord,
    pub policy: &'a CategoryPolicy,
    pub template_id: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct RenderedArtifact {
    pub bytes: Vec<u8>,
    pub extension: String,
}

/// Turns one record into one finished document. Called at most once per record
/// per job; the caller never retries.
pub trait ArtifactRenderer {
    fn render(
        &self,
        request: RenderRequest<'_>,
    ) -> impl Future<Output = Result<RenderedArtifact, RenderError>> + Send;
}

/// Archive entry name: sanitized record code plus a short content hash.
pub fn artifact_name(record: &ResolvedRecord, artifact: &RenderedArtifact) -> String {
    let mut hasher = DefaultHasher::new();
    record.id.hash(&mut hasher);
    artifact.bytes.hash(&mut hasher);
    let stem: String = record
        .code
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "{stem}-{hash:08x}.{ext}",
        hash = hasher.finish() as u32,
        ext = artifact.extension
    )
}

#[derive(Debug, Clone)]
pub struct RenderClient {
    remote: Option<RemoteRenderer>,
}

#[derive(Debug, Clone)]
struct RemoteRenderer {
    base_url: String,
    api_key: Option<String>,
    http: Client,
}

#[derive(Debug, Serialize)]
struct RenderPayload<'a> {
    record: &'a ResolvedRecord,
    policy: &'a CategoryPolicy,
}

impl RenderClient {
    pub fn from_config(config: &ExportConfig) -> Self {
        let remote = config.render_url.as_ref().map(|url| RemoteRenderer {
            base_url: url.trim_end_matches('/').to_string(),
            api_key: config.render_key.clone(),
            http: build_client(),
        });
        if remote.is_none() {
            info!(target = "export.render", "RENDER_API_URL not set; rendering SVG sheets locally");
        }
        Self { remote }
    }

    pub fn offline() -> Self {
        Self { remote: None }
    }
}

impl ArtifactRenderer for RenderClient {
    async fn render(&self, request: RenderRequest<'_>) -> Result<RenderedArtifact, RenderError> {
        match &self.remote {
            Some(remote) => remote.render(request).await,
            None => Ok(render_sheet(request)),
        }
    }
}

impl RemoteRenderer {
    async fn render(&self, request: RenderRequest<'_>) -> Result<RenderedArtifact, RenderError> {
        let template = request.template_id.unwrap_or("default");
        let url = format!("{}/templates/{}/render", self.base_url, encode(template));
        let mut call = self.http.post(url).json(&RenderPayload {
            record: request.record,
            policy: request.policy,
        });
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }
        let response = call
            .send()
            .await
            .map_err(|err| RenderError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RenderError::Rejected {
                status: status.as_u16(),
                detail: detail.chars().take(200).collect(),
            });
        }

        let extension = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(extension_for)
            .unwrap_or("bin")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| RenderError::Request(err.to_string()))?;
        if bytes.is_empty() {
            return Err(RenderError::Empty);
        }
        debug!(
            target = "export.render",
            record_id = %request.record.id,
            size = bytes.len(),
            "rendered"
        );
        Ok(RenderedArtifact {
            bytes: bytes.to_vec(),
            extension,
        })
    }
}

fn extension_for(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    match mime.as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "application/pdf" => "pdf",
        _ => "bin",
    }
}

/// Local fallback: an SVG sheet listing the record's images in their current order.
fn render_sheet(request: RenderRequest<'_>) -> RenderedArtifact {
    let record = request.record;
    let title = record
        .metadata
        .get("name")
        .and_then(|value| value.as_str())
        .unwrap_or(&record.code);
    let row_height = 28;
    let height = 96 + row_height * record.images.len();

    let mut svg = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"640\" height=\"{height}\">\n"
    );
    svg.push_str(&format!(
        "  <text x=\"24\" y=\"40\" font-size=\"22\">{}</text>\n",
        escape_xml(title)
    ));
    svg.push_str(&format!(
        "  <text x=\"24\" y=\"66\" font-size=\"14\">{} · {}</text>\n",
        escape_xml(&record.code),
        escape_xml(request.policy.name.as_deref().unwrap_or(&request.policy.category_id))
    ));
    for (pos, image) in record.images.iter().enumerate() {
        svg.push_str(&format!(
            "  <text x=\"24\" y=\"{y}\" font-size=\"12\">{n}. {href}</text>\n",
            y = 96 + row_height * pos,
            n = pos + 1,
            href = escape_xml(image)
        ));
    }
    svg.push_str("</svg>\n");

    RenderedArtifact {
        bytes: svg.into_bytes(),
        extension: "svg".to_string(),
    }
}

fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}
