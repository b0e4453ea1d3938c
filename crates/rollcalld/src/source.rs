//! Remote enrollment store access.

use async_trait::async_trait;
use reqwest::Client;
use rollcall_core::RawEnrollment;
use thiserror::Error;

use crate::config::Config;

/// Columns requested from the enrollment table. `users(email)` follows the
/// foreign key from `user_id` to the users table.
const ENROLLMENT_SELECT: &str = "user_id,face_encoding,users(email)";

/// Rows requested per page. PostgREST may return fewer when the project caps
/// response size, so a short page does not mean the table is exhausted.
const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response body: {0}")]
    Decode(String),
}

/// Read-only source of every currently enrolled identity.
#[async_trait]
pub trait EnrollmentSource: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<RawEnrollment>, SourceError>;
}

/// Reads enrollments through Supabase's PostgREST interface.
pub struct SupabaseSource {
    client: Client,
    base_url: String,
    api_key: String,
    table: String,
    page_size: usize,
}

impl SupabaseSource {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            table: table.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Client::new(),
            config.supabase_url.clone(),
            config.supabase_key.clone(),
            config.enrollment_table.clone(),
        )
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    async fn fetch_page(&self, offset: usize) -> Result<Vec<RawEnrollment>, SourceError> {
        let resp = self
            .client
            .get(self.table_url())
            .query(&[
                ("select", ENROLLMENT_SELECT.to_string()),
                ("order", "user_id.asc".to_string()),
                ("offset", offset.to_string()),
                ("limit", self.page_size.to_string()),
            ])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| SourceError::Decode(e.to_string()))
    }
}

#[async_trait]
impl EnrollmentSource for SupabaseSource {
    /// Pages through the table until an empty page comes back.
    async fn fetch_all(&self) -> Result<Vec<RawEnrollment>, SourceError> {
        let mut rows = Vec::new();
        loop {
            let page = self.fetch_page(rows.len()).await?;
            if page.is_empty() {
                break;
            }
            tracing::trace!(offset = rows.len(), rows = page.len(), "fetched enrollment page");
            rows.extend(page);
        }
        Ok(rows)
    }
}
