//! Uploadcare backend
//!
//! Uploads by URL through the public upload API: `from_url` returns a token,
//! which is polled until Uploadcare reports the file as stored.
//! See: https://uploadcare.com/api-refs/upload-api/#tag/Upload/operation/fromURLUpload

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{
    error_message_from_body, provider_client, CdnBackend, CdnProvider, ProviderError,
    ProviderErrorCode,
};

const DEFAULT_UPLOAD_BASE_URL: &str = "https://upload.uploadcare.com";
const DEFAULT_CDN_BASE_URL: &str = "https://ucarecdn.com";
const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
const DEFAULT_MAX_POLLS: u32 = 40;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum FromUrlResponse {
    Token { token: String },
    FileInfo { uuid: String },
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Upload-by-URL client for one Uploadcare project.
pub struct UploadcareBackend {
    client: reqwest::Client,
    upload_base_url: String,
    cdn_base_url: String,
    public_key: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl UploadcareBackend {
    pub fn new(public_key: String) -> Self {
        Self {
            client: provider_client(),
            upload_base_url: DEFAULT_UPLOAD_BASE_URL.to_string(),
            cdn_base_url: DEFAULT_CDN_BASE_URL.to_string(),
            public_key,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    /// Set a custom upload API base URL (e.g., for proxy or testing).
    pub fn with_base_url(mut self, url: String) -> Self {
        self.upload_base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Set the CDN base used to build delivered URLs (custom CNAMEs).
    pub fn with_cdn_base_url(mut self, url: String) -> Self {
        self.cdn_base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls.max(1);
        self
    }

    fn error(&self, code: ProviderErrorCode) -> ProviderError {
        ProviderError::new(CdnProvider::Uploadcare, code)
    }

    fn cdn_url(&self, uuid: &str, filename: &str) -> String {
        format!(
            "{}/{}/{}",
            self.cdn_base_url,
            uuid,
            urlencoding::encode(filename)
        )
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ProviderError> {
        let response = request.send().await.map_err(|e| {
            self.error(ProviderErrorCode::Network)
                .with_message(e.without_url().to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::http_status(
                CdnProvider::Uploadcare,
                status.as_u16(),
                error_message_from_body(&body),
            ));
        }

        response.json().await.map_err(|e| {
            self.error(ProviderErrorCode::InvalidResponse)
                .with_message(format!("failed to read JSON: {}", e.without_url()))
        })
    }

    async fn wait_for_upload(&self, token: &str) -> Result<String, ProviderError> {
        let status_url = format!(
            "{}/from_url/status/?token={}",
            self.upload_base_url,
            urlencoding::encode(token)
        );
        for attempt in 0..self.max_polls {
            if attempt > 0 {
                tokio::time::sleep(self.poll_interval).await;
            }
            let status: StatusResponse = self
                .send_json(self.client.get(&status_url))
                .await?;
            match status.status.as_str() {
                "success" => {
                    return status.uuid.ok_or_else(|| {
                        self.error(ProviderErrorCode::InvalidResponse)
                            .with_message("status success without uuid")
                    })
                }
                "error" => {
                    return Err(self.error(ProviderErrorCode::UploadFailed).with_message(
                        status
                            .error
                            .unwrap_or_else(|| "upload reported an error".to_string()),
                    ))
                }
                _ => {}
            }
        }
        Err(self
            .error(ProviderErrorCode::Timeout)
            .with_message(format!("upload still pending after {} polls", self.max_polls)))
    }
}

#[async_trait]
impl CdnBackend for UploadcareBackend {
    fn provider(&self) -> CdnProvider {
        CdnProvider::Uploadcare
    }

    async fn upload(&self, url: &str, filename: &str) -> Result<String, ProviderError> {
        let form = [
            ("pub_key", self.public_key.as_str()),
            ("source_url", url),
            ("filename", filename),
            ("store", "auto"),
        ];
        let endpoint = format!("{}/from_url/", self.upload_base_url);
        let started: FromUrlResponse = self
            .send_json(self.client.post(endpoint).form(&form))
            .await?;

        let uuid = match started {
            FromUrlResponse::FileInfo { uuid } => uuid,
            FromUrlResponse::Token { token } => self.wait_for_upload(&token).await?,
        };
        Ok(self.cdn_url(&uuid, filename))
    }
}
