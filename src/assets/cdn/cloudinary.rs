//! Cloudinary backend
//!
//! Uses the signed upload API with a remote `file` URL, so Cloudinary pulls
//! the asset itself and nothing is proxied through this process.
//! See: https://cloudinary.com/documentation/upload_images#generating_authentication_signatures

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{
    error_message_from_body, provider_client, CdnBackend, CdnProvider, ProviderError,
    ProviderErrorCode,
};

const DEFAULT_BASE_URL: &str = "https://api.cloudinary.com";

/// Signed-upload client for one Cloudinary cloud.
pub struct CloudinaryBackend {
    client: reqwest::Client,
    base_url: String,
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

impl CloudinaryBackend {
    pub fn new(cloud_name: String, api_key: String, api_secret: String) -> Self {
        Self {
            client: provider_client(),
            base_url: DEFAULT_BASE_URL.to_string(),
            cloud_name,
            api_key,
            api_secret,
        }
    }

    /// Set a custom base URL (e.g., for proxy or testing).
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn upload_endpoint(&self) -> String {
        format!("{}/v1_1/{}/image/upload", self.base_url, self.cloud_name)
    }

    fn error(&self, code: ProviderErrorCode) -> ProviderError {
        ProviderError::new(CdnProvider::Cloudinary, code)
    }
}

/// Public id for an upload: the filename stem made URL-path friendly, plus a
/// digest of the source URL so different sources never overwrite each other.
fn public_id(url: &str, filename: &str) -> String {
    let stem = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .filter(|stem| !stem.is_empty())
        .unwrap_or(filename);
    let stem: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    format!("{}_{}", stem, &digest[..12])
}

/// Signature over the alphabetically sorted `key=value` pairs joined by `&`,
/// followed by the API secret.
pub fn sign(params: &[(&str, &str)], api_secret: &str) -> String {
    let mut sorted: Vec<&(&str, &str)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let to_sign = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    hex::encode(Sha256::digest(format!("{to_sign}{api_secret}").as_bytes()))
}

#[async_trait]
impl CdnBackend for CloudinaryBackend {
    fn provider(&self) -> CdnProvider {
        CdnProvider::Cloudinary
    }

    async fn upload(&self, url: &str, filename: &str) -> Result<String, ProviderError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
            .to_string();
        let public_id = public_id(url, filename);
        let signature = sign(
            &[("public_id", public_id.as_str()), ("timestamp", timestamp.as_str())],
            &self.api_secret,
        );

        let form = [
            ("file", url),
            ("public_id", public_id.as_str()),
            ("timestamp", timestamp.as_str()),
            ("api_key", self.api_key.as_str()),
            ("signature_algorithm", "sha256"),
            ("signature", signature.as_str()),
        ];

        let response = self
            .client
            .post(self.upload_endpoint())
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                self.error(ProviderErrorCode::Network)
                    .with_message(e.without_url().to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::http_status(
                CdnProvider::Cloudinary,
                status.as_u16(),
                error_message_from_body(&body),
            ));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            self.error(ProviderErrorCode::InvalidResponse)
                .with_message(format!("failed to read JSON: {}", e.without_url()))
        })?;

        body.get("secure_url")
            .or_else(|| body.get("url"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                self.error(ProviderErrorCode::InvalidResponse)
                    .with_message("response has no secure_url")
            })
    }
}
