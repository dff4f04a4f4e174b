//! CDN offloading
//!
//! Re-hosts a vetted asset on an external provider so the transcript points
//! at a stable URL instead of the (often expiring) chat CDN link.
//!
//! - **Cloudinary**: signed upload-by-URL
//! - **Uploadcare**: upload-by-URL with a public key, polled to completion
//! - **Custom**: a caller-supplied [`CustomCdnResolver`]
//!
//! Provider selection is a closed enum ([`CdnOptions`]); [`CdnResolver`]
//! dispatches on its tag once, at construction.

pub mod cloudinary;
pub mod uploadcare;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::filename::sanitize_filename;
use super::limiter::ConcurrencyLimiter;

pub use cloudinary::CloudinaryBackend;
pub use uploadcare::UploadcareBackend;

/// Default budget for one provider call, including Uploadcare polling.
pub const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 30_000;

/// Provider identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CdnProvider {
    Cloudinary,
    Uploadcare,
    Custom,
}

impl fmt::Display for CdnProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cloudinary => write!(f, "CLOUDINARY"),
            Self::Uploadcare => write!(f, "UPLOADCARE"),
            Self::Custom => write!(f, "CUSTOM"),
        }
    }
}

/// Failure category of a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorCode {
    /// Non-success HTTP status from the provider API.
    HttpStatus,
    /// Connection-level failure before a response arrived.
    Network,
    /// Response arrived but could not be understood.
    InvalidResponse,
    /// Provider accepted the request but reported the upload as failed.
    UploadFailed,
    Timeout,
    /// Raised by a custom resolver.
    Custom,
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::HttpStatus => "http_status",
            Self::Network => "network",
            Self::InvalidResponse => "invalid_response",
            Self::UploadFailed => "upload_failed",
            Self::Timeout => "timeout",
            Self::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Structured failure from a CDN provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    pub provider: CdnProvider,
    pub code: ProviderErrorCode,
    pub status: Option<u16>,
    pub hint: Option<String>,
    pub message: Option<String>,
}

impl ProviderError {
    pub fn new(provider: CdnProvider, code: ProviderErrorCode) -> Self {
        Self {
            provider,
            code,
            status: None,
            hint: None,
            message: None,
        }
    }

    /// Error for a non-success HTTP response, with a hint derived from the status.
    pub fn http_status(provider: CdnProvider, status: u16, message: Option<String>) -> Self {
        Self {
            provider,
            code: ProviderErrorCode::HttpStatus,
            status: Some(status),
            hint: status_hint(status).map(str::to_string),
            message,
        }
    }

    /// Error raised from a custom resolver.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::new(CdnProvider::Custom, ProviderErrorCode::Custom).with_message(message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} provider error ({})", self.provider, self.code)?;
        if let Some(status) = self.status {
            write!(f, " HTTP {status}")?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " (hint: {hint})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ProviderError {}

fn status_hint(status: u16) -> Option<&'static str> {
    match status {
        400 => Some("the provider rejected the asset or request parameters"),
        401 | 403 => Some("check the provider credentials"),
        404 => Some("check the account name or endpoint"),
        413 => Some("the asset is larger than the provider accepts"),
        420 | 429 => Some("the provider is rate limiting requests; lower the CDN concurrency"),
        500..=599 => Some("the provider is unavailable; retry later"),
        _ => None,
    }
}

/// Caller-supplied resolution for the CUSTOM provider.
#[async_trait]
pub trait CustomCdnResolver: Send + Sync {
    /// Re-host `url` under `domain`, returning the new URL.
    async fn resolve(
        &self,
        url: &str,
        filename: &str,
        domain: &str,
        suppress_warnings: bool,
    ) -> Result<String, ProviderError>;
}

/// Provider selection plus credentials. Immutable for a run.
#[derive(Clone)]
pub enum CdnOptions {
    Cloudinary {
        cloud_name: String,
        api_key: String,
        api_secret: String,
    },
    Uploadcare {
        public_key: String,
    },
    Custom {
        resolver: Arc<dyn CustomCdnResolver>,
        domain: String,
    },
}

impl CdnOptions {
    pub fn provider(&self) -> CdnProvider {
        match self {
            Self::Cloudinary { .. } => CdnProvider::Cloudinary,
            Self::Uploadcare { .. } => CdnProvider::Uploadcare,
            Self::Custom { .. } => CdnProvider::Custom,
        }
    }
}

impl fmt::Debug for CdnOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cloudinary {
                cloud_name,
                api_key,
                ..
            } => f
                .debug_struct("Cloudinary")
                .field("cloud_name", cloud_name)
                .field("api_key", api_key)
                .field("api_secret", &"***REDACTED***")
                .finish(),
            Self::Uploadcare { public_key } => f
                .debug_struct("Uploadcare")
                .field("public_key", public_key)
                .finish(),
            Self::Custom { domain, .. } => f
                .debug_struct("Custom")
                .field("domain", domain)
                .finish_non_exhaustive(),
        }
    }
}

/// One provider backend.
#[async_trait]
pub trait CdnBackend: Send + Sync {
    fn provider(&self) -> CdnProvider;

    /// Upload `url` under the already-sanitized `filename`.
    async fn upload(&self, url: &str, filename: &str) -> Result<String, ProviderError>;
}

struct CustomBackend {
    resolver: Arc<dyn CustomCdnResolver>,
    domain: String,
    suppress_warnings: bool,
}

#[async_trait]
impl CdnBackend for CustomBackend {
    fn provider(&self) -> CdnProvider {
        CdnProvider::Custom
    }

    async fn upload(&self, url: &str, filename: &str) -> Result<String, ProviderError> {
        self.resolver
            .resolve(url, filename, &self.domain, self.suppress_warnings)
            .await
    }
}

/// Offloads vetted assets to the configured provider.
pub struct CdnResolver {
    backend: Box<dyn CdnBackend>,
    limiter: Arc<ConcurrencyLimiter>,
    timeout: Duration,
}

impl CdnResolver {
    /// Build the backend selected by `options`.
    pub fn new(
        options: &CdnOptions,
        limiter: Arc<ConcurrencyLimiter>,
        suppress_warnings: bool,
    ) -> Self {
        let backend: Box<dyn CdnBackend> = match options {
            CdnOptions::Cloudinary {
                cloud_name,
                api_key,
                api_secret,
            } => Box::new(CloudinaryBackend::new(
                cloud_name.clone(),
                api_key.clone(),
                api_secret.clone(),
            )),
            CdnOptions::Uploadcare { public_key } => {
                Box::new(UploadcareBackend::new(public_key.clone()))
            }
            CdnOptions::Custom { resolver, domain } => Box::new(CustomBackend {
                resolver: resolver.clone(),
                domain: domain.clone(),
                suppress_warnings,
            }),
        };
        Self::with_backend(backend, limiter)
    }

    /// Use an explicitly constructed backend (e.g. one with a custom base URL).
    pub fn with_backend(backend: Box<dyn CdnBackend>, limiter: Arc<ConcurrencyLimiter>) -> Self {
        Self {
            backend,
            limiter,
            timeout: Duration::from_millis(DEFAULT_PROVIDER_TIMEOUT_MS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn provider(&self) -> CdnProvider {
        self.backend.provider()
    }

    /// Re-host `safe_url` and return the provider URL.
    ///
    /// `filename` is sanitized before it reaches the provider. The call waits
    /// for a slot on the CDN limiter; the timeout covers only the call itself.
    pub async fn resolve(&self, safe_url: &str, filename: &str) -> Result<String, ProviderError> {
        let filename = sanitize_filename(filename);
        let provider = self.backend.provider();
        self.limiter
            .run(async {
                tokio::time::timeout(self.timeout, self.backend.upload(safe_url, &filename))
                    .await
                    .map_err(|_| {
                        ProviderError::new(provider, ProviderErrorCode::Timeout)
                            .with_message(format!("no result within {:?}", self.timeout))
                    })?
            })
            .await
    }
}

/// HTTP client shared by the built-in backends.
pub(crate) fn provider_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Pull a human-readable message out of a provider error body.
pub(crate) fn error_message_from_body(body: &str) -> Option<String> {
    if body.trim().is_empty() {
        return None;
    }
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("error"))
            .or_else(|| v.get("detail"))
            .or_else(|| v.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
    });
    Some(message.unwrap_or_else(|| body.chars().take(200).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingResolver {
        seen: Mutex<Vec<(String, String, String, bool)>>,
    }

    #[async_trait]
    impl CustomCdnResolver for RecordingResolver {
        async fn resolve(
            &self,
            url: &str,
            filename: &str,
            domain: &str,
            suppress_warnings: bool,
        ) -> Result<String, ProviderError> {
            self.seen.lock().push((
                url.to_string(),
                filename.to_string(),
                domain.to_string(),
                suppress_warnings,
            ));
            Ok(format!("https://{domain}/{filename}"))
        }
    }

    struct FailingResolver;

    #[async_trait]
    impl CustomCdnResolver for FailingResolver {
        async fn resolve(&self, _: &str, _: &str, _: &str, _: bool) -> Result<String, ProviderError> {
            Err(ProviderError::custom("bucket full"))
        }
    }

    struct SlowBackend;

    #[async_trait]
    impl CdnBackend for SlowBackend {
        fn provider(&self) -> CdnProvider {
            CdnProvider::Uploadcare
        }

        async fn upload(&self, _url: &str, _filename: &str) -> Result<String, ProviderError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok("never".to_string())
        }
    }

    #[tokio::test]
    async fn test_custom_provider_receives_sanitized_filename() {
        let recorder = Arc::new(RecordingResolver {
            seen: Mutex::new(Vec::new()),
        });
        let options = CdnOptions::Custom {
            resolver: recorder.clone(),
            domain: "media.example".to_string(),
        };
        let resolver = CdnResolver::new(&options, Arc::new(ConcurrencyLimiter::cdn()), true);
        assert_eq!(resolver.provider(), CdnProvider::Custom);

        let url = resolver
            .resolve("https://cdn.example/a.png", "../evil:name?.png")
            .await
            .unwrap();
        assert_eq!(url, "https://media.example/..evilname.png");

        let seen = recorder.seen.lock();
        assert_eq!(
            seen[0],
            (
                "https://cdn.example/a.png".to_string(),
                "..evilname.png".to_string(),
                "media.example".to_string(),
                true
            )
        );
    }

    #[tokio::test]
    async fn test_custom_provider_error_propagates() {
        let options = CdnOptions::Custom {
            resolver: Arc::new(FailingResolver),
            domain: "media.example".to_string(),
        };
        let resolver = CdnResolver::new(&options, Arc::new(ConcurrencyLimiter::cdn()), false);
        let err = resolver.resolve("https://cdn.example/a.png", "a.png").await.unwrap_err();
        assert_eq!(err.provider, CdnProvider::Custom);
        assert_eq!(err.code, ProviderErrorCode::Custom);
        assert_eq!(err.message.as_deref(), Some("bucket full"));
    }

    #[tokio::test]
    async fn test_timeout_becomes_provider_error() {
        let resolver = CdnResolver::with_backend(Box::new(SlowBackend), Arc::new(ConcurrencyLimiter::cdn()))
            .with_timeout(Duration::from_millis(20));
        let err = resolver.resolve("https://cdn.example/a.png", "a.png").await.unwrap_err();
        assert_eq!(err.provider, CdnProvider::Uploadcare);
        assert_eq!(err.code, ProviderErrorCode::Timeout);
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::http_status(CdnProvider::Cloudinary, 401, Some("Invalid Signature".to_string()));
        assert_eq!(
            err.to_string(),
            "CLOUDINARY provider error (http_status) HTTP 401: Invalid Signature (hint: check the provider credentials)"
        );
        let err = ProviderError::new(CdnProvider::Uploadcare, ProviderErrorCode::Network);
        assert_eq!(err.to_string(), "UPLOADCARE provider error (network)");
    }

    #[test]
    fn test_status_hints() {
        assert!(status_hint(429).unwrap().contains("rate limiting"));
        assert!(status_hint(503).unwrap().contains("unavailable"));
        assert_eq!(status_hint(418), None);
    }

    #[test]
    fn test_options_debug_redacts_secret() {
        let options = CdnOptions::Cloudinary {
            cloud_name: "demo".to_string(),
            api_key: "1234".to_string(),
            api_secret: "topsecret".to_string(),
        };
        let debug = format!("{options:?}");
        assert!(debug.contains("demo"));
        assert!(!debug.contains("topsecret"));
        assert_eq!(options.provider(), CdnProvider::Cloudinary);
    }

    #[test]
    fn test_error_message_from_body() {
        assert_eq!(
            error_message_from_body(r#"{"error":{"message":"Invalid API key"}}"#).as_deref(),
            Some("Invalid API key")
        );
        assert_eq!(
            error_message_from_body(r#"{"detail":"pub_key is required."}"#).as_deref(),
            Some("pub_key is required.")
        );
        assert_eq!(error_message_from_body("plain failure").as_deref(), Some("plain failure"));
        assert_eq!(error_message_from_body("  "), None);
    }
}
