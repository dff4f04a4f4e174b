//! Inline asset encoding
//!
//! Fetches a vetted asset over a pinned connection and turns it into a
//! `data:` URL so the transcript carries no outbound references.
//!
//! - Plain `http` requests go to the IP literal with the original `Host` header
//! - `https` requests keep the hostname (for SNI and certificate checks) and
//!   resolve it through a [`PinnedResolver`]
//! - Redirects and proxies are disabled, bodies are streamed against a size
//!   limit

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use bytes::BytesMut;
use thiserror::Error;
use url::Url;

use super::limiter::ConcurrencyLimiter;
use super::pinning::{pin_url, PinError, PinnedResolver};
use super::safety::SafeUrlResult;

/// Default maximum size of an inlined asset (8 MiB).
pub const DEFAULT_MAX_INLINE_BYTES: usize = 8 * 1024 * 1024;

/// Default timeout for one inline fetch.
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 15_000;

const USER_AGENT: &str = concat!("transcript-assets/", env!("CARGO_PKG_VERSION"));

/// Errors from fetching or encoding an asset.
#[derive(Error, Debug, Clone)]
pub enum InlineError {
    #[error("URL was not vetted as safe")]
    NotVetted,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Pin(#[from] PinError),

    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("asset exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("asset body is empty")]
    Empty,
}

/// Settings for [`InlineEncoder`].
#[derive(Debug, Clone)]
pub struct InlineConfig {
    pub timeout: Duration,
    pub max_bytes: usize,
}

impl Default for InlineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
            max_bytes: DEFAULT_MAX_INLINE_BYTES,
        }
    }
}

/// Fetches vetted assets and encodes them as `data:` URLs.
pub struct InlineEncoder {
    limiter: Arc<ConcurrencyLimiter>,
    config: InlineConfig,
}

impl InlineEncoder {
    pub fn new(limiter: Arc<ConcurrencyLimiter>, config: InlineConfig) -> Self {
        Self { limiter, config }
    }

    /// Fetch `safe.url` pinned to `safe.safe_ips` and return a `data:` URL.
    pub async fn encode(&self, safe: &SafeUrlResult) -> Result<String, InlineError> {
        if !safe.safe {
            return Err(InlineError::NotVetted);
        }
        self.limiter.run(self.fetch_and_encode(safe)).await
    }

    async fn fetch_and_encode(&self, safe: &SafeUrlResult) -> Result<String, InlineError> {
        let (content_type, body) = self.fetch_pinned(safe).await?;
        let b64 = base64::engine::general_purpose::STANDARD.encode(&body);
        Ok(format!("data:{};base64,{}", content_type, b64))
    }

    async fn fetch_pinned(&self, safe: &SafeUrlResult) -> Result<(String, BytesMut), InlineError> {
        let url = Url::parse(&safe.url).map_err(|e| InlineError::InvalidUrl(e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| InlineError::InvalidUrl(safe.url.clone()))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| InlineError::InvalidUrl(safe.url.clone()))?;
        let pinned = PinnedResolver::new(host.clone(), safe.safe_ips.clone())?;

        let builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .connect_timeout(self.config.timeout)
            .timeout(self.config.timeout)
            .user_agent(USER_AGENT);

        let request = if url.scheme() == "https" {
            let client = pinned
                .install(builder, port)
                .build()
                .map_err(|e| InlineError::Client(e.to_string()))?;
            client.get(url.clone())
        } else {
            let client = builder
                .build()
                .map_err(|e| InlineError::Client(e.to_string()))?;
            let host_header = match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.clone(),
            };
            client
                .get(pin_url(&url, pinned.pick())?)
                .header(reqwest::header::HOST, host_header)
        };

        let mut response = request
            .send()
            .await
            .map_err(|e| InlineError::Request(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(InlineError::Status(status.as_u16()));
        }

        let limit = self.config.max_bytes;
        if response
            .content_length()
            .is_some_and(|len| len > limit as u64)
        {
            return Err(InlineError::TooLarge { limit });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(normalize_content_type)
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| InlineError::Request(e.without_url().to_string()))?
        {
            if body.len() + chunk.len() > limit {
                return Err(InlineError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        if body.is_empty() {
            return Err(InlineError::Empty);
        }

        tracing::debug!(host = %host, bytes = body.len(), content_type = %content_type, "inlined asset");
        Ok((content_type, body))
    }
}

/// Lowercased MIME type without parameters.
fn normalize_content_type(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use std::net::{IpAddr, SocketAddr};

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn app() -> Router {
        Router::new()
            .route(
                "/cat.png",
                get(|| async { ([(header::CONTENT_TYPE, "image/PNG; charset=binary")], vec![1u8, 2, 3]) }),
            )
            .route(
                "/host",
                get(|headers: HeaderMap| async move {
                    let host = headers
                        .get(header::HOST)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    ([(header::CONTENT_TYPE, "text/plain")], host)
                }),
            )
            .route("/big", get(|| async { vec![0u8; 4096] }))
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .route("/empty", get(|| async { "" }))
    }

    fn vetted(addr: SocketAddr, path: &str) -> SafeUrlResult {
        SafeUrlResult {
            safe: true,
            url: format!("http://assets.test:{}{}", addr.port(), path),
            safe_ips: vec![addr.ip()],
        }
    }

    fn encoder(max_bytes: usize) -> InlineEncoder {
        InlineEncoder::new(
            Arc::new(ConcurrencyLimiter::inline()),
            InlineConfig {
                timeout: Duration::from_secs(5),
                max_bytes,
            },
        )
    }

    fn decode(data_url: &str) -> (String, Vec<u8>) {
        let rest = data_url.strip_prefix("data:").unwrap();
        let (mime, b64) = rest.split_once(";base64,").unwrap();
        let bytes = base64::engine::general_purpose::STANDARD.decode(b64).unwrap();
        (mime.to_string(), bytes)
    }

    #[tokio::test]
    async fn test_encodes_as_data_url() {
        let addr = serve(app()).await;
        let data_url = encoder(1024).encode(&vetted(addr, "/cat.png")).await.unwrap();
        let (mime, bytes) = decode(&data_url);
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_connects_to_pinned_ip_with_original_host() {
        // assets.test does not resolve anywhere; reaching the server proves the
        // request went to the vetted IP.
        let addr = serve(app()).await;
        let data_url = encoder(1024).encode(&vetted(addr, "/host")).await.unwrap();
        let (_, bytes) = decode(&data_url);
        assert_eq!(String::from_utf8(bytes).unwrap(), format!("assets.test:{}", addr.port()));
    }

    #[tokio::test]
    async fn test_https_dials_pinned_ip_and_keeps_sni() {
        use tokio::io::AsyncReadExt;

        // Plain TCP listener: it records the TLS ClientHello and hangs up.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut header = [0u8; 5];
            socket.read_exact(&mut header).await.unwrap();
            let len = u16::from_be_bytes([header[3], header[4]]) as usize;
            let mut hello = vec![0u8; len];
            socket.read_exact(&mut hello).await.unwrap();
            let _ = tx.send((header[0], hello));
        });

        let safe = SafeUrlResult {
            safe: true,
            url: format!("https://unresolvable.test:{}/cat.png", addr.port()),
            safe_ips: vec![addr.ip()],
        };
        let err = encoder(1024).encode(&safe).await.unwrap_err();
        assert!(matches!(err, InlineError::Request(_)), "{err:?}");

        let (record_type, hello) = rx.await.unwrap();
        // 0x16: TLS handshake record.
        assert_eq!(record_type, 0x16);
        assert!(hello
            .windows(b"unresolvable.test".len())
            .any(|w| w == b"unresolvable.test"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let addr = serve(app()).await;
        let err = encoder(1024).encode(&vetted(addr, "/missing")).await.unwrap_err();
        assert!(matches!(err, InlineError::Status(404)));
    }

    #[tokio::test]
    async fn test_size_limit_enforced() {
        let addr = serve(app()).await;
        let err = encoder(1000).encode(&vetted(addr, "/big")).await.unwrap_err();
        assert!(matches!(err, InlineError::TooLarge { limit: 1000 }));
    }

    #[tokio::test]
    async fn test_empty_body_is_error() {
        let addr = serve(app()).await;
        let err = encoder(1024).encode(&vetted(addr, "/empty")).await.unwrap_err();
        assert!(matches!(err, InlineError::Empty));
    }

    #[tokio::test]
    async fn test_refuses_unvetted_input() {
        let unsafe_result = SafeUrlResult {
            safe: false,
            url: String::new(),
            safe_ips: vec![],
        };
        let err = encoder(1024).encode(&unsafe_result).await.unwrap_err();
        assert!(matches!(err, InlineError::NotVetted));
    }

    #[tokio::test]
    async fn test_empty_ip_set_is_error() {
        let safe = SafeUrlResult {
            safe: true,
            url: "http://assets.test/a.png".to_string(),
            safe_ips: Vec::<IpAddr>::new(),
        };
        let err = encoder(1024).encode(&safe).await.unwrap_err();
        assert!(matches!(err, InlineError::Pin(PinError::EmptyIpSet)));
    }

    #[test]
    fn test_normalize_content_type() {
        assert_eq!(normalize_content_type("Image/JPEG; q=1"), "image/jpeg");
        assert_eq!(normalize_content_type("image/gif"), "image/gif");
    }
}
