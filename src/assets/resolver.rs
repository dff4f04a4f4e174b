//! Asset resolution orchestrator
//!
//! Walks a transcript, resolves every asset URL exactly once per run and
//! writes the results back in place:
//!
//! 1. `attachment://<name>` references are linked to the owning message's
//!    attachment of that name
//! 2. every URL slot is collected and requested from a run-scoped
//!    [`ResolutionCache`], so identical strings share one resolution
//! 3. each unique URL is vetted, then offloaded to the CDN, inlined, or kept
//! 4. results (or the fallback placeholder) are written into every slot
//!
//! Per-asset failures never fail the run. Unsafe URLs degrade silently.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::future::join_all;
use thiserror::Error;
use url::Url;

use super::cache::{CacheOutcome, ResolutionCache};
use super::cdn::{CdnBackend, CdnOptions, CdnResolver};
use super::filename::filename_from_url;
use super::inline::{InlineConfig, InlineEncoder};
use super::limiter::{
    ConcurrencyLimiter, LimiterError, DEFAULT_CDN_CONCURRENCY, DEFAULT_INLINE_CONCURRENCY,
};
use super::safety::{SafetyConfig, UrlSafetyChecker};
use crate::logging::warn_unless_suppressed;
use crate::transcript::visit::message_slots;
use crate::transcript::{
    for_each_message_mut, visit_asset_slots_mut, AssetSlot, Message, Transcript, TranscriptState,
};

/// 1x1 transparent PNG substituted for assets that cannot be resolved.
pub const FALLBACK_IMAGE_DATA_URL: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

/// Pseudo-scheme referencing an attachment of the same message by filename.
pub const ATTACHMENT_SCHEME: &str = "attachment://";

/// Errors that prevent a resolver from being built.
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("invalid limiter configuration: {0}")]
    Limiter(#[from] LimiterError),
}

/// Per-run behaviour of [`AssetResolver`].
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Fetch vetted assets and embed them as `data:` URLs.
    pub save_inline: bool,
    /// Silence resolution warnings. Safety rejections are never logged.
    pub suppress_warnings: bool,
    /// Clear optional slots (avatars, icons, emoji) on failure instead of
    /// writing the placeholder. Required slots always get the placeholder.
    pub allow_null: bool,
    pub cdn: Option<CdnOptions>,
    pub cdn_concurrency: usize,
    pub inline_concurrency: usize,
    pub safety: SafetyConfig,
    pub inline: InlineConfig,
    /// Ceiling on distinct URLs per run; excess URLs get the fallback.
    pub max_cache_entries: Option<usize>,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            save_inline: false,
            suppress_warnings: false,
            allow_null: false,
            cdn: None,
            cdn_concurrency: DEFAULT_CDN_CONCURRENCY,
            inline_concurrency: DEFAULT_INLINE_CONCURRENCY,
            safety: SafetyConfig::default(),
            inline: InlineConfig::default(),
            max_cache_entries: None,
        }
    }
}

/// Counters describing one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// Distinct URLs that went through the pipeline.
    pub unique_urls: usize,
    /// URL-bearing slots visited, duplicates included.
    pub references: usize,
    /// Slots that received the fallback (or were cleared).
    pub fallbacks: usize,
    /// Distinct URLs refused because the cache ceiling was reached.
    pub over_capacity: usize,
    /// Resolution warnings raised, whether or not they were printed.
    pub warnings: usize,
}

/// Drives the resolution pipeline over a transcript.
pub struct AssetResolver {
    checker: UrlSafetyChecker,
    cdn: Option<CdnResolver>,
    inline: InlineEncoder,
    cdn_limiter: Arc<ConcurrencyLimiter>,
    inline_limiter: Arc<ConcurrencyLimiter>,
    save_inline: bool,
    suppress_warnings: bool,
    allow_null: bool,
    max_cache_entries: Option<usize>,
}

impl AssetResolver {
    /// Build a resolver with its own limiters and the system DNS resolver.
    pub fn new(options: ResolverOptions) -> Result<Self, ResolverError> {
        let cdn_limiter = Arc::new(ConcurrencyLimiter::new("cdn", options.cdn_concurrency)?);
        let inline_limiter = Arc::new(ConcurrencyLimiter::new(
            "inline",
            options.inline_concurrency,
        )?);
        Ok(Self::with_limiters(options, cdn_limiter, inline_limiter))
    }

    /// Build a resolver gated by existing limiters, e.g. to share them across
    /// runs. The concurrency values in `options` are ignored.
    pub fn with_limiters(
        options: ResolverOptions,
        cdn_limiter: Arc<ConcurrencyLimiter>,
        inline_limiter: Arc<ConcurrencyLimiter>,
    ) -> Self {
        let checker = UrlSafetyChecker::system(options.safety.clone());
        let cdn = options
            .cdn
            .as_ref()
            .map(|cdn| CdnResolver::new(cdn, cdn_limiter.clone(), options.suppress_warnings));
        let inline = InlineEncoder::new(inline_limiter.clone(), options.inline.clone());
        Self {
            checker,
            cdn,
            inline,
            cdn_limiter,
            inline_limiter,
            save_inline: options.save_inline,
            suppress_warnings: options.suppress_warnings,
            allow_null: options.allow_null,
            max_cache_entries: options.max_cache_entries,
        }
    }

    /// Replace the safety checker (e.g. one with a static host table).
    pub fn with_checker(mut self, checker: UrlSafetyChecker) -> Self {
        self.checker = checker;
        self
    }

    /// Use an explicitly constructed CDN backend, gated by this resolver's
    /// CDN limiter.
    pub fn with_cdn_backend(mut self, backend: Box<dyn CdnBackend>) -> Self {
        self.cdn = Some(CdnResolver::with_backend(backend, self.cdn_limiter.clone()));
        self
    }

    pub fn cdn_limiter(&self) -> &Arc<ConcurrencyLimiter> {
        &self.cdn_limiter
    }

    pub fn inline_limiter(&self) -> &Arc<ConcurrencyLimiter> {
        &self.inline_limiter
    }

    /// Resolve every asset in `transcript`.
    pub async fn resolve_transcript(&self, transcript: &mut Transcript) -> ResolveReport {
        self.resolve(&mut transcript.messages, &mut transcript.state)
            .await
    }

    /// Resolve every asset referenced by `messages` (replies included) and
    /// `state`, rewriting the slots in place.
    pub async fn resolve(
        &self,
        messages: &mut [Message],
        state: &mut TranscriptState,
    ) -> ResolveReport {
        let mut report = ResolveReport::default();

        for_each_message_mut(messages, &mut |message| {
            report.fallbacks += self.link_attachments(message);
        });

        let mut urls = Vec::new();
        visit_asset_slots_mut(messages, state, &mut |_, slot| {
            if let Some(url) = slot.url().filter(|url| needs_resolution(url)) {
                urls.push(url.to_string());
            }
        });
        report.references = urls.len();

        let cache = ResolutionCache::with_max_entries(self.max_cache_entries);
        let warnings = AtomicUsize::new(0);
        let counter = &warnings;
        let outcomes = join_all(urls.iter().map(|url| {
            cache.get_or_resolve(url, move || self.resolve_url(url, counter))
        }))
        .await;

        let mut resolved: HashMap<&str, Option<String>> = HashMap::new();
        let mut refused: HashSet<&str> = HashSet::new();
        for (url, outcome) in urls.iter().zip(outcomes) {
            match outcome {
                CacheOutcome::Shared(value) => {
                    resolved.insert(url, value);
                }
                CacheOutcome::OverCapacity => {
                    refused.insert(url);
                    resolved.insert(url, None);
                }
            }
        }
        report.unique_urls = cache.len();
        report.over_capacity = refused.len();
        report.warnings = warnings.load(Ordering::Relaxed);
        if report.over_capacity > 0 {
            tracing::debug!(
                refused = report.over_capacity,
                limit = ?self.max_cache_entries,
                "cache ceiling reached, remaining assets use the fallback"
            );
        }

        visit_asset_slots_mut(messages, state, &mut |_, mut slot| {
            let Some(url) = slot.url().filter(|url| needs_resolution(url)) else {
                return;
            };
            let value = resolved.get(url).cloned().flatten();
            match value {
                Some(value) => slot.set(Some(value), FALLBACK_IMAGE_DATA_URL),
                None => {
                    self.write_fallback(&mut slot);
                    report.fallbacks += 1;
                }
            }
        });

        tracing::debug!(
            unique_urls = report.unique_urls,
            references = report.references,
            fallbacks = report.fallbacks,
            "asset resolution finished"
        );
        report
    }

    /// Rewrite `attachment://` slots of one message. Returns how many had no
    /// matching attachment and received the fallback.
    fn link_attachments(&self, message: &mut Message) -> usize {
        let by_name: HashMap<String, String> = message
            .attachments
            .iter()
            .map(|a| (a.filename.clone(), a.url.clone()))
            .collect();
        let mut missing = 0;
        message_slots(message, &mut |_, mut slot| {
            let Some(name) = slot.url().and_then(|url| url.strip_prefix(ATTACHMENT_SCHEME)) else {
                return;
            };
            let target = by_name.get(name).cloned().or_else(|| {
                urlencoding::decode(name)
                    .ok()
                    .and_then(|decoded| by_name.get(decoded.as_ref()).cloned())
            });
            match target {
                Some(url) => slot.set(Some(url), FALLBACK_IMAGE_DATA_URL),
                None => {
                    self.write_fallback(&mut slot);
                    missing += 1;
                }
            }
        });
        missing
    }

    fn write_fallback(&self, slot: &mut AssetSlot<'_>) {
        if self.allow_null && slot.is_optional() {
            slot.set(None, FALLBACK_IMAGE_DATA_URL);
        } else {
            slot.set(Some(FALLBACK_IMAGE_DATA_URL.to_string()), FALLBACK_IMAGE_DATA_URL);
        }
    }

    /// Run the pipeline for one unique URL. `None` means "use the fallback".
    async fn resolve_url(&self, url: &str, warnings: &AtomicUsize) -> Option<String> {
        let vetted = self.checker.check(url).await;
        if !vetted.safe {
            return None;
        }

        if let Some(cdn) = &self.cdn {
            let filename = Url::parse(&vetted.url)
                .map(|parsed| filename_from_url(&parsed))
                .unwrap_or_default();
            return match cdn.resolve(&vetted.url, &filename).await {
                Ok(hosted) => Some(hosted),
                Err(e) => {
                    warnings.fetch_add(1, Ordering::Relaxed);
                    warn_unless_suppressed(
                        self.suppress_warnings,
                        &format!("CDN upload failed for {url}, using fallback: {e}"),
                    );
                    None
                }
            };
        }

        if self.save_inline {
            return match self.inline.encode(&vetted).await {
                Ok(data_url) => Some(data_url),
                Err(e) => {
                    warnings.fetch_add(1, Ordering::Relaxed);
                    warn_unless_suppressed(
                        self.suppress_warnings,
                        &format!("failed to inline {url}, using fallback: {e}"),
                    );
                    None
                }
            };
        }

        Some(url.to_string())
    }
}

/// Raster image types a `data:` URL may carry and still be left in place.
const INERT_DATA_IMAGE_TYPES: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

/// Empty strings and base64 raster `data:` URLs are already final. Anything
/// else, other `data:` URLs included, goes through the safety checker.
fn needs_resolution(url: &str) -> bool {
    !url.is_empty() && !is_inert_data_url(url)
}

fn is_inert_data_url(url: &str) -> bool {
    let Some((header, payload)) = url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(','))
    else {
        return false;
    };
    let Some(media_type) = header.strip_suffix(";base64") else {
        return false;
    };
    INERT_DATA_IMAGE_TYPES.contains(&media_type) && STANDARD.decode(payload).is_ok()
}
