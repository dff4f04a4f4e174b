//! Asset resolution pipeline
//!
//! Every URL found in a transcript is attacker-influenced. Before anything is
//! fetched or handed to a CDN the URL is classified, and fetches go to the
//! vetted addresses only.
//!
//! ## Pipeline
//!
//! 1. [`safety`]: scheme/credential checks, DNS resolution with a timeout,
//!    rejection of private, loopback, link-local and metadata addresses
//! 2. [`cdn`]: optional offload to Cloudinary, Uploadcare or a custom provider
//! 3. [`inline`]: optional pinned fetch, encoded as a `data:` URL
//! 4. [`resolver`]: dedupes through a single-flight [`cache`], writes back
//!
//! Outbound work is gated by two [`limiter`]s, one for CDN calls and one for
//! inline fetches.
//!
//! ## Security notes
//!
//! - DNS rebinding: fetch clients are pinned to the vetted IP set
//!   ([`pinning`]), never the system resolver
//! - Redirects and proxies are disabled on pinned clients
//! - Names sent to providers pass through [`filename`] first
//!
//! ```
//! use transcript_assets::assets::sanitize_filename;
//!
//! assert_eq!(sanitize_filename("  ../report?.pdf "), "..report.pdf");
//! ```

pub mod cache;
pub mod cdn;
pub mod filename;
pub mod inline;
pub mod limiter;
pub mod pinning;
pub mod resolver;
pub mod safety;

pub use cache::{CacheOutcome, ResolutionCache};
pub use cdn::{CdnOptions, CdnProvider, CdnResolver, CustomCdnResolver, ProviderError};
pub use filename::sanitize_filename;
pub use limiter::{ConcurrencyLimiter, LimiterError};
pub use pinning::{pin_url, PinnedResolver};
pub use resolver::{
    AssetResolver, ResolveReport, ResolverError, ResolverOptions, FALLBACK_IMAGE_DATA_URL,
};
pub use safety::{HostResolver, SafeUrlResult, StaticHostResolver, UrlSafetyChecker};
