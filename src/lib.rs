//! transcript-assets library
//!
//! Resolves the asset URLs of a captured chat transcript (avatars,
//! attachments, embed images, component media) without exposing the host to
//! SSRF: URLs are vetted, fetched only from pinned addresses, optionally
//! re-hosted on a CDN or inlined, deduplicated per run, and replaced by a
//! placeholder when anything goes wrong.

pub mod assets;
pub mod cli;
pub mod config;
pub mod logging;
pub mod transcript;
