//! Embedded resource discovery in response bodies.
//!
//! The default [`SrcAttributeExtractor`] is a shallow textual scan for
//! `src="..."` attributes, not an HTML parser. It misses resources declared
//! through other attributes (`href`, `srcset`, single-quoted or unquoted
//! values) and anything built by scripts. That limitation is accepted:
//! a missed resource falls back to an interactive prompt, it is never
//! silently allowed.
//!
//! A value is classified as external by prefix alone (see [`is_external`]);
//! it is not resolved against the page's base URL.

use crate::registry::PendingApprovals;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Default cap on attribute matches considered per scanned body.
pub const DEFAULT_SCAN_LIMIT: usize = 100;

#[allow(clippy::expect_used)]
static SRC_ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"src="([^"]*)""#).expect("invalid regex"));

/// Source of embedded resource references in a response body.
pub trait LinkExtractor: Send + Sync {
    /// Return the raw reference values found in `body`, in document order.
    ///
    /// At most `limit` matches are considered.
    fn find_links(&self, body: &str, limit: usize) -> Vec<String>;
}

/// Finds double-quoted `src` attribute values.
#[derive(Debug, Clone, Copy, Default)]
pub struct SrcAttributeExtractor;

impl LinkExtractor for SrcAttributeExtractor {
    fn find_links(&self, body: &str, limit: usize) -> Vec<String> {
        SRC_ATTRIBUTE
            .captures_iter(body)
            .take(limit)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }
}

/// Whether a reference points at another origin.
///
/// Anything starting with `http` (covers `https`) or a bare `www` host is
/// external. Relative and protocol-relative references are not.
#[must_use]
pub fn is_external(link: &str) -> bool {
    link.starts_with("http") || link.starts_with("www")
}

/// Scan `body` and register its external references as allow-once entries.
///
/// Returns the references that were newly added. References already pending
/// are left untouched. The body itself is never modified.
pub fn extract_links(
    extractor: &dyn LinkExtractor,
    body: &str,
    limit: usize,
    registry: &PendingApprovals,
) -> Vec<String> {
    let mut added = Vec::new();
    for link in extractor.find_links(body, limit) {
        if is_external(&link) && registry.add(&link) {
            debug!("Pending allow-once entry: {}", link);
            added.push(link);
        }
    }
    added
}
