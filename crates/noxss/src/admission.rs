//! Per-request admission decisions.
//!
//! [`AdmissionEngine::decide`] produces a [`Verdict`] for every intercepted
//! request before it reaches its destination.
//!
//! # Check Order
//!
//! 1. No `Referer` (or an empty one): forward. First-party navigation and
//!    non-browser clients are never blocked.
//! 2. Referer host equals target host: forward (same origin).
//! 3. Target URL is a pending allow-once entry: consume it and forward.
//! 4. Ask the [`ConfirmationGateway`]: forward on approval, block on decline.
//!
//! A referer that fails to parse is logged and, if no host can be recovered
//! from the raw string, handled as cross-origin.
//!
//! A gateway failure is returned as [`NoxssError::ConfirmationUnavailable`].
//! The engine never turns it into an allow or a block.

use crate::error::{NoxssError, Result};
use crate::extract::{self, LinkExtractor, SrcAttributeExtractor, DEFAULT_SCAN_LIMIT};
use crate::gateway::{confirmation_message, ConfirmationGateway};
use crate::registry::PendingApprovals;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Status code of the synthetic block response.
///
/// 200 rather than an error status, so blocked resources fail quietly in
/// the browser.
pub const BLOCKED_STATUS: u16 = 200;

/// Content type of the synthetic block response.
pub const BLOCKED_CONTENT_TYPE: &str = "text/html";

/// Body of the synthetic block response.
pub const BLOCKED_BODY: &str = "Blocked request";

/// Outcome of admission control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Pass the request to its destination unchanged
    Forward,
    /// Answer with the synthetic block response instead
    Block,
}

/// The admission rule that produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Request carried no referer
    NoReferer,
    /// Referer and target share a host
    SameOrigin,
    /// Target matched a pending allow-once entry
    AllowOnce,
    /// Operator approved the request
    UserApproved,
    /// Operator declined the request
    UserDeclined,
    /// Operator did not answer within the configured bound
    ConfirmTimeout,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::NoReferer => write!(f, "no_referer"),
            Rule::SameOrigin => write!(f, "same_origin"),
            Rule::AllowOnce => write!(f, "allow_once"),
            Rule::UserApproved => write!(f, "user_approved"),
            Rule::UserDeclined => write!(f, "user_declined"),
            Rule::ConfirmTimeout => write!(f, "confirm_timeout"),
        }
    }
}

/// A verdict together with the rule that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    pub rule: Rule,
}

impl Decision {
    fn forward(rule: Rule) -> Self {
        Self {
            verdict: Verdict::Forward,
            rule,
        }
    }

    fn block(rule: Rule) -> Self {
        Self {
            verdict: Verdict::Block,
            rule,
        }
    }

    /// Decision for a confirmation that was abandoned after a timeout.
    #[must_use]
    pub fn timed_out() -> Self {
        Self::block(Rule::ConfirmTimeout)
    }

    /// Whether the request may proceed.
    #[must_use]
    pub fn is_forward(&self) -> bool {
        self.verdict == Verdict::Forward
    }
}

/// One intercepted request, as seen by the admission engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    target_url: String,
    target_host: String,
    referer: Option<String>,
}

impl RequestContext {
    /// Build a context from already-extracted parts.
    ///
    /// An empty or whitespace-only referer is stored as absent.
    pub fn new(
        target_url: impl Into<String>,
        target_host: impl Into<String>,
        referer: Option<&str>,
    ) -> Self {
        let referer = referer
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        Self {
            target_url: target_url.into(),
            target_host: target_host.into(),
            referer,
        }
    }

    /// Build a context from a parsed target URL.
    #[must_use]
    pub fn from_url(target: &Url, referer: Option<&str>) -> Self {
        let host = authority(target).unwrap_or_default();
        Self::new(target.as_str(), host, referer)
    }

    /// Parse `target` as an absolute URL and build a context from it.
    ///
    /// # Errors
    ///
    /// Returns [`NoxssError::InvalidUrl`] if `target` is not an absolute URL.
    pub fn parse(target: &str, referer: Option<&str>) -> Result<Self> {
        let url = Url::parse(target).map_err(|e| NoxssError::InvalidUrl {
            url: target.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_url(&url, referer))
    }

    /// The full target URL in string form.
    #[must_use]
    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    /// The target authority (`host` or `host:port`).
    #[must_use]
    pub fn target_host(&self) -> &str {
        &self.target_host
    }

    /// The raw `Referer` header value, if any.
    #[must_use]
    pub fn referer(&self) -> Option<&str> {
        self.referer.as_deref()
    }
}

/// Host plus explicit port of a URL, lowercased by the URL parser.
fn authority(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Extract the host of a referer header value.
///
/// Falls back to a textual scan for `//host` when the value is not a valid
/// URL. Returns `None` when no host can be found at all.
fn referer_host(raw: &str) -> Option<String> {
    match Url::parse(raw) {
        Ok(url) => authority(&url),
        Err(e) => {
            warn!("Failed to parse referer '{}': {}", raw, e);
            host_from_raw(raw)
        }
    }
}

fn host_from_raw(raw: &str) -> Option<String> {
    let (_, rest) = raw.split_once("//")?;
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..end];
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    if host.is_empty() || host.contains(char::is_whitespace) {
        return None;
    }
    Some(host.to_ascii_lowercase())
}

/// Decides forward or block for each request and seeds allow-once entries
/// from relayed response bodies.
///
/// Safe to share across tasks: the only mutable state is the
/// [`PendingApprovals`] registry, which synchronizes itself.
pub struct AdmissionEngine {
    registry: Arc<PendingApprovals>,
    gateway: Arc<dyn ConfirmationGateway>,
    extractor: Box<dyn LinkExtractor>,
    scan_limit: usize,
}

impl AdmissionEngine {
    /// Create an engine with an empty registry and the default `src`
    /// attribute extractor.
    pub fn new(gateway: Arc<dyn ConfirmationGateway>) -> Self {
        Self {
            registry: Arc::new(PendingApprovals::new()),
            gateway,
            extractor: Box::new(SrcAttributeExtractor),
            scan_limit: DEFAULT_SCAN_LIMIT,
        }
    }

    /// Use an existing registry instead of a fresh one.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<PendingApprovals>) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the link extractor.
    #[must_use]
    pub fn with_extractor(mut self, extractor: Box<dyn LinkExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Cap the number of matches considered per scanned body.
    #[must_use]
    pub fn with_scan_limit(mut self, limit: usize) -> Self {
        self.scan_limit = limit;
        self
    }

    /// The shared allow-once registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<PendingApprovals> {
        &self.registry
    }

    /// Name of the configured confirmation backend.
    #[must_use]
    pub fn gateway_name(&self) -> &str {
        self.gateway.backend_name()
    }

    /// Decide whether `request` may proceed.
    ///
    /// May block for as long as the operator takes to answer.
    ///
    /// # Errors
    ///
    /// Returns [`NoxssError::ConfirmationUnavailable`] if the gateway could
    /// not be used. This is fatal for the caller.
    pub fn decide(&self, request: &RequestContext) -> Result<Decision> {
        let target = request.target_url();
        debug!("Admission check for {}", target);

        let Some(referer) = request.referer() else {
            info!("allow (empty referer): {}", target);
            return Ok(Decision::forward(Rule::NoReferer));
        };

        if let Some(host) = referer_host(referer) {
            if host.eq_ignore_ascii_case(request.target_host()) {
                info!(
                    "allow (local link) from {} to {}",
                    referer,
                    request.target_host()
                );
                return Ok(Decision::forward(Rule::SameOrigin));
            }
        }

        if self.registry.try_consume(target) {
            info!("allow once: {}", target);
            return Ok(Decision::forward(Rule::AllowOnce));
        }

        let approved = self
            .gateway
            .confirm(&confirmation_message(target))
            .map_err(|source| NoxssError::ConfirmationUnavailable {
                backend: self.gateway.backend_name().to_string(),
                source,
            })?;

        if approved {
            info!("allow (user approved): {}", target);
            Ok(Decision::forward(Rule::UserApproved))
        } else {
            info!("blocked: {}", target);
            Ok(Decision::block(Rule::UserDeclined))
        }
    }

    /// Scan a relayed text body and register its external references.
    ///
    /// Returns the newly registered references.
    pub fn scan_response(&self, body: &str) -> Vec<String> {
        let added = extract::extract_links(
            self.extractor.as_ref(),
            body,
            self.scan_limit,
            &self.registry,
        );
        debug!("Pending allow-once entries: {:?}", self.registry.snapshot());
        added
    }
}

impl fmt::Debug for AdmissionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionEngine")
            .field("registry", &self.registry)
            .field("gateway", &self.gateway.backend_name())
            .field("scan_limit", &self.scan_limit)
            .finish()
    }
}
