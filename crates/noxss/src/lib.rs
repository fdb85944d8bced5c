//! Cross-origin request firewall core.
//!
//! `noxss` decides, per intercepted HTTP request, whether a proxy should
//! forward it or answer with a synthetic "blocked" page. It is transport
//! agnostic: the proxy crate feeds it requests and response bodies.
//!
//! # Components
//!
//! - **Link extraction** ([`extract`]): finds `src="..."` references in
//!   relayed text bodies and registers external ones as allow-once entries
//! - **Registry** ([`registry`]): concurrency-safe, single-use URL set
//! - **Admission** ([`admission`]): the per-request decision
//! - **Gateway** ([`gateway`]): trait for the interactive yes/no prompt
//!
//! ```text
//! request  --> AdmissionEngine::decide --> Forward | Block
//!                 |            |
//!           PendingApprovals  ConfirmationGateway (registry miss)
//!                 ^
//! response --> AdmissionEngine::scan_response
//! ```

pub mod admission;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod registry;

pub use admission::{AdmissionEngine, Decision, RequestContext, Rule, Verdict};
pub use error::{GatewayError, NoxssError, Result};
pub use extract::{LinkExtractor, SrcAttributeExtractor};
pub use gateway::ConfirmationGateway;
pub use registry::PendingApprovals;
