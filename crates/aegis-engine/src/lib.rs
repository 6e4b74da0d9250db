//! Drives attack-path audits: the session state, the action dispatcher over
//! graph mutations, per-function extraction, the verification gate and the
//! reasoning loop that ties them together.

pub mod actions;
pub mod audit;
pub mod batch;
pub mod error;
pub mod extraction;
pub mod parse;
pub mod prompts;
pub mod render;
pub mod service;
pub mod session;
pub mod truncate;
pub mod verify;

pub use actions::AuditAction;
pub use audit::{AuditConfig, AuditLoop, AuditOutcome};
pub use batch::{BatchAuditor, BatchSummary};
pub use error::EngineError;
pub use extraction::NodeAnalyzer;
pub use parse::{JudgmentReport, ParseError};
pub use render::{DotRenderer, RenderError, Renderer};
pub use service::GraphMutationService;
pub use session::{AuditSession, Verdict};
pub use verify::{GateDecision, VerificationGate};
