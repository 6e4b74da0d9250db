//! Call-graph data model for one attack-path candidate: labeled call edges,
//! per-function findings, and the invariant-checked mutations a reasoner may
//! request against them.
//!
//! Everything here is synchronous and free of I/O. Source lookups go through
//! the [`SourceResolver`] seam.

pub mod annotations;
pub mod error;
pub mod function;
pub mod graph;
pub mod mutation;
pub mod record;
pub mod resolver;
pub mod sinks;

pub use annotations::{AnnotationStore, FindingKind, Findings};
pub use error::{ErrorCategory, MutationError};
pub use function::FunctionId;
pub use graph::{CallEdge, CallGraph};
pub use mutation::{AmendPlan, CompressPlan, ExtendPlan};
pub use record::{path_key, Conclusion, PathRecord};
pub use resolver::{InMemoryResolver, ResolveError, SourceResolver};
