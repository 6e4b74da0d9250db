use crate::function::FunctionId;

/// Broad class of a rejected mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Arguments inconsistent with the current graph.
    Validation,
    /// Name lookup against the source corpus failed.
    Resolution,
}

/// Why a mutation was refused. The graph and annotations are untouched
/// whenever one of these is returned.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MutationError {
    #[error("{}", unknown_callers(.missing))]
    UnknownCaller { missing: Vec<FunctionId> },
    #[error("no callee of {} ends with .{suffix}", join(.callers))]
    UnresolvedFunction { suffix: String, callers: Vec<FunctionId> },
    #[error("{function} has no retrievable source body")]
    NoSuchFunction { function: FunctionId },
    #[error("{function} is already in the graph")]
    AlreadyPresent { function: FunctionId },
    #[error("functions not in graph: {}", join(.missing))]
    UnknownFunction { missing: Vec<FunctionId> },
    #[error("chain is broken: no edge {caller} -> {callee}")]
    BrokenChain { caller: FunctionId, callee: FunctionId },
    #[error(
        "{function} is not a linear link: callers [{}], callees [{}]",
        join(.callers),
        join(.callees)
    )]
    NotLinear {
        function: FunctionId,
        callers: Vec<FunctionId>,
        callees: Vec<FunctionId>,
    },
    #[error("invalid update: {reason}")]
    InvalidUpdate { reason: String, invalid_keys: Vec<String> },
    #[error("intermediate_functions must not be empty")]
    EmptyIntermediates,
    #[error("edge {caller} -> {callee} already exists")]
    DuplicateEdge { caller: FunctionId, callee: FunctionId },
}

fn join(ids: &[FunctionId]) -> String {
    ids.iter().map(FunctionId::as_str).collect::<Vec<_>>().join(", ")
}

fn unknown_callers(missing: &[FunctionId]) -> String {
    if missing.is_empty() {
        "callers must not be empty".to_string()
    } else {
        format!("callers not in graph: {}", join(missing))
    }
}

impl MutationError {
    /// Stable machine-checkable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownCaller { .. } => "UNKNOWN_CALLER",
            Self::UnresolvedFunction { .. } => "UNRESOLVED_FUNCTION",
            Self::NoSuchFunction { .. } => "NO_SUCH_FUNCTION",
            Self::AlreadyPresent { .. } => "ALREADY_PRESENT",
            Self::UnknownFunction { .. } => "UNKNOWN_FUNCTION",
            Self::BrokenChain { .. } => "BROKEN_CHAIN",
            Self::NotLinear { .. } => "NOT_LINEAR",
            Self::InvalidUpdate { .. } => "INVALID_UPDATE",
            Self::EmptyIntermediates => "EMPTY_INTERMEDIATES",
            Self::DuplicateEdge { .. } => "DUPLICATE_EDGE",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnresolvedFunction { .. } | Self::NoSuchFunction { .. } => {
                ErrorCategory::Resolution
            }
            _ => ErrorCategory::Validation,
        }
    }

    /// `CODE: reason`, the form reported back to the reasoner.
    pub fn report(&self) -> String {
        format!("{}: {}", self.code(), self)
    }
}
