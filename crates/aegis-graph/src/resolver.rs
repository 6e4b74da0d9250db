use std::collections::BTreeMap;

use crate::function::FunctionId;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("function not found: {0}")]
    NotFound(FunctionId),
    #[error("source lookup failed: {0}")]
    Backend(String),
}

/// Read-only view of the analysed codebase, shared by every session.
pub trait SourceResolver: Send + Sync {
    fn function_body(&self, function: &FunctionId) -> Result<String, ResolveError>;

    /// Real direct callees of `caller`, independent of any audit graph.
    fn callees_of(&self, caller: &FunctionId) -> Result<Vec<FunctionId>, ResolveError>;
}

/// Map-backed resolver for tests and small corpora.
#[derive(Clone, Debug, Default)]
pub struct InMemoryResolver {
    bodies: BTreeMap<FunctionId, String>,
    calls: BTreeMap<FunctionId, Vec<FunctionId>>,
}

impl InMemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function(mut self, name: &str, body: &str) -> Self {
        self.bodies.insert(FunctionId::from(name), body.to_string());
        self
    }

    pub fn with_call(mut self, caller: &str, callee: &str) -> Self {
        self.calls
            .entry(FunctionId::from(caller))
            .or_default()
            .push(FunctionId::from(callee));
        self
    }
}

impl SourceResolver for InMemoryResolver {
    fn function_body(&self, function: &FunctionId) -> Result<String, ResolveError> {
        self.bodies
            .get(function)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(function.clone()))
    }

    fn callees_of(&self, caller: &FunctionId) -> Result<Vec<FunctionId>, ResolveError> {
        Ok(self.calls.get(caller).cloned().unwrap_or_default())
    }
}
