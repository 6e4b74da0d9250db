use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Fully qualified function name (`pkg.module.func`, or `pkg.module.<module>`
/// for module-level code). Compared by exact string equality.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionId(String);

impl FunctionId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last dotted segment: `a.b.load` -> `load`.
    pub fn last_segment(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// True when this name ends with `.<suffix>`.
    pub fn has_suffix(&self, suffix: &str) -> bool {
        !suffix.is_empty()
            && self
                .0
                .strip_suffix(suffix)
                .is_some_and(|head| head.ends_with('.'))
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FunctionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for FunctionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for FunctionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for FunctionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
