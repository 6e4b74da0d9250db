use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::function::FunctionId;

/// Kinds of finding a function may carry.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Known-dangerous behaviour of a sink. Seeded on import, never amended.
    VulnerableSink,
    /// Where attacker data enters. Seeded on import, never amended.
    AttackSource,
    TaintPropagation,
    SecuritySanitizer,
    Summary,
    KeyCodes,
}

impl FindingKind {
    /// Kinds the reasoner may write through `amend`.
    pub const AMENDABLE: [FindingKind; 4] = [
        FindingKind::SecuritySanitizer,
        FindingKind::TaintPropagation,
        FindingKind::Summary,
        FindingKind::KeyCodes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FindingKind::VulnerableSink => "vulnerable_sink",
            FindingKind::AttackSource => "attack_source",
            FindingKind::TaintPropagation => "taint_propagation",
            FindingKind::SecuritySanitizer => "security_sanitizer",
            FindingKind::Summary => "summary",
            FindingKind::KeyCodes => "key_codes",
        }
    }

    pub fn is_amendable(self) -> bool {
        Self::AMENDABLE.contains(&self)
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FindingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vulnerable_sink" => Ok(FindingKind::VulnerableSink),
            "attack_source" => Ok(FindingKind::AttackSource),
            "taint_propagation" => Ok(FindingKind::TaintPropagation),
            "security_sanitizer" => Ok(FindingKind::SecuritySanitizer),
            "summary" => Ok(FindingKind::Summary),
            "key_codes" => Ok(FindingKind::KeyCodes),
            other => Err(other.to_string()),
        }
    }
}

/// At most one text per kind for a function.
pub type Findings = BTreeMap<FindingKind, String>;

/// Findings per function. Entries outlive the graph nodes they describe.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationStore {
    #[serde(deserialize_with = "findings_skipping_nulls")]
    records: BTreeMap<FunctionId, Findings>,
}

/// Analysis output may leave a kind as `null`; such entries carry no finding.
fn findings_skipping_nulls<'de, D>(deserializer: D) -> Result<BTreeMap<FunctionId, Findings>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<FunctionId, BTreeMap<FindingKind, Option<String>>>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(function, findings)| {
            let findings = findings
                .into_iter()
                .filter_map(|(kind, text)| text.map(|text| (kind, text)))
                .collect();
            (function, findings)
        })
        .collect())
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, function: &FunctionId) -> Option<&Findings> {
        self.records.get(function)
    }

    pub fn finding(&self, function: &FunctionId, kind: FindingKind) -> Option<&str> {
        self.records
            .get(function)
            .and_then(|f| f.get(&kind))
            .map(String::as_str)
    }

    pub fn has_any(&self, function: &FunctionId) -> bool {
        self.records.get(function).is_some_and(|f| !f.is_empty())
    }

    pub fn set(&mut self, function: &FunctionId, kind: FindingKind, text: impl Into<String>) {
        self.records
            .entry(function.clone())
            .or_default()
            .insert(kind, text.into());
    }

    /// Overwrite the given kinds, leaving other kinds of the function untouched.
    pub fn merge(&mut self, function: &FunctionId, updates: Findings) {
        if updates.is_empty() {
            return;
        }
        self.records
            .entry(function.clone())
            .or_default()
            .extend(updates);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FunctionId, &Findings)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
