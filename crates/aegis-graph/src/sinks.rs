//! Built-in descriptions of well-known dangerous sinks.

use crate::annotations::{AnnotationStore, FindingKind};
use crate::function::FunctionId;
use crate::record::PathRecord;

const KNOWN_SINKS: &[(&str, &str)] = &[
    (
        "exec",
        "Built-in that executes a block of Python source. If any part of the code string \
         is derived from user-controlled data without validation, an attacker can inject \
         statements and obtain code execution.",
    ),
    (
        "eval",
        "Built-in that evaluates a single Python expression and returns its value. \
         Attacker-influenced expressions lead to code execution, and the returned value \
         can also leak sensitive data.",
    ),
    (
        "os.system",
        "Runs a command string in a sub-shell. Concatenating unescaped user input into \
         the command allows command injection and control of the host.",
    ),
    (
        "pickle.loads",
        "Deserializes bytes into Python objects. Crafted payloads from untrusted sources \
         (network, unauthenticated files) run arbitrary code during unpickling.",
    ),
    (
        "pickle.load",
        "Deserializes Python objects from a file object. A file from an untrusted origin \
         whose integrity is not verified can execute arbitrary code when loaded.",
    ),
    (
        "torch.load",
        "Loads serialized PyTorch models or tensors through pickle. Without \
         weights_only=True, a malicious checkpoint (.pt, .pth) executes code while loading.",
    ),
    (
        "yaml.load",
        "Parses YAML into Python objects. With the default or full Loader, tags such as \
         !!python/object construct arbitrary objects; old PyYAML releases (<= 5.3.1) are \
         exploitable even with FullLoader.",
    ),
    (
        "joblib.load",
        "Restores objects persisted by joblib, which uses pickle underneath. Loading a \
         file from an untrusted source executes any code embedded in it.",
    ),
];

/// Description of a known sink, if catalogued.
pub fn describe(sink: &str) -> Option<&'static str> {
    KNOWN_SINKS
        .iter()
        .find(|(name, _)| *name == sink)
        .map(|(_, text)| *text)
}

pub fn known_sinks() -> impl Iterator<Item = &'static str> {
    KNOWN_SINKS.iter().map(|(name, _)| *name)
}

/// Seed the sink's `vulnerable_sink` finding when the record carries none.
/// Returns whether anything was written.
pub fn seed(record: &mut PathRecord) -> bool {
    seed_annotations(&mut record.function_analysis_records, record.sink.as_str())
}

fn seed_annotations(annotations: &mut AnnotationStore, sink: &str) -> bool {
    let id = FunctionId::from(sink);
    if annotations.has_any(&id) {
        return false;
    }
    match describe(sink) {
        Some(text) => {
            annotations.set(&id, FindingKind::VulnerableSink, text);
            true
        }
        None => false,
    }
}
