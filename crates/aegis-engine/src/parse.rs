//! Lenient parsing of structured reasoner output.
//!
//! Models wrap JSON in reasoning preambles, markdown fences and sometimes
//! forget to escape quotes inside string values. `parse_lenient` peels those
//! layers off before handing the text to serde.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("no JSON object found in response")]
    NoJson,
    #[error("invalid JSON: {0}")]
    Invalid(String),
    #[error("response carries none of the expected fields")]
    MissingFields,
}

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("fence pattern is valid")
});

static KEY_VALUE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(\s*"[^"]+"\s*:\s*)"(.*)"(\s*,?\s*)$"#).expect("key/value pattern is valid")
});

/// Parse the JSON payload embedded in a model response.
pub fn parse_lenient(text: &str) -> Result<Value, ParseError> {
    let text = match text.rfind("</think>") {
        Some(pos) => &text[pos + "</think>".len()..],
        None => text,
    };
    let candidate = match FENCE.captures(text).and_then(|c| c.get(1)) {
        Some(body) => body.as_str(),
        None => outer_object(text).ok_or(ParseError::NoJson)?,
    };

    match serde_json::from_str(candidate) {
        Ok(value) => Ok(value),
        Err(first) => {
            let repaired = repair_quotes(candidate);
            serde_json::from_str(&repaired).map_err(|_| ParseError::Invalid(first.to_string()))
        }
    }
}

/// Like [`parse_lenient`] but requires a JSON object.
pub fn parse_object(text: &str) -> Result<Map<String, Value>, ParseError> {
    match parse_lenient(text)? {
        Value::Object(map) => Ok(map),
        other => Err(ParseError::Invalid(format!("expected an object, got {other}"))),
    }
}

fn outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Escape bare quotes inside single-line string values.
fn repair_quotes(text: &str) -> String {
    text.lines()
        .map(|line| match KEY_VALUE_LINE.captures(line) {
            Some(caps) if caps[2].contains('"') => {
                format!("{}\"{}\"{}", &caps[1], escape_bare_quotes(&caps[2]), &caps[3])
            }
            _ => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape_bare_quotes(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 8);
    let mut escaped = false;
    for ch in value.chars() {
        if ch == '"' && !escaped {
            out.push('\\');
        }
        escaped = ch == '\\' && !escaped;
        out.push(ch);
    }
    out
}

/// Reads `true`, `false` and their common string spellings.
pub fn lenient_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Renders any JSON value as display text; strings are taken verbatim.
pub fn lenient_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(lenient_text).collect::<Vec<_>>().join("\n"),
        other => other.to_string(),
    }
}

fn de_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(lenient_text(&Value::deserialize(deserializer)?))
}

fn de_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    Ok(lenient_bool(&Value::deserialize(deserializer)?))
}

/// The reasoner's terminal judgment on an attack path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgmentReport {
    #[serde(default, deserialize_with = "de_text")]
    pub external_input_taint_analysis: String,
    #[serde(default, deserialize_with = "de_text", alias = "security_anitization_analysis")]
    pub security_sanitization_analysis: String,
    #[serde(default, deserialize_with = "de_text")]
    pub unsecure_call_analysis: String,
    #[serde(default, deserialize_with = "de_text")]
    pub to_be_confirmed: String,
    #[serde(default, deserialize_with = "de_bool")]
    pub is_vulnerable: Option<bool>,
}

impl JudgmentReport {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let object = parse_object(text)?;
        let report: Self = serde_json::from_value(Value::Object(object))
            .map_err(|e| ParseError::Invalid(e.to_string()))?;
        if report == Self::default() {
            return Err(ParseError::MissingFields);
        }
        Ok(report)
    }

    /// Sectioned text drawn under the graph. Empty sections are skipped.
    pub fn remark(&self) -> String {
        let verdict = match self.is_vulnerable {
            Some(v) => format!("IS_VULNERABLE: {v}"),
            None => "IS_VULNERABLE: undetermined".to_string(),
        };
        [
            ("Taint analysis", self.external_input_taint_analysis.as_str()),
            ("Sanitization", self.security_sanitization_analysis.as_str()),
            ("Exploit conditions", self.unsecure_call_analysis.as_str()),
            ("To be confirmed", self.to_be_confirmed.as_str()),
            ("Preliminary conclusion", verdict.as_str()),
        ]
        .iter()
        .filter(|(_, body)| !body.trim().is_empty())
        .map(|(title, body)| format!("# {title}\n{}", body.trim()))
        .collect::<Vec<_>>()
        .join("\n")
    }
}

/// Remark for a judgment: the sectioned report when it parses, else the raw text.
pub fn judgment_remark(text: &str) -> String {
    match JudgmentReport::parse(text) {
        Ok(report) => report.remark(),
        Err(_) => text.trim().to_string(),
    }
}
