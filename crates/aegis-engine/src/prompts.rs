//! Prompt text sent to the reasoning roles.

use aegis_graph::FunctionId;

pub const SYSTEM_PROMPT: &str = "\
You are a security auditor reviewing one candidate attack path in a Python codebase. \
The path runs from an entry point, where external input can enter, to a dangerous sink.

Your job is to decide whether attacker-controlled data can really reach the sink in a way \
that makes it exploitable. Work through the call graph you are shown:
- Each node is a function. Text under a node is what is already known about it.
- Use inspect_function to read a function's source and list_callees to see what it calls.
- Use add_new_function to pull a relevant callee into the graph.
- Use compress_call_chain to fold a linear chain of uninteresting functions into one edge.
- Use update_function_node to record taint_propagation, security_sanitizer, summary or key_codes findings.

Do not fetch information that is already shown on the graph.

When you have enough evidence, stop calling tools and answer with a JSON object in a ```json block:
{
  \"external_input_taint_analysis\": \"how external input flows along the path\",
  \"security_sanitization_analysis\": \"sanitizers or validation on the path, or why there are none\",
  \"unsecure_call_analysis\": \"conditions under which the sink call is exploitable\",
  \"to_be_confirmed\": \"anything you could not verify\",
  \"is_vulnerable\": true
}";

pub const GRAPH_MESSAGE: &str = "\
This is the latest call graph of the attack path. Node names are function names; the text \
under each node is information already retrieved, do not fetch it again.";

pub const VERIFICATION_PROMPT: &str = "\
Double-check the conclusion above against the conversation and the call graph. \
Is the analysis accurate and complete? If important functions were not inspected or a claim \
is not backed by code you have seen, it is not complete.

Answer with a JSON object in a ```json block:
{
  \"is_accurate_and_complete\": true,
  \"feedback\": \"what is wrong or missing, or why the conclusion holds\",
  \"is_vulnerable\": true
}
Only include is_vulnerable when is_accurate_and_complete is true.";

pub const REJECTION_PREFIX: &str =
    "Conclusion rejected! Further tool calls are needed to supply information:\n";

pub const REPEATED_CALL_PREFIX: &str = "Repeated call! Existing result: ";

pub const FIX_UNPARSABLE: &str = "Your response could not be parsed as JSON. Fix it and reply with the JSON object only.";

pub const FIX_KEY_CODES: &str = "\
key_codes_in_function is too long. Simplify it and keep only the key code and variables. \
Only return the simplified key_codes_in_function field as a JSON object.";

/// What extraction asks the reasoner to pay attention to.
pub const ANALYSIS_FOCUSES: [&str; 5] = [
    "taint propagation: which variables are passed to downstream functions of the call graph? Are they taint sources (attacker-controllable files, network data) or could they carry taint?",
    "taint propagation: when calling downstream functions, does this function propagate tainted variables, and which ones?",
    "security sanitizer: does the code check tainted variables in a way that prevents the vulnerability at the vulnerable_sink?",
    "security sanitizer: does the code implement a sanitization specific to the vulnerable_sink?",
    "security sanitizer: which configuration is used when calling downstream functions, and is it secure?",
];

/// Prompt for extracting findings from one function body.
pub fn extraction_prompt(function: &FunctionId, body: &str, targets: &[String]) -> String {
    let focuses = ANALYSIS_FOCUSES
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{}. {f}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");
    let calls = if targets.is_empty() {
        "(none)".to_string()
    } else {
        targets.join(", ")
    };
    format!(
        "Analyze the function `{function}` on a candidate attack path.\n\n\
         ```python\n{body}\n```\n\n\
         Calls of interest: {calls}\n\n\
         Focus on:\n{focuses}\n\n\
         Reply with a JSON object in a ```json block with the fields \
         summary, is_taint_propagation, taint_propagation_analysis, \
         is_security_sanitizer, security_sanitizer_analysis, key_codes_in_function."
    )
}
