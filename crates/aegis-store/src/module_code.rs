use tracing::warn;
use tree_sitter::{Node, Parser};

/// Suffix the call-graph builder gives to a module's top-level code.
pub const MODULE_SUFFIX: &str = ".<module>";

pub fn is_module_level(name: &str) -> bool {
    name.ends_with(MODULE_SUFFIX)
}

/// Top-level statements of a Python module that run at import time: imports,
/// function and class definitions and comments are dropped. Source that does
/// not parse is returned whole.
pub fn executable_statements(source: &str) -> String {
    let mut parser = Parser::new();
    if let Err(err) = parser.set_language(&tree_sitter_python::LANGUAGE.into()) {
        warn!(error = %err, "python grammar unavailable, keeping full module source");
        return source.to_string();
    }
    let Some(tree) = parser.parse(source, None) else {
        return source.to_string();
    };
    let root = tree.root_node();
    if root.has_error() {
        warn!("module source does not parse, keeping full text");
        return source.to_string();
    }

    let mut cursor = root.walk();
    let kept: Vec<&str> = root
        .named_children(&mut cursor)
        .filter(|node| runs_at_import(node))
        .filter_map(|node| node.utf8_text(source.as_bytes()).ok())
        .map(str::trim_end)
        .collect();
    kept.join("\n")
}

fn runs_at_import(node: &Node<'_>) -> bool {
    !matches!(
        node.kind(),
        "import_statement"
            | "import_from_statement"
            | "future_import_statement"
            | "function_definition"
            | "class_definition"
            | "decorated_definition"
            | "comment"
    )
}
