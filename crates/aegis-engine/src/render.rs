//! Graphviz rendering of an annotated attack path.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{debug, instrument};

use aegis_core::context::Attachment;
use aegis_graph::{AnnotationStore, CallGraph, FindingKind, Findings, FunctionId};

const WRAP_WIDTH: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("render io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("graphviz failed: {0}")]
    Graphviz(String),
}

/// Borrowed view of everything drawn for one session.
#[derive(Clone, Copy, Debug)]
pub struct GraphView<'a> {
    pub entry: &'a FunctionId,
    pub sink: &'a FunctionId,
    pub graph: &'a CallGraph,
    pub annotations: &'a AnnotationStore,
}

/// What a render produced and how to show it to the reasoner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub attachment: Attachment,
}

/// Draws a session's graph. Rendering the same output twice overwrites it.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        output: &Path,
        view: GraphView<'_>,
        remark: Option<&str>,
    ) -> Result<Artifact, RenderError>;
}

/// Writes DOT source and, with a Graphviz binary configured, a PNG.
#[derive(Clone, Debug, Default)]
pub struct DotRenderer {
    dot_binary: Option<PathBuf>,
}

impl DotRenderer {
    pub fn new(dot_binary: Option<PathBuf>) -> Self {
        Self { dot_binary }
    }
}

#[async_trait]
impl Renderer for DotRenderer {
    #[instrument(skip(self, view, remark), fields(output = %output.display(), edges = view.graph.len()))]
    async fn render(
        &self,
        output: &Path,
        view: GraphView<'_>,
        remark: Option<&str>,
    ) -> Result<Artifact, RenderError> {
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let source = dot_source(view, remark);
        let dot_path = with_suffix(output, ".dot");
        tokio::fs::write(&dot_path, &source).await?;

        let Some(binary) = &self.dot_binary else {
            debug!("no graphviz binary, returning dot source");
            return Ok(Artifact {
                path: dot_path,
                attachment: Attachment::Text { text: source },
            });
        };

        let png_path = with_suffix(output, ".png");
        let result = tokio::process::Command::new(binary)
            .arg("-Tpng")
            .arg(&dot_path)
            .arg("-o")
            .arg(&png_path)
            .output()
            .await?;
        if !result.status.success() {
            return Err(RenderError::Graphviz(
                String::from_utf8_lossy(&result.stderr).trim().to_string(),
            ));
        }
        let bytes = tokio::fs::read(&png_path).await?;
        Ok(Artifact {
            path: png_path,
            attachment: Attachment::Image {
                mime_type: "image/png".into(),
                data: STANDARD.encode(bytes),
            },
        })
    }
}

/// Per-record output base name: `<edge_count>__<key>` made filesystem-safe.
pub fn output_file_name(edge_count: usize, key: &str) -> String {
    let safe = key
        .replace(".<module>", "._module_")
        .replace(['/', '\\'], "_");
    format!("{edge_count}__{safe}")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

pub fn fill_color(findings: Option<&Findings>) -> &'static str {
    let Some(findings) = findings else {
        return "#EEEEEE";
    };
    let has = |kind| findings.contains_key(&kind);
    if has(FindingKind::VulnerableSink) {
        "#FFA4A4"
    } else if has(FindingKind::AttackSource) || has(FindingKind::TaintPropagation) {
        "#FFFFA9"
    } else if has(FindingKind::SecuritySanitizer) {
        "#D5FFB8"
    } else {
        "#EEEEEE"
    }
}

/// Complete DOT document for `view`.
pub fn dot_source(view: GraphView<'_>, remark: Option<&str>) -> String {
    let title = format!("Vulnerability Path: {} -> {}", view.entry, view.sink);
    let mut out = String::from("digraph attack_path {\n");
    out.push_str("  rankdir=TB;\n");
    out.push_str("  node [shape=plain, fontname=\"Helvetica\"];\n");
    out.push_str("  edge [fontname=\"Helvetica\", fontsize=10];\n");

    match remark {
        Some(remark) => {
            out.push_str("  labelloc=\"b\";\n");
            out.push_str(&format!(
                "  label=<<TABLE BORDER=\"1\" CELLBORDER=\"0\" CELLPADDING=\"6\" BGCOLOR=\"#F0F8FF\">\
                 <TR><TD BGCOLOR=\"#E6F3FF\"><B>{}</B></TD></TR>\
                 <TR><TD ALIGN=\"LEFT\" BALIGN=\"LEFT\">{}</TD></TR></TABLE>>;\n",
                html_escape(&title),
                html_text(remark)
            ));
        }
        None => {
            out.push_str("  labelloc=\"t\";\n");
            out.push_str(&format!("  label=<<B>{}</B>>;\n", html_escape(&title)));
        }
    }

    for node in view.graph.nodes_in_order() {
        let findings = view.annotations.get(&node);
        out.push_str(&format!(
            "  {} [label=<{}>];\n",
            quote(node.as_str()),
            node_table(&node, findings)
        ));
    }
    for edge in view.graph.edges() {
        out.push_str(&format!(
            "  {} -> {} [label={}];\n",
            quote(edge.caller.as_str()),
            quote(edge.callee.as_str()),
            quote(&edge.label)
        ));
    }
    out.push_str("}\n");
    out
}

fn node_table(node: &FunctionId, findings: Option<&Findings>) -> String {
    let mut table = format!(
        "<TABLE BORDER=\"0\" CELLBORDER=\"1\" CELLSPACING=\"0\" CELLPADDING=\"4\" BGCOLOR=\"{}\">\
         <TR><TD><B>{}</B></TD></TR>",
        fill_color(findings),
        html_escape(node.as_str())
    );
    for (kind, text) in findings.into_iter().flatten() {
        let row = match kind {
            FindingKind::KeyCodes => format!("### Key Codes ###\n{text}"),
            other => format!("{other}: {text}"),
        };
        table.push_str(&format!(
            "<TR><TD ALIGN=\"LEFT\" BALIGN=\"LEFT\">{}</TD></TR>",
            html_text(&row)
        ));
    }
    table.push_str("</TABLE>");
    table
}

fn quote(raw: &str) -> String {
    let escaped = raw
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n");
    format!("\"{escaped}\"")
}

fn html_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Escaped, wrapped multi-line cell text.
fn html_text(raw: &str) -> String {
    raw.lines()
        .flat_map(|line| wrap(line, WRAP_WIDTH))
        .map(|line| html_escape(&line))
        .collect::<Vec<_>>()
        .join("<BR/>")
}

fn wrap(line: &str, width: usize) -> Vec<String> {
    if line.chars().count() <= width {
        return vec![line.to_string()];
    }
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in line.split(' ') {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_graph::CallEdge;

    fn fixture() -> (FunctionId, FunctionId, CallGraph, AnnotationStore) {
        let graph = CallGraph::from_edges([
            CallEdge::calls("app.main", "app.f1"),
            CallEdge::new("app.f1", "torch.load", "passes \"path\""),
        ]);
        let mut notes = AnnotationStore::new();
        notes.set(&"torch.load".into(), FindingKind::VulnerableSink, "unsafe <pickle>");
        notes.set(&"app.f1".into(), FindingKind::TaintPropagation, "path flows");
        notes.set(&"app.f1".into(), FindingKind::KeyCodes, "torch.load(path)");
        ("app.main".into(), "torch.load".into(), graph, notes)
    }

    #[test]
    fn dot_document_shape() {
        let (entry, sink, graph, notes) = fixture();
        let view = GraphView { entry: &entry, sink: &sink, graph: &graph, annotations: &notes };
        let dot = dot_source(view, None);

        assert!(dot.starts_with("digraph attack_path {"));
        assert!(dot.contains("labelloc=\"t\""));
        assert!(dot.contains("Vulnerability Path: app.main -&gt; torch.load"));
        assert!(dot.contains("BGCOLOR=\"#FFA4A4\""));
        assert!(dot.contains("BGCOLOR=\"#FFFFA9\""));
        assert!(dot.contains("unsafe &lt;pickle&gt;"));
        assert!(dot.contains("### Key Codes ###<BR/>torch.load(path)"));
        assert!(dot.contains("\"app.f1\" -> \"torch.load\" [label=\"passes \\\"path\\\"\"]"));
    }

    #[test]
    fn remark_moves_title_to_bottom_table() {
        let (entry, sink, graph, notes) = fixture();
        let view = GraphView { entry: &entry, sink: &sink, graph: &graph, annotations: &notes };
        let dot = dot_source(view, Some("# Taint analysis\nargv -> f1"));
        assert!(dot.contains("labelloc=\"b\""));
        assert!(dot.contains("BGCOLOR=\"#F0F8FF\""));
        assert!(dot.contains("# Taint analysis<BR/>argv -&gt; f1"));
    }

    #[test]
    fn colors_by_precedence() {
        let mut findings = Findings::new();
        assert_eq!(fill_color(Some(&findings)), "#EEEEEE");
        findings.insert(FindingKind::SecuritySanitizer, "checks".into());
        assert_eq!(fill_color(Some(&findings)), "#D5FFB8");
        findings.insert(FindingKind::TaintPropagation, "flows".into());
        assert_eq!(fill_color(Some(&findings)), "#FFFFA9");
        assert_eq!(fill_color(None), "#EEEEEE");
    }

    #[test]
    fn file_names_are_safe() {
        assert_eq!(
            output_file_name(3, "tasks/main.<module>---torch.load"),
            "3__tasks_main._module_---torch.load"
        );
    }

    #[test]
    fn long_lines_wrap_on_words() {
        let line = "word ".repeat(50);
        let wrapped = wrap(line.trim_end(), 20);
        assert!(wrapped.len() > 1);
        assert!(wrapped.iter().all(|l| l.chars().count() <= 20));
    }

    #[tokio::test]
    async fn writes_and_overwrites_dot_file() {
        let dir = tempfile::tempdir().unwrap();
        let (entry, sink, graph, notes) = fixture();
        let view = GraphView { entry: &entry, sink: &sink, graph: &graph, annotations: &notes };
        let output = dir.path().join("graphs").join("2__app.main---torch.load");
        let renderer = DotRenderer::default();

        let first = renderer.render(&output, view, None).await.unwrap();
        assert_eq!(first.path, dir.path().join("graphs").join("2__app.main---torch.load.dot"));
        assert!(matches!(first.attachment, Attachment::Text { .. }));

        let second = renderer.render(&output, view, Some("final")).await.unwrap();
        let on_disk = std::fs::read_to_string(&second.path).unwrap();
        assert!(on_disk.contains("final"));
        assert_eq!(second.path, first.path);
    }

    #[tokio::test]
    async fn missing_graphviz_binary_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (entry, sink, graph, notes) = fixture();
        let view = GraphView { entry: &entry, sink: &sink, graph: &graph, annotations: &notes };
        let renderer = DotRenderer::new(Some(dir.path().join("no-such-dot")));
        let err = renderer.render(&dir.path().join("out"), view, None).await.unwrap_err();
        assert!(matches!(err, RenderError::Io(_)));
    }
}
