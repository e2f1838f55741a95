use gpui::*;
use gpui_component::{ActiveTheme as _, Icon, IconName, h_flex, label::Label, v_flex};
use koda_chat::{ChatError, ChatResult, CodeBlockRenderer};

/// Diagram families the preview understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagramKind {
    Flowchart,
    Sequence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramEdge {
    pub from: String,
    pub to: String,
    pub label: Option<String>,
}

/// Structured result substituted for a `mermaid` fence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MermaidDiagram {
    pub kind: DiagramKind,
    pub edges: Vec<DiagramEdge>,
}

/// Intercepts `mermaid` fences and renders a step-list preview instead of
/// raw diagram source.
///
/// Anything it cannot parse — unknown diagram families, partially streamed
/// fences, exotic syntax — fails into the literal code fallback, so a bad
/// diagram never costs the user the rest of the message.
pub struct DiagramRenderer;

impl CodeBlockRenderer for DiagramRenderer {
    type Output = MermaidDiagram;

    fn render(&self, language: &str, code: &str) -> ChatResult<Option<MermaidDiagram>> {
        if !language.eq_ignore_ascii_case("mermaid") {
            return Ok(None);
        }

        parse_mermaid(code).map(Some)
    }
}

fn parse_mermaid(code: &str) -> ChatResult<MermaidDiagram> {
    let mut lines = code.lines().map(str::trim).filter(|line| !line.is_empty());

    let Some(header) = lines.next() else {
        return render_failed("empty diagram body");
    };

    let kind = if header.starts_with("graph") || header.starts_with("flowchart") {
        DiagramKind::Flowchart
    } else if header.starts_with("sequenceDiagram") {
        DiagramKind::Sequence
    } else {
        return render_failed(format!("unsupported diagram type '{header}'"));
    };

    let mut edges = Vec::new();
    for line in lines {
        let parsed = match kind {
            DiagramKind::Flowchart => parse_flowchart_edge(line),
            DiagramKind::Sequence => parse_sequence_edge(line),
        };
        if let Some(edge) = parsed {
            edges.push(edge);
        }
    }

    if edges.is_empty() {
        return render_failed("no edges found in diagram body");
    }

    Ok(MermaidDiagram { kind, edges })
}

/// `A[Start] -->|label| B{Choice}` style edges.
fn parse_flowchart_edge(line: &str) -> Option<DiagramEdge> {
    let (from_raw, rest) = line.split_once("-->")?;
    let rest = rest.trim();

    let (label, to_raw) = if let Some(tail) = rest.strip_prefix('|') {
        let (label, to_raw) = tail.split_once('|')?;
        (Some(label.trim().to_string()), to_raw)
    } else {
        (None, rest)
    };

    let from = node_text(from_raw)?;
    let to = node_text(to_raw)?;
    Some(DiagramEdge { from, to, label })
}

/// `A->>B: label` style interactions (solid or dashed arrows).
fn parse_sequence_edge(line: &str) -> Option<DiagramEdge> {
    let arrow = ["-->>", "->>", "-->", "->"]
        .into_iter()
        .find(|arrow| line.contains(arrow))?;
    let (from_raw, rest) = line.split_once(arrow)?;

    let (to_raw, label) = match rest.split_once(':') {
        Some((to_raw, label)) => (to_raw, Some(label.trim().to_string())),
        None => (rest, None),
    };

    let from = node_text(from_raw)?;
    let to = node_text(to_raw)?;
    Some(DiagramEdge { from, to, label })
}

/// Prefers the display text inside `[..]`, `(..)` or `{..}` node shapes,
/// falling back to the bare identifier.
fn node_text(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    for (open, close) in [('[', ']'), ('(', ')'), ('{', '}')] {
        if let Some(start) = raw.find(open) {
            let inner = &raw[start + open.len_utf8()..];
            if let Some(end) = inner.rfind(close) {
                let text = inner[..end].trim_matches(|c| c == '(' || c == ')' || c == '"');
                let text = text.trim();
                if !text.is_empty() {
                    return Some(text.to_string());
                }
            }
        }
    }

    Some(raw.to_string())
}

fn render_failed<T>(details: impl Into<String>) -> ChatResult<T> {
    Err(ChatError::RenderFailed {
        stage: "parse-mermaid",
        details: details.into(),
    })
}

/// Builds the visual step list for a parsed diagram.
pub fn diagram_element(diagram: &MermaidDiagram, cx: &App) -> AnyElement {
    let theme = cx.theme();
    let title = match diagram.kind {
        DiagramKind::Flowchart => "Flowchart",
        DiagramKind::Sequence => "Sequence",
    };

    v_flex()
        .w_full()
        .gap_1()
        .p_3()
        .rounded_md()
        .border_1()
        .border_color(theme.border)
        .bg(theme.muted.opacity(0.3))
        .child(
            h_flex()
                .gap_2()
                .items_center()
                .child(
                    Icon::new(IconName::Code)
                        .size(px(14.))
                        .text_color(theme.muted_foreground),
                )
                .child(
                    Label::new(title)
                        .text_xs()
                        .text_color(theme.muted_foreground),
                ),
        )
        .children(diagram.edges.iter().map(|edge| {
            let mut line = format!("{} → {}", edge.from, edge.to);
            if let Some(label) = &edge.label {
                line.push_str(&format!("  ({label})"));
            }
            Label::new(line).text_sm().text_color(theme.foreground)
        }))
        .into_any_element()
}

#[cfg(test)]
mod tests {
    use super::*;
    use koda_chat::{RenderedBlock, render_code_block};

    #[test]
    fn flowchart_edges_parse_with_labels_and_shapes() {
        let diagram = parse_mermaid(
            "graph TD\nA[Start] --> B{Choice}\nB -->|yes| C(Done)\nB -->|no| A\n",
        )
        .expect("valid flowchart");

        assert_eq!(diagram.kind, DiagramKind::Flowchart);
        assert_eq!(diagram.edges.len(), 3);
        assert_eq!(diagram.edges[0].from, "Start");
        assert_eq!(diagram.edges[0].to, "Choice");
        assert_eq!(diagram.edges[1].label.as_deref(), Some("yes"));
        assert_eq!(diagram.edges[1].to, "Done");
    }

    #[test]
    fn sequence_edges_parse_with_messages() {
        let diagram =
            parse_mermaid("sequenceDiagram\nBrowser->>Server: POST /chat\nServer-->>Browser: tokens\n")
                .expect("valid sequence");

        assert_eq!(diagram.kind, DiagramKind::Sequence);
        assert_eq!(diagram.edges.len(), 2);
        assert_eq!(diagram.edges[0].label.as_deref(), Some("POST /chat"));
        assert_eq!(diagram.edges[1].from, "Server");
    }

    #[test]
    fn unknown_diagram_family_is_a_render_failure() {
        let error = parse_mermaid("pie\n\"a\": 1\n").unwrap_err();
        assert!(error.to_string().contains("unsupported diagram type"));
    }

    #[test]
    fn diagram_without_edges_is_a_render_failure() {
        assert!(parse_mermaid("graph TD\n").is_err());
        assert!(parse_mermaid("").is_err());
    }

    #[test]
    fn non_mermaid_languages_are_declined() {
        let renderer = DiagramRenderer;
        assert_eq!(renderer.render("java", "int x;").expect("declines"), None);
    }

    #[test]
    fn broken_diagram_falls_back_to_literal_code() {
        // Mid-stream fences frequently stop after the header line.
        let block = render_code_block(Some(&DiagramRenderer), "mermaid", "graph TD\nA --");
        assert!(matches!(block, RenderedBlock::Fallback { language, .. } if language == "mermaid"));
    }

    #[test]
    fn complete_diagram_is_substituted() {
        let block = render_code_block(Some(&DiagramRenderer), "mermaid", "graph LR\nA --> B\n");
        assert!(matches!(block, RenderedBlock::Custom(diagram) if diagram.edges.len() == 1));
    }
}
