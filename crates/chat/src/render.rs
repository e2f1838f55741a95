use std::panic::{self, AssertUnwindSafe};

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};

use crate::error::ChatResult;

/// One renderable slice of a message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Plain markdown, handed to the markdown view as-is.
    Markdown(String),
    /// A fenced code block with its declared language tag (may be empty).
    Code { language: String, code: String },
}

/// Splits markdown into prose segments and fenced code blocks.
///
/// Fence detection goes through the markdown parser rather than line
/// scanning so indented code, fences inside quotes and unterminated
/// trailing fences (mid-stream content) are handled the same way the
/// final render will see them.
pub fn segment_markdown(source: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut cursor = 0usize;
    let mut open_fence: Option<(String, String)> = None;

    for (event, range) in Parser::new_ext(source, Options::empty()).into_offset_iter() {
        match event {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info))) => {
                let language = info
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_string();
                push_markdown(&mut segments, &source[cursor..range.start]);
                cursor = range.start;
                open_fence = Some((language, String::new()));
            }
            Event::Text(text) => {
                if let Some((_, buffer)) = open_fence.as_mut() {
                    buffer.push_str(&text);
                }
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some((language, code)) = open_fence.take() {
                    segments.push(Segment::Code { language, code });
                    cursor = range.end;
                }
            }
            _ => {}
        }
    }

    push_markdown(&mut segments, &source[cursor..]);
    segments
}

fn push_markdown(segments: &mut Vec<Segment>, slice: &str) {
    if slice.trim().is_empty() {
        return;
    }
    segments.push(Segment::Markdown(slice.to_string()));
}

/// Per-language code block substitution strategy.
///
/// `Ok(None)` declines the block, `Err` reports a failed attempt; both end
/// in the literal-code fallback. Implementations see partially streamed
/// code, so declining or failing on incomplete input is the normal case,
/// not an exceptional one.
pub trait CodeBlockRenderer {
    type Output;

    fn render(&self, language: &str, code: &str) -> ChatResult<Option<Self::Output>>;
}

/// Result of running one code block through the render pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedBlock<T> {
    Custom(T),
    Fallback { language: String, code: String },
}

/// Applies the optional strategy to one fenced block.
///
/// A renderer failure must never abort rendering of the rest of the
/// message, so panics are contained here alongside `Err` returns.
pub fn render_code_block<R: CodeBlockRenderer>(
    renderer: Option<&R>,
    language: &str,
    code: &str,
) -> RenderedBlock<R::Output> {
    if let Some(renderer) = renderer {
        match panic::catch_unwind(AssertUnwindSafe(|| renderer.render(language, code))) {
            Ok(Ok(Some(output))) => return RenderedBlock::Custom(output),
            Ok(Ok(None)) => {}
            Ok(Err(error)) => {
                tracing::debug!(
                    language,
                    error = %error,
                    "code block renderer failed; rendering literal code"
                );
            }
            Err(_) => {
                tracing::warn!(language, "code block renderer panicked; rendering literal code");
            }
        }
    }

    RenderedBlock::Fallback {
        language: language.to_string(),
        code: code.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderFailedSnafu;

    struct UppercaseDiagrams;

    impl CodeBlockRenderer for UppercaseDiagrams {
        type Output = String;

        fn render(&self, language: &str, code: &str) -> ChatResult<Option<String>> {
            if language == "diagram" {
                Ok(Some(code.to_uppercase()))
            } else {
                Ok(None)
            }
        }
    }

    struct AlwaysFails;

    impl CodeBlockRenderer for AlwaysFails {
        type Output = String;

        fn render(&self, _language: &str, _code: &str) -> ChatResult<Option<String>> {
            RenderFailedSnafu {
                stage: "test-renderer",
                details: "incomplete data".to_string(),
            }
            .fail()
        }
    }

    struct Panics;

    impl CodeBlockRenderer for Panics {
        type Output = String;

        fn render(&self, _language: &str, _code: &str) -> ChatResult<Option<String>> {
            panic!("renderer bug")
        }
    }

    #[test]
    fn plain_text_is_a_single_markdown_segment() {
        let segments = segment_markdown("Hello **world**, nothing fenced here.");
        assert_eq!(
            segments,
            vec![Segment::Markdown(
                "Hello **world**, nothing fenced here.".to_string()
            )]
        );
    }

    #[test]
    fn fenced_blocks_split_out_with_language_tags() {
        let source = "Intro\n\n```java\nSystem.out.println();\n```\n\nOutro";
        let segments = segment_markdown(source);

        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], Segment::Markdown("Intro\n\n".to_string()));
        assert_eq!(
            segments[1],
            Segment::Code {
                language: "java".to_string(),
                code: "System.out.println();\n".to_string(),
            }
        );
        assert!(matches!(
            &segments[2],
            Segment::Markdown(text) if text.trim() == "Outro"
        ));
    }

    #[test]
    fn fence_without_language_yields_empty_tag() {
        let segments = segment_markdown("```\nraw\n```");
        assert_eq!(
            segments,
            vec![Segment::Code {
                language: String::new(),
                code: "raw\n".to_string(),
            }]
        );
    }

    #[test]
    fn unterminated_fence_still_becomes_a_code_segment() {
        // Mid-stream content frequently ends inside an open fence.
        let segments = segment_markdown("text\n\n```mermaid\ngraph TD\nA --> B\n");
        assert_eq!(segments.len(), 2);
        assert!(matches!(
            &segments[1],
            Segment::Code { language, code }
                if language == "mermaid" && code.contains("A --> B")
        ));
    }

    #[test]
    fn recognized_language_is_substituted() {
        let block = render_code_block(Some(&UppercaseDiagrams), "diagram", "a->b");
        assert_eq!(block, RenderedBlock::Custom("A->B".to_string()));
    }

    #[test]
    fn declined_language_falls_back_to_literal_code() {
        let block = render_code_block(Some(&UppercaseDiagrams), "java", "int x;");
        assert_eq!(
            block,
            RenderedBlock::Fallback {
                language: "java".to_string(),
                code: "int x;".to_string(),
            }
        );
    }

    #[test]
    fn failing_renderer_matches_absent_renderer_output() {
        let with_failing = render_code_block(Some(&AlwaysFails), "diagram", "a->b");
        let without: RenderedBlock<String> =
            render_code_block(None::<&AlwaysFails>, "diagram", "a->b");
        assert_eq!(with_failing, without);
    }

    #[test]
    fn panicking_renderer_is_contained() {
        let block = render_code_block(Some(&Panics), "diagram", "a->b");
        assert_eq!(
            block,
            RenderedBlock::Fallback {
                language: "diagram".to_string(),
                code: "a->b".to_string(),
            }
        );
    }

    #[test]
    fn one_failing_block_leaves_siblings_intact() {
        let source = "```diagram\na->b\n```\n\n```java\nint x;\n```";
        let segments = segment_markdown(source);
        let rendered = segments
            .iter()
            .map(|segment| match segment {
                Segment::Markdown(text) => format!("md:{text}"),
                Segment::Code { language, code } => {
                    match render_code_block(Some(&AlwaysFails), language, code) {
                        RenderedBlock::Custom(output) => format!("custom:{output}"),
                        RenderedBlock::Fallback { language, .. } => format!("code:{language}"),
                    }
                }
            })
            .collect::<Vec<_>>();

        assert_eq!(rendered, ["code:diagram", "code:java"]);
    }
}
