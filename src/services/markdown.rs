//! Markdown rendering service
//!
//! Story bodies are Markdown written by community members. Raw HTML in the
//! source is escaped, never passed through, and links with script schemes
//! are dropped.
//!
//! # Example
//!
//! ```
//! use storyshare::services::markdown::MarkdownRenderer;
//!
//! let renderer = MarkdownRenderer::new();
//! let html = renderer.render("# Hello\n\nThis is **bold** <script>x</script>");
//! assert!(html.contains("<h1>"));
//! assert!(html.contains("&lt;script&gt;"));
//! ```

use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag, TagEnd};

/// Link schemes that are rendered as plain text
const BLOCKED_SCHEMES: &[&str] = &["javascript:", "vbscript:", "data:"];

/// A thread-safe Markdown renderer.
///
/// Supports headings, lists, links, images, blockquotes, code, emphasis,
/// strikethrough, tables and smart punctuation.
#[derive(Debug, Clone)]
pub struct MarkdownRenderer {
    options: Options,
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownRenderer {
    pub fn new() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_SMART_PUNCTUATION);
        Self { options }
    }

    /// Render Markdown to HTML safe to embed in a page
    pub fn render(&self, markdown: &str) -> String {
        let parser = Parser::new_ext(markdown, self.options);
        let events = sanitize_events(parser);

        let mut html_output = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut html_output, events.into_iter());
        html_output
    }

    /// Plain text of the first `max_chars` characters, for listings and previews
    pub fn excerpt(&self, markdown: &str, max_chars: usize) -> String {
        let mut text = String::new();
        for event in Parser::new_ext(markdown, self.options) {
            match event {
                Event::Text(t) | Event::Code(t) => text.push_str(&t),
                Event::SoftBreak | Event::HardBreak => text.push(' '),
                Event::End(TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::Item) => text.push(' '),
                _ => {}
            }
        }

        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.chars().count() <= max_chars {
            return text;
        }
        let cut: String = text.chars().take(max_chars).collect();
        // Prefer ending on a word boundary
        let cut = match cut.rfind(' ') {
            Some(pos) if pos > max_chars / 2 => cut[..pos].to_string(),
            _ => cut,
        };
        format!("{}…", cut.trim_end())
    }
}

/// Turn raw HTML into text and unwrap links with blocked schemes
fn sanitize_events<'a>(parser: Parser<'a>) -> Vec<Event<'a>> {
    let mut events = Vec::new();
    // Depth of blocked links being skipped
    let mut skipped_links = 0usize;

    for event in parser {
        match event {
            Event::Html(raw) | Event::InlineHtml(raw) => events.push(Event::Text(raw)),
            Event::Start(Tag::Link { ref dest_url, .. }) if is_blocked(dest_url) => {
                skipped_links += 1;
            }
            Event::End(TagEnd::Link) if skipped_links > 0 => {
                skipped_links -= 1;
            }
            Event::Start(Tag::Image {
                link_type,
                dest_url,
                title,
                id,
            }) => {
                let dest_url = if is_blocked(&dest_url) {
                    CowStr::Borrowed("")
                } else {
                    dest_url
                };
                events.push(Event::Start(Tag::Image {
                    link_type,
                    dest_url,
                    title,
                    id,
                }));
            }
            other => events.push(other),
        }
    }
    events
}

fn is_blocked(url: &str) -> bool {
    let url = url.trim().to_ascii_lowercase();
    BLOCKED_SCHEMES.iter().any(|scheme| url.starts_with(scheme))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_render_basic_markdown() {
        let renderer = MarkdownRenderer::new();
        let html = renderer.render("# Title\n\n**bold** and *italic* and ~~gone~~");
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<strong>bold</strong>"));
        assert!(html.contains("<em>italic</em>"));
        assert!(html.contains("<del>gone</del>"));
    }

    #[test]
    fn test_render_lists_and_quotes() {
        let renderer = MarkdownRenderer::new();
        let html = renderer.render("- one\n- two\n\n1. first\n\n> quoted");
        assert!(html.contains("<ul>"));
        assert!(html.contains("<ol>"));
        assert!(html.contains("<blockquote>"));
    }

    #[test]
    fn test_render_table() {
        let renderer = MarkdownRenderer::new();
        let html = renderer.render("| a | b |\n|---|---|\n| 1 | 2 |");
        assert!(html.contains("<table>"));
    }

    #[test]
    fn test_raw_html_is_escaped() {
        let renderer = MarkdownRenderer::new();
        let html = renderer.render("<script>alert(1)</script>\n\nHello <b onclick=\"x\">there</b>");
        assert!(!html.contains("<script>"));
        assert!(!html.contains("<b onclick"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_script_links_are_dropped() {
        let renderer = MarkdownRenderer::new();
        let html = renderer.render("[click](javascript:alert(1)) and [ok](https://example.com)");
        assert!(!html.contains("javascript:"));
        assert!(html.contains("click"));
        assert!(html.contains("href=\"https://example.com\""));
    }

    #[test]
    fn test_code_is_escaped() {
        let renderer = MarkdownRenderer::new();
        let html = renderer.render("```\n<div>&</div>\n```");
        assert!(html.contains("&lt;div&gt;&amp;&lt;/div&gt;"));
    }

    #[test]
    fn test_excerpt() {
        let renderer = MarkdownRenderer::new();
        let md = "# My journey\n\nI started **dialysis** in 2019.\n\nIt was hard at first.";
        assert_eq!(
            renderer.excerpt(md, 200),
            "My journey I started dialysis in 2019. It was hard at first."
        );
        let short = renderer.excerpt(md, 20);
        assert!(short.ends_with('…'));
        assert!(short.chars().count() <= 21);
    }

    #[test]
    fn test_render_empty_input() {
        assert_eq!(MarkdownRenderer::new().render(""), "");
    }

    proptest! {
        /// No input produces a live script tag
        #[test]
        fn property_no_script_tags(body in "[a-z <>/=\"]{0,60}") {
            let html = MarkdownRenderer::new().render(&format!("{}<script>x</script>", body));
            prop_assert!(!html.contains("<script>"));
        }
    }
}
