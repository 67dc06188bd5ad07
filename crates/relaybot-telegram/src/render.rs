// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rendering outbound text for Telegram.
//!
//! Plain text is sent as-is. Text containing fenced code blocks is
//! rendered to Telegram HTML (`<pre><code>`), unless the rendered form
//! would blow the per-message cap, in which case the raw text wins.

use std::sync::OnceLock;

use regex::Regex;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```([A-Za-z0-9_+-]*)\r?\n(.*?)```").expect("static regex"))
}

/// Parse mode to request alongside rendered text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Plain,
    Html,
}

/// Render text for one Telegram message of at most `max_len` chars.
pub fn render_for_telegram(text: &str, max_len: usize) -> (String, RenderMode) {
    if !text.contains("```") {
        return (text.to_string(), RenderMode::Plain);
    }
    let rendered = render_fenced_code_blocks_as_html(text);
    if rendered.chars().count() > max_len {
        return (text.to_string(), RenderMode::Plain);
    }
    (rendered, RenderMode::Html)
}

fn render_fenced_code_blocks_as_html(text: &str) -> String {
    let mut result = String::new();
    let mut cursor = 0;

    for captures in fence_re().captures_iter(text) {
        let whole = captures.get(0).expect("match");
        let before = &text[cursor..whole.start()];
        if !before.is_empty() {
            result.push_str(&escape_html(before).replace('\n', "<br>"));
        }

        let language = captures.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        let code = captures.get(2).map(|m| m.as_str()).unwrap_or("");
        let code_escaped = escape_html(code);
        if language.is_empty() {
            result.push_str(&format!("<pre><code>{code_escaped}</code></pre>"));
        } else {
            let lang_escaped = escape_html(language);
            result.push_str(&format!(
                "<pre><code class=\"language-{lang_escaped}\">{code_escaped}</code></pre>"
            ));
        }
        cursor = whole.end();
    }

    let tail = &text[cursor..];
    if !tail.is_empty() {
        result.push_str(&escape_html(tail).replace('\n', "<br>"));
    }

    if result.is_empty() {
        return escape_html(text);
    }
    result
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        let (rendered, mode) = render_for_telegram("just words", 3800);
        assert_eq!(rendered, "just words");
        assert_eq!(mode, RenderMode::Plain);
    }

    #[test]
    fn fenced_block_becomes_pre_code() {
        let (rendered, mode) = render_for_telegram("before\n```rust\nlet x = 1;\n```", 3800);
        assert_eq!(mode, RenderMode::Html);
        assert!(rendered.contains("before<br>"));
        assert!(rendered.contains("<pre><code class=\"language-rust\">let x = 1;\n</code></pre>"));
    }

    #[test]
    fn unlabelled_fence_has_no_language_class() {
        let (rendered, mode) = render_for_telegram("```\ncode\n```", 3800);
        assert_eq!(mode, RenderMode::Html);
        assert!(rendered.contains("<pre><code>code\n</code></pre>"));
        assert!(!rendered.contains("language-"));
    }

    #[test]
    fn code_content_is_escaped() {
        let (rendered, _) = render_for_telegram("```\nif a < b && c > d {}\n```", 3800);
        assert!(rendered.contains("a &lt; b &amp;&amp; c &gt; d"));
    }

    #[test]
    fn oversized_render_falls_back_to_plain() {
        let body = "x".repeat(100);
        let text = format!("```\n{body}\n```");
        let (rendered, mode) = render_for_telegram(&text, 60);
        assert_eq!(mode, RenderMode::Plain);
        assert_eq!(rendered, text);
    }
}
