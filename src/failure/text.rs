//! Text helpers shared by the failure matchers.

use regex::Regex;
use std::sync::OnceLock;

/// Maximum number of stack frames kept in an excerpt.
pub const MAX_STACK_FRAMES: usize = 5;

/// Upper bound on a rendered-markup excerpt, in bytes.
pub const MAX_MARKUP_LEN: usize = 4000;

/// Elements that never have a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

fn ansi_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07]*\x07").ok())
        .as_ref()
}

fn tag_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9-]*)\b[^<>]*?(/?)>").ok())
        .as_ref()
}

/// Remove ANSI colour and cursor escape sequences.
///
/// ```
/// use kintsugi::failure::strip_ansi;
///
/// assert_eq!(strip_ansi("\x1b[31m✕ fails\x1b[39m"), "✕ fails");
/// ```
#[must_use]
pub fn strip_ansi(text: &str) -> String {
    match ansi_pattern() {
        Some(pattern) => pattern.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}

/// Whether a trimmed line is a stack frame (`at ...` or vitest's `❯ ...`).
#[must_use]
pub fn is_stack_frame(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("at ") || line.starts_with("❯ ")
}

/// Split an error block into its message and a bounded stack excerpt.
///
/// The message is everything before the first frame with common
/// indentation removed; the excerpt is at most [`MAX_STACK_FRAMES`] frames.
#[must_use]
pub fn split_stack(block: &str) -> (String, Option<String>) {
    let lines: Vec<&str> = block.lines().collect();
    let first_frame = lines.iter().position(|l| is_stack_frame(l));

    let (message_lines, frame_lines) = match first_frame {
        Some(idx) => lines.split_at(idx),
        None => (lines.as_slice(), &[][..]),
    };

    let frames: Vec<&str> = frame_lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| is_stack_frame(l))
        .take(MAX_STACK_FRAMES)
        .collect();

    let stack = (!frames.is_empty()).then(|| frames.join("\n"));
    (dedent(message_lines), stack)
}

/// Join lines with their shared leading whitespace removed, trimming blank
/// lines at either end.
#[must_use]
pub fn dedent(lines: &[&str]) -> String {
    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let body: Vec<&str> = lines
        .iter()
        .map(|l| l.get(indent..).unwrap_or_else(|| l.trim_start()))
        .map(str::trim_end)
        .collect();

    body.join("\n").trim_matches('\n').to_string()
}

/// First balanced markup fragment in `text`, if any.
///
/// Testing libraries print the DOM at failure time. The excerpt runs from
/// the first opening tag that has a matching close to that close, so stray
/// angle-bracket tokens such as `Object.<anonymous>` are skipped.
#[must_use]
pub fn markup_excerpt(text: &str) -> Option<String> {
    let pattern = tag_pattern()?;

    // (start, end, name, closing)
    let tags: Vec<(usize, usize, String, bool)> = pattern
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let closing = !caps[1].is_empty();
            let name = caps[2].to_ascii_lowercase();
            let skip = !caps[3].is_empty() || (!closing && VOID_ELEMENTS.contains(&name.as_str()));
            (!skip).then(|| (whole.start(), whole.end(), name, closing))
        })
        .collect();

    for (i, (start, _, root, closing)) in tags.iter().enumerate() {
        if *closing {
            continue;
        }
        let mut depth = 0usize;
        for (_, end, name, closing) in &tags[i..] {
            if name != root {
                continue;
            }
            if *closing {
                depth -= 1;
                if depth == 0 {
                    return Some(truncate(&text[*start..*end], MAX_MARKUP_LEN));
                }
            } else {
                depth += 1;
            }
        }
    }

    None
}

/// Cut `text` to at most `max` bytes on a char boundary, marking the cut.
#[must_use]
pub fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Source of the test named `test_name` in `test_source`.
///
/// Recognises `it(...)`, `test(...)` and `specify(...)` calls (including
/// modifiers such as `it.only`) and Python `def test_...` functions.
#[must_use]
pub fn test_body_snippet(test_source: &str, test_name: &str) -> Option<String> {
    if test_name.trim().is_empty() {
        return None;
    }
    js_test_call(test_source, test_name).or_else(|| python_test_def(test_source, test_name))
}

fn js_test_call(source: &str, name: &str) -> Option<String> {
    let pattern = format!(
        r#"\b(?:it|test|specify)(?:\.\w+)?\s*\(\s*['"`]{}['"`]"#,
        regex::escape(name)
    );
    let found = Regex::new(&pattern).ok()?.find(source)?;
    let open = found.start() + source[found.start()..].find('(')?;
    let close = matching_paren(source, open)?;

    let mut end = close + 1;
    if source[end..].starts_with(';') {
        end += 1;
    }
    Some(source[found.start()..end].to_string())
}

/// Index of the `)` closing the `(` at `open`, skipping string literals and
/// `//` / `/* */` comments.
fn matching_paren(source: &str, open: usize) -> Option<usize> {
    #[derive(Clone, Copy, PartialEq)]
    enum Scan {
        Code,
        Quoted(char),
        LineComment,
        BlockComment,
    }

    let mut depth = 0usize;
    let mut state = Scan::Code;
    let mut escaped = false;
    let mut chars = source[open..].char_indices().peekable();

    while let Some((offset, ch)) = chars.next() {
        match state {
            Scan::Quoted(q) => {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    state = Scan::Code;
                }
            }
            Scan::LineComment => {
                if ch == '\n' {
                    state = Scan::Code;
                }
            }
            Scan::BlockComment => {
                if ch == '*' && chars.peek().is_some_and(|&(_, next)| next == '/') {
                    chars.next();
                    state = Scan::Code;
                }
            }
            Scan::Code => match ch {
                '\'' | '"' | '`' => state = Scan::Quoted(ch),
                '/' => match chars.peek().map(|&(_, next)| next) {
                    Some('/') => {
                        chars.next();
                        state = Scan::LineComment;
                    }
                    Some('*') => {
                        chars.next();
                        state = Scan::BlockComment;
                    }
                    _ => {}
                },
                '(' => depth += 1,
                ')' => {
                    depth = depth.checked_sub(1)?;
                    if depth == 0 {
                        return Some(open + offset);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

fn python_test_def(source: &str, name: &str) -> Option<String> {
    let lines: Vec<&str> = source.lines().collect();
    let header = format!("def {}(", name);
    let async_header = format!("async {}", header);
    let start = lines.iter().position(|l| {
        let trimmed = l.trim_start();
        trimmed.starts_with(&header) || trimmed.starts_with(&async_header)
    })?;
    let indent = lines[start].len() - lines[start].trim_start().len();

    let body_len = lines[start + 1..]
        .iter()
        .take_while(|l| l.trim().is_empty() || l.len() - l.trim_start().len() > indent)
        .count();

    let snippet: Vec<&str> = lines[start..=start + body_len].to_vec();
    Some(snippet.join("\n").trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi_keeps_text() {
        let coloured = "\x1b[1m\x1b[31m  ● add › adds\x1b[39m\x1b[22m";
        assert_eq!(strip_ansi(coloured), "  ● add › adds");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn test_split_stack_bounds_frames() {
        let block = "    Expected: 3\n    Received: 4\n\n      at a (x.ts:1)\n      at b (x.ts:2)\n      at c (x.ts:3)\n      at d (x.ts:4)\n      at e (x.ts:5)\n      at f (x.ts:6)";
        let (message, stack) = split_stack(block);
        assert_eq!(message, "Expected: 3\nReceived: 4");
        let stack = stack.unwrap();
        assert_eq!(stack.lines().count(), MAX_STACK_FRAMES);
        assert!(stack.starts_with("at a"));
        assert!(!stack.contains("at f"));
    }

    #[test]
    fn test_split_stack_without_frames() {
        let (message, stack) = split_stack("  boom\n");
        assert_eq!(message, "boom");
        assert!(stack.is_none());
    }

    #[test]
    fn test_markup_excerpt_balanced_root() {
        let text = "Unable to find role=\"button\"\n\n<body>\n  <div>\n    <img src=\"a.png\">\n    <span>Hi</span>\n  </div>\n</body>\n\nmore text";
        let excerpt = markup_excerpt(text).unwrap();
        assert!(excerpt.starts_with("<body>"));
        assert!(excerpt.ends_with("</body>"));
        assert!(excerpt.contains("<span>Hi</span>"));
    }

    #[test]
    fn test_markup_excerpt_requires_balance() {
        assert!(markup_excerpt("expected <div> to exist").is_none());
        assert!(markup_excerpt("expect(a < b).toBe(true)").is_none());
    }

    #[test]
    fn test_markup_excerpt_skips_unclosed_tokens() {
        let text = "at Object.<anonymous> (a.test.tsx:3)\n<div><p>x</p></div>";
        assert_eq!(markup_excerpt(text).unwrap(), "<div><p>x</p></div>");
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééé", 3), "é...");
    }

    #[test]
    fn test_js_snippet_by_name() {
        let source = r#"import { add } from './add';

describe('add', () => {
  it('adds numbers', () => {
    expect(add(1, 2)).toBe(4);
  });

  test("handles (parens) in strings", () => {
    expect(add(0, 0)).toBe(0);
  });
});
"#;
        let snippet = test_body_snippet(source, "adds numbers").unwrap();
        assert!(snippet.starts_with("it('adds numbers'"));
        assert!(snippet.ends_with("});"));
        assert!(!snippet.contains("handles"));

        let other = test_body_snippet(source, "handles (parens) in strings").unwrap();
        assert!(other.contains("add(0, 0)"));
        assert!(test_body_snippet(source, "missing").is_none());
    }

    #[test]
    fn test_python_snippet_by_name() {
        let source = "import calc\n\ndef test_adds():\n    assert calc.add(1, 2) == 4\n\n    assert True\n\ndef test_other():\n    pass\n";
        let snippet = test_body_snippet(source, "test_adds").unwrap();
        assert!(snippet.starts_with("def test_adds():"));
        assert!(snippet.contains("assert True"));
        assert!(!snippet.contains("test_other"));
    }

    #[test]
    fn test_js_snippet_skips_comments() {
        let source = "describe('add', () => {\n  it('adds', () => {\n    // it's fine\n    /* don't (worry) */\n    expect(add(1, 2)).toBe(3);\n  });\n\n  it('other', () => {});\n});\n";
        let snippet = test_body_snippet(source, "adds").unwrap();
        assert!(snippet.starts_with("it('adds'"));
        assert!(snippet.contains("// it's fine"));
        assert!(snippet.ends_with("});"));
        assert!(!snippet.contains("other"));
    }

    #[test]
    fn test_js_snippet_keeps_slashes_in_strings() {
        let source = "it('fetches', () => {\n  expect(url('http://x')).toBe(\"a/b\");\n});\n";
        let snippet = test_body_snippet(source, "fetches").unwrap();
        assert_eq!(snippet, source.trim_end());
    }
}
