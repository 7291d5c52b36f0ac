//! Conversion from generic markdown to Telegram MarkdownV2.
//!
//! MarkdownV2 rejects a message outright if any reserved character appears
//! unescaped outside an entity, so every path through this module either
//! produces a well-formed entity or escapes the character. Inside code spans
//! and fenced blocks only backtick and backslash are escaped.

use crate::split::{char_len, char_offset, truncate_chars};

/// Characters with syntactic meaning in MarkdownV2 plain text.
const RESERVED: &[char] = &[
    '\\', '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

pub const CODE_FENCE: &str = "```";

/// A segment of markdown content - either plain text or a code block.
#[derive(Debug)]
enum MarkdownSegment<'a> {
    Text(&'a str),
    CodeBlock { lang: Option<&'a str>, code: &'a str },
}

/// Escape every reserved character.
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    for ch in text.chars() {
        if RESERVED.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn escape_code(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch == '`' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn escape_link_url(url: &str) -> String {
    let mut out = String::with_capacity(url.len());
    for ch in url.chars() {
        if ch == ')' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Number of fence markers in `text`. Odd means a block is left open.
pub fn count_fences(text: &str) -> usize {
    text.matches(CODE_FENCE).count()
}

pub fn ends_inside_fence(text: &str) -> bool {
    count_fences(text) % 2 == 1
}

/// Convert generic markdown to MarkdownV2.
///
/// An unterminated fenced block is closed at the end of the output. Escaping
/// can grow the text, so callers must re-check the length of the result.
pub fn to_rich_text(markdown: &str) -> String {
    let mut output = String::with_capacity(markdown.len() + markdown.len() / 4);

    for segment in parse_markdown_segments(markdown) {
        match segment {
            MarkdownSegment::Text(text) => convert_text_block(text, &mut output),
            MarkdownSegment::CodeBlock { lang, code } => {
                output.push_str(CODE_FENCE);
                if let Some(lang) = lang {
                    output.extend(
                        lang.chars()
                            .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '+' | '-')),
                    );
                }
                output.push('\n');
                output.push_str(&escape_code(code));
                if !output.ends_with('\n') {
                    output.push('\n');
                }
                output.push_str(CODE_FENCE);
                output.push('\n');
            }
        }
    }

    // A code block that closed the input adds a newline the input never had
    if !markdown.ends_with('\n') && output.ends_with('\n') {
        output.pop();
    }

    output
}

/// Reasoning rendered as a fully visible quote, one `>` per line.
pub fn quote_expanded(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    escape_markdown_v2(text)
        .split('\n')
        .map(|line| format!(">{}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Expanded quote of the longest suffix of `text` that renders within
/// `max_chars`. Used when newer lines matter more than older ones.
pub fn quote_expanded_tail(text: &str, max_chars: usize) -> String {
    let total = char_len(text);
    let mut keep = total.min(max_chars);
    loop {
        let quoted = quote_expanded(&text[char_offset(text, total - keep)..]);
        // Each dropped char shrinks the quote by at least one char
        let over = char_len(&quoted).saturating_sub(max_chars);
        if over == 0 {
            return quoted;
        }
        keep = keep.saturating_sub(over);
    }
}

/// Reasoning rendered as an expandable quote that starts collapsed.
///
/// `**>` opens the block, `>` continues it and `||` closes it.
pub fn quote_collapsed(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let escaped = escape_markdown_v2(text);
    let mut lines = escaped.split('\n');
    let mut out = String::with_capacity(escaped.len() + 16);
    out.push_str("**>");
    out.push_str(lines.next().unwrap_or_default());
    for line in lines {
        out.push_str("\n>");
        out.push_str(line);
    }
    out.push_str("||");
    out
}

/// Collapsed reasoning quote, a blank line, then the converted answer.
///
/// Callers must check the combined length against the ceiling before using it.
pub fn combine_quote_and_answer(reasoning: &str, answer: &str) -> String {
    if reasoning.is_empty() {
        return to_rich_text(answer);
    }
    format!("{}\n\n{}", quote_collapsed(reasoning), to_rich_text(answer))
}

/// Cut already-escaped rich text to `max_chars` without leaving a dangling
/// escape backslash at the end.
pub fn truncate_rich(text: &str, max_chars: usize) -> String {
    if char_len(text) <= max_chars {
        return text.to_string();
    }
    let mut cut = truncate_chars(text, max_chars).to_string();
    let trailing = cut.chars().rev().take_while(|c| *c == '\\').count();
    if trailing % 2 == 1 {
        cut.pop();
    }
    cut
}

/// Parse markdown into segments of text and fenced code blocks.
fn parse_markdown_segments(markdown: &str) -> Vec<MarkdownSegment<'_>> {
    let mut segments = Vec::new();
    let mut remaining = markdown;

    while !remaining.is_empty() {
        if let Some(fence_start) = find_code_fence_start(remaining) {
            if fence_start > 0 {
                segments.push(MarkdownSegment::Text(&remaining[..fence_start]));
            }

            let after_fence = &remaining[fence_start..];
            if let Some((lang, code, end_pos)) = parse_code_block(after_fence) {
                segments.push(MarkdownSegment::CodeBlock { lang, code });
                remaining = &after_fence[end_pos..];
            } else {
                // Bare fence on the last line: nothing to open yet
                segments.push(MarkdownSegment::Text(after_fence));
                break;
            }
        } else {
            segments.push(MarkdownSegment::Text(remaining));
            break;
        }
    }

    segments
}

/// Find the start position of a code fence that begins a line.
fn find_code_fence_start(text: &str) -> Option<usize> {
    let mut pos = 0;
    for line in text.split('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with(CODE_FENCE) {
            return Some(pos + line.len() - trimmed.len());
        }
        pos += line.len() + 1;
    }
    None
}

/// Parse a code block starting at the opening fence.
/// Returns (language, code, end position after the closing fence).
/// A block without a closing fence runs to the end of the text.
fn parse_code_block(text: &str) -> Option<(Option<&str>, &str, usize)> {
    let first_line_end = text.find('\n')?;
    let info = text[CODE_FENCE.len()..first_line_end].trim();
    let lang = info.split_whitespace().next();

    let code_start = first_line_end + 1;
    let after_opening = &text[code_start..];

    let mut search_pos = 0;
    for line in after_opening.split('\n') {
        if line.trim_start().starts_with(CODE_FENCE) {
            let code = &after_opening[..search_pos];
            let closing_end = search_pos + line.len();
            let total_end = if after_opening.as_bytes().get(closing_end) == Some(&b'\n') {
                code_start + closing_end + 1
            } else {
                code_start + closing_end
            };
            return Some((lang, code, total_end));
        }
        search_pos += line.len() + 1;
    }

    Some((lang, after_opening, text.len()))
}

fn convert_text_block(text: &str, out: &mut String) {
    let mut lines = text.split('\n').peekable();
    while let Some(line) = lines.next() {
        convert_line(line, out);
        if lines.peek().is_some() {
            out.push('\n');
        }
    }
}

fn convert_line(line: &str, out: &mut String) {
    let trimmed = line.trim_start();
    let indent = &line[..line.len() - trimmed.len()];

    if is_horizontal_rule(trimmed) {
        out.push_str("————————");
        return;
    }

    if let Some(heading) = strip_heading(trimmed) {
        out.push('*');
        out.push_str(&escape_markdown_v2(heading));
        out.push('*');
        return;
    }

    if let Some(rest) = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))
        .or_else(|| trimmed.strip_prefix("+ "))
    {
        out.push_str(indent);
        out.push_str("• ");
        convert_inline(rest, out);
        return;
    }

    if let Some((number, rest)) = split_ordered_item(trimmed) {
        out.push_str(indent);
        out.push_str(number);
        out.push_str("\\. ");
        convert_inline(rest, out);
        return;
    }

    if indent.is_empty() {
        if let Some(rest) = trimmed.strip_prefix('>') {
            out.push('>');
            convert_inline(rest.strip_prefix(' ').unwrap_or(rest), out);
            return;
        }
    }

    out.push_str(indent);
    convert_inline(trimmed, out);
}

fn is_horizontal_rule(line: &str) -> bool {
    let line = line.trim_end();
    line.len() >= 3
        && ['-', '*', '_']
            .iter()
            .any(|marker| line.chars().all(|c| c == *marker))
}

fn strip_heading(line: &str) -> Option<&str> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    rest.strip_prefix(' ').map(|r| r.trim())
}

fn split_ordered_item(line: &str) -> Option<(&str, &str)> {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let rest = line[digits..].strip_prefix(". ")?;
    Some((&line[..digits], rest))
}

/// Convert inline markup: code spans, bold, italic, strikethrough, links.
/// Anything that does not form a complete span is escaped literally.
fn convert_inline(text: &str, out: &mut String) {
    convert_inline_within(text, &[], out);
}

/// Emit one entity. An entity nested in another with the same marker keeps
/// only its content, since MarkdownV2 cannot nest a marker in itself.
fn push_entity(marker: char, inner: &[char], open: &[char], out: &mut String) {
    let inner: String = inner.iter().collect();
    if open.contains(&marker) {
        convert_inline_within(&inner, open, out);
        return;
    }
    let mut nested = open.to_vec();
    nested.push(marker);
    out.push(marker);
    convert_inline_within(&inner, &nested, out);
    out.push(marker);
}

/// `open` holds the markers of the entities enclosing `text`.
fn convert_inline_within(text: &str, open: &[char], out: &mut String) {
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match c {
            '`' => {
                if let Some(end) = find_char(&chars, i + 1, '`') {
                    out.push('`');
                    let inner: String = chars[i + 1..end].iter().collect();
                    out.push_str(&escape_code(&inner));
                    out.push('`');
                    i = end + 1;
                    continue;
                }
            }
            '*' | '_' if next == Some(c) => {
                if let Some(end) = find_pair(&chars, i + 2, c) {
                    if end > i + 2 {
                        push_entity('*', &chars[i + 2..end], open, out);
                        i = end + 2;
                        continue;
                    }
                }
            }
            '~' if next == Some('~') => {
                if let Some(end) = find_pair(&chars, i + 2, '~') {
                    if end > i + 2 {
                        push_entity('~', &chars[i + 2..end], open, out);
                        i = end + 2;
                        continue;
                    }
                }
            }
            '*' | '_' if opens_emphasis(&chars, i) => {
                if let Some(end) = find_emphasis_close(&chars, i + 1, c) {
                    push_entity('_', &chars[i + 1..end], open, out);
                    i = end + 1;
                    continue;
                }
            }
            '[' => {
                if let Some((label_end, url_end)) = find_link(&chars, i) {
                    let label: String = chars[i + 1..label_end].iter().collect();
                    let url: String = chars[label_end + 2..url_end].iter().collect();
                    out.push('[');
                    convert_inline_within(&label, open, out);
                    out.push_str("](");
                    out.push_str(&escape_link_url(&url));
                    out.push(')');
                    i = url_end + 1;
                    continue;
                }
            }
            _ => {}
        }

        if RESERVED.contains(&c) {
            out.push('\\');
        }
        out.push(c);
        i += 1;
    }
}

fn find_char(chars: &[char], from: usize, target: char) -> Option<usize> {
    (from..chars.len()).find(|&idx| chars[idx] == target)
}

fn find_pair(chars: &[char], from: usize, marker: char) -> Option<usize> {
    (from..chars.len().saturating_sub(1)).find(|&idx| chars[idx] == marker && chars[idx + 1] == marker)
}

fn opens_emphasis(chars: &[char], idx: usize) -> bool {
    let next_ok = chars
        .get(idx + 1)
        .map(|c| !c.is_whitespace() && *c != chars[idx])
        .unwrap_or(false);
    // snake_case identifiers must not start italics
    let prev_ok = idx == 0 || !chars[idx - 1].is_alphanumeric();
    next_ok && prev_ok
}

fn find_emphasis_close(chars: &[char], from: usize, marker: char) -> Option<usize> {
    (from..chars.len()).find(|&idx| {
        chars[idx] == marker
            && !chars[idx - 1].is_whitespace()
            && chars.get(idx + 1).map(|c| *c != marker && !c.is_alphanumeric()).unwrap_or(true)
    })
}

/// Locate `[label](url)` starting at `start`. Returns (index of `]`, index of `)`).
fn find_link(chars: &[char], start: usize) -> Option<(usize, usize)> {
    let label_end = find_char(chars, start + 1, ']')?;
    if label_end == start + 1 || chars.get(label_end + 1) != Some(&'(') {
        return None;
    }
    let url_end = find_char(chars, label_end + 2, ')')?;
    if url_end == label_end + 2 {
        return None;
    }
    Some((label_end, url_end))
}
