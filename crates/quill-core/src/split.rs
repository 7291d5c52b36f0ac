//! Length-bounded splitting on natural text boundaries.
//!
//! All lengths here are counted in characters, not bytes, and every returned
//! offset is a valid UTF-8 boundary into the input.

/// Boundaries tried in priority order: paragraph, line, sentence, word.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Byte offset of the `n`th character, or `text.len()` when the text is shorter.
pub fn char_offset(text: &str, n: usize) -> usize {
    text.char_indices()
        .nth(n)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}

/// Longest prefix of at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    &text[..char_offset(text, max_chars)]
}

/// Find a cut point at or before `max_len` characters.
///
/// Scans the first `max_len` characters backward for each separator in
/// priority order and accepts the first one lying beyond `max_len / 3`.
/// Falls back to a hard cut at `max_len`. The returned byte offset includes
/// the separator, so `text[..offset]` is the head and `text[offset..]` the rest.
pub fn find_split_point(text: &str, max_len: usize) -> usize {
    let max_len = max_len.max(1);
    let window_end = char_offset(text, max_len);
    if window_end == text.len() {
        return text.len();
    }

    let window = &text[..window_end];
    let min_chars = max_len / 3;

    for sep in SEPARATORS {
        if let Some(pos) = window.rfind(sep) {
            if char_len(&window[..pos]) > min_chars {
                return pos + sep.len();
            }
        }
    }

    window_end
}

/// Split `text` into pieces of at most `max_len` characters.
///
/// Whitespace at each cut is trimmed from both sides. Text that already fits
/// is returned unchanged as a single piece. The renderer cuts with
/// [`find_split_point`] instead, since its ledger needs the offsets.
#[cfg(test)]
pub(crate) fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if char_len(text) <= max_len {
        return vec![text.to_string()];
    }

    let mut parts = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if char_len(remaining) <= max_len {
            parts.push(remaining.to_string());
            break;
        }

        let split = find_split_point(remaining, max_len);
        let head = remaining[..split].trim_end();
        if !head.is_empty() {
            parts.push(head.to_string());
        }
        remaining = remaining[split..].trim_start();
    }

    parts
}

/// Cut point for a reasoning block that will be sent as a collapsed quote.
///
/// The raw budget is `limit * 0.8 - 10` to leave room for escaping and the
/// quote markers. Returns `reasoning.len()` when everything fits.
pub fn reasoning_split_point(reasoning: &str, limit: usize) -> usize {
    let raw_limit = ((limit as f64 * 0.8) as usize).saturating_sub(10).max(1);
    if char_len(reasoning) <= raw_limit {
        return reasoning.len();
    }
    find_split_point(reasoning, raw_limit)
}
