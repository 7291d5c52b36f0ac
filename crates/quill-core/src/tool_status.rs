//! Transient status lines shown on the preview surface.
//!
//! These never reach a permanent message. They are plain text; the renderer
//! escapes them when the preview is sent as rich text.

use crate::i18n::{Language, Localizer};

/// Known tools: (tool name, phrase key, emoji).
const KNOWN_TOOLS: &[(&str, &str, &str)] = &[
    ("web_search", "status_searching", "🔍"),
    ("extract_webpage", "status_reading", "📄"),
];

const GENERIC_TOOL_EMOJI: &str = "🔧";
const THINKING_EMOJI: &str = "🤔";

/// Status line for a running tool, e.g. `🔍 Searching web... (×2)`.
///
/// The counter is only shown once the same tool has run more than once in
/// this generation.
pub fn tool_status_text(tool_name: &str, count: u32, lang: Language, l10n: &Localizer) -> String {
    let mut status = match KNOWN_TOOLS.iter().find(|(name, _, _)| *name == tool_name) {
        Some((_, key, emoji)) => format!("{} {}", emoji, l10n.text(key, lang)),
        None => format!(
            "{} {}",
            GENERIC_TOOL_EMOJI,
            l10n.format("status_tool", lang, &[("tool", tool_name)])
        ),
    };

    if count > 1 {
        status.push_str(&format!(" (×{})", count));
    }

    status
}

pub fn thinking_status_text(lang: Language, l10n: &Localizer) -> String {
    format!("{} {}", THINKING_EMOJI, l10n.text("status_thinking", lang))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tool_uses_localized_phrase() {
        let l10n = Localizer::new();
        assert_eq!(
            tool_status_text("web_search", 1, Language::En, &l10n),
            "🔍 Searching web..."
        );
        assert_eq!(
            tool_status_text("extract_webpage", 1, Language::Ru, &l10n),
            "📄 Читаю страницу..."
        );
    }

    #[test]
    fn counter_appears_after_first_use() {
        let l10n = Localizer::new();
        assert_eq!(
            tool_status_text("web_search", 3, Language::En, &l10n),
            "🔍 Searching web... (×3)"
        );
    }

    #[test]
    fn unknown_tool_falls_back_to_generic_phrase() {
        let l10n = Localizer::new();
        assert_eq!(
            tool_status_text("calculator", 1, Language::En, &l10n),
            "🔧 Using calculator..."
        );
    }

    #[test]
    fn thinking_status() {
        let l10n = Localizer::new();
        assert_eq!(thinking_status_text(Language::Uk, &l10n), "🤔 Думаю...");
    }
}
