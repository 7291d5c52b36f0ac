//! Localized phrases used by the renderer's status overlay and fixed answers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ru,
    Uk,
}

impl Language {
    /// Parse a language tag such as `ru` or `uk-UA`. Unknown tags map to English.
    pub fn from_tag(tag: &str) -> Self {
        let primary = tag
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match primary.as_str() {
            "ru" => Language::Ru,
            "uk" => Language::Uk,
            _ => Language::En,
        }
    }

    fn index(self) -> usize {
        match self {
            Language::En => 0,
            Language::Ru => 1,
            Language::Uk => 2,
        }
    }
}

/// (key, [en, ru, uk])
static TRANSLATIONS: &[(&str, [&str; 3])] = &[
    ("status_thinking", ["Thinking...", "Думаю...", "Думаю..."]),
    ("status_searching", ["Searching web...", "Ищу в интернете...", "Шукаю в інтернеті..."]),
    ("status_reading", ["Reading webpage...", "Читаю страницу...", "Читаю сторінку..."]),
    ("status_tool", ["Using {tool}...", "Использую {tool}...", "Використовую {tool}..."]),
    (
        "error_apology",
        [
            "Sorry, an error occurred.",
            "Извините, произошла ошибка.",
            "Вибачте, сталася помилка.",
        ],
    ),
    (
        "no_response",
        [
            "No response generated.",
            "Ответ не был сгенерирован.",
            "Відповідь не було згенеровано.",
        ],
    ),
];

/// Read-only phrase table. Build once and pass by reference.
#[derive(Debug, Clone)]
pub struct Localizer {
    table: HashMap<&'static str, [&'static str; 3]>,
}

impl Localizer {
    pub fn new() -> Self {
        Self {
            table: TRANSLATIONS.iter().copied().collect(),
        }
    }

    /// Look up `key` in `lang`, falling back to English, then to the key itself.
    pub fn text<'a>(&'a self, key: &'a str, lang: Language) -> &'a str {
        match self.table.get(key) {
            Some(row) => {
                let text = row[lang.index()];
                if text.is_empty() {
                    row[Language::En.index()]
                } else {
                    text
                }
            }
            None => key,
        }
    }

    /// Look up `key` and substitute `{name}` placeholders.
    pub fn format(&self, key: &str, lang: Language, args: &[(&str, &str)]) -> String {
        let mut text = self.text(key, lang).to_string();
        for (name, value) in args {
            text = text.replace(&format!("{{{}}}", name), value);
        }
        text
    }
}

impl Default for Localizer {
    fn default() -> Self {
        Self::new()
    }
}
