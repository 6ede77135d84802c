//! Content quality gate applied to every incoming channel post.
use once_cell::sync::Lazy;
use regex::Regex;

static BARE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://\S+$").expect("valid bare URL regex"));

/// Pure predicate deciding whether a raw message is worth persisting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityFilter {
    min_length: usize,
    min_letter_ratio: f64,
}

impl Default for QualityFilter {
    fn default() -> Self {
        Self::new(Self::MIN_LENGTH, Self::MIN_LETTER_RATIO)
    }
}

impl QualityFilter {
    /// Minimum number of characters for meaningful content.
    pub const MIN_LENGTH: usize = 50;
    /// Minimum share of Latin/Cyrillic letters among non-whitespace characters.
    pub const MIN_LETTER_RATIO: f64 = 0.6;

    pub fn new(min_length: usize, min_letter_ratio: f64) -> Self {
        Self {
            min_length,
            min_letter_ratio,
        }
    }

    pub fn accept(&self, raw: &str) -> bool {
        let text = raw.trim();
        if text.is_empty() {
            return false;
        }
        if text.chars().count() < self.min_length {
            return false;
        }
        if BARE_URL.is_match(text) {
            return false;
        }
        if text.chars().all(is_emoji) {
            return false;
        }

        let mut letters = 0usize;
        let mut visible = 0usize;
        for c in text.chars().filter(|c| !c.is_whitespace()) {
            visible += 1;
            if is_letter(c) {
                letters += 1;
            }
        }
        (letters as f64) >= (visible as f64) * self.min_letter_ratio
    }
}

/// Latin ASCII letters plus the whole Cyrillic block (covers Russian and Uzbek Cyrillic).
fn is_letter(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c, '\u{0400}'..='\u{04FF}')
}

fn is_emoji(c: char) -> bool {
    matches!(c,
        '\u{1F600}'..='\u{1F64F}'
        | '\u{1F300}'..='\u{1F5FF}'
        | '\u{1F680}'..='\u{1F6FF}'
        | '\u{1F900}'..='\u{1F9FF}'
        | '\u{1F1E0}'..='\u{1F1FF}'
        | '\u{2600}'..='\u{26FF}'
        | '\u{2700}'..='\u{27BF}'
        // variation selector and zero-width joiner glue multi-codepoint emoji
        | '\u{FE0F}'
        | '\u{200D}'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept(text: &str) -> bool {
        QualityFilter::default().accept(text)
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert!(!accept(""));
        assert!(!accept("   \n\t  "));
    }

    #[test]
    fn rejects_short_text() {
        assert!(!accept("ok"));
        assert!(!accept(&"a".repeat(49)));
        assert!(accept(&"a".repeat(50)));
    }

    #[test]
    fn length_ignores_surrounding_whitespace() {
        let padded = format!("   {}   ", "b".repeat(48));
        assert!(!accept(&padded));
    }

    #[test]
    fn accepts_plain_letters() {
        assert!(accept(&"A".repeat(60)));
        assert!(accept(
            "Rust 1.80 ships LazyCell and LazyLock in the standard library for everyone"
        ));
    }

    #[test]
    fn rejects_bare_url() {
        assert!(!accept("https://example.com/x"));
        let long = format!("https://example.com/{}", "segment".repeat(10));
        assert!(!accept(&long));
        assert!(!accept(&format!("  {}  ", long)));
    }

    #[test]
    fn url_inside_prose_is_fine() {
        assert!(accept(
            "Read the full release announcement about the new compiler here https://x.io"
        ));
    }

    #[test]
    fn rejects_emoji_only() {
        assert!(!accept("🎉🎉🎉🎉🎉"));
        assert!(!accept(&"🎉".repeat(60)));
        assert!(!accept(&"❤️".repeat(40)));
        assert!(!accept(&"😀🚀🌍".repeat(20)));
    }

    #[test]
    fn rejects_number_and_symbol_spam() {
        assert!(!accept(&"1234567890".repeat(6)));
        assert!(!accept("$$$ 100% 200% 300% !!! ### 555 666 777 888 999 000 111 222 %%%"));
        // 30 letters vs 30 digits: 50% < 60%
        assert!(!accept(&format!("{}{}", "a".repeat(30), "1".repeat(30))));
    }

    #[test]
    fn ratio_boundary_is_inclusive() {
        // 36 letters vs 24 digits: exactly 60%
        assert!(accept(&format!("{}{}", "a".repeat(36), "1".repeat(24))));
        assert!(!accept(&format!("{}{}", "a".repeat(35), "1".repeat(25))));
    }

    #[test]
    fn whitespace_is_not_counted_in_ratio() {
        let spaced = "a 1 ".repeat(10) + &"word ".repeat(10);
        assert!(accept(&spaced));
    }

    #[test]
    fn accepts_cyrillic_text() {
        assert!(accept(
            "Сегодня вышла новая версия компилятора с улучшенной диагностикой ошибок"
        ));
        assert!(accept(
            "Янги қўлланма ўзбек тилида чиқди, унда ғоялар ва ҳаётий мисоллар кўп"
        ));
    }

    #[test]
    fn letters_outside_latin_and_cyrillic_do_not_count() {
        assert!(!accept(&"日本語のテキスト".repeat(8)));
    }

    #[test]
    fn custom_thresholds_apply() {
        let lenient = QualityFilter::new(5, 0.0);
        assert!(lenient.accept("12345 67890"));
        assert!(!lenient.accept("1234"));

        let strict = QualityFilter::new(10, 1.0);
        assert!(strict.accept("abcdefghij"));
        assert!(!strict.accept("abcdefghi."));
    }
}
