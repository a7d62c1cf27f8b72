//! Text normalization applied before embedding.

use tracing::debug;
use unicode_normalization::UnicodeNormalization;

/// Normalize raw text for embedding.
///
/// Applies Unicode NFKC canonicalization, collapses runs of whitespace to a
/// single space, trims both ends, and truncates to at most `max_chars`
/// characters. Truncation is silent for the caller but logged.
///
/// Empty input normalizes to the empty string. The transformation is
/// deterministic and idempotent.
pub fn normalize(text: &str, max_chars: usize) -> String {
    let folded: String = text.nfkc().collect();

    let mut collapsed = String::with_capacity(folded.len());
    for word in folded.split_whitespace() {
        if !collapsed.is_empty() {
            collapsed.push(' ');
        }
        collapsed.push_str(word);
    }

    let total = collapsed.chars().count();
    if total <= max_chars {
        return collapsed;
    }

    let truncated: String = collapsed.chars().take(max_chars).collect();
    debug!(
        kept = max_chars,
        dropped = total - max_chars,
        "truncated text before embedding"
    );
    // The cut can land right after a space; trim again so a second pass
    // over the output is a no-op.
    truncated.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn collapses_whitespace_and_trims() {
        assert_eq!(normalize("  hello   world \t\n again ", 100), "hello world again");
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert_eq!(normalize("", 100), "");
        assert_eq!(normalize("   \t\n  ", 100), "");
    }

    #[test]
    fn applies_nfkc_folding() {
        // U+FB01 LATIN SMALL LIGATURE FI decomposes to "fi" under NFKC.
        assert_eq!(normalize("ﬁle", 100), "file");
        // Fullwidth forms fold to ASCII.
        assert_eq!(normalize("Ｈｅｌｌｏ", 100), "Hello");
    }

    #[test]
    fn truncates_to_char_budget() {
        let text = "abcdefghij";
        assert_eq!(normalize(text, 4), "abcd");
        assert!(normalize(text, 4).chars().count() <= 4);
    }

    #[test]
    fn truncation_is_char_boundary_safe() {
        let text = "héllo wörld";
        let out = normalize(text, 7);
        assert!(out.chars().count() <= 7);
        assert_eq!(out, "héllo w");
    }

    #[test]
    fn truncation_never_leaves_trailing_space() {
        // Cutting "ab cd" at 3 chars lands on the space.
        assert_eq!(normalize("ab cd", 3), "ab");
    }

    #[test]
    fn idempotent_without_truncation() {
        let inputs = ["hello world", "  ﬁx   this  ", "Ｈｅｌｌｏ  there"];
        for input in inputs {
            let once = normalize(input, 100);
            let twice = normalize(&once, 100);
            assert_eq!(once, twice, "normalize should be idempotent for {input:?}");
        }
    }

    #[test]
    fn idempotent_with_truncation() {
        let input = "word ".repeat(40);
        let once = normalize(&input, 17);
        let twice = normalize(&once, 17);
        assert_eq!(once, twice);
    }

    #[test]
    fn output_length_bounded_for_all_inputs() {
        let inputs = ["", "a", "  spaced   out  ", "日本語のテキストをここに置く"];
        for input in inputs {
            for limit in [0usize, 1, 5, 100] {
                assert!(normalize(input, limit).chars().count() <= limit);
            }
        }
    }
}
