//! Heuristic token estimation for context-window accounting.
//!
//! The weights mirror what chat-completions tokenizers produce in practice:
//! CJK characters count 1.5 each, each run of ASCII word characters counts
//! 1.3, everything else 0.5. The total is rounded up.

use crate::Message;

/// Estimate the token count of a single string.
pub fn estimate_tokens(content: &str) -> u64 {
    let mut total = 0.0f64;
    let mut in_word = false;
    for ch in content.chars() {
        if is_cjk(ch) {
            total += 1.5;
            in_word = false;
        } else if ch.is_ascii_alphanumeric() || ch == '_' {
            if !in_word {
                total += 1.3;
                in_word = true;
            }
        } else {
            total += 0.5;
            in_word = false;
        }
    }
    total.ceil() as u64
}

/// Estimate the token count of a whole transcript.
pub fn estimate_transcript_tokens(messages: &[Message]) -> u64 {
    messages
        .iter()
        .map(|message| estimate_tokens(&message.content))
        .sum()
}

fn is_cjk(ch: char) -> bool {
    matches!(ch,
        '\u{4E00}'..='\u{9FFF}'        // CJK unified ideographs
        | '\u{3400}'..='\u{4DBF}'      // extension A
        | '\u{3040}'..='\u{30FF}'      // hiragana + katakana
        | '\u{AC00}'..='\u{D7AF}'      // hangul syllables
        | '\u{F900}'..='\u{FAFF}'      // compatibility ideographs
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn words_count_per_run_not_per_char() {
        // Two words + one space: 1.3 + 0.5 + 1.3 = 3.1 → 4.
        assert_eq!(estimate_tokens("hello world"), 4);
    }

    #[test]
    fn cjk_counts_per_character() {
        // 2 * 1.5 = 3.
        assert_eq!(estimate_tokens("你好"), 3);
    }

    #[test]
    fn transcript_sums_messages() {
        let messages = vec![Message::system("abc"), Message::user("def")];
        assert_eq!(
            estimate_transcript_tokens(&messages),
            estimate_tokens("abc") + estimate_tokens("def")
        );
    }

    proptest! {
        #[test]
        fn appending_content_never_decreases_estimate(
            base in ".{0,64}",
            suffix in ".{0,64}",
        ) {
            let combined = format!("{base}{suffix}");
            prop_assert!(estimate_tokens(&combined) >= estimate_tokens(&base));
        }
    }
}
