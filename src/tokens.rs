//! Token-budget truncation for text handed to the AI collaborators.

use std::borrow::Cow;
use std::sync::OnceLock;
use tiktoken_rs::{CoreBPE, cl100k_base};

/// Token budget applied to article bodies sent for summarization.
pub const SUMMARY_INPUT_TOKENS: usize = 3_000;
/// Token budget applied to text sent for embedding.
pub const EMBEDDING_INPUT_TOKENS: usize = 2_000;

fn encoding() -> Option<&'static CoreBPE> {
    static ENCODING: OnceLock<Option<CoreBPE>> = OnceLock::new();
    ENCODING
        .get_or_init(|| match cl100k_base() {
            Ok(encoding) => Some(encoding),
            Err(error) => {
                tracing::warn!(error = %error, "Tokenizer unavailable; truncating by words");
                None
            }
        })
        .as_ref()
}

/// Truncate `text` to at most `max_tokens` tokens, borrowing when it already fits.
///
/// Falls back to whitespace-delimited words when the BPE tables cannot be loaded.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> Cow<'_, str> {
    match encoding() {
        Some(encoding) => truncate_with_bpe(encoding, text, max_tokens),
        None => truncate_words(text, max_tokens),
    }
}

fn truncate_with_bpe<'a>(encoding: &CoreBPE, text: &'a str, max_tokens: usize) -> Cow<'a, str> {
    let tokens = encoding.encode_ordinary(text);
    if tokens.len() <= max_tokens {
        return Cow::Borrowed(text);
    }
    match encoding.decode(tokens[..max_tokens].to_vec()) {
        Ok(decoded) => Cow::Owned(decoded),
        // A cut through a multi-byte sequence fails to decode; words are a safe fallback.
        Err(_) => truncate_words(text, max_tokens),
    }
}

fn truncate_words(text: &str, max_words: usize) -> Cow<'_, str> {
    if text.split_whitespace().count() <= max_words {
        return Cow::Borrowed(text);
    }
    Cow::Owned(
        text.split_whitespace()
            .take(max_words)
            .collect::<Vec<_>>()
            .join(" "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_borrowed() {
        let text = "A short article.";
        assert!(matches!(truncate_to_tokens(text, 100), Cow::Borrowed(_)));
    }

    #[test]
    fn long_text_is_cut_to_budget() {
        let text = "word ".repeat(500);
        let truncated = truncate_to_tokens(&text, 50);
        assert!(truncated.len() < text.len());
        if let Some(encoding) = encoding() {
            assert!(encoding.encode_ordinary(&truncated).len() <= 50);
        }
    }

    #[test]
    fn word_fallback_keeps_leading_words() {
        assert_eq!(truncate_words("one two three four", 2), "one two");
        assert!(matches!(truncate_words("one two", 5), Cow::Borrowed(_)));
    }
}
