// text_prep.rs - Text preparation for embedding generation.
//
// Only subject and body feed the vector; sender, timestamp and id never do, so
// the same message text forwarded by a different sender still lands near its original.

use crate::config;

/// Prepare embedding text for a mail item: `"{subject} {body}"`.
///
/// The combined text is cut to a word budget so that word-piece tokenization
/// stays within the model's context window. An empty subject and body yield "".
pub fn prepare_item_text(subject: &str, body: &str) -> String {
    let subject = subject.trim();
    let body = body.trim();

    let combined = if body.is_empty() {
        subject.to_string()
    } else if subject.is_empty() {
        body.to_string()
    } else {
        format!("{subject} {body}")
    };

    truncate_words(&combined, config::embedding::MAX_INPUT_WORDS)
}

/// Truncate text to at most `max_words` words, preserving the original spacing.
///
/// A word is a maximal run of non-whitespace, so blank lines and runs of spaces
/// cost nothing against the budget.
fn truncate_words(text: &str, max_words: usize) -> String {
    let mut words = 0;
    let mut in_word = false;

    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            in_word = false;
        } else if !in_word {
            if words == max_words {
                return text[..i].trim().to_string();
            }
            words += 1;
            in_word = true;
        }
    }

    text.trim().to_string()
}
