//! Letters-only line tokenizer.
//!
//! A line is lowercased with ASCII semantics and split on every maximal run
//! of characters outside `[a-z]`. Anything that is not an ASCII letter,
//! including accented and other non-ASCII letters, acts as a separator.

/// Split one line of text into lowercase `[a-z]+` tokens.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for_each_word(line, |w| tokens.push(w.to_string()));
    tokens
}

/// Borrowing variant of [`tokenize`]; yields slices of a lowercased copy.
pub(crate) fn for_each_word(line: &str, mut f: impl FnMut(&str)) {
    let lowered = line.to_ascii_lowercase();
    for word in words(&lowered) {
        f(word);
    }
}

fn words(lowered: &str) -> impl Iterator<Item = &str> {
    lowered
        .split(|c: char| !c.is_ascii_lowercase())
        .filter(|w| !w.is_empty())
}
