/// Maximum number of characters in a citation snippet.
pub const DEFAULT_SNIPPET_MAX_CHARS: usize = 400;

/// Split text into lowercase alphanumeric word tokens.
pub fn word_tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Bound a passage for display: keep the first `max_chars` characters and
/// turn line breaks into spaces so each citation stays on one line.
///
/// # Examples
///
/// ```
/// use docrag::text_util::snippet;
///
/// assert_eq!(snippet("one\ntwo\r\nthree", 100), "one two  three");
/// assert_eq!(snippet("abcdef", 3), "abc");
/// ```
pub fn snippet(text: &str, max_chars: usize) -> String {
    text.chars()
        .take(max_chars)
        .map(|c| if matches!(c, '\n' | '\r') { ' ' } else { c })
        .collect()
}
