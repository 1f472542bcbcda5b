//! Backslash-escape aware splitting for search queries.
//!
//! A backslash escapes the character that follows it (including the
//! separator and another backslash). Escapes survive splitting untouched so
//! that a later [`unescape`] sees them; only `unescape` drops backslashes.

/// Split `query` into whitespace-separated tokens, honouring escapes.
///
/// An empty query yields no tokens.
pub fn tokenize(query: &str) -> Vec<String> {
    if query.is_empty() {
        return Vec::new();
    }
    split_escaped(query, ' ', None)
}

/// Split on unescaped `separator`, producing at most `max_parts` parts when
/// given (the final part keeps any remaining separators).
pub fn split_escaped(query: &str, separator: char, max_parts: Option<usize>) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut token = String::new();
    let mut chars = query.chars();
    while let Some(c) = chars.next() {
        let may_split = max_parts.is_none_or(|max| tokens.len() + 1 < max);
        if c == separator && may_split {
            tokens.push(std::mem::take(&mut token));
        } else if c == '\\' {
            token.push(c);
            if let Some(escaped) = chars.next() {
                token.push(escaped);
            }
        } else {
            token.push(c);
        }
    }
    tokens.push(token);
    tokens
}

/// Whether `query` contains `needle` outside of an escape sequence.
pub fn contains_unescaped(query: &str, needle: char) -> bool {
    let mut chars = query.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if chars.next().is_none() {
                return needle == '\\';
            }
        } else if c == needle {
            return true;
        }
    }
    false
}

/// Drop every escaping backslash, keeping the escaped character literally.
/// A trailing lone backslash is dropped.
pub fn unescape(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut chars = query.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}
