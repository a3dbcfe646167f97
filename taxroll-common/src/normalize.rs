//! Name normalization for matching and dedupe keys
//!
//! Every dedupe lookup and every ranking signal goes through this one
//! canonical form, so transcription quirks ("O'Neal,", "o neal") collapse to
//! the same key.

/// Canonicalize free-text person/place names.
///
/// Lowercases, replaces every character outside `[a-z0-9 ]` with a space,
/// collapses whitespace runs, and trims. Total function: empty input yields
/// an empty string. Idempotent.
pub fn normalize(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_space = false;

    for ch in value.chars() {
        let ch = ch.to_ascii_lowercase();
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(ch);
        } else {
            // Everything else (punctuation, unicode, whitespace) acts as a
            // separator; runs collapse to a single space.
            pending_space = true;
        }
    }

    out
}
