//! Shared utility functions used across the codebase.

/// Return at most `max_chars` characters of `s`, never splitting a char.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Return the last `max_chars` characters of `s`.
pub fn tail_chars(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    match s.char_indices().nth(count - max_chars) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Turn subprocess output into text safe to log or submit.
///
/// Mostly-binary output is replaced by a short description; otherwise invalid
/// UTF-8 is replaced and control characters other than newlines and tabs are
/// dropped.
pub fn sanitize_output(bytes: &[u8]) -> String {
    let non_printable_count = bytes
        .iter()
        .filter(|&&b| b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t')
        .count();

    if bytes.len() > 100 && non_printable_count > bytes.len() / 10 {
        return format!(
            "[Binary output - {} bytes, {}% non-printable]",
            bytes.len(),
            non_printable_count * 100 / bytes.len()
        );
    }

    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|&c| c == '\n' || c == '\r' || c == '\t' || (c >= ' ' && c != '\u{FFFD}'))
        .collect()
}
