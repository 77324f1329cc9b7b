use std::borrow::Cow;

/// Longest prefix of `s` that is at most `max_bytes` long and ends on a char
/// boundary.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Truncate to `max_bytes`, appending a marker that records the cut.
pub fn truncate_with_marker(s: &str, max_bytes: usize) -> Cow<'_, str> {
    if s.len() <= max_bytes {
        return Cow::Borrowed(s);
    }
    let kept = truncate_str(s, max_bytes);
    Cow::Owned(format!(
        "{kept}\n[truncated: {} bytes -> {} bytes]",
        s.len(),
        kept.len()
    ))
}
