//! Field access for the `*KEY*value*` encoding used in formatted lines.

/// Value of `key` in a `*KEY*value*` block, `None` when absent or empty.
///
/// A key only matches at the start of a field: right after `*`, after the
/// `###` marker of a message block, or at the start of the text.
pub fn extract_field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("{}*", key);
    for (pos, _) in line.match_indices(&pattern) {
        let starts_field = pos == 0 || matches!(line.as_bytes()[pos - 1], b'*' | b'#');
        if !starts_field {
            continue;
        }
        let rest = &line[pos + pattern.len()..];
        let value = match rest.find('*') {
            Some(end) => &rest[..end],
            None => rest,
        };
        return if value.is_empty() { None } else { Some(value) };
    }
    None
}
