//! Label name sanitization.

/// Make a label name safe for the provider.
///
/// Characters outside ASCII letters, whitespace, `_` and `-` become spaces;
/// whitespace runs collapse to one space; the result is trimmed.
pub fn sanitize_label(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphabetic() || c.is_whitespace() || c == '_' || c == '-' {
                c
            } else {
                ' '
            }
        })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}
