//! Common utility functions used across the codebase.

/// Truncates a string to at most `max_chars` characters, adding "..." if truncated.
///
/// UTF-8 safe: counts characters, not bytes, so multi-byte text (CJK, emoji)
/// never splits mid-character.
///
/// # Examples
/// ```
/// use rapport::utils::truncate_str;
///
/// assert_eq!(truncate_str("hello", 10), "hello");
/// assert_eq!(truncate_str("hello world", 8), "hello...");
/// ```
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    const SUFFIX: &str = "...";

    if s.len() <= max_chars {
        return s.to_string();
    }
    let char_count = s.chars().count();
    if char_count <= max_chars {
        return s.to_string();
    }

    let suffix_len = SUFFIX.chars().count();
    if max_chars <= suffix_len {
        return SUFFIX.chars().take(max_chars).collect();
    }

    let truncated: String = s.chars().take(max_chars - suffix_len).collect();
    format!("{}{}", truncated, SUFFIX)
}

/// Keeps the last `max_chars` characters, prefixing "..." when anything was cut.
pub fn truncate_head(s: &str, max_chars: usize) -> String {
    const PREFIX: &str = "...";

    let char_count = s.chars().count();
    if char_count <= max_chars {
        return s.to_string();
    }
    let prefix_len = PREFIX.chars().count();
    if max_chars <= prefix_len {
        return PREFIX.chars().take(max_chars).collect();
    }

    let keep = max_chars - prefix_len;
    let tail: String = s.chars().skip(char_count - keep).collect();
    format!("{}{}", PREFIX, tail)
}

/// Substitute `{name}` placeholders in one left-to-right pass. Substituted
/// values are never rescanned. Unknown placeholders are left as-is.
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let name = &after[..close];
            values
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| (*v, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Current wall-clock time as fractional unix seconds.
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
