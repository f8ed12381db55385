//! Helpers that shorten secret material before it reaches a log line.

/// Number of leading characters kept by [`truncate`].
const KEEP: usize = 7;

/// Keep the first few characters of `value` and append `...`.
///
/// Values no longer than the kept prefix are returned unchanged.
pub fn truncate(value: &str) -> String {
    match value.char_indices().nth(KEEP) {
        Some((idx, _)) => format!("{}...", &value[..idx]),
        None => value.to_string(),
    }
}

/// Truncate the value of `param=` inside a header such as `Authorization`.
///
/// The parameter name is matched case-insensitively and the value runs to
/// the next `,` or the end of the header.
pub fn truncate_param(header: &str, param: &str) -> String {
    let needle = format!("{}=", param.to_ascii_lowercase());
    let lower = header.to_ascii_lowercase();
    let Some(pos) = lower.find(&needle) else {
        return header.to_string();
    };
    let value_start = pos + needle.len();
    let value_end = header[value_start..]
        .find(',')
        .map(|i| value_start + i)
        .unwrap_or(header.len());

    format!(
        "{}{}{}",
        &header[..value_start],
        truncate(&header[value_start..value_end]),
        &header[value_end..]
    )
}

/// Truncate only the final line of a multi-line value.
///
/// Canonical requests and strings-to-sign end with a digest; the rest is
/// safe to log.
pub fn truncate_last_line(value: &str) -> String {
    match value.rsplit_once('\n') {
        Some((head, last)) => format!("{head}\n{}", truncate(last)),
        None => truncate(value),
    }
}

/// Render a secret for configuration dumps.
pub fn redact_secret(value: &str) -> &'static str {
    if value.is_empty() {
        "[EMPTY]"
    } else {
        "[REDACTED]"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("00915d97a7d46e3f"), "00915d9...");
        assert_eq!(truncate("short"), "short");
        assert_eq!(truncate("1234567"), "1234567");
    }

    #[test]
    fn test_truncate_param() {
        let original = "Data Tags=dogs;cats;bats, Sensitive=00915d97a7d46e3fbbe81580eb632d69";
        assert_eq!(
            truncate_param(original, "sensitive"),
            "Data Tags=dogs;cats;bats, Sensitive=00915d9..."
        );
    }

    #[test]
    fn test_truncate_param_middle_of_header() {
        let header = "AWS4-HMAC-SHA256 Signature=abcdef0123456789, SignedHeaders=host";
        assert_eq!(
            truncate_param(header, "Signature"),
            "AWS4-HMAC-SHA256 Signature=abcdef0..., SignedHeaders=host"
        );
    }

    #[test]
    fn test_truncate_param_absent() {
        assert_eq!(truncate_param("Credential=x", "Signature"), "Credential=x");
    }

    #[test]
    fn test_truncate_last_line() {
        assert_eq!(truncate_last_line("GET\n/\nabcdef0123"), "GET\n/\nabcdef0...");
    }

    #[test]
    fn test_redact_secret() {
        assert_eq!(redact_secret(""), "[EMPTY]");
        assert_eq!(redact_secret("admin"), "[REDACTED]");
    }
}
