// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Utility functions for metric configuration.

/// Parses and validates a metric name.
///
/// A valid name must:
/// - Start with an ASCII letter
/// - Contain only ASCII alphanumerics, underscores, or periods
///
/// Whitespace is trimmed from the input. Callers turn `None` into a
/// configuration error; the reason is logged here.
///
/// # Examples
///
/// ```
/// use statshouse::util::parse_metric_name;
///
/// assert_eq!(parse_metric_name("api_latency"), Some("api_latency".to_string()));
/// assert_eq!(parse_metric_name("nginx.requests"), Some("nginx.requests".to_string()));
/// assert_eq!(parse_metric_name("1invalid"), None);
/// assert_eq!(parse_metric_name("api-latency"), None);
/// ```
pub fn parse_metric_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    let mut chars = trimmed.chars();

    let first_char = chars.next()?;
    if !first_char.is_ascii_alphabetic() {
        tracing::warn!(
            "Metric name must start with a letter, got: '{}'. Rejecting configuration.",
            trimmed
        );
        return None;
    }

    if let Some(invalid_char) =
        chars.find(|&ch| !ch.is_ascii_alphanumeric() && ch != '_' && ch != '.')
    {
        tracing::warn!(
            "Metric name contains invalid character '{}' in '{}'. Only ASCII alphanumerics, underscores, and periods are allowed. Rejecting configuration.",
            invalid_char, trimmed
        );
        return None;
    }

    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_parse_metric_name_valid() {
        assert_eq!(parse_metric_name("requests"), Some("requests".to_string()));
        assert_eq!(parse_metric_name("api_latency"), Some("api_latency".to_string()));
        assert_eq!(parse_metric_name("nginx.bytes_sent"), Some("nginx.bytes_sent".to_string()));
        assert_eq!(parse_metric_name("Upstream2"), Some("Upstream2".to_string()));
    }

    #[test]
    fn test_parse_metric_name_with_whitespace() {
        assert_eq!(parse_metric_name("  requests  "), Some("requests".to_string()));
        assert_eq!(parse_metric_name("\trequests\n"), Some("requests".to_string()));
    }

    #[test]
    fn test_parse_metric_name_empty() {
        assert_eq!(parse_metric_name(""), None);
        assert_eq!(parse_metric_name("   "), None);
    }

    #[test]
    fn test_parse_metric_name_invalid() {
        assert_eq!(parse_metric_name("1requests"), None);
        assert_eq!(parse_metric_name("_requests"), None);
        assert_eq!(parse_metric_name("api-latency"), None);
        assert_eq!(parse_metric_name("api latency"), None);
        assert_eq!(parse_metric_name("api$latency"), None);
    }

    #[test]
    #[traced_test]
    fn test_parse_metric_name_logs_rejection() {
        assert_eq!(parse_metric_name("api-latency"), None);
        assert!(logs_contain("invalid character '-' in 'api-latency'"));
        assert!(logs_contain("Rejecting configuration."));
        assert!(!logs_contain("Ignoring metric"));
    }
}
