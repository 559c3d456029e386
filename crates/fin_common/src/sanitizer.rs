//! Redaction of credentials and personal data before remote error bodies hit the logs

use regex::Regex;
use std::sync::OnceLock;

static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();

fn patterns() -> &'static [(Regex, &'static str)] {
    PATTERNS.get_or_init(|| {
        let table: [(&str, &'static str); 4] = [
            (r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}", "***@***.***"),
            // JWTs (session tokens, anon keys)
            (r"eyJ[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+", "***jwt***"),
            (r"(?i)(bearer\s+)[a-zA-Z0-9._-]+", "${1}***"),
            (r#"(?i)(apikey["']?\s*[:=]\s*["']?)[a-zA-Z0-9._-]+"#, "${1}***"),
        ];
        table
            .iter()
            .filter_map(|(pattern, replacement)| match Regex::new(pattern) {
                Ok(re) => Some((re, *replacement)),
                Err(e) => {
                    tracing::error!("Invalid sanitizer pattern {}: {}", pattern, e);
                    None
                }
            })
            .collect()
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogSanitizer;

impl LogSanitizer {
    pub fn new() -> Self {
        Self
    }

    pub fn sanitize(&self, message: &str) -> String {
        let mut result = message.to_string();
        for (pattern, replacement) in patterns() {
            result = pattern.replace_all(&result, *replacement).into_owned();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_redaction() {
        let sanitizer = LogSanitizer::new();
        assert_eq!(
            sanitizer.sanitize("duplicate key for maria@example.com"),
            "duplicate key for ***@***.***"
        );
    }

    #[test]
    fn test_bearer_redaction() {
        let sanitizer = LogSanitizer::new();
        let sanitized = sanitizer.sanitize("Authorization: Bearer abc.def-123");
        assert_eq!(sanitized, "Authorization: Bearer ***");
    }

    #[test]
    fn test_jwt_redaction() {
        let sanitizer = LogSanitizer::new();
        let sanitized = sanitizer.sanitize("token eyJhbGciOi.eyJzdWIiOi.c2lnbmF0dXJl expired");
        assert_eq!(sanitized, "token ***jwt*** expired");
    }

    #[test]
    fn test_apikey_redaction() {
        let sanitizer = LogSanitizer::new();
        let sanitized = sanitizer.sanitize(r#"{"apikey": "secret-value"}"#);
        assert_eq!(sanitized, r#"{"apikey": "***"}"#);
    }
}
