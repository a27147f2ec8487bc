//! Secret handling and log redaction.
//!
//! Wraps process secrets so they never leak into `Debug` output or log
//! lines, and provides a redaction helper for scrubbing token-shaped
//! substrings out of arbitrary strings before they reach `tracing`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A secret value that redacts itself in `Debug` and `Display`.
///
/// Holds the real value so callers can still use it to authenticate, but
/// nothing route through `{:?}` or `{}` ever prints more than a short
/// prefix.
#[derive(Clone, Serialize, Deserialize)]
pub struct Secret<T>(T);

impl<T> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: AsRef<str>> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({})", redact_value(self.0.as_ref()))
    }
}

impl<T: AsRef<str>> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", redact_value(self.0.as_ref()))
    }
}

/// Redacts a single secret value down to a short, identifiable prefix.
///
/// Short values (8 characters or fewer) are fully masked since a partial
/// prefix would leak most of the secret.
#[must_use]
pub fn redact_value(value: &str) -> String {
    if value.len() <= 8 {
        "*".repeat(value.len().max(4))
    } else {
        format!("{}...<redacted>", &value[..4])
    }
}

/// Scrubs known secret substrings out of an arbitrary log line.
///
/// Used as a last line of defense on strings assembled from subprocess
/// output or HTTP error bodies, which may otherwise echo a token back
/// into a log line verbatim.
#[must_use]
pub fn redact_in_text(text: &str, secrets: &[&str]) -> String {
    let mut scrubbed = text.to_string();
    for secret in secrets {
        if secret.is_empty() {
            continue;
        }
        let replacement = redact_value(secret);
        scrubbed = scrubbed.replace(secret, &replacement);
    }
    scrubbed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_does_not_print_full_secret() {
        let secret = Secret::new("sk-live-abcdefghijklmnop".to_string());
        let rendered = format!("{secret:?}");
        assert!(!rendered.contains("abcdefghijklmnop"));
        assert!(rendered.starts_with("Secret(sk-l"));
    }

    #[test]
    fn short_values_are_fully_masked() {
        assert_eq!(redact_value("abc"), "****");
    }

    #[test]
    fn redact_in_text_scrubs_all_occurrences() {
        let text = "token=sk-test-123456789 used twice: sk-test-123456789";
        let scrubbed = redact_in_text(text, &["sk-test-123456789"]);
        assert!(!scrubbed.contains("sk-test-123456789"));
        assert_eq!(scrubbed.matches("<redacted>").count(), 2);
    }
}
