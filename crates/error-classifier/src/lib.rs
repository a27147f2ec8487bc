//! Build log classification.
//!
//! Pure, side-effect-free parsing of a raw CI build log into a list of
//! typed errors. No I/O: callers fetch the log text themselves and hand
//! it to [`classify`].

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// The specific condition behind a [`ErrorKind::FrameworkContextError`],
/// mirroring the handful of Spring dependency-injection failures this
/// system knows how to reason about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameworkContextErrorKind {
    NoSuchBean,
    AmbiguousBean,
    CircularDependency,
    MissingAnnotation,
}

/// The five error kinds a build log line can be classified into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Compilation,
    Dependency,
    /// A Spring application-context failure, carrying the sub-kind and the
    /// offending bean/component identity so the ranker and prompt builder
    /// can point straight at the class responsible.
    FrameworkContextError { kind: FrameworkContextErrorKind, identity: String },
    TestFailure,
    Unknown,
}

/// A single classified error extracted from a build log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    /// Source file path, when the matching pattern captured one.
    pub file: Option<String>,
    /// Line number within `file`, when the matching pattern captured one.
    pub line: Option<u32>,
    /// Short human-readable message (the matched line, trimmed).
    pub message: String,
    /// Up to a few lines of surrounding context for prompt-building.
    pub excerpt: String,
}

struct Pattern {
    kind: ErrorKind,
    regex: Regex,
    file_group: Option<usize>,
    line_group: Option<usize>,
}

static PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    vec![
        // javac: "[ERROR] /path/Foo.java:[12,34] error: cannot find symbol"
        Pattern {
            kind: ErrorKind::Compilation,
            regex: Regex::new(r"(?m)^\[ERROR\]\s+(?P<file>[^\s:]+\.java):\[(?P<line>\d+),\d+\]\s+(?:error:)?\s*(?P<msg>.+)$").unwrap(),
            file_group: Some(1),
            line_group: Some(2),
        },
        // Gradle: "Foo.java:12: error: incompatible types"
        Pattern {
            kind: ErrorKind::Compilation,
            regex: Regex::new(r"(?m)^(?P<file>[\w./-]+\.java):(?P<line>\d+):\s*error:\s*(?P<msg>.+)$").unwrap(),
            file_group: Some(1),
            line_group: Some(2),
        },
        // Maven dependency resolution failures.
        Pattern {
            kind: ErrorKind::Dependency,
            regex: Regex::new(r"(?m)^.*(?:Could not resolve dependencies|Could not find artifact|Could not transfer artifact)(?P<msg>.*)$").unwrap(),
            file_group: None,
            line_group: None,
        },
        // Gradle dependency resolution failures.
        Pattern {
            kind: ErrorKind::Dependency,
            regex: Regex::new(r"(?m)^.*Could not resolve (?P<msg>.+)\.$").unwrap(),
            file_group: None,
            line_group: None,
        },
        // JUnit/Surefire/Gradle test failure summaries.
        Pattern {
            kind: ErrorKind::TestFailure,
            regex: Regex::new(r"(?m)^.*(?:Tests run: \d+, Failures: [1-9]\d*|FAILED\b.*Test)(?P<msg>.*)$").unwrap(),
            file_group: None,
            line_group: None,
        },
    ]
});

// Spring application-context failures carry a sub-kind and a bean/component
// identity, neither of which fits the flat `Pattern` table above, so they're
// matched and classified separately.
static FRAMEWORK_CONTEXT_TRIGGER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^.*(?:BeanCreationException|NoSuchBeanDefinitionException|NoUniqueBeanDefinitionException|BeanCurrentlyInCreationException|UnsatisfiedDependencyException|BeanDefinitionStoreException).*$",
    )
    .unwrap()
});

static BEAN_IDENTITY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"'(?P<type>[\w.$]+)'").unwrap());

/// Picks the sub-kind and bean/component identity out of one matched
/// framework-context log line.
///
/// `NoSuchBeanDefinitionException` is classified as [`FrameworkContextErrorKind::MissingAnnotation`]
/// rather than `NoSuchBean`: in this system's Java/Spring domain the
/// overwhelmingly common cause of "no qualifying bean" is a component that
/// exists on disk but lacks its stereotype annotation, which is exactly the
/// fix CODE_FIX is equipped to generate. `NoSuchBean` is reserved for the
/// rarer case where the log gives no indication a matching type exists at
/// all.
fn classify_framework_context(line: &str) -> (FrameworkContextErrorKind, String) {
    let kind = if line.contains("NoUniqueBeanDefinitionException") || line.contains("expected single matching bean") {
        FrameworkContextErrorKind::AmbiguousBean
    } else if line.contains("BeanCurrentlyInCreationException") || line.contains("circular") {
        FrameworkContextErrorKind::CircularDependency
    } else if line.contains("NoSuchBeanDefinitionException") || line.contains("No qualifying bean") {
        FrameworkContextErrorKind::MissingAnnotation
    } else {
        FrameworkContextErrorKind::NoSuchBean
    };

    let identity = BEAN_IDENTITY
        .captures(line)
        .and_then(|c| c.name("type"))
        .map(|m| simple_name(m.as_str()))
        .unwrap_or_else(|| "unknown".to_string());

    (kind, identity)
}

fn simple_name(fully_qualified: &str) -> String {
    fully_qualified.rsplit('.').next().unwrap_or(fully_qualified).to_string()
}

/// Maximum number of trailing lines of a build log the PLAN stage feeds to
/// [`classify`]. Keeps prompt size and classification cost bounded on logs
/// from long-running test suites.
pub const MAX_LOG_LINES: usize = 300;

/// Keeps only the last `max_lines` lines of `log`, dropping the oldest
/// ones first. A log at exactly `max_lines` is returned unchanged.
#[must_use]
pub fn window_log(log: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = log.lines().collect();
    if lines.len() <= max_lines {
        return log.to_string();
    }
    let start = lines.len() - max_lines;
    lines[start..].join("\n")
}

/// Classifies every recognizable error in `log`.
///
/// Lines that don't match a known pattern are not individually surfaced;
/// if nothing matches at all, a single [`ErrorKind::Unknown`] entry is
/// returned carrying the last portion of the log as its excerpt, so
/// downstream ranking always has at least one error to work from.
#[must_use]
pub fn classify(log: &str) -> Vec<ClassifiedError> {
    let mut found = Vec::new();

    for pattern in PATTERNS.iter() {
        for caps in pattern.regex.captures_iter(log) {
            let file = pattern
                .file_group
                .and_then(|g| caps.get(g))
                .map(|m| m.as_str().to_string());
            let line = pattern
                .line_group
                .and_then(|g| caps.get(g))
                .and_then(|m| m.as_str().parse().ok());
            let message = caps
                .name("msg")
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_else(|| caps.get(0).unwrap().as_str().trim().to_string());
            let matched = caps.get(0).unwrap();
            found.push(ClassifiedError {
                kind: pattern.kind.clone(),
                file,
                line,
                message,
                excerpt: excerpt_around(log, matched.start(), matched.end()),
            });
        }
    }

    for matched in FRAMEWORK_CONTEXT_TRIGGER.find_iter(log) {
        let line = matched.as_str();
        let (sub_kind, identity) = classify_framework_context(line);
        found.push(ClassifiedError {
            kind: ErrorKind::FrameworkContextError { kind: sub_kind, identity: identity.clone() },
            file: None,
            line: None,
            message: format!("{sub_kind:?}: {identity}"),
            excerpt: excerpt_around(log, matched.start(), matched.end()),
        });
    }

    if found.is_empty() {
        let tail = tail_lines(log, 20);
        found.push(ClassifiedError {
            kind: ErrorKind::Unknown,
            file: None,
            line: None,
            message: "no recognized error pattern in build log".to_string(),
            excerpt: tail,
        });
    }

    found
}

fn excerpt_around(log: &str, start: usize, end: usize) -> String {
    let before = log[..start].rfind('\n').map_or(0, |i| i + 1);
    let after = log[end..].find('\n').map_or(log.len(), |i| end + i);
    log[before..after].to_string()
}

fn tail_lines(log: &str, n: usize) -> String {
    let lines: Vec<&str> = log.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_javac_style_compilation_error() {
        let log = "[ERROR] /repo/src/main/java/com/example/Foo.java:[12,34] error: cannot find symbol";
        let errors = classify(log);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::Compilation);
        assert_eq!(errors[0].file.as_deref(), Some("/repo/src/main/java/com/example/Foo.java"));
        assert_eq!(errors[0].line, Some(12));
    }

    #[test]
    fn classifies_maven_dependency_failure() {
        let log = "[ERROR] Failed to execute goal: Could not resolve dependencies for project com.example:app:jar:1.0";
        let errors = classify(log);
        assert!(errors.iter().any(|e| e.kind == ErrorKind::Dependency));
    }

    #[test]
    fn classifies_spring_context_failure() {
        let log = "Caused by: org.springframework.beans.factory.NoSuchBeanDefinitionException: No qualifying bean of type 'com.example.repository.UserRepository' available";
        let errors = classify(log);
        assert!(errors.iter().any(|e| matches!(
            &e.kind,
            ErrorKind::FrameworkContextError { kind: FrameworkContextErrorKind::MissingAnnotation, identity }
                if identity == "UserRepository"
        )));
    }

    #[test]
    fn classifies_ambiguous_bean_failure() {
        let log = "Caused by: org.springframework.beans.factory.NoUniqueBeanDefinitionException: No qualifying bean of type 'com.example.service.PaymentGateway' available: expected single matching bean but found 2";
        let errors = classify(log);
        assert!(errors.iter().any(|e| matches!(
            &e.kind,
            ErrorKind::FrameworkContextError { kind: FrameworkContextErrorKind::AmbiguousBean, identity }
                if identity == "PaymentGateway"
        )));
    }

    #[test]
    fn classifies_circular_dependency_failure() {
        let log = "Caused by: org.springframework.beans.factory.BeanCurrentlyInCreationException: Error creating bean with name 'orderService': Requested bean is currently in creation: Is there an unresolvable circular reference?";
        let errors = classify(log);
        assert!(errors
            .iter()
            .any(|e| matches!(&e.kind, ErrorKind::FrameworkContextError { kind: FrameworkContextErrorKind::CircularDependency, .. })));
    }

    #[test]
    fn classifies_test_failure_summary() {
        let log = "Tests run: 42, Failures: 3, Errors: 0, Skipped: 0";
        let errors = classify(log);
        assert!(errors.iter().any(|e| e.kind == ErrorKind::TestFailure));
    }

    #[test]
    fn falls_back_to_unknown_when_nothing_matches() {
        let log = "build finished with an unexpected exit code";
        let errors = classify(log);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::Unknown);
    }

    #[test]
    fn window_log_passes_through_at_exactly_max_lines() {
        let log = (0..300).map(|i| format!("line{i}")).collect::<Vec<_>>().join("\n");
        let windowed = window_log(&log, 300);
        assert_eq!(windowed, log);
        assert_eq!(windowed.lines().count(), 300);
    }

    #[test]
    fn window_log_drops_oldest_line_past_max_lines() {
        let log = (0..301).map(|i| format!("line{i}")).collect::<Vec<_>>().join("\n");
        let windowed = window_log(&log, 300);
        assert_eq!(windowed.lines().count(), 300);
        assert_eq!(windowed.lines().next(), Some("line1"));
        assert_eq!(windowed.lines().last(), Some("line300"));
    }
}
