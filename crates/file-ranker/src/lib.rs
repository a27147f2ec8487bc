//! Candidate-file ranking for the CODE_FIX stage.
//!
//! Scores every source file in a checked-out project against a set of
//! classified build errors along four normalized dimensions (semantic
//! overlap, dependency proximity, architectural role, historical fix
//! frequency), combines them into a single weighted score, and selects an
//! ordered candidate list for the patch generator. Pure over its inputs —
//! no filesystem or network access happens here; callers supply file
//! contents already read from disk.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use error_classifier::{ClassifiedError, ErrorKind};
use regex::Regex;
use serde::{Deserialize, Serialize};

const K_SEM: usize = 8;
const W_SEM: f32 = 0.30;
const W_DEP: f32 = 0.25;
const W_ARCH: f32 = 0.25;
const W_HIST: f32 = 0.20;
const SCORE_THRESHOLD: f32 = 0.05;
const DEFAULT_TOP_N: usize = 5;
const FALLBACK_TOP_K: usize = 3;

/// The architectural role a file plays, used to look up `arch(f)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    BuildDescriptor,
    Configuration,
    ServiceOrRepository,
    Controller,
    TestUnderFailure,
    TestOther,
    Utility,
    Generated,
}

/// A single file available for ranking, with enough information
/// pre-extracted by the caller that this crate never touches the
/// filesystem.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
    /// Import statements collected from the top of the file.
    pub imports: Vec<String>,
    pub role: FileRole,
}

/// Frequency-weighted fix-history lookup. Empty by default; the term it
/// feeds is preserved for forward compatibility but contributes zero
/// until a history store is wired in.
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    /// Map from error kind to (file path, days-since-fix) pairs observed
    /// in prior successful fixes.
    entries: HashMap<ErrorKind, Vec<(String, f64)>>,
}

impl HistoryStore {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_entries(entries: HashMap<ErrorKind, Vec<(String, f64)>>) -> Self {
        Self { entries }
    }

    fn score(&self, kind: &ErrorKind, path: &str) -> f32 {
        let Some(records) = self.entries.get(kind) else {
            return 0.0;
        };
        if records.is_empty() {
            return 0.0;
        }

        let mut sums: HashMap<&str, f64> = HashMap::new();
        for (file, days) in records {
            *sums.entry(file.as_str()).or_insert(0.0) += (-0.01 * days).exp();
        }
        let max = sums.values().copied().fold(0.0_f64, f64::max);
        if max <= 0.0 {
            return 0.0;
        }
        (sums.get(path).copied().unwrap_or(0.0) / max) as f32
    }
}

/// A ranked candidate file, carrying its sub-scores for auditability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedFile {
    pub path: String,
    pub score: f32,
    pub sem: f32,
    pub dep: f32,
    pub arch: f32,
    pub hist: f32,
    pub reason: String,
}

/// Result of a ranking run: the selected candidates plus the batch-level
/// confidence of the selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingResult {
    pub candidates: Vec<RankedFile>,
    pub confidence: f32,
}

static CLASS_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[A-Z][A-Za-z0-9]+\b").unwrap());
static METHOD_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b([a-zA-Z_][A-Za-z0-9_]*)\(").unwrap());
static PACKAGE_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(?:[a-z][a-z0-9_]*\.){2,}[A-Za-z0-9_]+\b").unwrap());

/// Ranks `files` against `errors`, returning the selected candidate list
/// and the selection's confidence.
#[must_use]
pub fn rank(errors: &[ClassifiedError], files: &[SourceFile], history: &HistoryStore) -> RankingResult {
    let tokens = extract_error_tokens(errors);
    let error_files: HashSet<&str> = errors.iter().filter_map(|e| e.file.as_deref()).collect();
    let dominant_kind = dominant_error_kind(errors);

    let direct_imports = direct_import_closure(files, &error_files);
    let transitive_imports = transitive_import_closure(files, &direct_imports);

    let mut scored: Vec<RankedFile> = files
        .iter()
        .map(|file| {
            let sem = sem_score(&tokens, &file.content);
            let dep = dep_score(&file.path, &direct_imports, &transitive_imports);
            let arch = arch_score(file.role, &dominant_kind);
            let hist = history.score(&dominant_kind, &file.path);

            let score = (W_SEM * sem + W_DEP * dep + W_ARCH * arch + W_HIST * hist).clamp(0.0, 1.0);
            let reason = format!("sem={sem:.2} dep={dep:.2} arch={arch:.2} hist={hist:.2}");

            RankedFile {
                path: file.path.clone(),
                score,
                sem,
                dep,
                arch,
                hist,
                reason,
            }
        })
        .collect();

    sort_ranked(&mut scored);

    let above_threshold: Vec<RankedFile> = scored
        .iter()
        .filter(|f| f.score >= SCORE_THRESHOLD)
        .cloned()
        .collect();

    let selected = if above_threshold.is_empty() {
        let mut by_sem = scored.clone();
        by_sem.sort_by(|a, b| b.sem.partial_cmp(&a.sem).unwrap_or(std::cmp::Ordering::Equal).then_with(|| tie_break(a, b)));
        by_sem.into_iter().take(FALLBACK_TOP_K).collect()
    } else {
        above_threshold.into_iter().take(DEFAULT_TOP_N).collect::<Vec<_>>()
    };

    let confidence = confidence_of(&selected, &scored);

    RankingResult {
        candidates: selected,
        confidence,
    }
}

fn dominant_error_kind(errors: &[ClassifiedError]) -> ErrorKind {
    errors.first().map_or(ErrorKind::Unknown, |e| e.kind.clone())
}

fn extract_error_tokens(errors: &[ClassifiedError]) -> HashSet<String> {
    let mut tokens = HashSet::new();
    for error in errors {
        for text in [error.message.as_str(), error.excerpt.as_str()] {
            for m in CLASS_TOKEN.find_iter(text) {
                tokens.insert(m.as_str().to_string());
            }
            for caps in METHOD_TOKEN.captures_iter(text) {
                tokens.insert(caps[1].to_string());
            }
            for m in PACKAGE_TOKEN.find_iter(text) {
                tokens.insert(m.as_str().to_string());
            }
        }
    }
    tokens
}

fn sem_score(tokens: &HashSet<String>, content: &str) -> f32 {
    if tokens.is_empty() {
        return 0.0;
    }
    let matches = tokens.iter().filter(|t| content.contains(t.as_str())).count();
    let denominator = tokens.len().min(K_SEM) as f32;
    (matches as f32 / denominator).min(1.0)
}

fn direct_import_closure<'a>(files: &'a [SourceFile], error_files: &HashSet<&str>) -> HashSet<String> {
    let mut imports = HashSet::new();
    for file in files {
        if error_files.contains(file.path.as_str()) {
            for import in &file.imports {
                imports.insert(import.clone());
            }
        }
    }
    imports
}

fn transitive_import_closure(files: &[SourceFile], direct: &HashSet<String>) -> HashSet<String> {
    let mut transitive = HashSet::new();
    for file in files {
        if direct.iter().any(|d| file.path.ends_with(d.as_str()) || d.ends_with(file.path.as_str())) {
            for import in &file.imports {
                transitive.insert(import.clone());
            }
        }
    }
    transitive
}

fn dep_score(path: &str, direct: &HashSet<String>, transitive: &HashSet<String>) -> f32 {
    if direct.iter().any(|d| path.ends_with(d.as_str()) || d.ends_with(path)) {
        1.0
    } else if transitive.iter().any(|d| path.ends_with(d.as_str()) || d.ends_with(path)) {
        0.6
    } else {
        0.0
    }
}

fn arch_score(role: FileRole, dominant_kind: &ErrorKind) -> f32 {
    match role {
        FileRole::BuildDescriptor if matches!(dominant_kind, ErrorKind::Dependency) => 1.0,
        FileRole::BuildDescriptor => 0.0,
        FileRole::Configuration => 0.9,
        FileRole::ServiceOrRepository => 0.8,
        FileRole::Controller => 0.7,
        FileRole::TestUnderFailure if matches!(dominant_kind, ErrorKind::TestFailure) => 0.9,
        FileRole::TestUnderFailure => 0.3,
        FileRole::TestOther => 0.3,
        FileRole::Utility => 0.3,
        FileRole::Generated => 0.0,
    }
}

fn sort_ranked(files: &mut [RankedFile]) {
    files.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| tie_break(a, b))
    });
}

fn tie_break(a: &RankedFile, b: &RankedFile) -> std::cmp::Ordering {
    a.path
        .len()
        .cmp(&b.path.len())
        .then_with(|| a.path.cmp(&b.path))
}

fn confidence_of(selected: &[RankedFile], all_sorted: &[RankedFile]) -> f32 {
    let Some(last) = selected.last() else {
        return 0.0;
    };
    let next_index = all_sorted.iter().position(|f| f.path == last.path).map(|i| i + 1);
    let next_score = next_index.and_then(|i| all_sorted.get(i)).map_or(0.0, |f| f.score);
    last.score - next_score
}

#[cfg(test)]
mod tests {
    use super::*;
    use error_classifier::ErrorKind;

    fn error(kind: ErrorKind, file: Option<&str>, message: &str) -> ClassifiedError {
        ClassifiedError {
            kind,
            file: file.map(str::to_string),
            line: None,
            message: message.to_string(),
            excerpt: message.to_string(),
        }
    }

    #[test]
    fn prefers_file_mentioned_in_error_text() {
        let errors = vec![error(
            ErrorKind::Compilation,
            Some("src/Foo.java"),
            "cannot find symbol FooService",
        )];
        let files = vec![
            SourceFile {
                path: "src/FooService.java".to_string(),
                content: "public class FooService {}".to_string(),
                imports: vec![],
                role: FileRole::ServiceOrRepository,
            },
            SourceFile {
                path: "src/Unrelated.java".to_string(),
                content: "public class Unrelated {}".to_string(),
                imports: vec![],
                role: FileRole::Utility,
            },
        ];

        let result = rank(&errors, &files, &HistoryStore::empty());
        assert_eq!(result.candidates[0].path, "src/FooService.java");
        assert!(result.candidates[0].score > result.candidates[1].score);
    }

    #[test]
    fn build_descriptor_scores_highest_for_dependency_errors() {
        let errors = vec![error(ErrorKind::Dependency, None, "Could not resolve dependencies")];
        let files = vec![SourceFile {
            path: "pom.xml".to_string(),
            content: String::new(),
            imports: vec![],
            role: FileRole::BuildDescriptor,
        }];

        let result = rank(&errors, &files, &HistoryStore::empty());
        assert_eq!(result.candidates[0].arch, 1.0);
    }

    #[test]
    fn falls_back_to_top_k_by_semantic_when_nothing_clears_threshold() {
        let errors = vec![error(ErrorKind::Unknown, None, "")];
        let files = (0..5)
            .map(|i| SourceFile {
                path: format!("src/File{i}.java"),
                content: String::new(),
                imports: vec![],
                role: FileRole::Utility,
            })
            .collect::<Vec<_>>();

        let result = rank(&errors, &files, &HistoryStore::empty());
        assert_eq!(result.candidates.len(), FALLBACK_TOP_K);
    }

    #[test]
    fn reason_string_matches_expected_format() {
        let errors = vec![error(ErrorKind::Unknown, None, "")];
        let files = vec![SourceFile {
            path: "src/Foo.java".to_string(),
            content: String::new(),
            imports: vec![],
            role: FileRole::Utility,
        }];

        let result = rank(&errors, &files, &HistoryStore::empty());
        let reason = &result.candidates[0].reason;
        assert!(reason.starts_with("sem="));
        assert!(reason.contains("dep="));
        assert!(reason.contains("arch="));
        assert!(reason.contains("hist="));
    }
}
