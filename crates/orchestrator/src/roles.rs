//! Bridges a [`project_analyzer::ProjectDescriptor`] into the
//! [`file_ranker::SourceFile`] list the RETRIEVE stage ranks.
//!
//! Owns two things the ranking crate deliberately stays pure over:
//! reading file contents off disk, and deriving each file's architectural
//! role from its path and the annotations `project-analyzer` already
//! collected near the top of the file (distilled spec §4.3 item 4, §4.4
//! item 3).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use file_ranker::{FileRole, SourceFile};
use project_analyzer::ProjectDescriptor;
use regex::Regex;

use crate::stage::StageError;

/// Build descriptor filenames project-analyzer detects but never
/// enumerates as source files — added back here so they're available
/// for ranking (`FileRole::BuildDescriptor` needs one to score against).
const BUILD_DESCRIPTOR_NAMES: [&str; 3] = ["pom.xml", "build.gradle", "build.gradle.kts"];

static IMPORT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^import\s+(?:static\s+)?([\w.]+)(?:\.\*)?\s*;").unwrap());

/// Reads every file `descriptor` names (plus any build descriptor at the
/// project root) and classifies each into a [`SourceFile`] ready for
/// [`file_ranker::rank`].
///
/// # Errors
/// Returns [`StageError::Other`] if a named file can't be read.
pub async fn build_source_files(
    root: &Path,
    descriptor: &ProjectDescriptor,
) -> Result<Vec<SourceFile>, StageError> {
    let mut files = Vec::with_capacity(descriptor.source_files.len() + 1);

    for name in BUILD_DESCRIPTOR_NAMES {
        let path = root.join(name);
        if path.is_file() {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| StageError::Other(format!("reading {name}: {e}")))?;
            files.push(SourceFile {
                path: name.to_string(),
                content,
                imports: Vec::new(),
                role: FileRole::BuildDescriptor,
            });
        }
    }

    for relative in &descriptor.source_files {
        let content = tokio::fs::read_to_string(root.join(relative))
            .await
            .map_err(|e| StageError::Other(format!("reading {}: {e}", relative.display())))?;
        let role = classify_role(relative, &descriptor.annotation_index);
        let imports = extract_imports(&content);
        files.push(SourceFile {
            path: relative.to_string_lossy().replace('\\', "/"),
            content,
            imports,
            role,
        });
    }

    Ok(files)
}

/// Priority order: generated code, then configuration/service/controller
/// annotations, then test files under the conventional test root, else a
/// plain utility file.
fn classify_role(path: &Path, annotations: &HashMap<PathBuf, Vec<String>>) -> FileRole {
    let path_str = path.to_string_lossy().replace('\\', "/");

    if path_str.contains("/generated/") || path_str.contains("generated-sources/") {
        return FileRole::Generated;
    }

    if let Some(names) = annotations.get(path) {
        if names.iter().any(|n| n == "Configuration") {
            return FileRole::Configuration;
        }
        if names.iter().any(|n| n == "Service" || n == "Repository") {
            return FileRole::ServiceOrRepository;
        }
        if names.iter().any(|n| n == "Controller" || n == "RestController") {
            return FileRole::Controller;
        }
    }

    let is_test_root = path_str.contains("src/test/");
    let is_test_named = path
        .file_name()
        .and_then(|f| f.to_str())
        .is_some_and(|n| n.ends_with("Test.java") || n.ends_with("Tests.java"));
    if is_test_root && is_test_named {
        return FileRole::TestUnderFailure;
    }

    FileRole::Utility
}

/// Converts `import a.b.C;` statements into path-like strings
/// (`a/b/C.java`) so they can be matched against [`SourceFile::path`] by
/// `file_ranker`'s suffix-overlap comparison.
fn extract_imports(content: &str) -> Vec<String> {
    IMPORT_LINE
        .captures_iter(content)
        .map(|caps| format!("{}.java", caps[1].replace('.', "/")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_converts_import_statements() {
        let content = "package com.example;\n\nimport com.example.service.FooService;\nimport static java.util.Objects.requireNonNull;\n\nclass X {}\n";
        let imports = extract_imports(content);
        assert_eq!(imports, vec!["com/example/service/FooService.java", "java/util/Objects.java"]);
    }

    #[test]
    fn generated_path_takes_priority_over_annotations() {
        let mut annotations = HashMap::new();
        let path = PathBuf::from("target/generated-sources/annotations/com/example/Foo.java");
        annotations.insert(path.clone(), vec!["Service".to_string()]);
        assert_eq!(classify_role(&path, &annotations), FileRole::Generated);
    }

    #[test]
    fn test_file_under_test_root_is_test_under_failure() {
        let path = PathBuf::from("src/test/java/com/example/FooServiceTest.java");
        assert_eq!(classify_role(&path, &HashMap::new()), FileRole::TestUnderFailure);
    }

    #[test]
    fn untagged_main_file_is_utility() {
        let path = PathBuf::from("src/main/java/com/example/Foo.java");
        assert_eq!(classify_role(&path, &HashMap::new()), FileRole::Utility);
    }
}
