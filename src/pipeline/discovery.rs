//! Best-effort recovery of artifacts the persisted state lost track of.
//!
//! State and generated files are written separately, so after a crash or a
//! corrupted state document the test suite may still be on disk. These
//! lookups find it again using the naming conventions of the generator and
//! the extractor.

use std::path::{Path, PathBuf};

use tracing::debug;

/// Source file guessed when no project name is known.
pub const DEFAULT_SOURCE_STEM: &str = "server";

/// File name the generator uses for a project's suite.
pub fn expected_test_name(project_stem: &str) -> String {
    format!("test_{project_stem}.py")
}

/// Locate a generated suite: `test_<stem>.py` first, then the first `*.py`
/// in `generated_dir` by name.
pub async fn find_test_file(generated_dir: &Path, project_stem: Option<&str>) -> Option<PathBuf> {
    if let Some(stem) = project_stem {
        let expected = generated_dir.join(expected_test_name(stem));
        if tokio::fs::metadata(&expected)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            debug!(path = %expected.display(), "found suite by project name");
            return Some(expected);
        }
    }

    let fallback = first_with_extension(generated_dir, "py").await;
    if let Some(path) = &fallback {
        debug!(path = %path.display(), "falling back to first generated suite");
    }
    fallback
}

/// Guess the backend entry point of an extracted project:
/// `<extracted>/<stem>/server.js`, else the first `*.js` there. Returns the
/// conventional path even when nothing exists so the healer can report it.
pub async fn guess_source_file(extracted_dir: &Path, project_stem: &str) -> PathBuf {
    let project_dir = extracted_dir.join(project_stem);
    let estimated = project_dir.join("server.js");
    if tokio::fs::metadata(&estimated).await.is_ok() {
        return estimated;
    }
    first_with_extension(&project_dir, "js")
        .await
        .unwrap_or(estimated)
}

async fn first_with_extension(dir: &Path, ext: &str) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut matches = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_file && path.extension().and_then(|e| e.to_str()) == Some(ext) {
            matches.push(path);
        }
    }
    matches.sort();
    matches.into_iter().next()
}
