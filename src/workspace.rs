// File enumeration for the indexing stages. Walks honor ignore files the
// same way the rest of the tooling ecosystem does, and additionally skip
// build output and VCS metadata directories that never contain sources
// worth indexing.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use ignore::WalkBuilder;

use crate::sql::SKIP_DIRS;

/// Recursively collect files with the given extension under `root`,
/// sorted for deterministic downstream processing.
pub fn find_files(root: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("not a directory: {}", root.display());
    }

    let mut builder = WalkBuilder::new(root);
    builder.git_ignore(true);
    builder.git_global(true);
    builder.git_exclude(true);
    builder.hidden(false);
    builder.filter_entry(|entry| {
        let name = entry.file_name().to_string_lossy();
        !SKIP_DIRS.iter().any(|skip| *skip == name)
    });

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = entry?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.into_path();
        let matches = path
            .extension()
            .map(|e| e.to_string_lossy().eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn finds_files_by_extension_and_skips_build_dirs() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("Tables")).unwrap();
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::create_dir_all(root.join("Snapshots")).unwrap();
        fs::write(root.join("Tables/Customer.sql"), "CREATE TABLE t (i INT);").unwrap();
        fs::write(root.join("Tables/notes.txt"), "not sql").unwrap();
        fs::write(root.join("bin/generated.sql"), "SELECT 1;").unwrap();
        fs::write(root.join("Snapshots/old.sql"), "SELECT 1;").unwrap();
        fs::write(root.join("Deploy.SQL"), "SELECT 1;").unwrap();

        let files = find_files(root, "sql").unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["Deploy.SQL", "Customer.sql"]);
    }

    #[test]
    fn missing_root_is_an_error() {
        assert!(find_files(Path::new("/definitely/not/here"), "sql").is_err());
    }
}
