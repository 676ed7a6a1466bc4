use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, trace};
use walkdir::WalkDir;

const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "jsx", "ts", "tsx", "java", "c", "cpp", "h", "hpp", "cs", "go", "rb", "php",
    "scala", "swift", "rs", "kt", "kts", "html", "css", "scss", "sass", "less", "sh", "bash", "r",
];

/// Path components that exclude a file from code analysis.
const IGNORED_COMPONENTS: &[&str] = &[
    ".git",
    ".github",
    ".gitignore",
    ".DS_Store",
    ".env",
    ".venv",
    ".idea",
    ".vscode",
    "package-lock.json",
    "yarn.lock",
    "Cargo.lock",
    "Gemfile.lock",
    "node_modules",
    "dist",
    "build",
    "target",
];

/// File-name prefixes that exclude a file from code analysis.
const IGNORED_PREFIXES: &[&str] = &["LICENSE", "README"];

/// Vendored or generated directories never walked.
const SKIPPED_DIRS: &[&str] = &["node_modules", "__pycache__", "venv"];

const DEPENDENCY_FILES: &[&str] = &[
    "requirements.txt",
    "pyproject.toml",
    "setup.py",
    "setup.cfg",
    "pipfile",
    "environment.yml",
    "environment.yaml",
    "conda.yaml",
    "package.json",
    "cargo.toml",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "build.gradle.kts",
    "gemfile",
    "composer.json",
    "deps.txt",
];

const DOC_EXTENSIONS: &[&str] = &["md", "rst", "adoc", "txt"];

/// Coarse role of a repository file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    Documentation,
    Dependency,
    Code,
    Other,
}

/// Relative paths of every regular file under `root`, sorted.
///
/// Hidden entries (any component starting with `.`) and vendored directories are skipped.
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        anyhow::bail!("{} is not a directory", root.display());
    }
    let mut files = Vec::new();
    let walker = WalkDir::new(root).follow_links(false).into_iter();
    for entry in walker.filter_entry(|entry| entry.depth() == 0 || !is_skipped(entry.file_name()))
    {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("{} escaped {}", entry.path().display(), root.display()))?;
        trace!(path = %relative.display(), "listed file");
        files.push(relative.to_path_buf());
    }
    files.sort();
    debug!(root = %root.display(), count = files.len(), "listed repository files");
    Ok(files)
}

fn is_skipped(name: &std::ffi::OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

fn normal_components(path: &Path) -> impl Iterator<Item = std::borrow::Cow<'_, str>> {
    path.components().filter_map(|component| match component {
        Component::Normal(part) => Some(part.to_string_lossy()),
        _ => None,
    })
}

/// Whether `path` looks like source code worth sending to the analyzer.
pub fn is_code_file(path: &Path) -> bool {
    let ignored = normal_components(path).any(|part| IGNORED_COMPONENTS.contains(&part.as_ref()));
    if ignored {
        return false;
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_default();
    if IGNORED_PREFIXES
        .iter()
        .any(|prefix| file_name.starts_with(prefix))
    {
        return false;
    }
    extension(path).is_some_and(|ext| CODE_EXTENSIONS.contains(&ext.as_str()))
}

/// Classify a repository-relative path by file naming conventions.
pub fn classify(path: &Path) -> FileCategory {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_ascii_lowercase()) else {
        return FileCategory::Other;
    };
    let ext = extension(path);

    if DEPENDENCY_FILES.contains(&name.as_str())
        || ((name.starts_with("requirements") || name.starts_with("req"))
            && ext.as_deref() == Some("txt"))
    {
        return FileCategory::Dependency;
    }

    if name.starts_with("readme") {
        return FileCategory::Documentation;
    }
    let in_docs_dir = normal_components(path)
        .any(|part| matches!(part.to_ascii_lowercase().as_str(), "docs" | "doc"));
    match ext.as_deref() {
        Some("md" | "rst" | "adoc") => return FileCategory::Documentation,
        Some(ext) if in_docs_dir && DOC_EXTENSIONS.contains(&ext) => {
            return FileCategory::Documentation
        }
        _ => {}
    }

    if is_code_file(path) {
        FileCategory::Code
    } else {
        FileCategory::Other
    }
}

/// Read a file as UTF-8, replacing invalid sequences. `None` when it cannot be read.
pub fn read_lossy(path: &Path) -> Option<String> {
    match fs::read(path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "unable to read file");
            None
        }
    }
}
