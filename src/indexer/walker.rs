use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use crate::error::Result;
use crate::languages::ExtractorRegistry;

/// Directory names never descended into.
pub const EXCLUDED_DIRS: &[&str] = &[
    ".git", ".svn", ".hg", "venv", ".venv", "env", ".env", "__pycache__", ".pytest_cache",
    ".mypy_cache", ".ruff_cache", ".tox", ".eggs", "dist", "build", ".Python", "node_modules",
    ".npm", ".yarn", ".pnp", "htmlcov", ".coverage", "coverage", ".nyc_output", ".vscode",
    ".idea", ".DS_Store", "target", ".gradle", ".maven", ".cache", "tmp", "temp",
];

pub fn is_excluded_dir(name: &str) -> bool {
    EXCLUDED_DIRS.contains(&name)
        || name.starts_with('.')
        || name.ends_with(".egg-info")
        || name.ends_with("-info")
}

pub struct FileWalker<'a> {
    registry: &'a ExtractorRegistry,
}

impl<'a> FileWalker<'a> {
    pub fn new(registry: &'a ExtractorRegistry) -> Self {
        Self { registry }
    }

    /// Supported source files under `root`, sorted by path.
    pub fn walk(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        let walker = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .ignore(true)
            .filter_entry(|entry| {
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                entry.depth() == 0 || !is_dir || !is_excluded_dir(&entry.file_name().to_string_lossy())
            })
            .build();

        for entry in walker.flatten() {
            let path = entry.path();
            if path.is_file() && self.is_supported(path) {
                files.push(path.to_path_buf());
            }
        }

        files.sort();
        Ok(files)
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        self.registry.is_supported(path)
    }
}

/// `path` relative to `root` with `/` separators; `.` for the root itself.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::TempDir;

    fn create_file(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut file = File::create(path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    fn walk(dir: &Path) -> Vec<String> {
        let registry = ExtractorRegistry::new();
        FileWalker::new(&registry)
            .walk(dir)
            .unwrap()
            .iter()
            .map(|p| relative_path(dir, p))
            .collect()
    }

    #[test]
    fn test_walk_finds_supported_files() {
        let temp_dir = TempDir::new().unwrap();
        create_file(temp_dir.path(), "main.py", "print(1)");
        create_file(temp_dir.path(), "web/app.ts", "const x = 1;");
        create_file(temp_dir.path(), "web/component.tsx", "export default () => null;");
        create_file(temp_dir.path(), "web/utils.js", "function test() {}");
        create_file(temp_dir.path(), "README.md", "# readme");
        create_file(temp_dir.path(), "lib.rs", "fn main() {}");

        assert_eq!(
            walk(temp_dir.path()),
            vec!["main.py", "web/app.ts", "web/component.tsx", "web/utils.js"]
        );
    }

    #[test]
    fn test_walk_skips_excluded_dirs() {
        let temp_dir = TempDir::new().unwrap();
        create_file(temp_dir.path(), "pkg/mod.py", "");
        create_file(temp_dir.path(), "node_modules/dep/index.js", "");
        create_file(temp_dir.path(), "venv/lib/site.py", "");
        create_file(temp_dir.path(), "pkg/__pycache__/mod.py", "");
        create_file(temp_dir.path(), "demo.egg-info/setup.py", "");
        create_file(temp_dir.path(), ".hidden/secret.py", "");
        create_file(temp_dir.path(), "build/out.js", "");

        assert_eq!(walk(temp_dir.path()), vec!["pkg/mod.py"]);
    }

    #[test]
    fn test_excluded_dir_names() {
        assert!(is_excluded_dir("node_modules"));
        assert!(is_excluded_dir("foo.egg-info"));
        assert!(is_excluded_dir("requests-2.0.dist-info"));
        assert!(is_excluded_dir(".anything"));
        assert!(!is_excluded_dir("src"));
        assert!(!is_excluded_dir("builder"));
    }

    #[test]
    fn test_relative_path() {
        let root = Path::new("/repo");
        assert_eq!(relative_path(root, Path::new("/repo/a/b.py")), "a/b.py");
        assert_eq!(relative_path(root, Path::new("/repo")), ".");
    }
}
