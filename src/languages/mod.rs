pub mod python;
pub mod typescript;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::indexer::extractor::{ExtractOptions, ExtractionOutput};
use crate::indexer::parser::ParsedFile;

/// Turns one parsed source file into graph nodes, edges and callsites.
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn file_extensions(&self) -> &[&'static str];
    /// Grammar used for files with the given extension.
    fn language(&self, ext: &str) -> tree_sitter::Language;

    /// Language label recorded on nodes for files with the given extension.
    fn lang_label(&self, _ext: &str) -> &'static str {
        self.name()
    }

    fn extract(&self, parsed: &ParsedFile<'_>, rel_path: &str, options: &ExtractOptions) -> ExtractionOutput;
}

pub struct ExtractorRegistry {
    extractors: HashMap<String, Arc<dyn Extractor>>,
    extension_map: HashMap<String, String>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            extractors: HashMap::new(),
            extension_map: HashMap::new(),
        };

        registry.register(Arc::new(python::PythonExtractor));
        registry.register(Arc::new(typescript::TypeScriptExtractor));

        registry
    }

    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        let name = extractor.name().to_string();
        for ext in extractor.file_extensions() {
            self.extension_map.insert(ext.to_string(), name.clone());
        }
        self.extractors.insert(name, extractor);
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn Extractor>> {
        self.extractors.get(name).cloned()
    }

    pub fn get_by_extension(&self, ext: &str) -> Option<Arc<dyn Extractor>> {
        self.extension_map
            .get(ext)
            .and_then(|name| self.extractors.get(name))
            .cloned()
    }

    pub fn get_for_file(&self, path: &Path) -> Option<Arc<dyn Extractor>> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.get_by_extension(ext))
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        self.get_for_file(path).is_some()
    }

    /// Language label for a supported file, e.g. `javascript` for `app.js`.
    pub fn lang_label_for(&self, path: &Path) -> Option<&'static str> {
        let ext = path.extension()?.to_str()?;
        self.get_by_extension(ext).map(|e| e.lang_label(ext))
    }

    pub fn supported_extensions(&self) -> Vec<&str> {
        let mut exts: Vec<&str> = self.extension_map.keys().map(|s| s.as_str()).collect();
        exts.sort_unstable();
        exts
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_new() {
        let registry = ExtractorRegistry::new();
        assert!(registry.get_by_name("python").is_some());
        assert!(registry.get_by_name("typescript").is_some());
        assert!(registry.get_by_name("rust").is_none());
    }

    #[test]
    fn test_get_by_extension() {
        let registry = ExtractorRegistry::default();
        assert_eq!(registry.get_by_extension("py").unwrap().name(), "python");
        for ext in ["ts", "tsx", "js", "jsx"] {
            assert_eq!(registry.get_by_extension(ext).unwrap().name(), "typescript");
        }
        assert!(registry.get_by_extension("rs").is_none());
        assert!(registry.get_by_extension("").is_none());
    }

    #[test]
    fn test_lang_labels() {
        let registry = ExtractorRegistry::new();
        assert_eq!(registry.lang_label_for(Path::new("a/b.py")), Some("python"));
        assert_eq!(registry.lang_label_for(Path::new("web/app.js")), Some("javascript"));
        assert_eq!(registry.lang_label_for(Path::new("web/App.jsx")), Some("javascript"));
        assert_eq!(registry.lang_label_for(Path::new("web/app.ts")), Some("typescript"));
        assert_eq!(registry.lang_label_for(Path::new("README.md")), None);
    }

    #[test]
    fn test_supported_extensions() {
        let registry = ExtractorRegistry::new();
        assert_eq!(registry.supported_extensions(), vec!["js", "jsx", "py", "ts", "tsx"]);
        assert!(registry.is_supported(Path::new("src/main.py")));
        assert!(!registry.is_supported(Path::new("src/main.rs")));
    }
}
