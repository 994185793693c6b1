pub mod python;
pub mod rust;
pub mod typescript;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub trait LanguageGrammar: Send + Sync {
    fn name(&self) -> &'static str;
    fn file_extensions(&self) -> &[&'static str];
    fn language(&self) -> tree_sitter::Language;

    /// Query extracting indexable spans (functions, methods, classes).
    fn spans_query(&self) -> &str;

    /// Query extracting usage sites (calls, type references).
    fn usages_query(&self) -> &str;

    /// Get cached spans query (compiled once)
    fn cached_spans_query(&self) -> Option<&'static tree_sitter::Query> {
        None
    }

    /// Get cached usages query (compiled once)
    fn cached_usages_query(&self) -> Option<&'static tree_sitter::Query> {
        None
    }
}

pub struct LanguageRegistry {
    languages: HashMap<String, Arc<dyn LanguageGrammar>>,
    extension_map: HashMap<String, String>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            languages: HashMap::new(),
            extension_map: HashMap::new(),
        };

        registry.register(Arc::new(rust::RustGrammar));
        registry.register(Arc::new(python::PythonGrammar));
        registry.register(Arc::new(typescript::TypeScriptGrammar));

        registry
    }

    pub fn register(&mut self, grammar: Arc<dyn LanguageGrammar>) {
        let name = grammar.name().to_string();
        for ext in grammar.file_extensions() {
            self.extension_map.insert(ext.to_string(), name.clone());
        }
        self.languages.insert(name, grammar);
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn LanguageGrammar>> {
        self.languages.get(name).cloned()
    }

    pub fn get_by_extension(&self, ext: &str) -> Option<Arc<dyn LanguageGrammar>> {
        self.extension_map
            .get(ext)
            .and_then(|name| self.languages.get(name))
            .cloned()
    }

    pub fn get_for_file(&self, path: &Path) -> Option<Arc<dyn LanguageGrammar>> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.get_by_extension(ext))
    }

    pub fn supported_extensions(&self) -> Vec<&str> {
        self.extension_map.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_new() {
        let registry = LanguageRegistry::new();
        assert!(registry.get_by_name("rust").is_some());
        assert!(registry.get_by_name("python").is_some());
        assert!(registry.get_by_name("typescript").is_some());
    }

    #[test]
    fn test_get_for_file() {
        let registry = LanguageRegistry::new();
        assert_eq!(registry.get_for_file(Path::new("src/lib.rs")).unwrap().name(), "rust");
        assert_eq!(registry.get_for_file(Path::new("app.py")).unwrap().name(), "python");
        assert_eq!(
            registry.get_for_file(Path::new("web/index.ts")).unwrap().name(),
            "typescript"
        );
        assert!(registry.get_for_file(Path::new("README.md")).is_none());
    }

    #[test]
    fn test_cached_queries_compile_once() {
        let registry = LanguageRegistry::new();
        for name in ["rust", "python", "typescript"] {
            let grammar = registry.get_by_name(name).unwrap();
            let first = grammar
                .cached_spans_query()
                .unwrap_or_else(|| panic!("{name} spans query did not compile"));
            let second = grammar.cached_spans_query().unwrap();
            assert!(std::ptr::eq(first, second));
            assert!(grammar.cached_usages_query().is_some());
        }
    }

    #[test]
    fn test_queries_compile() {
        let registry = LanguageRegistry::new();
        for name in ["rust", "python", "typescript"] {
            let grammar = registry.get_by_name(name).unwrap();
            tree_sitter::Query::new(&grammar.language(), grammar.spans_query())
                .unwrap_or_else(|e| panic!("{name} spans query: {e}"));
            tree_sitter::Query::new(&grammar.language(), grammar.usages_query())
                .unwrap_or_else(|e| panic!("{name} usages query: {e}"));
        }
    }
}
