use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use crate::error::Result;
use crate::languages::LanguageRegistry;
use crate::store::STORE_DIR;

pub struct FileWalker {
    registry: LanguageRegistry,
}

impl FileWalker {
    pub fn new(registry: LanguageRegistry) -> Self {
        Self { registry }
    }

    /// Walks a repository root, honouring gitignore rules, returning files
    /// in a supported language. The store directory itself is always skipped.
    pub fn walk(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        let walker = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .ignore(true)
            .build();

        for entry in walker.flatten() {
            let path = entry.path();
            if path.components().any(|c| c.as_os_str() == STORE_DIR) {
                continue;
            }
            if path.is_file() && self.is_supported(path) {
                files.push(path.to_path_buf());
            }
        }

        files.sort();
        Ok(files)
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        self.registry.get_for_file(path).is_some()
    }
}
