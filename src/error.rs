use thiserror::Error;

#[derive(Error, Debug)]
pub enum AtlasError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Language not supported: {0}")]
    UnsupportedLanguage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capability error: {0}")]
    Capability(String),

    #[error("Git error: {0}")]
    Git(String),

    #[error("Daemon error: {0}")]
    Daemon(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Repository not indexed: {0}")]
    RepoNotFound(String),
}

pub type Result<T> = std::result::Result<T, AtlasError>;
