use miette::Diagnostic;
use thiserror::Error;

/// Unified error type for all Havoc operations.
#[derive(Debug, Error, Diagnostic)]
pub enum HavocError {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or malformed version string.
    #[error("Version error: {message}")]
    #[diagnostic(help("Versions are 1-4 dot-separated sections, e.g. \"2.4\" or \"1.2.0a\""))]
    Version { message: String },

    /// Invalid or malformed version range string.
    #[error("Range error: {message}")]
    #[diagnostic(help("Ranges are an operator plus a version (e.g. \">=1.2\"), or \"*\" / \"-\""))]
    Range { message: String },

    /// Invalid module or vulnerability definition.
    #[error("Module error: {message}")]
    Module { message: String },

    /// Module catalog discovery or parsing failed.
    #[error("Catalog error: {message}")]
    #[diagnostic(help("Check the module's TOML definition for syntax errors"))]
    Catalog { message: String },

    /// Dependency resolution failed (missing providers, cycles, etc.).
    #[error("Resolution failed: {message}")]
    Resolution { message: String },
}

/// Convenience alias for `miette::Result<T>`.
pub type HavocResult<T> = miette::Result<T>;
