use thiserror::Error;

pub type Result<T, E = MzError> = std::result::Result<T, E>;

/// Every failure aborts the current module (or bundle step); no partial
/// output is produced.
#[derive(Debug, Error)]
pub enum MzError {
    #[error("Unsupported: {reason} ({path})")]
    UnsupportedRequireForm { path: String, reason: String },

    #[error("Unsupported: {reason} ({path})")]
    UnsupportedExportForm { path: String, reason: String },

    #[error("Multiple default exports are not allowed in the same module ({path})")]
    MultipleDefaultExports { path: String },

    #[error("Unknown dependency: {specifier} ({path})")]
    UnknownDependency { path: String, specifier: String },

    #[error("Module requires itself: {specifier} ({path})")]
    IllegalSelfReference { path: String, specifier: String },

    #[error("Circular dependency not allowed: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("Parse error in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Code generation failed: {0}")]
    Codegen(String),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Malformed wrapper template: {0}")]
    Template(&'static str),
}

impl MzError {
    pub(crate) fn require_form(path: &str, reason: impl Into<String>) -> Self {
        MzError::UnsupportedRequireForm { path: path.to_string(), reason: reason.into() }
    }

    pub(crate) fn export_form(path: &str, reason: impl Into<String>) -> Self {
        MzError::UnsupportedExportForm { path: path.to_string(), reason: reason.into() }
    }
}
