//! View engine error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ViewError {
    /// An embedded template is not valid UTF-8 or failed to parse
    #[error("Invalid template {name}: {message}")]
    InvalidTemplate { name: String, message: String },

    /// Template rendering error
    #[error("Template error: {0}")]
    TemplateError(String),
}
