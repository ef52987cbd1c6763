//! Rendering errors

use thiserror::Error;

/// Errors that can occur while rendering or editing configuration files
#[derive(Debug, Error)]
pub enum RenderError {
    /// A file manifest entry has no contents
    #[error("file {0} has no contents")]
    EmptySource(String),

    /// Data URL could not be decoded
    #[error("could not decode data URL: {0}")]
    Decode(String),

    /// File is not valid UTF-8
    #[error("file {path} is not valid UTF-8")]
    Utf8 { path: String },

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unexpected document shape
    #[error("invalid {file}: {reason}")]
    InvalidDocument { file: String, reason: String },

    /// Template directory read error
    #[error("could not read template {path}: {source}")]
    Template {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid resource quantity
    #[error("invalid quantity {0:?}")]
    InvalidQuantity(String),
}
