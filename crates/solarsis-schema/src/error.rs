/// Errors raised while loading a protocol schema or resolving against it.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The schema document could not be read.
    #[error("failed to load schema: {0}")]
    LoadFailed(String),

    /// The schema document is structurally invalid.
    #[error("invalid schema: {0}")]
    Invalid(String),

    /// The schema document is not valid JSON.
    #[error("schema is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// No command exists at the requested path.
    #[error("unknown command path '{0}'")]
    UnknownCommand(String),

    /// No config block exists for the requested path or name.
    #[error("unknown config '{0}'")]
    UnknownConfig(String),

    /// A command parameter could not be encoded with its variable rule.
    #[error("invalid parameter '{name}' = {value}: {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, SchemaError>;
