use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unknown mode '{0}' (expected off, heat, cool, heat_cool or fan_only)")]
    UnknownMode(String),
    #[error("unknown output '{0}'")]
    UnknownOutput(String),
    #[error("unknown input '{0}'")]
    UnknownInput(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be a finite, non-negative temperature offset (got {value})")]
    InvalidOffset { field: &'static str, value: f32 },
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("invalid runtime config json: {0}")]
    Json(#[from] serde_json::Error),
}
