use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReenactError {
    #[error("Failed to install input hooks: {0}")]
    HookInstall(String),

    #[error("Input injection failed: {0}")]
    Injection(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed recording: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ReenactError>;
