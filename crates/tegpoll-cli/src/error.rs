use thiserror::Error;

/// Exit code when the command ran but the poll cycle ended failed.
pub const CYCLE_FAILED_EXIT_CODE: u8 = 3;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] tegpoll_core::ConfigError),

    #[error(transparent)]
    Validation(#[from] tegpoll_core::ValidationError),

    #[error("setup failed: {0}")]
    Setup(#[from] tegpoll_core::AcquisitionError),

    #[error("command error: {0}")]
    Command(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Validation(_) => 2,
            Self::Setup(_) => 2,
            Self::Command(_) => 2,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}
