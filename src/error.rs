use thiserror::Error;

/// Everything the engine can refuse or fail at.
///
/// Control errors (`UnknownSequence`, `UnknownEffect`, `UnknownPalette`,
/// `InvalidConfig`) are returned to whoever asked and leave the engine untouched.
/// `DispatchFailure` only ever shows up in the dispatcher's logs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Unknown sequence: {0}")]
    UnknownSequence(String),

    #[error("Unknown effect: {0}")]
    UnknownEffect(String),

    #[error("Unknown palette: {0}")]
    UnknownPalette(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid palette {name}: {reason}")]
    InvalidPalette { name: String, reason: String },

    #[error("Failed to command light {light}: {reason}")]
    DispatchFailure { light: String, reason: String },
}

impl EngineError {
    /// Stable name used on the control protocol.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::UnknownSequence(_) => "UnknownSequence",
            EngineError::UnknownEffect(_) => "UnknownEffect",
            EngineError::UnknownPalette(_) => "UnknownPalette",
            EngineError::InvalidConfig(_) => "InvalidConfig",
            EngineError::InvalidPalette { .. } => "InvalidPalette",
            EngineError::DispatchFailure { .. } => "DispatchFailure",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
