use thiserror::Error;

#[derive(Debug, Error)]
pub enum GameError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("record store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("please enter your name")]
    EmptyName,
    #[error("name must be at most {max} characters")]
    NameTooLong { max: usize },
    #[error("enter a whole number between {min} and {max}")]
    InvalidGuess { min: u32, max: u32 },
    #[error("no game in progress")]
    NotInProgress,
    #[error("illegal transition: {0}")]
    IllegalTransition(String),
}

impl GameError {
    /// Errors recovered by re-prompting the player; session state is untouched.
    pub fn is_user_input(&self) -> bool {
        matches!(
            self,
            Self::EmptyName | Self::NameTooLong { .. } | Self::InvalidGuess { .. } | Self::NotInProgress
        )
    }
}
