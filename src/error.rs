use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Failures talking to the hosted record store.
#[derive(Debug, Clone, Error)]
pub enum DirectoryError {
    #[error("Directory request failed: {0}")]
    Transport(String),

    #[error("Directory returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Directory response could not be decoded: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for DirectoryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account has no role for this entry point")]
    RoleNotPermitted,

    #[error("Access token rejected: {0}")]
    InvalidToken(String),

    #[error("Auth provider request failed: {0}")]
    Transport(String),

    #[error("Auth provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Role lookup failed: {0}")]
    Directory(#[from] DirectoryError),
}

impl AuthError {
    /// Short code placed in the `error` query parameter of the login redirect.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::RoleNotPermitted => "unauthorized_role",
            Self::InvalidToken(_) => "invalid_token",
            Self::Transport(_) | Self::Status { .. } | Self::Directory(_) => "unavailable",
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session encrypt error: {0}")]
    Encrypt(String),

    #[error("Session refresh failed: {0}")]
    Refresh(#[from] AuthError),

    #[error("Session resolution timed out")]
    Timeout,
}
