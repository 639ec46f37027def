use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad user input. Shown inline, never fatal.
    #[error("{0}")]
    Validation(String),

    #[error("Unknown route: {0}")]
    UnknownRoute(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cannot move from {from} to {to}")]
    Transition { from: String, to: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Malformed data: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl Error {
    /// Text shown to the chat user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::Transport(_) | Self::Timeout => "Failed to get bus location. Please try again.".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_is_shown_verbatim() {
        let err = Error::Validation("Please fill in all fields".to_string());
        assert_eq!(err.user_message(), "Please fill in all fields");
    }

    #[test]
    fn transport_failures_share_one_message() {
        assert_eq!(Error::Timeout.user_message(), Error::Transport("boom".into()).user_message());
    }
}
