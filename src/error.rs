use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing backend URL. Set CLIENTTIME_SUPABASE_URL or supabase_url in ~/.clienttime.json")]
    MissingUrl,

    #[error(
        "Missing backend API key. Set CLIENTTIME_SUPABASE_ANON_KEY or supabase_anon_key in ~/.clienttime.json"
    )]
    MissingAnonKey,

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid {kind} ID")]
    InvalidId { kind: &'static str },

    #[error("Client name is required")]
    EmptyName,

    #[error("Invalid {0}")]
    InvalidTimestamp(&'static str),

    #[error("Start time cannot be in the future")]
    FutureStart,

    #[error("{0}")]
    Password(&'static str),

    #[error("{0}")]
    Field(&'static str),

    #[error("{0}")]
    State(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Too many requests, slow down and try again")]
    RateLimited,

    #[error("Record not found")]
    NotFound,

    #[error("{0}")]
    Rejected(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImportError {
    #[error("Not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Not valid CSV: {0}")]
    InvalidCsv(String),

    #[error("JSON must be a client list or an object with a \"clients\" array")]
    UnsupportedShape,

    #[error("No valid clients found")]
    NoClients,
}

impl ImportError {
    pub fn hint(&self) -> &'static str {
        match self {
            ImportError::InvalidJson(_) | ImportError::UnsupportedShape => {
                "Expected JSON like [{\"name\":\"Client 1\",\"hourlyRate\":75}]"
            }
            ImportError::InvalidCsv(_) => "Expected CSV lines like: Acme Corp, 75",
            ImportError::NoClients => {
                "Supported formats: CSV (Name,Rate) or JSON client list"
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Message suitable for a toast or the status line.
    pub fn user_message(&self) -> String {
        match self {
            Error::Config(err) => err.to_string(),
            Error::Validation(err) => err.to_string(),
            Error::Remote(err) => format!("{err}. Please try again."),
            Error::Import(err) => format!("Import failed: {err}. {}", err.hint()),
            Error::Io(err) => format!("File error: {err}"),
            Error::Json(err) => format!("Could not encode data: {err}"),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Remote(RemoteError::Unauthorized(_)))
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => 78,
            Error::Remote(RemoteError::Unauthorized(_)) => 77,
            Error::Validation(_) | Error::Import(_) => 65,
            Error::Remote(_) => 69,
            Error::Io(_) | Error::Json(_) => 74,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_suggest_retry() {
        let err = Error::from(RemoteError::Network("connection refused".to_string()));
        assert_eq!(
            err.user_message(),
            "Network error: connection refused. Please try again."
        );
    }

    #[test]
    fn import_errors_carry_format_hint() {
        let err = Error::from(ImportError::NoClients);
        let message = err.user_message();
        assert!(message.starts_with("Import failed: No valid clients found"));
        assert!(message.contains("CSV (Name,Rate)"));
    }

    #[test]
    fn unauthorized_is_detected() {
        let err = Error::from(RemoteError::Unauthorized("JWT expired".to_string()));
        assert!(err.is_unauthorized());
        assert_eq!(err.exit_code(), 77);
        assert!(!Error::from(ValidationError::EmptyName).is_unauthorized());
    }
}
