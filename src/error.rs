use thiserror::Error;

/// Type alias for Result with AssistantError
pub type Result<T> = std::result::Result<T, AssistantError>;

/// Error types for the email assistant
#[derive(Error, Debug)]
pub enum AssistantError {
    /// Authentication failed (credentials rejected, missing refresh token, ...)
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// OAuth2 token endpoint rejected the exchange
    #[error("Token exchange failed (HTTP {status}): {message}")]
    TokenExchange { status: u16, message: String },

    /// User did not complete the interactive authorization
    #[error("Authorization cancelled: {0}")]
    AuthorizationCancelled(String),

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Mailbox (IMAP) protocol error
    #[error("Mailbox error: {0}")]
    MailboxError(String),

    /// Outbound relay (SMTP) error
    #[error("Relay error: {0}")]
    RelayError(String),

    /// Outgoing message could not be assembled (bad address, header, ...)
    #[error("Message build error: {0}")]
    MessageBuild(String),

    /// Raw message could not be parsed
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// Language model call failed or returned unusable output
    #[error("Language model error: {0}")]
    LanguageModel(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AssistantError {
    /// Errors raised while talking to the mailbox, the relay or the token endpoint
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            AssistantError::AuthError(_)
                | AssistantError::TokenExchange { .. }
                | AssistantError::NetworkError(_)
                | AssistantError::MailboxError(_)
                | AssistantError::RelayError(_)
        )
    }
}

impl From<reqwest::Error> for AssistantError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            AssistantError::AuthError(format!("Malformed token response: {}", error))
        } else {
            AssistantError::NetworkError(error.to_string())
        }
    }
}

impl From<imap::error::Error> for AssistantError {
    fn from(error: imap::error::Error) -> Self {
        match error {
            imap::error::Error::Io(err) => AssistantError::NetworkError(err.to_string()),
            imap::error::Error::Tls(err) => AssistantError::NetworkError(format!("TLS: {}", err)),
            imap::error::Error::No(msg) => AssistantError::MailboxError(format!("NO: {}", msg)),
            imap::error::Error::Bad(msg) => AssistantError::MailboxError(format!("BAD: {}", msg)),
            other => AssistantError::MailboxError(other.to_string()),
        }
    }
}

impl From<lettre::transport::smtp::Error> for AssistantError {
    fn from(error: lettre::transport::smtp::Error) -> Self {
        AssistantError::RelayError(error.to_string())
    }
}

impl From<lettre::error::Error> for AssistantError {
    fn from(error: lettre::error::Error) -> Self {
        AssistantError::MessageBuild(error.to_string())
    }
}

impl From<lettre::address::AddressError> for AssistantError {
    fn from(error: lettre::address::AddressError) -> Self {
        AssistantError::MessageBuild(format!("invalid address: {}", error))
    }
}

impl From<mailparse::MailParseError> for AssistantError {
    fn from(error: mailparse::MailParseError) -> Self {
        AssistantError::InvalidMessageFormat(error.to_string())
    }
}

impl From<async_openai::error::OpenAIError> for AssistantError {
    fn from(error: async_openai::error::OpenAIError) -> Self {
        AssistantError::LanguageModel(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_errors() {
        let network = AssistantError::NetworkError("connection reset".to_string());
        assert!(network.is_connectivity());

        let exchange = AssistantError::TokenExchange {
            status: 400,
            message: "invalid_grant".to_string(),
        };
        assert!(exchange.is_connectivity());

        let relay = AssistantError::RelayError("554 rejected".to_string());
        assert!(relay.is_connectivity());
    }

    #[test]
    fn test_non_connectivity_errors() {
        let model = AssistantError::LanguageModel("empty completion".to_string());
        assert!(!model.is_connectivity());

        let config = AssistantError::ConfigError("missing address".to_string());
        assert!(!config.is_connectivity());
    }

    #[test]
    fn test_error_display() {
        let error = AssistantError::TokenExchange {
            status: 401,
            message: "invalid_client".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("HTTP 401"));
        assert!(display.contains("invalid_client"));

        let auth_error = AssistantError::AuthError("Invalid token".to_string());
        assert!(format!("{}", auth_error).contains("Authentication failed"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "token file");
        let error: AssistantError = io.into();
        assert!(matches!(error, AssistantError::IoError(_)));
    }
}
