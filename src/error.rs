use thiserror::Error;

/// Failures reported by an exchange gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Rate limit, network or exchange-side outage; worth retrying
    #[error("Transient exchange error: {0}")]
    Transient(String),

    #[error("Exchange rejected request ({code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Failed to decode exchange response: {0}")]
    Decode(String),

    /// Missing or unusable precision/leverage metadata
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            GatewayError::Decode(e.to_string())
        } else {
            GatewayError::Transient(e.to_string())
        }
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Invalid startup settings
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown interval: {0}")]
    UnknownInterval(String),

    #[error("Invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Missing environment variable {0}")]
    MissingEnv(&'static str),

    #[error(transparent)]
    Load(#[from] ::config::ConfigError),
}
