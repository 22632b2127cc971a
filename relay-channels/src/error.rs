use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlatformError>;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("http error: {0}")]
    Http(String),

    #[error("telegram api error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),

    #[error("{0} is not supported by this client")]
    Unsupported(&'static str),
}

impl From<reqwest::Error> for PlatformError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for PlatformError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}
