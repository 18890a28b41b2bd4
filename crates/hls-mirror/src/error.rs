use reqwest::StatusCode;

/// Longest error-body excerpt kept in an error value.
const MAX_BODY_EXCERPT: usize = 512;

pub type Result<T> = std::result::Result<T, MirrorError>;

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("stream discovery failed: {reason}")]
    Discovery { reason: String },

    #[error("request failed with HTTP {status} during {operation} for {url}: {body}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
        body: String,
    },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("playlist parse error: {reason}")]
    Parse { reason: String },

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl MirrorError {
    pub fn discovery(reason: impl Into<String>) -> Self {
        Self::Discovery {
            reason: reason.into(),
        }
    }

    /// Builds an HTTP status error, keeping at most a short excerpt of the body.
    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
        body: &str,
    ) -> Self {
        let body = match body.char_indices().nth(MAX_BODY_EXCERPT) {
            Some((idx, _)) => format!("{}...", &body[..idx]),
            None => body.to_string(),
        };
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
            body,
        }
    }

    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Network { source } => {
                source.is_connect()
                    || source.is_timeout()
                    || source.is_request()
                    || source.is_body()
                    || source.is_decode()
            }
            Self::Discovery { .. } | Self::Io { .. } => true,
            Self::Cancelled
            | Self::Parse { .. }
            | Self::InvalidUrl { .. }
            | Self::Configuration { .. }
            | Self::Json { .. } => false,
        }
    }
}
