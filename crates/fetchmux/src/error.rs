use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error("no format matched selection policy `{policy}`")]
    NoMatchingFormat { policy: String },

    #[error("invalid selection policy `{input}`: {reason}")]
    InvalidPolicy { input: String, reason: String },

    #[error("invalid format `{format_id}`: {reason}")]
    InvalidFormat { format_id: String, reason: String },

    #[error("transfer of format `{format_id}` failed at byte {offset}: {reason}")]
    TransferFailed {
        format_id: String,
        offset: u64,
        reason: String,
    },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("operation timed out: {reason}")]
    Timeout { reason: String },

    #[error("remux failed: {reason}")]
    RemuxFailed { reason: String },

    #[error("transcode failed: {reason}")]
    TranscodeFailed { reason: String },

    #[error("extraction failed for `{url}`: {message}")]
    Extraction { url: String, message: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl DownloadError {
    pub fn no_matching_format(policy: impl Into<String>) -> Self {
        Self::NoMatchingFormat {
            policy: policy.into(),
        }
    }

    pub fn invalid_policy(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_format(format_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            format_id: format_id.into(),
            reason: reason.into(),
        }
    }

    pub fn transfer_failed(
        format_id: impl Into<String>,
        offset: u64,
        reason: impl Into<String>,
    ) -> Self {
        Self::TransferFailed {
            format_id: format_id.into(),
            offset,
            reason: reason.into(),
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::Timeout {
            reason: reason.into(),
        }
    }

    pub fn remux_failed(reason: impl Into<String>) -> Self {
        Self::RemuxFailed {
            reason: reason.into(),
        }
    }

    pub fn transcode_failed(reason: impl Into<String>) -> Self {
        Self::TranscodeFailed {
            reason: reason.into(),
        }
    }

    pub fn extraction(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extraction {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Whether the error is a transient transport condition worth retrying
    /// with the same byte window.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled
            | Self::NoMatchingFormat { .. }
            | Self::InvalidPolicy { .. }
            | Self::InvalidFormat { .. }
            | Self::TransferFailed { .. }
            | Self::RemuxFailed { .. }
            | Self::TranscodeFailed { .. }
            | Self::Extraction { .. }
            | Self::Configuration { .. } => false,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Network { source } => is_retryable_reqwest_error(source),
            Self::Io { .. } | Self::Timeout { .. } | Self::Internal { .. } => true,
        }
    }
}

/// Classify a reqwest error as retryable or non-retryable.
///
/// Retryable: connect, timeout, request, body read, and decode errors.
/// Non-retryable: redirect and builder errors.
pub fn is_retryable_reqwest_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
}
